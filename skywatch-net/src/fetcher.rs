//! Feed fetcher
//!
//! Queries every tile plus the military feed, one throttled request at a
//! time. A source that keeps failing is logged and contributes nothing to
//! the cycle; it never aborts it.

use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use skywatch_core::{military_url, RawRecord, Tile, DEFAULT_TILES};

use crate::{FeedConfig, NetError, RateLimiter, SharedTransport};

/// Field holding the record list in tile responses
const TILE_RECORDS_FIELD: &str = "aircraft";

/// Alternate record field used by the military feed (and some mirrors)
const SHORT_RECORDS_FIELD: &str = "ac";

/// Records gathered in one cycle
#[derive(Debug, Default)]
pub struct FetchResult {
    /// Merged records, deduplicated by hex
    pub records: Vec<RawRecord>,
    /// Names of sources that gave up after all retries
    pub failed_sources: Vec<String>,
}

/// Throttled, retrying feed fetcher
pub struct Fetcher {
    transport: SharedTransport,
    limiter: RateLimiter,
    config: FeedConfig,
    tiles: Vec<Tile>,
}

impl Fetcher {
    pub fn new(transport: SharedTransport, limiter: RateLimiter, config: FeedConfig) -> Self {
        Self {
            transport,
            limiter,
            config,
            tiles: DEFAULT_TILES.to_vec(),
        }
    }

    pub fn with_tiles(mut self, tiles: Vec<Tile>) -> Self {
        self.tiles = tiles;
        self
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    /// Fetch one tile. Returns an empty list once retries are exhausted.
    pub async fn fetch_tile(&self, tile: &Tile) -> Vec<Value> {
        let url = tile.build_url(&self.config.base_url);
        self.fetch_records(&url, extract_tile_records)
            .await
            .unwrap_or_default()
    }

    /// Fetch the military-flagged feed. Returns an empty list once retries are exhausted.
    pub async fn fetch_military(&self) -> Vec<Value> {
        let url = military_url(&self.config.base_url);
        self.fetch_records(&url, extract_military_records)
            .await
            .unwrap_or_default()
    }

    /// Fetch every tile and the military feed, then merge by hex
    pub async fn fetch_all(&self) -> FetchResult {
        let mut failed_sources = Vec::new();
        let mut batches: Vec<Vec<RawRecord>> = Vec::with_capacity(self.tiles.len() + 1);

        for tile in &self.tiles {
            let url = tile.build_url(&self.config.base_url);
            match self.fetch_records(&url, extract_tile_records).await {
                Some(records) => {
                    debug!("Tile {} returned {} records", tile.name, records.len());
                    batches.push(records.into_iter().map(RawRecord::new).collect());
                }
                None => failed_sources.push(tile.name.to_string()),
            }
        }

        let url = military_url(&self.config.base_url);
        match self.fetch_records(&url, extract_military_records).await {
            Some(records) => {
                debug!("Military feed returned {} records", records.len());
                batches.push(records.into_iter().map(RawRecord::military).collect());
            }
            None => failed_sources.push("military".to_string()),
        }

        let records = merge_records(batches);
        info!(
            "Fetched {} unique records ({} sources failed)",
            records.len(),
            failed_sources.len()
        );

        FetchResult {
            records,
            failed_sources,
        }
    }

    /// Retry loop with linear backoff. `None` after the last attempt fails.
    async fn fetch_records<F>(&self, url: &str, extract: F) -> Option<Vec<Value>>
    where
        F: Fn(Value) -> Result<Vec<Value>, NetError>,
    {
        let attempts = self.config.max_retries + 1;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.attempt(url, &extract).await {
                Ok(records) => return Some(records),
                Err(e) => {
                    debug!("Attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.backoff_base * attempt).await;
                    }
                }
            }
        }

        if let Some(e) = last_error {
            warn!("Fetch failed {} after {} attempts: {}", url, attempts, e);
        }
        None
    }

    async fn attempt<F>(&self, url: &str, extract: &F) -> Result<Vec<Value>, NetError>
    where
        F: Fn(Value) -> Result<Vec<Value>, NetError>,
    {
        if let Err(e) = self.limiter.acquire_async().await {
            // Keep the local pace even when the shared lock is unusable
            warn!("Rate limiter unavailable ({}), pacing locally", e);
            tokio::time::sleep(self.limiter.min_interval()).await;
        }

        let body = self.transport.get_json(url).await?;
        extract(body)
    }
}

/// Tile responses carry their records under `aircraft`.
///
/// A missing field means no aircraft; a field of the wrong type is malformed.
pub fn extract_tile_records(body: Value) -> Result<Vec<Value>, NetError> {
    let Value::Object(mut fields) = body else {
        return Err(NetError::Body("expected a JSON object".to_string()));
    };

    let records = fields
        .remove(TILE_RECORDS_FIELD)
        .or_else(|| fields.remove(SHORT_RECORDS_FIELD));

    match records {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(records)) => Ok(records),
        Some(_) => Err(NetError::Body(format!("`{}` is not an array", TILE_RECORDS_FIELD))),
    }
}

/// The military feed returns either a bare list or a wrapped one
pub fn extract_military_records(body: Value) -> Result<Vec<Value>, NetError> {
    match body {
        Value::Array(records) => Ok(records),
        Value::Object(mut fields) => {
            match fields
                .remove(SHORT_RECORDS_FIELD)
                .or_else(|| fields.remove(TILE_RECORDS_FIELD))
            {
                None | Some(Value::Null) => Ok(Vec::new()),
                Some(Value::Array(records)) => Ok(records),
                Some(_) => Err(NetError::Body("military record list is not an array".to_string())),
            }
        }
        _ => Err(NetError::Body("expected a JSON array or object".to_string())),
    }
}

/// Merge batches in order, keeping the first record per hex.
///
/// Records without a hex are dropped. A later duplicate from the military
/// feed still marks the kept record as military.
pub fn merge_records<I>(batches: I) -> Vec<RawRecord>
where
    I: IntoIterator<Item = Vec<RawRecord>>,
{
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut merged: Vec<RawRecord> = Vec::new();

    for record in batches.into_iter().flatten() {
        let Some(hex) = record.hex() else {
            continue;
        };

        match index.get(&hex) {
            Some(&i) => {
                if record.forced_military {
                    merged[i].forced_military = true;
                }
            }
            None => {
                index.insert(hex, merged.len());
                merged.push(record);
            }
        }
    }

    merged
}
