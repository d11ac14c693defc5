//! Watch loop
//!
//! One sequential worker per process:
//! - Fetch every tile plus the military feed (throttled host-wide)
//! - Normalize, geofence and hex-filter the records
//! - Classify each contact against its sample from the previous cycle
//! - Record first sightings and notify on new or re-entering military contacts
//! - Sleep out the rest of the interval, or stop when shutdown is signalled

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use skywatch_core::{classify, join_notes, Anomaly, GeofenceSet, HexFilter, Sample};
use skywatch_net::{Fetcher, SharedNotifier};
use skywatch_tracker::ContactTracker;

/// Shortest pause between cycles, even when a cycle overruns the interval
pub const MIN_PAUSE: Duration = Duration::from_secs(1);

/// Watch loop configuration
#[derive(Debug, Clone)]
pub struct WatchConfig {
    /// Cycle period, measured from cycle start
    pub interval: Duration,
    /// Log every in-zone contact, not only new ones
    pub print_all: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            print_all: false,
        }
    }
}

/// What one cycle saw and did
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub cycle: u64,
    /// Unique records fetched across all sources
    pub fetched: usize,
    /// Contacts inside the geofence after hex filtering
    pub in_zone: usize,
    /// Hexes seen for the first time
    pub new_contacts: Vec<String>,
    /// Contacts with at least one anomaly note
    pub anomalies: Vec<(String, Vec<Anomaly>)>,
    /// Notifications attempted
    pub notifications: usize,
    /// Rows appended to the contact store
    pub persisted: usize,
    /// Sources that failed after all retries
    pub failed_sources: Vec<String>,
}

/// The polling watch over the configured airspace.
///
/// With a notifier attached, a message goes out for every first sighting and
/// for a military contact entering the zone. A military contact that stays in
/// the zone from one cycle to the next is not notified again.
pub struct Watch {
    fetcher: Fetcher,
    geofence: GeofenceSet,
    hex_filter: HexFilter,
    tracker: ContactTracker,
    notifier: Option<SharedNotifier>,
    config: WatchConfig,
    cycle: u64,
}

impl Watch {
    pub fn new(
        fetcher: Fetcher,
        geofence: GeofenceSet,
        hex_filter: HexFilter,
        tracker: ContactTracker,
        notifier: Option<SharedNotifier>,
        config: WatchConfig,
    ) -> Self {
        Self {
            fetcher,
            geofence,
            hex_filter,
            tracker,
            notifier,
            config,
            cycle: 0,
        }
    }

    /// Completed cycles
    pub fn cycles(&self) -> u64 {
        self.cycle
    }

    pub fn tracker(&self) -> &ContactTracker {
        &self.tracker
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Run one poll/process cycle
    pub async fn run_cycle(&mut self) -> CycleReport {
        self.cycle += 1;
        let cycle = self.cycle;
        debug!("Cycle {} starting", cycle);

        let fetched = self.fetcher.fetch_all().await;
        let samples = Sample::normalize_all(&fetched.records);
        let in_zone: Vec<Sample> = samples
            .into_iter()
            .filter(|s| self.geofence.contains_any(s.lat, s.lon))
            .collect();
        let contacts = self.hex_filter.apply(in_zone);

        let mut report = CycleReport {
            cycle,
            fetched: fetched.records.len(),
            in_zone: contacts.len(),
            failed_sources: fetched.failed_sources,
            ..Default::default()
        };

        for sample in &contacts {
            let now = Utc::now();
            let (notes, seen_last_cycle) = {
                let previous = self.tracker.memory().previous(&sample.hex, cycle);
                let elapsed = previous.and_then(|entry| seconds_since(entry.seen_at, now));
                let notes = classify(sample, previous.map(|entry| &entry.sample), elapsed);
                (notes, previous.is_some())
            };

            if self.config.print_all {
                info!("  {}", contact_line(sample, &notes));
            }

            let is_new = self.tracker.observe(sample, &notes, now);
            if is_new {
                info!("[NEW] {}", contact_line(sample, &notes));
                report.new_contacts.push(sample.hex.clone());
            }

            let military_entry = sample.military && !seen_last_cycle;
            if let Some(notifier) = &self.notifier {
                if is_new || military_entry {
                    dispatch(notifier, &contact_message(sample, &notes, is_new)).await;
                    report.notifications += 1;
                }
            }

            if !notes.is_empty() {
                report.anomalies.push((sample.hex.clone(), notes));
            }
            self.tracker.remember(sample.clone(), cycle, now);
        }

        report.persisted = self.tracker.flush();

        info!(
            "[{}] Contacts in zone: {} ({} new)",
            Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
            report.in_zone,
            report.new_contacts.len()
        );
        if !report.failed_sources.is_empty() {
            debug!("Sources with no data this cycle: {}", report.failed_sources.join(", "));
        }

        report
    }

    /// Loop until `shutdown` turns true.
    ///
    /// The flag is checked between cycles and raced against the pause, so a
    /// cycle in progress always finishes its append.
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) -> anyhow::Result<()> {
        info!(
            "Watch starting: {} polygons ({}), {} tiles, interval {:?}",
            self.geofence.len(),
            self.geofence.source(),
            self.fetcher.tiles().len(),
            self.config.interval
        );

        while !*shutdown.borrow() {
            let started = Instant::now();
            self.run_cycle().await;

            if *shutdown.borrow() {
                break;
            }

            let pause = next_pause(self.config.interval, started.elapsed());
            debug!("Sleeping {:?}", pause);
            tokio::select! {
                _ = tokio::time::sleep(pause) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown channel closed, stopping");
                        break;
                    }
                }
            }
        }

        info!("Watch stopped after {} cycles", self.cycle);
        Ok(())
    }
}

async fn dispatch(notifier: &SharedNotifier, text: &str) {
    if let Err(e) = notifier.send(text).await {
        warn!("Notification via {} failed: {}", notifier.name(), e);
    }
}

/// Pause until the next cycle: the rest of the interval, at least [`MIN_PAUSE`]
pub fn next_pause(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed).max(MIN_PAUSE)
}

fn seconds_since(earlier: DateTime<Utc>, now: DateTime<Utc>) -> Option<f64> {
    (now - earlier)
        .num_microseconds()
        .map(|micros| micros as f64 / 1_000_000.0)
}

/// Console line: the formatted sample plus any anomaly notes
pub fn contact_line(sample: &Sample, notes: &[Anomaly]) -> String {
    if notes.is_empty() {
        sample.to_string()
    } else {
        format!("{}  NOTE: {}", sample, join_notes(notes))
    }
}

/// Notification body for a contact
pub fn contact_message(sample: &Sample, notes: &[Anomaly], is_new: bool) -> String {
    let header = if is_new { "NEW CONTACT" } else { "MILITARY CONTACT" };
    let mut text = format!("{}\n{}", header, sample);
    if !notes.is_empty() {
        text.push_str("\nAnomalies: ");
        text.push_str(&join_notes(notes));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::path::Path;
    use std::sync::Arc;

    use skywatch_core::{FilterMode, GeofenceSource, Polygon, Ring, Tile};
    use skywatch_net::{FeedConfig, FeedTransport, NetError, Notifier, RateLimiter};
    use skywatch_tracker::{ContactLog, CsvContactLog, MemoryContactLog};

    /// Serves one scripted tile body per call; the military feed is empty
    struct ScriptedFeed {
        tile_bodies: Mutex<VecDeque<Value>>,
    }

    impl ScriptedFeed {
        fn new(bodies: Vec<Value>) -> Arc<Self> {
            Arc::new(Self {
                tile_bodies: Mutex::new(bodies.into()),
            })
        }
    }

    #[async_trait]
    impl FeedTransport for ScriptedFeed {
        async fn get_json(&self, url: &str) -> Result<Value, NetError> {
            if url.ends_with("/mil") {
                return Ok(json!([]));
            }
            Ok(self
                .tile_bodies
                .lock()
                .pop_front()
                .unwrap_or_else(|| json!({"aircraft": []})))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, text: &str) -> Result<(), NetError> {
            self.sent.lock().push(text.to_string());
            Ok(())
        }

        fn name(&self) -> &str {
            "recording"
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn send(&self, _text: &str) -> Result<(), NetError> {
            Err(NetError::Status(500))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn zone() -> GeofenceSet {
        let ring = Ring::from_lat_lon(&[(37.0, -116.0), (37.0, -115.0), (38.0, -115.0), (38.0, -116.0)]).unwrap();
        let polygon = Polygon::new(vec![ring]).unwrap().with_name("test zone");
        GeofenceSet::new(vec![polygon], GeofenceSource::Fallback { reason: None }).unwrap()
    }

    fn fetcher(feed: Arc<ScriptedFeed>, lock_dir: &Path) -> Fetcher {
        let config = FeedConfig {
            base_url: "http://feed.test/v2".to_string(),
            backoff_base: Duration::ZERO,
            ..Default::default()
        };
        let limiter = RateLimiter::new(lock_dir.join("feed.lock"), Duration::ZERO);
        Fetcher::new(feed, limiter, config).with_tiles(vec![Tile {
            name: "test",
            lat: 37.5,
            lon: -115.5,
            radius_nm: 10,
        }])
    }

    fn watch_with(
        feed: Arc<ScriptedFeed>,
        lock_dir: &Path,
        log: Box<dyn ContactLog>,
        notifier: SharedNotifier,
    ) -> Watch {
        Watch::new(
            fetcher(feed, lock_dir),
            zone(),
            HexFilter::new(Vec::<String>::new(), FilterMode::Include).unwrap(),
            ContactTracker::open(log),
            Some(notifier),
            WatchConfig::default(),
        )
    }

    fn tile(aircraft: Value) -> Value {
        json!({ "aircraft": aircraft })
    }

    #[tokio::test]
    async fn test_single_contact_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let csv_path = dir.path().join("contacts.csv");
        let feed = ScriptedFeed::new(vec![tile(json!([
            {"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 400}
        ]))]);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = watch_with(
            feed,
            dir.path(),
            Box::new(CsvContactLog::new(&csv_path)),
            notifier.clone(),
        );

        let report = watch.run_cycle().await;
        assert_eq!(report.in_zone, 1);
        assert_eq!(report.new_contacts, vec!["abc123".to_string()]);
        assert_eq!(report.persisted, 1);

        let text = std::fs::read_to_string(&csv_path).unwrap();
        assert_eq!(text.lines().count(), 2);

        let rows = CsvContactLog::new(&csv_path).load().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].hex, "abc123");
        assert_eq!(rows[0].note, "");

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].starts_with("NEW CONTACT\nHEX:abc123"));
        assert!(!sent[0].contains("Anomalies"));
    }

    #[tokio::test]
    async fn test_repeat_sighting_not_new() {
        let dir = tempfile::tempdir().unwrap();
        let contact = json!([{"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 400}]);
        let feed = ScriptedFeed::new(vec![tile(contact.clone()), tile(contact)]);
        let log = MemoryContactLog::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = watch_with(feed, dir.path(), Box::new(log.clone()), notifier.clone());

        assert_eq!(watch.run_cycle().await.new_contacts.len(), 1);
        let second = watch.run_cycle().await;
        assert!(second.new_contacts.is_empty());
        assert_eq!(second.in_zone, 1);

        assert_eq!(log.records().len(), 1);
        assert_eq!(notifier.sent.lock().len(), 1);
        assert_eq!(watch.cycles(), 2);
    }

    #[tokio::test]
    async fn test_outside_zone_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![tile(json!([
            {"hex": "abc123", "lat": 36.0, "lon": -115.8},
            {"hex": "def456", "lon": -115.8}
        ]))]);
        let log = MemoryContactLog::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = watch_with(feed, dir.path(), Box::new(log.clone()), notifier.clone());

        let report = watch.run_cycle().await;
        assert_eq!(report.fetched, 2);
        assert_eq!(report.in_zone, 0);
        assert!(log.records().is_empty());
        assert!(notifier.sent.lock().is_empty());
    }

    #[tokio::test]
    async fn test_delta_rules_use_previous_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![
            tile(json!([{"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 100}])),
            tile(json!([{"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 400}])),
        ]);
        let mut watch = watch_with(
            feed,
            dir.path(),
            Box::new(MemoryContactLog::new()),
            Arc::new(RecordingNotifier::default()),
        );

        assert!(watch.run_cycle().await.anomalies.is_empty());
        let second = watch.run_cycle().await;
        assert_eq!(
            second.anomalies,
            vec![("abc123".to_string(), vec![Anomaly::GroundSpeedJump(300.0)])]
        );

        let entry = watch.tracker().memory().get("abc123").unwrap();
        assert_eq!(entry.cycle, 2);
        assert_eq!(entry.sample.ground_speed_kt, Some(400.0));
    }

    #[tokio::test]
    async fn test_delta_rules_skip_after_gap() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![
            tile(json!([{"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 100}])),
            tile(json!([])),
            tile(json!([{"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 10000, "gs": 400}])),
        ]);
        let mut watch = watch_with(
            feed,
            dir.path(),
            Box::new(MemoryContactLog::new()),
            Arc::new(RecordingNotifier::default()),
        );

        for _ in 0..3 {
            assert!(watch.run_cycle().await.anomalies.is_empty());
        }
    }

    #[tokio::test]
    async fn test_military_notifies_on_entry_and_reentry() {
        let dir = tempfile::tempdir().unwrap();
        let mil = json!([{"hex": "ae0001", "lat": 37.5, "lon": -115.5, "alt_baro": 20000, "gs": 300, "mil": true}]);
        let feed = ScriptedFeed::new(vec![
            tile(mil.clone()),
            tile(mil.clone()),
            tile(json!([])),
            tile(mil),
        ]);
        let notifier = Arc::new(RecordingNotifier::default());
        let mut watch = watch_with(
            feed,
            dir.path(),
            Box::new(MemoryContactLog::new()),
            notifier.clone(),
        );

        for _ in 0..4 {
            watch.run_cycle().await;
        }

        let sent = notifier.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("NEW CONTACT"));
        assert!(sent[1].starts_with("MILITARY CONTACT"));
        assert!(sent[1].contains("[MIL]"));
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_abort_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![tile(json!([
            {"hex": "abc123", "lat": 37.2, "lon": -115.8},
            {"hex": "def456", "lat": 37.3, "lon": -115.7}
        ]))]);
        let log = MemoryContactLog::new();
        let mut watch = watch_with(feed, dir.path(), Box::new(log.clone()), Arc::new(FailingNotifier));

        let report = watch.run_cycle().await;
        assert_eq!(report.notifications, 2);
        assert_eq!(log.records().len(), 2);
    }

    #[tokio::test]
    async fn test_without_notifier_nothing_is_sent() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![tile(json!([
            {"hex": "ae0001", "lat": 37.5, "lon": -115.5, "mil": true}
        ]))]);
        let log = MemoryContactLog::new();
        let mut watch = Watch::new(
            fetcher(feed, dir.path()),
            zone(),
            HexFilter::new(Vec::<String>::new(), FilterMode::Include).unwrap(),
            ContactTracker::open(Box::new(log.clone())),
            None,
            WatchConfig::default(),
        );

        let report = watch.run_cycle().await;
        assert_eq!(report.new_contacts.len(), 1);
        assert_eq!(report.notifications, 0);
        assert_eq!(log.records().len(), 1);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let feed = ScriptedFeed::new(vec![]);
        let mut watch = watch_with(
            feed,
            dir.path(),
            Box::new(MemoryContactLog::new()),
            Arc::new(RecordingNotifier::default()),
        );

        let (tx, rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let _ = tx.send(true);
        });

        let result = tokio::time::timeout(Duration::from_secs(10), watch.run(rx)).await;
        assert!(result.is_ok());
        assert_eq!(watch.cycles(), 1);
    }

    #[tokio::test]
    async fn test_run_skips_cycle_when_already_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let mut watch = watch_with(
            ScriptedFeed::new(vec![]),
            dir.path(),
            Box::new(MemoryContactLog::new()),
            Arc::new(RecordingNotifier::default()),
        );

        let (_tx, rx) = watch::channel(true);
        watch.run(rx).await.unwrap();
        assert_eq!(watch.cycles(), 0);
    }

    #[test]
    fn test_next_pause() {
        let interval = Duration::from_secs(60);
        assert_eq!(next_pause(interval, Duration::from_secs(15)), Duration::from_secs(45));
        assert_eq!(next_pause(interval, Duration::from_secs(59)), MIN_PAUSE);
        assert_eq!(next_pause(interval, Duration::from_secs(90)), MIN_PAUSE);
    }

    #[test]
    fn test_contact_message() {
        let sample = Sample::from_record(&skywatch_core::RawRecord::new(
            json!({"hex": "abc123", "lat": 37.2, "lon": -115.8, "alt_baro": 61000, "gs": 700}),
        ))
        .unwrap();
        let notes = classify(&sample, None, None);

        let text = contact_message(&sample, &notes, true);
        assert_eq!(
            text,
            "NEW CONTACT\nHEX:abc123  FLT:-  ALT:61000 ft  GS:700 kt  POS:37.2,-115.8\n\
             Anomalies: high GS 700 kt; high ALT 61000 ft"
        );
        assert!(contact_line(&sample, &notes).ends_with("NOTE: high GS 700 kt; high ALT 61000 ft"));
    }
}
