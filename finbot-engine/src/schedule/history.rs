//! Persistent record of when each entity was last reported.
//!
//! File format: a JSON object mapping ticker → ISO-8601 timestamp, e.g.
//! `{"NVDA": "2024-05-01T12:00:00Z"}`. Writes are atomic: write to a `.tmp`
//! sibling, sync, then rename over the target.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, warn};

use finbot_common::error::ResultExt;
use finbot_common::Result;

/// Ticker → last reported time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerHistory {
    entries: BTreeMap<String, DateTime<Utc>>,
}

impl SchedulerHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last time `ticker` was reported, `None` if never.
    pub fn last_sent(&self, ticker: &str) -> Option<DateTime<Utc>> {
        self.entries.get(ticker).copied()
    }

    pub fn record(&mut self, ticker: impl Into<String>, at: DateTime<Utc>) {
        self.entries.insert(ticker.into(), at);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, DateTime<Utc>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Build from the on-disk representation. Entries that are not a
    /// readable timestamp string are skipped, which makes the ticker count as
    /// never sent.
    pub fn from_raw(raw: BTreeMap<String, Value>) -> Self {
        let mut history = Self::new();
        for (ticker, value) in raw {
            match value.as_str().and_then(parse_timestamp) {
                Some(at) => history.record(ticker, at),
                None => warn!(ticker = %ticker, value = %value, "Unreadable history timestamp, treating as never sent"),
            }
        }
        history
    }

    pub fn to_raw(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.to_rfc3339_opts(SecondsFormat::Secs, true)))
            .collect()
    }
}

/// Parse an ISO-8601 timestamp. Values without an offset are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .map(|naive| naive.and_utc())
}

// ============================================================================
// Stores
// ============================================================================

/// Storage for [`SchedulerHistory`].
pub trait HistoryStore: Send + Sync {
    fn load(&self) -> Result<SchedulerHistory>;

    /// Record one report and persist it before returning.
    fn record(&self, ticker: &str, at: DateTime<Utc>) -> Result<SchedulerHistory>;
}

/// JSON file store with atomic replacement.
pub struct JsonHistoryStore {
    path: PathBuf,
    // Serializes load-modify-save within the process
    write_lock: Mutex<()>,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "history.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn read(&self) -> Result<SchedulerHistory> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(SchedulerHistory::new());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<BTreeMap<String, Value>>(&content) {
            Ok(raw) => Ok(SchedulerHistory::from_raw(raw)),
            Err(e) => {
                // Replaced by a valid file on the next write
                warn!(
                    path = %self.path.display(),
                    error = %e,
                    "History file unreadable, starting from empty history"
                );
                Ok(SchedulerHistory::new())
            }
        }
    }

    fn write(&self, history: &SchedulerHistory) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .context(format!("creating {}", parent.display()))?;
            }
        }

        let json = serde_json::to_string_pretty(&history.to_raw())?;
        let tmp_path = self.tmp_path();
        {
            let mut file = fs::File::create(&tmp_path)
                .context(format!("creating {}", tmp_path.display()))?;
            file.write_all(json.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, &self.path)
            .map_err(|e| {
                let _ = fs::remove_file(&tmp_path);
                e
            })
            .context(format!("replacing {}", self.path.display()))?;

        debug!(path = %self.path.display(), entries = history.len(), "History saved");
        Ok(())
    }
}

impl HistoryStore for JsonHistoryStore {
    fn load(&self) -> Result<SchedulerHistory> {
        self.read()
    }

    fn record(&self, ticker: &str, at: DateTime<Utc>) -> Result<SchedulerHistory> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());
        let mut history = self.read()?;
        history.record(ticker, at);
        self.write(&history)?;
        Ok(history)
    }
}

/// In-memory store for tests and dry runs.
#[derive(Default)]
pub struct MemoryHistoryStore {
    inner: Mutex<SchedulerHistory>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history(history: SchedulerHistory) -> Self {
        Self {
            inner: Mutex::new(history),
        }
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn load(&self) -> Result<SchedulerHistory> {
        Ok(self.inner.lock().unwrap_or_else(|p| p.into_inner()).clone())
    }

    fn record(&self, ticker: &str, at: DateTime<Utc>) -> Result<SchedulerHistory> {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        inner.record(ticker, at);
        Ok(inner.clone())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, h, 0, 0).unwrap()
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = at(12);
        assert_eq!(parse_timestamp("2024-05-01T12:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T14:00:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-05-01T12:00:00.123456").map(|t| t.timestamp()), Some(expected.timestamp()));
        assert_eq!(parse_timestamp("2024-05-01 12:00:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn test_unreadable_entry_counts_as_never_sent() {
        let mut raw = BTreeMap::new();
        raw.insert("NVDA".to_string(), Value::from("2024-05-01T12:00:00"));
        raw.insert("UBER".to_string(), Value::from("garbage"));

        let history = SchedulerHistory::from_raw(raw);

        assert_eq!(history.last_sent("NVDA"), Some(at(12)));
        assert_eq!(history.last_sent("UBER"), None);
    }

    #[test]
    fn test_missing_file_is_empty_history() {
        let tmp = TempDir::new().unwrap();
        let store = JsonHistoryStore::new(tmp.path().join("sent_messages.json"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn test_record_then_reload() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("sent_messages.json");
        let store = JsonHistoryStore::new(&path);

        store.record("NVDA", at(10)).unwrap();
        store.record("SPY", at(11)).unwrap();

        let reloaded = JsonHistoryStore::new(&path).load().unwrap();
        assert_eq!(reloaded.last_sent("NVDA"), Some(at(10)));
        assert_eq!(reloaded.last_sent("SPY"), Some(at(11)));

        let content = fs::read_to_string(&path).unwrap();
        let raw: BTreeMap<String, String> = serde_json::from_str(&content).unwrap();
        assert_eq!(raw["NVDA"], "2024-05-01T10:00:00Z");
        assert!(!store.tmp_path().exists());
    }

    #[test]
    fn test_leftover_tmp_file_is_ignored() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sent_messages.json");
        let store = JsonHistoryStore::new(&path);
        store.record("NVDA", at(10)).unwrap();

        // A crash mid-write leaves a truncated temp file behind
        fs::write(store.tmp_path(), "{\"NVDA\": \"2024-05-0").unwrap();

        let history = store.load().unwrap();
        assert_eq!(history.last_sent("NVDA"), Some(at(10)));

        store.record("UBER", at(11)).unwrap();
        let history = store.load().unwrap();
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_corrupt_file_recovers_on_next_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sent_messages.json");
        fs::write(&path, "not json").unwrap();
        let store = JsonHistoryStore::new(&path);

        assert!(store.load().unwrap().is_empty());
        store.record("NVDA", at(9)).unwrap();
        assert_eq!(store.load().unwrap().last_sent("NVDA"), Some(at(9)));
    }

    #[test]
    fn test_non_string_entry_drops_only_that_ticker() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sent_messages.json");
        fs::write(
            &path,
            r#"{"NVDA": "2024-05-01T10:00:00Z", "SPY": 1714557600, "UBER": null}"#,
        )
        .unwrap();
        let store = JsonHistoryStore::new(&path);

        let history = store.load().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.last_sent("NVDA"), Some(at(10)));
        assert_eq!(history.last_sent("SPY"), None);

        // the next write leaves only well-formed entries behind
        store.record("UBER", at(11)).unwrap();
        let raw: BTreeMap<String, String> =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw.len(), 2);
    }

    #[test]
    fn test_reads_legacy_naive_timestamps() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("sent_messages.json");
        fs::write(&path, r#"{"CDR.WA": "2024-05-01T08:00:00.000001"}"#).unwrap();

        let history = JsonHistoryStore::new(&path).load().unwrap();
        assert!(history.last_sent("CDR.WA").is_some());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryHistoryStore::new();
        store.record("NVDA", at(1)).unwrap();
        assert_eq!(store.load().unwrap().last_sent("NVDA"), Some(at(1)));
    }
}
