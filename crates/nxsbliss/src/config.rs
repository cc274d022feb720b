//! Writer configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::scan::ScanInfo;

/// Settings of the writer service and its per-scan writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WriterConfig {
    /// Address of the scan data store.
    pub redis_url: String,
    /// Only scans of this session are written; empty accepts all.
    pub session: String,
    /// Discovery wait per attempt.
    #[serde(with = "seconds")]
    pub next_scan_timeout: Duration,
    /// Parent path of channels without an explicit path. May contain
    /// `{scanno}`, `{serialno}` and `{entryname}`.
    pub default_nexus_path: String,
    #[serde(with = "seconds")]
    pub min_tick_interval: Duration,
    /// Minimum time between flushes while streaming.
    #[serde(with = "seconds")]
    pub flush_interval: Duration,
    pub allowed_suffixes: Vec<String>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6380".to_string(),
            session: String::new(),
            next_scan_timeout: Duration::from_secs(2),
            default_nexus_path: "/scan{serialno}:NXentry/instrument:NXinstrument/collection"
                .to_string(),
            min_tick_interval: Duration::from_millis(100),
            flush_interval: Duration::from_secs(1),
            allowed_suffixes: [".nxs", ".h5", ".hdf5", ".nx"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl WriterConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn with_redis_url(mut self, url: impl Into<String>) -> Self {
        self.redis_url = url.into();
        self
    }

    pub fn with_session(mut self, session: impl Into<String>) -> Self {
        self.session = session.into();
        self
    }

    pub fn with_next_scan_timeout(mut self, timeout: Duration) -> Self {
        self.next_scan_timeout = timeout;
        self
    }

    pub fn with_default_nexus_path(mut self, template: impl Into<String>) -> Self {
        self.default_nexus_path = template.into();
        self
    }

    pub fn with_min_tick_interval(mut self, interval: Duration) -> Self {
        self.min_tick_interval = interval;
        self
    }

    pub fn with_flush_interval(mut self, interval: Duration) -> Self {
        self.flush_interval = interval;
        self
    }

    pub fn with_allowed_suffixes<I, T>(mut self, suffixes: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.allowed_suffixes = suffixes.into_iter().map(Into::into).collect();
        self
    }

    /// The default channel path for `info`.
    pub fn channel_root(&self, info: &ScanInfo) -> String {
        self.default_nexus_path
            .replace("{scanno}", &info.number.to_string())
            .replace("{serialno}", &info.serialno().to_string())
            .replace("{entryname}", &info.entryname())
    }

    /// True when `path` ends with one of the allowed suffixes.
    pub fn accepts(&self, path: &Path) -> bool {
        let name = path.to_string_lossy();
        self.allowed_suffixes.iter().any(|s| name.ends_with(s.as_str()))
    }

    /// True when a scan of `session` should be written.
    pub fn accepts_session(&self, session: &str) -> bool {
        self.session.is_empty() || self.session == session
    }
}

/// Durations as (fractional) seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let cfg = WriterConfig::default();
        assert_eq!(cfg.redis_url, "redis://localhost:6380");
        assert!(cfg.session.is_empty());
        assert_eq!(cfg.next_scan_timeout, Duration::from_secs(2));
        assert_eq!(cfg.min_tick_interval, Duration::from_millis(100));
        assert_eq!(cfg.allowed_suffixes.len(), 4);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let cfg: WriterConfig =
            serde_json::from_str(r#"{"session": "demo", "next_scan_timeout": 0.5}"#).unwrap();
        assert_eq!(cfg.session, "demo");
        assert_eq!(cfg.next_scan_timeout, Duration::from_millis(500));
        assert_eq!(cfg.flush_interval, Duration::from_secs(1));
    }

    #[test]
    fn negative_durations_are_rejected() {
        assert!(serde_json::from_str::<WriterConfig>(r#"{"flush_interval": -1}"#).is_err());
    }

    #[test]
    fn json_roundtrip() {
        let cfg = WriterConfig::default()
            .with_session("s")
            .with_min_tick_interval(Duration::from_millis(250))
            .with_allowed_suffixes([".h5"]);
        let json = serde_json::to_string(&cfg).unwrap();
        assert_eq!(serde_json::from_str::<WriterConfig>(&json).unwrap(), cfg);
    }

    #[test]
    fn from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"redis_url": "redis://beamline:6379"}}"#).unwrap();
        let cfg = WriterConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.redis_url, "redis://beamline:6379");
        assert!(WriterConfig::from_json_file("/nonexistent/writer.json").is_err());
    }

    #[test]
    fn channel_root_expands_placeholders() {
        let info = ScanInfo {
            number: 4,
            serialno: Some(40),
            ..ScanInfo::default()
        };
        let cfg = WriterConfig::default().with_default_nexus_path("/{entryname}:NXentry/s{scanno}/n{serialno}");
        assert_eq!(cfg.channel_root(&info), "/scan40:NXentry/s4/n40");
        assert_eq!(
            WriterConfig::default().channel_root(&info),
            "/scan40:NXentry/instrument:NXinstrument/collection"
        );
    }

    #[test]
    fn suffix_and_session_filters() {
        let cfg = WriterConfig::default();
        assert!(cfg.accepts(Path::new("/data/a.nxs")));
        assert!(cfg.accepts(Path::new("b.hdf5")));
        assert!(!cfg.accepts(Path::new("c.txt")));
        assert!(cfg.accepts_session("anything"));
        let cfg = cfg.with_session("demo");
        assert!(cfg.accepts_session("demo"));
        assert!(!cfg.accepts_session("other"));
    }
}
