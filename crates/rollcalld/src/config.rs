use rollcall_core::{DistanceMetric, DuplicatePolicy, MatchConfig, DEFAULT_THRESHOLD};
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Enrollment cap per student when `ROLLCALL_MAX_ENCODINGS_PER_STUDENT` is unset.
pub const DEFAULT_MAX_ENCODINGS_PER_STUDENT: usize = 10;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
    #[error("reading roster {path}: {source}")]
    RosterRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("parsing roster {path}: {source}")]
    RosterParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// How the daemon assigns a session id when the request carries none.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SessionScope {
    /// Fresh id per request; repeated captures re-mark the student.
    #[default]
    Batch,
    /// UTC calendar date; the store then allows one mark per student per day.
    Day,
}

impl SessionScope {
    pub fn new_session_id(&self) -> String {
        match self {
            SessionScope::Batch => uuid::Uuid::new_v4().to_string(),
            SessionScope::Day => chrono::Utc::now().format("%Y-%m-%d").to_string(),
        }
    }
}

impl fmt::Display for SessionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionScope::Batch => f.write_str("batch"),
            SessionScope::Day => f.write_str("day"),
        }
    }
}

impl FromStr for SessionScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(SessionScope::Batch),
            "day" => Ok(SessionScope::Day),
            other => Err(format!("unknown session scope: {other}")),
        }
    }
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Listen address (default: 127.0.0.1:8080).
    pub bind: SocketAddr,
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Distance metric, threshold and duplicate policy for matching.
    pub matching: MatchConfig,
    /// Session id assignment for requests without one.
    pub session_scope: SessionScope,
    /// Optional teacher roster (TOML).
    pub roster_path: Option<PathBuf>,
    /// Enrollment cap per student, placeholders included.
    pub max_encodings_per_student: usize,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let bind = parse_or(&get, "ROLLCALL_BIND", SocketAddr::from(([127, 0, 0, 1], 8080)))?;

        let db_path = get("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_store::default_db_path);

        let threshold: f32 = parse_or(&get, "ROLLCALL_MATCH_THRESHOLD", DEFAULT_THRESHOLD)?;
        if !(threshold.is_finite() && threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "ROLLCALL_MATCH_THRESHOLD",
                reason: format!("must be a positive number, got {threshold}"),
            });
        }

        let max_encodings_per_student: usize = parse_or(
            &get,
            "ROLLCALL_MAX_ENCODINGS_PER_STUDENT",
            DEFAULT_MAX_ENCODINGS_PER_STUDENT,
        )?;
        if max_encodings_per_student == 0 {
            return Err(ConfigError::Invalid {
                key: "ROLLCALL_MAX_ENCODINGS_PER_STUDENT",
                reason: "must be at least 1".into(),
            });
        }

        let matching = MatchConfig {
            metric: parse_or(&get, "ROLLCALL_DISTANCE_METRIC", DistanceMetric::Euclidean)?,
            threshold,
            duplicate_policy: parse_or(&get, "ROLLCALL_DUPLICATE_POLICY", DuplicatePolicy::Batch)?,
        };

        Ok(Self {
            bind,
            db_path,
            matching,
            session_scope: parse_or(&get, "ROLLCALL_SESSION_SCOPE", SessionScope::Batch)?,
            roster_path: get("ROLLCALL_ROSTER_PATH").map(PathBuf::from),
            max_encodings_per_student,
        })
    }
}

fn parse_or<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match get(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load(&[("ROLLCALL_DB_PATH", "/tmp/rc.db")]).unwrap();
        assert_eq!(cfg.bind.port(), 8080);
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/rc.db"));
        assert_eq!(cfg.matching.threshold, 0.6);
        assert_eq!(cfg.matching.metric, DistanceMetric::Euclidean);
        assert_eq!(cfg.matching.duplicate_policy, DuplicatePolicy::Batch);
        assert_eq!(cfg.session_scope, SessionScope::Batch);
        assert!(cfg.roster_path.is_none());
        assert_eq!(cfg.max_encodings_per_student, 10);
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            ("ROLLCALL_BIND", "0.0.0.0:9000"),
            ("ROLLCALL_DB_PATH", "/tmp/rc.db"),
            ("ROLLCALL_MATCH_THRESHOLD", "0.45"),
            ("ROLLCALL_DISTANCE_METRIC", "cosine"),
            ("ROLLCALL_DUPLICATE_POLICY", "store"),
            ("ROLLCALL_SESSION_SCOPE", "day"),
            ("ROLLCALL_ROSTER_PATH", "/etc/rollcall/roster.toml"),
            ("ROLLCALL_MAX_ENCODINGS_PER_STUDENT", "3"),
        ])
        .unwrap();
        assert_eq!(cfg.bind.port(), 9000);
        assert_eq!(cfg.matching.threshold, 0.45);
        assert_eq!(cfg.matching.metric, DistanceMetric::Cosine);
        assert_eq!(cfg.matching.duplicate_policy, DuplicatePolicy::Store);
        assert_eq!(cfg.session_scope, SessionScope::Day);
        assert!(cfg.roster_path.is_some());
        assert_eq!(cfg.max_encodings_per_student, 3);
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(load(&[("ROLLCALL_MATCH_THRESHOLD", "abc")]).is_err());
        assert!(load(&[("ROLLCALL_MATCH_THRESHOLD", "-1")]).is_err());
        assert!(load(&[("ROLLCALL_DISTANCE_METRIC", "hamming")]).is_err());
        assert!(load(&[("ROLLCALL_BIND", "nowhere")]).is_err());
        assert!(load(&[("ROLLCALL_MAX_ENCODINGS_PER_STUDENT", "0")]).is_err());
        assert!(load(&[("ROLLCALL_MAX_ENCODINGS_PER_STUDENT", "-2")]).is_err());
    }

    #[test]
    fn test_day_scope_session_id() {
        let id = SessionScope::Day.new_session_id();
        assert_eq!(id.len(), 10);
        assert_ne!(SessionScope::Batch.new_session_id(), SessionScope::Batch.new_session_id());
    }
}
