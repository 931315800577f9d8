//! Endpoint configuration: built-in defaults, an optional TOML file, then
//! environment overrides, applied in that order.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ChatError;

pub const ENV_ANALYSIS_URL: &str = "DIWAN_ANALYSIS_URL";
pub const ENV_SIMULATION_URL: &str = "DIWAN_SIMULATION_URL";
pub const ENV_BATTLE_URL: &str = "DIWAN_BATTLE_URL";

/// Where the three remote services live.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Endpoints {
    /// REST endpoint taking `{ bait }` and returning the four-part analysis.
    pub analysis_url: String,
    /// Socket endpoint streaming a poem in a chosen poet's style.
    pub simulation_url: String,
    /// Socket endpoint streaming a two-poet battle with a judge.
    pub battle_url: String,
    /// Extra attempts for a failed analysis request. Sockets never retry.
    pub analysis_retries: u32,
    /// First backoff delay; doubles after each failed attempt.
    pub retry_base_delay_ms: u64,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            analysis_url: "http://localhost:8000/analysis".to_string(),
            simulation_url: "ws://localhost:8000/wss/generate".to_string(),
            battle_url: "ws://localhost:8000/wss/battle".to_string(),
            analysis_retries: 0,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Endpoints {
    /// Parse a TOML document. Missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ChatError> {
        toml::from_str(source).map_err(|e| ChatError::Config(e.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ChatError> {
        let source = std::fs::read_to_string(path)
            .map_err(|e| ChatError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }

    /// Defaults, then `path` if given, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ChatError> {
        let base = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        Ok(base.with_env(|key| std::env::var(key).ok()))
    }

    /// Apply URL overrides from `lookup`. Blank values are ignored.
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let pick = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = pick(ENV_ANALYSIS_URL) {
            self.analysis_url = v;
        }
        if let Some(v) = pick(ENV_SIMULATION_URL) {
            self.simulation_url = v;
        }
        if let Some(v) = pick(ENV_BATTLE_URL) {
            self.battle_url = v;
        }
        self
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_point_at_local_services() {
        let e = Endpoints::default();
        assert!(e.analysis_url.starts_with("http://"));
        assert!(e.simulation_url.ends_with("/wss/generate"));
        assert!(e.battle_url.ends_with("/wss/battle"));
        assert_eq!(e.analysis_retries, 0);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let e = Endpoints::from_toml_str("battle_url = \"ws://duel.example/wss/battle\"\n")
            .expect("parse");
        assert_eq!(e.battle_url, "ws://duel.example/wss/battle");
        assert_eq!(e.analysis_url, Endpoints::default().analysis_url);
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = Endpoints::from_toml_str("analysis_retries = \"many\"").unwrap_err();
        assert!(matches!(err, ChatError::Config(_)));
    }

    #[test]
    fn test_env_overrides_and_skips_blank() {
        let vars: HashMap<&str, &str> = [
            (ENV_ANALYSIS_URL, "http://critic.example/analysis"),
            (ENV_BATTLE_URL, "   "),
        ]
        .into_iter()
        .collect();
        let e = Endpoints::default().with_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(e.analysis_url, "http://critic.example/analysis");
        assert_eq!(e.battle_url, Endpoints::default().battle_url);
    }

    #[test]
    fn test_from_file_reads_toml() {
        let mut file = tempfile::NamedTempFile::new().expect("tempfile");
        writeln!(
            file,
            "analysis_url = \"http://critic.example/analysis\"\nanalysis_retries = 3"
        )
        .expect("write");
        let e = Endpoints::from_file(file.path()).expect("load");
        assert_eq!(e.analysis_url, "http://critic.example/analysis");
        assert_eq!(e.analysis_retries, 3);
        assert_eq!(e.simulation_url, Endpoints::default().simulation_url);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = Endpoints::from_file(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ChatError::Config(ref m) if m.contains("absent.toml")));
    }

    #[test]
    fn test_retry_base_delay() {
        let e = Endpoints { retry_base_delay_ms: 250, ..Endpoints::default() };
        assert_eq!(e.retry_base_delay(), Duration::from_millis(250));
    }
}
