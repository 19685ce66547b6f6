//! Configuration for the call center engine
//!
//! Every section has a `Default`, so an empty (or absent) TOML file yields a
//! runnable engine. Values load in three layers: defaults, then the optional TOML
//! file, then `CALLPULSE_*` environment overrides.
//!
//! ```toml
//! [server]
//! bind_addr = "0.0.0.0:8080"
//!
//! [agents]
//! stale_after_secs = 6
//! retention_secs = 30
//!
//! [[queues]]
//! name = "sales_inbound"
//! department = "sales"
//! service_level_target_pct = 80.0
//! service_level_threshold_secs = 20
//! max_wait_secs = 600
//!
//! [[roster]]
//! agent_id = "agent-001"
//! department = "sales"
//! location = "austin"
//! ```

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::{AgentProfile, AgentStoreSettings, AlertThresholds};
use crate::error::{CallCenterError, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CallCenterConfig {
    pub server: ServerConfig,
    pub agents: AgentConfig,
    pub routing: RoutingConfig,
    pub hubs: HubConfig,
    pub aggregator: AggregatorConfig,
    pub queues: Vec<QueueConfig>,
    pub roster: Vec<RosterEntry>,
    pub storage: StorageConfig,
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

/// Agent liveness and alerting thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Silence after which a connected agent is marked stale
    pub stale_after_secs: u64,
    /// Silence after which a stale or disconnected agent is evicted
    pub retention_secs: u64,
    /// Period of the stale check / eviction / alert sweep
    pub sweep_interval_ms: u64,
    pub acw_warning_secs: u64,
    pub break_critical_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 6,
            retention_secs: 30,
            sweep_interval_ms: 1_000,
            acw_warning_secs: 300,
            break_critical_secs: 600,
        }
    }
}

impl AgentConfig {
    pub fn store_settings(&self) -> AgentStoreSettings {
        AgentStoreSettings {
            stale_after: chrono::Duration::seconds(self.stale_after_secs as i64),
            retention: chrono::Duration::seconds(self.retention_secs as i64),
            alerts: AlertThresholds {
                acw_warning: chrono::Duration::seconds(self.acw_warning_secs as i64),
                break_critical: chrono::Duration::seconds(self.break_critical_secs as i64),
            },
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    pub interval_ms: u64,
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self { interval_ms: 250 }
    }
}

impl RoutingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Outbound buffering for both connection hubs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub agent_buffer: usize,
    pub dashboard_buffer: usize,
    pub write_timeout_ms: u64,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            agent_buffer: 64,
            dashboard_buffer: 32,
            write_timeout_ms: 2_000,
        }
    }
}

impl HubConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub interval_ms: u64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

impl AggregatorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// One virtual queue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub department: String,
    #[serde(default = "default_sl_target")]
    pub service_level_target_pct: f64,
    #[serde(default = "default_sl_threshold")]
    pub service_level_threshold_secs: u64,
    /// Waiting calls older than this are abandoned; zero disables abandonment
    #[serde(default = "default_max_wait")]
    pub max_wait_secs: u64,
}

fn default_sl_target() -> f64 {
    80.0
}

fn default_sl_threshold() -> u64 {
    20
}

fn default_max_wait() -> u64 {
    600
}

impl QueueConfig {
    pub fn new(name: impl Into<String>, department: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            department: department.into(),
            service_level_target_pct: default_sl_target(),
            service_level_threshold_secs: default_sl_threshold(),
            max_wait_secs: default_max_wait(),
        }
    }
}

/// Roster placeholder registered offline at startup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub agent_id: String,
    pub department: String,
    pub location: String,
    #[serde(default)]
    pub team: String,
}

impl From<RosterEntry> for AgentProfile {
    fn from(entry: RosterEntry) -> Self {
        AgentProfile {
            agent_id: entry.agent_id,
            department: entry.department,
            location: entry.location,
            team: entry.team,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite URL such as `sqlite://callpulse.db?mode=rwc`; in-memory store when absent
    pub database_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl CallCenterConfig {
    /// Default queues used when the configuration names none
    pub fn default_queues() -> Vec<QueueConfig> {
        vec![
            QueueConfig::new("sales_inbound", "sales"),
            QueueConfig::new("support_inbound", "support"),
            QueueConfig::new("billing_inbound", "billing"),
            QueueConfig::new("technical_inbound", "technical"),
        ]
    }

    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| CallCenterError::config(format!("invalid TOML: {e}")))
    }

    /// Load from an optional file, then apply environment overrides and validate
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|e| {
                    CallCenterError::config(format!("cannot read {}: {e}", path.display()))
                })?;
                Self::from_toml_str(&raw)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.finalize()?;
        Ok(config)
    }

    /// Apply `CALLPULSE_*` overrides from `lookup`
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("CALLPULSE_BIND_ADDR") {
            self.server.bind_addr = addr
                .parse()
                .map_err(|e| CallCenterError::config(format!("CALLPULSE_BIND_ADDR: {e}")))?;
        }
        if let Some(url) = lookup("CALLPULSE_DATABASE_URL") {
            self.storage.database_url = (!url.is_empty()).then_some(url);
        }
        if let Some(level) = lookup("CALLPULSE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("CALLPULSE_LOG_JSON") {
            self.logging.json = matches!(json.as_str(), "1" | "true" | "yes");
        }
        Ok(())
    }

    /// Fill in default queues and validate
    pub fn finalize(&mut self) -> Result<()> {
        if self.queues.is_empty() {
            self.queues = Self::default_queues();
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<()> {
        if self.agents.stale_after_secs == 0 {
            return Err(CallCenterError::config("agents.stale_after_secs must be positive"));
        }
        if self.agents.retention_secs < self.agents.stale_after_secs {
            return Err(CallCenterError::config(
                "agents.retention_secs must not be shorter than agents.stale_after_secs",
            ));
        }
        if self.agents.sweep_interval_ms == 0 || self.routing.interval_ms == 0 || self.aggregator.interval_ms == 0 {
            return Err(CallCenterError::config("tick intervals must be positive"));
        }
        if self.hubs.agent_buffer == 0 || self.hubs.dashboard_buffer == 0 {
            return Err(CallCenterError::config("hub buffers must hold at least one message"));
        }

        let mut names = std::collections::HashSet::new();
        for queue in &self.queues {
            if queue.name.trim().is_empty() || queue.department.trim().is_empty() {
                return Err(CallCenterError::config("queues need a name and a department"));
            }
            if !names.insert(queue.name.as_str()) {
                return Err(CallCenterError::config(format!("duplicate queue {}", queue.name)));
            }
            if !(0.0..=100.0).contains(&queue.service_level_target_pct) {
                return Err(CallCenterError::config(format!(
                    "queue {} service level target must be within 0..=100",
                    queue.name
                )));
            }
        }

        let mut agents = std::collections::HashSet::new();
        for entry in &self.roster {
            if entry.agent_id.trim().is_empty() {
                return Err(CallCenterError::config("roster entries need an agent_id"));
            }
            if !agents.insert(entry.agent_id.as_str()) {
                return Err(CallCenterError::config(format!("duplicate roster agent {}", entry.agent_id)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let mut config = CallCenterConfig::from_toml_str("").unwrap();
        config.finalize().unwrap();
        assert_eq!(config.agents.stale_after_secs, 6);
        assert_eq!(config.agents.retention_secs, 30);
        assert_eq!(config.aggregator.interval_ms, 1_000);
        assert_eq!(config.queues.len(), 4);
        assert!(config.queues.iter().any(|q| q.name == "sales_inbound" && q.department == "sales"));
    }

    #[test]
    fn test_parse_queues_and_roster() {
        let raw = r#"
            [server]
            bind_addr = "0.0.0.0:9000"

            [[queues]]
            name = "vip_inbound"
            department = "vip"
            service_level_threshold_secs = 10

            [[roster]]
            agent_id = "agent-001"
            department = "vip"
            location = "austin"
        "#;
        let mut config = CallCenterConfig::from_toml_str(raw).unwrap();
        config.finalize().unwrap();
        assert_eq!(config.server.bind_addr.port(), 9000);
        assert_eq!(config.queues.len(), 1);
        assert_eq!(config.queues[0].service_level_threshold_secs, 10);
        assert_eq!(config.queues[0].service_level_target_pct, 80.0);
        assert_eq!(config.roster[0].team, "");
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CallCenterConfig::default();
        config
            .apply_env_overrides(|key| match key {
                "CALLPULSE_BIND_ADDR" => Some("127.0.0.1:7000".to_string()),
                "CALLPULSE_DATABASE_URL" => Some("sqlite::memory:".to_string()),
                "CALLPULSE_LOG_JSON" => Some("true".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.server.bind_addr.port(), 7000);
        assert_eq!(config.storage.database_url.as_deref(), Some("sqlite::memory:"));
        assert!(config.logging.json);
    }

    #[test]
    fn test_bad_bind_addr_rejected() {
        let mut config = CallCenterConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "CALLPULSE_BIND_ADDR").then(|| "nope".to_string()))
            .unwrap_err();
        assert!(matches!(err, CallCenterError::Configuration(_)));
    }

    #[test]
    fn test_validation_rejects_duplicates() {
        let mut config = CallCenterConfig::default();
        config.queues = vec![QueueConfig::new("q", "d"), QueueConfig::new("q", "d")];
        assert!(config.validate().is_err());

        let mut config = CallCenterConfig::default();
        config.agents.retention_secs = 1;
        assert!(config.finalize().is_err());
    }
}
