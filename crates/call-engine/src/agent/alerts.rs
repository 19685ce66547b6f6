//! Derived agent alerts
//!
//! Alerts are never stored as events. Each recomputation pass derives the full list
//! for an agent from its current state markers and replaces whatever was there.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::AgentRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    LongAfterCallWork,
    LongBreak,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAlert {
    pub kind: AlertKind,
    pub severity: AlertSeverity,
    pub message: String,
    pub since: DateTime<Utc>,
}

/// Limits past which an agent raises an alert
#[derive(Debug, Clone, Copy)]
pub struct AlertThresholds {
    pub acw_warning: Duration,
    pub break_critical: Duration,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            acw_warning: Duration::minutes(5),
            break_critical: Duration::minutes(10),
        }
    }
}

/// Compute the alert list for one agent at `now`
pub fn compute_alerts(
    agent: &AgentRecord,
    now: DateTime<Utc>,
    thresholds: &AlertThresholds,
) -> Vec<AgentAlert> {
    let mut alerts = Vec::new();

    if let Some(since) = agent.acw_started_at {
        let elapsed = now - since;
        if elapsed > thresholds.acw_warning {
            alerts.push(AgentAlert {
                kind: AlertKind::LongAfterCallWork,
                severity: AlertSeverity::Warning,
                message: format!(
                    "{} in after-call work for {}s",
                    agent.agent_id,
                    elapsed.num_seconds()
                ),
                since,
            });
        }
    }

    if let Some(since) = agent.break_started_at {
        let elapsed = now - since;
        if elapsed > thresholds.break_critical {
            alerts.push(AgentAlert {
                kind: AlertKind::LongBreak,
                severity: AlertSeverity::Critical,
                message: format!("{} on break for {}s", agent.agent_id, elapsed.num_seconds()),
                since,
            });
        }
    }

    alerts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{AgentProfile, AgentState};

    fn agent() -> AgentRecord {
        AgentRecord::offline(
            AgentProfile {
                agent_id: "a1".into(),
                department: "support".into(),
                location: "denver".into(),
                team: String::new(),
            },
            Utc::now(),
            0,
        )
    }

    #[test]
    fn test_acw_warning_after_five_minutes() {
        let start = Utc::now();
        let mut record = agent();
        record.transition(AgentState::AfterCallWork, start);
        let thresholds = AlertThresholds::default();

        assert!(compute_alerts(&record, start + Duration::minutes(5), &thresholds).is_empty());

        let alerts = compute_alerts(&record, start + Duration::seconds(301), &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::LongAfterCallWork);
        assert_eq!(alerts[0].severity, AlertSeverity::Warning);
    }

    #[test]
    fn test_break_critical_after_ten_minutes() {
        let start = Utc::now();
        let mut record = agent();
        record.transition(AgentState::Break, start);
        let thresholds = AlertThresholds::default();

        let alerts = compute_alerts(&record, start + Duration::minutes(11), &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Critical);

        // Leaving break clears the marker, so the next pass yields nothing
        record.transition(AgentState::Available, start + Duration::minutes(11));
        assert!(compute_alerts(&record, start + Duration::minutes(12), &thresholds).is_empty());
    }
}
