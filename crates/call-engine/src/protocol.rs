//! Agent wire protocol
//!
//! Every frame on an agent socket is a JSON object discriminated by `type`.
//! Inbound frames decode into [`InboundMessage`]; directives pushed to agents are
//! [`OutboundMessage`]. Field names are camelCase, agent states snake_case and
//! durations are in seconds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::agent::{AgentProfile, AgentState, KpiBundle};

/// Inbound discriminants this engine understands
pub const INBOUND_KINDS: [&str; 4] = ["register", "heartbeat", "state_change", "call_complete"];

/// Why an inbound frame was not applied
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("unknown message type '{0}'")]
    UnknownKind(String),

    #[error("unknown agent '{0}'")]
    UnknownAgent(String),

    #[error("payload for agent '{actual}' on connection bound to '{expected}'")]
    AgentMismatch { expected: String, actual: String },

    #[error("rejected: {0}")]
    Rejected(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterPayload {
    pub agent_id: String,
    pub department: String,
    pub location: String,
    #[serde(default)]
    pub team: String,
    #[serde(default = "default_register_state")]
    pub state: AgentState,
    #[serde(default)]
    pub kpis: Option<KpiBundle>,
}

fn default_register_state() -> AgentState {
    AgentState::Available
}

impl RegisterPayload {
    pub fn profile(&self) -> AgentProfile {
        AgentProfile {
            agent_id: self.agent_id.clone(),
            department: self.department.clone(),
            location: self.location.clone(),
            team: self.team.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatPayload {
    pub agent_id: String,
    #[serde(default)]
    pub state: Option<AgentState>,
    #[serde(default)]
    pub kpis: Option<KpiBundle>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangePayload {
    pub agent_id: String,
    #[serde(default)]
    pub previous_state: Option<AgentState>,
    pub new_state: AgentState,
    /// Seconds spent in the previous state
    #[serde(default)]
    pub duration: f64,
    #[serde(default)]
    pub kpis: Option<KpiBundle>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub team: Option<String>,
}

impl StateChangePayload {
    pub fn duration_secs(&self) -> u64 {
        whole_secs(self.duration)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallCompletePayload {
    pub agent_id: String,
    pub call_id: String,
    #[serde(default)]
    pub talk_time: f64,
    #[serde(default)]
    pub hold_time: f64,
}

impl CallCompletePayload {
    pub fn talk_secs(&self) -> u64 {
        whole_secs(self.talk_time)
    }

    pub fn hold_secs(&self) -> u64 {
        whole_secs(self.hold_time)
    }
}

fn whole_secs(value: f64) -> u64 {
    if value.is_finite() && value > 0.0 {
        value.round() as u64
    } else {
        0
    }
}

/// Messages an agent sends to the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    Register(RegisterPayload),
    Heartbeat(HeartbeatPayload),
    StateChange(StateChangePayload),
    CallComplete(CallCompletePayload),
}

impl InboundMessage {
    pub fn agent_id(&self) -> &str {
        match self {
            InboundMessage::Register(p) => &p.agent_id,
            InboundMessage::Heartbeat(p) => &p.agent_id,
            InboundMessage::StateChange(p) => &p.agent_id,
            InboundMessage::CallComplete(p) => &p.agent_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            InboundMessage::Register(_) => "register",
            InboundMessage::Heartbeat(_) => "heartbeat",
            InboundMessage::StateChange(_) => "state_change",
            InboundMessage::CallComplete(_) => "call_complete",
        }
    }

    /// Decode one text frame
    ///
    /// Unknown discriminants are reported separately from malformed bodies so the
    /// caller can count and ignore them.
    pub fn decode(raw: &str) -> Result<Self, IngestError> {
        let value: Value =
            serde_json::from_str(raw).map_err(|e| IngestError::Malformed(e.to_string()))?;
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| IngestError::Malformed("missing 'type' field".to_string()))?;
        if !INBOUND_KINDS.contains(&kind) {
            return Err(IngestError::UnknownKind(kind.to_string()));
        }
        serde_json::from_value(value).map_err(|e| IngestError::Malformed(e.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallAssignDirective {
    pub agent_id: String,
    pub call_id: String,
    pub queue: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceEndDirective {
    pub call_id: String,
    pub agent_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForceDisconnectDirective {
    pub agent_id: String,
}

/// Directives the engine pushes to an agent
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    CallAssign(CallAssignDirective),
    ForceEndCall(ForceEndDirective),
    ForceDisconnect(ForceDisconnectDirective),
}

impl OutboundMessage {
    pub fn call_assign(agent_id: &str, call_id: &str, queue: &str, timestamp: DateTime<Utc>) -> Self {
        OutboundMessage::CallAssign(CallAssignDirective {
            agent_id: agent_id.to_string(),
            call_id: call_id.to_string(),
            queue: queue.to_string(),
            timestamp,
        })
    }

    pub fn force_end_call(call_id: &str, agent_id: &str) -> Self {
        OutboundMessage::ForceEndCall(ForceEndDirective {
            call_id: call_id.to_string(),
            agent_id: agent_id.to_string(),
        })
    }

    pub fn force_disconnect(agent_id: &str) -> Self {
        OutboundMessage::ForceDisconnect(ForceDisconnectDirective {
            agent_id: agent_id.to_string(),
        })
    }

    pub fn agent_id(&self) -> &str {
        match self {
            OutboundMessage::CallAssign(d) => &d.agent_id,
            OutboundMessage::ForceEndCall(d) => &d.agent_id,
            OutboundMessage::ForceDisconnect(d) => &d.agent_id,
        }
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_register_defaults() {
        let raw = r#"{"type":"register","agentId":"a1","department":"sales","location":"austin"}"#;
        let msg = InboundMessage::decode(raw).unwrap();
        match msg {
            InboundMessage::Register(p) => {
                assert_eq!(p.agent_id, "a1");
                assert_eq!(p.state, AgentState::Available);
                assert_eq!(p.team, "");
                assert!(p.kpis.is_none());
            }
            other => panic!("unexpected message {other:?}"),
        }
    }

    #[test]
    fn test_decode_state_change() {
        let raw = r#"{"type":"state_change","agentId":"a1","previousState":"on_call",
            "newState":"after_call_work","duration":184.6,"location":"denver"}"#;
        let msg = InboundMessage::decode(raw).unwrap();
        let InboundMessage::StateChange(p) = msg else {
            panic!("expected state_change");
        };
        assert_eq!(p.new_state, AgentState::AfterCallWork);
        assert_eq!(p.previous_state, Some(AgentState::OnCall));
        assert_eq!(p.duration_secs(), 185);
        assert_eq!(p.location.as_deref(), Some("denver"));
    }

    #[test]
    fn test_decode_call_complete_integer_times() {
        let raw = r#"{"type":"call_complete","agentId":"a1","callId":"c9","talkTime":120,"holdTime":15}"#;
        let InboundMessage::CallComplete(p) = InboundMessage::decode(raw).unwrap() else {
            panic!("expected call_complete");
        };
        assert_eq!(p.talk_secs(), 120);
        assert_eq!(p.hold_secs(), 15);
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(
            InboundMessage::decode("not json"),
            Err(IngestError::Malformed(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"agentId":"a1"}"#),
            Err(IngestError::Malformed(_))
        ));
        assert_eq!(
            InboundMessage::decode(r#"{"type":"typing","agentId":"a1"}"#),
            Err(IngestError::UnknownKind("typing".to_string()))
        );
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"heartbeat"}"#),
            Err(IngestError::Malformed(_))
        ));
        assert!(matches!(
            InboundMessage::decode(r#"{"type":"state_change","agentId":"a1","newState":"napping"}"#),
            Err(IngestError::Malformed(_))
        ));
    }

    #[test]
    fn test_outbound_wire_shape() {
        let json = OutboundMessage::force_end_call("c1", "a1").encode().unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "force_end_call");
        assert_eq!(value["callId"], "c1");
        assert_eq!(value["agentId"], "a1");

        let json = OutboundMessage::force_disconnect("a2").encode().unwrap();
        assert_eq!(json, r#"{"type":"force_disconnect","agentId":"a2"}"#);
    }
}
