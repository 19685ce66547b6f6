//! Many routing passes racing each other never double-book an agent or a call

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;

use callpulse_engine::hub::{ChannelSink, ConnectionMode};
use callpulse_engine::storage::MemoryCallStore;
use callpulse_engine::{AgentState, CallCenterConfig, CallCenterEngine, CallStatus};
use chrono::Utc;

const AGENTS: usize = 24;
const CALLS: usize = 120;
const ROUTERS: usize = 8;

#[test]
fn concurrent_routing_never_double_books() {
    let engine = Arc::new(CallCenterEngine::new(CallCenterConfig::default(), Arc::new(MemoryCallStore::new())).unwrap());
    let now = Utc::now();

    let mut receivers = Vec::new();
    for i in 0..AGENTS {
        let id = format!("agent-{i}");
        let department = if i % 2 == 0 { "sales" } else { "support" };
        let (sink, rx) = ChannelSink::channel(16);
        receivers.push(rx);
        let connection = engine.agent_hub().attach(ConnectionMode::Dedicated(id.clone()), sink);
        let frame = format!(
            r#"{{"type":"register","agentId":"{id}","department":"{department}","location":"austin"}}"#
        );
        engine.agent_hub().handle_inbound(connection, &frame, now).unwrap();
    }

    let call_ids: Vec<String> = (0..CALLS).map(|i| format!("call-{i}")).collect();
    thread::scope(|scope| {
        let engine = &engine;
        let calls = &call_ids;
        scope.spawn(move || {
            for (i, call_id) in calls.iter().enumerate() {
                let queue = if i % 2 == 0 { "sales_inbound" } else { "support_inbound" };
                engine.enqueue_call(queue, Some(call_id.clone())).unwrap();
            }
        });
        for _ in 0..ROUTERS {
            scope.spawn(move || {
                for _ in 0..200 {
                    engine.router().run_pass(Utc::now());
                    thread::yield_now();
                }
            });
        }
    });
    // Settle whatever arrived after the last racing pass
    engine.router().run_pass(Utc::now());

    let mut busy_agents = HashSet::new();
    let mut active = 0;
    for call_id in &call_ids {
        let call = engine.queues().find_call(call_id).unwrap();
        if call.status != CallStatus::Active {
            assert_eq!(call.status, CallStatus::Waiting);
            continue;
        }
        active += 1;
        let agent_id = call.assigned_agent.clone().unwrap();
        assert!(busy_agents.insert(agent_id.clone()), "{agent_id} holds two calls");
        let agent = engine.agents().get(&agent_id).unwrap();
        assert_eq!(agent.state, AgentState::OnCall);
        assert_eq!(agent.current_call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(agent.department, call.department);
    }

    assert_eq!(active, AGENTS);
    assert_eq!(engine.router().total_assigned() as usize, AGENTS);
    assert_eq!(engine.queues().total_active(), AGENTS);
    assert_eq!(engine.queues().total_waiting(), CALLS - AGENTS);
    for agent in engine.agents().list() {
        assert_eq!(agent.current_call_id.is_some(), agent.state.is_call_occupying());
    }
}
