//! # Call Routing
//!
//! The routing loop matches waiting calls with available agents of the queue's
//! department. It runs on a short ticker and is also woken whenever a call is
//! enqueued or an agent becomes available.
//!
//! ```text
//!   ticker ─┐
//!   notify ─┴─► run_pass ──► for each non-empty queue:
//!                              claim_longest_idle(department)
//!                                ├─ agent store write lock
//!                                │    └─ queue lock: pop head, flip Active
//!                                └─ agent flipped to OnCall
//!                              send call_assign
//!                                └─ undeliverable ─► rollback_assignment
//!                                                     (agent Stale, call to head)
//! ```
//!
//! The pick-and-flip never splits into two independently locked steps, so two
//! queues cannot both claim the same agent. Agent selection is longest-idle
//! first (earliest `state_since`), ties broken by agent id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::AgentStateStore;
use crate::hub::AgentConnectionHub;
use crate::protocol::OutboundMessage;
use crate::queue::CallQueueManager;

/// One call handed to one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub agent_id: String,
    pub call_id: String,
    pub queue: String,
}

/// What a routing pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingPassReport {
    pub assigned: Vec<Assignment>,
    /// Assignments rolled back because the directive could not be delivered
    pub requeued: Vec<Assignment>,
}

impl RoutingPassReport {
    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty() && self.requeued.is_empty()
    }
}

pub struct RoutingLoop {
    agents: Arc<AgentStateStore>,
    queues: Arc<CallQueueManager>,
    hub: Arc<AgentConnectionHub>,
    trigger: Arc<Notify>,
    interval: Duration,
    total_assigned: AtomicU64,
    total_requeued: AtomicU64,
}

impl RoutingLoop {
    pub fn new(
        agents: Arc<AgentStateStore>,
        queues: Arc<CallQueueManager>,
        hub: Arc<AgentConnectionHub>,
        trigger: Arc<Notify>,
        interval: Duration,
    ) -> Self {
        Self {
            agents,
            queues,
            hub,
            trigger,
            interval,
            total_assigned: AtomicU64::new(0),
            total_requeued: AtomicU64::new(0),
        }
    }

    /// Drain every queue until it runs out of calls or routable agents
    pub fn run_pass(&self, now: DateTime<Utc>) -> RoutingPassReport {
        let mut report = RoutingPassReport::default();
        for (queue, department) in self.queues.non_empty_queues() {
            loop {
                let queues = &self.queues;
                let claim = self.agents.claim_longest_idle(&department, now, |agent_id| {
                    queues.assign_call(&queue, agent_id, now)
                });
                let Some((agent, call)) = claim else {
                    break;
                };

                let assignment = Assignment {
                    agent_id: agent.agent_id.clone(),
                    call_id: call.call_id.clone(),
                    queue: queue.clone(),
                };
                let directive = OutboundMessage::call_assign(&agent.agent_id, &call.call_id, &queue, now);
                if self.hub.send_to_agent(&agent.agent_id, &directive) {
                    info!(
                        agent_id = %agent.agent_id,
                        call_id = %call.call_id,
                        queue = %queue,
                        wait = call.wait_secs,
                        "Call assigned"
                    );
                    report.assigned.push(assignment);
                    continue;
                }

                let requeue = self
                    .agents
                    .rollback_assignment(&agent.agent_id, &call.call_id, now, || {
                        self.queues.requeue_front(&call.call_id)
                    });
                match requeue {
                    Ok(_) => warn!(
                        agent_id = %agent.agent_id,
                        call_id = %call.call_id,
                        "Assignment undeliverable; call back at head of queue, agent marked stale"
                    ),
                    Err(err) => debug!(call_id = %call.call_id, error = %err, "Call finished before rollback"),
                }
                report.requeued.push(assignment);
            }
        }

        self.total_assigned
            .fetch_add(report.assigned.len() as u64, Ordering::Relaxed);
        self.total_requeued
            .fetch_add(report.requeued.len() as u64, Ordering::Relaxed);
        report
    }

    pub fn total_assigned(&self) -> u64 {
        self.total_assigned.load(Ordering::Relaxed)
    }

    pub fn total_requeued(&self) -> u64 {
        self.total_requeued.load(Ordering::Relaxed)
    }

    /// Wake the loop ahead of its next tick
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    /// Run passes on every tick or trigger until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Routing loop started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
            }
            let report = self.run_pass(Utc::now());
            if !report.is_empty() {
                debug!(assigned = report.assigned.len(), requeued = report.requeued.len(), "Routing pass");
            }
        }
        debug!("Routing loop stopped");
    }
}
