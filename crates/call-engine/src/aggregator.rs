//! Snapshot aggregator
//!
//! Once per interval, reads the roster and every queue and broadcasts one global
//! widget plus one widget per department. Ticks fire whether or not anything
//! changed; an empty system still yields a zero-count global widget.

use std::borrow::Cow;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::agent::{AgentRecord, AgentState, AgentStateStore, ConnectionStatus};
use crate::hub::DashboardBroadcastHub;
use crate::identity::Identity;
use crate::queue::{CallQueueManager, QueueSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WidgetKind {
    GlobalWidget,
    DepartmentWidget,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WidgetSummary {
    pub total_agents: usize,
    pub connected_agents: usize,
    pub alerting_agents: usize,
    /// Every state, zero included
    pub state_breakdown: BTreeMap<AgentState, usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department_breakdown: Option<BTreeMap<String, usize>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_breakdown: Option<BTreeMap<String, usize>>,
    pub waiting_calls: usize,
    pub active_calls: usize,
}

/// One broadcast frame
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Widget {
    #[serde(rename = "type")]
    pub kind: WidgetKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub summary: WidgetSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queues: Option<Vec<QueueSnapshot>>,
}

fn state_breakdown<'a>(agents: impl Iterator<Item = &'a AgentRecord>) -> BTreeMap<AgentState, usize> {
    let mut breakdown: BTreeMap<AgentState, usize> = AgentState::ALL.iter().map(|s| (*s, 0)).collect();
    for agent in agents {
        *breakdown.entry(agent.state).or_insert(0) += 1;
    }
    breakdown
}

fn location_breakdown<'a>(agents: impl Iterator<Item = &'a AgentRecord>) -> BTreeMap<String, usize> {
    let mut breakdown = BTreeMap::new();
    for agent in agents {
        *breakdown.entry(agent.location.clone()).or_insert(0) += 1;
    }
    breakdown
}

fn agent_summary(agents: &[AgentRecord], waiting_calls: usize, active_calls: usize) -> WidgetSummary {
    WidgetSummary {
        total_agents: agents.len(),
        connected_agents: agents
            .iter()
            .filter(|a| a.connection == ConnectionStatus::Connected)
            .count(),
        alerting_agents: agents.iter().filter(|a| !a.alerts.is_empty()).count(),
        state_breakdown: state_breakdown(agents.iter()),
        department_breakdown: None,
        location_breakdown: Some(location_breakdown(agents.iter())),
        waiting_calls,
        active_calls,
    }
}

impl Widget {
    /// System-wide counts
    pub fn global(
        agents: &[AgentRecord],
        queues: &[QueueSnapshot],
        timestamp: DateTime<Utc>,
    ) -> Self {
        let waiting = queues.iter().map(|q| q.waiting_count).sum();
        let active = queues.iter().map(|q| q.active_count).sum();
        let mut summary = agent_summary(agents, waiting, active);
        let mut departments = BTreeMap::new();
        for agent in agents {
            *departments.entry(agent.department.clone()).or_insert(0) += 1;
        }
        summary.department_breakdown = Some(departments);
        Self {
            kind: WidgetKind::GlobalWidget,
            department: None,
            timestamp,
            summary,
            agents: None,
            queues: None,
        }
    }

    /// One department: its agents and its queues
    pub fn department(
        department: &str,
        agents: Vec<AgentRecord>,
        queues: Vec<QueueSnapshot>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let waiting = queues.iter().map(|q| q.waiting_count).sum();
        let active = queues.iter().map(|q| q.active_count).sum();
        Self {
            kind: WidgetKind::DepartmentWidget,
            department: Some(department.to_string()),
            timestamp,
            summary: agent_summary(&agents, waiting, active),
            agents: Some(agents),
            queues: Some(queues),
        }
    }

    /// The widget as `identity` may see it
    ///
    /// Department widgets keep only agents at permitted locations and recount
    /// from them. The global widget keeps its aggregate counts but only lists
    /// permitted locations in its breakdown.
    pub fn scoped_to(&self, identity: &Identity) -> Cow<'_, Widget> {
        if identity.is_unrestricted() {
            return Cow::Borrowed(self);
        }
        let mut scoped = self.clone();
        match self.kind {
            WidgetKind::GlobalWidget => {
                if let Some(locations) = scoped.summary.location_breakdown.as_mut() {
                    locations.retain(|location, _| identity.can_see_location(location));
                }
            }
            WidgetKind::DepartmentWidget => {
                let visible: Vec<AgentRecord> = self
                    .agents
                    .iter()
                    .flatten()
                    .filter(|a| identity.can_see_location(&a.location))
                    .cloned()
                    .collect();
                scoped.summary = agent_summary(
                    &visible,
                    self.summary.waiting_calls,
                    self.summary.active_calls,
                );
                scoped.agents = Some(visible);
            }
        }
        Cow::Owned(scoped)
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub widgets: usize,
    pub delivered: usize,
    pub dropped: usize,
}

pub struct SnapshotAggregator {
    agents: Arc<AgentStateStore>,
    queues: Arc<CallQueueManager>,
    dashboards: Arc<DashboardBroadcastHub>,
    interval: Duration,
    ticks: AtomicU64,
}

impl SnapshotAggregator {
    pub fn new(
        agents: Arc<AgentStateStore>,
        queues: Arc<CallQueueManager>,
        dashboards: Arc<DashboardBroadcastHub>,
        interval: Duration,
    ) -> Self {
        Self {
            agents,
            queues,
            dashboards,
            interval,
            ticks: AtomicU64::new(0),
        }
    }

    /// Global widget first, then one per department in name order
    pub fn build_widgets(&self, now: DateTime<Utc>) -> Vec<Widget> {
        let mut roster = self.agents.by_department();
        let available = self.agents.available_by_department();
        let mut queue_groups = self
            .queues
            .snapshots_by_department(now, |dept| available.get(dept).copied().unwrap_or(0));

        let all_agents: Vec<AgentRecord> = roster.values().flatten().cloned().collect();
        let all_queues: Vec<QueueSnapshot> = queue_groups.values().flatten().cloned().collect();

        let departments: BTreeSet<String> = roster
            .keys()
            .chain(queue_groups.keys())
            .cloned()
            .collect();

        let mut widgets = Vec::with_capacity(departments.len() + 1);
        widgets.push(Widget::global(&all_agents, &all_queues, now));
        for department in departments {
            let agents = roster.remove(&department).unwrap_or_default();
            let queues = queue_groups.remove(&department).unwrap_or_default();
            widgets.push(Widget::department(&department, agents, queues, now));
        }
        widgets
    }

    /// Build and broadcast every widget
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let widgets = self.build_widgets(now);
        let mut report = TickReport {
            widgets: widgets.len(),
            ..TickReport::default()
        };
        for widget in &widgets {
            let sent = self.dashboards.broadcast_widget(widget);
            report.delivered += sent.delivered;
            report.dropped += sent.dropped;
        }
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed) + 1;
        trace!(tick, widgets = report.widgets, delivered = report.delivered, "Aggregator tick");
        report
    }

    pub fn tick_count(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Tick on a fixed interval until `shutdown` fires
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_ms = self.interval.as_millis() as u64, "Snapshot aggregator started");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.tick(Utc::now());
                }
            }
        }
        debug!("Snapshot aggregator stopped");
    }
}
