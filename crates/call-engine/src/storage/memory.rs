//! In-process history store

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;

use super::{CallRecordStore, CallSummary, DailyStats, StoreError};

/// Keeps history in memory; lost on restart
#[derive(Default)]
pub struct MemoryCallStore {
    calls: Mutex<BTreeMap<String, CallSummary>>,
    stats: Mutex<BTreeMap<(String, NaiveDate), DailyStats>>,
    unavailable: AtomicBool,
}

impl MemoryCallStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("memory store switched off".to_string()))
        } else {
            Ok(())
        }
    }
}

fn newest_first(mut calls: Vec<CallSummary>) -> Vec<CallSummary> {
    calls.sort_by(|a, b| b.completed_at.cmp(&a.completed_at).then_with(|| a.call_id.cmp(&b.call_id)));
    calls
}

#[async_trait]
impl CallRecordStore for MemoryCallStore {
    async fn save_call(&self, summary: &CallSummary) -> Result<(), StoreError> {
        self.check()?;
        self.calls.lock().insert(summary.call_id.clone(), summary.clone());
        Ok(())
    }

    async fn save_daily_stats(&self, stats: &DailyStats) -> Result<(), StoreError> {
        self.check()?;
        self.stats
            .lock()
            .insert((stats.agent_id.clone(), stats.date), stats.clone());
        Ok(())
    }

    async fn calls_for_agent(&self, agent_id: &str) -> Result<Vec<CallSummary>, StoreError> {
        self.check()?;
        let calls = self
            .calls
            .lock()
            .values()
            .filter(|c| c.agent_id.as_deref() == Some(agent_id))
            .cloned()
            .collect();
        Ok(newest_first(calls))
    }

    async fn calls_on(&self, date: NaiveDate) -> Result<Vec<CallSummary>, StoreError> {
        self.check()?;
        let calls = self
            .calls
            .lock()
            .values()
            .filter(|c| c.date() == date)
            .cloned()
            .collect();
        Ok(newest_first(calls))
    }

    async fn daily_stats(
        &self,
        date: NaiveDate,
        agent_id: Option<&str>,
    ) -> Result<Vec<DailyStats>, StoreError> {
        self.check()?;
        Ok(self
            .stats
            .lock()
            .values()
            .filter(|s| s.date == date && agent_id.map_or(true, |id| s.agent_id == id))
            .cloned()
            .collect())
    }

    async fn truncate_all(&self) -> Result<u64, StoreError> {
        self.check()?;
        let mut calls = self.calls.lock();
        let mut stats = self.stats.lock();
        let removed = (calls.len() + stats.len()) as u64;
        calls.clear();
        stats.clear();
        Ok(removed)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}
