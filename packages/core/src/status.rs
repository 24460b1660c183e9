//! Read-only aggregate view over the queue.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{JobState, WorkerInfo};

/// Job counts per state plus the registered workers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Every state is present, zero-filled.
    pub counts: BTreeMap<JobState, u64>,
    /// Registered workers, live ones first.
    pub workers: Vec<WorkerStatus>,
    pub taken_at: DateTime<Utc>,
}

/// A registered worker and whether it is still reporting in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub info: WorkerInfo,
    pub alive: bool,
}

impl StatusSnapshot {
    pub fn new(
        counts: impl IntoIterator<Item = (JobState, u64)>,
        workers: impl IntoIterator<Item = (WorkerInfo, bool)>,
        taken_at: DateTime<Utc>,
    ) -> Self {
        let mut all: BTreeMap<JobState, u64> = JobState::ALL.into_iter().map(|s| (s, 0)).collect();
        for (state, count) in counts {
            *all.entry(state).or_default() += count;
        }

        let mut workers: Vec<WorkerStatus> = workers
            .into_iter()
            .map(|(info, alive)| WorkerStatus { info, alive })
            .collect();
        workers.sort_by(|a, b| {
            b.alive
                .cmp(&a.alive)
                .then_with(|| a.info.started_at.cmp(&b.info.started_at))
        });

        Self {
            counts: all,
            workers,
            taken_at,
        }
    }

    pub fn count(&self, state: JobState) -> u64 {
        self.counts.get(&state).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Workers still reporting in.
    pub fn active_workers(&self) -> impl Iterator<Item = &WorkerInfo> {
        self.workers.iter().filter(|w| w.alive).map(|w| &w.info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WorkerId;

    #[test]
    fn counts_are_zero_filled() {
        let snapshot = StatusSnapshot::new(
            [(JobState::Pending, 2), (JobState::Dead, 1)],
            std::iter::empty(),
            Utc::now(),
        );
        assert_eq!(snapshot.count(JobState::Pending), 2);
        assert_eq!(snapshot.count(JobState::Processing), 0);
        assert_eq!(snapshot.counts.len(), JobState::ALL.len());
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn live_workers_sort_first() {
        let now = Utc::now();
        let stale = WorkerInfo::new(WorkerId::new(), 1, now);
        let live = WorkerInfo::new(WorkerId::new(), 2, now);
        let snapshot = StatusSnapshot::new(
            std::iter::empty(),
            [(stale, false), (live.clone(), true)],
            now,
        );
        assert_eq!(snapshot.workers[0].info.id, live.id);
        assert_eq!(snapshot.active_workers().count(), 1);
    }
}
