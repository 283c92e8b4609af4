//! Status snapshots as a pull-based stream, with a channel adapter for
//! consumers that want them pushed.

use chrono::{DateTime, Utc};
use futures::stream::{self, Stream, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::tasks::{StoreError, TaskStatus, TaskStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSummary {
    pub id: String,
    pub title: String,
    pub status: TaskStatus,
    pub issue_number: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub tasks: Vec<TaskSummary>,
    pub counts: BTreeMap<TaskStatus, usize>,
    #[serde(skip)]
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub async fn capture(store: &dyn TaskStore) -> Result<Self, StoreError> {
        let mut tasks: Vec<TaskSummary> = store
            .list()
            .await?
            .into_iter()
            .map(|task| TaskSummary {
                issue_number: task.issue_number(),
                id: task.id,
                title: task.title,
                status: task.status,
            })
            .collect();
        tasks.sort_by(|a, b| a.id.cmp(&b.id));

        let mut counts = BTreeMap::new();
        for task in &tasks {
            *counts.entry(task.status).or_insert(0) += 1;
        }
        Ok(Self {
            tasks,
            counts,
            taken_at: Utc::now(),
        })
    }

    /// Equal content, ignoring when the snapshot was taken.
    fn same_as(&self, other: &StatusSnapshot) -> bool {
        self.tasks == other.tasks
    }
}

struct PollState {
    store: Arc<dyn TaskStore>,
    interval: Duration,
    last: Option<StatusSnapshot>,
    first: bool,
}

/// Stream of snapshots polled from `store` every `interval`.
///
/// A snapshot is only yielded when it differs from the previous one. The
/// stream holds no external resources, so dropping it and calling this again
/// restarts from a fresh snapshot.
pub fn status_stream(
    store: Arc<dyn TaskStore>,
    interval: Duration,
) -> impl Stream<Item = Result<StatusSnapshot, StoreError>> + Send {
    let state = PollState {
        store,
        interval,
        last: None,
        first: true,
    };
    stream::unfold(state, |mut state| async move {
        loop {
            if !state.first {
                tokio::time::sleep(state.interval).await;
            }
            state.first = false;

            match StatusSnapshot::capture(state.store.as_ref()).await {
                Ok(snapshot) => {
                    if state.last.as_ref().is_some_and(|last| last.same_as(&snapshot)) {
                        continue;
                    }
                    state.last = Some(snapshot.clone());
                    return Some((Ok(snapshot), state));
                }
                Err(e) => return Some((Err(e), state)),
            }
        }
    })
}

/// Drive [`status_stream`] on a background task, pushing snapshots into a
/// bounded channel. The task ends when the receiver is dropped.
pub fn spawn_status_feed(
    store: Arc<dyn TaskStore>,
    interval: Duration,
    capacity: usize,
) -> (mpsc::Receiver<StatusSnapshot>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let handle = tokio::spawn(async move {
        let mut snapshots = Box::pin(status_stream(store, interval));
        loop {
            let next = tokio::select! {
                _ = tx.closed() => break,
                next = snapshots.next() => next,
            };
            match next {
                Some(Ok(snapshot)) => {
                    if tx.send(snapshot).await.is_err() {
                        break;
                    }
                }
                Some(Err(e)) => warn!(error = %e, "Status snapshot failed"),
                None => break,
            }
        }
        debug!("Status feed stopped");
    });
    (rx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{InMemoryTaskStore, Task};

    fn store() -> Arc<InMemoryTaskStore> {
        Arc::new(InMemoryTaskStore::with_tasks([
            Task::new("b", "Second", ""),
            Task::new("a", "First", ""),
        ]))
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_skips_unchanged_snapshots() {
        let store = store();
        let mut snapshots = Box::pin(status_stream(store.clone(), Duration::from_secs(1)));

        let first = snapshots.next().await.unwrap().unwrap();
        assert_eq!(first.tasks[0].id, "a");
        assert_eq!(first.counts.get(&TaskStatus::Backlog), Some(&2));

        let mut task = store.require("a").await.unwrap();
        task.status = TaskStatus::InProgress;
        store.save(&task).await.unwrap();

        let second = snapshots.next().await.unwrap().unwrap();
        assert_eq!(second.counts.get(&TaskStatus::InProgress), Some(&1));
        assert_eq!(second.counts.get(&TaskStatus::Backlog), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_stream_yields_current_state() {
        let store = store();
        let first = Box::pin(status_stream(store.clone(), Duration::from_secs(1)))
            .next()
            .await
            .unwrap()
            .unwrap();
        let restarted = Box::pin(status_stream(store, Duration::from_secs(1)))
            .next()
            .await
            .unwrap()
            .unwrap();
        assert!(first.same_as(&restarted));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feed_stops_when_receiver_dropped() {
        let (mut rx, handle) = spawn_status_feed(store(), Duration::from_secs(1), 4);
        let snapshot = rx.recv().await.unwrap();
        assert_eq!(snapshot.tasks.len(), 2);

        drop(rx);
        handle.await.unwrap();
    }
}
