//! Waiting for remote tasks over the property-collector long poll.
//!
//! A filter is created over the task set, then `WaitForUpdatesEx` is
//! called with the last seen version until every task reported
//! `success`. The first `error` fails the whole wait. The filter is
//! destroyed exactly once on every exit path.

use std::collections::HashSet;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::backend::{PropertyChange, TaskCollector, TaskFault, TaskRef, TaskState};
use crate::error::VmcliError;

/// What a finished wait consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WaitSummary {
    pub polls: usize,
    /// Version token of the last processed batch.
    pub version: Option<String>,
}

pub struct TaskWaiter<'a, C: TaskCollector> {
    collector: &'a C,
    timeout: Option<Duration>,
    cancel: CancellationToken,
}

impl<'a, C: TaskCollector> TaskWaiter<'a, C> {
    /// Waits without bound until told otherwise.
    pub fn new(collector: &'a C) -> Self {
        Self {
            collector,
            timeout: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn wait(&self, tasks: &[TaskRef]) -> Result<WaitSummary, VmcliError> {
        if tasks.is_empty() {
            return Ok(WaitSummary::default());
        }
        for task in tasks {
            tracing::debug!(task = %task.id(), "waiting for task");
        }

        let filter = self.collector.create_filter(tasks).await?;
        let result = self.poll_until_done(tasks).await;
        if let Err(e) = self.collector.destroy_filter(filter).await {
            tracing::warn!(error = %e, "failed to destroy task filter");
        }
        result
    }

    async fn poll_until_done(&self, tasks: &[TaskRef]) -> Result<WaitSummary, VmcliError> {
        let mut pending: HashSet<&str> = tasks.iter().map(TaskRef::id).collect();
        let mut summary = WaitSummary::default();
        let deadline = self.timeout.map(|t| Instant::now() + t);

        while !pending.is_empty() {
            let update = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(VmcliError::Cancelled),
                _ = expired(deadline) => {
                    return Err(VmcliError::WaitTimeout {
                        seconds: self.timeout.map(|t| t.as_secs()).unwrap_or_default(),
                        pending: pending.len(),
                    });
                }
                update = self.collector.wait_for_updates(summary.version.as_deref()) => update?,
            };
            summary.polls += 1;

            let Some(update) = update else {
                tracing::trace!("poll returned without changes");
                continue;
            };

            for change in &update.changes {
                if !pending.contains(change.task.as_str()) {
                    continue;
                }
                let (state, error) = match &change.change {
                    PropertyChange::Info { state, error } => (*state, error.clone()),
                    PropertyChange::State(state) => (*state, None),
                    PropertyChange::Other(_) => continue,
                };
                match state {
                    TaskState::Success => {
                        pending.remove(change.task.as_str());
                        tracing::debug!(task = %change.task, remaining = pending.len(), "task finished");
                    }
                    TaskState::Error => {
                        let fault = match error {
                            Some(fault) => Some(fault),
                            None => self.fetch_fault(&change.task).await,
                        };
                        return Err(task_error(&change.task, fault));
                    }
                    TaskState::Queued | TaskState::Running => {
                        tracing::trace!(task = %change.task, ?state, "task progressing");
                    }
                }
            }

            summary.version = Some(update.version);
        }

        Ok(summary)
    }

    async fn fetch_fault(&self, task: &str) -> Option<TaskFault> {
        match self.collector.task_error(task).await {
            Ok(fault) => fault,
            Err(e) => {
                tracing::warn!(task, error = %e, "could not fetch task error detail");
                None
            }
        }
    }
}

async fn expired(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

fn task_error(task: &str, fault: Option<TaskFault>) -> VmcliError {
    match fault {
        Some(TaskFault { fault, message }) => VmcliError::Task {
            task: task.to_string(),
            fault,
            message,
        },
        None => VmcliError::Task {
            task: task.to_string(),
            fault: None,
            message: "server reported an error without detail".into(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::fake::{FakeBackend, info, update};
    use crate::backend::{TaskChange, UpdateSet};

    fn tasks(ids: &[&str]) -> Vec<TaskRef> {
        ids.iter().map(|id| TaskRef::new(*id)).collect()
    }

    #[tokio::test]
    async fn empty_set_never_polls() {
        let fake = FakeBackend::default();
        let summary = TaskWaiter::new(&fake).wait(&[]).await.unwrap();
        assert_eq!(summary, WaitSummary::default());
        assert_eq!(fake.polls.get(), 0);
        assert_eq!(fake.filters_created.get(), 0);
    }

    #[tokio::test]
    async fn three_tasks_finish_over_three_polls() {
        let fake = FakeBackend::default();
        fake.script(vec![
            Some(update("1", vec![info("task-a", TaskState::Success)])),
            Some(update("2", vec![info("task-b", TaskState::Success)])),
            Some(update("3", vec![info("task-c", TaskState::Success)])),
        ]);
        let summary = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-a", "task-b", "task-c"]))
            .await
            .unwrap();
        assert_eq!(summary.polls, 3);
        assert_eq!(fake.polls.get(), 3);
        assert_eq!(fake.filters_destroyed.get(), 1);
    }

    #[tokio::test]
    async fn first_error_aborts_and_releases_filter_once() {
        let fake = FakeBackend::default();
        fake.script(vec![Some(update(
            "1",
            vec![TaskChange {
                task: "task-a".into(),
                change: PropertyChange::Info {
                    state: TaskState::Error,
                    error: Some(TaskFault {
                        fault: Some("DuplicateName".into()),
                        message: "The name 'web01' already exists.".into(),
                    }),
                },
            }],
        ))]);
        let err = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-a", "task-b"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VmcliError::Task { ref task, .. } if task == "task-a"));
        assert_eq!(err.fault(), Some("DuplicateName"));
        assert_eq!(fake.polls.get(), 1);
        assert_eq!(fake.filters_destroyed.get(), 1);
    }

    #[tokio::test]
    async fn incremental_error_fetches_detail() {
        let fake = FakeBackend::default();
        fake.task_faults.borrow_mut().insert(
            "task-a".into(),
            TaskFault {
                fault: Some("InvalidPowerState".into()),
                message: "The attempted operation cannot be performed in the current state".into(),
            },
        );
        fake.script(vec![Some(update(
            "4",
            vec![TaskChange {
                task: "task-a".into(),
                change: PropertyChange::State(TaskState::Error),
            }],
        ))]);
        let err = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-a"]))
            .await
            .unwrap_err();
        assert_eq!(err.fault(), Some("InvalidPowerState"));
    }

    #[tokio::test]
    async fn duplicate_and_foreign_reports_are_ignored() {
        let fake = FakeBackend::default();
        fake.script(vec![
            Some(update(
                "1",
                vec![
                    info("task-a", TaskState::Success),
                    info("task-zz", TaskState::Error),
                ],
            )),
            Some(update(
                "2",
                vec![
                    info("task-a", TaskState::Success),
                    info("task-a", TaskState::Error),
                    info("task-b", TaskState::Success),
                ],
            )),
        ]);
        let summary = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-a", "task-b"]))
            .await
            .unwrap();
        assert_eq!(summary.polls, 2);
    }

    #[tokio::test]
    async fn version_token_threads_through_polls() {
        let fake = FakeBackend::default();
        fake.script(vec![
            Some(update("1", vec![info("task-1", TaskState::Running)])),
            Some(update("2", vec![info("task-1", TaskState::Success)])),
        ]);
        let summary = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-1"]))
            .await
            .unwrap();
        assert_eq!(summary.polls, 2);
        assert_eq!(summary.version.as_deref(), Some("2"));
        assert_eq!(
            *fake.versions_seen.borrow(),
            vec![None, Some("1".to_string())]
        );
    }

    #[tokio::test]
    async fn empty_poll_keeps_version() {
        let fake = FakeBackend::default();
        fake.script(vec![
            Some(update("5", vec![info("task-1", TaskState::Queued)])),
            None,
            Some(UpdateSet {
                version: "6".into(),
                changes: vec![TaskChange {
                    task: "task-1".into(),
                    change: PropertyChange::State(TaskState::Success),
                }],
            }),
        ]);
        let summary = TaskWaiter::new(&fake)
            .wait(&tasks(&["task-1"]))
            .await
            .unwrap();
        assert_eq!(summary.polls, 3);
        assert_eq!(
            *fake.versions_seen.borrow(),
            vec![None, Some("5".to_string()), Some("5".to_string())]
        );
    }

    #[tokio::test]
    async fn failed_release_does_not_mask_result() {
        let fake = FakeBackend::default();
        fake.fail_destroy_filter.set(true);
        fake.script(vec![Some(update("1", vec![info("task-1", TaskState::Success)]))]);
        TaskWaiter::new(&fake)
            .wait(&tasks(&["task-1"]))
            .await
            .unwrap();
        assert_eq!(fake.filters_destroyed.get(), 1);
    }

    #[tokio::test]
    async fn cancelled_wait_releases_filter() {
        let fake = FakeBackend::default();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = TaskWaiter::new(&fake)
            .with_cancellation(cancel)
            .wait(&tasks(&["task-1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VmcliError::Cancelled));
        assert_eq!(fake.polls.get(), 0);
        assert_eq!(fake.filters_destroyed.get(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_reports_pending_count() {
        let fake = FakeBackend::default();
        fake.poll_delay.set(Some(Duration::from_secs(60)));
        fake.script(vec![None, None, None]);
        let err = TaskWaiter::new(&fake)
            .with_timeout(Some(Duration::from_secs(90)))
            .wait(&tasks(&["task-1", "task-2"]))
            .await
            .unwrap_err();
        assert!(matches!(err, VmcliError::WaitTimeout { seconds: 90, pending: 2 }));
        assert_eq!(fake.polls.get(), 2);
        assert_eq!(fake.filters_destroyed.get(), 1);
    }
}
