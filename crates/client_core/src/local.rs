//! In-process backend over a SQLite [`Storage`], for single-machine use and tests.

use async_trait::async_trait;
use shared::domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery};
use storage::Storage;
use tokio::sync::{broadcast, broadcast::error::RecvError, watch};
use tracing::warn;

use crate::{error::TaskBoardError, AuthIdentity, AuthProvider, Result, TaskFeed, TaskStore};

pub struct LocalBackend {
    storage: Storage,
    changes: broadcast::Sender<()>,
    session: watch::Sender<Option<AuthIdentity>>,
}

impl LocalBackend {
    pub fn new(storage: Storage) -> Self {
        let (changes, _) = broadcast::channel(64);
        let (session, _) = watch::channel(None);
        Self {
            storage,
            changes,
            session,
        }
    }

    fn notify_changed(&self) {
        let _ = self.changes.send(());
    }
}

#[async_trait]
impl AuthProvider for LocalBackend {
    async fn authenticate(&self, email: &str, credential: &str) -> Result<AuthIdentity> {
        let verified = self
            .storage
            .verify_credential(email, credential)
            .await
            .map_err(TaskBoardError::backend)?;
        if !verified {
            return Err(TaskBoardError::InvalidCredential);
        }
        let identity = AuthIdentity {
            email: email.trim().to_string(),
            roster: None,
        };
        self.session.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.session.send_replace(None);
        Ok(())
    }

    fn watch_session(&self) -> watch::Receiver<Option<AuthIdentity>> {
        self.session.subscribe()
    }
}

#[async_trait]
impl TaskStore for LocalBackend {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let created = self
            .storage
            .create_task(&task)
            .await
            .map_err(TaskBoardError::backend)?;
        self.notify_changed();
        Ok(created)
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task> {
        self.storage
            .get_task(id)
            .await
            .map_err(TaskBoardError::backend)?
            .ok_or_else(|| TaskBoardError::NotFound(id.clone()))
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let updated = self
            .storage
            .update_task(id, patch)
            .await
            .map_err(TaskBoardError::backend)?
            .ok_or_else(|| TaskBoardError::NotFound(id.clone()))?;
        self.notify_changed();
        Ok(updated)
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let deleted = self
            .storage
            .delete_task(id)
            .await
            .map_err(TaskBoardError::backend)?;
        if !deleted {
            return Err(TaskBoardError::NotFound(id.clone()));
        }
        self.notify_changed();
        Ok(())
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        self.storage
            .list_tasks(query)
            .await
            .map_err(TaskBoardError::backend)
    }

    async fn subscribe(&self, query: TaskQuery) -> Result<TaskFeed> {
        let mut changes = self.changes.subscribe();
        let initial = self
            .storage
            .list_tasks(&query)
            .await
            .map_err(TaskBoardError::backend)?;
        let storage = self.storage.clone();

        let (snapshots, receiver) = TaskFeed::channel();
        let producer = tokio::spawn(async move {
            if snapshots.send(initial).await.is_err() {
                return;
            }
            loop {
                match changes.recv().await {
                    // A lagged receiver only missed notifications; one re-query covers them all.
                    Ok(()) | Err(RecvError::Lagged(_)) => {}
                    Err(RecvError::Closed) => break,
                }
                match storage.list_tasks(&query).await {
                    Ok(tasks) => {
                        if snapshots.send(tasks).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        warn!(%err, "local task feed query failed");
                        break;
                    }
                }
            }
        });
        Ok(TaskFeed::new(receiver, producer))
    }
}

#[cfg(test)]
#[path = "tests/local_tests.rs"]
mod tests;
