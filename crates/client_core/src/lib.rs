use std::sync::{Arc, Weak};

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use futures::StreamExt;
use shared::{
    domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery, TaskStatus, User, ViewMode},
    policy,
    roster::Roster,
};
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex, RwLock},
    task::JoinHandle,
};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

pub mod error;
pub mod export;
pub mod http;
pub mod local;
pub mod view;

pub use error::{Result, TaskBoardError};
pub use export::{ExportReceipt, TaskRecord, XlsxExporter, HISTORY_SHEET_NAME};
pub use http::HttpBackend;
pub use local::LocalBackend;
pub use view::{derive_view, TaskActions, TaskCard, TaskView};

const FEED_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthIdentity {
    pub email: String,
    /// Set when the provider is authoritative for the team list; the board then
    /// adopts it in place of its configured roster.
    pub roster: Option<Roster>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn authenticate(&self, email: &str, credential: &str) -> Result<AuthIdentity>;
    async fn sign_out(&self) -> Result<()>;
    /// Current identity, updated on sign-in and on sign-out from anywhere.
    fn watch_session(&self) -> watch::Receiver<Option<AuthIdentity>>;
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: NewTask) -> Result<Task>;
    async fn get_task(&self, id: &TaskId) -> Result<Task>;
    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task>;
    async fn delete_task(&self, id: &TaskId) -> Result<()>;
    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>>;
    /// Pushes the full result set of `query` now and after every change.
    async fn subscribe(&self, query: TaskQuery) -> Result<TaskFeed>;
}

pub trait SpreadsheetExporter: Send + Sync {
    fn export(&self, sheet_name: &str, records: &[TaskRecord]) -> Result<ExportReceipt>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmPrompt {
    Complete,
    Delete,
}

impl ConfirmPrompt {
    pub fn message(self) -> &'static str {
        match self {
            ConfirmPrompt::Complete => "確定要將此任務標記為完成嗎？",
            ConfirmPrompt::Delete => "確定要刪除這項任務嗎？此動作無法還原。",
        }
    }
}

#[async_trait]
pub trait ConfirmationGate: Send + Sync {
    async fn confirm(&self, prompt: ConfirmPrompt, task: &Task) -> bool;
}

/// Gate for non-interactive callers that already asked the user.
pub struct AlwaysConfirm;

#[async_trait]
impl ConfirmationGate for AlwaysConfirm {
    async fn confirm(&self, _prompt: ConfirmPrompt, _task: &Task) -> bool {
        true
    }
}

/// Cancelable stream of full task snapshots. Dropping it stops the producer.
pub struct TaskFeed {
    snapshots: ReceiverStream<Vec<Task>>,
    producer: Option<JoinHandle<()>>,
}

impl TaskFeed {
    pub fn channel() -> (mpsc::Sender<Vec<Task>>, mpsc::Receiver<Vec<Task>>) {
        mpsc::channel(FEED_BUFFER)
    }

    pub fn new(snapshots: mpsc::Receiver<Vec<Task>>, producer: JoinHandle<()>) -> Self {
        Self {
            snapshots: ReceiverStream::new(snapshots),
            producer: Some(producer),
        }
    }

    pub async fn next_snapshot(&mut self) -> Option<Vec<Task>> {
        self.snapshots.next().await
    }

    pub fn cancel(&mut self) {
        if let Some(producer) = self.producer.take() {
            producer.abort();
        }
        self.snapshots.close();
    }
}

impl Drop for TaskFeed {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoardEvent {
    SessionChanged(Option<User>),
    TasksReplaced { count: usize },
    FeedClosed,
    Error(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome<T> {
    Applied(T),
    Declined,
}

#[derive(Debug, Clone)]
pub struct RangeExport {
    pub tasks: Vec<Task>,
    pub receipt: ExportReceipt,
}

#[derive(Default)]
struct BoardState {
    session: Option<User>,
    tasks: Vec<Task>,
    view_mode: ViewMode,
    /// Bumped on every session change; snapshots tagged with an older value are dropped.
    generation: u64,
}

pub struct TaskBoard {
    roster: RwLock<Roster>,
    auth: Arc<dyn AuthProvider>,
    store: Arc<dyn TaskStore>,
    exporter: Arc<dyn SpreadsheetExporter>,
    confirmation: Arc<dyn ConfirmationGate>,
    state: RwLock<BoardState>,
    feed: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<BoardEvent>,
}

impl TaskBoard {
    pub fn new(
        roster: Roster,
        auth: Arc<dyn AuthProvider>,
        store: Arc<dyn TaskStore>,
        exporter: Arc<dyn SpreadsheetExporter>,
        confirmation: Arc<dyn ConfirmationGate>,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            roster: RwLock::new(roster),
            auth,
            store,
            exporter,
            confirmation,
            state: RwLock::new(BoardState::default()),
            feed: Mutex::new(None),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BoardEvent> {
        self.events.subscribe()
    }

    pub async fn session(&self) -> Option<User> {
        self.state.read().await.session.clone()
    }

    /// Copy of the current task mirror.
    pub async fn tasks(&self) -> Vec<Task> {
        self.state.read().await.tasks.clone()
    }

    pub async fn view_mode(&self) -> ViewMode {
        self.state.read().await.view_mode
    }

    pub async fn set_view_mode(&self, mode: ViewMode) {
        self.state.write().await.view_mode = mode;
    }

    pub async fn login(self: &Arc<Self>, email: &str, credential: &str) -> Result<User> {
        if email.trim().is_empty() {
            return Err(TaskBoardError::Validation("email is required".into()));
        }
        let identity = self.auth.authenticate(email, credential).await?;
        let user = self.resolve_identity(&identity).await?;
        self.activate_session(user.clone()).await?;
        Ok(user)
    }

    pub async fn logout(&self) {
        self.end_session().await;
        if let Err(err) = self.auth.sign_out().await {
            warn!(%err, "sign-out failed; local session cleared anyway");
        }
    }

    /// Picks up a session the auth collaborator already holds (e.g. at app start).
    pub async fn restore_session(self: &Arc<Self>) -> Result<Option<User>> {
        let identity = self.auth.watch_session().borrow().clone();
        let Some(identity) = identity else {
            return Ok(None);
        };
        if let Some(current) = self.session().await {
            if current.email.eq_ignore_ascii_case(&identity.email) {
                return Ok(Some(current));
            }
        }
        let user = self.resolve_identity(&identity).await?;
        self.activate_session(user.clone()).await?;
        Ok(Some(user))
    }

    /// Follows the auth collaborator's session channel: an external sign-out ends
    /// the board session, a new identity replaces it.
    pub fn follow_auth_changes(self: &Arc<Self>) -> JoinHandle<()> {
        let mut changes = self.auth.watch_session();
        let board = Arc::downgrade(self);
        tokio::spawn(async move {
            while changes.changed().await.is_ok() {
                let identity = changes.borrow_and_update().clone();
                let Some(board) = board.upgrade() else {
                    break;
                };
                match identity {
                    None => {
                        if board.session().await.is_some() {
                            info!("signed out by the auth provider");
                            board.end_session().await;
                        }
                    }
                    Some(_) => {
                        if let Err(err) = board.restore_session().await {
                            warn!(%err, "failed to follow auth session change");
                            let _ = board.events.send(BoardEvent::Error(err.to_string()));
                        }
                    }
                }
            }
        })
    }

    pub async fn create_task(
        &self,
        title: &str,
        description: &str,
        date: &str,
        assignee: &str,
    ) -> Result<Task> {
        let actor = self.require_session().await?;
        policy::ensure_can_create(&actor)?;
        let new_task = NewTask {
            title: title.trim().to_string(),
            description: description.trim().to_string(),
            date: policy::parse_task_date(date)?,
            assignee: assignee.trim().to_string(),
        };
        policy::validate_new_task(&*self.roster.read().await, &new_task)?;

        let created = self.store.create_task(new_task).await?;
        info!(
            task_id = %created.id,
            assignee = %created.assignee,
            date = %created.date,
            "task created"
        );
        self.upsert_local(created.clone()).await;
        Ok(created)
    }

    pub async fn update_task(&self, id: &TaskId, patch: TaskPatch) -> Result<Task> {
        let actor = self.require_session().await?;
        let current = self.lookup(id).await?;
        policy::ensure_can_patch(&actor, &current, &patch)?;
        policy::validate_patch(&current, &patch)?;

        let updated = self.store.update_task(id, &patch).await?;
        info!(task_id = %id, by = %actor.name, status = %updated.status, "task updated");
        self.upsert_local(updated.clone()).await;
        Ok(updated)
    }

    pub async fn edit_task(&self, id: &TaskId, title: &str, description: &str) -> Result<Task> {
        self.update_task(id, TaskPatch::edit(title.trim(), description.trim()))
            .await
    }

    pub async fn report_task(&self, id: &TaskId, status: TaskStatus, note: &str) -> Result<Task> {
        self.update_task(id, TaskPatch::report(status, note.trim()))
            .await
    }

    pub async fn complete_task(&self, id: &TaskId) -> Result<ActionOutcome<Task>> {
        let actor = self.require_session().await?;
        let current = self.lookup(id).await?;
        policy::ensure_can_complete(&actor, &current)?;

        if !self
            .confirmation
            .confirm(ConfirmPrompt::Complete, &current)
            .await
        {
            debug!(task_id = %id, "completion declined");
            return Ok(ActionOutcome::Declined);
        }

        let updated = self.store.update_task(id, &TaskPatch::complete()).await?;
        info!(task_id = %id, by = %actor.name, "task completed");
        self.upsert_local(updated.clone()).await;
        Ok(ActionOutcome::Applied(updated))
    }

    pub async fn delete_task(&self, id: &TaskId) -> Result<ActionOutcome<()>> {
        let actor = self.require_session().await?;
        policy::ensure_can_delete(&actor)?;
        let current = self.lookup(id).await?;

        if !self
            .confirmation
            .confirm(ConfirmPrompt::Delete, &current)
            .await
        {
            debug!(task_id = %id, "deletion declined");
            return Ok(ActionOutcome::Declined);
        }

        self.store.delete_task(id).await?;
        info!(task_id = %id, by = %actor.name, "task deleted");
        self.remove_local(id).await;
        Ok(ActionOutcome::Applied(()))
    }

    pub async fn list_view(&self, mode: ViewMode) -> Result<TaskView> {
        self.list_view_on(mode, Local::now().date_naive()).await
    }

    pub async fn list_view_on(&self, mode: ViewMode, today: NaiveDate) -> Result<TaskView> {
        let state = self.state.read().await;
        let session = state.session.as_ref().ok_or(TaskBoardError::NotSignedIn)?;
        Ok(derive_view(&state.tasks, mode, session, today))
    }

    pub async fn current_view(&self) -> Result<TaskView> {
        let mode = self.view_mode().await;
        self.list_view(mode).await
    }

    pub async fn refresh(&self) -> Result<usize> {
        self.require_session().await?;
        let generation = self.state.read().await.generation;
        let tasks = self.store.query_tasks(&TaskQuery::All).await?;
        let count = tasks.len();
        self.replace_tasks(generation, tasks).await;
        Ok(count)
    }

    /// Tasks dated within `start..=end`, straight from the store.
    pub async fn history(&self, start: &str, end: &str) -> Result<Vec<Task>> {
        self.require_session().await?;
        let start = policy::parse_task_date(start)?;
        let end = policy::parse_task_date(end)?;
        policy::validate_range(start, end)?;
        self.store
            .query_tasks(&TaskQuery::DateRange { start, end })
            .await
    }

    /// Live form of [`TaskBoard::history`]: the range result now and after every change.
    pub async fn history_feed(&self, start: &str, end: &str) -> Result<TaskFeed> {
        self.require_session().await?;
        let start = policy::parse_task_date(start)?;
        let end = policy::parse_task_date(end)?;
        policy::validate_range(start, end)?;
        self.store
            .subscribe(TaskQuery::DateRange { start, end })
            .await
    }

    pub async fn export_range(&self, start: &str, end: &str) -> Result<RangeExport> {
        let tasks = self.history(start, end).await?;
        let records: Vec<TaskRecord> = tasks.iter().map(TaskRecord::from).collect();
        let receipt = self.exporter.export(HISTORY_SHEET_NAME, &records)?;
        info!(rows = receipt.rows, path = %receipt.path.display(), "history exported");
        Ok(RangeExport { tasks, receipt })
    }

    async fn resolve_identity(&self, identity: &AuthIdentity) -> Result<User> {
        let found = {
            let mut roster = self.roster.write().await;
            if let Some(vouched) = &identity.roster {
                if *roster != *vouched {
                    info!(users = vouched.users().len(), "adopting roster from the auth provider");
                    *roster = vouched.clone();
                }
            }
            roster.find_by_email(&identity.email).cloned()
        };
        if let Some(user) = found {
            return Ok(user);
        }
        warn!(email = %identity.email, "authenticated identity is not on the roster");
        if let Err(err) = self.auth.sign_out().await {
            warn!(%err, "failed to sign out unrostered identity");
        }
        Err(TaskBoardError::UnauthorizedUser {
            email: identity.email.clone(),
        })
    }

    async fn activate_session(self: &Arc<Self>, user: User) -> Result<()> {
        self.stop_feed().await;
        let generation = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.session = Some(user.clone());
            state.tasks.clear();
            state.generation
        };

        let started = async {
            let tasks = self.store.query_tasks(&TaskQuery::All).await?;
            let feed = self.store.subscribe(TaskQuery::All).await?;
            Ok::<_, TaskBoardError>((tasks, feed))
        }
        .await;

        let (tasks, feed) = match started {
            Ok(started) => started,
            Err(err) => {
                let mut state = self.state.write().await;
                if state.generation == generation {
                    state.session = None;
                    state.tasks.clear();
                }
                warn!(%err, name = %user.name, "failed to start session");
                return Err(err);
            }
        };

        self.replace_tasks(generation, tasks).await;
        let consumer = spawn_feed_consumer(Arc::downgrade(self), generation, feed);
        if let Some(previous) = self.feed.lock().await.replace(consumer) {
            previous.abort();
        }

        info!(name = %user.name, role = %user.role, "session started");
        let _ = self.events.send(BoardEvent::SessionChanged(Some(user)));
        Ok(())
    }

    async fn end_session(&self) -> Option<User> {
        self.stop_feed().await;
        let previous = {
            let mut state = self.state.write().await;
            state.generation += 1;
            state.tasks.clear();
            state.session.take()
        };
        if let Some(user) = &previous {
            info!(name = %user.name, "session ended");
            let _ = self.events.send(BoardEvent::SessionChanged(None));
        }
        previous
    }

    async fn stop_feed(&self) {
        if let Some(consumer) = self.feed.lock().await.take() {
            consumer.abort();
        }
    }

    async fn require_session(&self) -> Result<User> {
        self.session().await.ok_or(TaskBoardError::NotSignedIn)
    }

    async fn lookup(&self, id: &TaskId) -> Result<Task> {
        let cached = {
            let state = self.state.read().await;
            state.tasks.iter().find(|t| &t.id == id).cloned()
        };
        match cached {
            Some(task) => Ok(task),
            None => self.store.get_task(id).await,
        }
    }

    /// Swaps the whole mirror. Returns false once the snapshot's session is gone.
    async fn replace_tasks(&self, generation: u64, tasks: Vec<Task>) -> bool {
        let count = tasks.len();
        {
            let mut state = self.state.write().await;
            if state.generation != generation || state.session.is_none() {
                return false;
            }
            state.tasks = tasks;
        }
        debug!(count, "task mirror replaced");
        let _ = self.events.send(BoardEvent::TasksReplaced { count });
        true
    }

    async fn upsert_local(&self, task: Task) {
        let mut state = self.state.write().await;
        if state.session.is_none() {
            return;
        }
        match state.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => state.tasks.push(task),
        }
    }

    async fn remove_local(&self, id: &TaskId) {
        self.state.write().await.tasks.retain(|t| &t.id != id);
    }
}

fn spawn_feed_consumer(
    board: Weak<TaskBoard>,
    generation: u64,
    mut feed: TaskFeed,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(tasks) = feed.next_snapshot().await {
            let Some(board) = board.upgrade() else {
                return;
            };
            if !board.replace_tasks(generation, tasks).await {
                return;
            }
        }
        if let Some(board) = board.upgrade() {
            warn!("task feed closed by the store");
            let _ = board.events.send(BoardEvent::FeedClosed);
        }
    })
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
