use crate::api::ApiContext;
use tokio::sync::broadcast;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) api: ApiContext,
    /// Fired after every committed mutation; feed connections re-query on it.
    pub(crate) changes: broadcast::Sender<()>,
}

impl AppState {
    pub(crate) fn new(api: ApiContext) -> Self {
        let (changes, _) = broadcast::channel(256);
        Self { api, changes }
    }

    pub(crate) fn notify_changed(&self) {
        let _ = self.changes.send(());
    }
}
