//! Task service client: REST for commands and queries, a WebSocket for the live feed.

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use shared::{
    domain::{NewTask, Task, TaskId, TaskPatch, TaskQuery},
    error::ApiError,
    protocol::{LoginRequest, LoginResponse, ServerEvent, TaskQueryParams},
    roster::Roster,
};
use tokio::sync::{watch, RwLock};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

use crate::{error::TaskBoardError, AuthIdentity, AuthProvider, Result, TaskFeed, TaskStore};

pub struct HttpBackend {
    http: Client,
    server_url: String,
    token: RwLock<Option<String>>,
    session: watch::Sender<Option<AuthIdentity>>,
}

impl HttpBackend {
    pub fn new(server_url: &str) -> Result<Self> {
        let server_url = server_url.trim().trim_end_matches('/').to_string();
        if !server_url.starts_with("http://") && !server_url.starts_with("https://") {
            return Err(TaskBoardError::Validation(
                "server_url must start with http:// or https://".into(),
            ));
        }
        let (session, _) = watch::channel(None);
        Ok(Self {
            http: Client::new(),
            server_url,
            token: RwLock::new(None),
            session,
        })
    }

    async fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .await
            .clone()
            .ok_or(TaskBoardError::NotSignedIn)
    }

    fn task_url(&self, id: &TaskId) -> String {
        format!("{}/tasks/{}", self.server_url, id)
    }

    fn feed_url(&self, token: &str, query: &TaskQuery) -> Result<Url> {
        let ws_base = if let Some(rest) = self.server_url.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = self.server_url.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            return Err(TaskBoardError::backend("unsupported server url scheme"));
        };
        let mut url = Url::parse(&format!("{ws_base}/ws")).map_err(TaskBoardError::backend)?;
        {
            let params = TaskQueryParams::from(query);
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("token", token);
            if let Some(assignee) = &params.assignee {
                pairs.append_pair("assignee", assignee);
            }
            if let Some(from) = params.from {
                pairs.append_pair("from", &from.to_string());
            }
            if let Some(to) = params.to {
                pairs.append_pair("to", &to.to_string());
            }
        }
        Ok(url)
    }
}

/// Non-2xx responses carry an [`ApiError`] body; anything else is a transport problem.
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    match response.json::<ApiError>().await {
        Ok(err) => Err(err.into()),
        Err(_) => Err(TaskBoardError::backend(format!("server responded {status}"))),
    }
}

async fn decode<T: DeserializeOwned>(response: Response) -> Result<T> {
    check(response)
        .await?
        .json()
        .await
        .map_err(TaskBoardError::backend)
}

#[async_trait]
impl AuthProvider for HttpBackend {
    async fn authenticate(&self, email: &str, credential: &str) -> Result<AuthIdentity> {
        let response = self
            .http
            .post(format!("{}/login", self.server_url))
            .json(&LoginRequest {
                email: email.trim().to_string(),
                credential: credential.to_string(),
            })
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        let body: LoginResponse = decode(response).await?;

        *self.token.write().await = Some(body.token);
        let identity = AuthIdentity {
            email: body.user.email,
            roster: (!body.roster.is_empty()).then(|| Roster::new(body.roster)),
        };
        self.session.send_replace(Some(identity.clone()));
        Ok(identity)
    }

    async fn sign_out(&self) -> Result<()> {
        self.token.write().await.take();
        self.session.send_replace(None);
        Ok(())
    }

    fn watch_session(&self) -> watch::Receiver<Option<AuthIdentity>> {
        self.session.subscribe()
    }
}

#[async_trait]
impl TaskStore for HttpBackend {
    async fn create_task(&self, task: NewTask) -> Result<Task> {
        let token = self.bearer().await?;
        let response = self
            .http
            .post(format!("{}/tasks", self.server_url))
            .bearer_auth(token)
            .json(&task)
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        decode(response).await
    }

    async fn get_task(&self, id: &TaskId) -> Result<Task> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(self.task_url(id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        decode(response).await
    }

    async fn update_task(&self, id: &TaskId, patch: &TaskPatch) -> Result<Task> {
        let token = self.bearer().await?;
        let response = self
            .http
            .patch(self.task_url(id))
            .bearer_auth(token)
            .json(patch)
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        decode(response).await
    }

    async fn delete_task(&self, id: &TaskId) -> Result<()> {
        let token = self.bearer().await?;
        let response = self
            .http
            .delete(self.task_url(id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        check(response).await?;
        Ok(())
    }

    async fn query_tasks(&self, query: &TaskQuery) -> Result<Vec<Task>> {
        let token = self.bearer().await?;
        let response = self
            .http
            .get(format!("{}/tasks", self.server_url))
            .bearer_auth(token)
            .query(&TaskQueryParams::from(query))
            .send()
            .await
            .map_err(TaskBoardError::backend)?;
        decode(response).await
    }

    async fn subscribe(&self, query: TaskQuery) -> Result<TaskFeed> {
        let token = self.bearer().await?;
        let url = self.feed_url(&token, &query)?;
        let (mut ws_stream, _) = connect_async(url.as_str())
            .await
            .map_err(|err| TaskBoardError::backend(format!("failed to open task feed: {err}")))?;

        let (snapshots, receiver) = TaskFeed::channel();
        let producer = tokio::spawn(async move {
            while let Some(message) = ws_stream.next().await {
                match message {
                    Ok(Message::Text(text)) => match serde_json::from_str::<ServerEvent>(&text) {
                        Ok(ServerEvent::TaskSnapshot { tasks }) => {
                            debug!(count = tasks.len(), "task snapshot received");
                            if snapshots.send(tasks).await.is_err() {
                                break;
                            }
                        }
                        Ok(ServerEvent::Error(err)) => {
                            warn!(code = ?err.code, message = %err.message, "task feed error");
                        }
                        Err(err) => warn!(%err, "ignoring malformed server event"),
                    },
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(err) => {
                        warn!(%err, "task feed connection lost");
                        break;
                    }
                }
            }
        });
        Ok(TaskFeed::new(receiver, producer))
    }
}

#[cfg(test)]
#[path = "tests/http_tests.rs"]
mod tests;
