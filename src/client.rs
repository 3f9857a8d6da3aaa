//! HTTP client for a remote chat server
//!
//! Mirrors the server routes one to one and maps error responses back into
//! [`ChatError`] by status and category.

use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tokio::task::JoinHandle;
use url::Url;

use crate::error::{ChatError, ChatResult};
use crate::identity::{ConversationKey, ParticipantId};
use crate::model::{Conversation, DeleteOutcome, Message};
use crate::server::api::{ErrorBody, SendRequest, StartRequest};
use crate::server::PRINCIPAL_HEADER;
use crate::sync::{remote, LiveEvent};

#[derive(Debug, Clone)]
pub struct ChatClient {
    http: Client,
    base: Url,
    principal: Option<ParticipantId>,
}

impl ChatClient {
    pub fn new(base: &str, principal: Option<ParticipantId>) -> ChatResult<Self> {
        let base = Url::parse(base)
            .map_err(|e| ChatError::Transport(format!("invalid server url {base}: {e}")))?;
        Ok(Self {
            http: Client::new(),
            base,
            principal,
        })
    }

    pub fn principal(&self) -> Option<&ParticipantId> {
        self.principal.as_ref()
    }

    pub async fn health(&self) -> ChatResult<()> {
        let url = self.url(&["health"])?;
        let response = self.http.get(url).send().await?;
        check(response, None).await.map(|_| ())
    }

    pub async fn start_conversation(&self, counterpart: &str) -> ChatResult<Conversation> {
        let url = self.url(&["conversations"])?;
        let request = self.http.post(url).json(&StartRequest {
            counterpart: counterpart.to_string(),
        });
        self.fetch(request, None).await
    }

    pub async fn conversations(&self) -> ChatResult<Vec<Conversation>> {
        let url = self.url(&["conversations"])?;
        self.fetch(self.http.get(url), None).await
    }

    pub async fn conversation(&self, key: &ConversationKey) -> ChatResult<Conversation> {
        let url = self.url(&["conversations", key.as_str()])?;
        self.fetch(self.http.get(url), Some(key)).await
    }

    pub async fn send(&self, key: &ConversationKey, body: &str) -> ChatResult<Message> {
        let url = self.url(&["conversations", key.as_str(), "messages"])?;
        let request = self.http.post(url).json(&SendRequest {
            body: body.to_string(),
        });
        self.fetch(request, Some(key)).await
    }

    pub async fn history(&self, key: &ConversationKey) -> ChatResult<Vec<Message>> {
        let url = self.url(&["conversations", key.as_str(), "messages"])?;
        self.fetch(self.http.get(url), Some(key)).await
    }

    /// A missing conversation is reported as [`DeleteOutcome::NotFound`],
    /// not as an error.
    pub async fn delete(&self, key: &ConversationKey) -> ChatResult<DeleteOutcome> {
        let url = self.url(&["conversations", key.as_str()])?;
        match self.fetch(self.http.delete(url), Some(key)).await {
            Err(ChatError::NotFound(_)) => Ok(DeleteOutcome::NotFound),
            result => result,
        }
    }

    /// Subscribe to a conversation's live message set over WebSocket.
    pub async fn watch<L>(&self, key: &ConversationKey, listener: L) -> ChatResult<JoinHandle<()>>
    where
        L: Fn(LiveEvent<Message>) + Send + 'static,
    {
        let mut url = self.url(&["conversations", key.as_str(), "ws"])?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| ChatError::Transport(format!("cannot use {scheme} for {url}")))?;

        remote::watch_remote(url.as_str(), self.principal.as_ref(), listener).await
    }

    fn url(&self, segments: &[&str]) -> ChatResult<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| ChatError::Transport(format!("server url cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.principal {
            Some(principal) => request.header(PRINCIPAL_HEADER, principal.as_str()),
            None => request,
        }
    }

    async fn fetch<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        key: Option<&ConversationKey>,
    ) -> ChatResult<T> {
        let response = self.authorize(request).send().await?;
        let response = check(response, key).await?;
        Ok(response.json().await?)
    }
}

/// Turn an error response back into the error the server raised.
async fn check(response: Response, key: Option<&ConversationKey>) -> ChatResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body: Option<ErrorBody> = response.json().await.ok();
    let message = body
        .as_ref()
        .map(|b| b.error.clone())
        .unwrap_or_else(|| status.to_string());

    Err(match body {
        Some(ErrorBody {
            validation: Some(validation),
            ..
        }) => validation.into(),
        _ if status == StatusCode::NOT_FOUND => match key {
            Some(key) => ChatError::NotFound(key.clone()),
            None => ChatError::Transport(message),
        },
        _ => ChatError::Transport(message),
    })
}
