//! REST client for the message and auth routes.

use async_trait::async_trait;
use parley_core::ids::{MessageId, UserId};
use parley_core::messages::{Message, MessageDraft, MessagePage};
use parley_core::users::UserProfile;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::ClientError;

/// Server calls the chat client depends on.
#[async_trait]
pub trait MessageApi: Send + Sync {
    async fn send_message(&self, receiver: &UserId, draft: &MessageDraft) -> Result<Message, ClientError>;

    async fn conversation(&self, partner: &UserId, page: u32, limit: u32) -> Result<MessagePage, ClientError>;

    /// Mark everything `partner` sent us as read. Returns how many changed.
    async fn mark_read(&self, partner: &UserId) -> Result<u64, ClientError>;
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: T,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MarkedRead {
    marked_count: u64,
}

#[derive(Deserialize)]
struct SessionBody {
    #[serde(flatten)]
    user: UserProfile,
    token: String,
}

/// Authenticated HTTP client. Sends the session token as a bearer header.
#[derive(Clone)]
pub struct HttpApi {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for HttpApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ClientError> {
    let status = resp.status();
    let bytes = resp.bytes().await?;
    if !status.is_success() {
        let message = serde_json::from_slice::<ErrorBody>(&bytes)
            .map(|b| b.error)
            .unwrap_or_else(|_| String::from_utf8_lossy(&bytes).into_owned());
        return Err(ClientError::Http {
            status: status.as_u16(),
            message,
        });
    }
    Ok(serde_json::from_slice(&bytes)?)
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    async fn start_session(base_url: &str, path: &str, body: serde_json::Value) -> Result<(Self, UserProfile), ClientError> {
        let base_url = base_url.trim_end_matches('/');
        let resp = reqwest::Client::new()
            .post(format!("{base_url}{path}"))
            .json(&body)
            .send()
            .await?;
        let session: SessionBody = decode(resp).await?;
        debug!(user_id = %session.user.id, "session started");
        Ok((Self::new(base_url, session.token), session.user))
    }

    pub async fn signup(
        base_url: &str,
        full_name: &str,
        email: &str,
        password: &str,
    ) -> Result<(Self, UserProfile), ClientError> {
        let body = json!({ "fullName": full_name, "email": email, "password": password });
        Self::start_session(base_url, "/api/auth/signup", body).await
    }

    pub async fn login(base_url: &str, email: &str, password: &str) -> Result<(Self, UserProfile), ClientError> {
        let body = json!({ "email": email, "password": password });
        Self::start_session(base_url, "/api/auth/login", body).await
    }

    pub async fn users(&self) -> Result<Vec<UserProfile>, ClientError> {
        let resp = self
            .client
            .get(self.url("/api/messages/users"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        decode(resp).await
    }

    pub async fn unread_counts(&self) -> Result<std::collections::BTreeMap<UserId, u64>, ClientError> {
        let resp = self
            .client
            .get(self.url("/api/messages/unread/all"))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(decode::<Envelope<_>>(resp).await?.data)
    }

    pub async fn edit_message(&self, id: &MessageId, text: &str) -> Result<Message, ClientError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/messages/edit/{id}")))
            .bearer_auth(&self.token)
            .json(&json!({ "text": text }))
            .send()
            .await?;
        Ok(decode::<Envelope<_>>(resp).await?.data)
    }

    pub async fn delete_message(&self, id: &MessageId) -> Result<Message, ClientError> {
        let resp = self
            .client
            .delete(self.url(&format!("/api/messages/{id}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(decode::<Envelope<_>>(resp).await?.data)
    }
}

#[async_trait]
impl MessageApi for HttpApi {
    async fn send_message(&self, receiver: &UserId, draft: &MessageDraft) -> Result<Message, ClientError> {
        let resp = self
            .client
            .post(self.url(&format!("/api/messages/send/{receiver}")))
            .bearer_auth(&self.token)
            .json(draft)
            .send()
            .await?;
        decode(resp).await
    }

    async fn conversation(&self, partner: &UserId, page: u32, limit: u32) -> Result<MessagePage, ClientError> {
        let resp = self
            .client
            .get(self.url(&format!("/api/messages/{partner}")))
            .query(&[("page", page), ("limit", limit)])
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(decode::<Envelope<_>>(resp).await?.data)
    }

    async fn mark_read(&self, partner: &UserId) -> Result<u64, ClientError> {
        let resp = self
            .client
            .put(self.url(&format!("/api/messages/read/{partner}")))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Ok(decode::<Envelope<MarkedRead>>(resp).await?.data.marked_count)
    }
}
