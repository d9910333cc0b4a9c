//! `/api/messages/*`

use std::collections::BTreeMap;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use parley_core::ids::{MessageId, UserId};
use parley_core::messages::{Message, MessageDraft, MessagePage};
use parley_core::users::UserProfile;
use parley_store::UserRepo;
use serde::Serialize;

use super::{body, ok, Envelope};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::server::AppState;
use crate::validation::{validate_edit_text, validate_page_query, EditMessageRequest, PageQuery};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedRead {
    pub marked_count: u64,
}

/// `GET /api/messages/users`
pub async fn list_users(user: AuthUser, State(state): State<AppState>) -> ApiResult<Json<Vec<UserProfile>>> {
    let users = UserRepo::new(state.db.clone()).list_except(user.id())?;
    Ok(Json(users.iter().map(|u| u.profile()).collect()))
}

/// `GET /api/messages/unread/all`
pub async fn unread_counts(
    user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<BTreeMap<UserId, u64>>>> {
    Ok(ok(state.messages.unread_counts(user.id())?))
}

/// `GET /api/messages/{id}?page=&limit=`
pub async fn conversation(
    user: AuthUser,
    State(state): State<AppState>,
    Path(other): Path<UserId>,
    Query(query): Query<PageQuery>,
) -> ApiResult<Json<Envelope<MessagePage>>> {
    let (page, limit) = validate_page_query(&query)?;
    Ok(ok(state.messages.conversation(user.id(), &other, page, limit)?))
}

/// `POST /api/messages/send/{id}`
pub async fn send(
    user: AuthUser,
    State(state): State<AppState>,
    Path(receiver): Path<UserId>,
    payload: Result<Json<MessageDraft>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Message>)> {
    let draft = body(payload)?;
    let (message, _) = state.messages.send(user.id(), &receiver, &draft).await?;
    Ok((StatusCode::CREATED, Json(message)))
}

/// `PUT /api/messages/read/{id}`
pub async fn mark_read(
    user: AuthUser,
    State(state): State<AppState>,
    Path(sender): Path<UserId>,
) -> ApiResult<Json<Envelope<MarkedRead>>> {
    let marked_count = state.messages.mark_read(user.id(), &sender)?;
    Ok(ok(MarkedRead { marked_count }))
}

/// `PUT /api/messages/edit/{id}`
pub async fn edit(
    user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<Message>>> {
    let text = validate_edit_text(body(payload)?)?;
    Ok(ok(state.messages.edit(user.id(), &message_id, &text)?))
}

/// `DELETE /api/messages/{id}`
pub async fn delete(
    user: AuthUser,
    State(state): State<AppState>,
    Path(message_id): Path<MessageId>,
) -> ApiResult<Json<Envelope<Message>>> {
    Ok(ok(state.messages.delete(user.id(), &message_id)?))
}
