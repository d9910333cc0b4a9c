//! `/api/upload/*`

use axum::extract::State;
use axum::Json;

use super::{ok, Envelope};
use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::images::UploadSignature;
use crate::server::AppState;

/// `GET /api/upload/signature`: parameters for a signed direct upload.
pub async fn signature(
    _user: AuthUser,
    State(state): State<AppState>,
) -> ApiResult<Json<Envelope<UploadSignature>>> {
    let timestamp = chrono::Utc::now().timestamp();
    Ok(ok(state.images.upload_signature(timestamp)?))
}
