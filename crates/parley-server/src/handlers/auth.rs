//! `/api/auth/*`

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use parley_core::users::UserProfile;
use parley_store::{UserRepo, UserRow};
use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::body;
use crate::auth::{clear_session_cookie, hash_password, session_cookie, verify_password, AuthUser};
use crate::error::{ApiError, ApiResult};
use crate::server::AppState;
use crate::validation::{
    validate_login, validate_profile_pic, validate_signup, LoginRequest, SignupRequest,
    UpdateProfileRequest,
};

/// A user profile plus the session token that was just issued.
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub user: UserProfile,
    pub token: String,
}

fn start_session(state: &AppState, jar: CookieJar, user: &UserRow) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let token = state.tokens.issue(&user.id)?;
    let jar = jar.add(session_cookie(token.clone(), state.config.auth.cookie_secure));
    Ok((
        jar,
        Json(SessionResponse {
            user: user.profile(),
            token,
        }),
    ))
}

/// `POST /api/auth/signup`
pub async fn signup(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<SignupRequest>, JsonRejection>,
) -> ApiResult<(StatusCode, CookieJar, Json<SessionResponse>)> {
    let signup = validate_signup(body(payload)?)?;
    let hash = hash_password(&signup.password)?;
    let user = UserRepo::new(state.db.clone()).create(&signup.full_name, &signup.email, &hash)?;
    info!(user_id = %user.id, "user signed up");

    let (jar, response) = start_session(&state, jar, &user)?;
    Ok((StatusCode::CREATED, jar, response))
}

/// `POST /api/auth/login`
pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<LoginRequest>, JsonRejection>,
) -> ApiResult<(CookieJar, Json<SessionResponse>)> {
    let login = validate_login(body(payload)?)?;
    let invalid = || ApiError::BadRequest("Invalid credentials".into());

    let user = UserRepo::new(state.db.clone())
        .find_by_email(&login.email)?
        .ok_or_else(invalid)?;
    if !verify_password(&login.password, &user.password_hash) {
        return Err(invalid());
    }
    info!(user_id = %user.id, "user logged in");
    start_session(&state, jar, &user)
}

/// `POST /api/auth/logout`
pub async fn logout(jar: CookieJar) -> (CookieJar, Json<Value>) {
    (
        jar.add(clear_session_cookie()),
        Json(json!({ "message": "Logged out successfully" })),
    )
}

/// `PUT /api/auth/update-profile`
pub async fn update_profile(
    user: AuthUser,
    State(state): State<AppState>,
    payload: Result<Json<UpdateProfileRequest>, JsonRejection>,
) -> ApiResult<Json<UserProfile>> {
    let pic = validate_profile_pic(body(payload)?)?;
    let url = state.messages.resolve_image(&pic).await?;
    let updated = UserRepo::new(state.db.clone()).update_profile_pic(user.id(), &url)?;
    info!(user_id = %updated.id, "profile picture updated");
    Ok(Json(updated.profile()))
}

/// `GET /api/auth/check`
pub async fn check(user: AuthUser) -> Json<UserProfile> {
    Json(user.0.profile())
}
