//! Request body and query validation.

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::error::{ApiError, FieldError};

/// Longest accepted display name.
pub const MAX_FULL_NAME_LENGTH: usize = 100;
pub const MIN_PASSWORD_LENGTH: usize = 6;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

static EMAIL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").unwrap());

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    pub full_name: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub profile_pic: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct EditMessageRequest {
    pub text: Option<String>,
}

/// Raw `?page=&limit=` query. Kept as strings so bad input becomes a
/// validation error instead of an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Signup {
    pub full_name: String,
    pub email: String,
    pub password: String,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Login {
    pub email: String,
    pub password: String,
}

fn fail(details: Vec<FieldError>) -> ApiError {
    ApiError::Validation { details }
}

fn check_email(email: Option<&str>, details: &mut Vec<FieldError>) -> String {
    match email.map(str::trim) {
        None => {
            details.push(FieldError::new("email", "Email is required"));
            String::new()
        }
        Some(e) if !EMAIL_PATTERN.is_match(e) => {
            details.push(FieldError::new("email", "Invalid email format"));
            String::new()
        }
        Some(e) => e.to_lowercase(),
    }
}

pub fn validate_signup(req: SignupRequest) -> Result<Signup, ApiError> {
    let mut details = Vec::new();

    let full_name = req.full_name.unwrap_or_default().trim().to_string();
    if full_name.is_empty() {
        details.push(FieldError::new("fullName", "Full name cannot be empty"));
    } else if full_name.chars().count() > MAX_FULL_NAME_LENGTH {
        details.push(FieldError::new("fullName", "Full name is too long"));
    }

    let email = check_email(req.email.as_deref(), &mut details);

    let password = req.password.unwrap_or_default();
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        details.push(FieldError::new(
            "password",
            format!("Password must be at least {MIN_PASSWORD_LENGTH} characters"),
        ));
    }

    if !details.is_empty() {
        return Err(fail(details));
    }
    Ok(Signup {
        full_name,
        email,
        password,
    })
}

pub fn validate_login(req: LoginRequest) -> Result<Login, ApiError> {
    let mut details = Vec::new();
    let email = check_email(req.email.as_deref(), &mut details);
    let password = req.password.unwrap_or_default();
    if password.is_empty() {
        details.push(FieldError::new("password", "Password is required"));
    }
    if !details.is_empty() {
        return Err(fail(details));
    }
    Ok(Login { email, password })
}

/// `profilePic` must be present; URL vs data URI is decided by [`classify_image`].
pub fn validate_profile_pic(req: UpdateProfileRequest) -> Result<String, ApiError> {
    match req.profile_pic.map(|p| p.trim().to_string()) {
        Some(pic) if !pic.is_empty() => Ok(pic),
        _ => Err(fail(vec![FieldError::new(
            "profilePic",
            "Profile pic is required",
        )])),
    }
}

/// Trimmed, non-empty replacement text for an edit.
pub fn validate_edit_text(req: EditMessageRequest) -> Result<String, ApiError> {
    match req.text.as_deref().map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text.to_string()),
        Some(_) => Err(ApiError::BadRequest("Message text cannot be empty".into())),
        None => Err(fail(vec![FieldError::new("text", "Text is required")])),
    }
}

/// Parse `page` (default 1, > 0) and `limit` (default 20, 1..=100).
pub fn validate_page_query(query: &PageQuery) -> Result<(u32, u32), ApiError> {
    let mut details = Vec::new();

    let page = match query.page.as_deref().filter(|p| !p.is_empty()) {
        None => DEFAULT_PAGE,
        Some(raw) => match raw.parse::<u32>() {
            Ok(p) if p > 0 => p,
            _ => {
                details.push(FieldError::new("page", "Page must be greater than 0"));
                0
            }
        },
    };

    let limit = match query.limit.as_deref().filter(|l| !l.is_empty()) {
        None => DEFAULT_PAGE_LIMIT,
        Some(raw) => match raw.parse::<u32>() {
            Ok(l) if (1..=MAX_PAGE_LIMIT).contains(&l) => l,
            _ => {
                details.push(FieldError::new(
                    "limit",
                    format!("Limit must be between 1 and {MAX_PAGE_LIMIT}"),
                ));
                0
            }
        },
    };

    if !details.is_empty() {
        return Err(fail(details));
    }
    Ok((page, limit))
}

/// Where an image reference points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource<'a> {
    /// Already hosted; stored as-is.
    Url(&'a str),
    /// Inline `data:` URI that must be uploaded first.
    DataUri(&'a str),
}

pub fn classify_image(image: &str) -> Result<ImageSource<'_>, ApiError> {
    if image.starts_with("http://") || image.starts_with("https://") {
        Ok(ImageSource::Url(image))
    } else if image.starts_with("data:") {
        Ok(ImageSource::DataUri(image))
    } else {
        Err(ApiError::BadRequest(
            "Invalid image format. Expected URL or base64 data.".into(),
        ))
    }
}
