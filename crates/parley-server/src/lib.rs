//! # parley-server
//!
//! Axum HTTP + WebSocket server for one-to-one chat.
//!
//! - REST surface under `/api` for auth, messages and uploads
//! - Push channel on `/ws` with presence, typing relay and heartbeat
//! - [`EventRouter`] as the single point that delivers events to live sessions

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod images;
pub mod messaging;
pub mod registry;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod validation;
pub mod websocket;

pub use config::ParleyConfig;
pub use error::{ApiError, ApiResult};
pub use router::{DeliveryResult, EventRouter};
pub use server::{build_router, start, start_with_state, AppState, ServerHandle};
