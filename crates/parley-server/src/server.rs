//! Axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::DefaultBodyLimit;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderValue, Method};
use axum::routing::{get, post, put};
use axum::Router;
use parley_store::Database;
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::auth::TokenService;
use crate::config::{ParleyConfig, ServerConfig};
use crate::handlers::{auth, health, messages, upload};
use crate::images::{CloudinaryHost, ImageHost};
use crate::messaging::MessageService;
use crate::router::EventRouter;
use crate::shutdown::ShutdownCoordinator;
use crate::websocket::gateway::ws_handler;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ParleyConfig>,
    pub db: Database,
    pub router: Arc<EventRouter>,
    pub tokens: Arc<TokenService>,
    pub images: Arc<dyn ImageHost>,
    pub messages: Arc<MessageService>,
    pub shutdown: Arc<ShutdownCoordinator>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: ParleyConfig, db: Database, images: Arc<dyn ImageHost>) -> Self {
        let router = Arc::new(EventRouter::new());
        let tokens = Arc::new(TokenService::new(
            &config.auth.jwt_secret,
            config.auth.token_ttl_secs,
        ));
        let messages = Arc::new(MessageService::new(
            db.clone(),
            Arc::clone(&router),
            Arc::clone(&images),
        ));
        Self {
            config: Arc::new(config),
            db,
            router,
            tokens,
            images,
            messages,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            start_time: Instant::now(),
        }
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        return CorsLayer::permissive();
    }
    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_credentials(true)
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    let auth_routes = Router::new()
        .route("/signup", post(auth::signup))
        .route("/login", post(auth::login))
        .route("/logout", post(auth::logout))
        .route("/update-profile", put(auth::update_profile))
        .route("/check", get(auth::check));

    let message_routes = Router::new()
        .route("/users", get(messages::list_users))
        .route("/unread/all", get(messages::unread_counts))
        .route("/send/{id}", post(messages::send))
        .route("/read/{id}", put(messages::mark_read))
        .route("/edit/{id}", put(messages::edit))
        .route("/{id}", get(messages::conversation).delete(messages::delete));

    let api = Router::new()
        .nest("/auth", auth_routes)
        .nest("/messages", message_routes)
        .route("/upload/signature", get(upload::signature))
        .route("/health", get(health::health));

    let server = &state.config.server;
    Router::new()
        .nest("/api", api)
        .route("/ws", get(ws_handler))
        .layer(DefaultBodyLimit::max(server.max_body_bytes))
        .layer(cors_layer(server))
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// A running server. Dropping it leaves the server running; call
/// [`ServerHandle::shutdown`] to stop it.
pub struct ServerHandle {
    pub addr: SocketAddr,
    pub state: AppState,
    server: JoinHandle<()>,
}

impl ServerHandle {
    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Stop accepting, close push sessions and wait for the listener to exit.
    pub async fn shutdown(self) {
        let coordinator = Arc::clone(&self.state.shutdown);
        coordinator.track(self.server);
        if coordinator.graceful_shutdown(None).await {
            info!("server stopped");
        }
    }
}

/// Start the server with the Cloudinary image host from `config`.
pub async fn start(config: ParleyConfig, db: Database) -> Result<ServerHandle, std::io::Error> {
    let images: Arc<dyn ImageHost> = Arc::new(CloudinaryHost::new(config.images.clone()));
    start_with_state(AppState::new(config, db, images)).await
}

/// Bind and serve `state`. Port 0 picks a free port.
pub async fn start_with_state(state: AppState) -> Result<ServerHandle, std::io::Error> {
    let config = &state.config;
    if config.auth.uses_dev_secret() {
        warn!("using the built-in development JWT secret; set PARLEY_AUTH__JWT_SECRET");
    }
    if !config.images.is_configured() {
        info!("image host not configured, image uploads disabled");
    }

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    let app = build_router(state.clone());
    let token = state.shutdown.token();
    let server = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(token.cancelled_owned())
            .await
        {
            warn!(error = %e, "server exited with error");
        }
    });

    info!(addr = %local_addr, "parley server started");
    Ok(ServerHandle {
        addr: local_addr,
        state,
        server,
    })
}
