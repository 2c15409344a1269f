//! Flagnet HTTP server.
//!
//! Thin transport over the core:
//! - `POST /classify` - multipart upload (field `image`) → prediction or flag
//! - `GET /hint?attempt=N` - clamped hint lookup
//! - `GET /health`, `GET /status` - liveness and model metadata
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use flagnet::server::{create_router, AppState, ServerConfig};
//!
//! let config = ServerConfig::default().with_port(5000);
//! let state = Arc::new(AppState::new(config.clone(), classifier));
//! let listener = tokio::net::TcpListener::bind(config.addr).await?;
//! axum::serve(listener, create_router(state)).await?;
//! ```

mod config;
mod handlers;
mod state;

pub use config::ServerConfig;
pub use handlers::{create_router, health_check, IMAGE_FIELD};
pub use state::AppState;
