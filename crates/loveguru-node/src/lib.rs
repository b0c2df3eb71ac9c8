//! # LoveGuru Node
//!
//! HTTP and WebSocket server exposing the real-time chat hub.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │                 LoveGuru Node                  │
//! ├───────────────────────────────────────────────┤
//! │  HTTP API Layer (axum)                         │
//! │  • /ws/chat            WebSocket chat          │
//! │  • /api/realtime/stats hub statistics          │
//! │  • /health, /health/ready                      │
//! │  • /metrics            Prometheus export       │
//! ├───────────────────────────────────────────────┤
//! │  HubManager (loveguru-realtime)                │
//! │  • session-sharded registries                  │
//! │  • message store / push notifier               │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! cargo run --bin loveguru-node -- --api-addr 127.0.0.1:8080
//! ```
//!
//! ## Modules
//!
//! - [`api`] - Application state and router assembly
//! - [`realtime_api`] - WebSocket chat endpoint and statistics
//! - [`config`] - Layered node configuration
//! - [`observability`] - Structured logging and Prometheus metrics
//! - [`health`] - Liveness and readiness endpoints
//!
//! ## Example: Creating an AppState
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use loveguru_node::api::{create_router, AppState};
//! use loveguru_realtime::{HubConfig, HubManager, InMemoryStore};
//!
//! # async fn run() -> Result<(), loveguru_realtime::RealtimeError> {
//! let config = HubConfig::default();
//! let origins = config.origin_policy();
//! let hubs = Arc::new(HubManager::start(config, Arc::new(InMemoryStore::new()), None)?);
//!
//! let app = create_router(AppState::new(hubs, origins));
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod config;
pub mod health;
pub mod observability;
pub mod realtime_api;
