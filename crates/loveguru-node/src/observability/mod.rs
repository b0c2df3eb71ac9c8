//! # Observability Module
//!
//! - **Structured Logging**: pretty or JSON logs via `tracing-subscriber`
//! - **Prometheus Metrics**: hub connection and delivery counters
//!
//! ## Usage
//!
//! ```rust,ignore
//! use loveguru_node::observability::{init_logging, LogFormat, MetricsState};
//!
//! init_logging("info", LogFormat::Json);
//! let metrics = MetricsState::new();
//! ```

mod logging;
mod metrics;

pub use logging::{init_logging, LogFormat};
pub use metrics::{MetricsState, ShardLabels};
