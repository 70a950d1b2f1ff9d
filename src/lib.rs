//! Queue-mediated image generation
//!
//! An HTTP API publishes generation jobs to a message queue and waits for
//! the correlated reply of a decoupled worker, retrying lost or late
//! replies a bounded number of times. The worker calls the external image
//! API and always answers with a structured result or error.

pub mod api;
pub mod backend;
pub mod channel;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod logging;
pub mod worker;

pub use error::{AppError, Result};

use std::sync::Arc;

use channel::MessageChannel;
use dispatch::Dispatcher;

/// Application state shared across all handlers
pub struct AppState {
    pub settings: Arc<config::Settings>,
    pub channel: Arc<dyn MessageChannel>,
    pub dispatcher: Arc<Dispatcher>,
}
