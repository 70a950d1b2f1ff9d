//! Channel module - message transport between the dispatch core and workers

pub mod amqp;
pub mod memory;
pub mod traits;

pub use amqp::AmqpChannel;
pub use memory::InMemoryChannel;
pub use traits::{ChannelError, MessageChannel, MessageHandler, RpcRequest, Subscription};

use std::sync::Arc;

use crate::config::BrokerConfig;
use crate::error::{AppError, Result};

/// Build the channel selected by the broker configuration.
///
/// The returned handle is not connected yet.
pub fn from_config(config: &BrokerConfig) -> Result<Arc<dyn MessageChannel>> {
    match config.kind.as_str() {
        "amqp" => Ok(Arc::new(AmqpChannel::new(config.url.clone(), config.prefetch))),
        "memory" => Ok(Arc::new(InMemoryChannel::new())),
        other => Err(AppError::InvalidRequest(format!(
            "unsupported broker kind '{}'",
            other
        ))),
    }
}
