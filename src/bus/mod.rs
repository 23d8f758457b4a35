//! Distributed pub/sub message bus: codec-agnostic, pluggable transports, composable middleware.

pub mod bus_manager;
pub mod codec;
pub mod codecs;
pub mod dispatcher;
pub mod memory_transport;
pub mod message_bus;
pub mod middleware;
#[cfg(feature = "redis")]
pub mod redis_transport;
pub mod retry_queue;
pub mod subscription;
pub mod transport;
pub mod value;

pub use bus_manager::BusManager;
pub use codec::{Codec, SizeValidatingCodec};
pub use message_bus::MessageBus;
pub use subscription::Handler;
pub use transport::Transport;
pub use value::Value;
