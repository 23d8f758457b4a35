//! Transport-wrapping middleware, composed outer-to-inner as `retry( integrity( compression( base ) ) )`.

pub mod compression;
pub mod integrity;
pub mod retry;

pub use compression::CompressionMiddleware;
pub use integrity::{Base64Middleware, HmacMiddleware};
pub use retry::RetryMiddleware;
