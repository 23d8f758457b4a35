//! Concrete [`crate::bus::codec::Codec`] implementations.

mod json;
pub use json::JsonCodec;

#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
#[cfg_attr(docsrs, doc(cfg(feature = "msgpack")))]
pub use msgpack::MsgPackCodec;

mod base64_codec;
pub use base64_codec::Base64Codec;
