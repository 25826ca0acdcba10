//! Reply decoders.
//!
//! The caller picks the decoder per type and passes it explicitly, so
//! every typed query and subscription is checked at compile time with
//! no runtime type inspection.

use core::fmt;
use core::marker::PhantomData;

use serde::de::DeserializeOwned;

use crate::error::DecodeError;

/// Turns one raw reply into a `T`.
pub trait Decoder<T>: Send + Sync {
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError>;
}

impl<T, F> Decoder<T> for F
where
    F: Fn(&[u8]) -> Result<T, DecodeError> + Send + Sync,
{
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        self(bytes)
    }
}

/// JSON via serde.
pub struct JsonDecoder<T>(PhantomData<fn() -> T>);

impl<T> JsonDecoder<T> {
    pub const fn new() -> Self {
        Self(PhantomData)
    }
}

impl<T> Default for JsonDecoder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonDecoder<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonDecoder<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "JsonDecoder<{}>", core::any::type_name::<T>())
    }
}

impl<T: DeserializeOwned> Decoder<T> for JsonDecoder<T> {
    fn decode(&self, bytes: &[u8]) -> Result<T, DecodeError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// The reply as UTF-8 text.
#[derive(Debug, Clone, Copy, Default)]
pub struct Utf8Decoder;

impl Decoder<String> for Utf8Decoder {
    fn decode(&self, bytes: &[u8]) -> Result<String, DecodeError> {
        String::from_utf8(bytes.to_vec()).map_err(|e| DecodeError::new(e.to_string()))
    }
}
