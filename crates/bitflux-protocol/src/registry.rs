//! Explicit wire serialization for user types.
//!
//! Instead of reflecting over user objects, applications implement
//! [`WireSerialize`] for each type they send and register it under a small
//! numeric id. The registry prefixes every value with its id (var-int), so
//! the receiving side can dispatch to the right reader without knowing the
//! type up front.

use std::{any::Any, collections::HashMap, marker::PhantomData};

use bitflux_core::{
    bit_buffer::BitBuffer,
    error::{ErrorKind, Result},
};

/// A type that can be written to and read from a bit buffer.
pub trait WireSerialize {
    /// Writes the value.
    fn write_to(&self, buffer: &mut BitBuffer);
    /// Reads a value.
    fn read_from(buffer: &mut BitBuffer) -> Result<Self>
    where
        Self: Sized;
}

trait ErasedCodec: Send + Sync {
    fn encode(&self, value: &dyn Any, buffer: &mut BitBuffer) -> Result<()>;
    fn decode(&self, buffer: &mut BitBuffer) -> Result<Box<dyn Any>>;
}

struct Codec<T>(PhantomData<fn() -> T>);

impl<T: WireSerialize + Any + Send + Sync> ErasedCodec for Codec<T> {
    fn encode(&self, value: &dyn Any, buffer: &mut BitBuffer) -> Result<()> {
        let value = value
            .downcast_ref::<T>()
            .ok_or(ErrorKind::InvalidState("value does not match registered type"))?;
        value.write_to(buffer);
        Ok(())
    }

    fn decode(&self, buffer: &mut BitBuffer) -> Result<Box<dyn Any>> {
        Ok(Box::new(T::read_from(buffer)?))
    }
}

/// Maps numeric type ids to encode/decode pairs.
#[derive(Default)]
pub struct TypeRegistry {
    codecs: HashMap<u32, Box<dyn ErasedCodec>>,
}

impl TypeRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` under `type_id`. Re-registering an id replaces the
    /// previous entry.
    pub fn register<T: WireSerialize + Any + Send + Sync>(&mut self, type_id: u32) {
        self.codecs.insert(type_id, Box::new(Codec::<T>(PhantomData)));
    }

    /// Writes `type_id` followed by the value.
    pub fn encode<T: Any>(&self, type_id: u32, value: &T, buffer: &mut BitBuffer) -> Result<()> {
        let codec = self
            .codecs
            .get(&type_id)
            .ok_or(ErrorKind::InvalidState("type id not registered"))?;
        buffer.write_var_u32(type_id);
        codec.encode(value, buffer)
    }

    /// Reads the id prefix and decodes the value behind it.
    pub fn decode(&self, buffer: &mut BitBuffer) -> Result<(u32, Box<dyn Any>)> {
        let type_id = buffer.read_var_u32()?;
        let codec = self
            .codecs
            .get(&type_id)
            .ok_or(ErrorKind::InvalidState("type id not registered"))?;
        Ok((type_id, codec.decode(buffer)?))
    }
}
