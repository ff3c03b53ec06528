use crate::error_handling::types::StorageError;

/// Serialization capability required from anything persisted in a
/// [`DurableLog`](super::durable_log::DurableLog) or shipped to a collector.
///
/// The storage layer never looks inside the payload; the wire format belongs
/// to the implementor. `decode` builds a fresh instance from bytes previously
/// produced by `encode`.
pub trait Record: Sized + Send + Sync + 'static {
    fn encode(&self) -> Result<Vec<u8>, StorageError>;

    fn decode(data: &[u8]) -> Result<Self, StorageError>;
}

/// Largest payload a `u16` length prefix can describe.
pub const MAX_FRAME_LEN: usize = u16::MAX as usize;

/// Encodes `record` as the payload of a single length-prefixed frame.
pub fn encode_frame<R: Record>(record: &R) -> Result<Vec<u8>, StorageError> {
    let payload = record.encode()?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(StorageError::FrameTooLarge(payload.len()));
    }
    Ok(payload)
}
