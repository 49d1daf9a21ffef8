//! Available-memory probe port

/// Reports how much memory the host can spare for transfer buffers
pub trait IMemoryProbe: Send + Sync {
    /// Bytes available, or `None` when unknown
    fn available_bytes(&self) -> Option<u64>;
}
