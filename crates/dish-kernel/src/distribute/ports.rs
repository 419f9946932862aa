//! Remote pipe port allocation.

use std::sync::atomic::{AtomicU32, Ordering};

use super::DistributeError;

/// First port handed out by a default allocator.
pub const DEFAULT_BASE_PORT: u16 = 58000;

/// Monotonic port counter. Values are never reused for the lifetime of the
/// allocator, so a long-running daemon eventually runs out.
#[derive(Debug)]
pub struct PortAllocator {
    next: AtomicU32,
}

impl PortAllocator {
    pub fn new(base: u16) -> Self {
        Self {
            next: AtomicU32::new(u32::from(base)),
        }
    }

    /// Hand out the next port.
    pub fn next_port(&self) -> Result<u16, DistributeError> {
        let port = self.next.fetch_add(1, Ordering::SeqCst);
        u16::try_from(port).map_err(|_| DistributeError::PortsExhausted)
    }
}

impl Default for PortAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_PORT)
    }
}
