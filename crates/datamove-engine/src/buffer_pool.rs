//! Fixed-size buffer pools shared by every in-flight chunk.
//!
//! ## Architecture
//!
//! A [`BufferPool`] hands out blocks of exactly one size. Its capacity is a
//! semaphore: `lease()` suspends until a permit is free, then reuses a block
//! from the free list or allocates a new one. A [`Buffer`] gives its block
//! back and releases its permit when dropped, so error and cancellation
//! paths return memory without any explicit bookkeeping.
//!
//! ```text
//! lease() ──► Semaphore (capacity permits) ──► free list ──► allocate
//!                 ▲                                 ▲
//!                 └──────── Buffer::drop ───────────┘
//! ```
//!
//! [`BufferPools`] keeps one pool per size class (large blocks for bulk
//! chunk I/O, small blocks for short chunks) so sizes never mix in a pool.

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use datamove_core::config::TransferConfig;
use datamove_core::ports::IMemoryProbe;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::{Result, TransferError};

// ============================================================================
// BufferPool
// ============================================================================

struct PoolInner {
    block_size: usize,
    capacity: usize,
    permits: Arc<Semaphore>,
    free: Mutex<Vec<Box<[u8]>>>,
    allocated: AtomicUsize,
}

impl PoolInner {
    fn take_block(&self) -> Result<Box<[u8]>> {
        let recycled = self
            .free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        if let Some(block) = recycled {
            return Ok(block);
        }

        let mut block = Vec::new();
        block
            .try_reserve_exact(self.block_size)
            .map_err(|_| TransferError::BufferAllocation {
                size: self.block_size,
            })?;
        block.resize(self.block_size, 0);
        self.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(block.into_boxed_slice())
    }

    fn give_back(&self, block: Box<[u8]>) {
        self.free
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(block);
    }
}

/// Pool of equally sized blocks with a hard cap on blocks in use
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Create a pool for `block_size`-byte blocks
    ///
    /// See [`BufferPool::capacity_for`] for how the capacity is derived.
    pub fn new(
        block_size: usize,
        memory_budget: u64,
        min_blocks: usize,
        probe: Option<&dyn IMemoryProbe>,
    ) -> Result<Self> {
        if block_size == 0 {
            return Err(TransferError::InvalidOptions(
                "buffer block size must be greater than 0".into(),
            ));
        }
        let available = probe.and_then(|p| p.available_bytes());
        let capacity = Self::capacity_for(block_size, memory_budget, min_blocks, available);

        tracing::debug!(block_size, capacity, memory_budget, ?available, "Buffer pool created");

        Ok(Self {
            inner: Arc::new(PoolInner {
                block_size,
                capacity,
                permits: Arc::new(Semaphore::new(capacity)),
                free: Mutex::new(Vec::new()),
                allocated: AtomicUsize::new(0),
            }),
        })
    }

    /// Blocks the pool may hand out at once
    ///
    /// `memory_budget / block_size`, raised to `min_blocks`, then lowered
    /// (never raised) to what `available` memory can hold. Always at least 1.
    pub fn capacity_for(
        block_size: usize,
        memory_budget: u64,
        min_blocks: usize,
        available: Option<u64>,
    ) -> usize {
        let block = block_size.max(1) as u64;
        let by_budget = usize::try_from(memory_budget / block).unwrap_or(usize::MAX);
        let mut capacity = by_budget.max(min_blocks);

        if let Some(available) = available {
            if available < memory_budget {
                let by_memory = usize::try_from(available / block).unwrap_or(usize::MAX);
                capacity = capacity.min(by_memory);
            }
        }

        capacity.clamp(1, Semaphore::MAX_PERMITS)
    }

    /// Lease a block, suspending while the pool is exhausted
    pub async fn lease(&self) -> Result<Buffer> {
        let permit = self
            .inner
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransferError::InvalidOptions("buffer pool closed".into()))?;
        self.fill(permit)
    }

    /// Lease a block only if one is free right now
    pub fn try_lease(&self) -> Option<Result<Buffer>> {
        match self.inner.permits.clone().try_acquire_owned() {
            Ok(permit) => Some(self.fill(permit)),
            Err(TryAcquireError::NoPermits) => None,
            Err(TryAcquireError::Closed) => {
                Some(Err(TransferError::InvalidOptions("buffer pool closed".into())))
            }
        }
    }

    fn fill(&self, permit: OwnedSemaphorePermit) -> Result<Buffer> {
        // On allocation failure the permit drops here and the slot is freed.
        let block = self.inner.take_block()?;
        Ok(Buffer {
            block: Some(block),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    pub fn block_size(&self) -> usize {
        self.inner.block_size
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Blocks currently leased
    pub fn in_use(&self) -> usize {
        self.inner.capacity - self.inner.permits.available_permits()
    }

    /// Blocks ever allocated; bounded by capacity because blocks are recycled
    pub fn allocated(&self) -> usize {
        self.inner.allocated.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("block_size", &self.block_size())
            .field("capacity", &self.capacity())
            .field("in_use", &self.in_use())
            .finish()
    }
}

// ============================================================================
// Buffer
// ============================================================================

/// A leased block; returns to its pool when dropped
pub struct Buffer {
    block: Option<Box<[u8]>>,
    pool: Arc<PoolInner>,
    _permit: OwnedSemaphorePermit,
}

impl Buffer {
    /// Return the block now instead of at end of scope
    pub fn release(self) {
        drop(self);
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        self.block.as_deref().unwrap_or(&[])
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        self.block.as_deref_mut().unwrap_or(&mut [])
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        // The permit field drops after this, so the block is back on the
        // free list before a waiter can take the permit.
        if let Some(block) = self.block.take() {
            self.pool.give_back(block);
        }
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer").field("len", &self.len()).finish()
    }
}

// ============================================================================
// BufferPools
// ============================================================================

/// One pool per block-size class
///
/// Routing is by lease size alone. The small class serves every lease of
/// at most `small_block_size` bytes, data chunks included: small objects,
/// short final chunks and jobs with a chunk size below `small_block_size`
/// all draw from it. Leases up to `block_size` come from the large class;
/// anything bigger is rejected.
#[derive(Clone, Debug)]
pub struct BufferPools {
    large: BufferPool,
    small: BufferPool,
}

impl BufferPools {
    pub fn new(large: BufferPool, small: BufferPool) -> Self {
        Self { large, small }
    }

    /// Build both pools from transfer settings
    ///
    /// The large pool is floored at `parallelism` blocks so every execution
    /// slot can hold one.
    pub fn from_config(config: &TransferConfig, probe: Option<&dyn IMemoryProbe>) -> Result<Self> {
        let to_usize = |v: u64, field: &str| {
            usize::try_from(v)
                .map_err(|_| TransferError::InvalidOptions(format!("{field} does not fit in memory")))
        };
        let large = BufferPool::new(
            to_usize(config.block_size, "transfer.block_size")?,
            config.memory_budget,
            config.parallelism,
            probe,
        )?;
        let small = BufferPool::new(
            to_usize(config.small_block_size, "transfer.small_block_size")?,
            config.small_memory_budget,
            1,
            probe,
        )?;
        Ok(Self { large, small })
    }

    /// Pool whose blocks fit `size` bytes, smallest class first
    pub fn pool_for(&self, size: u64) -> Result<&BufferPool> {
        if size <= self.small.block_size() as u64 {
            Ok(&self.small)
        } else if size <= self.large.block_size() as u64 {
            Ok(&self.large)
        } else {
            Err(TransferError::InvalidOptions(format!(
                "chunk of {size} bytes exceeds block size {}",
                self.large.block_size()
            )))
        }
    }

    /// Lease a block of at least `size` bytes
    pub async fn lease(&self, size: u64) -> Result<Buffer> {
        self.pool_for(size)?.lease().await
    }

    pub fn large(&self) -> &BufferPool {
        &self.large
    }

    pub fn small(&self) -> &BufferPool {
        &self.small
    }

    /// Largest chunk a lease can serve
    pub fn max_block_size(&self) -> u64 {
        self.large.block_size() as u64
    }
}
