//! Shared byte buffer pool for Emberlink.
//!
//! Every packet that crosses a session boundary lives in a buffer borrowed
//! from a [`BufferPool`]: the producer copies its payload into one, the
//! queue carries it, the write pump encrypts it into another, and both go
//! back to the pool when dropped.
//!
//! # Size classes
//!
//! Buffers are grouped into power-of-two size classes between
//! [`PoolConfig::min_class`] and [`PoolConfig::max_class`]. A request is
//! served from the smallest class that fits, so the returned buffer may be
//! larger than asked for. Requests above the largest class get a fresh,
//! unpooled allocation. The pool never blocks and never fails.
//!
//! # Ownership
//!
//! A [`PooledBuffer`] is owned by exactly one component at a time and is
//! returned to its pool when dropped. [`BufferPool::put`] is the explicit
//! spelling of that drop. Because returning consumes the buffer, a double
//! return or a use after return does not compile.
//!
//! ```rust
//! use emberlink_pool::{BufferPool, PoolConfig};
//!
//! let pool = BufferPool::new(PoolConfig::default());
//! let mut buf = pool.get(100);
//! assert!(buf.capacity() >= 100);
//! buf.extend_from_slice(b"hello");
//! pool.put(buf);
//!
//! let stats = pool.stats();
//! assert_eq!(stats.gets, stats.puts);
//! ```

use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Sizing of the pool's free lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Capacity of the smallest size class, in bytes.
    pub min_class: usize,
    /// Capacity of the largest size class, in bytes. Larger requests are
    /// allocated fresh and freed on return.
    pub max_class: usize,
    /// Maximum number of idle buffers kept per class. Returns beyond this
    /// are freed.
    pub max_retained_per_class: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_class: 64,
            max_class: 64 * 1024,
            max_retained_per_class: 256,
        }
    }
}

impl PoolConfig {
    /// Rounds class bounds up to powers of two and makes sure
    /// `min_class <= max_class`.
    ///
    /// Called automatically by [`BufferPool::new`].
    pub fn validated(mut self) -> Self {
        self.min_class = self.min_class.max(1).next_power_of_two();
        self.max_class = self.max_class.max(1).next_power_of_two();
        if self.max_class < self.min_class {
            tracing::warn!(
                min_class = self.min_class,
                max_class = self.max_class,
                "pool max_class below min_class, raising it"
            );
            self.max_class = self.min_class;
        }
        self
    }

    /// Returns configuration problems, if any. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();
        if self.min_class == 0 {
            errors.push("pool min_class must be greater than 0".to_string());
        }
        if self.max_class < self.min_class {
            errors.push(format!(
                "pool max_class ({}) must be at least min_class ({})",
                self.max_class, self.min_class
            ));
        }
        if self.max_class > 16 * 1024 * 1024 {
            errors.push(format!(
                "pool max_class ({}) exceeds the 16 MiB limit",
                self.max_class
            ));
        }
        errors
    }
}

// ---------------------------------------------------------------------------
// Statistics
// ---------------------------------------------------------------------------

/// Point-in-time counters for a pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers handed out by [`BufferPool::get`].
    pub gets: u64,
    /// Buffers given back (explicitly or by drop).
    pub puts: u64,
    /// Gets served from a free list.
    pub hits: u64,
    /// Gets that had to allocate.
    pub misses: u64,
}

impl PoolStats {
    /// Buffers currently on loan.
    pub fn outstanding(&self) -> u64 {
        self.gets.saturating_sub(self.puts)
    }
}

#[derive(Default)]
struct Counters {
    gets: AtomicU64,
    puts: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

// ---------------------------------------------------------------------------
// BufferPool
// ---------------------------------------------------------------------------

struct SizeClass {
    capacity: usize,
    free: Mutex<Vec<Vec<u8>>>,
}

struct PoolInner {
    classes: Box<[SizeClass]>,
    min_shift: u32,
    max_retained: usize,
    counters: Counters,
}

impl PoolInner {
    /// Index of the smallest class able to hold `size` bytes.
    fn class_for_request(&self, size: usize) -> Option<usize> {
        let size = size.max(1).checked_next_power_of_two()?;
        let shift = size.trailing_zeros().max(self.min_shift);
        let idx = (shift - self.min_shift) as usize;
        (idx < self.classes.len()).then_some(idx)
    }

    /// Index of the largest class whose capacity fits inside `capacity`.
    fn class_for_return(&self, capacity: usize) -> Option<usize> {
        if capacity == 0 {
            return None;
        }
        let shift = usize::BITS - 1 - capacity.leading_zeros();
        if shift < self.min_shift {
            return None;
        }
        let idx = (shift - self.min_shift) as usize;
        // Oversized buffers are not retained.
        (idx < self.classes.len() && capacity < self.classes[idx].capacity * 2)
            .then_some(idx)
    }

    fn release(&self, mut buf: Vec<u8>) {
        self.counters.puts.fetch_add(1, Ordering::Relaxed);
        let Some(idx) = self.class_for_return(buf.capacity()) else {
            return;
        };
        buf.clear();
        let mut free = self.classes[idx].free.lock();
        if free.len() < self.max_retained {
            free.push(buf);
        }
    }
}

/// A concurrency-safe pool of reusable byte buffers.
///
/// Cloning is cheap and yields a handle to the same pool. The pool is meant
/// to be built once at startup and handed to every session.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Creates a pool with empty free lists.
    pub fn new(config: PoolConfig) -> Self {
        let config = config.validated();
        let min_shift = config.min_class.trailing_zeros();
        let max_shift = config.max_class.trailing_zeros();
        let classes = (min_shift..=max_shift)
            .map(|shift| SizeClass {
                capacity: 1usize << shift,
                free: Mutex::new(Vec::new()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        tracing::debug!(
            classes = classes.len(),
            min_class = config.min_class,
            max_class = config.max_class,
            "buffer pool created"
        );

        Self {
            inner: Arc::new(PoolInner {
                classes,
                min_shift,
                max_retained: config.max_retained_per_class,
                counters: Counters::default(),
            }),
        }
    }

    /// Checks out an empty buffer with capacity for at least `min_size`
    /// bytes.
    pub fn get(&self, min_size: usize) -> PooledBuffer {
        let inner = &self.inner;
        inner.counters.gets.fetch_add(1, Ordering::Relaxed);

        let buf = match inner.class_for_request(min_size) {
            Some(idx) => {
                let class = &inner.classes[idx];
                match class.free.lock().pop() {
                    Some(buf) => {
                        inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                        buf
                    }
                    None => {
                        inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                        Vec::with_capacity(class.capacity)
                    }
                }
            }
            None => {
                inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                Vec::with_capacity(min_size)
            }
        };

        PooledBuffer {
            buf,
            pool: Arc::clone(&self.inner),
        }
    }

    /// Checks out a buffer holding a copy of `data`.
    pub fn copy_from(&self, data: &[u8]) -> PooledBuffer {
        let mut buf = self.get(data.len());
        buf.extend_from_slice(data);
        buf
    }

    /// Returns a buffer to the pool. Equivalent to dropping it.
    pub fn put(&self, buffer: PooledBuffer) {
        debug_assert!(
            Arc::ptr_eq(&self.inner, &buffer.pool),
            "buffer returned to a pool it was not taken from"
        );
        drop(buffer);
    }

    /// Snapshot of the pool's counters.
    pub fn stats(&self) -> PoolStats {
        let c = &self.inner.counters;
        PoolStats {
            gets: c.gets.load(Ordering::Relaxed),
            puts: c.puts.load(Ordering::Relaxed),
            hits: c.hits.load(Ordering::Relaxed),
            misses: c.misses.load(Ordering::Relaxed),
        }
    }

    /// Number of idle buffers across all classes.
    pub fn available(&self) -> usize {
        self.inner.classes.iter().map(|c| c.free.lock().len()).sum()
    }

    /// Capacity of the largest pooled size class.
    pub fn max_class(&self) -> usize {
        self.inner.classes.last().map_or(0, |c| c.capacity)
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new(PoolConfig::default())
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("classes", &self.inner.classes.len())
            .field("stats", &self.stats())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// PooledBuffer
// ---------------------------------------------------------------------------

/// A byte buffer on loan from a [`BufferPool`].
///
/// Dereferences to `Vec<u8>`. Goes back to its pool on drop.
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<PoolInner>,
}

impl PooledBuffer {
    /// The buffer's bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl AsRef<[u8]> for PooledBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.buf
    }
}

impl fmt::Debug for PooledBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledBuffer")
            .field("len", &self.buf.len())
            .field("capacity", &self.buf.capacity())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_pool() -> BufferPool {
        BufferPool::new(PoolConfig {
            min_class: 64,
            max_class: 1024,
            max_retained_per_class: 2,
        })
    }

    #[test]
    fn test_validated_rounds_to_powers_of_two() {
        let cfg = PoolConfig {
            min_class: 100,
            max_class: 3000,
            max_retained_per_class: 1,
        }
        .validated();
        assert_eq!(cfg.min_class, 128);
        assert_eq!(cfg.max_class, 4096);
    }

    #[test]
    fn test_validated_raises_max_below_min() {
        let cfg = PoolConfig {
            min_class: 512,
            max_class: 64,
            max_retained_per_class: 1,
        }
        .validated();
        assert_eq!(cfg.max_class, 512);
    }

    #[test]
    fn test_validate_reports_inverted_bounds() {
        let cfg = PoolConfig {
            min_class: 512,
            max_class: 64,
            max_retained_per_class: 1,
        };
        assert_eq!(cfg.validate().len(), 1);
        assert!(PoolConfig::default().validate().is_empty());
    }

    #[test]
    fn test_get_rounds_up_to_class_capacity() {
        let pool = small_pool();
        let buf = pool.get(100);
        assert_eq!(buf.capacity(), 128);
        assert!(buf.is_empty());

        let tiny = pool.get(0);
        assert_eq!(tiny.capacity(), 64);
    }

    #[test]
    fn test_get_above_largest_class_allocates_unpooled() {
        let pool = small_pool();
        let buf = pool.get(5000);
        assert!(buf.capacity() >= 5000);
        drop(buf);
        // Oversized buffers are freed, not retained.
        assert_eq!(pool.available(), 0);
        assert_eq!(pool.stats().puts, 1);
    }

    #[test]
    fn test_put_then_get_reuses_buffer() {
        let pool = small_pool();
        let mut buf = pool.get(200);
        buf.extend_from_slice(b"stale");
        pool.put(buf);
        assert_eq!(pool.available(), 1);

        let again = pool.get(200);
        assert!(again.is_empty(), "returned buffers are cleared");
        let stats = pool.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[test]
    fn test_smaller_request_does_not_take_larger_class() {
        let pool = small_pool();
        pool.put(pool.get(1000));
        let buf = pool.get(10);
        assert_eq!(buf.capacity(), 64);
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_grown_buffer_returns_to_matching_class() {
        let pool = small_pool();
        let mut buf = pool.get(64);
        buf.extend_from_slice(&[0u8; 300]);
        let cap = buf.capacity();
        drop(buf);

        // Whatever capacity the Vec grew to, a request of that size
        // is now served from the free list.
        if cap <= 1024 {
            let _again = pool.get(cap / 2 + 1);
            assert_eq!(pool.stats().hits, 1);
        }
    }

    #[test]
    fn test_free_list_is_bounded() {
        let pool = small_pool();
        let bufs: Vec<_> = (0..5).map(|_| pool.get(64)).collect();
        drop(bufs);
        assert_eq!(pool.available(), 2);
        assert_eq!(pool.stats().puts, 5);
    }

    #[test]
    fn test_stats_outstanding_tracks_loans() {
        let pool = small_pool();
        let a = pool.get(10);
        let b = pool.copy_from(b"abc");
        assert_eq!(&b[..], b"abc");
        assert_eq!(pool.stats().outstanding(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.stats().outstanding(), 0);
    }

    #[test]
    fn test_clone_shares_free_lists() {
        let pool = small_pool();
        let other = pool.clone();
        other.put(other.get(64));
        assert_eq!(pool.available(), 1);
    }

    #[test]
    fn test_concurrent_get_put_balances() {
        let pool = BufferPool::default();
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for i in 0..1000 {
                        let mut buf = pool.get((t * 97 + i) % 4096);
                        buf.push(t as u8);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let stats = pool.stats();
        assert_eq!(stats.gets, 8000);
        assert_eq!(stats.gets, stats.puts);
    }
}
