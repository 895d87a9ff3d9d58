//! Allocator facade for navigation memory
//!
//! Graphs, edge stores and search-state pools never call the global
//! allocator directly. They receive a [`SharedAllocator`] at construction
//! and route every block through it, tagged with an [`AllocHint`]. Tests
//! substitute a [`TrackingAllocator`] to observe exactly which blocks were
//! released, or a [`FailingAllocator`] to inject exhaustion.

use std::alloc::Layout;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ptr::NonNull;
use std::sync::{Arc, Mutex, MutexGuard};

/// Allocation category hint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub enum AllocHint {
    /// Memory that lives until the owning structure is reinitialized or dropped
    Perm,
    /// Scratch memory for the duration of a single operation
    Temp,
}

impl fmt::Display for AllocHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocHint::Perm => write!(f, "permanent"),
            AllocHint::Temp => write!(f, "temporary"),
        }
    }
}

/// Pluggable allocation service used by every navigation structure
pub trait NavAllocator: Send + Sync + fmt::Debug {
    /// Allocates a zero-filled block for `layout`.
    ///
    /// Returns `None` when the allocator is exhausted. `layout.size()` is
    /// never zero; zero-sized buffers do not reach the facade.
    fn allocate(&self, layout: Layout, hint: AllocHint) -> Option<NonNull<u8>>;

    /// Releases a block previously returned by [`allocate`](Self::allocate).
    ///
    /// # Safety
    ///
    /// `ptr` must come from `allocate` on this same allocator with the same
    /// `layout`, and must not have been released already.
    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout, hint: AllocHint);
}

/// Shared handle to an allocator implementation
pub type SharedAllocator = Arc<dyn NavAllocator>;

/// Returns a handle to the global system allocator
pub fn default_allocator() -> SharedAllocator {
    Arc::new(SystemAllocator)
}

/// Allocator backed by the Rust global allocator
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

impl NavAllocator for SystemAllocator {
    fn allocate(&self, layout: Layout, _hint: AllocHint) -> Option<NonNull<u8>> {
        debug_assert!(layout.size() != 0);
        // SAFETY: the facade contract excludes zero-sized layouts.
        NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout, _hint: AllocHint) {
        // SAFETY: forwarded from the caller's contract.
        unsafe { std::alloc::dealloc(ptr.as_ptr(), layout) }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One allocation or release observed by a [`TrackingAllocator`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocEvent {
    Allocate {
        addr: usize,
        size: usize,
        hint: AllocHint,
    },
    Release {
        addr: usize,
        size: usize,
        hint: AllocHint,
    },
}

impl AllocEvent {
    /// Address of the block the event refers to
    pub fn addr(&self) -> usize {
        match *self {
            AllocEvent::Allocate { addr, .. } | AllocEvent::Release { addr, .. } => addr,
        }
    }

    pub fn is_release(&self) -> bool {
        matches!(self, AllocEvent::Release { .. })
    }
}

/// Counters maintained by a [`TrackingAllocator`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AllocStats {
    /// Number of successful allocations
    pub allocations: usize,
    /// Number of releases forwarded to the inner allocator
    pub releases: usize,
    /// Blocks currently allocated
    pub live_blocks: usize,
    /// Bytes currently allocated
    pub live_bytes: usize,
    /// Highest value `live_bytes` has reached
    pub peak_bytes: usize,
    /// Allocations tagged [`AllocHint::Perm`]
    pub perm_allocations: usize,
    /// Allocations tagged [`AllocHint::Temp`]
    pub temp_allocations: usize,
    /// Releases of blocks that were not live (swallowed, never forwarded)
    pub double_releases: usize,
}

#[derive(Debug, Default)]
struct TrackingState {
    live: HashMap<usize, usize>,
    released: HashSet<usize>,
    events: Vec<AllocEvent>,
    stats: AllocStats,
}

/// Allocator wrapper that records every block it hands out and takes back
///
/// Releases of unknown or already-released blocks are counted in
/// [`AllocStats::double_releases`] and are not forwarded to the inner
/// allocator.
#[derive(Debug)]
pub struct TrackingAllocator {
    inner: SharedAllocator,
    state: Mutex<TrackingState>,
}

impl Default for TrackingAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackingAllocator {
    /// Creates a tracking allocator over the system allocator
    pub fn new() -> Self {
        Self::wrap(default_allocator())
    }

    /// Creates a tracking allocator that forwards to `inner`
    pub fn wrap(inner: SharedAllocator) -> Self {
        Self {
            inner,
            state: Mutex::new(TrackingState::default()),
        }
    }

    /// Snapshot of the counters
    pub fn stats(&self) -> AllocStats {
        lock(&self.state).stats
    }

    /// Every event recorded so far, in order
    pub fn events(&self) -> Vec<AllocEvent> {
        lock(&self.state).events.clone()
    }

    /// Forgets recorded events and released addresses, keeping live blocks
    pub fn clear_history(&self) {
        let mut state = lock(&self.state);
        state.events.clear();
        state.released.clear();
    }

    /// Whether a block at `addr` has ever been released
    pub fn was_released(&self, addr: usize) -> bool {
        lock(&self.state).released.contains(&addr)
    }

    /// Whether the block at `addr` is currently allocated
    pub fn is_live(&self, addr: usize) -> bool {
        lock(&self.state).live.contains_key(&addr)
    }

    /// Addresses of all live blocks
    pub fn live_blocks(&self) -> Vec<usize> {
        lock(&self.state).live.keys().copied().collect()
    }

    /// Position of the first release event for `addr`, if any
    pub fn release_order(&self, addr: usize) -> Option<usize> {
        lock(&self.state)
            .events
            .iter()
            .position(|e| e.is_release() && e.addr() == addr)
    }
}

impl NavAllocator for TrackingAllocator {
    fn allocate(&self, layout: Layout, hint: AllocHint) -> Option<NonNull<u8>> {
        let ptr = self.inner.allocate(layout, hint)?;
        let addr = ptr.as_ptr() as usize;
        let size = layout.size();

        let mut state = lock(&self.state);
        state.live.insert(addr, size);
        state.events.push(AllocEvent::Allocate { addr, size, hint });

        let stats = &mut state.stats;
        stats.allocations += 1;
        stats.live_blocks += 1;
        stats.live_bytes += size;
        stats.peak_bytes = stats.peak_bytes.max(stats.live_bytes);
        match hint {
            AllocHint::Perm => stats.perm_allocations += 1,
            AllocHint::Temp => stats.temp_allocations += 1,
        }

        Some(ptr)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout, hint: AllocHint) {
        let addr = ptr.as_ptr() as usize;
        {
            let mut state = lock(&self.state);
            if state.live.remove(&addr).is_none() {
                log::warn!("release of non-live block {addr:#x} ({} bytes)", layout.size());
                state.stats.double_releases += 1;
                return;
            }
            state.released.insert(addr);
            state.events.push(AllocEvent::Release {
                addr,
                size: layout.size(),
                hint,
            });
            state.stats.releases += 1;
            state.stats.live_blocks -= 1;
            state.stats.live_bytes -= layout.size();
        }

        // SAFETY: the block was live in this allocator, so it came from `inner`.
        unsafe { self.inner.release(ptr, layout, hint) }
    }
}

/// Allocator wrapper that starts failing after a budget of allocations
#[derive(Debug)]
pub struct FailingAllocator {
    inner: SharedAllocator,
    budget: Mutex<Option<usize>>,
    failures: Mutex<usize>,
}

impl FailingAllocator {
    /// Allows `budget` successful allocations, then fails every request
    pub fn fail_after(inner: SharedAllocator, budget: usize) -> Self {
        Self {
            inner,
            budget: Mutex::new(Some(budget)),
            failures: Mutex::new(0),
        }
    }

    /// Creates a wrapper that never fails until a budget is set
    pub fn unlimited(inner: SharedAllocator) -> Self {
        Self {
            inner,
            budget: Mutex::new(None),
            failures: Mutex::new(0),
        }
    }

    /// Replaces the remaining budget; `None` removes the limit
    pub fn set_budget(&self, budget: Option<usize>) {
        *lock(&self.budget) = budget;
    }

    /// Number of requests refused so far
    pub fn failures(&self) -> usize {
        *lock(&self.failures)
    }
}

impl NavAllocator for FailingAllocator {
    fn allocate(&self, layout: Layout, hint: AllocHint) -> Option<NonNull<u8>> {
        {
            let mut budget = lock(&self.budget);
            match budget.as_mut() {
                Some(0) => {
                    *lock(&self.failures) += 1;
                    return None;
                }
                Some(remaining) => *remaining -= 1,
                None => {}
            }
        }
        self.inner.allocate(layout, hint)
    }

    unsafe fn release(&self, ptr: NonNull<u8>, layout: Layout, hint: AllocHint) {
        // SAFETY: every block handed out came from `inner`.
        unsafe { self.inner.release(ptr, layout, hint) }
    }
}
