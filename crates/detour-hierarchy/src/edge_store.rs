//! Flat edge storage owned by a graph
//!
//! Every graph keeps one arena for inter-node edges and one for intra-node
//! portal entries. Nodes refer to their edges through [`EdgeSpan`] index
//! ranges, never through pointers, so releasing a graph's edge memory is a
//! single arena reset rather than one free per node.

use glam::Vec3;
use nav_common::{AllocHint, Error, NavBuffer, Result, SharedAllocator};

/// Smallest arena block allocated on first use
const MIN_ARENA_SLOTS: usize = 8;

/// Connection from a node to another node of the same graph
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct Edge {
    /// Index of the target node
    pub target: u32,
    /// Waypoint where the edge crosses into the target node
    pub pos: Vec3,
    /// Caller-defined integer tags carried with the edge
    pub tags: [i32; 2],
}

/// Portal-to-portal connection inside a single node
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(
    feature = "serialization",
    derive(serde::Serialize, serde::Deserialize)
)]
pub struct IntraEdge {
    /// Traversal cost between the two portals
    pub cost: f32,
    /// Whether the portals are connected at all
    pub connected: bool,
}

/// Range of arena slots reserved for one node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EdgeSpan {
    /// First slot in the arena
    pub start: u32,
    /// Slots in use
    pub len: u32,
    /// Slots reserved
    pub cap: u32,
}

impl EdgeSpan {
    pub fn is_full(&self) -> bool {
        self.len >= self.cap
    }

    fn range(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.len) as usize
    }

    fn reserved(&self) -> std::ops::Range<usize> {
        self.start as usize..(self.start + self.cap) as usize
    }

    /// Moves the span down over the slots of `removed`, if it lay past them
    pub(crate) fn close_gap(&mut self, removed: &EdgeSpan) {
        if self.cap > 0 && removed.cap > 0 && self.start > removed.start {
            self.start -= removed.cap;
        }
    }
}

/// Growable slot arena whose blocks come from the allocator facade
///
/// Spans stay valid across growth because growth copies slots in order.
/// Releasing a span compacts the arena: later slots move down by the
/// released capacity and the owner shifts its spans with
/// [`EdgeSpan::close_gap`]. The block itself is only released by a reset.
pub(crate) struct EdgeArena<T> {
    allocator: SharedAllocator,
    slots: Option<NavBuffer<T>>,
}

impl<T: Copy + Default> EdgeArena<T> {
    pub(crate) fn new(allocator: &SharedAllocator) -> Self {
        Self {
            allocator: allocator.clone(),
            slots: None,
        }
    }

    /// Reserves `count` default-initialized slots.
    ///
    /// Fails with [`Error::OutOfMemory`] when the span would not be
    /// addressable with 32-bit slot indices.
    pub(crate) fn reserve(&mut self, count: usize) -> Result<EdgeSpan> {
        let used = self.slots.as_ref().map_or(0, |s| s.len());
        let capacity = self.slots.as_ref().map_or(0, |s| s.capacity());

        let too_large = || Error::OutOfMemory {
            size: count.saturating_mul(std::mem::size_of::<T>()),
            hint: AllocHint::Perm,
        };
        let needed = used.checked_add(count).ok_or_else(too_large)?;
        let (start, cap) = match (
            u32::try_from(used),
            u32::try_from(count),
            u32::try_from(needed),
        ) {
            (Ok(start), Ok(cap), Ok(_)) => (start, cap),
            _ => {
                log::warn!("edge arena cannot index {count} more slots past {used}");
                return Err(too_large());
            }
        };

        if count > 0 && needed > capacity {
            let new_capacity = needed.max(capacity * 2).max(MIN_ARENA_SLOTS);
            let mut grown =
                NavBuffer::with_capacity(&self.allocator, new_capacity, AllocHint::Perm)?;
            if let Some(old) = &self.slots {
                grown.extend_from_slice(old);
            }
            log::trace!("edge arena grown from {capacity} to {new_capacity} slots");
            // Old block is released here, after its contents were copied
            self.slots = Some(grown);
        }

        if let Some(slots) = self.slots.as_mut() {
            for _ in 0..count {
                slots.push(T::default());
            }
        }

        Ok(EdgeSpan { start, len: 0, cap })
    }

    /// Returns the slots of `span` to the arena.
    ///
    /// Slots past the span move down to close the gap. Returns `true` when
    /// any did, in which case every other span must be adjusted with
    /// [`EdgeSpan::close_gap`].
    pub(crate) fn release(&mut self, span: &EdgeSpan) -> bool {
        let Some(slots) = self.slots.as_mut() else {
            return false;
        };
        let reserved = span.reserved();
        if reserved.is_empty() || reserved.end > slots.len() {
            return false;
        }

        let moved = reserved.end < slots.len();
        let remaining = slots.len() - reserved.len();
        if moved {
            slots[reserved.start..].rotate_left(reserved.len());
        }
        slots.truncate(remaining);
        moved
    }

    /// Slots in use by `span`
    pub(crate) fn get(&self, span: &EdgeSpan) -> &[T] {
        match self.slots.as_ref() {
            Some(s) if span.len > 0 => &s[span.range()],
            _ => &[],
        }
    }

    /// All reserved slots of `span`, used or not
    pub(crate) fn reserved_mut(&mut self, span: &EdgeSpan) -> &mut [T] {
        match self.slots.as_mut() {
            Some(s) if span.cap > 0 => &mut s[span.reserved()],
            _ => &mut [],
        }
    }

    /// Releases the arena block
    pub(crate) fn reset(&mut self) {
        self.slots = None;
    }

    pub(crate) fn block_addr(&self) -> Option<usize> {
        self.slots.as_ref().and_then(|s| s.block_addr())
    }

    pub(crate) fn mem_used(&self) -> usize {
        self.slots.as_ref().map_or(0, |s| s.block_size())
    }

    pub(crate) fn slots_in_use(&self) -> usize {
        self.slots.as_ref().map_or(0, |s| s.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nav_common::TrackingAllocator;
    use std::sync::Arc;

    #[test]
    fn test_spans_survive_growth() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();
        let mut arena = EdgeArena::<u32>::new(&allocator);

        let mut first = arena.reserve(4).unwrap();
        arena.reserved_mut(&first)[0] = 11;
        first.len = 1;
        let block = arena.block_addr().unwrap();

        let second = arena.reserve(16).unwrap();
        assert_eq!(second.start, 4);
        assert_eq!(arena.get(&first), &[11]);
        assert!(tracker.was_released(block));
        assert_eq!(tracker.stats().live_blocks, 1);
    }

    #[test]
    fn test_reset_releases_block() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();
        let mut arena = EdgeArena::<IntraEdge>::new(&allocator);

        let span = arena.reserve(2).unwrap();
        assert_eq!(arena.slots_in_use(), 2);
        assert!(arena.mem_used() > 0);

        arena.reset();
        arena.reset();
        assert!(arena.get(&span).is_empty());
        assert_eq!(tracker.stats().releases, 1);
        assert_eq!(tracker.stats().double_releases, 0);
    }

    #[test]
    fn test_release_compacts_later_spans() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();
        let mut arena = EdgeArena::<u32>::new(&allocator);

        let first = arena.reserve(2).unwrap();
        let mut second = arena.reserve(3).unwrap();
        arena.reserved_mut(&second).copy_from_slice(&[5, 6, 7]);
        second.len = 3;
        let block = arena.block_addr().unwrap();

        assert!(arena.release(&first));
        second.close_gap(&first);
        assert_eq!(second.start, 0);
        assert_eq!(arena.get(&second), &[5, 6, 7]);
        assert_eq!(arena.slots_in_use(), 3);

        // Freed room is reused without touching the allocator
        let third = arena.reserve(4).unwrap();
        assert_eq!(third.start, 3);
        assert_eq!(arena.block_addr(), Some(block));
        assert_eq!(tracker.stats().allocations, 1);

        // Releasing the last span only shortens the arena
        assert!(!arena.release(&third));
        assert_eq!(arena.slots_in_use(), 3);
        assert_eq!(arena.get(&second), &[5, 6, 7]);
    }

    #[test]
    fn test_release_of_empty_span_is_noop() {
        let allocator = nav_common::default_allocator();
        let mut arena = EdgeArena::<u32>::new(&allocator);

        let empty = arena.reserve(0).unwrap();
        assert!(!arena.release(&empty));
        let span = arena.reserve(2).unwrap();
        let mut tail = arena.reserve(0).unwrap();
        assert_eq!(tail.start, 2);

        assert!(!arena.release(&EdgeSpan { start: 0, len: 0, cap: 0 }));
        assert_eq!(arena.slots_in_use(), 2);

        // Empty spans never index the arena, so they need no adjustment
        arena.release(&span);
        tail.close_gap(&span);
        assert_eq!(tail.start, 2);
        assert!(arena.get(&tail).is_empty());
        assert!(arena.reserved_mut(&tail).is_empty());
    }

    #[test]
    fn test_unindexable_reserve_is_out_of_memory() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();
        let mut arena = EdgeArena::<IntraEdge>::new(&allocator);

        let count = u32::MAX as usize + 1;
        let err = arena.reserve(count).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { hint: AllocHint::Perm, .. }));
        assert_eq!(tracker.stats().allocations, 0);
        assert_eq!(arena.slots_in_use(), 0);
    }

    #[test]
    fn test_zero_reserve_does_not_move_slots() {
        let allocator = nav_common::default_allocator();
        let mut arena = EdgeArena::<Edge>::new(&allocator);

        let empty = arena.reserve(0).unwrap();
        assert_eq!(empty.cap, 0);
        assert!(empty.is_full());
        assert_eq!(arena.slots_in_use(), 0);
    }
}
