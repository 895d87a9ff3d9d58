//! Fixed-capacity buffers backed by the allocator facade

use std::alloc::Layout;
use std::fmt;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::ptr::{self, NonNull};

use crate::alloc::{AllocHint, SharedAllocator};
use crate::{Error, Result};

/// Fixed-capacity array whose block comes from a [`SharedAllocator`]
///
/// The capacity is chosen at construction and never grows. Dropping the
/// buffer drops its elements and then releases the block back to the
/// allocator that produced it, so a buffer can never be half torn down.
pub struct NavBuffer<T> {
    ptr: NonNull<T>,
    len: usize,
    capacity: usize,
    hint: AllocHint,
    allocator: SharedAllocator,
    _marker: PhantomData<T>,
}

// Safety: NavBuffer uniquely owns its elements, like Vec<T>.
unsafe impl<T: Send> Send for NavBuffer<T> {}
unsafe impl<T: Sync> Sync for NavBuffer<T> {}

impl<T> NavBuffer<T> {
    /// Allocates an empty buffer with room for `capacity` elements
    pub fn with_capacity(
        allocator: &SharedAllocator,
        capacity: usize,
        hint: AllocHint,
    ) -> Result<Self> {
        let layout = Layout::array::<T>(capacity).map_err(|_| Error::OutOfMemory {
            size: usize::MAX,
            hint,
        })?;

        let ptr = if layout.size() == 0 {
            NonNull::dangling()
        } else {
            match allocator.allocate(layout, hint) {
                Some(block) => block.cast::<T>(),
                None => {
                    log::warn!(
                        "allocator refused {} bytes for {} x {}",
                        layout.size(),
                        capacity,
                        std::any::type_name::<T>()
                    );
                    return Err(Error::OutOfMemory {
                        size: layout.size(),
                        hint,
                    });
                }
            }
        };

        Ok(Self {
            ptr,
            len: 0,
            capacity,
            hint,
            allocator: allocator.clone(),
            _marker: PhantomData,
        })
    }

    /// Allocates a full buffer of `len` elements produced by `f`
    pub fn from_fn(
        allocator: &SharedAllocator,
        len: usize,
        hint: AllocHint,
        mut f: impl FnMut(usize) -> T,
    ) -> Result<Self> {
        let mut buffer = Self::with_capacity(allocator, len, hint)?;
        for i in 0..len {
            buffer.push(f(i));
        }
        Ok(buffer)
    }

    /// Appends an element.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is already full.
    pub fn push(&mut self, value: T) {
        assert!(
            self.len < self.capacity,
            "NavBuffer capacity exceeded (capacity {})",
            self.capacity
        );
        // SAFETY: len < capacity, so the slot is inside the block and uninitialized.
        unsafe { self.ptr.as_ptr().add(self.len).write(value) };
        self.len += 1;
    }

    /// Drops every element, keeping the block
    pub fn clear(&mut self) {
        let len = self.len;
        // Reset first so a panicking destructor cannot cause a second drop.
        self.len = 0;
        // SAFETY: the first `len` slots are initialized.
        unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(self.ptr.as_ptr(), len)) };
    }

    /// Drops the elements past `len`, keeping the block
    pub fn truncate(&mut self, len: usize) {
        if len >= self.len {
            return;
        }
        let tail = self.len - len;
        self.len = len;
        // SAFETY: slots `len..len + tail` were initialized and are no longer reachable.
        unsafe {
            ptr::drop_in_place(ptr::slice_from_raw_parts_mut(
                self.ptr.as_ptr().add(len),
                tail,
            ))
        };
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.len == self.capacity
    }

    pub fn hint(&self) -> AllocHint {
        self.hint
    }

    /// Address of the facade block, or `None` when no block was needed
    pub fn block_addr(&self) -> Option<usize> {
        (self.block_size() != 0).then(|| self.ptr.as_ptr() as usize)
    }

    /// Size in bytes of the facade block
    pub fn block_size(&self) -> usize {
        std::mem::size_of::<T>() * self.capacity
    }
}

impl<T: Clone> NavBuffer<T> {
    /// Appends clones of `values`.
    ///
    /// # Panics
    ///
    /// Panics if the values do not fit in the remaining capacity.
    pub fn extend_from_slice(&mut self, values: &[T]) {
        assert!(
            values.len() <= self.capacity - self.len,
            "NavBuffer capacity exceeded (capacity {}, len {}, extra {})",
            self.capacity,
            self.len,
            values.len()
        );
        for value in values {
            self.push(value.clone());
        }
    }
}

impl<T> Deref for NavBuffer<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        // SAFETY: the first `len` slots are initialized and the pointer is aligned.
        unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> DerefMut for NavBuffer<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        // SAFETY: as for `deref`, and `&mut self` guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl<T> Drop for NavBuffer<T> {
    fn drop(&mut self) {
        self.clear();

        let Ok(layout) = Layout::array::<T>(self.capacity) else {
            return;
        };
        if layout.size() != 0 {
            // SAFETY: the block was obtained from this allocator with this layout
            // and is released exactly once, here.
            unsafe {
                self.allocator
                    .release(self.ptr.cast::<u8>(), layout, self.hint)
            };
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for NavBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NavBuffer")
            .field("capacity", &self.capacity)
            .field("hint", &self.hint)
            .field("items", &&self[..])
            .finish()
    }
}

/// Single value stored in a facade block
///
/// Replacing a `NavBox` (or dropping it) destroys the value and releases
/// its block in the same step.
pub struct NavBox<T> {
    inner: NavBuffer<T>,
}

impl<T> NavBox<T> {
    /// Moves `value` into a freshly allocated block
    pub fn new(allocator: &SharedAllocator, value: T, hint: AllocHint) -> Result<Self> {
        let mut inner = NavBuffer::with_capacity(allocator, 1, hint)?;
        inner.push(value);
        Ok(Self { inner })
    }

    /// Address of the facade block, or `None` for zero-sized values
    pub fn block_addr(&self) -> Option<usize> {
        self.inner.block_addr()
    }
}

impl<T> Deref for NavBox<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner[0]
    }
}

impl<T> DerefMut for NavBox<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.inner[0]
    }
}

impl<T: fmt::Debug> fmt::Debug for NavBox<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("NavBox").field(&**self).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alloc::{FailingAllocator, TrackingAllocator, default_allocator};
    use std::rc::Rc;
    use std::sync::Arc;

    #[test]
    fn test_buffer_releases_block_once() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();

        let mut buffer = NavBuffer::<u32>::with_capacity(&allocator, 4, AllocHint::Perm).unwrap();
        buffer.push(7);
        buffer.push(9);
        assert_eq!(&buffer[..], &[7, 9]);
        assert_eq!(buffer.capacity(), 4);

        let addr = buffer.block_addr().unwrap();
        assert!(tracker.is_live(addr));

        drop(buffer);
        assert!(tracker.was_released(addr));
        assert_eq!(tracker.stats().releases, 1);
        assert_eq!(tracker.stats().double_releases, 0);
    }

    #[test]
    fn test_zero_capacity_skips_allocator() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();

        let buffer = NavBuffer::<u64>::with_capacity(&allocator, 0, AllocHint::Perm).unwrap();
        assert!(buffer.block_addr().is_none());
        assert!(buffer.is_empty());
        drop(buffer);

        assert_eq!(tracker.stats().allocations, 0);
        assert_eq!(tracker.stats().releases, 0);
    }

    #[test]
    fn test_drop_runs_element_destructors() {
        let allocator = default_allocator();
        let marker = Rc::new(());

        let buffer =
            NavBuffer::from_fn(&allocator, 3, AllocHint::Temp, |_| marker.clone()).unwrap();
        assert_eq!(Rc::strong_count(&marker), 4);

        drop(buffer);
        assert_eq!(Rc::strong_count(&marker), 1);
    }

    #[test]
    fn test_truncate_drops_tail_and_keeps_block() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();
        let marker = Rc::new(());

        let mut buffer =
            NavBuffer::from_fn(&allocator, 4, AllocHint::Perm, |_| marker.clone()).unwrap();
        let addr = buffer.block_addr().unwrap();

        buffer.truncate(1);
        assert_eq!(buffer.len(), 1);
        assert_eq!(Rc::strong_count(&marker), 2);
        buffer.truncate(3);
        assert_eq!(buffer.len(), 1);
        assert!(tracker.is_live(addr));

        buffer.push(marker.clone());
        assert_eq!(buffer.len(), 2);
        drop(buffer);
        assert_eq!(Rc::strong_count(&marker), 1);
        assert_eq!(tracker.stats().releases, 1);
    }

    #[test]
    #[should_panic(expected = "capacity exceeded")]
    fn test_push_past_capacity_panics() {
        let allocator = default_allocator();
        let mut buffer = NavBuffer::with_capacity(&allocator, 1, AllocHint::Perm).unwrap();
        buffer.push(1u8);
        buffer.push(2u8);
    }

    #[test]
    fn test_allocation_failure_is_reported() {
        let allocator: SharedAllocator =
            Arc::new(FailingAllocator::fail_after(default_allocator(), 0));

        let err = NavBuffer::<u32>::with_capacity(&allocator, 8, AllocHint::Perm).unwrap_err();
        assert_eq!(
            err,
            Error::OutOfMemory {
                size: 32,
                hint: AllocHint::Perm
            }
        );
    }

    #[test]
    fn test_nav_box_replacement_releases_old_block() {
        let tracker = Arc::new(TrackingAllocator::new());
        let allocator: SharedAllocator = tracker.clone();

        let mut slot = Some(NavBox::new(&allocator, [1u32; 4], AllocHint::Perm).unwrap());
        let old = slot.as_ref().unwrap().block_addr().unwrap();

        slot = Some(NavBox::new(&allocator, [2u32; 4], AllocHint::Perm).unwrap());
        assert!(tracker.was_released(old));
        assert_eq!(slot.as_deref(), Some(&[2u32; 4]));
    }
}
