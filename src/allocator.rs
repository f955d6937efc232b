use std::{
    alloc::{GlobalAlloc, Layout},
    ptr::{self, NonNull},
    sync::Mutex,
};

use log::trace;

use crate::{align::ALIGNMENT, arena::Arena, block::Block, error::AllocError};

/// The public allocator: the classic `malloc` family over a single growable
/// heap, with 16 byte aligned results and null pointers on failure. It also
/// implements [`GlobalAlloc`], so it can serve a whole program:
///
/// ```no_run
/// use segalloc::Segalloc;
///
/// #[global_allocator]
/// static ALLOCATOR: Segalloc = Segalloc::new();
///
/// fn main() {
///     let numbers = vec![1, 2, 3];
///     assert_eq!(numbers.len(), 3);
/// }
/// ```
///
/// The engine underneath is strictly single threaded, so the facade
/// serializes everything through one [`Mutex`]. That is the simplest
/// correct option; per-class locks or per-thread arenas are the usual next
/// steps and deliberately out of scope here.
pub struct Segalloc {
    arena: Mutex<Arena>,
}

/// The arena is full of raw pointers into its own heap, which makes it
/// `!Send` by default. It is still fine to share the allocator: all access
/// goes through the mutex and the heap is owned by this value alone.
unsafe impl Send for Segalloc {}
unsafe impl Sync for Segalloc {}

impl Segalloc {
    /// Creates an allocator with an empty heap. Nothing is reserved until
    /// the first allocation, which is what allows this to be `const` and
    /// live in a `static`.
    pub const fn new() -> Self {
        Self {
            arena: Mutex::new(Arena::new()),
        }
    }

    /// Allocates `size` bytes and returns a 16 byte aligned pointer to them,
    /// or null if the heap cannot grow any further. A `size` of 0 is valid
    /// and returns a unique, freeable pointer.
    pub fn malloc(&self, size: usize) -> *mut u8 {
        let result = match self.arena.lock() {
            Ok(mut arena) => unsafe { arena.allocate(size) },
            Err(_) => Err(AllocError::OutOfHeap),
        };

        match result {
            Ok(payload) => {
                trace!("malloc({size}) -> {payload:p}");
                payload.as_ptr()
            }
            Err(err) => {
                trace!("malloc({size}) failed: {err}");
                ptr::null_mut()
            }
        }
    }

    /// Releases an allocation. Freeing null is a no-op.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or a pointer obtained from this allocator that has
    /// not been freed yet.
    pub unsafe fn free(&self, ptr: *mut u8) {
        let Some(payload) = NonNull::new(ptr) else {
            return;
        };

        if let Ok(mut arena) = self.arena.lock() {
            arena.release(Block::from_payload(payload));
        }

        trace!("free({ptr:p})");
    }

    /// Resizes an allocation, moving it. The first `min(size, old size)`
    /// bytes are preserved. `realloc(null, size)` behaves like `malloc` and
    /// `realloc(ptr, 0)` frees the pointer and returns null.
    ///
    /// # Safety
    ///
    /// Same contract as [`Self::free`].
    pub unsafe fn realloc(&self, ptr: *mut u8, size: usize) -> *mut u8 {
        let Some(payload) = NonNull::new(ptr) else {
            return self.malloc(size);
        };

        if size == 0 {
            self.free(ptr);
            return ptr::null_mut();
        }

        let result = match self.arena.lock() {
            Ok(mut arena) => arena.reallocate(payload, size),
            Err(_) => Err(AllocError::OutOfHeap),
        };

        match result {
            Ok(new_payload) => {
                trace!("realloc({ptr:p}, {size}) -> {new_payload:p}");
                new_payload.as_ptr()
            }
            Err(err) => {
                trace!("realloc({ptr:p}, {size}) failed: {err}");
                ptr::null_mut()
            }
        }
    }

    /// Allocates a zeroed array of `nmemb` elements of `size` bytes each.
    /// An overflowing element count is an error, not a tiny allocation.
    pub fn calloc(&self, nmemb: usize, size: usize) -> *mut u8 {
        let Some(total) = nmemb.checked_mul(size) else {
            trace!("calloc({nmemb}, {size}) failed: {}", AllocError::SizeOverflow);
            return ptr::null_mut();
        };

        let ptr = self.malloc(total);
        if !ptr.is_null() {
            unsafe { ptr.write_bytes(0, total) };
        }

        ptr
    }

    /// Current heap length in bytes: how much memory the allocator has
    /// claimed from its reservation so far. Grows monotonically.
    pub fn heap_size(&self) -> usize {
        self.arena.lock().map_or(0, |arena| arena.heap_size())
    }
}

impl Default for Segalloc {
    fn default() -> Self {
        Self::new()
    }
}

unsafe impl GlobalAlloc for Segalloc {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            trace!("alloc refused: {}", AllocError::UnsupportedAlignment(layout.align()));
            return ptr::null_mut();
        }

        self.malloc(layout.size())
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        // The block header already knows the size, the layout is redundant.
        self.free(ptr)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.calloc(1, layout.size())
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if layout.align() > ALIGNMENT {
            return ptr::null_mut();
        }

        self.realloc(ptr, new_size)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Barrier, thread};

    use super::*;
    use crate::align::WORD;

    #[test]
    fn malloc_returns_aligned_disjoint_memory() {
        let allocator = Segalloc::new();

        let mut allocations = Vec::new();
        for size in [1, 8, 24, 100, 1000, 4096] {
            let ptr = allocator.malloc(size);
            assert!(!ptr.is_null());
            assert_eq!(ptr as usize % ALIGNMENT, 0);
            allocations.push((ptr as usize, size));
        }

        for (i, &(a, a_size)) in allocations.iter().enumerate() {
            for &(b, b_size) in &allocations[i + 1..] {
                assert!(a + a_size <= b || b + b_size <= a, "allocations overlap");
            }
        }

        for (ptr, _) in allocations {
            unsafe { allocator.free(ptr as *mut u8) };
        }
    }

    #[test]
    fn payload_survives_other_operations() {
        let allocator = Segalloc::new();

        let ptr = allocator.malloc(64);
        for i in 0..64 {
            unsafe { ptr.add(i).write(i as u8) };
        }

        // Churn the heap around the live allocation.
        for size in [16, 500, 32, 2000] {
            let other = allocator.malloc(size);
            unsafe { allocator.free(other) };
        }

        for i in 0..64 {
            assert_eq!(unsafe { ptr.add(i).read() }, i as u8);
        }

        unsafe { allocator.free(ptr) };
    }

    #[test]
    fn free_null_is_a_noop() {
        let allocator = Segalloc::new();

        unsafe { allocator.free(ptr::null_mut()) };
        assert_eq!(allocator.heap_size(), 0);

        let ptr = allocator.malloc(24);
        let heap = allocator.heap_size();
        unsafe { allocator.free(ptr::null_mut()) };
        assert_eq!(allocator.heap_size(), heap);

        unsafe { allocator.free(ptr) };
    }

    #[test]
    fn realloc_of_null_behaves_like_malloc() {
        let allocator = Segalloc::new();

        let ptr = unsafe { allocator.realloc(ptr::null_mut(), 48) };
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % ALIGNMENT, 0);

        unsafe { allocator.free(ptr) };
    }

    #[test]
    fn realloc_to_zero_frees_and_returns_null() {
        let allocator = Segalloc::new();

        let ptr = allocator.malloc(24);
        let heap = allocator.heap_size();

        let result = unsafe { allocator.realloc(ptr, 0) };
        assert!(result.is_null());

        // The freed block gets recycled instead of growing the heap.
        let again = allocator.malloc(24);
        assert_eq!(again, ptr);
        assert_eq!(allocator.heap_size(), heap);

        unsafe { allocator.free(again) };
    }

    #[test]
    fn realloc_grow_preserves_prefix() {
        let allocator = Segalloc::new();

        let ptr = allocator.malloc(40);
        for i in 0..40u8 {
            unsafe { ptr.add(i as usize).write(i) };
        }

        let grown = unsafe { allocator.realloc(ptr, 200) };
        assert!(!grown.is_null());
        for i in 0..40u8 {
            assert_eq!(unsafe { grown.add(i as usize).read() }, i);
        }

        unsafe { allocator.free(grown) };
    }

    #[test]
    fn calloc_zeroes_the_whole_range() {
        let allocator = Segalloc::new();

        // Dirty some memory first so calloc cannot get away with relying on
        // fresh pages being zero.
        let dirty = allocator.malloc(160);
        unsafe {
            dirty.write_bytes(0xAA, 160);
            allocator.free(dirty);
        }

        let ptr = allocator.calloc(10, 16);
        assert!(!ptr.is_null());
        for i in 0..160 {
            assert_eq!(unsafe { ptr.add(i).read() }, 0);
        }

        unsafe { allocator.free(ptr) };
    }

    #[test]
    fn calloc_rejects_overflowing_products() {
        let allocator = Segalloc::new();

        assert!(allocator.calloc(usize::MAX, 2).is_null());
        assert!(allocator.calloc(usize::MAX / 2 + 2, 2).is_null());
        assert_eq!(allocator.heap_size(), 0);
    }

    #[test]
    fn alignments_above_the_guarantee_are_refused() {
        let allocator = Segalloc::new();

        let layout = Layout::from_size_align(64, 32).unwrap();
        assert!(unsafe { allocator.alloc(layout) }.is_null());

        let layout = Layout::from_size_align(64, 16).unwrap();
        let ptr = unsafe { allocator.alloc(layout) };
        assert!(!ptr.is_null());
        unsafe { allocator.dealloc(ptr, layout) };
    }

    #[test]
    fn global_alloc_round_trip() {
        let allocator = Segalloc::new();

        unsafe {
            // 101 * 8 = 808 bytes: a size whose block has no payload
            // padding, so reallocation moves only bytes we wrote.
            let layout = Layout::array::<u64>(101).unwrap();

            let ptr = allocator.alloc(layout);
            assert!(!ptr.is_null());
            ptr.write_bytes(0x55, layout.size());

            let zeroed = allocator.alloc_zeroed(layout);
            assert!(!zeroed.is_null());
            for i in 0..layout.size() {
                assert_eq!(zeroed.add(i).read(), 0);
            }

            // UFCS because the inherent 2-argument `realloc` shadows the
            // trait method.
            let grown = GlobalAlloc::realloc(&allocator, ptr, layout, layout.size() * 2);
            assert!(!grown.is_null());
            for i in 0..layout.size() {
                assert_eq!(grown.add(i).read(), 0x55);
            }

            allocator.dealloc(grown, layout);
            allocator.dealloc(zeroed, layout);
        }
    }

    #[test]
    fn repeated_malloc_free_does_not_grow_the_heap() {
        let allocator = Segalloc::new();

        let first = allocator.malloc(24);
        unsafe { allocator.free(first) };
        let heap = allocator.heap_size();

        for _ in 0..100 {
            let ptr = allocator.malloc(24);
            assert_eq!(ptr, first);
            unsafe { allocator.free(ptr) };
        }

        assert_eq!(allocator.heap_size(), heap);
    }

    #[test]
    fn everything_coalesces_back_into_one_block() {
        let allocator = Segalloc::new();

        let mut pointers: Vec<*mut u8> = (0..16)
            .map(|i| allocator.malloc(16 + i * 24))
            .collect();

        // Free in an interleaved order to exercise all coalesce cases.
        for i in (0..16).step_by(2) {
            unsafe { allocator.free(pointers[i]) };
        }
        for i in (1..16).step_by(2) {
            unsafe { allocator.free(pointers[i]) };
        }
        pointers.clear();

        // With every block freed and merged, one allocation spanning all of
        // the heap except the sentinels must succeed without growth. The
        // constants: one word of padding, two for the prologue, one for the
        // epilogue, plus this block's own header.
        let heap = allocator.heap_size();
        let ptr = allocator.malloc(heap - 4 * WORD - WORD);
        assert!(!ptr.is_null());
        assert_eq!(allocator.heap_size(), heap);

        unsafe { allocator.free(ptr) };
    }

    /// All threads allocate at the same time, then all free at the same
    /// time.
    #[test]
    fn multiple_threads_synchronized_allocs_and_frees() {
        let allocator = Segalloc::new();

        let num_threads = 8;
        let barrier = Barrier::new(num_threads);

        thread::scope(|scope| {
            for t in 0..num_threads {
                let allocator = &allocator;
                let barrier = &barrier;

                scope.spawn(move || {
                    let len = 1024;
                    let ptr = allocator.malloc(len);
                    assert!(!ptr.is_null());

                    for i in 0..len {
                        unsafe { ptr.add(i).write(t as u8) };
                    }

                    barrier.wait();

                    for i in 0..len {
                        assert_eq!(unsafe { ptr.add(i).read() }, t as u8);
                    }

                    unsafe { allocator.free(ptr) };
                });
            }
        });
    }

    /// Threads allocate and free interchangeably with different sizes to
    /// shake out races through the mutex.
    #[test]
    fn multiple_threads_unsynchronized_allocs_and_frees() {
        let allocator = Segalloc::new();

        let num_threads = 8;

        thread::scope(|scope| {
            for t in 0..num_threads {
                let allocator = &allocator;

                scope.spawn(move || {
                    // Miri is slow, fewer iterations still find data races.
                    let rounds = if cfg!(miri) { 10 } else { 500 };

                    for round in 0..rounds {
                        let size = 16 + ((t * 7 + round) % 40) * 16;
                        let ptr = allocator.malloc(size);
                        assert!(!ptr.is_null());

                        let pattern = (t * 31 + round) as u8;
                        unsafe {
                            ptr.write_bytes(pattern, size);
                            for i in [0, size / 2, size - 1] {
                                assert_eq!(ptr.add(i).read(), pattern);
                            }
                            allocator.free(ptr);
                        }
                    }
                });
            }
        });
    }
}
