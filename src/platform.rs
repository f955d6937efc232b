use std::ptr::NonNull;

use crate::Pointer;

/// Abstraction for platform specific memory handling. The heap is one
/// contiguous region that only grows, so instead of mapping many small
/// chunks we reserve a single large virtual range up front and let
/// [`crate::region::HeapRegion`] move its break pointer inside it. The
/// platform layer only needs to hand out that one reservation and take it
/// back at the end.
trait PlatformSpecificMemory {
    /// Reserves a virtual address range of `length` bytes. Untouched pages
    /// are not committed, so reserving a lot costs almost nothing.
    unsafe fn reserve(length: usize) -> Pointer<u8>;

    /// Returns the reservation obtained from [`Self::reserve`].
    unsafe fn release(address: NonNull<u8>, length: usize);
}

/// Zero sized type that implements [`PlatformSpecificMemory`] for each OS.
pub(crate) struct Platform;

/// Virtual address space reserved for the heap. This bounds how far the heap
/// can ever grow; an exhausted reservation surfaces as an out of heap error.
#[cfg(not(miri))]
pub(crate) const RESERVATION_LENGTH: usize = 1 << 30;

/// Miri routes the reservation through the host allocator, which commits the
/// whole range for real, so keep it small there.
#[cfg(miri)]
pub(crate) const RESERVATION_LENGTH: usize = 1 << 22;

/// Convinience wrapper for [`PlatformSpecificMemory::reserve`].
#[inline]
pub(crate) unsafe fn reserve(length: usize) -> Pointer<u8> {
    Platform::reserve(length)
}

/// Convinience wrapper for [`PlatformSpecificMemory::release`].
#[inline]
pub(crate) unsafe fn release(address: NonNull<u8>, length: usize) {
    Platform::release(address, length)
}

#[cfg(unix)]
#[cfg(not(miri))]
mod unix {
    use std::ptr::{self, NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::Pointer;

    impl PlatformSpecificMemory for Platform {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            // Memory protection. Read-Write only.
            let protection = libc::PROT_READ | libc::PROT_WRITE;

            // Memory should be private to our process and not mapped to any
            // file.
            let flags = libc::MAP_PRIVATE | libc::MAP_ANONYMOUS;

            // Tell Linux not to count the whole reservation against
            // overcommit limits; pages only materialize when written.
            #[cfg(target_os = "linux")]
            let flags = flags | libc::MAP_NORESERVE;

            // For all the configuration options that `mmap` accepts see
            // https://man7.org/linux/man-pages/man2/mmap.2.html
            match libc::mmap(ptr::null_mut(), length, protection, flags, -1, 0) {
                libc::MAP_FAILED => None,
                address => Some(NonNull::new_unchecked(address).cast()),
            }
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            if libc::munmap(address.cast().as_ptr(), length) != 0 {
                // TODO: What should we do here? Panic? Memory region is
                // still valid, it wasn't unmapped.
            }
        }
    }
}

#[cfg(miri)]
mod miri {
    //! When using Miri, we can't rely on system calls such as `mmap` because
    //! there's no FFI support, so instead we'll use the global allocator to
    //! mock low level memory management. This is also useful for detecting
    //! leaks of the reservation itself.

    use std::{alloc, ptr::NonNull};

    use super::{Platform, PlatformSpecificMemory};
    use crate::{align::ALIGNMENT, Pointer};

    fn to_layout(length: usize) -> alloc::Layout {
        alloc::Layout::from_size_align(length, ALIGNMENT).unwrap()
    }

    impl PlatformSpecificMemory for Platform {
        unsafe fn reserve(length: usize) -> Pointer<u8> {
            NonNull::new(alloc::alloc(to_layout(length)))
        }

        unsafe fn release(address: NonNull<u8>, length: usize) {
            alloc::dealloc(address.as_ptr(), to_layout(length));
        }
    }
}
