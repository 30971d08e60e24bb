//! Top-level allocator: ties the three tiers together and implements
//! `GlobalAlloc`.
//!
//! `RtAllocator` is zero-sized; all mutable state lives in module-level
//! statics guarded by spinlocks or atomics. Dispatch by request shape:
//!
//! - `align <= ALIGNMENT && size <= MAX_BYTES` — thread cache, falling
//!   through to the central cache and page cache on a miss.
//! - `align <= ALIGNMENT && size > MAX_BYTES` — straight to the page cache
//!   (one span per request, no thread/central involvement).
//! - `align > ALIGNMENT` — a self-contained, header-tagged escape hatch
//!   built directly on `platform::page_alloc`, bypassing every tier. Not
//!   optimized (one `platform::page_alloc` call per request, no reuse); the
//!   tiers never attempt to serve over-aligned requests.
//!
//! No path performs a page-map reverse lookup at `dealloc`/`realloc` time —
//! the caller-supplied `Layout` is trusted, matching the external interface.

use crate::central_cache::CentralCache;
use crate::config::{ALIGNMENT, PAGE_SIZE};
use crate::page_cache::PageCache;
use crate::pagemap::PageMap;
use crate::size_class;
use crate::sync::SpinMutex;
use crate::{stat_add, stat_inc};
use core::alloc::{GlobalAlloc, Layout};
use core::mem::size_of;
use core::ptr;

#[cfg(feature = "std")]
use crate::thread_cache;

pub(crate) static PAGE_MAP: PageMap = PageMap::new();
pub(crate) static PAGE_CACHE: SpinMutex<PageCache> = SpinMutex::new(PageCache::new(&PAGE_MAP));
pub(crate) static CENTRAL_CACHE: CentralCache = CentralCache::new();

/// Tiered allocator for Rust.
///
/// Register as the global allocator with:
/// ```ignore
/// #[global_allocator]
/// static GLOBAL: tieralloc::RtAllocator = tieralloc::RtAllocator;
/// ```
pub struct RtAllocator;

unsafe impl GlobalAlloc for RtAllocator {
    #[inline]
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        let size = layout.size();
        if size == 0 {
            return layout.align() as *mut u8;
        }

        stat_inc!(alloc_count);
        stat_add!(alloc_bytes, size as u64);

        let align = layout.align();
        if align > ALIGNMENT {
            return unsafe { self.alloc_overaligned(size, align) };
        }
        if size_class::fits_in_tiers(size) {
            return self.alloc_small(size_class::index_of(size));
        }
        unsafe { self.alloc_large(size) }
    }

    #[inline]
    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let size = layout.size();
        if size == 0 {
            return;
        }
        stat_inc!(dealloc_count);

        let align = layout.align();
        if align > ALIGNMENT {
            unsafe { self.dealloc_overaligned(ptr, size, align) };
            return;
        }
        if size_class::fits_in_tiers(size) {
            self.dealloc_small(ptr, size_class::index_of(size));
        } else {
            unsafe { self.dealloc_large(ptr, size) };
        }
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        let ptr = unsafe { self.alloc(layout) };
        if !ptr.is_null() && layout.size() > 0 {
            unsafe { ptr::write_bytes(ptr, 0, layout.size()) };
        }
        ptr
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        if ptr.is_null() || layout.size() == 0 {
            let new_layout =
                unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
            return unsafe { self.alloc(new_layout) };
        }
        if new_size == 0 {
            unsafe { self.dealloc(ptr, layout) };
            return layout.align() as *mut u8;
        }

        stat_inc!(realloc_count);

        // The usable size of the existing allocation, derived purely from
        // the caller's layout — no page-map lookup.
        let old_usable = if layout.align() <= ALIGNMENT && size_class::fits_in_tiers(layout.size())
        {
            size_class::size_of_class(size_class::index_of(layout.size()))
        } else {
            layout.size()
        };

        if new_size <= old_usable {
            return ptr;
        }

        let new_layout = unsafe { Layout::from_size_align_unchecked(new_size, layout.align()) };
        let new_ptr = unsafe { self.alloc(new_layout) };
        if !new_ptr.is_null() {
            unsafe { ptr::copy_nonoverlapping(ptr, new_ptr, old_usable.min(new_size)) };
            unsafe { self.dealloc(ptr, layout) };
        }
        new_ptr
    }
}

impl RtAllocator {
    cfg_if::cfg_if! {
        if #[cfg(feature = "std")] {
            #[inline(always)]
            fn alloc_small(&self, index: usize) -> *mut u8 {
                thread_cache::tls::with(|tc| tc.allocate(&CENTRAL_CACHE, &PAGE_CACHE, index))
            }

            #[inline(always)]
            fn dealloc_small(&self, ptr: *mut u8, index: usize) {
                thread_cache::tls::with(|tc| tc.deallocate(&CENTRAL_CACHE, ptr, index));
            }
        } else {
            #[inline(always)]
            fn alloc_small(&self, index: usize) -> *mut u8 {
                stat_inc!(thread_cache_misses);
                CENTRAL_CACHE.fetch_range(&PAGE_CACHE, index, 1)
            }

            #[inline(always)]
            fn dealloc_small(&self, ptr: *mut u8, index: usize) {
                CENTRAL_CACHE.return_range(ptr, 1, index);
            }
        }
    }

    unsafe fn alloc_large(&self, size: usize) -> *mut u8 {
        stat_inc!(page_heap_allocs);
        let pages = size.div_ceil(PAGE_SIZE).max(1);
        let span = unsafe { PAGE_CACHE.lock().allocate_span(pages) };
        if span.is_null() {
            return ptr::null_mut();
        }
        unsafe { (*span).start_addr() }
    }

    unsafe fn dealloc_large(&self, ptr: *mut u8, size: usize) {
        let pages = size.div_ceil(PAGE_SIZE).max(1);
        unsafe { PAGE_CACHE.lock().deallocate_span(ptr, pages) };
    }

    /// Serve an over-aligned request directly from the platform, bypassing
    /// every tier. A single header word just before the returned pointer
    /// records the raw base address, so `dealloc_overaligned` can recover it
    /// without any page-map bookkeeping; the raw allocation's size is
    /// recomputed deterministically from `(size, align)` rather than stored.
    unsafe fn alloc_overaligned(&self, size: usize, align: usize) -> *mut u8 {
        stat_inc!(page_heap_allocs);
        let header = size_of::<usize>();
        let raw_size = size + align + header;
        let raw = unsafe { crate::platform::page_alloc(raw_size) };
        if raw.is_null() {
            return ptr::null_mut();
        }

        let data_start = raw as usize + header;
        let aligned = (data_start + align - 1) & !(align - 1);
        let header_slot = (aligned - header) as *mut usize;
        unsafe { header_slot.write(raw as usize) };
        aligned as *mut u8
    }

    unsafe fn dealloc_overaligned(&self, ptr: *mut u8, size: usize, align: usize) {
        let header = size_of::<usize>();
        let raw_size = size + align + header;
        let header_slot = (ptr as usize - header) as *mut usize;
        let raw = unsafe { header_slot.read() } as *mut u8;
        unsafe { crate::platform::page_dealloc(raw, raw_size) };
    }
}

#[cfg(feature = "nightly")]
unsafe impl core::alloc::Allocator for RtAllocator {
    fn allocate(
        &self,
        layout: Layout,
    ) -> Result<core::ptr::NonNull<[u8]>, core::alloc::AllocError> {
        let ptr = unsafe { GlobalAlloc::alloc(self, layout) };
        if ptr.is_null() {
            Err(core::alloc::AllocError)
        } else {
            let slice = core::ptr::slice_from_raw_parts_mut(ptr, layout.size());
            Ok(unsafe { core::ptr::NonNull::new_unchecked(slice) })
        }
    }

    unsafe fn deallocate(&self, ptr: core::ptr::NonNull<u8>, layout: Layout) {
        unsafe { GlobalAlloc::dealloc(self, ptr.as_ptr(), layout) }
    }
}

/// The allocator's simple functional surface: allocate `size` bytes at the
/// tiers' native alignment, returning null on failure.
pub fn allocate(size: usize) -> *mut u8 {
    let layout = unsafe { Layout::from_size_align_unchecked(size.max(1), ALIGNMENT) };
    unsafe { RtAllocator.alloc(layout) }
}

/// Free a block previously returned by [`allocate`]. `size` must be the same
/// value passed to the matching `allocate` call.
///
/// # Safety
///
/// `ptr` must be a still-live pointer returned by [`allocate`] with this
/// exact `size`, not previously freed.
pub unsafe fn deallocate(ptr: *mut u8, size: usize) {
    let layout = unsafe { Layout::from_size_align_unchecked(size.max(1), ALIGNMENT) };
    unsafe { RtAllocator.dealloc(ptr, layout) };
}
