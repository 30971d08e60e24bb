//! Page cache: manages spans of contiguous pages.
//!
//! Responsibilities:
//! - Allocate spans of N pages (searching free lists, splitting larger spans)
//! - Deallocate spans (coalescing with adjacent free spans)
//! - Grow the cache by requesting memory from the operating system
//! - Register/unregister spans in the page map

use crate::config::{MAX_PAGES, PAGE_SHIFT, PAGE_SIZE};
use crate::pagemap::PageMap;
use crate::platform;
use crate::span::{self, Span, SpanList, SpanState};
use crate::{stat_add, stat_inc};
use core::ptr;
#[cfg(feature = "debug")]
use std::println;

pub struct PageCache {
    /// free_lists[k] holds free spans of exactly k pages (index 0 unused).
    free_lists: [SpanList; MAX_PAGES + 1],
    /// Free spans larger than MAX_PAGES pages.
    large_spans: SpanList,
    /// Reference to the global page map.
    pagemap: &'static PageMap,
}

// SAFETY: PageCache is only accessed through a SpinMutex. Raw pointers within
// point to OS-allocated memory that outlives any thread.
unsafe impl Send for PageCache {}

impl PageCache {
    pub const fn new(pagemap: &'static PageMap) -> Self {
        Self {
            free_lists: [const { SpanList::new() }; MAX_PAGES + 1],
            large_spans: SpanList::new(),
            pagemap,
        }
    }

    /// Allocate a span of at least `num_pages` pages.
    /// Returns a pointer to the Span, or null on failure.
    ///
    /// # Safety
    ///
    /// Caller must hold exclusive access (via the enclosing `SpinMutex`).
    pub unsafe fn allocate_span(&mut self, num_pages: usize) -> *mut Span {
        assert!(num_pages > 0);

        if num_pages <= MAX_PAGES {
            for n in num_pages..=MAX_PAGES {
                if !self.free_lists[n].is_empty() {
                    let s = unsafe { self.free_lists[n].pop() };
                    return unsafe { self.carve_span(s, num_pages) };
                }
            }
        }

        let best = unsafe { self.find_best_large_span(num_pages) };
        if !best.is_null() {
            unsafe { self.large_spans.remove(best) };
            return unsafe { self.carve_span(best, num_pages) };
        }

        unsafe { self.grow_cache(num_pages) }
    }

    /// Deallocate the span starting at `addr`, which must hold exactly
    /// `num_pages` pages. Looks the span up by address in the page map (a
    /// page-count mismatch is caller error).
    ///
    /// # Safety
    ///
    /// `addr` must be the start address of a span previously returned by
    /// `allocate_span`, currently in use, not already freed.
    pub unsafe fn deallocate_span(&mut self, addr: *mut u8, num_pages: usize) {
        let page_id = (addr as usize) >> PAGE_SHIFT;
        let span = self.pagemap.get(page_id);
        assert!(!span.is_null(), "deallocate_span: address not tracked");
        unsafe {
            assert_eq!(
                (*span).num_pages,
                num_pages,
                "deallocate_span: page count mismatch"
            );
            assert_eq!((*span).start_page, page_id);
            self.deallocate_span_inner(span);
        }
    }

    /// Internal coalescing engine: reclaim `span`, merging with adjacent
    /// free spans where possible.
    unsafe fn deallocate_span_inner(&mut self, span: *mut Span) {
        unsafe {
            (*span).state = SpanState::Free;
        }

        let span = unsafe { self.coalesce_left(span) };
        let span = unsafe { self.coalesce_right(span) };

        // Free spans only need first+last pages registered (for coalescing).
        unsafe { self.pagemap.register_span_endpoints(span) };

        unsafe { self.insert_free(span) };
        stat_inc!(span_coalesces);
    }

    /// Split a span: use the first `num_pages` pages, return the remainder
    /// to the free lists. Returns the (now in-use) span.
    unsafe fn carve_span(&mut self, span: *mut Span, num_pages: usize) -> *mut Span {
        let total = unsafe { (*span).num_pages };
        assert!(total >= num_pages);

        if total > num_pages {
            #[cfg(feature = "debug")]
            println!("[carve] alloc remainder");

            let remainder = span::alloc_span();
            if remainder.is_null() {
                unsafe {
                    (*span).state = SpanState::InUse;
                    self.pagemap.register_span(span);
                }
                return span;
            }

            unsafe {
                (*remainder).start_page = (*span).start_page + num_pages;
                (*remainder).num_pages = total - num_pages;
                (*remainder).state = SpanState::Free;

                (*span).num_pages = num_pages;

                self.pagemap.register_span_endpoints(remainder);
                self.insert_free(remainder);
            }
            stat_inc!(span_splits);
        }

        unsafe {
            (*span).state = SpanState::InUse;
            self.pagemap.register_span(span);
        }

        span
    }

    /// Insert a free span into the appropriate free list.
    unsafe fn insert_free(&mut self, span: *mut Span) {
        let n = unsafe { (*span).num_pages };
        if n <= MAX_PAGES {
            unsafe { self.free_lists[n].push(span) };
        } else {
            unsafe { self.large_spans.push(span) };
        }
    }

    /// Find the best-fit span in large_spans that has >= num_pages.
    unsafe fn find_best_large_span(&self, num_pages: usize) -> *mut Span {
        let mut best: *mut Span = ptr::null_mut();
        let mut best_pages = usize::MAX;
        let mut current = self.large_spans.head;

        while !current.is_null() {
            let n = unsafe { (*current).num_pages };
            if n >= num_pages && n < best_pages {
                best = current;
                best_pages = n;
                if n == num_pages {
                    break;
                }
            }
            current = unsafe { (*current).next };
        }
        best
    }

    /// Request pages from the OS and create a new span.
    unsafe fn grow_cache(&mut self, num_pages: usize) -> *mut Span {
        // Allocate at least 128 pages (512 KiB) at a time to reduce OS calls.
        let alloc_pages = num_pages.max(128);
        let alloc_size = alloc_pages * PAGE_SIZE;

        #[cfg(feature = "debug")]
        println!("[grow] reserve {alloc_pages} pages from the system");

        let ptr = unsafe { platform::page_alloc(alloc_size) };
        if ptr.is_null() {
            if alloc_pages > num_pages {
                return unsafe { self.grow_cache_exact(num_pages) };
            }
            return ptr::null_mut();
        }
        stat_inc!(os_alloc_count);
        stat_add!(os_alloc_bytes, alloc_size);

        let start_page = (ptr as usize) >> PAGE_SHIFT;

        let s = span::alloc_span();
        if s.is_null() {
            unsafe { platform::page_dealloc(ptr, alloc_size) };
            return ptr::null_mut();
        }

        unsafe {
            (*s).start_page = start_page;
            (*s).num_pages = alloc_pages;
            (*s).state = SpanState::InUse; // Carved immediately below.
        }

        unsafe { self.carve_span(s, num_pages) }
    }

    /// Fallback: allocate exactly num_pages from the OS.
    unsafe fn grow_cache_exact(&mut self, num_pages: usize) -> *mut Span {
        let alloc_size = num_pages * PAGE_SIZE;
        let ptr = unsafe { platform::page_alloc(alloc_size) };
        if ptr.is_null() {
            return ptr::null_mut();
        }
        stat_inc!(os_alloc_count);
        stat_add!(os_alloc_bytes, alloc_size);

        let start_page = (ptr as usize) >> PAGE_SHIFT;

        let s = span::alloc_span();
        if s.is_null() {
            unsafe { platform::page_dealloc(ptr, alloc_size) };
            return ptr::null_mut();
        }

        unsafe {
            (*s).start_page = start_page;
            (*s).num_pages = num_pages;
            (*s).state = SpanState::InUse;
            self.pagemap.register_span(s);
        }
        s
    }

    /// Try to merge with the free span immediately before `span`.
    unsafe fn coalesce_left(&mut self, span: *mut Span) -> *mut Span {
        let start = unsafe { (*span).start_page };
        if start == 0 {
            return span;
        }

        let left = self.pagemap.get(start - 1);
        if left.is_null() {
            return span;
        }

        unsafe {
            if (*left).state != SpanState::Free {
                return span;
            }
            if (*left).start_page + (*left).num_pages != start {
                return span;
            }

            let left_pages = (*left).num_pages;
            if left_pages <= MAX_PAGES {
                self.free_lists[left_pages].remove(left);
            } else {
                self.large_spans.remove(left);
            }

            (*left).num_pages += (*span).num_pages;
            span::dealloc_span(span);

            left
        }
    }

    /// Try to merge with the free span immediately after `span`.
    unsafe fn coalesce_right(&mut self, span: *mut Span) -> *mut Span {
        let end_page = unsafe { (*span).end_page() };

        let right = self.pagemap.get(end_page);
        if right.is_null() {
            return span;
        }

        unsafe {
            if (*right).state != SpanState::Free {
                return span;
            }
            if (*right).start_page != end_page {
                return span;
            }

            let right_pages = (*right).num_pages;
            if right_pages <= MAX_PAGES {
                self.free_lists[right_pages].remove(right);
            } else {
                self.large_spans.remove(right);
            }

            (*span).num_pages += (*right).num_pages;
            span::dealloc_span(right);

            span
        }
    }
}
