//! Central cache: per-size-class free lists shared by all threads.
//!
//! Each class is guarded independently by a spinlock plus an atomically
//! published list head, so different classes never contend with each
//! other. On a miss, a class refills by asking `PageCache` for a span and
//! carving it into contiguous, fixed-size blocks; the class never returns
//! a span back to `PageCache` once carved, so no reverse span lookup is
//! needed here — the free list is entirely self-contained raw pointers.

use crate::config::{ALIGNMENT, FREE_LIST_SIZE, PAGE_SIZE, SPAN_PAGES};
use crate::page_cache::PageCache;
use crate::size_class::size_of_class;
use crate::sync::{SpinLock, SpinMutex};
use crate::{stat_add, stat_inc};
use core::ptr;
use core::sync::atomic::{AtomicPtr, Ordering};
#[cfg(feature = "debug")]
use std::println;

/// An intrusive free-list node: the first word of a free block.
#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
}

/// State for a single size class's shared free list.
struct ClassList {
    lock: SpinLock,
    head: AtomicPtr<FreeNode>,
}

impl ClassList {
    const fn new() -> Self {
        Self {
            lock: SpinLock::new(),
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }
}

/// Singleton holding one `ClassList` per size class.
///
/// Backed by a fixed-size array rather than a heap-allocated slice: this
/// type is itself part of the allocator's own bookkeeping (it lives inside
/// a `static`), so it must never route through the tiers it manages.
pub struct CentralCache {
    classes: [ClassList; FREE_LIST_SIZE],
}

// SAFETY: each ClassList's mutable state transitions happen only while its
// SpinLock is held; the AtomicPtr head may be read lock-free but is only
// ever written under the lock.
unsafe impl Send for CentralCache {}
unsafe impl Sync for CentralCache {}

impl CentralCache {
    pub const fn new() -> Self {
        Self {
            classes: [const { ClassList::new() }; FREE_LIST_SIZE],
        }
    }

    /// Pull up to `batch_num` blocks of class `index` off the shared free
    /// list, refilling from `PageCache` on a miss. Returns the head of a
    /// null-terminated chain, or null if the page cache is exhausted.
    pub fn fetch_range(
        &self,
        page_cache: &SpinMutex<PageCache>,
        index: usize,
        batch_num: usize,
    ) -> *mut u8 {
        assert!(batch_num >= 1);
        let class = &self.classes[index];
        class.lock.lock();

        let head = class.head.load(Ordering::Acquire);
        if !head.is_null() {
            let mut prev = head;
            let mut taken = 1;
            unsafe {
                while taken < batch_num && !(*prev).next.is_null() {
                    prev = (*prev).next;
                    taken += 1;
                }
                let rest = (*prev).next;
                (*prev).next = ptr::null_mut();
                class.head.store(rest, Ordering::Release);
            }
            class.lock.unlock();
            stat_inc!(central_cache_hits);
            return head as *mut u8;
        }

        // Miss: refill from the page cache.
        let block_size = size_of_class(index);
        let span_pages = if block_size > SPAN_PAGES * PAGE_SIZE {
            block_size.div_ceil(PAGE_SIZE)
        } else {
            SPAN_PAGES
        };

        let span_addr = {
            let mut pc = page_cache.lock();
            let span = unsafe { pc.allocate_span(span_pages) };
            if span.is_null() {
                class.lock.unlock();
                return ptr::null_mut();
            }
            unsafe { (*span).start_addr() }
        };
        stat_inc!(page_heap_allocs);

        let total_bytes = span_pages * PAGE_SIZE;
        let total_blocks = total_bytes / block_size;
        let alloc_blocks = batch_num.min(total_blocks).max(1);

        #[cfg(feature = "debug")]
        println!(
            "[central] class {index} refilled span of {span_pages} pages into {total_blocks} blocks"
        );

        // Link the first `alloc_blocks` as the chain we return, in ascending
        // address order; link the remainder as the new class head.
        unsafe {
            let base = span_addr;
            let mut returned_tail: *mut FreeNode = ptr::null_mut();
            for i in 0..alloc_blocks {
                let node = base.add(i * block_size) as *mut FreeNode;
                if i == 0 {
                    returned_tail = node;
                } else {
                    (*returned_tail).next = node;
                    returned_tail = node;
                }
            }
            (*returned_tail).next = ptr::null_mut();
            let returned_head = base as *mut FreeNode;

            let mut new_head: *mut FreeNode = ptr::null_mut();
            let mut tail: *mut FreeNode = ptr::null_mut();
            for i in alloc_blocks..total_blocks {
                let node = base.add(i * block_size) as *mut FreeNode;
                (*node).next = ptr::null_mut();
                if new_head.is_null() {
                    new_head = node;
                    tail = node;
                } else {
                    (*tail).next = node;
                    tail = node;
                }
            }
            class.head.store(new_head, Ordering::Release);
            class.lock.unlock();

            stat_add!(alloc_bytes, alloc_blocks * block_size);
            returned_head as *mut u8
        }
    }

    /// Return a chain of exactly `count` blocks (class `index`) starting at
    /// `start` to the shared free list.
    pub fn return_range(&self, start: *mut u8, count: usize, index: usize) {
        if start.is_null() || count == 0 {
            return;
        }
        let class = &self.classes[index];
        let start = start as *mut FreeNode;

        let mut end = start;
        let mut visited = 1;
        unsafe {
            while visited < count && !(*end).next.is_null() {
                end = (*end).next;
                visited += 1;
            }
        }

        class.lock.lock();
        let old_head = class.head.load(Ordering::Acquire);
        unsafe {
            (*end).next = old_head;
        }
        class.head.store(start, Ordering::Release);
        class.lock.unlock();
    }
}

impl Default for CentralCache {
    fn default() -> Self {
        Self::new()
    }
}

const _: () = assert!(ALIGNMENT > 0);
