//! Thread cache: the fast allocation path.
//!
//! Strictly thread-local — no synchronization on the free lists themselves.
//! Each class has a simple `(head, length)` intrusive LIFO stack. A miss
//! pulls a batch from `CentralCache`; exceeding the drain watermark pushes
//! a quarter back. Dropping a `ThreadCache` flushes every remaining class
//! back to `CentralCache` first, so per-thread blocks aren't stranded when
//! a thread exits.
//!
//! The per-class list array is sized `FREE_LIST_SIZE` entries (one per
//! size class) and is sourced directly from `platform::page_alloc` rather
//! than through `Box`/`Vec` — if this crate is installed as the process's
//! `#[global_allocator]`, building a `ThreadCache` via the ordinary heap
//! would recursively invoke the very allocator being constructed.

use crate::central_cache::CentralCache;
use crate::config::{ALIGNMENT, FREE_LIST_SIZE, PAGE_SIZE, THREAD_DRAIN_THRESHOLD, get_batch_num};
use crate::page_cache::PageCache;
use crate::platform;
use crate::size_class::size_of_class;
use crate::stat_inc;
use crate::sync::SpinMutex;
use core::ptr;

#[repr(C)]
struct FreeNode {
    next: *mut FreeNode,
}

#[repr(C)]
struct FreeList {
    head: *mut FreeNode,
    length: usize,
}

/// Per-thread state: one `FreeList` per size class.
pub struct ThreadCache {
    lists: *mut FreeList,
    backing_pages: usize,
}

// SAFETY: a ThreadCache is only ever reachable from the single thread that
// owns it (see `tls::with`); it is never shared.
unsafe impl Send for ThreadCache {}

impl ThreadCache {
    fn new() -> Self {
        let bytes = FREE_LIST_SIZE * core::mem::size_of::<FreeList>();
        let pages = bytes.div_ceil(PAGE_SIZE);
        let alloc_size = pages * PAGE_SIZE;
        // page_alloc returns zeroed memory: every FreeList starts as
        // { head: null, length: 0 }, which is exactly the empty state.
        let raw = unsafe { platform::page_alloc(alloc_size) };
        assert!(!raw.is_null(), "failed to reserve thread-cache storage");
        Self {
            lists: raw as *mut FreeList,
            backing_pages: pages,
        }
    }

    #[inline]
    fn list(&mut self, index: usize) -> &mut FreeList {
        assert!(index < FREE_LIST_SIZE);
        unsafe { &mut *self.lists.add(index) }
    }

    /// Allocate a block of size class `index`, refilling from `CentralCache`
    /// on a miss. Returns null only when the central cache (and, beneath
    /// it, the page cache) is exhausted.
    pub fn allocate(
        &mut self,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        index: usize,
    ) -> *mut u8 {
        let list = self.list(index);
        if !list.head.is_null() {
            stat_inc!(thread_cache_hits);
            let node = list.head;
            unsafe {
                list.head = (*node).next;
            }
            list.length -= 1;
            return node as *mut u8;
        }
        stat_inc!(thread_cache_misses);
        self.refill(central, page_cache, index)
    }

    fn refill(
        &mut self,
        central: &CentralCache,
        page_cache: &SpinMutex<PageCache>,
        index: usize,
    ) -> *mut u8 {
        let block_size = size_of_class(index);
        let batch = get_batch_num(block_size);

        let start = central.fetch_range(page_cache, index, batch);
        if start.is_null() {
            return ptr::null_mut();
        }

        let first = start as *mut FreeNode;
        let rest = unsafe { (*first).next };
        unsafe {
            (*first).next = ptr::null_mut();
        }

        let count = count_chain(rest);
        let list = self.list(index);
        list.head = rest;
        list.length = count;

        start
    }

    /// Push `ptr` (a block of class `index`) back onto the free list,
    /// draining to `CentralCache` if the watermark is exceeded.
    pub fn deallocate(&mut self, central: &CentralCache, ptr: *mut u8, index: usize) {
        let list = self.list(index);
        let node = ptr as *mut FreeNode;
        unsafe {
            (*node).next = list.head;
        }
        list.head = node;
        list.length += 1;

        if list.length > THREAD_DRAIN_THRESHOLD {
            self.drain(central, index);
        }
    }

    fn drain(&mut self, central: &CentralCache, index: usize) {
        let list = self.list(index);
        let n = list.length;
        if n <= 1 {
            return;
        }
        let keep = (n / 4).max(1);
        let return_count = n - keep;

        let mut split = list.head;
        for _ in 0..keep.saturating_sub(1) {
            split = unsafe { (*split).next };
        }
        let tail_head = unsafe { (*split).next };
        unsafe {
            (*split).next = ptr::null_mut();
        }
        list.length = keep;

        central.return_range(tail_head as *mut u8, return_count, index);
    }

    /// Drain every non-empty class's free list back to `CentralCache`.
    /// Called from `Drop`, so this runs exactly once at thread exit.
    pub fn flush_all(&mut self, central: &CentralCache) {
        for index in 0..FREE_LIST_SIZE {
            let list = self.list(index);
            if list.head.is_null() {
                continue;
            }
            let count = list.length;
            let head = list.head;
            list.head = ptr::null_mut();
            list.length = 0;
            central.return_range(head as *mut u8, count, index);
        }
    }
}

impl Drop for ThreadCache {
    fn drop(&mut self) {
        // Return every held block before releasing the list-array storage,
        // so thread exit can't leak blocks the central cache would otherwise
        // never see again.
        self.flush_all(&crate::allocator::CENTRAL_CACHE);
        let bytes = self.backing_pages * PAGE_SIZE;
        unsafe { platform::page_dealloc(self.lists as *mut u8, bytes) };
    }
}

fn count_chain(mut node: *mut FreeNode) -> usize {
    let mut n = 0;
    while !node.is_null() {
        n += 1;
        node = unsafe { (*node).next };
    }
    n
}

const _: () = assert!(ALIGNMENT > 0);

/// Thread-local binding: each OS thread lazily owns exactly one
/// `ThreadCache`. `ThreadCache`'s own `Drop` impl flushes it to
/// `CentralCache` when `std::thread_local!` tears the cell down at thread
/// exit, so no separate destructor registration is needed here.
#[cfg(any(test, feature = "std"))]
pub mod tls {
    use super::ThreadCache;
    use core::cell::RefCell;

    std::thread_local! {
        static CELL: RefCell<Option<ThreadCache>> = const { RefCell::new(None) };
    }

    /// Run `f` with the calling thread's `ThreadCache`, lazily constructing
    /// it on first use.
    pub fn with<R>(f: impl FnOnce(&mut ThreadCache) -> R) -> R {
        CELL.with(|cell| {
            let mut slot = cell.borrow_mut();
            if slot.is_none() {
                *slot = Some(ThreadCache::new());
            }
            f(slot.as_mut().unwrap())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagemap::PageMap;
    use alloc::boxed::Box;

    fn make() -> (SpinMutex<PageCache>, CentralCache) {
        let pm = Box::leak(Box::new(PageMap::new()));
        (SpinMutex::new(PageCache::new(pm)), CentralCache::new())
    }

    #[test]
    fn allocate_then_deallocate_reuses_block() {
        let (pc, cc) = make();
        let mut tc = ThreadCache::new();
        let index = crate::size_class::index_of(8);

        let p1 = tc.allocate(&cc, &pc, index);
        assert!(!p1.is_null());
        tc.deallocate(&cc, p1, index);
        let p2 = tc.allocate(&cc, &pc, index);
        assert_eq!(p1, p2);
    }

    #[test]
    fn drain_triggers_past_threshold() {
        let (pc, cc) = make();
        let mut tc = ThreadCache::new();
        let index = crate::size_class::index_of(8);

        let mut blocks = alloc::vec::Vec::new();
        for _ in 0..(THREAD_DRAIN_THRESHOLD + 1) {
            let p = tc.allocate(&cc, &pc, index);
            assert!(!p.is_null());
            blocks.push(p);
        }
        for p in blocks {
            tc.deallocate(&cc, p, index);
        }
        assert!(tc.list(index).length <= THREAD_DRAIN_THRESHOLD);
    }

    #[test]
    fn flush_all_returns_everything() {
        let (pc, cc) = make();
        let mut tc = ThreadCache::new();
        let index = crate::size_class::index_of(16);

        let p = tc.allocate(&cc, &pc, index);
        tc.deallocate(&cc, p, index);
        assert!(tc.list(index).length > 0);

        tc.flush_all(&cc);
        assert_eq!(tc.list(index).length, 0);

        let p2 = cc.fetch_range(&pc, index, 1);
        assert!(!p2.is_null());
    }

    #[test]
    fn drain_watermark_keeps_quarter() {
        // 200 frees with no intervening allocation: after the 65th free the
        // watermark policy should have dropped the list to ceil(65/4)=17,
        // and the remainder should be observable via the central cache.
        let (pc, cc) = make();
        let mut tc = ThreadCache::new();
        let index = crate::size_class::index_of(8);

        // Seed 200 distinct blocks via direct central-cache carving so we
        // have 200 valid, distinct addresses of this class to free.
        let mut addrs = alloc::vec::Vec::new();
        while addrs.len() < 200 {
            let head = cc.fetch_range(&pc, index, 64);
            assert!(!head.is_null());
            let mut node = head;
            while !node.is_null() && addrs.len() < 200 {
                addrs.push(node);
                node = unsafe { (*(node as *mut FreeNode)).next };
            }
        }

        for &addr in &addrs {
            tc.deallocate(&cc, addr, index);
        }
        assert!(tc.list(index).length <= THREAD_DRAIN_THRESHOLD);
    }
}
