//! Compile-time configuration.
//!
//! Every constant here is fixed at build time. There is no runtime
//! configuration, no environment variable, and no build-script code
//! generation step — changing any of these means recompiling.

/// Minimum block size and alignment guarantee of every `allocate` result
/// that goes through the tiers.
pub const ALIGNMENT: usize = 8;

/// Upper bound on requests serviced by the tiers. Anything larger goes
/// straight to the system allocator.
pub const MAX_BYTES: usize = 262_144;

/// Number of size classes: one per `ALIGNMENT`-sized step up to `MAX_BYTES`.
pub const FREE_LIST_SIZE: usize = MAX_BYTES / ALIGNMENT;

/// Page size used by `PageCache` and the platform backend.
pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Default span size (in pages) fetched from `PageCache` for small classes.
pub const SPAN_PAGES: usize = 8;

/// Free-list length above which a thread drains to the central cache.
pub const THREAD_DRAIN_THRESHOLD: usize = 64;

/// Largest page count tracked by `PageCache`'s exact-size free-list array;
/// spans larger than this live in the overflow `large_spans` list.
pub const MAX_PAGES: usize = 256;

const _: () = assert!(
    ALIGNMENT >= core::mem::size_of::<usize>(),
    "ALIGNMENT must be at least a pointer width to hold the intrusive free-list link"
);

const _: () = assert!(FREE_LIST_SIZE * ALIGNMENT == MAX_BYTES);

/// Batch size policy for `ThreadCache::refill` — the number of blocks
/// pulled from `CentralCache` on a thread-cache miss.
///
/// Minimum of an object-size-based table and a byte cap; both halves of
/// the rule are fixed, and neither is tuned independently.
#[inline]
pub const fn get_batch_num(block_size: usize) -> usize {
    let base = if block_size <= 32 {
        64
    } else if block_size <= 64 {
        32
    } else if block_size <= 128 {
        16
    } else if block_size <= 256 {
        8
    } else if block_size <= 512 {
        4
    } else if block_size <= 1024 {
        2
    } else {
        1
    };

    let byte_cap = if block_size == 0 {
        4096
    } else {
        let cap = 4096 / block_size;
        if cap == 0 { 1 } else { cap }
    };

    if base < byte_cap { base } else { byte_cap }
}
