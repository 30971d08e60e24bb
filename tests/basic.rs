//! Basic correctness across the tier boundary and edge sizes.

use std::alloc::{GlobalAlloc, Layout};
use tieralloc::config::{ALIGNMENT, MAX_BYTES, THREAD_DRAIN_THRESHOLD};
use tieralloc::RtAllocator;

#[global_allocator]
static GLOBAL: RtAllocator = RtAllocator;

#[test]
fn round_trip_basic() {
    let layout = Layout::from_size_align(128, ALIGNMENT).unwrap();
    let ptr = unsafe { GLOBAL.alloc(layout) };
    assert!(!ptr.is_null());
    unsafe {
        ptr.write_bytes(0x5A, 128);
        assert_eq!(*ptr, 0x5A);
        GLOBAL.dealloc(ptr, layout);
    }
}

#[test]
fn edge_sizes_at_and_around_the_class_boundary() {
    for &size in &[0usize, 1, ALIGNMENT, MAX_BYTES, MAX_BYTES + 1] {
        let layout = Layout::from_size_align(size.max(1), ALIGNMENT).unwrap();
        let ptr = unsafe { GLOBAL.alloc(layout) };
        assert!(!ptr.is_null(), "alloc({size}) returned null");
        if size > 0 {
            unsafe {
                ptr.write_bytes(0x11, size);
                assert_eq!(*ptr, 0x11);
            }
        }
        unsafe { GLOBAL.dealloc(ptr, layout) };
    }
}

#[test]
fn functional_allocate_deallocate_surface() {
    let p = tieralloc::allocate(64);
    assert!(!p.is_null());
    unsafe {
        p.write_bytes(0x22, 64);
        tieralloc::deallocate(p, 64);
    }
}

#[test]
fn drain_watermark_over_network_of_frees() {
    // Allocate more than the drain threshold's worth of same-class blocks,
    // then free them all — the thread cache should trim back down instead
    // of growing unboundedly.
    let layout = Layout::from_size_align(ALIGNMENT, ALIGNMENT).unwrap();
    let mut ptrs = Vec::with_capacity(THREAD_DRAIN_THRESHOLD * 3);
    for _ in 0..THREAD_DRAIN_THRESHOLD * 3 {
        let p = unsafe { GLOBAL.alloc(layout) };
        assert!(!p.is_null());
        ptrs.push(p);
    }
    for p in ptrs {
        unsafe { GLOBAL.dealloc(p, layout) };
    }

    // The allocator should still be able to serve further requests of the
    // same class after the drain.
    let p = unsafe { GLOBAL.alloc(layout) };
    assert!(!p.is_null());
    unsafe { GLOBAL.dealloc(p, layout) };
}
