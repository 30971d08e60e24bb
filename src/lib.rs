#![no_std]
#![cfg_attr(feature = "nightly", feature(allocator_api))]

//! tieralloc: a tiered memory allocator for Rust.
//!
//! Three tiers, fastest to slowest:
//! - Thread cache (per-thread, lock-free free lists) — requires `std`
//! - Central cache (per-size-class spinlock-guarded free lists)
//! - Page cache (span allocation/coalescing, OS interface)
//!
//! Requests wider than the largest size class, or more strictly aligned
//! than the tiers' native alignment, bypass the tiers entirely.
//!
//! # Usage
//!
//! ```ignore
//! #[global_allocator]
//! static GLOBAL: tieralloc::RtAllocator = tieralloc::RtAllocator;
//! ```

#[cfg(test)]
extern crate alloc;
#[cfg(any(test, feature = "std"))]
extern crate std;

pub mod allocator;
pub mod central_cache;
pub mod config;
#[cfg(feature = "ffi")]
pub mod ffi;
#[macro_use]
pub mod macros;
pub mod page_cache;
pub mod pagemap;
pub mod platform;
pub mod size_class;
pub mod span;
#[cfg(feature = "stats")]
pub mod stats;
pub mod sync;
pub mod thread_cache;

pub use allocator::{RtAllocator, allocate, deallocate};

// Panic handler for staticlib builds (no_std has no default panic handler).
// Only active when panic="abort" (i.e., the `fast` profile), not during normal checks.
#[cfg(all(feature = "ffi", not(test), not(feature = "std"), panic = "abort"))]
#[panic_handler]
fn panic(_: &core::panic::PanicInfo) -> ! {
    unsafe extern "C" {
        fn abort() -> !;
    }
    unsafe { abort() }
}
