//! Process-wide serial number assignment for implicitly numbered streams.
//!
//! The counter starts at 1 and is never reset while the process lives, so two
//! streams created without an explicit serial never share one. It spans the
//! signed 32-bit serial space and wraps after 2^32 assignments; collisions
//! past that point are not guarded against.

use std::sync::atomic::{AtomicI32, Ordering};

static NEXT_SERIAL: AtomicI32 = AtomicI32::new(1);

/// Draws the next serial number from the process-wide counter.
pub fn next_serial() -> i32 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

#[test]
fn serials_are_monotonic() {
    let a = next_serial();
    let b = next_serial();
    assert!(a >= 1);
    assert!(b > a);
}
