//! Stack growth for recursive walks over the block tree.
//!
//! Counting, placement, value numbering and the balance checker all recurse
//! once per nested continuation. Generated programs can nest loops and
//! conditionals far deeper than hand-written ones, so every recursive entry
//! point goes through [`ensure_sufficient_stack`].
//!
//! On native targets the stack is grown with `stacker` when less than
//! [`RED_ZONE`] bytes remain. On `wasm32` the closure is called directly.

/// Remaining stack below which a new segment is allocated.
pub const RED_ZONE: usize = 128 * 1024;

/// Size of each newly allocated stack segment.
pub const SEGMENT_SIZE: usize = 2 * 1024 * 1024;

/// Run `f`, first growing the stack if the red zone has been reached.
#[inline]
#[cfg(not(target_arch = "wasm32"))]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(RED_ZONE, SEGMENT_SIZE, f)
}

/// Run `f` directly; the wasm runtime manages its own stack.
#[inline]
#[cfg(target_arch = "wasm32")]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    f()
}

#[cfg(test)]
mod tests;
