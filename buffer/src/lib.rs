//! Fixed-capacity frame rings for context-window feature stages.
//!
//! Derivative-style stages (regression slopes, shifted deltas, temporal
//! DCTs, decision smoothing) all look at a window of frames around the
//! frame currently being emitted. [`ContextRing`] holds exactly that
//! window and nothing more, and pads both edges of the stream by
//! duplicating the first and last genuine frame.
//!
//! ```
//! use stk_buffer::ContextRing;
//!
//! // 1-dim frames, one frame of context on each side.
//! let mut ring = ContextRing::new(1, 1, 1);
//! let mut input = vec![1.0, 2.0, 3.0].into_iter();
//! let mut pull = |buf: &mut [f64]| -> Result<bool, ()> {
//!     match input.next() {
//!         Some(v) => { buf[0] = v; Ok(true) }
//!         None => Ok(false),
//!     }
//! };
//!
//! assert!(ring.advance(&mut pull).unwrap());
//! assert_eq!(ring.frame(-1), &[1.0]); // left edge duplicated
//! assert_eq!(ring.frame(1), &[2.0]);
//! ```

mod context_ring;

pub use context_ring::ContextRing;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ContextRing>();
    }
}
