//! Context window ring over a pulled frame stream.

/// A fixed-capacity ring of frames centred on the frame being emitted.
///
/// `ContextRing` keeps `left + 1 + right` frames of dimension `dim` in one
/// flat arena. Frames are pulled from an upstream closure on demand; the
/// ring always holds the frames `center - left ..= center + right` that
/// exist in the stream, and [`ContextRing::frame`] resolves offsets that
/// fall outside the stream to the first or last genuine frame.
///
/// # Semantics
///
/// - **Start**: the first [`advance`](ContextRing::advance) pulls
///   `right + 1` frames (the centre and its right context). Missing left
///   context duplicates frame 0.
/// - **Steady state**: each further `advance` moves the centre by one and
///   pulls exactly one new frame.
/// - **End**: the first short pull records the stream length (`stop`).
///   From then on nothing is pulled, right context duplicates the last
///   genuine frame, and `advance` reports exhaustion once the centre
///   reaches `stop`.
///
/// The counters are virtual (monotonically increasing frame indices); the
/// arena slot of frame `i` is `i % capacity`. Pulling frame
/// `center + right` only ever overwrites frame `center - left - 1`, which
/// is outside the window.
#[derive(Debug, Clone)]
pub struct ContextRing {
    dim: usize,
    left: usize,
    right: usize,
    capacity: usize,
    slots: Vec<f64>,
    // Virtual counters.
    center: usize,
    written: usize,
    stop: Option<usize>,
    started: bool,
}

impl ContextRing {
    /// Creates a ring for `dim`-sized frames with the given context.
    pub fn new(dim: usize, left: usize, right: usize) -> Self {
        assert!(dim > 0, "frame dimension must be greater than 0");
        let capacity = left + right + 1;
        Self {
            dim,
            left,
            right,
            capacity,
            slots: vec![0.0; capacity * dim],
            center: 0,
            written: 0,
            stop: None,
            started: false,
        }
    }

    /// Returns the frame dimension.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Returns the number of left context frames.
    pub fn left(&self) -> usize {
        self.left
    }

    /// Returns the number of right context frames.
    pub fn right(&self) -> usize {
        self.right
    }

    /// Returns the ring capacity in frames.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the stream index of the current centre frame.
    pub fn center(&self) -> usize {
        self.center
    }

    /// Returns the stream length once the upstream source has ended.
    pub fn stop(&self) -> Option<usize> {
        self.stop
    }

    /// Returns true once the centre has moved past the last genuine frame.
    pub fn is_exhausted(&self) -> bool {
        self.started && self.center >= self.written
    }

    /// Moves the centre to the next frame, pulling from `pull` as needed.
    ///
    /// `pull` fills the given buffer with the next upstream frame and
    /// returns `Ok(false)` when the upstream stream is exhausted.
    /// Returns `Ok(false)` when no further centre frame exists.
    pub fn advance<E, F>(&mut self, mut pull: F) -> Result<bool, E>
    where
        F: FnMut(&mut [f64]) -> Result<bool, E>,
    {
        if !self.started {
            self.started = true;
            self.center = 0;
            for _ in 0..=self.right {
                if !self.pull_one(&mut pull)? {
                    break;
                }
            }
        } else {
            if self.center >= self.written {
                return Ok(false);
            }
            self.center += 1;
            if self.stop.is_none() {
                self.pull_one(&mut pull)?;
            }
        }
        Ok(self.center < self.written)
    }

    fn pull_one<E, F>(&mut self, pull: &mut F) -> Result<bool, E>
    where
        F: FnMut(&mut [f64]) -> Result<bool, E>,
    {
        if self.stop.is_some() {
            return Ok(false);
        }
        let slot = self.written % self.capacity;
        let range = slot * self.dim..(slot + 1) * self.dim;
        if pull(&mut self.slots[range])? {
            self.written += 1;
            Ok(true)
        } else {
            self.stop = Some(self.written);
            Ok(false)
        }
    }

    /// Returns the frame at `offset` relative to the centre.
    ///
    /// Offsets must lie in `-left ..= right`. Positions before the first
    /// or after the last genuine frame resolve to that edge frame.
    pub fn frame(&self, offset: isize) -> &[f64] {
        debug_assert!(self.written > 0, "no frame has been pulled yet");
        debug_assert!(
            offset >= -(self.left as isize) && offset <= self.right as isize,
            "offset {offset} outside context -{}..={}",
            self.left,
            self.right
        );
        let last = self.written.saturating_sub(1) as isize;
        let idx = (self.center as isize + offset).clamp(0, last) as usize;
        let slot = idx % self.capacity;
        &self.slots[slot * self.dim..(slot + 1) * self.dim]
    }

    /// Returns the centre frame.
    pub fn current(&self) -> &[f64] {
        self.frame(0)
    }

    /// Iterates the full window from `-left` to `right`.
    pub fn window(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (-(self.left as isize)..=self.right as isize).map(move |k| self.frame(k))
    }

    /// Clears all frames and counters.
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|v| *v = 0.0);
        self.center = 0;
        self.written = 0;
        self.stop = None;
        self.started = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(values: Vec<f64>) -> impl FnMut(&mut [f64]) -> Result<bool, ()> {
        let mut it = values.into_iter();
        move |buf: &mut [f64]| match it.next() {
            Some(v) => {
                buf[0] = v;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn drain(ring: &mut ContextRing, values: Vec<f64>) -> Vec<Vec<f64>> {
        let mut pull = source(values);
        let mut out = Vec::new();
        while ring.advance(&mut pull).unwrap() {
            out.push(ring.window().map(|f| f[0]).collect());
        }
        out
    }

    #[test]
    fn test_symmetric_context_pads_both_edges() {
        let mut ring = ContextRing::new(1, 2, 2);
        let windows = drain(&mut ring, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(
            windows,
            vec![
                vec![1.0, 1.0, 1.0, 2.0, 3.0],
                vec![1.0, 1.0, 2.0, 3.0, 4.0],
                vec![1.0, 2.0, 3.0, 4.0, 4.0],
                vec![2.0, 3.0, 4.0, 4.0, 4.0],
            ]
        );
        assert_eq!(ring.stop(), Some(4));
        assert!(ring.is_exhausted());
    }

    #[test]
    fn test_future_only_context() {
        let mut ring = ContextRing::new(1, 0, 3);
        let windows = drain(&mut ring, vec![1.0, 2.0, 3.0]);
        assert_eq!(
            windows,
            vec![
                vec![1.0, 2.0, 3.0, 3.0],
                vec![2.0, 3.0, 3.0, 3.0],
                vec![3.0, 3.0, 3.0, 3.0],
            ]
        );
    }

    #[test]
    fn test_stream_shorter_than_context() {
        let mut ring = ContextRing::new(1, 3, 3);
        let windows = drain(&mut ring, vec![7.0]);
        assert_eq!(windows, vec![vec![7.0; 7]]);
    }

    #[test]
    fn test_empty_stream() {
        let mut ring = ContextRing::new(1, 1, 1);
        let windows = drain(&mut ring, vec![]);
        assert!(windows.is_empty());
        assert_eq!(ring.stop(), Some(0));
    }

    #[test]
    fn test_long_stream_wraps_arena() {
        let mut ring = ContextRing::new(2, 1, 1);
        let mut n = 0.0;
        let mut pull = |buf: &mut [f64]| -> Result<bool, ()> {
            if n >= 100.0 {
                return Ok(false);
            }
            buf[0] = n;
            buf[1] = -n;
            n += 1.0;
            Ok(true)
        };
        let mut count = 0;
        while ring.advance(&mut pull).unwrap() {
            let c = ring.center() as f64;
            assert_eq!(ring.current(), &[c, -c]);
            if ring.center() > 0 && ring.center() < 99 {
                assert_eq!(ring.frame(-1)[0], c - 1.0);
                assert_eq!(ring.frame(1)[0], c + 1.0);
            }
            count += 1;
        }
        assert_eq!(count, 100);
    }

    #[test]
    fn test_advance_after_exhaustion_stays_exhausted() {
        let mut ring = ContextRing::new(1, 1, 1);
        let mut pull = source(vec![1.0]);
        assert!(ring.advance(&mut pull).unwrap());
        assert!(!ring.advance(&mut pull).unwrap());
        assert!(!ring.advance(&mut pull).unwrap());
    }

    #[test]
    fn test_error_propagates() {
        let mut ring = ContextRing::new(1, 0, 1);
        let result = ring.advance(|_: &mut [f64]| -> Result<bool, &str> { Err("boom") });
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn test_reset() {
        let mut ring = ContextRing::new(1, 1, 1);
        drain(&mut ring, vec![1.0, 2.0]);
        ring.reset();
        let windows = drain(&mut ring, vec![5.0]);
        assert_eq!(windows, vec![vec![5.0, 5.0, 5.0]]);
    }
}
