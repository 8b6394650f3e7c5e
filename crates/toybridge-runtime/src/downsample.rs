//! Throughput control for dense signal streams.
//!
//! After a dispatch is accepted, the next `skip` mapped samples are let
//! through for liveness only and not dispatched.  With `skip == 0` nothing
//! is ever skipped.

#[derive(Debug, Clone, Copy, Default)]
pub struct Downsampler {
    skip: u32,
    remaining: u32,
}

impl Downsampler {
    pub fn new(skip: u32) -> Self {
        Self { skip, remaining: 0 }
    }

    /// `true` if the current sample may be dispatched.
    pub fn admit(&mut self) -> bool {
        if self.remaining == 0 {
            true
        } else {
            self.remaining -= 1;
            false
        }
    }

    /// Restart the skip window after an accepted dispatch.
    pub fn dispatched(&mut self) {
        self.remaining = self.skip;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_skip_admits_everything() {
        let mut d = Downsampler::new(0);
        for _ in 0..5 {
            assert!(d.admit());
            d.dispatched();
        }
    }

    #[test]
    fn skips_window_after_dispatch() {
        let mut d = Downsampler::new(2);
        assert!(d.admit());
        d.dispatched();
        assert!(!d.admit());
        assert!(!d.admit());
        assert!(d.admit());
        // Without a new dispatch the window stays open.
        assert!(d.admit());
    }
}
