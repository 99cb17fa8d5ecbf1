//! Fractional-rate packet-sizing accumulator. An 8000 Hz microframe clock
//! cannot divide evenly into 44100 Hz, so the host accumulates the remainder
//! and lets the carry ripple into an extra sample every few packets instead
//! of rounding every packet the same way.

use crate::config::Rate;

/// Per-direction accumulator driving `next_samples()`. At 48 kHz the
/// division is exact and every packet carries 6 frames; at 44.1 kHz the
/// pattern alternates 5s and 6s with a period of 8000 microframes.
#[derive(Debug, Clone, Copy)]
pub struct RateClock {
    rate: Rate,
    accumulator: u32,
}

impl RateClock {
    pub fn new(rate: Rate) -> Self {
        Self {
            rate,
            accumulator: 0,
        }
    }

    pub fn reset(&mut self) {
        self.accumulator = 0;
    }

    pub fn set_rate(&mut self, rate: Rate) {
        self.rate = rate;
        self.reset();
    }

    /// Number of sample frames the next microframe's packet should carry.
    pub fn next_samples(&mut self) -> u32 {
        if self.rate.as_hz() == 48000 {
            return 6;
        }
        self.accumulator += 4100;
        if self.accumulator >= 8000 {
            self.accumulator -= 8000;
            6
        } else {
            5
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// At 48 kHz every call returns exactly 6, regardless of history.
    #[test]
    fn hz48000_is_always_six() {
        let mut clock = RateClock::new(Rate::Hz48000);
        for _ in 0..100 {
            assert_eq!(clock.next_samples(), 6);
        }
    }

    /// At 44.1 kHz, summing `next_samples()` over any window whose length
    /// is a multiple of the 8000-microframe period yields exactly
    /// `period * 44100 / 8000` frames -- i.e. the accumulator never drifts.
    #[test]
    fn hz44100_sum_over_one_second_is_exact() {
        let mut clock = RateClock::new(Rate::Hz44100);
        let sum: u32 = (0..8000).map(|_| clock.next_samples()).sum();
        assert_eq!(sum, 44100);
        assert_eq!(clock.accumulator, 0);
    }

    #[test]
    fn hz44100_never_returns_anything_but_five_or_six() {
        let mut clock = RateClock::new(Rate::Hz44100);
        for _ in 0..8000 {
            let n = clock.next_samples();
            assert!(n == 5 || n == 6, "unexpected packet size {n}");
        }
    }

    #[test]
    fn set_rate_resets_the_accumulator() {
        let mut clock = RateClock::new(Rate::Hz44100);
        for _ in 0..37 {
            clock.next_samples();
        }
        clock.set_rate(Rate::Hz44100);
        assert_eq!(clock.accumulator, 0);
    }
}
