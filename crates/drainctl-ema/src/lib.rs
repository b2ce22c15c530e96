//! drainctl-ema — bounded-history exponential smoothing.
//!
//! A weighted aggregator over the last `n` samples, where the weight of a
//! sample `i` steps old is `α^i` with `α = 0.05^(1/n)`: the sample inserted
//! `n` steps ago would carry 5% of the newest sample's weight, and is
//! dropped. Two variants share the buffer:
//!
//! - **average** — weighted sum divided by the total weight
//! - **integral** — weighted sum alone, for callers that only ever take a
//!   ratio of two integrals or compare one against a fixed threshold (the
//!   missing denominators cancel)
//!
//! Not thread-safe on purpose: an `Ema` lives inside a single control task.

use std::collections::VecDeque;

/// Exponentially weighted moving average (or integral) over a bounded
/// sample window.
#[derive(Debug, Clone)]
pub struct Ema {
    history: VecDeque<f64>,
    size: usize,
    /// Per-step decay factor, `0.05^(1/size)`.
    decay: f64,
    /// Integral variant: skip the weight-sum normalisation.
    integral: bool,
}

impl Ema {
    /// Weighted moving average over the last `size` samples.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn average(size: usize) -> Self {
        Self::with_variant(size, false)
    }

    /// Weighted moving integral over the last `size` samples. Identical
    /// weighting to [`Ema::average`], without the final normalisation.
    ///
    /// # Panics
    ///
    /// Panics if `size` is zero.
    pub fn integral(size: usize) -> Self {
        Self::with_variant(size, true)
    }

    fn with_variant(size: usize, integral: bool) -> Self {
        assert!(size >= 1, "smoother size must be positive");
        Self {
            history: VecDeque::with_capacity(size),
            size,
            decay: (1.0f64 / 20.0).powf(1.0 / size as f64),
            integral,
        }
    }

    /// Append a sample, dropping the oldest one once the window is full.
    pub fn add(&mut self, value: f64) {
        if self.history.len() == self.size {
            self.history.pop_front();
        }
        self.history.push_back(value);
    }

    /// Current smoothed value. An empty window reads as 0.
    pub fn value(&self) -> f64 {
        if self.history.is_empty() {
            return 0.0;
        }

        let mut value = 0.0;
        let mut weight = 1.0;
        let mut total_weight = 0.0;
        for sample in self.history.iter().rev() {
            value += sample * weight;
            total_weight += weight;
            weight *= self.decay;
        }

        if self.integral {
            value
        } else {
            value / total_weight
        }
    }

    /// Number of samples currently held.
    pub fn len(&self) -> usize {
        self.history.len()
    }

    /// Whether no samples have been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// The per-step decay factor `α`.
    pub fn decay(&self) -> f64 {
        self.decay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn empty_window_reads_zero() {
        assert_eq!(Ema::average(5).value(), 0.0);
        assert_eq!(Ema::integral(5).value(), 0.0);
    }

    #[test]
    #[should_panic(expected = "smoother size must be positive")]
    fn zero_size_is_rejected() {
        Ema::average(0);
    }

    #[test]
    fn decay_puts_the_nth_sample_at_five_percent() {
        for n in [1, 5, 20, 100] {
            let ema = Ema::average(n);
            assert!(close(ema.decay().powi(n as i32), 0.05), "n = {n}");
        }
    }

    #[test]
    fn weights_follow_the_decay_powers() {
        // A single 1.0 pushed back by zeros must surface as α^i / Σα^j.
        let n = 6;
        let ema = Ema::average(n);
        let alpha = ema.decay();

        for age in 0..n {
            let mut ema = Ema::average(n);
            ema.add(1.0);
            for _ in 0..age {
                ema.add(0.0);
            }
            let total: f64 = (0..=age).map(|j| alpha.powi(j as i32)).sum();
            assert!(
                close(ema.value(), alpha.powi(age as i32) / total),
                "age = {age}"
            );
        }
    }

    #[test]
    fn average_tracks_a_reference_computation() {
        let mut ema = Ema::average(5);
        let alpha = (1.0f64 / 20.0).powf(1.0 / 5.0);

        let inputs = [1.0, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 21.0, 34.0, -55.0, -89.0, -144.0];

        for (idx, &input) in inputs.iter().enumerate() {
            ema.add(input);

            // Reference: weighted sum over the kept window, newest weight 1.
            let window = &inputs[idx.saturating_sub(4)..=idx];
            let mut expected = 0.0;
            let mut total_weight = 0.0;
            for (age, &sample) in window.iter().rev().enumerate() {
                expected += sample * alpha.powi(age as i32);
                total_weight += alpha.powi(age as i32);
            }
            expected /= total_weight;

            assert!(close(ema.value(), expected), "sample {idx}");
        }
    }

    #[test]
    fn window_drops_the_oldest_sample() {
        let mut ema = Ema::average(3);
        for v in [100.0, 1.0, 1.0, 1.0] {
            ema.add(v);
        }
        // The 100.0 left the window entirely.
        assert_eq!(ema.len(), 3);
        assert!(close(ema.value(), 1.0));
    }

    #[test]
    fn integral_ratios_cancel_the_missing_denominator() {
        // Two integrals over proportional streams read as the proportion.
        let mut top = Ema::integral(10);
        let mut bottom = Ema::integral(10);
        for _ in 0..7 {
            top.add(3.0);
            bottom.add(12.0);
        }
        assert!(close(top.value() / bottom.value(), 0.25));
    }

    #[test]
    fn integral_of_a_constant_exceeds_the_average() {
        let mut avg = Ema::average(4);
        let mut int = Ema::integral(4);
        for _ in 0..4 {
            avg.add(2.0);
            int.add(2.0);
        }
        assert!(close(avg.value(), 2.0));
        assert!(int.value() > avg.value());
    }
}
