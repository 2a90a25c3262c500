use std::f32::consts::PI;

/// Second-order low-pass section (bilinear transform, direct form I)
#[derive(Debug, Clone)]
struct Biquad {
    b: [f32; 3],
    a: [f32; 2],
    /// x[n-1], x[n-2], y[n-1], y[n-2]
    state: Option<[f32; 4]>,
}

impl Biquad {
    fn low_pass(cutoff_hz: f32, sample_rate_hz: f32, q: f32) -> Self {
        let w0 = 2.0 * PI * cutoff_hz / sample_rate_hz;
        let (sin, cos) = w0.sin_cos();
        let alpha = sin / (2.0 * q);
        let a0 = 1.0 + alpha;
        Self {
            b: [
                (1.0 - cos) / 2.0 / a0,
                (1.0 - cos) / a0,
                (1.0 - cos) / 2.0 / a0,
            ],
            a: [-2.0 * cos / a0, (1.0 - alpha) / a0],
            state: None,
        }
    }

    fn filter(&mut self, value: f32) -> f32 {
        // Unity DC gain, so priming every tap with the first value yields a flat start
        let [x1, x2, y1, y2] = self.state.unwrap_or([value; 4]);
        let y = self.b[0] * value + self.b[1] * x1 + self.b[2] * x2 - self.a[0] * y1 - self.a[1] * y2;
        self.state = Some([value, x1, y, y1]);
        y
    }

    fn reset(&mut self) {
        self.state = None;
    }
}

/// Causal Butterworth low-pass for a single scalar signal
///
/// Order 2 is one biquad, order 4 is two cascaded biquads with the
/// Butterworth pole Q values.
#[derive(Debug, Clone)]
pub struct Butterworth {
    sections: Vec<Biquad>,
}

impl Butterworth {
    pub fn new(order: usize, cutoff_hz: f32, sample_rate_hz: f32) -> Self {
        let pairs = (order / 2).max(1);
        let sections = (0..pairs)
            .map(|k| {
                let theta = PI * (2 * k + 1) as f32 / (4 * pairs) as f32;
                let q = 1.0 / (2.0 * theta.cos());
                Biquad::low_pass(cutoff_hz, sample_rate_hz, q)
            })
            .collect();
        Self { sections }
    }

    pub fn filter(&mut self, value: f32) -> f32 {
        self.sections
            .iter_mut()
            .fold(value, |v, section| section.filter(v))
    }

    pub fn reset(&mut self) {
        for s in &mut self.sections {
            s.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pole_q_values() {
        let order4 = Butterworth::new(4, 6.0, 30.0);
        assert_eq!(order4.sections.len(), 2);
        let order2 = Butterworth::new(2, 6.0, 30.0);
        assert_eq!(order2.sections.len(), 1);

        // order 2: Q = 1/sqrt(2)
        let theta = PI / 4.0;
        assert!((1.0 / (2.0 * theta.cos()) - std::f32::consts::FRAC_1_SQRT_2).abs() < 1e-6);
    }

    #[test]
    fn test_first_value_passthrough() {
        let mut f = Butterworth::new(4, 6.0, 30.0);
        assert!((f.filter(5.0) - 5.0).abs() < 1e-5);
    }

    #[test]
    fn test_constant_signal_stays_flat() {
        let mut f = Butterworth::new(4, 6.0, 30.0);
        for _ in 0..50 {
            let y = f.filter(42.0);
            assert!((y - 42.0).abs() < 1e-3, "drifted to {}", y);
        }
    }

    #[test]
    fn test_step_is_smoothed_then_converges() {
        let mut f = Butterworth::new(2, 3.0, 30.0);
        f.filter(0.0);
        let first = f.filter(10.0);
        assert!(first > 0.0 && first < 10.0, "expected smoothing, got {}", first);
        let mut last = first;
        for _ in 0..100 {
            last = f.filter(10.0);
        }
        assert!((last - 10.0).abs() < 1e-2, "did not converge: {}", last);
    }

    #[test]
    fn test_attenuates_high_frequency() {
        let mut f = Butterworth::new(4, 2.0, 30.0);
        let mut peak = 0.0f32;
        for i in 0..200 {
            // Nyquist-rate alternation around zero
            let x = if i % 2 == 0 { 1.0 } else { -1.0 };
            let y = f.filter(x);
            if i > 100 {
                peak = peak.max(y.abs());
            }
        }
        assert!(peak < 0.05, "high frequency leaked: {}", peak);
    }

    #[test]
    fn test_reset() {
        let mut f = Butterworth::new(4, 6.0, 30.0);
        f.filter(0.0);
        f.filter(100.0);
        f.reset();
        assert!((f.filter(7.0) - 7.0).abs() < 1e-5);
    }
}
