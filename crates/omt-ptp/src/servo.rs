//! PI servo filtering measured drift into clock corrections.

use tracing::debug;

/// Servo operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServoState {
    /// Applying full-offset step corrections
    Stepping,
    /// Tracking within the lock window with PI-filtered corrections
    Locked,
}

/// Proportional-integral servo.
///
/// Samples and corrections are in 100 ns ticks. The first sample, and any
/// sample past the step threshold, is stepped in full and resets the
/// integral term; everything else gets `kp * d + ki * integral`.
#[derive(Debug, Clone)]
pub struct PiServo {
    kp: f64,
    ki: f64,
    step_threshold: i64,
    integral: f64,
    stepped: bool,
    state: ServoState,
}

/// Default proportional gain.
pub const DEFAULT_KP: f64 = 0.7;

/// Default integral gain.
pub const DEFAULT_KI: f64 = 0.3;

/// Default step threshold: 100 ms in 100 ns ticks.
pub const DEFAULT_STEP_THRESHOLD: i64 = 1_000_000;

/// Lock window: 1 ms in 100 ns ticks.
const LOCK_WINDOW: i64 = 10_000;

impl Default for PiServo {
    fn default() -> Self {
        Self::new(DEFAULT_KP, DEFAULT_KI, DEFAULT_STEP_THRESHOLD)
    }
}

impl PiServo {
    /// Create a servo with explicit gains and step threshold (100 ns ticks).
    pub fn new(kp: f64, ki: f64, step_threshold: i64) -> Self {
        Self {
            kp,
            ki,
            step_threshold,
            integral: 0.0,
            stepped: false,
            state: ServoState::Stepping,
        }
    }

    /// Current operating mode.
    pub fn state(&self) -> ServoState {
        self.state
    }

    /// Forget all history; the next sample steps in full.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.stepped = false;
        self.state = ServoState::Stepping;
    }

    /// Feed one drift sample, returning the correction to apply.
    pub fn process_sample(&mut self, drift: i64) -> i64 {
        if !self.stepped || drift.abs() > self.step_threshold {
            self.integral = 0.0;
            self.stepped = true;
            self.state = ServoState::Stepping;
            debug!("Servo step: {} ticks", drift);
            return drift;
        }

        let correction = self.kp * drift as f64 + self.ki * self.integral;
        self.integral += drift as f64;

        let clamp = (10 * self.step_threshold) as f64;
        self.integral = self.integral.clamp(-clamp, clamp);

        self.state = if drift.abs() < LOCK_WINDOW {
            ServoState::Locked
        } else {
            ServoState::Stepping
        };

        correction as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_sample_steps() {
        let mut servo = PiServo::default();
        let correction = servo.process_sample(123);
        assert_eq!(correction, 123);
        assert_eq!(servo.state(), ServoState::Stepping);
    }

    #[test]
    fn test_locking_sequence() {
        // 50 ms, 20 ms, 5 ms, 500 us in 100 ns ticks
        let samples: [i64; 4] = [500_000, 200_000, 50_000, 5_000];
        let expected = [
            ServoState::Stepping,
            ServoState::Stepping,
            ServoState::Stepping,
            ServoState::Locked,
        ];

        let mut servo = PiServo::default();
        for (sample, want) in samples.iter().zip(expected) {
            servo.process_sample(*sample);
            assert_eq!(servo.state(), want, "after sample {sample}");
        }
    }

    #[test]
    fn test_large_sample_re_steps() {
        let mut servo = PiServo::default();
        servo.process_sample(100);
        servo.process_sample(50);
        assert_eq!(servo.state(), ServoState::Locked);

        // 200 ms drift exceeds the threshold: full step, integral reset
        let correction = servo.process_sample(2_000_000);
        assert_eq!(correction, 2_000_000);
        assert_eq!(servo.state(), ServoState::Stepping);
        // Next small sample has no stale integral contribution
        let correction = servo.process_sample(10);
        assert_eq!(correction, (0.7f64 * 10.0) as i64);
    }

    #[test]
    fn test_correction_bounded() {
        let mut servo = PiServo::default();
        servo.process_sample(0); // initial step
        for _ in 0..1_000 {
            let correction = servo.process_sample(900_000);
            let bound = (0.7 * 900_000.0 + 0.3 * 10_000_000.0) as i64;
            assert!(correction.abs() <= bound, "correction {correction} over bound");
        }
    }

    #[test]
    fn test_reset_forgets_history() {
        let mut servo = PiServo::default();
        servo.process_sample(100);
        servo.process_sample(100);
        servo.reset();
        assert_eq!(servo.process_sample(77), 77);
        assert_eq!(servo.state(), ServoState::Stepping);
    }
}
