// src/signal.rs
//
// Simulated traffic light. The phase is a pure function of elapsed video
// time and the configured green/red durations:
//
//   cycle = green + red
//   phase = GREEN  if floor(t) mod cycle < green
//           RED    otherwise
//
// Every multiple of the cycle length is GREEN again, whatever came before.

use serde::{Deserialize, Serialize};

use crate::error::{CounterError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalPhase {
    Green,
    Red,
}

impl SignalPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Green => "GREEN",
            Self::Red => "RED",
        }
    }

    pub fn is_green(&self) -> bool {
        matches!(self, Self::Green)
    }
}

/// Validated green/red durations in whole seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalTiming {
    green_duration_s: u32,
    red_duration_s: u32,
}

impl SignalTiming {
    /// Fails with `CounterError::Config` when either duration is negative or
    /// the cycle length is zero.
    pub fn new(green_duration_s: i64, red_duration_s: i64) -> Result<Self> {
        if green_duration_s < 0 || red_duration_s < 0 {
            return Err(CounterError::config(format!(
                "signal durations must be non-negative (green={}, red={})",
                green_duration_s, red_duration_s
            )));
        }
        let green = u32::try_from(green_duration_s)
            .map_err(|_| CounterError::config("green duration out of range"))?;
        let red = u32::try_from(red_duration_s)
            .map_err(|_| CounterError::config("red duration out of range"))?;
        if green as u64 + red as u64 == 0 {
            return Err(CounterError::config(
                "signal cycle length (green + red) must be greater than zero",
            ));
        }
        Ok(Self {
            green_duration_s: green,
            red_duration_s: red,
        })
    }

    pub fn green_duration_s(&self) -> u32 {
        self.green_duration_s
    }

    pub fn red_duration_s(&self) -> u32 {
        self.red_duration_s
    }

    pub fn cycle_s(&self) -> u64 {
        self.green_duration_s as u64 + self.red_duration_s as u64
    }

    pub fn phase_at(&self, elapsed_s: f64) -> SignalPhase {
        let cycle = self.cycle_s() as i64;
        let second = elapsed_s.floor() as i64;
        if second.rem_euclid(cycle) < self.green_duration_s as i64 {
            SignalPhase::Green
        } else {
            SignalPhase::Red
        }
    }
}

/// One-shot form of [`SignalTiming::phase_at`] that validates the durations
/// on every call.
pub fn phase(elapsed_s: f64, green_duration_s: i64, red_duration_s: i64) -> Result<SignalPhase> {
    Ok(SignalTiming::new(green_duration_s, red_duration_s)?.phase_at(elapsed_s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_boundaries_20_5() {
        let timing = SignalTiming::new(20, 5).unwrap();
        assert_eq!(timing.phase_at(0.0), SignalPhase::Green);
        assert_eq!(timing.phase_at(19.9), SignalPhase::Green);
        assert_eq!(timing.phase_at(20.0), SignalPhase::Red);
        assert_eq!(timing.phase_at(24.9), SignalPhase::Red);
        assert_eq!(timing.phase_at(25.0), SignalPhase::Green);
    }

    #[test]
    fn test_phase_resyncs_every_cycle() {
        let timing = SignalTiming::new(20, 5).unwrap();
        for k in 0..10 {
            let start = (k * 25) as f64;
            assert_eq!(timing.phase_at(start), SignalPhase::Green, "cycle {}", k);
            assert_eq!(timing.phase_at(start + 21.0), SignalPhase::Red, "cycle {}", k);
        }
    }

    #[test]
    fn test_zero_cycle_rejected() {
        let err = SignalTiming::new(0, 0).unwrap_err();
        assert!(matches!(err, CounterError::Config(_)));
        assert!(phase(3.0, 0, 0).is_err());
    }

    #[test]
    fn test_negative_duration_rejected() {
        assert!(matches!(
            SignalTiming::new(-5, 10),
            Err(CounterError::Config(_))
        ));
    }

    #[test]
    fn test_always_green_and_always_red() {
        let green_only = SignalTiming::new(10, 0).unwrap();
        assert!((0..50).all(|s| green_only.phase_at(s as f64) == SignalPhase::Green));

        let red_only = SignalTiming::new(0, 10).unwrap();
        assert!((0..50).all(|s| red_only.phase_at(s as f64) == SignalPhase::Red));
    }

    #[test]
    fn test_one_shot_phase() {
        assert_eq!(phase(0.5, 20, 5).unwrap(), SignalPhase::Green);
        assert_eq!(phase(22.0, 20, 5).unwrap(), SignalPhase::Red);
    }
}
