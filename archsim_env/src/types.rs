//! Common types for driving the simulated clock.

use crate::error::EnvError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Wall-clock interval between scheduler ticks (~60 Hz).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Fastest supported simulation speed.
pub const MAX_SPEED: f64 = 5.0;

/// Simulation speed multiplier in `[0, MAX_SPEED]`.
///
/// Simulated time advances by `wall_elapsed * multiplier`. A multiplier of
/// zero freezes the simulated clock.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Speed(f64);

impl Speed {
    /// Clock frozen.
    pub const PAUSED: Speed = Speed(0.0);
    
    /// Real time.
    pub const NORMAL: Speed = Speed(1.0);
    
    /// Creates a speed multiplier, clamping values above `MAX_SPEED`.
    ///
    /// Negative and non-finite multipliers are rejected.
    pub fn new(multiplier: f64) -> Result<Self, EnvError> {
        if !multiplier.is_finite() || multiplier < 0.0 {
            return Err(EnvError::InvalidSpeed(multiplier));
        }
        Ok(Self(multiplier.min(MAX_SPEED)))
    }
    
    /// Returns the raw multiplier.
    pub fn multiplier(&self) -> f64 {
        self.0
    }
    
    /// Returns true if the clock is frozen.
    pub fn is_paused(&self) -> bool {
        self.0 == 0.0
    }
    
    /// Converts a wall-clock duration into simulated time.
    pub fn scale(&self, wall: Duration) -> Duration {
        wall.mul_f64(self.0)
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl std::fmt::Display for Speed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.2}x", self.0)
    }
}

/// Tick cadence of the scheduler: how often it wakes, and how fast the
/// simulated clock runs relative to the wall clock.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TickCadence {
    /// Wall-clock time between ticks
    pub wall_interval: Duration,
    
    /// Speed multiplier applied to each interval
    pub speed: Speed,
}

impl TickCadence {
    /// Creates a cadence with the given interval at normal speed.
    pub fn new(wall_interval: Duration) -> Self {
        Self {
            wall_interval,
            speed: Speed::NORMAL,
        }
    }
    
    /// Sets the speed multiplier.
    pub fn with_speed(mut self, speed: Speed) -> Self {
        self.speed = speed;
        self
    }
    
    /// Simulated time covered by one tick.
    pub fn sim_step(&self) -> Duration {
        self.speed.scale(self.wall_interval)
    }
    
    /// Number of wall-clock ticks per second.
    pub fn ticks_per_second(&self) -> f64 {
        if self.wall_interval.is_zero() {
            0.0
        } else {
            1.0 / self.wall_interval.as_secs_f64()
        }
    }
}

impl Default for TickCadence {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_INTERVAL)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    
    #[test]
    fn test_speed_clamps_and_rejects() {
        assert_eq!(Speed::new(9.0).unwrap().multiplier(), MAX_SPEED);
        assert!(Speed::new(-1.0).is_err());
        assert!(Speed::new(f64::NAN).is_err());
        assert!(Speed::new(0.0).unwrap().is_paused());
    }
    
    #[test]
    fn test_cadence_sim_step() {
        let cadence = TickCadence::new(Duration::from_millis(16))
            .with_speed(Speed::new(2.5).unwrap());
        
        assert!((cadence.sim_step().as_secs_f64() - 0.040).abs() < 1e-9);
        
        let paused = cadence.with_speed(Speed::PAUSED);
        assert_eq!(paused.sim_step(), Duration::ZERO);
    }
}
