//! # Flight Detector
//!
//! Hysteresis state machine that turns a noisy ground-speed signal into
//! discrete flight start/end events.
//!
//! A flight starts once speed has stayed at or above `start_speed` for
//! `start_confirm`, and ends once it has stayed at or below `end_speed` for
//! `end_confirm`. Timing uses wall-clock deltas, so dropped packets still
//! count toward confirmation.

use std::time::{Duration, Instant};

use crate::config::DetectorConfig;

/// Detector thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Speed (mph) at or above which a takeoff is being confirmed
    pub start_speed: f64,
    /// Speed (mph) at or below which a landing is being confirmed
    pub end_speed: f64,
    /// Time speed must stay at or above `start_speed`
    pub start_confirm: Duration,
    /// Time speed must stay at or below `end_speed`
    pub end_confirm: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            start_speed: 5.0,
            end_speed: 2.0,
            start_confirm: Duration::from_secs(5),
            end_confirm: Duration::from_secs(30),
        }
    }
}

impl From<&DetectorConfig> for Thresholds {
    fn from(config: &DetectorConfig) -> Self {
        Self {
            start_speed: config.start_speed,
            end_speed: config.end_speed,
            start_confirm: confirm_duration(config.start_confirm_s),
            end_confirm: confirm_duration(config.end_confirm_s),
        }
    }
}

/// Seconds to a `Duration`, saturating instead of panicking when out of range
fn confirm_duration(seconds: f64) -> Duration {
    Duration::try_from_secs_f64(seconds).unwrap_or(if seconds > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Detector state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightState {
    Grounded,
    Flying,
}

/// Result of one [`FlightDetector::update`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlightEvent {
    Started,
    Ended,
    None,
}

/// Two-state hysteresis machine
#[derive(Debug, Clone)]
pub struct FlightDetector {
    thresholds: Thresholds,
    state: FlightState,
    above_start_since: Option<Instant>,
    below_end_since: Option<Instant>,
}

impl Default for FlightDetector {
    fn default() -> Self {
        Self::new(Thresholds::default())
    }
}

impl FlightDetector {
    /// Create a grounded detector
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            thresholds,
            state: FlightState::Grounded,
            above_start_since: None,
            below_end_since: None,
        }
    }

    /// Feed one speed reading
    ///
    /// # Arguments
    ///
    /// * `speed` - Ground speed in mph
    /// * `now` - When the reading was taken
    ///
    /// # Returns
    ///
    /// * `FlightEvent` - `Started`/`Ended` on a confirmed transition, `None` otherwise
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::{Duration, Instant};
    /// use flight_tracker::detector::{FlightDetector, FlightEvent};
    ///
    /// let mut detector = FlightDetector::default();
    /// let t0 = Instant::now();
    ///
    /// assert_eq!(detector.update(6.0, t0), FlightEvent::None);
    /// assert_eq!(detector.update(6.0, t0 + Duration::from_secs(5)), FlightEvent::Started);
    /// ```
    pub fn update(&mut self, speed: f64, now: Instant) -> FlightEvent {
        match self.state {
            FlightState::Grounded => {
                if speed < self.thresholds.start_speed {
                    self.above_start_since = None;
                    return FlightEvent::None;
                }

                let since = *self.above_start_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= self.thresholds.start_confirm {
                    self.transition(FlightState::Flying);
                    return FlightEvent::Started;
                }
            }
            FlightState::Flying => {
                if speed > self.thresholds.end_speed {
                    self.below_end_since = None;
                    return FlightEvent::None;
                }

                let since = *self.below_end_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= self.thresholds.end_confirm {
                    self.transition(FlightState::Grounded);
                    return FlightEvent::Ended;
                }
            }
        }

        FlightEvent::None
    }

    /// Force the detector back to `Grounded` with no pending confirmation
    pub fn reset(&mut self) {
        self.transition(FlightState::Grounded);
    }

    pub fn state(&self) -> FlightState {
        self.state
    }

    pub fn is_flying(&self) -> bool {
        self.state == FlightState::Flying
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    fn transition(&mut self, state: FlightState) {
        self.state = state;
        self.above_start_since = None;
        self.below_end_since = None;
    }
}
