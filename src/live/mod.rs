//! # Live State Module
//!
//! Process-wide snapshot of "current telemetry + flight status", pushed to
//! any number of observers.
//!
//! The ingestion worker owns the only [`LiveCoordinator`], which is the sole
//! writer. Observers hold a cloneable [`LiveView`] and only ever receive
//! copies of the state: either by calling [`LiveView::snapshot`] or through
//! [`LiveEvent`]s from [`LiveView::subscribe`].

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::packet::protocol::TelemetrySample;

/// One coordinate of the active flight's path
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PathPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Current telemetry and flight status
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LiveState {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude: f64,
    pub speed: f64,
    pub satellites: u32,
    pub rssi: i32,
    pub snr: f64,
    /// Capture time of the last sample
    pub timestamp: Option<DateTime<Utc>>,
    pub connected: bool,
    pub in_flight: bool,
    pub flight_id: Option<String>,
    pub peak_speed: f64,
    pub peak_altitude: f64,
    /// Path of the active flight, cleared when a new flight starts
    pub flight_path: Vec<PathPoint>,
}

/// Session transition produced by one ingestion step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionChange {
    Started(String),
    Ended(String),
    None,
}

/// Notification pushed to subscribers
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LiveEvent {
    /// Full snapshot after a decoded sample
    #[serde(rename = "flight_data")]
    Snapshot(LiveState),
    FlightStarted { session_id: String },
    FlightEnded { session_id: String },
    SignalLost,
}

impl LiveEvent {
    /// Serialize as a JSON object tagged with `type`
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

struct Shared {
    state: RwLock<LiveState>,
    events: broadcast::Sender<LiveEvent>,
}

impl Shared {
    fn read(&self) -> RwLockReadGuard<'_, LiveState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, LiveState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn publish(&self, event: LiveEvent) {
        // No subscribers is not an error
        if self.events.send(event).is_err() {
            debug!("No live subscribers");
        }
    }
}

/// Sole writer of [`LiveState`]
pub struct LiveCoordinator {
    shared: Arc<Shared>,
}

impl LiveCoordinator {
    /// Create a coordinator with neutral state
    ///
    /// # Arguments
    ///
    /// * `capacity` - Events buffered per subscriber before it lags
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(capacity.max(1));
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(LiveState::default()),
                events,
            }),
        }
    }

    /// Read-only handle for observers
    pub fn view(&self) -> LiveView {
        LiveView {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Apply one decoded sample and its session transition, then broadcast
    ///
    /// Transition events are sent before the snapshot that reflects them.
    pub fn apply(&mut self, sample: &TelemetrySample, change: &SessionChange) {
        let snapshot = {
            let mut state = self.shared.write();

            state.latitude = sample.latitude;
            state.longitude = sample.longitude;
            state.altitude = sample.altitude;
            state.speed = sample.speed;
            state.satellites = sample.satellites;
            state.rssi = sample.rssi;
            state.snr = sample.snr;
            state.timestamp = Some(sample.timestamp);
            state.connected = true;

            match change {
                SessionChange::Started(id) => {
                    state.in_flight = true;
                    state.flight_id = Some(id.clone());
                    state.flight_path.clear();
                    state.peak_speed = sample.speed;
                    state.peak_altitude = sample.altitude;
                }
                SessionChange::Ended(_) => {
                    state.in_flight = false;
                    state.flight_id = None;
                }
                SessionChange::None => {}
            }

            if state.in_flight {
                state.flight_path.push(PathPoint {
                    lat: sample.latitude,
                    lng: sample.longitude,
                });
                state.peak_speed = state.peak_speed.max(sample.speed);
                state.peak_altitude = state.peak_altitude.max(sample.altitude);
            }

            state.clone()
        };

        match change {
            SessionChange::Started(id) => self.shared.publish(LiveEvent::FlightStarted {
                session_id: id.clone(),
            }),
            SessionChange::Ended(id) => self.shared.publish(LiveEvent::FlightEnded {
                session_id: id.clone(),
            }),
            SessionChange::None => {}
        }
        self.shared.publish(LiveEvent::Snapshot(snapshot));
    }

    /// Receiver reported loss of the radio link
    pub fn signal_lost(&mut self) {
        self.shared.write().connected = false;
        self.shared.publish(LiveEvent::SignalLost);
    }

    /// Record transport availability, broadcasting a snapshot if it changed
    pub fn set_connected(&mut self, connected: bool) {
        let snapshot = {
            let mut state = self.shared.write();
            if state.connected == connected {
                return;
            }
            state.connected = connected;
            state.clone()
        };
        self.shared.publish(LiveEvent::Snapshot(snapshot));
    }

    pub fn snapshot(&self) -> LiveState {
        self.shared.read().clone()
    }
}

/// Cloneable read-only handle to the live state
#[derive(Clone)]
pub struct LiveView {
    shared: Arc<Shared>,
}

impl LiveView {
    /// Copy of the current state
    pub fn snapshot(&self) -> LiveState {
        self.shared.read().clone()
    }

    /// Receive every event published from now on
    pub fn subscribe(&self) -> broadcast::Receiver<LiveEvent> {
        self.shared.events.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared.events.receiver_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn sample(latitude: f64, speed: f64, altitude: f64) -> TelemetrySample {
        TelemetrySample {
            latitude,
            longitude: -122.4,
            altitude,
            speed,
            satellites: 7,
            rssi: -90,
            snr: 4.0,
            timestamp: Utc::now(),
        }
    }

    fn drain(rx: &mut broadcast::Receiver<LiveEvent>) -> Vec<LiveEvent> {
        let mut events = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(event) => events.push(event),
                Err(TryRecvError::Empty) => return events,
                Err(e) => panic!("unexpected receive error: {:?}", e),
            }
        }
    }

    #[test]
    fn test_initial_state_is_neutral() {
        let coordinator = LiveCoordinator::new(16);
        let state = coordinator.view().snapshot();

        assert_eq!(state, LiveState::default());
        assert!(!state.connected);
        assert!(!state.in_flight);
        assert!(state.flight_id.is_none());
        assert!(state.flight_path.is_empty());
    }

    #[test]
    fn test_sample_updates_fields_and_broadcasts() {
        let mut coordinator = LiveCoordinator::new(16);
        let view = coordinator.view();
        let mut rx = view.subscribe();

        let s = sample(37.7, 3.0, 10.0);
        coordinator.apply(&s, &SessionChange::None);

        let state = view.snapshot();
        assert!(state.connected);
        assert_eq!(state.latitude, 37.7);
        assert_eq!(state.speed, 3.0);
        assert_eq!(state.satellites, 7);
        assert_eq!(state.rssi, -90);
        assert_eq!(state.timestamp, Some(s.timestamp));

        let events = drain(&mut rx);
        assert_eq!(events, vec![LiveEvent::Snapshot(state)]);
    }

    #[test]
    fn test_grounded_samples_do_not_touch_flight_fields() {
        let mut coordinator = LiveCoordinator::new(16);
        coordinator.apply(&sample(1.0, 4.0, 99.0), &SessionChange::None);

        let state = coordinator.snapshot();
        assert_eq!(state.peak_speed, 0.0);
        assert_eq!(state.peak_altitude, 0.0);
        assert!(state.flight_path.is_empty());
    }

    #[test]
    fn test_broadcast_even_when_unchanged() {
        let mut coordinator = LiveCoordinator::new(16);
        let mut rx = coordinator.view().subscribe();
        let s = sample(1.0, 1.0, 1.0);

        coordinator.apply(&s, &SessionChange::None);
        coordinator.apply(&s, &SessionChange::None);

        assert_eq!(drain(&mut rx).len(), 2);
    }

    #[test]
    fn test_started_resets_flight_state() {
        let mut coordinator = LiveCoordinator::new(16);
        let view = coordinator.view();

        // Leftovers from a previous flight
        coordinator.apply(&sample(1.0, 50.0, 300.0), &SessionChange::Started("old".into()));
        coordinator.apply(&sample(1.1, 1.0, 1.0), &SessionChange::Ended("old".into()));

        let mut rx = view.subscribe();
        coordinator.apply(&sample(2.0, 6.0, 20.0), &SessionChange::Started("new".into()));

        let state = view.snapshot();
        assert!(state.in_flight);
        assert_eq!(state.flight_id.as_deref(), Some("new"));
        assert_eq!(state.peak_speed, 6.0);
        assert_eq!(state.peak_altitude, 20.0);
        assert_eq!(state.flight_path, vec![PathPoint { lat: 2.0, lng: -122.4 }]);

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![
                LiveEvent::FlightStarted { session_id: "new".into() },
                LiveEvent::Snapshot(state),
            ]
        );
    }

    #[test]
    fn test_active_flight_accumulates_path_and_peaks() {
        let mut coordinator = LiveCoordinator::new(16);

        coordinator.apply(&sample(1.0, 6.0, 10.0), &SessionChange::Started("f".into()));
        coordinator.apply(&sample(2.0, 15.0, 5.0), &SessionChange::None);
        coordinator.apply(&sample(3.0, 9.0, 40.0), &SessionChange::None);

        let state = coordinator.snapshot();
        assert_eq!(state.peak_speed, 15.0);
        assert_eq!(state.peak_altitude, 40.0);
        let lats: Vec<f64> = state.flight_path.iter().map(|p| p.lat).collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_ended_keeps_peaks_visible() {
        let mut coordinator = LiveCoordinator::new(16);
        let mut rx = coordinator.view().subscribe();

        coordinator.apply(&sample(1.0, 30.0, 100.0), &SessionChange::Started("f".into()));
        coordinator.apply(&sample(2.0, 1.0, 2.0), &SessionChange::Ended("f".into()));
        coordinator.apply(&sample(3.0, 0.0, 0.0), &SessionChange::None);

        let state = coordinator.snapshot();
        assert!(!state.in_flight);
        assert!(state.flight_id.is_none());
        assert_eq!(state.peak_speed, 30.0);
        assert_eq!(state.peak_altitude, 100.0);
        // Landing sample is not part of the path
        assert_eq!(state.flight_path.len(), 1);

        let events = drain(&mut rx);
        assert!(events.contains(&LiveEvent::FlightEnded { session_id: "f".into() }));
        let ended_at = events
            .iter()
            .position(|e| matches!(e, LiveEvent::FlightEnded { .. }))
            .unwrap();
        match &events[ended_at + 1] {
            LiveEvent::Snapshot(s) => assert!(!s.in_flight),
            other => panic!("Expected snapshot after FlightEnded, got: {:?}", other),
        }
    }

    #[test]
    fn test_signal_lost() {
        let mut coordinator = LiveCoordinator::new(16);
        coordinator.apply(&sample(1.0, 1.0, 1.0), &SessionChange::None);

        let mut rx = coordinator.view().subscribe();
        coordinator.signal_lost();

        assert!(!coordinator.snapshot().connected);
        assert_eq!(drain(&mut rx), vec![LiveEvent::SignalLost]);
    }

    #[test]
    fn test_set_connected_only_broadcasts_changes() {
        let mut coordinator = LiveCoordinator::new(16);
        let mut rx = coordinator.view().subscribe();

        coordinator.set_connected(false);
        assert!(drain(&mut rx).is_empty());

        coordinator.set_connected(true);
        coordinator.set_connected(true);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], LiveEvent::Snapshot(s) if s.connected));
    }

    #[test]
    fn test_snapshot_is_a_copy() {
        let mut coordinator = LiveCoordinator::new(16);
        coordinator.apply(&sample(1.0, 6.0, 1.0), &SessionChange::Started("f".into()));

        let before = coordinator.view().snapshot();
        coordinator.apply(&sample(2.0, 6.0, 1.0), &SessionChange::None);

        assert_eq!(before.flight_path.len(), 1);
        assert_eq!(coordinator.snapshot().flight_path.len(), 2);
    }

    #[test]
    fn test_apply_without_subscribers() {
        let mut coordinator = LiveCoordinator::new(1);
        coordinator.apply(&sample(1.0, 1.0, 1.0), &SessionChange::None);
        coordinator.signal_lost();
        assert_eq!(coordinator.view().subscriber_count(), 0);
    }

    #[test]
    fn test_event_json() {
        let json = LiveEvent::FlightStarted { session_id: "20240601_120000".into() }
            .to_json()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "flight_started");
        assert_eq!(value["session_id"], "20240601_120000");

        let json = LiveEvent::SignalLost.to_json().unwrap();
        assert_eq!(json, r#"{"type":"signal_lost"}"#);

        let json = LiveEvent::Snapshot(LiveState::default()).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "flight_data");
        assert_eq!(value["in_flight"], false);
        assert!(value["flight_path"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_subscriber_receives_across_tasks() {
        let mut coordinator = LiveCoordinator::new(16);
        let mut rx = coordinator.view().subscribe();

        let reader = tokio::spawn(async move { rx.recv().await });
        coordinator.signal_lost();

        let event = reader.await.unwrap().unwrap();
        assert_eq!(event, LiveEvent::SignalLost);
    }
}
