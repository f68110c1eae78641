//! # Ingestion Module
//!
//! Drives the pipeline for every transport line:
//!
//! ```text
//! line -> decode -> detector.update(speed) -> store start/log/end -> live.apply -> broadcast
//! ```
//!
//! The [`Ingestor`] is the single owner of all write-side state. Each step is
//! strictly ordered, so a subscriber never sees `flight_started` before the
//! session exists in the store.

use std::future::Future;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::detector::{FlightDetector, FlightEvent, Thresholds};
use crate::error::{FlightTrackerError, Result};
use crate::live::{LiveCoordinator, LiveView, SessionChange};
use crate::packet::decoder::classify;
use crate::packet::protocol::{Frame, Rejection, TelemetrySample};
use crate::serial::{LineReader, TransportConnector};
use crate::store::{FlightSession, SessionStore};

/// Counters for one ingestion run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Non-empty lines seen
    pub lines: u64,
    /// Lines decoded into samples
    pub samples: u64,
    /// Lines discarded by the decoder
    pub rejected: u64,
    /// Signal-lost sentinels
    pub signal_lost: u64,
}

/// What one line did
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Empty,
    Rejected(Rejection),
    SignalLost,
    Sample(SessionChange),
}

/// Single writer of session and live state
pub struct Ingestor {
    detector: FlightDetector,
    store: SessionStore,
    live: LiveCoordinator,
    active_session: Option<String>,
    verify_checksum: bool,
    read_timeout: Duration,
    reconnect_interval: Duration,
    stats: IngestStats,
}

impl Ingestor {
    pub fn new(config: &Config, store: SessionStore) -> Self {
        Self {
            detector: FlightDetector::new(Thresholds::from(&config.detector)),
            store,
            live: LiveCoordinator::new(config.live.channel_capacity),
            active_session: None,
            verify_checksum: config.packet.verify_checksum,
            read_timeout: Duration::from_millis(config.serial.timeout_ms),
            reconnect_interval: Duration::from_millis(config.serial.reconnect_interval_ms),
            stats: IngestStats::default(),
        }
    }

    /// Read-only handle for dashboards and other observers
    pub fn view(&self) -> LiveView {
        self.live.view()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active_session.as_deref()
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Report a session left open by a previous run
    ///
    /// The session is not closed here; it is closed explicitly when the next
    /// flight starts.
    pub fn recover(&self) -> Result<Option<FlightSession>> {
        let open = self.store.open_session()?;
        if let Some(session) = &open {
            warn!(
                "Session {} (started {}) was left open by a previous run",
                session.id, session.start_time
            );
        }
        Ok(open)
    }

    /// Process one transport line received now
    pub fn process_line(&mut self, line: &str) -> Result<LineOutcome> {
        self.process_line_at(line, Instant::now())
    }

    /// Process one transport line with an explicit detector clock
    ///
    /// # Errors
    ///
    /// Only persistence failures are returned; malformed lines are counted
    /// and discarded.
    pub fn process_line_at(&mut self, line: &str, now: Instant) -> Result<LineOutcome> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(LineOutcome::Empty);
        }
        self.stats.lines += 1;

        match classify(line, self.verify_checksum) {
            Frame::SignalLost => {
                self.stats.signal_lost += 1;
                warn!("Receiver reported signal lost");
                self.live.signal_lost();
                Ok(LineOutcome::SignalLost)
            }
            Frame::Rejected(rejection) => {
                self.stats.rejected += 1;
                debug!("Discarding line ({}): {:?}", rejection, line);
                Ok(LineOutcome::Rejected(rejection))
            }
            Frame::Telemetry(sample) => {
                self.stats.samples += 1;
                let change = self.ingest_sample(&sample, now)?;
                Ok(LineOutcome::Sample(change))
            }
        }
    }

    fn ingest_sample(&mut self, sample: &TelemetrySample, now: Instant) -> Result<SessionChange> {
        let change = match self.detector.update(sample.speed, now) {
            FlightEvent::Started => {
                let id = self.start_session()?;
                self.active_session = Some(id.clone());
                SessionChange::Started(id)
            }
            FlightEvent::Ended => match self.active_session.take() {
                Some(id) => {
                    self.store.end(&id)?;
                    SessionChange::Ended(id)
                }
                None => SessionChange::None,
            },
            FlightEvent::None => SessionChange::None,
        };

        if let Some(id) = &self.active_session {
            self.store.log(id, sample)?;
        }

        self.live.apply(sample, &change);
        Ok(change)
    }

    /// Open a session, first closing one left open by a previous run
    fn start_session(&mut self) -> Result<String> {
        match self.store.start() {
            Ok(id) => Ok(id),
            Err(FlightTrackerError::SessionAlreadyOpen(stale)) => {
                // Close it where its data stops, not now
                let ended_at = match self.store.get_session(&stale)? {
                    Some(record) => record
                        .points
                        .last()
                        .map(|point| point.timestamp)
                        .unwrap_or(record.session.start_time),
                    None => Utc::now(),
                };
                warn!("Closing stale session {} at {}", stale, ended_at);
                self.store.end_at(&stale, ended_at)?;
                self.store.start()
            }
            Err(e) => Err(e),
        }
    }

    /// Run until `shutdown` resolves
    ///
    /// Reconnects whenever the transport is unavailable or fails. An open
    /// session is left open on shutdown. Lines are processed on tokio's
    /// blocking pool, one at a time and in arrival order, so SQLite never
    /// blocks a runtime thread.
    ///
    /// # Errors
    ///
    /// Returns the first persistence failure; transport and decode problems
    /// are logged and retried.
    pub async fn run<C, S>(mut self, connector: &mut C, shutdown: S) -> Result<IngestStats>
    where
        C: TransportConnector + ?Sized,
        S: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let (ingestor, recovered) = self.offload(|ingestor| ingestor.recover()).await?;
        self = ingestor;
        recovered?;

        let mut reader: Option<Box<dyn LineReader>> = None;

        let thresholds = *self.detector.thresholds();
        info!(
            "Ingestion started (takeoff >= {} mph for {:?}, landing <= {} mph for {:?})",
            thresholds.start_speed,
            thresholds.start_confirm,
            thresholds.end_speed,
            thresholds.end_confirm
        );

        loop {
            if reader.is_none() {
                tokio::select! {
                    _ = &mut shutdown => break,
                    result = connector.connect() => match result {
                        Ok(connected) => {
                            self.live.set_connected(true);
                            reader = Some(connected);
                        }
                        Err(e) => {
                            debug!("Receiver unavailable: {}", e);
                            self.live.set_connected(false);
                            tokio::select! {
                                _ = &mut shutdown => break,
                                _ = sleep(self.reconnect_interval) => {}
                            }
                        }
                    }
                }
                continue;
            }

            let active = match reader.as_mut() {
                Some(active) => active,
                None => continue,
            };

            tokio::select! {
                _ = &mut shutdown => break,
                result = timeout(self.read_timeout, active.read_line()) => match result {
                    // Quiet link, keep waiting
                    Err(_) => {}
                    Ok(Ok(Some(line))) => {
                        let (ingestor, processed) = self
                            .offload(move |ingestor| ingestor.process_line(&line))
                            .await?;
                        self = ingestor;
                        if let Err(e) = processed {
                            error!("Failed to persist telemetry: {}", e);
                            return Err(e);
                        }
                    }
                    Ok(Ok(None)) => {
                        warn!("Receiver closed the connection");
                        reader = None;
                        self.live.set_connected(false);
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = sleep(self.reconnect_interval) => {}
                        }
                    }
                    Ok(Err(e)) => {
                        warn!("Serial read failed: {}", e);
                        reader = None;
                        self.live.set_connected(false);
                        tokio::select! {
                            _ = &mut shutdown => break,
                            _ = sleep(self.reconnect_interval) => {}
                        }
                    }
                }
            }
        }

        if let Some(id) = &self.active_session {
            info!("Shutting down with session {} still open", id);
        }
        info!(
            "Ingestion stopped: {} lines, {} samples, {} rejected, {} signal-lost",
            self.stats.lines, self.stats.samples, self.stats.rejected, self.stats.signal_lost
        );

        Ok(self.stats)
    }

    /// Run a blocking step on tokio's blocking pool, handing the ingestor back
    async fn offload<T, F>(mut self, step: F) -> Result<(Self, Result<T>)>
    where
        F: FnOnce(&mut Self) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (ingestor, result) = tokio::task::spawn_blocking(move || {
            let result = step(&mut self);
            (self, result)
        })
        .await?;
        Ok((ingestor, result))
    }
}
