//! # Session Store
//!
//! Durable record of flight sessions and their points, backed by SQLite.
//!
//! This module handles:
//! - Opening sessions with unique, time-sortable ids
//! - Appending points while maintaining peaks, distance and start coordinate
//! - Closing sessions with duration and end coordinate
//! - Listing sessions and fetching one with all of its points
//!
//! Every operation runs under one per-store mutex, and every mutation runs in
//! one SQLite transaction, so readers never see half of a `log` call.
//! Methods block; async callers go through [`SessionStore::call`], which runs
//! them on tokio's blocking pool.
//! Operations on an unknown or closed session are silent no-ops; only
//! persistence failures are returned as errors.

pub mod distance;
pub mod models;
pub mod schema;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, error, info};

use crate::error::{FlightTrackerError, Result};
use crate::packet::protocol::TelemetrySample;

use distance::haversine_m;
pub use models::{FlightPoint, FlightRecord, FlightSession};

const SESSION_COLUMNS: &str = "id, start_time, end_time, duration_seconds, peak_speed, \
     peak_altitude, total_distance, start_lat, start_lon, end_lat, end_lon";

const POINT_COLUMNS: &str =
    "flight_id, timestamp, latitude, longitude, altitude, speed, satellites, rssi, snr";

/// Handle to the session database
///
/// Cloning is cheap; clones share one connection and one lock.
#[derive(Clone)]
pub struct SessionStore {
    conn: Arc<Mutex<Connection>>,
    path: Option<Arc<PathBuf>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Open (or create) the database at `path` and run migrations
    ///
    /// # Errors
    ///
    /// Returns error if the parent directory cannot be created, the file
    /// cannot be opened, or migrations fail
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)?;
        if let Err(e) = conn.pragma_update(None, "journal_mode", "WAL") {
            error!("Failed to enable WAL mode: {}", e);
        }

        let store = Self::with_connection(conn, Some(path))?;
        info!("Flight database opened at {}", store.path_display());
        Ok(store)
    }

    /// Open a private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?, None)
    }

    fn with_connection(mut conn: Connection, path: Option<PathBuf>) -> Result<Self> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        schema::run_migrations(&mut conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path.map(Arc::new),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref().map(PathBuf::as_path)
    }

    fn path_display(&self) -> String {
        self.path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A panic mid-call leaves at most an uncommitted transaction, which
        // SQLite rolls back when it is dropped.
        match self.conn.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Run store operations on the blocking thread pool
    ///
    /// # Examples
    ///
    /// ```
    /// # tokio_test::block_on(async {
    /// use flight_tracker::store::SessionStore;
    ///
    /// let store = SessionStore::open_in_memory()?;
    /// let sessions = store.call(|store| store.list_sessions()).await?;
    /// assert!(sessions.is_empty());
    /// # Ok::<(), flight_tracker::error::FlightTrackerError>(())
    /// # }).unwrap();
    /// ```
    pub async fn call<F, T>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(&SessionStore) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = self.clone();
        tokio::task::spawn_blocking(move || operation(&store)).await?
    }

    /// Open a new session starting now
    ///
    /// # Returns
    ///
    /// * `Result<String>` - Id of the new session
    ///
    /// # Errors
    ///
    /// * `SessionAlreadyOpen` if another session has no end time
    /// * `Storage` on persistence failure
    pub fn start(&self) -> Result<String> {
        self.start_at(Utc::now())
    }

    /// Open a new session with an explicit start time
    pub fn start_at(&self, now: DateTime<Utc>) -> Result<String> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let open: Option<String> = tx
            .query_row("SELECT id FROM flights WHERE end_time IS NULL LIMIT 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        if let Some(open_id) = open {
            return Err(FlightTrackerError::SessionAlreadyOpen(open_id));
        }

        let base = now.format("%Y%m%d_%H%M%S").to_string();
        let mut id = base.clone();
        let mut suffix = 0u32;
        while tx
            .query_row("SELECT 1 FROM flights WHERE id = ?1", params![id], |_| Ok(()))
            .optional()?
            .is_some()
        {
            suffix += 1;
            id = format!("{}-{}", base, suffix);
        }

        tx.execute(
            "INSERT INTO flights (id, start_time, peak_speed, peak_altitude, total_distance)
             VALUES (?1, ?2, 0, 0, 0)",
            params![id, format_time(&now)],
        )?;
        tx.commit()?;

        info!("Flight session {} started", id);
        Ok(id)
    }

    /// Append a point to an open session and update its aggregates
    ///
    /// Peak speed/altitude become `max(current, point)`; the first point
    /// also sets the start coordinate and seeds the peaks; distance grows
    /// by the great-circle hop from the previous point.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Point was logged
    /// * `Ok(false)` - Session unknown or already closed, nothing changed
    pub fn log(&self, session_id: &str, sample: &TelemetrySample) -> Result<bool> {
        let point = FlightPoint::from_sample(session_id, sample);
        for (field, value) in [
            ("latitude", point.latitude),
            ("longitude", point.longitude),
            ("altitude", point.altitude),
            ("speed", point.speed),
            ("snr", point.snr),
        ] {
            if !value.is_finite() {
                return Err(FlightTrackerError::InvalidData(format!(
                    "{} is not finite",
                    field
                )));
            }
        }

        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let is_open: Option<bool> = tx
            .query_row(
                "SELECT end_time IS NULL FROM flights WHERE id = ?1",
                params![point.session_id],
                |row| row.get(0),
            )
            .optional()?;
        if is_open != Some(true) {
            debug!("Ignoring point for unknown or closed session {}", session_id);
            return Ok(false);
        }

        let previous: Option<(f64, f64)> = tx
            .query_row(
                "SELECT latitude, longitude FROM flight_data
                 WHERE flight_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let hop = previous
            .map(|(lat, lon)| haversine_m(lat, lon, point.latitude, point.longitude))
            .unwrap_or(0.0);

        tx.execute(
            "INSERT INTO flight_data
             (flight_id, timestamp, latitude, longitude, altitude, speed, satellites, rssi, snr)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                point.session_id,
                format_time(&point.timestamp),
                point.latitude,
                point.longitude,
                point.altitude,
                point.speed,
                point.satellites,
                point.rssi,
                point.snr,
            ],
        )?;

        // SET expressions read the pre-update row, so `start_lat IS NULL`
        // means this is the session's first point.
        tx.execute(
            "UPDATE flights
             SET peak_speed = CASE WHEN start_lat IS NULL THEN ?1 ELSE MAX(peak_speed, ?1) END,
                 peak_altitude = CASE WHEN start_lat IS NULL THEN ?2 ELSE MAX(peak_altitude, ?2) END,
                 total_distance = total_distance + ?3,
                 start_lat = COALESCE(start_lat, ?4),
                 start_lon = COALESCE(start_lon, ?5)
             WHERE id = ?6",
            params![
                point.speed,
                point.altitude,
                hop,
                point.latitude,
                point.longitude,
                point.session_id,
            ],
        )?;

        tx.commit()?;
        Ok(true)
    }

    /// Close a session now
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - Session was closed
    /// * `Ok(false)` - Session unknown or already closed, nothing changed
    pub fn end(&self, session_id: &str) -> Result<bool> {
        self.end_at(session_id, Utc::now())
    }

    /// Close a session with an explicit end time
    ///
    /// Duration is whole seconds since start, truncated. The end coordinate
    /// is the last logged point, or stays unset if none was logged.
    pub fn end_at(&self, session_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;

        let row: Option<(String, Option<String>)> = tx
            .query_row(
                "SELECT start_time, end_time FROM flights WHERE id = ?1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        let start_time = match row {
            Some((start_time, None)) => parse_time(&start_time, "start_time")?,
            Some((_, Some(_))) => {
                debug!("Session {} already closed", session_id);
                return Ok(false);
            }
            None => {
                debug!("Ignoring end for unknown session {}", session_id);
                return Ok(false);
            }
        };

        let duration = (now - start_time).num_seconds().max(0);

        let last_point: Option<(f64, f64)> = tx
            .query_row(
                "SELECT latitude, longitude FROM flight_data
                 WHERE flight_id = ?1 ORDER BY id DESC LIMIT 1",
                params![session_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        tx.execute(
            "UPDATE flights
             SET end_time = ?1, duration_seconds = ?2, end_lat = ?3, end_lon = ?4
             WHERE id = ?5",
            params![
                format_time(&now),
                duration,
                last_point.map(|(lat, _)| lat),
                last_point.map(|(_, lon)| lon),
                session_id,
            ],
        )?;
        tx.commit()?;

        info!("Flight session {} ended after {}s", session_id, duration);
        Ok(true)
    }

    /// All sessions, most recent start first
    pub fn list_sessions(&self) -> Result<Vec<FlightSession>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flights ORDER BY start_time DESC, id DESC",
            SESSION_COLUMNS
        ))?;

        let mut rows = stmt.query([])?;
        let mut sessions = Vec::new();
        while let Some(row) = rows.next()? {
            sessions.push(row_to_session(row)?);
        }

        Ok(sessions)
    }

    /// One session with its points in insertion order, or `None` if unknown
    pub fn get_session(&self, session_id: &str) -> Result<Option<FlightRecord>> {
        let conn = self.lock();

        let session = {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM flights WHERE id = ?1",
                SESSION_COLUMNS
            ))?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => row_to_session(row)?,
                None => return Ok(None),
            }
        };

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flight_data WHERE flight_id = ?1 ORDER BY id",
            POINT_COLUMNS
        ))?;
        let mut rows = stmt.query(params![session_id])?;
        let mut points = Vec::new();
        while let Some(row) = rows.next()? {
            points.push(row_to_point(row)?);
        }

        Ok(Some(FlightRecord { session, points }))
    }

    /// The session left without an end time, if any
    ///
    /// A session stays open across process restarts until explicitly ended.
    pub fn open_session(&self) -> Result<Option<FlightSession>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM flights WHERE end_time IS NULL ORDER BY start_time DESC LIMIT 1",
            SESSION_COLUMNS
        ))?;

        let mut rows = stmt.query([])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_session(row)?)),
            None => Ok(None),
        }
    }
}

/// Fixed-width UTC timestamps so text order matches time order
fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| FlightTrackerError::InvalidData(format!("{} '{}': {}", field, value, e)))
}

fn row_to_session(row: &Row) -> Result<FlightSession> {
    let start_time: String = row.get("start_time")?;
    let end_time: Option<String> = row.get("end_time")?;
    let duration: Option<i64> = row.get("duration_seconds")?;

    Ok(FlightSession {
        id: row.get("id")?,
        start_time: parse_time(&start_time, "start_time")?,
        end_time: end_time
            .map(|raw| parse_time(&raw, "end_time"))
            .transpose()?,
        duration_seconds: duration
            .map(|secs| {
                u64::try_from(secs).map_err(|_| {
                    FlightTrackerError::InvalidData(format!("negative duration {}", secs))
                })
            })
            .transpose()?,
        peak_speed: row.get("peak_speed")?,
        peak_altitude: row.get("peak_altitude")?,
        total_distance: row.get("total_distance")?,
        start_lat: row.get("start_lat")?,
        start_lon: row.get("start_lon")?,
        end_lat: row.get("end_lat")?,
        end_lon: row.get("end_lon")?,
    })
}

fn row_to_point(row: &Row) -> Result<FlightPoint> {
    let timestamp: String = row.get("timestamp")?;

    Ok(FlightPoint {
        session_id: row.get("flight_id")?,
        timestamp: parse_time(&timestamp, "timestamp")?,
        latitude: row.get("latitude")?,
        longitude: row.get("longitude")?,
        altitude: row.get("altitude")?,
        speed: row.get("speed")?,
        satellites: row.get("satellites")?,
        rssi: row.get("rssi")?,
        snr: row.get("snr")?,
    })
}
