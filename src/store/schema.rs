//! Schema migrations, tracked with `PRAGMA user_version`.

use rusqlite::{Connection, Transaction};
use tracing::info;

use crate::error::{FlightTrackerError, Result};

const CURRENT_SCHEMA_VERSION: i32 = 2;

const SCHEMA_V1: &str = "
CREATE TABLE IF NOT EXISTS flights (
    id TEXT PRIMARY KEY,
    start_time TEXT NOT NULL,
    end_time TEXT,
    duration_seconds INTEGER,
    peak_speed REAL NOT NULL DEFAULT 0,
    peak_altitude REAL NOT NULL DEFAULT 0,
    total_distance REAL NOT NULL DEFAULT 0,
    start_lat REAL,
    start_lon REAL,
    end_lat REAL,
    end_lon REAL
);

CREATE TABLE IF NOT EXISTS flight_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    flight_id TEXT NOT NULL,
    timestamp TEXT NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    altitude REAL NOT NULL,
    speed REAL NOT NULL,
    satellites INTEGER NOT NULL,
    rssi INTEGER NOT NULL DEFAULT 0,
    snr REAL NOT NULL DEFAULT 0,
    FOREIGN KEY (flight_id) REFERENCES flights(id)
);
";

const SCHEMA_V2: &str = "
CREATE INDEX IF NOT EXISTS idx_flight_data_flight_id ON flight_data(flight_id, id);
CREATE INDEX IF NOT EXISTS idx_flights_start_time ON flights(start_time);
CREATE INDEX IF NOT EXISTS idx_flights_open ON flights(end_time) WHERE end_time IS NULL;
";

/// Bring the database up to [`CURRENT_SCHEMA_VERSION`] in one transaction
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let mut version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;

    if version > CURRENT_SCHEMA_VERSION {
        return Err(FlightTrackerError::InvalidData(format!(
            "database version ({}) is newer than supported schema ({})",
            version, CURRENT_SCHEMA_VERSION
        )));
    }

    if version == CURRENT_SCHEMA_VERSION {
        return Ok(());
    }

    let tx = conn.transaction()?;

    while version < CURRENT_SCHEMA_VERSION {
        version += 1;
        apply_migration(&tx, version)?;
        info!("Applied flight database migration v{}", version);
    }

    tx.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;
    tx.commit()?;

    Ok(())
}

fn apply_migration(tx: &Transaction<'_>, version: i32) -> Result<()> {
    match version {
        1 => tx.execute_batch(SCHEMA_V1)?,
        2 => tx.execute_batch(SCHEMA_V2)?,
        other => {
            return Err(FlightTrackerError::InvalidData(format!(
                "no migration for schema version {}",
                other
            )))
        }
    }
    Ok(())
}
