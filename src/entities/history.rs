// ⏳ Association history - "vehicle V belonged to customer C from A to B"
//
// Append/close-only: intervals are opened when a vehicle is created or changes
// owner and closed when the owner changes again or the vehicle is removed.
// Rows are never deleted.

use crate::error::RegistryResult;
use chrono::NaiveDate;
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationInterval {
    pub id: String,
    pub vehicle_id: String,
    pub customer_id: String,

    /// Inclusive
    pub start: NaiveDate,

    /// Inclusive; None = still open
    pub end: Option<NaiveDate>,
}

impl AssociationInterval {
    pub fn new(
        vehicle_id: impl Into<String>,
        customer_id: impl Into<String>,
        start: NaiveDate,
        end: Option<NaiveDate>,
    ) -> Self {
        AssociationInterval {
            id: uuid::Uuid::new_v4().to_string(),
            vehicle_id: vehicle_id.into(),
            customer_id: customer_id.into(),
            start,
            end,
        }
    }

    /// End date with an open interval treated as unbounded.
    pub fn effective_end(&self) -> NaiveDate {
        self.end.unwrap_or(NaiveDate::MAX)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(AssociationInterval {
            id: row.get(0)?,
            vehicle_id: row.get(1)?,
            customer_id: row.get(2)?,
            start: row.get(3)?,
            end: row.get(4)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, vehicle_id, customer_id, start_date, end_date FROM vehicle_history";

pub fn insert_interval(conn: &Connection, interval: &AssociationInterval) -> RegistryResult<()> {
    conn.execute(
        "INSERT INTO vehicle_history (id, vehicle_id, customer_id, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            interval.id,
            interval.vehicle_id,
            interval.customer_id,
            interval.start,
            interval.end,
        ],
    )?;
    Ok(())
}

/// Open a new interval for `vehicle_id` owned by `customer_id` from `start`.
pub fn open_interval(
    conn: &Connection,
    vehicle_id: &str,
    customer_id: &str,
    start: NaiveDate,
) -> RegistryResult<AssociationInterval> {
    let interval = AssociationInterval::new(vehicle_id, customer_id, start, None);
    insert_interval(conn, &interval)?;
    tracing::debug!(vehicle_id, customer_id, %start, "history interval opened");
    Ok(interval)
}

/// Close the most recent open interval of a vehicle. Returns how many rows
/// were closed (0 when the vehicle had no open interval).
pub fn close_open_interval(
    conn: &Connection,
    vehicle_id: &str,
    end: NaiveDate,
) -> RegistryResult<usize> {
    let closed = conn.execute(
        "UPDATE vehicle_history SET end_date = ?2
         WHERE id = (
             SELECT id FROM vehicle_history
             WHERE vehicle_id = ?1 AND end_date IS NULL
             ORDER BY start_date DESC, rowid DESC
             LIMIT 1
         )",
        params![vehicle_id, end],
    )?;
    if closed > 0 {
        tracing::debug!(vehicle_id, %end, "history interval closed");
    }
    Ok(closed)
}

pub fn list_intervals(conn: &Connection) -> RegistryResult<Vec<AssociationInterval>> {
    let sql = format!("{SELECT_COLUMNS} ORDER BY vehicle_id, start_date, rowid");
    let mut stmt = conn.prepare(&sql)?;
    let intervals = stmt
        .query_map([], AssociationInterval::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(intervals)
}

pub fn intervals_for_vehicle(
    conn: &Connection,
    vehicle_id: &str,
) -> RegistryResult<Vec<AssociationInterval>> {
    let sql = format!("{SELECT_COLUMNS} WHERE vehicle_id = ?1 ORDER BY start_date, rowid");
    let mut stmt = conn.prepare(&sql)?;
    let intervals = stmt
        .query_map(params![vehicle_id], AssociationInterval::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(intervals)
}
