// 🚙 Vehicle Entity
//
// A vehicle is owned by exactly one customer at any instant. Every ownership
// change goes through this module so the association history stays in step
// with the `customer_id` column:
// - create  → open interval from today
// - owner change → close open interval at today, open a new one from today
// - delete  → close open interval at today (history is kept)

use super::customer::get_customer;
use super::history::{close_open_interval, open_interval};
use crate::db::{is_constraint_violation, record_event, Event};
use crate::error::{RegistryError, RegistryResult};
use crate::plate::{is_valid_plate, sanitize_plate};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Vehicle {
    /// Stable identity (UUID)
    pub id: String,

    /// Sanitized plate, unique across the registry
    pub plate: String,

    pub model: Option<String>,
    pub year: Option<i32>,

    /// Current owner
    pub customer_id: String,

    pub created_at: DateTime<Utc>,
}

impl Vehicle {
    pub fn new(plate: impl Into<String>, customer_id: impl Into<String>) -> Self {
        Vehicle {
            id: uuid::Uuid::new_v4().to_string(),
            plate: plate.into(),
            model: None,
            year: None,
            customer_id: customer_id.into(),
            created_at: Utc::now(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Vehicle {
            id: row.get(0)?,
            plate: row.get(1)?,
            model: row.get(2)?,
            year: row.get(3)?,
            customer_id: row.get(4)?,
            created_at: row.get(5)?,
        })
    }
}

/// Payload for create/update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VehicleInput {
    pub plate: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub year: Option<i32>,
    pub customer_id: String,
}

const SELECT_COLUMNS: &str =
    "SELECT id, plate, model, year, customer_id, created_at FROM vehicles";

fn checked_plate(raw: &str) -> RegistryResult<String> {
    let plate = sanitize_plate(raw);
    if !is_valid_plate(&plate) {
        return Err(RegistryError::InvalidPlate(raw.to_string()));
    }
    Ok(plate)
}

fn plate_taken(conn: &Connection, plate: &str, except_id: Option<&str>) -> RegistryResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vehicles WHERE plate = ?1 AND id IS NOT ?2",
        params![plate, except_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn ensure_customer(conn: &Connection, customer_id: &str) -> RegistryResult<()> {
    match get_customer(conn, customer_id)? {
        Some(_) => Ok(()),
        None => Err(RegistryError::CustomerNotFound(customer_id.to_string())),
    }
}

fn model_value(model: Option<&str>) -> Option<String> {
    model
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ============================================================================
// QUERIES
// ============================================================================

pub fn get_vehicle(conn: &Connection, id: &str) -> RegistryResult<Option<Vehicle>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    Ok(conn.query_row(&sql, params![id], Vehicle::from_row).optional()?)
}

/// Lookup by plate; the argument is sanitized first.
pub fn find_vehicle_by_plate(conn: &Connection, plate: &str) -> RegistryResult<Option<Vehicle>> {
    let sql = format!("{SELECT_COLUMNS} WHERE plate = ?1");
    let plate = sanitize_plate(plate);
    Ok(conn.query_row(&sql, params![plate], Vehicle::from_row).optional()?)
}

/// Vehicles ordered by plate, optionally restricted to one owner.
pub fn list_vehicles(conn: &Connection, customer_id: Option<&str>) -> RegistryResult<Vec<Vehicle>> {
    let vehicles = match customer_id {
        Some(customer_id) => {
            let sql = format!("{SELECT_COLUMNS} WHERE customer_id = ?1 ORDER BY plate");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![customer_id], Vehicle::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!("{SELECT_COLUMNS} ORDER BY plate");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Vehicle::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };
    Ok(vehicles)
}

// ============================================================================
// COMMANDS
// ============================================================================

pub fn create_vehicle(conn: &Connection, input: &VehicleInput) -> RegistryResult<Vehicle> {
    create_vehicle_at(conn, input, Utc::now())
}

/// Create a vehicle and open its first history interval at `now`'s date.
pub fn create_vehicle_at(
    conn: &Connection,
    input: &VehicleInput,
    now: DateTime<Utc>,
) -> RegistryResult<Vehicle> {
    let plate = checked_plate(&input.plate)?;
    if plate_taken(conn, &plate, None)? {
        return Err(RegistryError::DuplicatePlate(plate));
    }
    ensure_customer(conn, &input.customer_id)?;

    let mut vehicle = Vehicle::new(plate, input.customer_id.clone());
    vehicle.model = model_value(input.model.as_deref());
    vehicle.year = input.year;
    vehicle.created_at = now;

    let tx = conn.unchecked_transaction()?;
    let inserted = tx.execute(
        "INSERT INTO vehicles (id, plate, model, year, customer_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            vehicle.id,
            vehicle.plate,
            vehicle.model,
            vehicle.year,
            vehicle.customer_id,
            vehicle.created_at,
        ],
    );
    match inserted {
        Ok(_) => {}
        // lost a race against a concurrent insert of the same plate
        Err(e) if is_constraint_violation(&e) => {
            return Err(RegistryError::DuplicatePlate(vehicle.plate));
        }
        Err(e) => return Err(e.into()),
    }
    open_interval(&tx, &vehicle.id, &vehicle.customer_id, now.date_naive())?;
    tx.commit()?;

    tracing::info!(vehicle_id = %vehicle.id, plate = %vehicle.plate, "vehicle created");
    record_event(
        conn,
        Event::new(
            "vehicle_created",
            "vehicle",
            &vehicle.id,
            serde_json::json!({
                "plate": vehicle.plate,
                "customer_id": vehicle.customer_id,
            }),
            "registry",
        ),
    );

    Ok(vehicle)
}

pub fn update_vehicle(conn: &Connection, id: &str, input: &VehicleInput) -> RegistryResult<Vehicle> {
    update_vehicle_at(conn, id, input, Utc::now())
}

/// Update plate/model/year; an owner change closes the open history interval
/// at `now`'s date and opens a new one from the same date.
pub fn update_vehicle_at(
    conn: &Connection,
    id: &str,
    input: &VehicleInput,
    now: DateTime<Utc>,
) -> RegistryResult<Vehicle> {
    let mut vehicle =
        get_vehicle(conn, id)?.ok_or_else(|| RegistryError::VehicleNotFound(id.to_string()))?;

    let plate = checked_plate(&input.plate)?;
    if plate_taken(conn, &plate, Some(id))? {
        return Err(RegistryError::DuplicatePlate(plate));
    }

    let previous_owner = vehicle.customer_id.clone();
    let owner_changed = previous_owner != input.customer_id;
    if owner_changed {
        ensure_customer(conn, &input.customer_id)?;
    }

    vehicle.plate = plate;
    vehicle.model = model_value(input.model.as_deref());
    vehicle.year = input.year;
    vehicle.customer_id = input.customer_id.clone();

    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "UPDATE vehicles SET plate = ?2, model = ?3, year = ?4, customer_id = ?5 WHERE id = ?1",
        params![
            vehicle.id,
            vehicle.plate,
            vehicle.model,
            vehicle.year,
            vehicle.customer_id,
        ],
    )?;
    if owner_changed {
        let today = now.date_naive();
        close_open_interval(&tx, &vehicle.id, today)?;
        open_interval(&tx, &vehicle.id, &vehicle.customer_id, today)?;
    }
    tx.commit()?;

    if owner_changed {
        tracing::info!(
            vehicle_id = %vehicle.id,
            from = %previous_owner,
            to = %vehicle.customer_id,
            "vehicle owner changed"
        );
        record_event(
            conn,
            Event::new(
                "vehicle_owner_changed",
                "vehicle",
                &vehicle.id,
                serde_json::json!({
                    "from": previous_owner,
                    "to": vehicle.customer_id,
                    "date": now.date_naive(),
                }),
                "registry",
            ),
        );
    }

    Ok(vehicle)
}

pub fn delete_vehicle(conn: &Connection, id: &str) -> RegistryResult<bool> {
    delete_vehicle_at(conn, id, Utc::now())
}

/// Remove the vehicle row and close its open interval at `now`'s date.
pub fn delete_vehicle_at(conn: &Connection, id: &str, now: DateTime<Utc>) -> RegistryResult<bool> {
    let tx = conn.unchecked_transaction()?;
    let removed = tx.execute("DELETE FROM vehicles WHERE id = ?1", params![id])?;
    if removed > 0 {
        close_open_interval(&tx, id, now.date_naive())?;
    }
    tx.commit()?;

    if removed > 0 {
        tracing::info!(vehicle_id = %id, "vehicle deleted");
        record_event(
            conn,
            Event::new("vehicle_deleted", "vehicle", id, serde_json::json!({}), "registry"),
        );
    }
    Ok(removed > 0)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::customer::{create_customer, CustomerInput};
    use crate::entities::history::intervals_for_vehicle;
    use chrono::{NaiveDate, TimeZone};

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn customer(conn: &Connection, name: &str) -> String {
        create_customer(
            conn,
            &CustomerInput {
                name: name.to_string(),
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 14, 30, 0).unwrap()
    }

    fn input(plate: &str, customer_id: &str) -> VehicleInput {
        VehicleInput {
            plate: plate.to_string(),
            model: Some("Gol".to_string()),
            year: Some(2019),
            customer_id: customer_id.to_string(),
        }
    }

    #[test]
    fn test_create_vehicle_opens_history() {
        let conn = test_conn();
        let owner = customer(&conn, "Ana");

        let vehicle = create_vehicle_at(&conn, &input("abc-1234", &owner), at(2024, 2, 10)).unwrap();
        assert_eq!(vehicle.plate, "ABC1234");

        let history = intervals_for_vehicle(&conn, &vehicle.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].customer_id, owner);
        assert_eq!(history[0].start, NaiveDate::from_ymd_opt(2024, 2, 10).unwrap());
        assert!(history[0].end.is_none());
    }

    #[test]
    fn test_create_rejects_bad_plate_duplicate_and_unknown_customer() {
        let conn = test_conn();
        let owner = customer(&conn, "Ana");

        assert!(matches!(
            create_vehicle(&conn, &input("12", &owner)),
            Err(RegistryError::InvalidPlate(_))
        ));

        create_vehicle(&conn, &input("ABC1234", &owner)).unwrap();
        assert!(matches!(
            create_vehicle(&conn, &input("abc 1234", &owner)),
            Err(RegistryError::DuplicatePlate(_))
        ));

        assert!(matches!(
            create_vehicle(&conn, &input("XYZ9A87", "nobody")),
            Err(RegistryError::CustomerNotFound(_))
        ));
    }

    #[test]
    fn test_owner_change_closes_and_opens_interval() {
        let conn = test_conn();
        let ana = customer(&conn, "Ana");
        let bruno = customer(&conn, "Bruno");

        let vehicle = create_vehicle_at(&conn, &input("ABC1234", &ana), at(2024, 1, 5)).unwrap();
        let updated =
            update_vehicle_at(&conn, &vehicle.id, &input("ABC1234", &bruno), at(2024, 2, 16))
                .unwrap();
        assert_eq!(updated.customer_id, bruno);

        let history = intervals_for_vehicle(&conn, &vehicle.id).unwrap();
        let change = NaiveDate::from_ymd_opt(2024, 2, 16).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].customer_id, ana);
        assert_eq!(history[0].end, Some(change));
        assert_eq!(history[1].customer_id, bruno);
        assert_eq!(history[1].start, change);
        assert!(history[1].end.is_none());
    }

    #[test]
    fn test_update_without_owner_change_keeps_history() {
        let conn = test_conn();
        let ana = customer(&conn, "Ana");
        let vehicle = create_vehicle(&conn, &input("ABC1234", &ana)).unwrap();

        let updated = update_vehicle(&conn, &vehicle.id, &input("ABC1D23", &ana)).unwrap();
        assert_eq!(updated.plate, "ABC1D23");
        assert_eq!(intervals_for_vehicle(&conn, &vehicle.id).unwrap().len(), 1);
    }

    #[test]
    fn test_update_rejects_plate_of_other_vehicle() {
        let conn = test_conn();
        let ana = customer(&conn, "Ana");
        create_vehicle(&conn, &input("ABC1234", &ana)).unwrap();
        let other = create_vehicle(&conn, &input("XYZ9876", &ana)).unwrap();

        assert!(matches!(
            update_vehicle(&conn, &other.id, &input("ABC1234", &ana)),
            Err(RegistryError::DuplicatePlate(_))
        ));
        assert!(matches!(
            update_vehicle(&conn, "missing", &input("ABC1234", &ana)),
            Err(RegistryError::VehicleNotFound(_))
        ));
    }

    #[test]
    fn test_delete_closes_history_but_keeps_it() {
        let conn = test_conn();
        let ana = customer(&conn, "Ana");
        let vehicle = create_vehicle_at(&conn, &input("ABC1234", &ana), at(2024, 2, 1)).unwrap();

        assert!(delete_vehicle_at(&conn, &vehicle.id, at(2024, 2, 20)).unwrap());
        assert!(get_vehicle(&conn, &vehicle.id).unwrap().is_none());

        let history = intervals_for_vehicle(&conn, &vehicle.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].end, NaiveDate::from_ymd_opt(2024, 2, 20));

        assert!(!delete_vehicle(&conn, &vehicle.id).unwrap());
    }

    #[test]
    fn test_list_and_find() {
        let conn = test_conn();
        let ana = customer(&conn, "Ana");
        let bruno = customer(&conn, "Bruno");
        create_vehicle(&conn, &input("XYZ9876", &ana)).unwrap();
        create_vehicle(&conn, &input("ABC1234", &ana)).unwrap();
        create_vehicle(&conn, &input("DEF5678", &bruno)).unwrap();

        let all = list_vehicles(&conn, None).unwrap();
        let plates: Vec<&str> = all.iter().map(|v| v.plate.as_str()).collect();
        assert_eq!(plates, vec!["ABC1234", "DEF5678", "XYZ9876"]);

        assert_eq!(list_vehicles(&conn, Some(&ana)).unwrap().len(), 2);
        assert_eq!(
            find_vehicle_by_plate(&conn, "def-5678").unwrap().map(|v| v.customer_id),
            Some(bruno)
        );
    }
}
