// 👤 Customer Entity
//
// "Identity persists, values change": the UUID is the stable foreign key for
// vehicles, history intervals and invoices; name/contact/fee can be edited.

use crate::db::{optional_decimal_column, record_event, Event};
use crate::error::{RegistryError, RegistryResult};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

// ============================================================================
// CUSTOMER ENTITY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    /// Stable identity (UUID) - NEVER changes
    pub id: String,

    pub name: String,

    /// Digits only
    pub phone: Option<String>,

    pub address: Option<String>,

    /// Monthly subscriber ("mensalista")
    pub is_subscriber: bool,

    /// Fixed monthly fee. Ignored unless `is_subscriber`.
    pub monthly_fee: Option<Decimal>,

    pub created_at: DateTime<Utc>,
}

impl Customer {
    pub fn new(name: impl Into<String>) -> Self {
        Customer {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            phone: None,
            address: None,
            is_subscriber: false,
            monthly_fee: None,
            created_at: Utc::now(),
        }
    }

    /// The fee the billing run charges, if any.
    ///
    /// Non-subscribers and missing or non-positive fees yield `None`.
    pub fn billable_fee(&self) -> Option<Decimal> {
        if !self.is_subscriber {
            return None;
        }
        self.monthly_fee.filter(|fee| *fee > Decimal::ZERO)
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Customer {
            id: row.get(0)?,
            name: row.get(1)?,
            phone: row.get(2)?,
            address: row.get(3)?,
            is_subscriber: row.get(4)?,
            monthly_fee: optional_decimal_column(row, 5)?,
            created_at: row.get(6)?,
        })
    }
}

/// Upper bound for `monthly_fee`, keeps billing arithmetic in range
pub const MAX_MONTHLY_FEE: Decimal = dec!(1000000);

/// Payload for create/update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CustomerInput {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub is_subscriber: bool,
    #[serde(default)]
    pub monthly_fee: Option<Decimal>,
}

impl CustomerInput {
    fn validate(&self) -> RegistryResult<()> {
        if self.name.trim().is_empty() {
            return Err(RegistryError::InvalidInput("customer name is required".into()));
        }
        if matches!(self.monthly_fee, Some(fee) if fee < Decimal::ZERO) {
            return Err(RegistryError::InvalidInput("monthly fee cannot be negative".into()));
        }
        if matches!(self.monthly_fee, Some(fee) if fee > MAX_MONTHLY_FEE) {
            return Err(RegistryError::InvalidInput(format!(
                "monthly fee cannot exceed {MAX_MONTHLY_FEE}"
            )));
        }
        Ok(())
    }
}

/// Keep only the digits of a phone number; empty → None.
pub fn normalize_phone(raw: Option<&str>) -> Option<String> {
    let digits: String = raw?.chars().filter(char::is_ascii_digit).collect();
    (!digits.is_empty()).then_some(digits)
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

const SELECT_COLUMNS: &str =
    "SELECT id, name, phone, address, is_subscriber, monthly_fee, created_at FROM customers";

// ============================================================================
// PERSISTENCE
// ============================================================================

pub fn insert_customer(conn: &Connection, customer: &Customer) -> RegistryResult<()> {
    conn.execute(
        "INSERT INTO customers (id, name, phone, address, is_subscriber, monthly_fee, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            customer.id,
            customer.name,
            customer.phone,
            customer.address,
            customer.is_subscriber,
            customer.monthly_fee.map(|fee| fee.to_string()),
            customer.created_at,
        ],
    )?;
    Ok(())
}

pub fn create_customer(conn: &Connection, input: &CustomerInput) -> RegistryResult<Customer> {
    input.validate()?;

    let mut customer = Customer::new(input.name.trim());
    customer.phone = normalize_phone(input.phone.as_deref());
    customer.address = trimmed(input.address.as_deref());
    customer.is_subscriber = input.is_subscriber;
    customer.monthly_fee = input.monthly_fee;

    insert_customer(conn, &customer)?;
    tracing::info!(customer_id = %customer.id, name = %customer.name, "customer created");
    record_event(
        conn,
        Event::new(
            "customer_created",
            "customer",
            &customer.id,
            serde_json::json!({
                "name": customer.name,
                "is_subscriber": customer.is_subscriber,
                "monthly_fee": customer.monthly_fee,
            }),
            "registry",
        ),
    );

    Ok(customer)
}

pub fn get_customer(conn: &Connection, id: &str) -> RegistryResult<Option<Customer>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let customer = conn
        .query_row(&sql, params![id], Customer::from_row)
        .optional()?;
    Ok(customer)
}

/// All customers ordered by name; `subscribers_only` narrows to billable ones.
pub fn list_customers(conn: &Connection, subscribers_only: bool) -> RegistryResult<Vec<Customer>> {
    let sql = if subscribers_only {
        format!("{SELECT_COLUMNS} WHERE is_subscriber = 1 ORDER BY name, id")
    } else {
        format!("{SELECT_COLUMNS} ORDER BY name, id")
    };

    let mut stmt = conn.prepare(&sql)?;
    let customers = stmt
        .query_map([], Customer::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(customers)
}

/// Lookup convention used by the CSV importer.
pub fn find_customer_by_name_phone(
    conn: &Connection,
    name: &str,
    phone: Option<&str>,
) -> RegistryResult<Option<Customer>> {
    let sql = format!("{SELECT_COLUMNS} WHERE name = ?1 AND phone IS ?2 ORDER BY created_at LIMIT 1");
    let customer = conn
        .query_row(&sql, params![name, phone], Customer::from_row)
        .optional()?;
    Ok(customer)
}

pub fn update_customer(
    conn: &Connection,
    id: &str,
    input: &CustomerInput,
) -> RegistryResult<Customer> {
    input.validate()?;

    let mut customer =
        get_customer(conn, id)?.ok_or_else(|| RegistryError::CustomerNotFound(id.to_string()))?;
    customer.name = input.name.trim().to_string();
    customer.phone = normalize_phone(input.phone.as_deref());
    customer.address = trimmed(input.address.as_deref());
    customer.is_subscriber = input.is_subscriber;
    customer.monthly_fee = input.monthly_fee;

    conn.execute(
        "UPDATE customers
         SET name = ?2, phone = ?3, address = ?4, is_subscriber = ?5, monthly_fee = ?6
         WHERE id = ?1",
        params![
            customer.id,
            customer.name,
            customer.phone,
            customer.address,
            customer.is_subscriber,
            customer.monthly_fee.map(|fee| fee.to_string()),
        ],
    )?;

    record_event(
        conn,
        Event::new(
            "customer_updated",
            "customer",
            &customer.id,
            serde_json::json!({
                "is_subscriber": customer.is_subscriber,
                "monthly_fee": customer.monthly_fee,
            }),
            "registry",
        ),
    );

    Ok(customer)
}

/// Refused while the customer still owns vehicles; history and invoices that
/// reference the customer are left untouched.
pub fn delete_customer(conn: &Connection, id: &str) -> RegistryResult<bool> {
    let owned: i64 = conn.query_row(
        "SELECT COUNT(*) FROM vehicles WHERE customer_id = ?1",
        params![id],
        |row| row.get(0),
    )?;
    if owned > 0 {
        return Err(RegistryError::CustomerHasVehicles(id.to_string()));
    }

    let removed = conn.execute("DELETE FROM customers WHERE id = ?1", params![id])?;
    if removed > 0 {
        record_event(
            conn,
            Event::new("customer_deleted", "customer", id, serde_json::json!({}), "registry"),
        );
    }
    Ok(removed > 0)
}

// ============================================================================
// TESTS
// ============================================================================
