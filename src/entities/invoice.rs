// 🧾 Invoice Entity
//
// One invoice per (customer, competence). Written only by the billing run,
// never updated afterwards.

use crate::db::decimal_column;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: String,

    /// Billing month, canonical `YYYY-MM`
    pub competence: String,

    pub customer_id: String,

    /// Rounded to 2 decimal places
    pub amount: Decimal,

    pub note: String,

    /// Vehicles that contributed to `amount`, sorted
    pub vehicle_ids: Vec<String>,

    pub created_at: DateTime<Utc>,
}

impl Invoice {
    pub fn new(
        competence: impl Into<String>,
        customer_id: impl Into<String>,
        amount: Decimal,
        note: impl Into<String>,
        vehicle_ids: Vec<String>,
    ) -> Self {
        Invoice {
            id: uuid::Uuid::new_v4().to_string(),
            competence: competence.into(),
            customer_id: customer_id.into(),
            amount,
            note: note.into(),
            vehicle_ids,
            created_at: Utc::now(),
        }
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Invoice {
            id: row.get(0)?,
            competence: row.get(1)?,
            customer_id: row.get(2)?,
            amount: decimal_column(row, 3)?,
            note: row.get(4)?,
            vehicle_ids: Vec::new(),
            created_at: row.get(5)?,
        })
    }
}

const SELECT_COLUMNS: &str =
    "SELECT id, competence, customer_id, amount, note, created_at FROM invoices";

/// Insert the invoice row and its vehicle links in one transaction.
///
/// A second invoice for the same (customer, competence) fails with a
/// constraint violation and leaves nothing behind.
pub fn insert_invoice(conn: &Connection, invoice: &Invoice) -> rusqlite::Result<()> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "INSERT INTO invoices (id, competence, customer_id, amount, note, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            invoice.id,
            invoice.competence,
            invoice.customer_id,
            invoice.amount.to_string(),
            invoice.note,
            invoice.created_at,
        ],
    )?;
    {
        let mut link = tx.prepare(
            "INSERT INTO invoice_vehicles (invoice_id, vehicle_id) VALUES (?1, ?2)",
        )?;
        for vehicle_id in &invoice.vehicle_ids {
            link.execute(params![invoice.id, vehicle_id])?;
        }
    }
    tx.commit()
}

pub fn invoice_exists(conn: &Connection, customer_id: &str, competence: &str) -> rusqlite::Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM invoices WHERE customer_id = ?1 AND competence = ?2",
        params![customer_id, competence],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

fn load_vehicle_ids(conn: &Connection, invoice_id: &str) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT vehicle_id FROM invoice_vehicles WHERE invoice_id = ?1 ORDER BY vehicle_id",
    )?;
    let ids = stmt
        .query_map(params![invoice_id], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(ids)
}

pub fn get_invoice(conn: &Connection, id: &str) -> rusqlite::Result<Option<Invoice>> {
    let sql = format!("{SELECT_COLUMNS} WHERE id = ?1");
    let invoice = conn.query_row(&sql, params![id], Invoice::from_row).optional()?;
    match invoice {
        Some(mut invoice) => {
            invoice.vehicle_ids = load_vehicle_ids(conn, &invoice.id)?;
            Ok(Some(invoice))
        }
        None => Ok(None),
    }
}

/// Invoices with their vehicle links, newest competence first.
pub fn list_invoices(conn: &Connection, competence: Option<&str>) -> rusqlite::Result<Vec<Invoice>> {
    let mut invoices = match competence {
        Some(competence) => {
            let sql = format!("{SELECT_COLUMNS} WHERE competence = ?1 ORDER BY customer_id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![competence], Invoice::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!("{SELECT_COLUMNS} ORDER BY competence DESC, customer_id");
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map([], Invoice::from_row)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };

    for invoice in &mut invoices {
        invoice.vehicle_ids = load_vehicle_ids(conn, &invoice.id)?;
    }
    Ok(invoices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{is_constraint_violation, setup_database};
    use rust_decimal_macros::dec;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    #[test]
    fn test_insert_and_load_with_links() {
        let conn = test_conn();
        let invoice = Invoice::new(
            "2024-02",
            "c1",
            dec!(196.55),
            "note",
            vec!["v2".to_string(), "v1".to_string()],
        );
        insert_invoice(&conn, &invoice).unwrap();

        let loaded = get_invoice(&conn, &invoice.id).unwrap().unwrap();
        assert_eq!(loaded.amount, dec!(196.55));
        assert_eq!(loaded.vehicle_ids, vec!["v1".to_string(), "v2".to_string()]);
        assert!(invoice_exists(&conn, "c1", "2024-02").unwrap());
        assert!(!invoice_exists(&conn, "c1", "2024-03").unwrap());
    }

    #[test]
    fn test_duplicate_leaves_no_orphan_links() {
        let conn = test_conn();
        let first = Invoice::new("2024-02", "c1", dec!(10), "n", vec!["v1".to_string()]);
        insert_invoice(&conn, &first).unwrap();

        let second = Invoice::new("2024-02", "c1", dec!(20), "n", vec!["v9".to_string()]);
        let err = insert_invoice(&conn, &second).unwrap_err();
        assert!(is_constraint_violation(&err));

        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM invoice_vehicles", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 1);
    }

    #[test]
    fn test_list_by_competence() {
        let conn = test_conn();
        insert_invoice(&conn, &Invoice::new("2024-01", "c1", dec!(1), "n", vec![])).unwrap();
        insert_invoice(&conn, &Invoice::new("2024-02", "c1", dec!(2), "n", vec![])).unwrap();
        insert_invoice(&conn, &Invoice::new("2024-02", "c2", dec!(3), "n", vec![])).unwrap();

        assert_eq!(list_invoices(&conn, Some("2024-02")).unwrap().len(), 2);
        let all = list_invoices(&conn, None).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].competence, "2024-02");
    }
}
