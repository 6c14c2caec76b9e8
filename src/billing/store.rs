// 🔌 Billing store boundary
//
// The billing core reads one consistent snapshot and writes only invoices.
// `SqliteBillingStore` is the production implementation; tests plug in fakes.

use super::error::StoreError;
use crate::db::is_constraint_violation;
use crate::entities::customer::list_customers;
use crate::entities::history::list_intervals;
use crate::entities::invoice::{insert_invoice, invoice_exists};
use crate::entities::vehicle::list_vehicles;
use crate::entities::{AssociationInterval, Customer, Invoice, Vehicle};
use crate::error::RegistryError;
use rusqlite::Connection;

/// Everything one billing run reads, taken at a single point in time.
#[derive(Debug, Clone, Default)]
pub struct BillingSnapshot {
    pub customers: Vec<Customer>,
    pub vehicles: Vec<Vehicle>,
    pub intervals: Vec<AssociationInterval>,
}

pub trait BillingStore {
    /// Read customers, vehicles and association history as one snapshot.
    fn load_snapshot(&self) -> Result<BillingSnapshot, StoreError>;

    fn invoice_exists(&self, customer_id: &str, competence: &str) -> Result<bool, StoreError>;

    /// Insert the invoice and its vehicle links atomically.
    ///
    /// Must return [`StoreError::Duplicate`] when (customer, competence) is
    /// already invoiced.
    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError>;
}

pub struct SqliteBillingStore<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteBillingStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        SqliteBillingStore { conn }
    }
}

impl From<RegistryError> for StoreError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Database(e) => StoreError::Database(e),
            other => StoreError::Corrupt(other.to_string()),
        }
    }
}

impl BillingStore for SqliteBillingStore<'_> {
    fn load_snapshot(&self) -> Result<BillingSnapshot, StoreError> {
        // one read transaction so no owner change lands between the reads
        let tx = self.conn.unchecked_transaction()?;
        let snapshot = BillingSnapshot {
            customers: list_customers(&tx, false)?,
            vehicles: list_vehicles(&tx, None)?,
            intervals: list_intervals(&tx)?,
        };
        tx.finish()?;
        Ok(snapshot)
    }

    fn invoice_exists(&self, customer_id: &str, competence: &str) -> Result<bool, StoreError> {
        Ok(invoice_exists(self.conn, customer_id, competence)?)
    }

    fn insert_invoice(&self, invoice: &Invoice) -> Result<(), StoreError> {
        match insert_invoice(self.conn, invoice) {
            Ok(()) => Ok(()),
            Err(e) if is_constraint_violation(&e) => Err(StoreError::Duplicate {
                customer_id: invoice.customer_id.clone(),
                competence: invoice.competence.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }
}
