use crate::entities::Invoice;
use thiserror::Error;

/// Failures of the store behind the billing run.
#[derive(Debug, Error)]
pub enum StoreError {
    /// (customer, competence) already invoiced; the materializer swallows it
    #[error("invoice already exists for customer {customer_id} in {competence}")]
    Duplicate {
        customer_id: String,
        competence: String,
    },

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("corrupt stored value: {0}")]
    Corrupt(String),
}

#[derive(Debug, Error)]
pub enum BillingError {
    /// Caller input; nothing was read or written
    #[error("invalid competence '{input}': {reason}")]
    InvalidCompetence { input: String, reason: String },

    /// A fee too large for the amount arithmetic; nothing was written
    #[error("amount for customer {customer_id} in {competence} is out of range")]
    AmountOverflow {
        customer_id: String,
        competence: String,
    },

    /// Reading the snapshot failed; nothing was written
    #[error("failed to load billing snapshot: {0}")]
    Snapshot(#[source] StoreError),

    /// Writing an invoice failed. Invoices created before the failure stay
    /// committed and are returned here so the caller can retry the rest.
    #[error("failed to persist invoice for customer {customer_id} ({} created before failure): {source}", .created.len())]
    Persistence {
        customer_id: String,
        created: Vec<Invoice>,
        #[source]
        source: StoreError,
    },

    #[error("billing run cancelled ({} invoices created before cancellation)", .created.len())]
    Cancelled { created: Vec<Invoice> },
}

impl BillingError {
    /// Invoices committed before the run stopped.
    pub fn created(&self) -> &[Invoice] {
        match self {
            BillingError::Persistence { created, .. } | BillingError::Cancelled { created } => {
                created
            }
            _ => &[],
        }
    }

    pub fn is_input_error(&self) -> bool {
        matches!(self, BillingError::InvalidCompetence { .. })
    }
}
