// 🧾 Invoice Materializer
//
// Turns the proration result into invoice rows, one per customer, skipping
// customers already invoiced for the competence. Exactly-once per customer is
// enforced by the existence check plus the store's uniqueness constraint, not
// by a transaction spanning the whole run.

use super::cancel::CancelToken;
use super::error::{BillingError, StoreError};
use super::proration::ProrationResult;
use super::store::BillingStore;
use crate::entities::Invoice;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaterializeOutcome {
    /// Newly written invoices, in customer-id order
    pub created: Vec<Invoice>,

    /// Customers skipped because they already had an invoice
    pub already_billed: Vec<String>,
}

pub fn invoice_note(days_in_month: u32) -> String {
    format!(
        "Proportional billing - {days_in_month} days in month (generated from association history)"
    )
}

pub fn materialize<S: BillingStore + ?Sized>(
    store: &S,
    proration: &ProrationResult,
    cancel: &CancelToken,
) -> Result<MaterializeOutcome, BillingError> {
    let competence = proration.competence.to_string();
    let note = invoice_note(proration.days_in_month);
    let mut outcome = MaterializeOutcome::default();

    for (customer_id, charge) in &proration.charges {
        if charge.total <= rust_decimal::Decimal::ZERO {
            continue;
        }
        if cancel.is_cancelled() {
            tracing::warn!(
                competence = %competence,
                created = outcome.created.len(),
                "billing run cancelled, remaining invoices not written"
            );
            return Err(BillingError::Cancelled {
                created: outcome.created,
            });
        }

        let exists = match store.invoice_exists(customer_id, &competence) {
            Ok(exists) => exists,
            Err(source) => {
                return Err(BillingError::Persistence {
                    customer_id: customer_id.clone(),
                    created: outcome.created,
                    source,
                })
            }
        };
        if exists {
            tracing::debug!(customer_id = %customer_id, competence = %competence, "already invoiced");
            outcome.already_billed.push(customer_id.clone());
            continue;
        }

        let invoice = Invoice::new(
            competence.clone(),
            customer_id.clone(),
            charge.total,
            note.clone(),
            charge.vehicle_ids.iter().cloned().collect(),
        );

        match store.insert_invoice(&invoice) {
            Ok(()) => {
                tracing::info!(
                    customer_id = %customer_id,
                    competence = %competence,
                    amount = %invoice.amount,
                    vehicles = invoice.vehicle_ids.len(),
                    "invoice created"
                );
                outcome.created.push(invoice);
            }
            // a concurrent run got there first
            Err(StoreError::Duplicate { .. }) => {
                tracing::debug!(customer_id = %customer_id, competence = %competence, "lost insert race, already invoiced");
                outcome.already_billed.push(customer_id.clone());
            }
            Err(source) => {
                tracing::error!(
                    customer_id = %customer_id,
                    competence = %competence,
                    created = outcome.created.len(),
                    "invoice write failed: {source}"
                );
                return Err(BillingError::Persistence {
                    customer_id: customer_id.clone(),
                    created: outcome.created,
                    source,
                });
            }
        }
    }

    Ok(outcome)
}
