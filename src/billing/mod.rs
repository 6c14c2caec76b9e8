// 💳 Monthly billing generator
//
// Pipeline for one competence:
//   store snapshot → normalize history → prorate per customer → materialize invoices
//
// Reads happen once, up front, inside a single read transaction. Writes are
// per invoice; a failure or cancellation mid-loop leaves earlier invoices in
// place and a rerun only fills in the missing customers.

pub mod cancel;
pub mod competence;
pub mod error;
pub mod materializer;
pub mod normalizer;
pub mod proration;
pub mod store;

pub use cancel::CancelToken;
pub use competence::Competence;
pub use error::{BillingError, StoreError};
pub use materializer::{materialize, MaterializeOutcome};
pub use normalizer::{normalize, IntegrityIssue, IntegrityWarning, NormalizedHistory};
pub use proration::{prorate, prorate_month, CustomerCharge, ProrationResult};
pub use store::{BillingSnapshot, BillingStore, SqliteBillingStore};

use crate::entities::Invoice;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Report of one billing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRun {
    pub competence: Competence,
    pub days_in_month: u32,

    /// Newly created invoices only
    pub created: Vec<Invoice>,

    /// Customers with a positive total that already had an invoice
    pub already_billed: Vec<String>,

    /// History problems found while normalizing (never fatal)
    pub warnings: Vec<IntegrityWarning>,
}

impl BillingRun {
    pub fn total_created(&self) -> Decimal {
        self.created.iter().map(|i| i.amount).sum()
    }

    pub fn summary(&self) -> String {
        format!(
            "Billing {} ({} days): {} invoices created (total {}), {} already billed, {} history warnings",
            self.competence,
            self.days_in_month,
            self.created.len(),
            self.total_created(),
            self.already_billed.len(),
            self.warnings.len()
        )
    }
}

/// Generate invoices for `competence` and return the newly created ones.
pub fn generate<S: BillingStore + ?Sized>(
    store: &S,
    competence: &str,
) -> Result<Vec<Invoice>, BillingError> {
    generate_run(store, competence, &CancelToken::new()).map(|run| run.created)
}

/// Full run with a cancel token and a detailed report.
pub fn generate_run<S: BillingStore + ?Sized>(
    store: &S,
    competence: &str,
    cancel: &CancelToken,
) -> Result<BillingRun, BillingError> {
    let competence = Competence::parse(competence)?;
    let span = tracing::info_span!("billing_run", competence = %competence);
    let _guard = span.enter();

    let snapshot = store.load_snapshot().map_err(BillingError::Snapshot)?;
    tracing::info!(
        customers = snapshot.customers.len(),
        vehicles = snapshot.vehicles.len(),
        intervals = snapshot.intervals.len(),
        "billing snapshot loaded"
    );

    let history = normalize(&snapshot.vehicles, &snapshot.intervals);
    let proration = prorate_month(competence, &history, &snapshot.customers)?;
    let outcome = materialize(store, &proration, cancel)?;

    let run = BillingRun {
        competence,
        days_in_month: proration.days_in_month,
        created: outcome.created,
        already_billed: outcome.already_billed,
        warnings: history.warnings,
    };
    tracing::info!("{}", run.summary());
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::setup_database;
    use crate::entities::history::insert_interval;
    use crate::entities::vehicle::{create_vehicle_at, update_vehicle_at};
    use crate::entities::customer::insert_customer;
    use crate::entities::{
        create_customer, list_invoices, AssociationInterval, Customer, CustomerInput,
        VehicleInput,
    };
    use chrono::{DateTime, NaiveDate, TimeZone, Utc};
    use rusqlite::Connection;
    use rust_decimal_macros::dec;

    fn test_conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 10, 0, 0).unwrap()
    }

    fn customer(conn: &Connection, name: &str, subscriber: bool, fee: Option<Decimal>) -> String {
        create_customer(
            conn,
            &CustomerInput {
                name: name.to_string(),
                is_subscriber: subscriber,
                monthly_fee: fee,
                ..Default::default()
            },
        )
        .unwrap()
        .id
    }

    fn vehicle(conn: &Connection, plate: &str, owner: &str, created: DateTime<Utc>) -> String {
        create_vehicle_at(
            conn,
            &VehicleInput {
                plate: plate.to_string(),
                customer_id: owner.to_string(),
                ..Default::default()
            },
            created,
        )
        .unwrap()
        .id
    }

    /// Vehicle row with no recorded history, as left behind by older writers.
    fn vehicle_without_history(conn: &Connection, plate: &str, owner: &str, created: DateTime<Utc>) -> String {
        let id = vehicle(conn, plate, owner, created);
        conn.execute("DELETE FROM vehicle_history WHERE vehicle_id = ?1", [&id])
            .unwrap();
        id
    }

    #[test]
    fn test_vehicle_created_feb_11_billed_19_of_29_days() {
        // days 11..=29 inclusive; a Feb 10 creation bills 20 days (next test)
        let conn = test_conn();
        let c1 = customer(&conn, "C1", true, Some(dec!(300.00)));
        let v1 = vehicle(&conn, "ABC1234", &c1, at(2024, 2, 11));

        let store = SqliteBillingStore::new(&conn);
        let created = generate(&store, "2024-02").unwrap();

        assert_eq!(created.len(), 1);
        assert_eq!(created[0].customer_id, c1);
        assert_eq!(created[0].amount, dec!(196.55));
        assert_eq!(created[0].vehicle_ids, vec![v1]);
        assert!(created[0].note.contains("29 days"));
    }

    #[test]
    fn test_vehicle_without_history_bills_from_creation_date() {
        let conn = test_conn();
        let c1 = customer(&conn, "C1", true, Some(dec!(300.00)));
        vehicle_without_history(&conn, "ABC1234", &c1, at(2024, 2, 10));

        let store = SqliteBillingStore::new(&conn);
        let run = generate_run(&store, "2024-02", &CancelToken::new()).unwrap();

        // Feb 10..=29 is 20 of 29 days
        assert_eq!(run.created.len(), 1);
        assert_eq!(run.created[0].amount, dec!(206.90));
        assert!(run.warnings.is_empty());
    }

    #[test]
    fn test_generate_twice_is_idempotent() {
        let conn = test_conn();
        let c1 = customer(&conn, "C1", true, Some(dec!(120.00)));
        vehicle(&conn, "ABC1234", &c1, at(2024, 1, 3));

        let store = SqliteBillingStore::new(&conn);
        let first = generate(&store, "2024-02").unwrap();
        let before = list_invoices(&conn, None).unwrap();

        let second = generate_run(&store, "2024-02", &CancelToken::new()).unwrap();
        let after = list_invoices(&conn, None).unwrap();

        assert_eq!(first.len(), 1);
        assert_eq!(first[0].amount, dec!(120.00));
        assert!(second.created.is_empty());
        assert_eq!(second.already_billed, vec![c1]);
        assert_eq!(before, after);
    }

    #[test]
    fn test_owner_change_bills_both_owners() {
        let conn = test_conn();
        let a = customer(&conn, "A", true, Some(dec!(90.00)));
        let b = customer(&conn, "B", true, Some(dec!(90.00)));
        let v = vehicle(&conn, "ABC1234", &a, at(2024, 3, 20));
        update_vehicle_at(
            &conn,
            &v,
            &VehicleInput {
                plate: "ABC1234".to_string(),
                customer_id: b.clone(),
                ..Default::default()
            },
            at(2024, 4, 16),
        )
        .unwrap();

        let store = SqliteBillingStore::new(&conn);
        let created = generate(&store, "2024-04").unwrap();

        // hand-off day 16 is billed to both owners: A 1..=16, B 16..=30
        let amount_for = |id: &str| {
            created
                .iter()
                .find(|i| i.customer_id == id)
                .map(|i| i.amount)
                .unwrap()
        };
        assert_eq!(created.len(), 2);
        assert_eq!(amount_for(&a), dec!(48.00));
        assert_eq!(amount_for(&b), dec!(45.00));
        assert!(created.iter().all(|i| i.vehicle_ids == vec![v.clone()]));
    }

    #[test]
    fn test_recorded_split_sums_within_one_cent() {
        let conn = test_conn();
        let fee = dec!(100.00);
        let a = customer(&conn, "A", true, Some(fee));
        let b = customer(&conn, "B", true, Some(fee));
        let v = vehicle_without_history(&conn, "ABC1234", &b, at(2024, 1, 1));
        let d = |day| NaiveDate::from_ymd_opt(2024, 4, day).unwrap();
        insert_interval(&conn, &AssociationInterval::new(&v, &a, d(1), Some(d(15)))).unwrap();
        insert_interval(&conn, &AssociationInterval::new(&v, &b, d(16), None)).unwrap();

        let store = SqliteBillingStore::new(&conn);
        let created = generate(&store, "2024-04").unwrap();

        let total: Decimal = created.iter().map(|i| i.amount).sum();
        assert_eq!(created.len(), 2);
        assert!(created.iter().all(|i| Some(i.amount) == prorate(fee, 15, 30)));
        assert!((total - fee).abs() <= dec!(0.01));
    }

    #[test]
    fn test_non_subscribers_never_invoiced() {
        let conn = test_conn();
        let casual = customer(&conn, "Casual", false, Some(dec!(300.00)));
        let free = customer(&conn, "Free", true, Some(dec!(0)));
        let unset = customer(&conn, "Unset", true, None);
        vehicle(&conn, "ABC1234", &casual, at(2024, 1, 1));
        vehicle(&conn, "DEF5678", &free, at(2024, 1, 1));
        vehicle(&conn, "GHI9012", &unset, at(2024, 1, 1));

        let store = SqliteBillingStore::new(&conn);
        assert!(generate(&store, "2024-02").unwrap().is_empty());
        assert!(list_invoices(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_leap_and_common_february() {
        let conn = test_conn();
        let c = customer(&conn, "C", true, Some(dec!(100.00)));
        vehicle(&conn, "ABC1234", &c, at(2023, 1, 1));

        let store = SqliteBillingStore::new(&conn);
        let leap = generate_run(&store, "2024-02", &CancelToken::new()).unwrap();
        let common = generate_run(&store, "2023-02", &CancelToken::new()).unwrap();

        assert_eq!(leap.days_in_month, 29);
        assert_eq!(common.days_in_month, 28);
        assert!(leap.created[0].note.contains("29 days"));
        assert!(common.created[0].note.contains("28 days"));
    }

    #[test]
    fn test_out_of_range_fee_fails_without_writing() {
        let conn = test_conn();
        // stored directly, bypassing the fee bound enforced on create/update
        let mut rich = Customer::new("Rich");
        rich.is_subscriber = true;
        rich.monthly_fee = Some(Decimal::MAX);
        insert_customer(&conn, &rich).unwrap();
        vehicle(&conn, "ABC1234", &rich.id, at(2024, 1, 1));

        let store = SqliteBillingStore::new(&conn);
        let err = generate(&store, "2099-01").unwrap_err();

        assert!(matches!(err, BillingError::AmountOverflow { ref customer_id, .. } if *customer_id == rich.id));
        assert!(list_invoices(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_invalid_competence_does_no_work() {
        let conn = test_conn();
        let c = customer(&conn, "C", true, Some(dec!(100.00)));
        vehicle(&conn, "ABC1234", &c, at(2024, 1, 1));

        let store = SqliteBillingStore::new(&conn);
        let err = generate(&store, "2024-13").unwrap_err();

        assert!(err.is_input_error());
        assert!(list_invoices(&conn, None).unwrap().is_empty());
    }

    #[test]
    fn test_deleted_vehicle_bills_until_removal() {
        let conn = test_conn();
        let c = customer(&conn, "C", true, Some(dec!(300.00)));
        let v = vehicle(&conn, "ABC1234", &c, at(2024, 1, 1));
        crate::entities::delete_vehicle_at(&conn, &v, at(2024, 2, 10)).unwrap();

        let store = SqliteBillingStore::new(&conn);
        let feb = generate(&store, "2024-02").unwrap();
        let mar = generate(&store, "2024-03").unwrap();

        // 10 of 29 days
        assert_eq!(feb[0].amount, dec!(103.45));
        assert_eq!(feb[0].vehicle_ids, vec![v]);
        assert!(mar.is_empty());
    }

    #[test]
    fn test_integrity_warnings_are_reported_not_fatal() {
        let conn = test_conn();
        let c = customer(&conn, "C", true, Some(dec!(310.00)));
        let v = vehicle_without_history(&conn, "ABC1234", &c, at(2024, 1, 1));
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        insert_interval(&conn, &AssociationInterval::new(&v, &c, d(1), Some(d(5)))).unwrap();
        insert_interval(&conn, &AssociationInterval::new(&v, &c, d(21), None)).unwrap();

        let store = SqliteBillingStore::new(&conn);
        let run = generate_run(&store, "2024-01", &CancelToken::new()).unwrap();

        assert_eq!(run.warnings.len(), 1);
        assert!(matches!(run.warnings[0].issue, IntegrityIssue::Gap { .. }));
        // 5 + 11 of 31 days
        assert_eq!(run.created[0].amount, dec!(160.00));
    }
}
