// ➗ Overlap/Proration Engine
//
// For one competence, intersect every normalized interval with the month
// window and charge the owner `fee × overlap_days / days_in_month`, rounded to
// cents (half away from zero) per interval, then aggregate per customer.
//
// The fee comes from the CURRENT customer snapshot; fee history is not tracked.

use super::competence::Competence;
use super::error::BillingError;
use super::normalizer::NormalizedHistory;
use crate::entities::{AssociationInterval, Customer};
use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Currency precision
pub const AMOUNT_SCALE: u32 = 2;

// ============================================================================
// RESULT TYPES
// ============================================================================

/// One interval's share of a customer's bill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChargeLine {
    pub vehicle_id: String,
    pub overlap_start: NaiveDate,
    pub overlap_end: NaiveDate,
    pub days: u32,
    pub contribution: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomerCharge {
    pub customer_id: String,
    pub monthly_fee: Decimal,
    pub total: Decimal,
    pub vehicle_ids: BTreeSet<String>,
    pub lines: Vec<ChargeLine>,
}

/// Accumulator returned by [`prorate_month`]; only positive totals survive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProrationResult {
    pub competence: Competence,
    pub days_in_month: u32,
    pub charges: BTreeMap<String, CustomerCharge>,
}


// ============================================================================
// ARITHMETIC
// ============================================================================

/// Inclusive overlap of an interval with `[period_start, period_end]`.
///
/// Returns `(overlap_start, overlap_end, days)` or `None` when disjoint.
pub fn overlap(
    interval: &AssociationInterval,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> Option<(NaiveDate, NaiveDate, u32)> {
    let interval_end = interval.effective_end();
    if interval.start > period_end || interval_end < period_start {
        return None;
    }

    let overlap_start = interval.start.max(period_start);
    let overlap_end = interval_end.min(period_end);
    if overlap_end < overlap_start {
        return None;
    }

    let days = (overlap_end - overlap_start).num_days() + 1;
    Some((overlap_start, overlap_end, u32::try_from(days).ok()?))
}

/// `round(fee × days / days_in_month, 2)`, half away from zero.
///
/// `None` when the product does not fit in a `Decimal`.
pub fn prorate(fee: Decimal, days: u32, days_in_month: u32) -> Option<Decimal> {
    if days_in_month == 0 {
        return Some(Decimal::ZERO);
    }
    let amount = fee
        .checked_mul(Decimal::from(days))?
        .checked_div(Decimal::from(days_in_month))?;
    Some(amount.round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::MidpointAwayFromZero))
}

// ============================================================================
// ENGINE
// ============================================================================

pub fn prorate_month(
    competence: Competence,
    history: &NormalizedHistory,
    customers: &[Customer],
) -> Result<ProrationResult, BillingError> {
    let period_start = competence.first_day();
    let period_end = competence.last_day();
    let days_in_month = competence.days_in_month();

    let fees: HashMap<&str, Decimal> = customers
        .iter()
        .filter_map(|c| c.billable_fee().map(|fee| (c.id.as_str(), fee)))
        .collect();

    let mut charges: BTreeMap<String, CustomerCharge> = BTreeMap::new();

    for interval in history.intervals() {
        let Some((overlap_start, overlap_end, days)) = overlap(interval, period_start, period_end)
        else {
            continue;
        };
        let Some(&fee) = fees.get(interval.customer_id.as_str()) else {
            continue;
        };

        let overflow = || BillingError::AmountOverflow {
            customer_id: interval.customer_id.clone(),
            competence: competence.to_string(),
        };
        let contribution = prorate(fee, days, days_in_month).ok_or_else(overflow)?;
        let charge = charges
            .entry(interval.customer_id.clone())
            .or_insert_with(|| CustomerCharge {
                customer_id: interval.customer_id.clone(),
                monthly_fee: fee,
                total: Decimal::ZERO,
                vehicle_ids: BTreeSet::new(),
                lines: Vec::new(),
            });
        charge.total = charge.total.checked_add(contribution).ok_or_else(overflow)?;
        charge.vehicle_ids.insert(interval.vehicle_id.clone());
        charge.lines.push(ChargeLine {
            vehicle_id: interval.vehicle_id.clone(),
            overlap_start,
            overlap_end,
            days,
            contribution,
        });
    }

    charges.retain(|_, charge| charge.total > Decimal::ZERO);

    tracing::debug!(
        competence = %competence,
        days_in_month,
        customers = charges.len(),
        "proration complete"
    );

    Ok(ProrationResult {
        competence,
        days_in_month,
        charges,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::billing::normalizer::normalize;
    use crate::entities::Vehicle;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn competence(s: &str) -> Competence {
        Competence::parse(s).unwrap()
    }

    fn subscriber(id: &str, fee: Decimal) -> Customer {
        let mut c = Customer::new(id);
        c.id = id.to_string();
        c.is_subscriber = true;
        c.monthly_fee = Some(fee);
        c
    }

    fn vehicle(id: &str, owner: &str, created: NaiveDate) -> Vehicle {
        let mut v = Vehicle::new("ABC1234", owner);
        v.id = id.to_string();
        v.created_at = Utc.from_utc_datetime(&created.and_hms_opt(9, 0, 0).unwrap());
        v
    }

    fn interval(v: &str, c: &str, start: NaiveDate, end: Option<NaiveDate>) -> AssociationInterval {
        AssociationInterval::new(v, c, start, end)
    }

    #[test]
    fn test_overlap_days_inclusive() {
        let i = interval("v", "c", date(2024, 2, 10), None);
        let (start, end, days) = overlap(&i, date(2024, 2, 1), date(2024, 2, 29)).unwrap();
        assert_eq!((start, end, days), (date(2024, 2, 10), date(2024, 2, 29), 20));

        let single = interval("v", "c", date(2024, 2, 29), Some(date(2024, 3, 5)));
        assert_eq!(overlap(&single, date(2024, 2, 1), date(2024, 2, 29)).unwrap().2, 1);
    }

    #[test]
    fn test_interval_outside_month_contributes_nothing() {
        let before = interval("v1", "c1", date(2023, 12, 1), Some(date(2024, 1, 31)));
        let after = interval("v2", "c1", date(2024, 3, 1), None);
        assert!(overlap(&before, date(2024, 2, 1), date(2024, 2, 29)).is_none());
        assert!(overlap(&after, date(2024, 2, 1), date(2024, 2, 29)).is_none());

        let history = normalize(&[], &[before, after]);
        let result = prorate_month(competence("2024-02"), &history, &[subscriber("c1", dec!(100))]).unwrap();
        assert!(result.charges.is_empty());
    }

    #[test]
    fn test_full_month_is_exactly_the_fee() {
        let history = normalize(&[], &[interval("v1", "c1", date(2024, 1, 1), None)]);
        let result = prorate_month(competence("2024-04"), &history, &[subscriber("c1", dec!(250.00))]).unwrap();

        assert_eq!(result.days_in_month, 30);
        assert_eq!(result.charges["c1"].total, dec!(250.00));
    }

    #[test]
    fn test_mid_month_owner_change_splits_between_owners() {
        let fee = dec!(100.00);
        let history = normalize(
            &[],
            &[
                interval("v1", "a", date(2024, 1, 1), Some(date(2024, 4, 15))),
                interval("v1", "b", date(2024, 4, 16), None),
            ],
        );
        let customers = [subscriber("a", fee), subscriber("b", fee)];
        let result = prorate_month(competence("2024-04"), &history, &customers).unwrap();

        let a = &result.charges["a"];
        let b = &result.charges["b"];
        assert_eq!(a.total, prorate(fee, 15, 30).unwrap());
        assert_eq!(b.total, prorate(fee, 15, 30).unwrap());
        assert!(a.vehicle_ids.contains("v1"));
        assert!(b.vehicle_ids.contains("v1"));
        assert!((a.total + b.total - fee).abs() <= dec!(0.01));
    }

    #[test]
    fn test_uneven_split_stays_within_one_cent() {
        let fee = dec!(99.99);
        let history = normalize(
            &[],
            &[
                interval("v1", "a", date(2024, 1, 1), Some(date(2024, 4, 15))),
                interval("v1", "b", date(2024, 4, 16), None),
            ],
        );
        let customers = [subscriber("a", fee), subscriber("b", fee)];
        let result = prorate_month(competence("2024-04"), &history, &customers).unwrap();

        // 49.995 rounds away from zero on both sides
        assert_eq!(result.charges["a"].total, dec!(50.00));
        assert_eq!(result.charges["b"].total, dec!(50.00));
        let total: Decimal = result.charges.values().map(|c| c.total).sum();
        assert!((total - fee).abs() <= dec!(0.01));
    }

    #[test]
    fn test_non_subscribers_and_zero_fees_never_billed() {
        let history = normalize(
            &[],
            &[
                interval("v1", "casual", date(2024, 1, 1), None),
                interval("v2", "free", date(2024, 1, 1), None),
                interval("v3", "negative", date(2024, 1, 1), None),
                interval("v4", "unknown", date(2024, 1, 1), None),
            ],
        );
        let mut casual = Customer::new("casual");
        casual.id = "casual".to_string();
        casual.monthly_fee = Some(dec!(300));
        let customers = [
            casual,
            subscriber("free", dec!(0)),
            subscriber("negative", dec!(-10)),
        ];

        let result = prorate_month(competence("2024-02"), &history, &customers).unwrap();
        assert!(result.charges.is_empty());
    }

    #[test]
    fn test_leap_february_uses_29_days() {
        // created on the 11th: days 11..=29 are billed
        let v = vehicle("v1", "c1", date(2024, 2, 11));
        let history = normalize(&[v], &[]);
        let result = prorate_month(competence("2024-02"), &history, &[subscriber("c1", dec!(300.00))]).unwrap();

        assert_eq!(result.days_in_month, 29);
        let charge = &result.charges["c1"];
        assert_eq!(charge.lines[0].days, 19);
        assert_eq!(charge.total, dec!(196.55));
    }

    #[test]
    fn test_vehicle_created_mid_month_billed_from_creation_day() {
        // the creation day itself is billed
        let v = vehicle("v1", "c1", date(2024, 2, 10));
        let history = normalize(&[v], &[]);
        let result = prorate_month(competence("2024-02"), &history, &[subscriber("c1", dec!(300.00))]).unwrap();

        let charge = &result.charges["c1"];
        assert_eq!(charge.lines[0].overlap_start, date(2024, 2, 10));
        assert_eq!(charge.lines[0].days, 20);
        assert_eq!(charge.total, dec!(206.90));
        assert_eq!(charge.vehicle_ids.iter().map(String::as_str).collect::<Vec<_>>(), vec!["v1"]);
    }

    #[test]
    fn test_common_february_uses_28_days() {
        let history = normalize(&[], &[interval("v1", "c1", date(2023, 2, 15), None)]);
        let result = prorate_month(competence("2023-02"), &history, &[subscriber("c1", dec!(280.00))]).unwrap();

        assert_eq!(result.days_in_month, 28);
        // 14 of 28 days
        assert_eq!(result.charges["c1"].total, dec!(140.00));
    }

    #[test]
    fn test_multiple_vehicles_accumulate_per_customer() {
        let history = normalize(
            &[],
            &[
                interval("v1", "c1", date(2024, 1, 1), None),
                interval("v2", "c1", date(2024, 4, 16), None),
            ],
        );
        let result = prorate_month(competence("2024-04"), &history, &[subscriber("c1", dec!(60))]).unwrap();

        let charge = &result.charges["c1"];
        assert_eq!(charge.total, dec!(90.00));
        assert_eq!(charge.vehicle_ids.len(), 2);
        assert_eq!(charge.lines.len(), 2);
    }

    #[test]
    fn test_oversized_fee_is_an_error_not_a_panic() {
        let history = normalize(&[], &[interval("v1", "huge", date(2024, 1, 1), None)]);
        let customers = [subscriber("huge", Decimal::MAX)];

        let err = prorate_month(competence("2024-01"), &history, &customers).unwrap_err();
        assert!(matches!(
            err,
            BillingError::AmountOverflow { ref customer_id, .. } if customer_id == "huge"
        ));
    }

    #[test]
    fn test_prorate_rounding() {
        assert_eq!(prorate(dec!(300.00), 19, 29).unwrap(), dec!(196.55));
        assert_eq!(prorate(dec!(100.00), 30, 30).unwrap(), dec!(100.00));
        assert_eq!(prorate(dec!(0.01), 1, 2).unwrap(), dec!(0.01));
        assert_eq!(prorate(dec!(100), 1, 0), Some(Decimal::ZERO));
        assert_eq!(prorate(Decimal::MAX, 2, 30), None);
    }
}
