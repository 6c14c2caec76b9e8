// 🧹 History Normalizer
//
// Groups recorded association intervals per vehicle and synthesizes an
// "owned since creation" interval for vehicles without any. Recorded history
// is trusted as-is: gaps and overlaps are reported, never repaired.

use crate::entities::{AssociationInterval, Vehicle};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// INTEGRITY WARNINGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    /// Days between two intervals belong to nobody
    Gap {
        previous_end: NaiveDate,
        next_start: NaiveDate,
    },

    /// Two intervals claim the same days (beyond the shared hand-off day),
    /// or an open interval is followed by another one
    Overlap {
        previous_end: Option<NaiveDate>,
        next_start: NaiveDate,
    },

    /// End before start
    Inverted { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityWarning {
    pub vehicle_id: String,
    pub issue: IntegrityIssue,
}

// ============================================================================
// NORMALIZED HISTORY
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VehicleHistory {
    pub vehicle_id: String,

    /// Ordered by start date
    pub intervals: Vec<AssociationInterval>,

    /// True when `intervals` is the single implicit interval from creation
    pub synthesized: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedHistory {
    pub vehicles: BTreeMap<String, VehicleHistory>,
    pub warnings: Vec<IntegrityWarning>,
}

impl NormalizedHistory {
    /// Every interval of every vehicle, vehicle by vehicle.
    pub fn intervals(&self) -> impl Iterator<Item = &AssociationInterval> {
        self.vehicles.values().flat_map(|h| h.intervals.iter())
    }
}

/// Build the per-vehicle interval sets used by proration.
///
/// Intervals whose vehicle is no longer in `vehicles` (deleted vehicles) are
/// kept: their closed history still bills.
pub fn normalize(vehicles: &[Vehicle], intervals: &[AssociationInterval]) -> NormalizedHistory {
    let mut grouped: BTreeMap<String, Vec<AssociationInterval>> = BTreeMap::new();
    for interval in intervals {
        grouped
            .entry(interval.vehicle_id.clone())
            .or_default()
            .push(interval.clone());
    }

    let mut result = NormalizedHistory::default();

    for vehicle in vehicles {
        if grouped.contains_key(&vehicle.id) {
            continue;
        }
        let implicit = AssociationInterval::new(
            vehicle.id.clone(),
            vehicle.customer_id.clone(),
            vehicle.created_at.date_naive(),
            None,
        );
        result.vehicles.insert(
            vehicle.id.clone(),
            VehicleHistory {
                vehicle_id: vehicle.id.clone(),
                intervals: vec![implicit],
                synthesized: true,
            },
        );
    }

    for (vehicle_id, mut recorded) in grouped {
        recorded.sort_by_key(|i| (i.start, i.effective_end()));
        result.warnings.extend(check_integrity(&vehicle_id, &recorded));
        result.vehicles.insert(
            vehicle_id.clone(),
            VehicleHistory {
                vehicle_id,
                intervals: recorded,
                synthesized: false,
            },
        );
    }

    for warning in &result.warnings {
        tracing::warn!(
            vehicle_id = %warning.vehicle_id,
            issue = ?warning.issue,
            "association history integrity issue"
        );
    }

    result
}

/// Inspect one vehicle's intervals (sorted by start).
///
/// `next.start == previous.end` is the hand-off written on owner change and
/// is accepted.
pub fn check_integrity(vehicle_id: &str, sorted: &[AssociationInterval]) -> Vec<IntegrityWarning> {
    let mut warnings = Vec::new();
    let warn = |issue| IntegrityWarning {
        vehicle_id: vehicle_id.to_string(),
        issue,
    };

    for interval in sorted {
        if let Some(end) = interval.end {
            if end < interval.start {
                warnings.push(warn(IntegrityIssue::Inverted {
                    start: interval.start,
                    end,
                }));
            }
        }
    }

    for pair in sorted.windows(2) {
        let (previous, next) = (&pair[0], &pair[1]);
        match previous.end {
            None => warnings.push(warn(IntegrityIssue::Overlap {
                previous_end: None,
                next_start: next.start,
            })),
            Some(previous_end) if next.start < previous_end => {
                warnings.push(warn(IntegrityIssue::Overlap {
                    previous_end: Some(previous_end),
                    next_start: next.start,
                }))
            }
            Some(previous_end) if (next.start - previous_end).num_days() > 1 => {
                warnings.push(warn(IntegrityIssue::Gap {
                    previous_end,
                    next_start: next.start,
                }))
            }
            Some(_) => {}
        }
    }

    warnings
}
