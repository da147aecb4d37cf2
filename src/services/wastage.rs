//! Wastage estimation.
//!
//! Pure functions over a drum's usage history. Nothing here touches the
//! store, so recalculation can call it as often as it likes.

use rust_decimal::{Decimal, RoundingStrategy};
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::entities::{drum::DrumStatus, drum_usage};

/// Flat wastage charged when a usage carries no cable readings.
pub const HEURISTIC_WASTAGE_RATE: Decimal = dec!(0.05);

/// Capacity given to auto-created drums when neither the caller nor the
/// catalog item names one.
pub const DEFAULT_DRUM_CAPACITY: Decimal = dec!(2000);

/// Differences at or below this are treated as already consistent.
pub const RECALCULATION_EPSILON: Decimal = dec!(0.01);

/// Decimal places every stored length carries.
pub const LENGTH_SCALE: u32 = 4;

/// Rounds a length to the scale the store keeps, half away from zero like
/// Postgres `NUMERIC`. Anything written or compared against stored
/// quantities goes through here first.
pub fn to_stored_length(length: Decimal) -> Decimal {
    length
        .round_dp_with_strategy(LENGTH_SCALE, RoundingStrategy::MidpointAwayFromZero)
        .normalize()
}

/// How the length of a usage was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UsageMeasurement {
    /// Meter readings printed on the cable at the start and end of the run.
    WithPoints { start: Decimal, end: Decimal },
    /// No readings; the flat heuristic rate applies.
    Heuristic,
}

impl UsageMeasurement {
    /// Reads the measurement back out of a stored usage record. A record
    /// with only one of the two readings is treated as heuristic.
    pub fn from_record(record: &drum_usage::Model) -> Self {
        match (record.cable_start_point, record.cable_end_point) {
            (Some(start), Some(end)) => UsageMeasurement::WithPoints { start, end },
            _ => UsageMeasurement::Heuristic,
        }
    }

    /// The same measurement with readings at stored scale.
    pub fn to_stored(self) -> Self {
        match self {
            UsageMeasurement::WithPoints { start, end } => UsageMeasurement::WithPoints {
                start: to_stored_length(start),
                end: to_stored_length(end),
            },
            UsageMeasurement::Heuristic => UsageMeasurement::Heuristic,
        }
    }

    /// Start and end readings to persist alongside the usage.
    pub fn points(&self) -> (Option<Decimal>, Option<Decimal>) {
        match *self {
            UsageMeasurement::WithPoints { start, end } => (Some(start), Some(end)),
            UsageMeasurement::Heuristic => (None, None),
        }
    }

    /// Physical cable length between the readings, if they are usable.
    /// Negative readings are historical dirt and are ignored.
    pub fn physical_length(&self) -> Option<Decimal> {
        match *self {
            UsageMeasurement::WithPoints { start, end }
                if start >= Decimal::ZERO && end >= Decimal::ZERO =>
            {
                Some((end - start).abs())
            }
            _ => None,
        }
    }
}

/// Wastage charged for `quantity_used` under the flat heuristic.
pub fn heuristic_wastage(quantity_used: Decimal) -> Decimal {
    to_stored_length(quantity_used.max(Decimal::ZERO) * HEURISTIC_WASTAGE_RATE)
}

/// Wastage for a new usage given how it was measured.
///
/// With readings, wastage is whatever the physical run exceeds the
/// delivered length by. Unusable readings fall back to the heuristic.
pub fn wastage_for(quantity_used: Decimal, measurement: &UsageMeasurement) -> Decimal {
    let quantity_used = quantity_used.max(Decimal::ZERO);
    match measurement.physical_length() {
        Some(physical) => to_stored_length((physical - quantity_used).max(Decimal::ZERO)),
        None => heuristic_wastage(quantity_used),
    }
}

/// Result of folding a drum's usage history against its capacity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Estimate {
    pub calculated_current_quantity: Decimal,
    pub total_wastage: Decimal,
    pub records_considered: usize,
    /// Status the drum should carry at the calculated quantity.
    pub status: DrumStatus,
}

/// Estimates a drum's true remaining quantity from its usage history.
///
/// Records with readings are charged the larger of their stored wastage and
/// the excess the readings show; records without readings are trusted as
/// stored. Negative inputs are clamped to zero rather than rejected.
pub fn estimate(
    history: &[drum_usage::Model],
    capacity: Decimal,
    current_status: DrumStatus,
    low_threshold: Decimal,
) -> Estimate {
    let mut consumed = Decimal::ZERO;
    let mut total_wastage = Decimal::ZERO;

    for record in history {
        let used = record.quantity_used.max(Decimal::ZERO);
        let stored = record.wastage_calculated.max(Decimal::ZERO);
        let wastage = match UsageMeasurement::from_record(record).physical_length() {
            Some(physical) => stored.max(to_stored_length(physical - used)),
            None => stored,
        };
        consumed += used + wastage;
        total_wastage += wastage;
    }

    let calculated = (capacity.max(Decimal::ZERO) - consumed).max(Decimal::ZERO);
    Estimate {
        calculated_current_quantity: calculated,
        total_wastage,
        records_considered: history.len(),
        status: DrumStatus::derive(calculated, current_status, low_threshold),
    }
}
