//! Trip lifecycle derivation.
//!
//! `planning` is only left through [`leave_planning`]; afterwards the status
//! follows the clock until it reaches `completed`, which is terminal.

use chrono::{DateTime, NaiveDate, Utc};

use crate::{error::AppError, models::trip::Trip, models::trip::TripStatus};

/// Clock-derived status for a trip spanning `[start, end]`, both inclusive.
pub fn derive_status(start: NaiveDate, end: NaiveDate, today: NaiveDate) -> TripStatus {
    if today < start {
        TripStatus::Upcoming
    } else if today <= end {
        TripStatus::Active
    } else {
        TripStatus::Completed
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Recomputed {
    pub trip: Trip,
    /// Whether the status moved and the row needs writing.
    pub changed: bool,
}

/// Brings a trip's stored status in line with the clock.
pub fn recompute(trip: &Trip, now: DateTime<Utc>) -> Recomputed {
    let unchanged = || Recomputed {
        trip: trip.clone(),
        changed: false,
    };
    if trip.status == TripStatus::Planning || trip.status.is_terminal() {
        return unchanged();
    }

    let derived = derive_status(trip.start_date, trip.end_date, now.date_naive());
    if derived == trip.status {
        return unchanged();
    }

    let mut next = trip.clone();
    next.status = derived;
    next.updated_at = now;
    Recomputed {
        trip: next,
        changed: true,
    }
}

/// The owner's explicit move out of `planning`.
pub fn leave_planning(trip: &Trip, now: DateTime<Utc>) -> Result<Trip, AppError> {
    if trip.status != TripStatus::Planning {
        return Err(AppError::BadRequest(format!(
            "trip {} is {}, only planning trips can be finalized",
            trip.id, trip.status
        )));
    }
    let mut next = trip.clone();
    next.status = derive_status(trip.start_date, trip.end_date, now.date_naive());
    next.updated_at = now;
    Ok(next)
}

/// Status for a newly created trip.
pub fn initial_status(
    start: NaiveDate,
    end: NaiveDate,
    planning: bool,
    today: NaiveDate,
) -> TripStatus {
    if planning {
        TripStatus::Planning
    } else {
        derive_status(start, end, today)
    }
}
