//! Date and ordering rules for an itinerary's stop list.
//!
//! Every write path goes through [`validate_stops`] before storage is
//! touched. The checks run category by category: the first category that
//! reports anything ends the run, but all violations inside it are kept.

use std::collections::HashSet;

use chrono::NaiveDate;
use serde::Serialize;

use crate::{error::AppError, models::itinerary::StopDraft};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    InvalidStopRange,
    OutsideTripBounds,
    OverlappingStops,
    InvalidOrder,
    DayOutsideStop,
    DuplicateDay,
    InvalidActivityTime,
    InvalidTripRange,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Labels of the offending stop(s). Empty for trip-level violations.
    pub stops: Vec<String>,
    pub reason: String,
}

impl Violation {
    fn new(kind: ViolationKind, stops: Vec<String>, reason: String) -> Self {
        Self {
            kind,
            stops,
            reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ValidationResult {
    Valid,
    Invalid(Vec<Violation>),
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, ValidationResult::Valid)
    }

    pub fn violations(&self) -> &[Violation] {
        match self {
            ValidationResult::Valid => &[],
            ValidationResult::Invalid(violations) => violations,
        }
    }

    pub fn into_result(self) -> Result<(), AppError> {
        match self {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid(violations) => Err(AppError::ValidationFailed(violations)),
        }
    }

    fn from_violations(violations: Vec<Violation>) -> Self {
        if violations.is_empty() {
            ValidationResult::Valid
        } else {
            ValidationResult::Invalid(violations)
        }
    }
}

/// Inclusive overlap test on closed date ranges: sharing a boundary date
/// counts as overlapping.
pub fn ranges_overlap(
    a_start: NaiveDate,
    a_end: NaiveDate,
    b_start: NaiveDate,
    b_end: NaiveDate,
) -> bool {
    a_start <= b_end && a_end >= b_start
}

/// Whether `[start, end]` lies inside `[bound_start, bound_end]`.
pub fn within_bounds(
    start: NaiveDate,
    end: NaiveDate,
    bound_start: NaiveDate,
    bound_end: NaiveDate,
) -> bool {
    start >= bound_start && end <= bound_end
}

pub fn validate_trip_dates(start: NaiveDate, end: NaiveDate) -> ValidationResult {
    if start <= end {
        ValidationResult::Valid
    } else {
        ValidationResult::Invalid(vec![Violation::new(
            ViolationKind::InvalidTripRange,
            Vec::new(),
            format!("trip starts {start} after it ends {end}"),
        )])
    }
}

/// Checks a proposed stop list against the trip bounds.
pub fn validate_stops(
    trip_start: NaiveDate,
    trip_end: NaiveDate,
    stops: &[StopDraft],
) -> ValidationResult {
    let checks: [&dyn Fn() -> Vec<Violation>; 6] = [
        &|| check_ranges(stops),
        &|| check_bounds(trip_start, trip_end, stops),
        &|| check_overlaps(stops),
        &|| check_orders(stops),
        &|| check_days(stops),
        &|| check_activity_times(stops),
    ];

    for check in checks {
        let violations = check();
        if !violations.is_empty() {
            return ValidationResult::Invalid(violations);
        }
    }
    ValidationResult::Valid
}

/// Re-checks already planned stops when the owner moves the trip dates.
pub fn validate_trip_bounds_change(
    new_start: NaiveDate,
    new_end: NaiveDate,
    stops: &[StopDraft],
) -> ValidationResult {
    let trip = validate_trip_dates(new_start, new_end);
    if !trip.is_valid() {
        return trip;
    }
    ValidationResult::from_violations(check_bounds(new_start, new_end, stops))
}

fn check_ranges(stops: &[StopDraft]) -> Vec<Violation> {
    stops
        .iter()
        .enumerate()
        .filter(|(_, stop)| stop.start_date > stop.end_date)
        .map(|(position, stop)| {
            Violation::new(
                ViolationKind::InvalidStopRange,
                vec![stop.label(position)],
                format!(
                    "invalid stop range: {} starts {} after it ends {}",
                    stop.label(position),
                    stop.start_date,
                    stop.end_date
                ),
            )
        })
        .collect()
}

fn check_bounds(trip_start: NaiveDate, trip_end: NaiveDate, stops: &[StopDraft]) -> Vec<Violation> {
    stops
        .iter()
        .enumerate()
        .filter(|(_, stop)| !within_bounds(stop.start_date, stop.end_date, trip_start, trip_end))
        .map(|(position, stop)| {
            Violation::new(
                ViolationKind::OutsideTripBounds,
                vec![stop.label(position)],
                format!(
                    "stop outside trip bounds: {} spans {}..{} but the trip spans {}..{}",
                    stop.label(position),
                    stop.start_date,
                    stop.end_date,
                    trip_start,
                    trip_end
                ),
            )
        })
        .collect()
}

fn check_overlaps(stops: &[StopDraft]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (i, a) in stops.iter().enumerate() {
        for (j, b) in stops.iter().enumerate().skip(i + 1) {
            if ranges_overlap(a.start_date, a.end_date, b.start_date, b.end_date) {
                violations.push(Violation::new(
                    ViolationKind::OverlappingStops,
                    vec![a.label(i), b.label(j)],
                    format!(
                        "overlapping stops: {} ({}..{}) and {} ({}..{})",
                        a.label(i),
                        a.start_date,
                        a.end_date,
                        b.label(j),
                        b.start_date,
                        b.end_date
                    ),
                ));
            }
        }
    }
    violations
}

fn check_orders(stops: &[StopDraft]) -> Vec<Violation> {
    let assigned = stops.iter().filter(|stop| stop.order.is_some()).count();
    if assigned == 0 {
        return Vec::new();
    }

    let count = stops.len() as u32;
    let mut seen = HashSet::new();
    let mut violations = Vec::new();
    for (position, stop) in stops.iter().enumerate() {
        let reason = match stop.order {
            None => Some(format!("{} has no order", stop.label(position))),
            Some(order) if order == 0 || order > count => Some(format!(
                "{} has order {order}, expected 1..={count}",
                stop.label(position)
            )),
            Some(order) if !seen.insert(order) => Some(format!(
                "{} repeats order {order}",
                stop.label(position)
            )),
            Some(_) => None,
        };
        if let Some(reason) = reason {
            violations.push(Violation::new(
                ViolationKind::InvalidOrder,
                vec![stop.label(position)],
                reason,
            ));
        }
    }
    violations
}

fn check_days(stops: &[StopDraft]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (position, stop) in stops.iter().enumerate() {
        let mut dates = HashSet::new();
        for day in &stop.days {
            if !within_bounds(day.date, day.date, stop.start_date, stop.end_date) {
                violations.push(Violation::new(
                    ViolationKind::DayOutsideStop,
                    vec![stop.label(position)],
                    format!(
                        "day {} is outside {} ({}..{})",
                        day.date,
                        stop.label(position),
                        stop.start_date,
                        stop.end_date
                    ),
                ));
            }
            if !dates.insert(day.date) {
                violations.push(Violation::new(
                    ViolationKind::DuplicateDay,
                    vec![stop.label(position)],
                    format!("{} has more than one day on {}", stop.label(position), day.date),
                ));
            }
        }
    }
    violations
}

fn check_activity_times(stops: &[StopDraft]) -> Vec<Violation> {
    let mut violations = Vec::new();
    for (position, stop) in stops.iter().enumerate() {
        for day in &stop.days {
            for item in &day.activities {
                if let (Some(start), Some(end)) = (item.start_time, item.end_time) {
                    if start >= end {
                        violations.push(Violation::new(
                            ViolationKind::InvalidActivityTime,
                            vec![stop.label(position)],
                            format!(
                                "activity {} on {} starts at {start} but ends at {end}",
                                item.activity_id, day.date
                            ),
                        ));
                    }
                }
            }
        }
    }
    violations
}
