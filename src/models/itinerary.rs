use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AppError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ActivityStatus {
    #[default]
    Planned,
    Confirmed,
    Completed,
    Cancelled,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityStatus::Planned => "planned",
            ActivityStatus::Confirmed => "confirmed",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Spending bucket explicitly recorded on a scheduled activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum CostCategory {
    Accommodation,
    Food,
    Transport,
    Activities,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CityRef {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRef {
    pub id: String,
    pub name: String,
    pub base_cost: Option<Decimal>,
    pub duration_minutes: Option<i64>,
}

/// The full plan of one trip: stops, their days, and the activities on each day.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Itinerary {
    pub id: String,
    pub trip_id: String,
    pub stops: Vec<Stop>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Stop {
    pub id: String,
    /// 1-based position within the trip. Dense across the itinerary.
    pub order: u32,
    pub city: CityRef,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub accommodation: Option<String>,
    pub notes: Option<String>,
    pub days: Vec<Day>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Day {
    pub id: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub activities: Vec<ScheduledActivity>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledActivity {
    pub id: String,
    pub activity: ActivityRef,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub status: ActivityStatus,
    pub estimated_cost: Option<Decimal>,
    pub actual_cost: Option<Decimal>,
    pub category: Option<CostCategory>,
    pub notes: Option<String>,
}

impl Itinerary {
    pub fn is_empty(&self) -> bool {
        self.stops.is_empty()
    }

    /// Write-side copy of the current stops, ids included.
    pub fn to_drafts(&self) -> Vec<StopDraft> {
        self.stops.iter().map(StopDraft::from).collect()
    }
}

// ---------------------------------------------------------------------------
// Drafts: write-side nodes. A missing id means the row does not exist yet.
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StopDraft {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub order: Option<u32>,
    pub city_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub accommodation: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub days: Vec<DayDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DayDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub activities: Vec<ScheduledActivityDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduledActivityDraft {
    #[serde(default)]
    pub id: Option<String>,
    pub activity_id: String,
    #[serde(default)]
    pub start_time: Option<NaiveTime>,
    #[serde(default)]
    pub end_time: Option<NaiveTime>,
    #[serde(default)]
    pub status: ActivityStatus,
    #[serde(default)]
    pub estimated_cost: Option<Decimal>,
    #[serde(default)]
    pub actual_cost: Option<Decimal>,
    #[serde(default)]
    pub category: Option<CostCategory>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl StopDraft {
    pub fn new(city_id: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            id: None,
            order: None,
            city_id: city_id.into(),
            start_date,
            end_date,
            accommodation: None,
            notes: None,
            days: Vec::new(),
        }
    }

    /// Human-readable handle used in violation messages.
    pub fn label(&self, position: usize) -> String {
        match (&self.id, self.order) {
            (Some(id), _) => format!("stop {id}"),
            (None, Some(order)) => format!("stop #{order}"),
            (None, None) => format!("stop at position {}", position + 1),
        }
    }
}

impl DayDraft {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            id: None,
            date,
            notes: None,
            activities: Vec::new(),
        }
    }
}

impl ScheduledActivityDraft {
    pub fn new(activity_id: impl Into<String>) -> Self {
        Self {
            id: None,
            activity_id: activity_id.into(),
            start_time: None,
            end_time: None,
            status: ActivityStatus::default(),
            estimated_cost: None,
            actual_cost: None,
            category: None,
            notes: None,
        }
    }
}

impl From<&Stop> for StopDraft {
    fn from(stop: &Stop) -> Self {
        Self {
            id: Some(stop.id.clone()),
            order: Some(stop.order),
            city_id: stop.city.id.clone(),
            start_date: stop.start_date,
            end_date: stop.end_date,
            accommodation: stop.accommodation.clone(),
            notes: stop.notes.clone(),
            days: stop.days.iter().map(DayDraft::from).collect(),
        }
    }
}

impl From<&Day> for DayDraft {
    fn from(day: &Day) -> Self {
        Self {
            id: Some(day.id.clone()),
            date: day.date,
            notes: day.notes.clone(),
            activities: day
                .activities
                .iter()
                .map(ScheduledActivityDraft::from)
                .collect(),
        }
    }
}

impl From<&ScheduledActivity> for ScheduledActivityDraft {
    fn from(item: &ScheduledActivity) -> Self {
        Self {
            id: Some(item.id.clone()),
            activity_id: item.activity.id.clone(),
            start_time: item.start_time,
            end_time: item.end_time,
            status: item.status,
            estimated_cost: item.estimated_cost,
            actual_cost: item.actual_cost,
            category: item.category,
            notes: item.notes.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Order maintenance
// ---------------------------------------------------------------------------

/// Assigns 1..N following the current sequence.
pub fn renumber(stops: &mut [StopDraft]) {
    for (index, stop) in stops.iter_mut().enumerate() {
        stop.order = Some(index as u32 + 1);
    }
}

/// Fills orders from sequence position when no stop carries one.
/// A list where only some stops are numbered is rejected.
pub fn assign_missing_orders(stops: &mut [StopDraft]) -> Result<(), AppError> {
    let numbered = stops.iter().filter(|stop| stop.order.is_some()).count();
    if numbered == 0 {
        renumber(stops);
        Ok(())
    } else if numbered == stops.len() {
        Ok(())
    } else {
        Err(AppError::precondition(format!(
            "{numbered} of {} stops carry an order; number all of them or none",
            stops.len()
        )))
    }
}

/// Inserts `stop` before the given 0-based position (clamped to the end).
pub fn insert_stop(stops: &mut Vec<StopDraft>, position: usize, stop: StopDraft) {
    sort_by_order(stops);
    let position = position.min(stops.len());
    stops.insert(position, stop);
    renumber(stops);
}

/// Removes the stop with the given order and closes the gap.
pub fn remove_stop(stops: &mut Vec<StopDraft>, order: u32) -> Option<StopDraft> {
    sort_by_order(stops);
    let index = stops.iter().position(|stop| stop.order == Some(order))?;
    let removed = stops.remove(index);
    renumber(stops);
    Some(removed)
}

/// Moves the stop at `from` to become stop number `to`.
pub fn move_stop(stops: &mut Vec<StopDraft>, from: u32, to: u32) -> Result<(), AppError> {
    sort_by_order(stops);
    let index = stops
        .iter()
        .position(|stop| stop.order == Some(from))
        .ok_or(AppError::NotFound)?;
    if to == 0 || to as usize > stops.len() {
        return Err(AppError::BadRequest(format!(
            "target order {to} is outside 1..={}",
            stops.len()
        )));
    }
    let stop = stops.remove(index);
    stops.insert(to as usize - 1, stop);
    renumber(stops);
    Ok(())
}

fn sort_by_order(stops: &mut [StopDraft]) {
    stops.sort_by_key(|stop| stop.order.unwrap_or(u32::MAX));
}
