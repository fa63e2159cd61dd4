//! Conversion between the flat rows of the itinerary join query and the
//! nested `Itinerary` tree, plus the diff that turns a desired stop list
//! into row mutations.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use uuid::Uuid;

use crate::{
    db::decimal_column,
    error::AppError,
    models::itinerary::{
        ActivityRef, ActivityStatus, CityRef, CostCategory, Day, DayDraft, Itinerary,
        ScheduledActivity, ScheduledActivityDraft, Stop, StopDraft,
    },
};

/// One row of the LEFT JOIN chain itinerary → stop → city → day →
/// scheduled activity → activity. Everything below the itinerary is
/// nullable.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ItineraryRow {
    pub itinerary_id: String,
    pub trip_id: String,

    pub stop_id: Option<String>,
    pub stop_order: Option<i64>,
    pub stop_start: Option<NaiveDate>,
    pub stop_end: Option<NaiveDate>,
    pub stop_accommodation: Option<String>,
    pub stop_notes: Option<String>,

    pub city_id: Option<String>,
    pub city_name: Option<String>,
    pub city_country: Option<String>,

    pub day_id: Option<String>,
    pub day_date: Option<NaiveDate>,
    pub day_notes: Option<String>,

    pub scheduled_id: Option<String>,
    pub scheduled_start: Option<NaiveTime>,
    pub scheduled_end: Option<NaiveTime>,
    pub scheduled_status: Option<ActivityStatus>,
    pub scheduled_estimated_cost: Option<Decimal>,
    pub scheduled_actual_cost: Option<Decimal>,
    pub scheduled_category: Option<CostCategory>,
    pub scheduled_notes: Option<String>,

    pub activity_id: Option<String>,
    pub activity_name: Option<String>,
    pub activity_base_cost: Option<Decimal>,
    pub activity_duration_minutes: Option<i64>,
}

impl<'r> FromRow<'r, SqliteRow> for ItineraryRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            itinerary_id: row.try_get("itinerary_id")?,
            trip_id: row.try_get("trip_id")?,
            stop_id: row.try_get("stop_id")?,
            stop_order: row.try_get("stop_order")?,
            stop_start: row.try_get("stop_start")?,
            stop_end: row.try_get("stop_end")?,
            stop_accommodation: row.try_get("stop_accommodation")?,
            stop_notes: row.try_get("stop_notes")?,
            city_id: row.try_get("city_id")?,
            city_name: row.try_get("city_name")?,
            city_country: row.try_get("city_country")?,
            day_id: row.try_get("day_id")?,
            day_date: row.try_get("day_date")?,
            day_notes: row.try_get("day_notes")?,
            scheduled_id: row.try_get("scheduled_id")?,
            scheduled_start: row.try_get("scheduled_start")?,
            scheduled_end: row.try_get("scheduled_end")?,
            scheduled_status: row.try_get("scheduled_status")?,
            scheduled_estimated_cost: decimal_column(row, "scheduled_estimated_cost")?,
            scheduled_actual_cost: decimal_column(row, "scheduled_actual_cost")?,
            scheduled_category: row.try_get("scheduled_category")?,
            scheduled_notes: row.try_get("scheduled_notes")?,
            activity_id: row.try_get("activity_id")?,
            activity_name: row.try_get("activity_name")?,
            activity_base_cost: decimal_column(row, "activity_base_cost")?,
            activity_duration_minutes: row.try_get("activity_duration_minutes")?,
        })
    }
}

fn required<T>(value: Option<T>, column: &str, owner: &str) -> Result<T, AppError> {
    value.ok_or_else(|| AppError::precondition(format!("{owner} has no `{column}` column value")))
}

/// Folds pre-sorted join rows into the nested tree.
///
/// Rows must arrive ordered by stop order, day date and activity start time;
/// nothing is re-sorted here, out-of-order input is rejected instead. An
/// empty row set means the itinerary does not exist.
pub fn build_tree<I>(rows: I, trip_id: &str) -> Result<Itinerary, AppError>
where
    I: IntoIterator<Item = ItineraryRow>,
{
    let mut rows = rows.into_iter().peekable();
    let Some(first) = rows.peek() else {
        return Err(AppError::NotFound);
    };
    let itinerary_id = first.itinerary_id.clone();

    let mut stops: Vec<Stop> = Vec::new();
    let mut stop_index: HashMap<String, usize> = HashMap::new();
    let mut day_owner: HashMap<String, usize> = HashMap::new();
    let mut seen_activities: HashSet<String> = HashSet::new();
    let mut stopless_rows = 0usize;

    for row in rows {
        if row.itinerary_id != itinerary_id {
            return Err(AppError::precondition(format!(
                "rows mix itineraries {itinerary_id} and {}",
                row.itinerary_id
            )));
        }
        if row.trip_id != trip_id {
            return Err(AppError::precondition(format!(
                "row for trip {} returned while building trip {trip_id}",
                row.trip_id
            )));
        }

        let Some(stop_id) = row.stop_id.clone() else {
            if row.day_id.is_some() || row.scheduled_id.is_some() {
                return Err(AppError::precondition(
                    "row carries day or activity columns without a stop id",
                ));
            }
            stopless_rows += 1;
            continue;
        };

        let stop_pos = match stop_index.get(&stop_id) {
            Some(&pos) if pos + 1 == stops.len() => pos,
            Some(_) => {
                return Err(AppError::precondition(format!(
                    "rows for stop {stop_id} are not contiguous"
                )))
            }
            None => {
                let stop = stop_from_row(&row, &stop_id)?;
                if let Some(previous) = stops.last() {
                    if stop.order <= previous.order {
                        return Err(AppError::precondition(format!(
                            "stop {stop_id} with order {} arrived after order {}; \
                             rows are not sorted by stop order",
                            stop.order, previous.order
                        )));
                    }
                }
                stops.push(stop);
                stop_index.insert(stop_id.clone(), stops.len() - 1);
                stops.len() - 1
            }
        };

        let Some(day_id) = row.day_id.clone() else {
            if row.scheduled_id.is_some() {
                return Err(AppError::precondition(
                    "row carries activity columns without a day id",
                ));
            }
            continue;
        };

        let stop = &mut stops[stop_pos];
        match day_owner.get(&day_id) {
            Some(&owner) if owner != stop_pos => {
                return Err(AppError::precondition(format!(
                    "day {day_id} appears under more than one stop"
                )))
            }
            Some(_) => {
                if stop.days.last().map(|day| day.id.as_str()) != Some(day_id.as_str()) {
                    return Err(AppError::precondition(format!(
                        "rows for day {day_id} are not contiguous"
                    )));
                }
            }
            None => {
                let date = required(row.day_date, "day_date", &format!("day {day_id}"))?;
                if let Some(previous) = stop.days.last() {
                    if date < previous.date {
                        return Err(AppError::precondition(format!(
                            "day {day_id} on {date} arrived after {}; \
                             rows are not sorted by day date",
                            previous.date
                        )));
                    }
                }
                stop.days.push(Day {
                    id: day_id.clone(),
                    date,
                    notes: row.day_notes.clone(),
                    activities: Vec::new(),
                });
                day_owner.insert(day_id.clone(), stop_pos);
            }
        }

        if let Some(scheduled_id) = row.scheduled_id.clone() {
            if !seen_activities.insert(scheduled_id.clone()) {
                return Err(AppError::precondition(format!(
                    "scheduled activity {scheduled_id} appears in more than one row"
                )));
            }
            let item = scheduled_from_row(row, scheduled_id)?;
            if let Some(day) = stop.days.last_mut() {
                day.activities.push(item);
            }
        }
    }

    if stopless_rows > 0 && (stopless_rows > 1 || !stops.is_empty()) {
        return Err(AppError::precondition(
            "a stop-less row is only valid as the single row of an empty itinerary",
        ));
    }

    Ok(Itinerary {
        id: itinerary_id,
        trip_id: trip_id.to_string(),
        stops,
    })
}

fn stop_from_row(row: &ItineraryRow, stop_id: &str) -> Result<Stop, AppError> {
    let owner = format!("stop {stop_id}");
    let order = required(row.stop_order, "stop_order", &owner)?;
    let order = u32::try_from(order)
        .ok()
        .filter(|order| *order > 0)
        .ok_or_else(|| AppError::precondition(format!("{owner} has invalid order {order}")))?;
    Ok(Stop {
        id: stop_id.to_string(),
        order,
        city: CityRef {
            id: required(row.city_id.clone(), "city_id", &owner)?,
            name: required(row.city_name.clone(), "city_name", &owner)?,
            country: row.city_country.clone(),
        },
        start_date: required(row.stop_start, "stop_start", &owner)?,
        end_date: required(row.stop_end, "stop_end", &owner)?,
        accommodation: row.stop_accommodation.clone(),
        notes: row.stop_notes.clone(),
        days: Vec::new(),
    })
}

fn scheduled_from_row(row: ItineraryRow, id: String) -> Result<ScheduledActivity, AppError> {
    let owner = format!("scheduled activity {id}");
    Ok(ScheduledActivity {
        activity: ActivityRef {
            id: required(row.activity_id, "activity_id", &owner)?,
            name: required(row.activity_name, "activity_name", &owner)?,
            base_cost: row.activity_base_cost,
            duration_minutes: row.activity_duration_minutes,
        },
        status: required(row.scheduled_status, "scheduled_status", &owner)?,
        id,
        start_time: row.scheduled_start,
        end_time: row.scheduled_end,
        estimated_cost: row.scheduled_estimated_cost,
        actual_cost: row.scheduled_actual_cost,
        category: row.scheduled_category,
        notes: row.scheduled_notes,
    })
}

/// Inverse of [`build_tree`]: the rows the join query would return for `itinerary`.
pub fn flatten(itinerary: &Itinerary) -> Vec<ItineraryRow> {
    let base = ItineraryRow {
        itinerary_id: itinerary.id.clone(),
        trip_id: itinerary.trip_id.clone(),
        ..ItineraryRow::default()
    };
    if itinerary.stops.is_empty() {
        return vec![base];
    }

    let mut rows = Vec::new();
    for stop in &itinerary.stops {
        let stop_row = ItineraryRow {
            stop_id: Some(stop.id.clone()),
            stop_order: Some(i64::from(stop.order)),
            stop_start: Some(stop.start_date),
            stop_end: Some(stop.end_date),
            stop_accommodation: stop.accommodation.clone(),
            stop_notes: stop.notes.clone(),
            city_id: Some(stop.city.id.clone()),
            city_name: Some(stop.city.name.clone()),
            city_country: stop.city.country.clone(),
            ..base.clone()
        };
        if stop.days.is_empty() {
            rows.push(stop_row);
            continue;
        }
        for day in &stop.days {
            let day_row = ItineraryRow {
                day_id: Some(day.id.clone()),
                day_date: Some(day.date),
                day_notes: day.notes.clone(),
                ..stop_row.clone()
            };
            if day.activities.is_empty() {
                rows.push(day_row);
                continue;
            }
            for item in &day.activities {
                rows.push(ItineraryRow {
                    scheduled_id: Some(item.id.clone()),
                    scheduled_start: item.start_time,
                    scheduled_end: item.end_time,
                    scheduled_status: Some(item.status),
                    scheduled_estimated_cost: item.estimated_cost,
                    scheduled_actual_cost: item.actual_cost,
                    scheduled_category: item.category,
                    scheduled_notes: item.notes.clone(),
                    activity_id: Some(item.activity.id.clone()),
                    activity_name: Some(item.activity.name.clone()),
                    activity_base_cost: item.activity.base_cost,
                    activity_duration_minutes: item.activity.duration_minutes,
                    ..day_row.clone()
                });
            }
        }
    }
    rows
}

// ---------------------------------------------------------------------------
// Write side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct StopRecord {
    pub id: String,
    pub itinerary_id: String,
    pub city_id: String,
    pub order: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub accommodation: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayRecord {
    pub id: String,
    pub stop_id: String,
    pub date: NaiveDate,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledActivityRecord {
    pub id: String,
    pub day_id: String,
    pub activity_id: String,
    pub start_time: Option<NaiveTime>,
    pub end_time: Option<NaiveTime>,
    pub status: ActivityStatus,
    pub estimated_cost: Option<Decimal>,
    pub actual_cost: Option<Decimal>,
    pub category: Option<CostCategory>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowMutation {
    InsertStop(StopRecord),
    UpdateStop(StopRecord),
    DeleteStop(String),
    InsertDay(DayRecord),
    UpdateDay(DayRecord),
    DeleteDay(String),
    InsertActivity(ScheduledActivityRecord),
    UpdateActivity(ScheduledActivityRecord),
    DeleteActivity(String),
}

#[derive(Default)]
struct Persisted {
    stops: HashMap<String, StopRecord>,
    days: HashMap<String, DayRecord>,
    activities: HashMap<String, ScheduledActivityRecord>,
}

impl Persisted {
    fn from_tree(itinerary: &Itinerary) -> Self {
        let mut persisted = Self::default();
        for stop in &itinerary.stops {
            persisted.stops.insert(
                stop.id.clone(),
                StopRecord {
                    id: stop.id.clone(),
                    itinerary_id: itinerary.id.clone(),
                    city_id: stop.city.id.clone(),
                    order: stop.order,
                    start_date: stop.start_date,
                    end_date: stop.end_date,
                    accommodation: stop.accommodation.clone(),
                    notes: stop.notes.clone(),
                },
            );
            for day in &stop.days {
                persisted.days.insert(
                    day.id.clone(),
                    DayRecord {
                        id: day.id.clone(),
                        stop_id: stop.id.clone(),
                        date: day.date,
                        notes: day.notes.clone(),
                    },
                );
                for item in &day.activities {
                    let draft = ScheduledActivityDraft::from(item);
                    persisted
                        .activities
                        .insert(item.id.clone(), activity_record(&item.id, &day.id, &draft));
                }
            }
        }
        persisted
    }
}

/// Upserts are ordered parents first and deletes children first so a day or
/// activity can move under a new parent before its old parent is removed.
#[derive(Default)]
struct Plan {
    stop_upserts: Vec<RowMutation>,
    day_upserts: Vec<RowMutation>,
    activity_upserts: Vec<RowMutation>,
    activity_deletes: Vec<RowMutation>,
    day_deletes: Vec<RowMutation>,
    stop_deletes: Vec<RowMutation>,
}

impl Plan {
    fn into_mutations(self) -> Vec<RowMutation> {
        let mut out = self.stop_upserts;
        out.extend(self.day_upserts);
        out.extend(self.activity_upserts);
        out.extend(self.activity_deletes);
        out.extend(self.day_deletes);
        out.extend(self.stop_deletes);
        out
    }
}

fn upsert<T: PartialEq>(
    existing: Option<&T>,
    record: T,
    insert: fn(T) -> RowMutation,
    update: fn(T) -> RowMutation,
) -> Option<RowMutation> {
    match existing {
        None => Some(insert(record)),
        Some(current) if *current == record => None,
        Some(_) => Some(update(record)),
    }
}

fn resolve_id(
    id: &Option<String>,
    known: bool,
    kind: &str,
    claimed: &mut HashSet<String>,
) -> Result<String, AppError> {
    match id {
        None => Ok(Uuid::new_v4().to_string()),
        Some(id) if !known => Err(AppError::precondition(format!(
            "{kind} {id} does not belong to this itinerary"
        ))),
        Some(id) if !claimed.insert(id.clone()) => Err(AppError::precondition(format!(
            "{kind} {id} is listed more than once"
        ))),
        Some(id) => Ok(id.clone()),
    }
}

fn activity_record(
    id: &str,
    day_id: &str,
    draft: &ScheduledActivityDraft,
) -> ScheduledActivityRecord {
    ScheduledActivityRecord {
        id: id.to_string(),
        day_id: day_id.to_string(),
        activity_id: draft.activity_id.clone(),
        start_time: draft.start_time,
        end_time: draft.end_time,
        status: draft.status,
        estimated_cost: draft.estimated_cost,
        actual_cost: draft.actual_cost,
        category: draft.category,
        notes: draft.notes.clone(),
    }
}

/// Diffs the desired stop list against the persisted tree.
///
/// Drafts without an id become inserts, drafts with an id become updates
/// (skipped when nothing changed), and persisted rows missing from the
/// desired list become deletes. Orders must already be assigned.
pub fn plan_replace(
    current: &Itinerary,
    desired: &[StopDraft],
) -> Result<Vec<RowMutation>, AppError> {
    let persisted = Persisted::from_tree(current);
    let mut claimed = HashSet::new();
    let mut kept = HashSet::new();
    let mut plan = Plan::default();

    for stop in desired {
        let stop_id = resolve_id(
            &stop.id,
            stop.id.as_ref().is_some_and(|id| persisted.stops.contains_key(id)),
            "stop",
            &mut claimed,
        )?;
        let order = stop
            .order
            .ok_or_else(|| AppError::precondition(format!("stop {stop_id} has no order")))?;
        let record = StopRecord {
            id: stop_id.clone(),
            itinerary_id: current.id.clone(),
            city_id: stop.city_id.clone(),
            order,
            start_date: stop.start_date,
            end_date: stop.end_date,
            accommodation: stop.accommodation.clone(),
            notes: stop.notes.clone(),
        };
        plan.stop_upserts.extend(upsert(
            persisted.stops.get(&stop_id),
            record,
            RowMutation::InsertStop,
            RowMutation::UpdateStop,
        ));
        kept.insert(stop_id.clone());

        for day in &stop.days {
            plan_day(&persisted, &stop_id, day, &mut claimed, &mut kept, &mut plan)?;
        }
    }

    for id in persisted.activities.keys().filter(|id| !kept.contains(*id)) {
        plan.activity_deletes.push(RowMutation::DeleteActivity(id.clone()));
    }
    for id in persisted.days.keys().filter(|id| !kept.contains(*id)) {
        plan.day_deletes.push(RowMutation::DeleteDay(id.clone()));
    }
    for id in persisted.stops.keys().filter(|id| !kept.contains(*id)) {
        plan.stop_deletes.push(RowMutation::DeleteStop(id.clone()));
    }

    Ok(plan.into_mutations())
}

fn plan_day(
    persisted: &Persisted,
    stop_id: &str,
    day: &DayDraft,
    claimed: &mut HashSet<String>,
    kept: &mut HashSet<String>,
    plan: &mut Plan,
) -> Result<(), AppError> {
    let day_id = resolve_id(
        &day.id,
        day.id.as_ref().is_some_and(|id| persisted.days.contains_key(id)),
        "day",
        claimed,
    )?;
    let record = DayRecord {
        id: day_id.clone(),
        stop_id: stop_id.to_string(),
        date: day.date,
        notes: day.notes.clone(),
    };
    plan.day_upserts.extend(upsert(
        persisted.days.get(&day_id),
        record,
        RowMutation::InsertDay,
        RowMutation::UpdateDay,
    ));
    kept.insert(day_id.clone());

    for item in &day.activities {
        let item_id = resolve_id(
            &item.id,
            item.id.as_ref().is_some_and(|id| persisted.activities.contains_key(id)),
            "scheduled activity",
            claimed,
        )?;
        plan.activity_upserts.extend(upsert(
            persisted.activities.get(&item_id),
            activity_record(&item_id, &day_id, item),
            RowMutation::InsertActivity,
            RowMutation::UpdateActivity,
        ));
        kept.insert(item_id);
    }
    Ok(())
}
