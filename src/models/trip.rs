use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, FromRow, Row};
use std::fmt;

use crate::db::decimal_column;

/// Lifecycle status of a trip. `Planning` is chosen explicitly; the other
/// three are derived from the clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum TripStatus {
    #[default]
    Planning,
    Upcoming,
    Active,
    Completed,
}

impl TripStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TripStatus::Planning => "planning",
            TripStatus::Upcoming => "upcoming",
            TripStatus::Active => "active",
            TripStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TripStatus::Completed)
    }
}

impl fmt::Display for TripStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trip {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub status: TripStatus,
    pub budget: Option<Decimal>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, SqliteRow> for Trip {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            start_date: row.try_get("start_date")?,
            end_date: row.try_get("end_date")?,
            status: row.try_get("status")?,
            budget: decimal_column(row, "budget")?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

/// Owner input for creating a trip.
#[derive(Debug, Clone, Deserialize)]
pub struct NewTrip {
    pub owner_id: String,
    pub name: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub budget: Option<Decimal>,
    pub notes: Option<String>,
    /// Start in `planning` instead of the clock-derived status.
    #[serde(default = "default_true")]
    pub planning: bool,
}

/// Owner edit of a trip. Absent fields keep their stored value; an explicit
/// `null` clears the budget or the notes.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TripUpdate {
    pub name: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub budget: Option<Option<Decimal>>,
    #[serde(default, with = "::serde_with::rust::double_option")]
    pub notes: Option<Option<String>>,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn edit_tells_absent_fields_from_cleared_ones() {
        let untouched: TripUpdate = serde_json::from_str(r#"{"name": "Loop"}"#).unwrap();
        assert_eq!(untouched.budget, None);
        assert_eq!(untouched.notes, None);

        let cleared: TripUpdate =
            serde_json::from_str(r#"{"budget": null, "notes": null}"#).unwrap();
        assert_eq!(cleared.budget, Some(None));
        assert_eq!(cleared.notes, Some(None));

        let set: TripUpdate = serde_json::from_str(r#"{"budget": "120.50"}"#).unwrap();
        assert_eq!(set.budget, Some(Some(Decimal::new(12050, 2))));
    }
}
