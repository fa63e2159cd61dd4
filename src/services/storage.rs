use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    db::{decimal_text, DbPool},
    error::AppError,
    models::{
        catalog::{Activity, City},
        trip::{Trip, TripStatus},
    },
    services::builder::{
        DayRecord, ItineraryRow, RowMutation, ScheduledActivityRecord, StopRecord,
    },
};

/// Persistence boundary of the itinerary core.
#[async_trait]
pub trait ItineraryStore: Send + Sync {
    /// Inserts the trip together with its (empty) itinerary and returns the itinerary id.
    async fn insert_trip(&self, trip: &Trip) -> Result<String, AppError>;

    async fn fetch_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError>;

    /// Writes the owner-editable fields. The status column is left alone;
    /// it only changes through [`ItineraryStore::update_trip_status`].
    async fn update_trip(&self, trip: &Trip) -> Result<(), AppError>;

    /// Writes `status` only if the row still holds `expected`. Returns
    /// whether a row was written.
    async fn update_trip_status(
        &self,
        trip_id: &str,
        expected: TripStatus,
        status: TripStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    async fn list_trips_by_status(&self, statuses: &[TripStatus]) -> Result<Vec<Trip>, AppError>;

    async fn delete_trip(&self, trip_id: &str) -> Result<bool, AppError>;

    async fn itinerary_id_for_trip(&self, trip_id: &str) -> Result<Option<String>, AppError>;

    /// Join rows for the trip's itinerary, sorted by stop order, day date and
    /// activity start time.
    async fn itinerary_rows(&self, trip_id: &str) -> Result<Vec<ItineraryRow>, AppError>;

    /// Applies every mutation in one transaction, or none of them.
    async fn apply_mutations(&self, mutations: &[RowMutation]) -> Result<(), AppError>;

    /// Ids from `city_ids` that name no catalog city.
    async fn missing_cities(&self, city_ids: &[String]) -> Result<Vec<String>, AppError>;

    /// Ids from `activity_ids` that name no catalog activity.
    async fn missing_activities(&self, activity_ids: &[String]) -> Result<Vec<String>, AppError>;

    async fn insert_city(&self, city: &City) -> Result<(), AppError>;

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const TRIP_COLUMNS: &str =
    "id, owner_id, name, start_date, end_date, status, budget, notes, created_at, updated_at";

const ITINERARY_ROWS_SQL: &str = r#"
SELECT
    i.id AS itinerary_id,
    i.trip_id AS trip_id,
    s.id AS stop_id,
    s.stop_order AS stop_order,
    s.start_date AS stop_start,
    s.end_date AS stop_end,
    s.accommodation AS stop_accommodation,
    s.notes AS stop_notes,
    c.id AS city_id,
    c.name AS city_name,
    c.country AS city_country,
    d.id AS day_id,
    d.day_date AS day_date,
    d.notes AS day_notes,
    sa.id AS scheduled_id,
    sa.start_time AS scheduled_start,
    sa.end_time AS scheduled_end,
    sa.status AS scheduled_status,
    sa.estimated_cost AS scheduled_estimated_cost,
    sa.actual_cost AS scheduled_actual_cost,
    sa.category AS scheduled_category,
    sa.notes AS scheduled_notes,
    a.id AS activity_id,
    a.name AS activity_name,
    a.base_cost AS activity_base_cost,
    a.duration_minutes AS activity_duration_minutes
FROM itineraries i
LEFT JOIN itinerary_stops s ON s.itinerary_id = i.id
LEFT JOIN cities c ON c.id = s.city_id
LEFT JOIN itinerary_days d ON d.stop_id = s.id
LEFT JOIN scheduled_activities sa ON sa.day_id = d.id
LEFT JOIN activities a ON a.id = sa.activity_id
WHERE i.trip_id = ?
ORDER BY s.stop_order, s.id, d.day_date, d.id, sa.start_time IS NULL, sa.start_time, sa.rowid
"#;

fn conflict(err: sqlx::Error) -> AppError {
    warn!("itinerary transaction failed: {err:?}");
    AppError::Conflict(err.to_string())
}

fn expect_one_row(affected: u64, what: &str, id: &str) -> Result<(), AppError> {
    if affected == 1 {
        Ok(())
    } else {
        Err(AppError::Conflict(format!("{what} {id} was changed concurrently")))
    }
}

async fn write_stop(
    conn: &mut SqliteConnection,
    stop: &StopRecord,
    insert: bool,
) -> Result<(), AppError> {
    let sql = if insert {
        r#"INSERT INTO itinerary_stops
           (itinerary_id, city_id, stop_order, start_date, end_date, accommodation, notes, id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#
    } else {
        r#"UPDATE itinerary_stops
           SET itinerary_id = ?, city_id = ?, stop_order = ?, start_date = ?, end_date = ?,
               accommodation = ?, notes = ?
           WHERE id = ?"#
    };
    let result = sqlx::query(sql)
        .bind(&stop.itinerary_id)
        .bind(&stop.city_id)
        .bind(i64::from(stop.order))
        .bind(stop.start_date)
        .bind(stop.end_date)
        .bind(&stop.accommodation)
        .bind(&stop.notes)
        .bind(&stop.id)
        .execute(conn)
        .await
        .map_err(conflict)?;
    expect_one_row(result.rows_affected(), "stop", &stop.id)
}

async fn write_day(
    conn: &mut SqliteConnection,
    day: &DayRecord,
    insert: bool,
) -> Result<(), AppError> {
    let sql = if insert {
        "INSERT INTO itinerary_days (stop_id, day_date, notes, id) VALUES (?, ?, ?, ?)"
    } else {
        "UPDATE itinerary_days SET stop_id = ?, day_date = ?, notes = ? WHERE id = ?"
    };
    let result = sqlx::query(sql)
        .bind(&day.stop_id)
        .bind(day.date)
        .bind(&day.notes)
        .bind(&day.id)
        .execute(conn)
        .await
        .map_err(conflict)?;
    expect_one_row(result.rows_affected(), "day", &day.id)
}

async fn write_activity(
    conn: &mut SqliteConnection,
    item: &ScheduledActivityRecord,
    insert: bool,
) -> Result<(), AppError> {
    let sql = if insert {
        r#"INSERT INTO scheduled_activities
           (day_id, activity_id, start_time, end_time, status, estimated_cost, actual_cost,
            category, notes, id)
           VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#
    } else {
        r#"UPDATE scheduled_activities
           SET day_id = ?, activity_id = ?, start_time = ?, end_time = ?, status = ?,
               estimated_cost = ?, actual_cost = ?, category = ?, notes = ?
           WHERE id = ?"#
    };
    let result = sqlx::query(sql)
        .bind(&item.day_id)
        .bind(&item.activity_id)
        .bind(item.start_time)
        .bind(item.end_time)
        .bind(item.status)
        .bind(decimal_text(item.estimated_cost))
        .bind(decimal_text(item.actual_cost))
        .bind(item.category)
        .bind(&item.notes)
        .bind(&item.id)
        .execute(conn)
        .await
        .map_err(conflict)?;
    expect_one_row(result.rows_affected(), "scheduled activity", &item.id)
}

async fn missing_ids(pool: &DbPool, table: &str, ids: &[String]) -> Result<Vec<String>, AppError> {
    let wanted: BTreeSet<&str> = ids.iter().map(String::as_str).collect();
    if wanted.is_empty() {
        return Ok(Vec::new());
    }
    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new(format!("SELECT id FROM {table} WHERE id IN ("));
    let mut separated = builder.separated(", ");
    for id in &wanted {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
    let found: Vec<String> = builder.build_query_scalar().fetch_all(pool).await?;
    let found: BTreeSet<&str> = found.iter().map(String::as_str).collect();
    Ok(wanted
        .difference(&found)
        .map(|id| id.to_string())
        .collect())
}

async fn delete_row(conn: &mut SqliteConnection, table: &str, id: &str) -> Result<(), AppError> {
    // The row may already be gone through a cascade.
    sqlx::query(&format!("DELETE FROM {table} WHERE id = ?"))
        .bind(id)
        .execute(conn)
        .await
        .map_err(conflict)?;
    Ok(())
}

#[async_trait]
impl ItineraryStore for SqliteStore {
    async fn insert_trip(&self, trip: &Trip) -> Result<String, AppError> {
        let itinerary_id = Uuid::new_v4().to_string();
        let mut tx = self.pool.begin().await?;
        sqlx::query(
            r#"INSERT INTO trips
               (id, owner_id, name, start_date, end_date, status, budget, notes,
                created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&trip.id)
        .bind(&trip.owner_id)
        .bind(&trip.name)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(trip.status)
        .bind(decimal_text(trip.budget))
        .bind(&trip.notes)
        .bind(trip.created_at)
        .bind(trip.updated_at)
        .execute(&mut *tx)
        .await?;
        sqlx::query("INSERT INTO itineraries (id, trip_id) VALUES (?, ?)")
            .bind(&itinerary_id)
            .bind(&trip.id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(itinerary_id)
    }

    async fn fetch_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        let trip = sqlx::query_as::<_, Trip>(&format!(
            "SELECT {TRIP_COLUMNS} FROM trips WHERE id = ?"
        ))
        .bind(trip_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(trip)
    }

    async fn update_trip(&self, trip: &Trip) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"UPDATE trips
               SET name = ?, start_date = ?, end_date = ?, budget = ?, notes = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(&trip.name)
        .bind(trip.start_date)
        .bind(trip.end_date)
        .bind(decimal_text(trip.budget))
        .bind(&trip.notes)
        .bind(trip.updated_at)
        .bind(&trip.id)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(AppError::NotFound);
        }
        Ok(())
    }

    async fn update_trip_status(
        &self,
        trip_id: &str,
        expected: TripStatus,
        status: TripStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result =
            sqlx::query("UPDATE trips SET status = ?, updated_at = ? WHERE id = ? AND status = ?")
                .bind(status)
                .bind(updated_at)
                .bind(trip_id)
                .bind(expected)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn list_trips_by_status(&self, statuses: &[TripStatus]) -> Result<Vec<Trip>, AppError> {
        if statuses.is_empty() {
            return Ok(Vec::new());
        }
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {TRIP_COLUMNS} FROM trips WHERE status IN ("));
        let mut separated = builder.separated(", ");
        for status in statuses {
            separated.push_bind(*status);
        }
        separated.push_unseparated(") ORDER BY start_date, id");
        let trips = builder.build_query_as::<Trip>().fetch_all(&self.pool).await?;
        Ok(trips)
    }

    async fn delete_trip(&self, trip_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM trips WHERE id = ?")
            .bind(trip_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn itinerary_id_for_trip(&self, trip_id: &str) -> Result<Option<String>, AppError> {
        let id: Option<String> = sqlx::query_scalar("SELECT id FROM itineraries WHERE trip_id = ?")
            .bind(trip_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(id)
    }

    async fn itinerary_rows(&self, trip_id: &str) -> Result<Vec<ItineraryRow>, AppError> {
        let rows = sqlx::query_as::<_, ItineraryRow>(ITINERARY_ROWS_SQL)
            .bind(trip_id)
            .fetch_all(&self.pool)
            .await?;
        debug!(trip_id, rows = rows.len(), "fetched itinerary rows");
        Ok(rows)
    }

    async fn apply_mutations(&self, mutations: &[RowMutation]) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await.map_err(conflict)?;
        for mutation in mutations {
            match mutation {
                RowMutation::InsertStop(stop) => write_stop(&mut tx, stop, true).await?,
                RowMutation::UpdateStop(stop) => write_stop(&mut tx, stop, false).await?,
                RowMutation::DeleteStop(id) => delete_row(&mut tx, "itinerary_stops", id).await?,
                RowMutation::InsertDay(day) => write_day(&mut tx, day, true).await?,
                RowMutation::UpdateDay(day) => write_day(&mut tx, day, false).await?,
                RowMutation::DeleteDay(id) => delete_row(&mut tx, "itinerary_days", id).await?,
                RowMutation::InsertActivity(item) => write_activity(&mut tx, item, true).await?,
                RowMutation::UpdateActivity(item) => write_activity(&mut tx, item, false).await?,
                RowMutation::DeleteActivity(id) => {
                    delete_row(&mut tx, "scheduled_activities", id).await?
                }
            }
        }
        tx.commit().await.map_err(conflict)?;
        Ok(())
    }

    async fn missing_cities(&self, city_ids: &[String]) -> Result<Vec<String>, AppError> {
        missing_ids(&self.pool, "cities", city_ids).await
    }

    async fn missing_activities(&self, activity_ids: &[String]) -> Result<Vec<String>, AppError> {
        missing_ids(&self.pool, "activities", activity_ids).await
    }

    async fn insert_city(&self, city: &City) -> Result<(), AppError> {
        sqlx::query("INSERT INTO cities (id, name, country) VALUES (?, ?, ?)")
            .bind(&city.id)
            .bind(&city.name)
            .bind(&city.country)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO activities (id, city_id, name, base_cost, duration_minutes)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(&activity.id)
        .bind(&activity.city_id)
        .bind(&activity.name)
        .bind(decimal_text(activity.base_cost))
        .bind(activity.duration_minutes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
