use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    clock::Clock,
    error::AppError,
    models::trip::{NewTrip, Trip, TripStatus, TripUpdate},
    services::{
        builder::build_tree,
        status::{initial_status, leave_planning, recompute},
        storage::ItineraryStore,
        validator::{validate_trip_bounds_change, validate_trip_dates},
    },
};

#[derive(Clone)]
pub struct TripService {
    store: Arc<dyn ItineraryStore>,
    clock: Arc<dyn Clock>,
}

impl TripService {
    pub fn new(store: Arc<dyn ItineraryStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    pub async fn create_trip(&self, new: NewTrip) -> Result<Trip, AppError> {
        if new.name.trim().is_empty() {
            return Err(AppError::BadRequest("trip name must not be empty".into()));
        }
        validate_trip_dates(new.start_date, new.end_date).into_result()?;

        let now = self.clock.now();
        let trip = Trip {
            id: Uuid::new_v4().to_string(),
            owner_id: new.owner_id,
            name: new.name.trim().to_string(),
            start_date: new.start_date,
            end_date: new.end_date,
            status: initial_status(new.start_date, new.end_date, new.planning, now.date_naive()),
            budget: new.budget,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_trip(&trip).await?;
        info!(trip_id = %trip.id, status = %trip.status, "created trip");
        Ok(trip)
    }

    /// Loads a trip with its status brought up to date.
    pub async fn get_trip(&self, trip_id: &str) -> Result<Trip, AppError> {
        self.recompute_status(trip_id).await
    }

    /// Applies an owner edit. Moving the dates re-checks every planned stop
    /// against the new bounds. The status is brought up to date afterwards
    /// from whatever is stored then.
    pub async fn update_trip(&self, trip_id: &str, update: TripUpdate) -> Result<Trip, AppError> {
        let mut trip = self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)?;
        let start = update.start_date.unwrap_or(trip.start_date);
        let end = update.end_date.unwrap_or(trip.end_date);

        if (start, end) != (trip.start_date, trip.end_date) {
            let rows = self.store.itinerary_rows(trip_id).await?;
            let itinerary = build_tree(rows, trip_id)?;
            validate_trip_bounds_change(start, end, &itinerary.to_drafts()).into_result()?;
        }

        if let Some(name) = update.name {
            if name.trim().is_empty() {
                return Err(AppError::BadRequest("trip name must not be empty".into()));
            }
            trip.name = name.trim().to_string();
        }
        trip.start_date = start;
        trip.end_date = end;
        if let Some(budget) = update.budget {
            trip.budget = budget;
        }
        if let Some(notes) = update.notes {
            trip.notes = notes;
        }
        trip.updated_at = self.clock.now();

        self.store.update_trip(&trip).await?;
        debug!(trip_id, "updated trip");
        self.recompute_status(trip_id).await
    }

    /// Explicitly moves a trip out of `planning`.
    pub async fn finalize_plan(&self, trip_id: &str) -> Result<Trip, AppError> {
        let trip = self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)?;
        let next = leave_planning(&trip, self.clock.now())?;
        let written = self
            .store
            .update_trip_status(trip_id, trip.status, next.status, next.updated_at)
            .await?;
        if !written {
            return Err(AppError::Conflict(format!(
                "trip {trip_id} left planning concurrently"
            )));
        }
        info!(trip_id, status = %next.status, "trip left planning");
        Ok(next)
    }

    /// Recomputes and persists a trip's status. Writes only on change.
    pub async fn recompute_status(&self, trip_id: &str) -> Result<Trip, AppError> {
        let trip = self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)?;
        let outcome = recompute(&trip, self.clock.now());
        if !outcome.changed {
            return Ok(outcome.trip);
        }

        let written = self
            .store
            .update_trip_status(
                trip_id,
                trip.status,
                outcome.trip.status,
                outcome.trip.updated_at,
            )
            .await?;
        if written {
            info!(trip_id, from = %trip.status, to = %outcome.trip.status, "trip status changed");
            Ok(outcome.trip)
        } else {
            // Someone else moved the row first; report what is stored now.
            debug!(trip_id, "status already updated by another caller");
            self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)
        }
    }

    /// Recomputes every trip that can still change status. Returns the
    /// trips that moved.
    pub async fn sweep_statuses(&self) -> Result<Vec<Trip>, AppError> {
        let candidates = self
            .store
            .list_trips_by_status(&[TripStatus::Upcoming, TripStatus::Active])
            .await?;
        let now = self.clock.now();
        let mut moved = Vec::new();
        for trip in candidates {
            let outcome = recompute(&trip, now);
            if !outcome.changed {
                continue;
            }
            match self
                .store
                .update_trip_status(&trip.id, trip.status, outcome.trip.status, now)
                .await
            {
                Ok(true) => moved.push(outcome.trip),
                Ok(false) => debug!(trip_id = %trip.id, "skipped, status moved concurrently"),
                Err(err) => warn!(trip_id = %trip.id, "status sweep write failed: {err}"),
            }
        }
        info!(moved = moved.len(), "status sweep finished");
        Ok(moved)
    }

    pub async fn delete_trip(&self, trip_id: &str) -> Result<(), AppError> {
        if self.store.delete_trip(trip_id).await? {
            info!(trip_id, "deleted trip");
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}
