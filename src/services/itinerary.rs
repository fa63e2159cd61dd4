use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};

use crate::{
    error::AppError,
    models::itinerary::{assign_missing_orders, Itinerary, StopDraft},
    services::{
        builder::{build_tree, plan_replace},
        costs::{aggregate, compare_to_budget, BudgetComparison, CostSummary},
        storage::ItineraryStore,
        validator::validate_stops,
    },
};

#[derive(Debug, Clone, Serialize)]
pub struct TripCosts {
    pub summary: CostSummary,
    pub budget: Option<Decimal>,
    pub comparison: BudgetComparison,
}

#[derive(Clone)]
pub struct ItineraryService {
    store: Arc<dyn ItineraryStore>,
}

impl ItineraryService {
    pub fn new(store: Arc<dyn ItineraryStore>) -> Self {
        Self { store }
    }

    pub async fn find_by_trip(&self, trip_id: &str) -> Result<Itinerary, AppError> {
        let rows = self.store.itinerary_rows(trip_id).await?;
        build_tree(rows, trip_id)
    }

    /// Replaces the whole stop list of a trip.
    ///
    /// Nothing is written unless the full submitted list passes validation;
    /// the returned tree is read back after the write.
    pub async fn replace_stops(
        &self,
        trip_id: &str,
        mut stops: Vec<StopDraft>,
    ) -> Result<Itinerary, AppError> {
        let trip = self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)?;

        assign_missing_orders(&mut stops)?;
        validate_stops(trip.start_date, trip.end_date, &stops).into_result()?;

        let current = self.find_by_trip(trip_id).await?;
        let mutations = plan_replace(&current, &stops)?;
        if mutations.is_empty() {
            debug!(trip_id, "stop list unchanged");
            return Ok(current);
        }
        self.check_references(&stops).await?;

        self.store.apply_mutations(&mutations).await?;
        info!(
            trip_id,
            stops = stops.len(),
            mutations = mutations.len(),
            "replaced itinerary stops"
        );
        self.find_by_trip(trip_id).await
    }

    /// Rejects drafts that point at cities or activities missing from the catalog.
    async fn check_references(&self, stops: &[StopDraft]) -> Result<(), AppError> {
        let city_ids: Vec<String> = stops.iter().map(|stop| stop.city_id.clone()).collect();
        let activity_ids: Vec<String> = stops
            .iter()
            .flat_map(|stop| &stop.days)
            .flat_map(|day| &day.activities)
            .map(|item| item.activity_id.clone())
            .collect();

        let cities = self.store.missing_cities(&city_ids).await?;
        if !cities.is_empty() {
            return Err(AppError::precondition(format!(
                "unknown city {}",
                cities.join(", ")
            )));
        }
        let activities = self.store.missing_activities(&activity_ids).await?;
        if !activities.is_empty() {
            return Err(AppError::precondition(format!(
                "unknown activity {}",
                activities.join(", ")
            )));
        }
        Ok(())
    }

    pub async fn costs(&self, trip_id: &str) -> Result<TripCosts, AppError> {
        let trip = self.store.fetch_trip(trip_id).await?.ok_or(AppError::NotFound)?;
        let itinerary = self.find_by_trip(trip_id).await?;
        let summary = aggregate(&itinerary);
        Ok(TripCosts {
            comparison: compare_to_budget(summary.total, trip.budget),
            budget: trip.budget,
            summary,
        })
    }
}
