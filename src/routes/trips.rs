use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use crate::{
    error::AppError,
    models::{
        itinerary::{Itinerary, StopDraft},
        trip::{NewTrip, Trip, TripUpdate},
    },
    services::itinerary::TripCosts,
    state::AppState,
};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_trip))
        .route("/status/sweep", post(sweep_statuses))
        .route("/:id", get(get_trip).put(update_trip).delete(delete_trip))
        .route("/:id/finalize", post(finalize_trip))
        .route("/:id/status", post(recompute_status))
        .route("/:id/itinerary", get(get_itinerary).put(replace_stops))
        .route("/:id/costs", get(trip_costs))
}

async fn create_trip(
    State(state): State<AppState>,
    Json(new): Json<NewTrip>,
) -> Result<impl IntoResponse, AppError> {
    let trip = state.trips.create_trip(new).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

async fn get_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.get_trip(&id).await?))
}

async fn update_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(update): Json<TripUpdate>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.update_trip(&id, update).await?))
}

async fn delete_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<StatusCode, AppError> {
    state.trips.delete_trip(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn finalize_trip(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.finalize_plan(&id).await?))
}

async fn recompute_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Trip>, AppError> {
    Ok(Json(state.trips.recompute_status(&id).await?))
}

async fn sweep_statuses(State(state): State<AppState>) -> Result<Json<Vec<Trip>>, AppError> {
    Ok(Json(state.trips.sweep_statuses().await?))
}

async fn get_itinerary(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Itinerary>, AppError> {
    Ok(Json(state.itineraries.find_by_trip(&id).await?))
}

async fn replace_stops(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(stops): Json<Vec<StopDraft>>,
) -> Result<Json<Itinerary>, AppError> {
    Ok(Json(state.itineraries.replace_stops(&id, stops).await?))
}

async fn trip_costs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<TripCosts>, AppError> {
    Ok(Json(state.itineraries.costs(&id).await?))
}
