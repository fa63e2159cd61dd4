use std::sync::Arc;

use crate::{
    clock::Clock,
    db::DbPool,
    services::{
        itinerary::ItineraryService,
        storage::{ItineraryStore, SqliteStore},
        trips::TripService,
    },
};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ItineraryStore>,
    pub trips: TripService,
    pub itineraries: ItineraryService,
}

impl AppState {
    pub fn new(db: DbPool, clock: Arc<dyn Clock>) -> Self {
        let store: Arc<dyn ItineraryStore> = Arc::new(SqliteStore::new(db));
        Self {
            trips: TripService::new(store.clone(), clock),
            itineraries: ItineraryService::new(store.clone()),
            store,
        }
    }
}
