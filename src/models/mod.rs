pub mod catalog;
pub mod itinerary;
pub mod trip;
