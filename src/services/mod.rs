pub mod builder;
pub mod costs;
pub mod itinerary;
pub mod status;
pub mod storage;
pub mod trips;
pub mod validator;
