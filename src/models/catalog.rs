use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct City {
    pub id: String,
    pub name: String,
    pub country: Option<String>,
}

impl City {
    pub fn new(name: impl Into<String>, country: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            country,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    pub id: String,
    pub city_id: String,
    pub name: String,
    pub base_cost: Option<Decimal>,
    pub duration_minutes: Option<i64>,
}

impl Activity {
    pub fn new(city_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            city_id: city_id.into(),
            name: name.into(),
            base_cost: None,
            duration_minutes: None,
        }
    }
}
