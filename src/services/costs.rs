//! Cost roll-ups over an itinerary and the budget comparison.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Serialize;

use crate::models::itinerary::{CostCategory, Day, Itinerary, ScheduledActivity};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CostBreakdown {
    pub accommodation: Decimal,
    pub food: Decimal,
    pub transport: Decimal,
    pub activities: Decimal,
    pub other: Decimal,
}

impl CostBreakdown {
    fn add(&mut self, category: Option<CostCategory>, amount: Decimal) {
        let bucket = match category {
            Some(CostCategory::Accommodation) => &mut self.accommodation,
            Some(CostCategory::Food) => &mut self.food,
            Some(CostCategory::Transport) => &mut self.transport,
            Some(CostCategory::Other) => &mut self.other,
            Some(CostCategory::Activities) | None => &mut self.activities,
        };
        *bucket += amount;
    }

    pub fn total(&self) -> Decimal {
        self.accommodation + self.food + self.transport + self.activities + self.other
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCost {
    pub day_id: String,
    pub date: NaiveDate,
    pub total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StopCost {
    pub stop_id: String,
    pub order: u32,
    pub total: Decimal,
    pub days: Vec<DayCost>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CostSummary {
    pub total: Decimal,
    pub stops: Vec<StopCost>,
    pub breakdown: CostBreakdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BudgetComparison {
    NoBudget,
    OverBudget { by: Decimal },
    Remaining { amount: Decimal },
}

/// Actual cost, else the estimate, else the catalog base cost, else zero.
pub fn effective_cost(item: &ScheduledActivity) -> Decimal {
    item.actual_cost
        .or(item.estimated_cost)
        .or(item.activity.base_cost)
        .unwrap_or(Decimal::ZERO)
}

pub fn day_total(day: &Day) -> Decimal {
    day.activities.iter().map(effective_cost).sum()
}

pub fn aggregate(itinerary: &Itinerary) -> CostSummary {
    let mut breakdown = CostBreakdown::default();
    let mut stops = Vec::with_capacity(itinerary.stops.len());

    for stop in &itinerary.stops {
        let mut days = Vec::with_capacity(stop.days.len());
        for day in &stop.days {
            for item in &day.activities {
                breakdown.add(item.category, effective_cost(item));
            }
            days.push(DayCost {
                day_id: day.id.clone(),
                date: day.date,
                total: day_total(day),
            });
        }
        stops.push(StopCost {
            stop_id: stop.id.clone(),
            order: stop.order,
            total: days.iter().map(|day| day.total).sum(),
            days,
        });
    }

    CostSummary {
        total: stops.iter().map(|stop| stop.total).sum(),
        stops,
        breakdown,
    }
}

pub fn compare_to_budget(total: Decimal, budget: Option<Decimal>) -> BudgetComparison {
    match budget {
        None => BudgetComparison::NoBudget,
        Some(budget) if total > budget => BudgetComparison::OverBudget { by: total - budget },
        Some(budget) => BudgetComparison::Remaining {
            amount: budget - total,
        },
    }
}
