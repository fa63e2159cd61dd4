use std::{collections::HashMap, fmt, sync::Arc};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use cucumber::{given, then, when, World as _};
use rust_decimal::Decimal;
use tempfile::TempDir;
use wayfarer::{
    clock::{Clock, FixedClock},
    db::{init_pool, run_migrations, DbPool},
    error::AppError,
    models::{
        catalog::{Activity, City},
        itinerary::{
            assign_missing_orders, insert_stop, remove_stop, DayDraft, Itinerary,
            ScheduledActivityDraft, StopDraft,
        },
        trip::{NewTrip, Trip, TripStatus, TripUpdate},
    },
    services::{
        builder::{ItineraryRow, RowMutation},
        costs::BudgetComparison,
        itinerary::{ItineraryService, TripCosts},
        storage::ItineraryStore,
        trips::TripService,
        validator::{validate_stops, ValidationResult},
    },
    state::AppState,
};

#[derive(Debug, cucumber::World, Default)]
struct ItineraryWorld {
    state: Option<TestState>,
    today: Option<NaiveDate>,
    trip: Option<Trip>,
    trip_ids: Vec<String>,
    cities: HashMap<String, String>,
    drafts: Vec<StopDraft>,
    validation: Option<ValidationResult>,
    itinerary: Option<Itinerary>,
    costs: Option<TripCosts>,
    swept: Option<Vec<Trip>>,
    last_error: Option<AppError>,
}

impl ItineraryWorld {
    fn test_state(&self) -> &TestState {
        self.state.as_ref().expect("state must be initialised first")
    }

    fn app_state(&self) -> &AppState {
        &self.test_state().app
    }

    fn db(&self) -> &DbPool {
        &self.test_state().db
    }

    fn store(&self) -> Arc<dyn ItineraryStore> {
        self.app_state().store.clone()
    }

    fn today(&self) -> NaiveDate {
        self.today.expect("the clock must be pinned first")
    }

    fn clock(&self) -> Arc<dyn Clock> {
        Arc::new(FixedClock::on(self.today()))
    }

    fn trips(&self) -> TripService {
        TripService::new(self.store(), self.clock())
    }

    fn itineraries(&self) -> ItineraryService {
        ItineraryService::new(self.store())
    }

    fn trip(&self) -> &Trip {
        self.trip.as_ref().expect("a trip must exist first")
    }

    fn city_id(&self, name: &str) -> &str {
        self.cities
            .get(name)
            .unwrap_or_else(|| panic!("unknown city {name}"))
    }

    fn draft_mut(&mut self, city: &str) -> &mut StopDraft {
        let city_id = self.city_id(city).to_string();
        self.drafts
            .iter_mut()
            .find(|stop| stop.city_id == city_id)
            .unwrap_or_else(|| panic!("no stop in {city}"))
    }

    fn stored_city_names(&self) -> Vec<String> {
        self.itinerary
            .as_ref()
            .expect("itinerary must be loaded first")
            .stops
            .iter()
            .map(|stop| stop.city.name.clone())
            .collect()
    }

    async fn stored_trip(&self, trip_id: &str) -> Trip {
        self.store()
            .fetch_trip(trip_id)
            .await
            .expect("fetch trip")
            .expect("trip exists")
    }
}

struct TestState {
    app: AppState,
    db: DbPool,
    _root: TempDir,
}

impl fmt::Debug for TestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestState").finish()
    }
}

impl TestState {
    async fn new() -> anyhow::Result<Self> {
        let root = TempDir::new().context("create temp dir for bdd world")?;
        let db_path = root.path().join("bdd.sqlite");
        let database_url = format!("sqlite://{}", db_path.to_string_lossy());

        let db = init_pool(&database_url, 4).await?;
        run_migrations(&db).await?;

        let clock = Arc::new(FixedClock::on(NaiveDate::from_ymd_opt(2026, 1, 1).unwrap()));
        let app = AppState::new(db.clone(), clock);
        Ok(Self {
            app,
            db,
            _root: root,
        })
    }
}

/// Store whose trip edits land only after a rival caller has finalized the
/// same trip.
struct FinalizeBeforeEdit {
    inner: Arc<dyn ItineraryStore>,
    rival: TripService,
}

#[async_trait]
impl ItineraryStore for FinalizeBeforeEdit {
    async fn insert_trip(&self, trip: &Trip) -> Result<String, AppError> {
        self.inner.insert_trip(trip).await
    }

    async fn fetch_trip(&self, trip_id: &str) -> Result<Option<Trip>, AppError> {
        self.inner.fetch_trip(trip_id).await
    }

    async fn update_trip(&self, trip: &Trip) -> Result<(), AppError> {
        self.rival.finalize_plan(&trip.id).await?;
        self.inner.update_trip(trip).await
    }

    async fn update_trip_status(
        &self,
        trip_id: &str,
        expected: TripStatus,
        status: TripStatus,
        updated_at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.inner
            .update_trip_status(trip_id, expected, status, updated_at)
            .await
    }

    async fn list_trips_by_status(&self, statuses: &[TripStatus]) -> Result<Vec<Trip>, AppError> {
        self.inner.list_trips_by_status(statuses).await
    }

    async fn delete_trip(&self, trip_id: &str) -> Result<bool, AppError> {
        self.inner.delete_trip(trip_id).await
    }

    async fn itinerary_id_for_trip(&self, trip_id: &str) -> Result<Option<String>, AppError> {
        self.inner.itinerary_id_for_trip(trip_id).await
    }

    async fn itinerary_rows(&self, trip_id: &str) -> Result<Vec<ItineraryRow>, AppError> {
        self.inner.itinerary_rows(trip_id).await
    }

    async fn apply_mutations(&self, mutations: &[RowMutation]) -> Result<(), AppError> {
        self.inner.apply_mutations(mutations).await
    }

    async fn missing_cities(&self, city_ids: &[String]) -> Result<Vec<String>, AppError> {
        self.inner.missing_cities(city_ids).await
    }

    async fn missing_activities(&self, activity_ids: &[String]) -> Result<Vec<String>, AppError> {
        self.inner.missing_activities(activity_ids).await
    }

    async fn insert_city(&self, city: &City) -> Result<(), AppError> {
        self.inner.insert_city(city).await
    }

    async fn insert_activity(&self, activity: &Activity) -> Result<(), AppError> {
        self.inner.insert_activity(activity).await
    }
}

fn date(raw: &str) -> NaiveDate {
    raw.parse().unwrap_or_else(|_| panic!("invalid date {raw}"))
}

fn amount(raw: &str) -> Decimal {
    raw.parse().unwrap_or_else(|_| panic!("invalid amount {raw}"))
}

async fn ensure_city(world: &mut ItineraryWorld, name: &str) -> String {
    if let Some(id) = world.cities.get(name) {
        return id.clone();
    }
    let city = City::new(name, None);
    world.store().insert_city(&city).await.expect("insert city");
    world.cities.insert(name.to_string(), city.id.clone());
    city.id
}

async fn create_trip(
    world: &mut ItineraryWorld,
    start: &str,
    end: &str,
    planning: bool,
    budget: Option<Decimal>,
) {
    let trip = world
        .trips()
        .create_trip(NewTrip {
            owner_id: "owner-1".into(),
            name: "Iberian loop".into(),
            start_date: date(start),
            end_date: date(end),
            budget,
            notes: None,
            planning,
        })
        .await
        .expect("create trip");
    world.trip_ids.push(trip.id.clone());
    world.trip = Some(trip);
}

async fn add_stop(world: &mut ItineraryWorld, city: String, start: String, end: String) {
    let city_id = ensure_city(world, &city).await;
    let position = world.drafts.len();
    insert_stop(
        &mut world.drafts,
        position,
        StopDraft::new(city_id, date(&start), date(&end)),
    );
}

async fn add_activity(
    world: &mut ItineraryWorld,
    day: String,
    city: String,
    name: String,
    kind: String,
    cost: String,
) {
    let cost = amount(&cost);
    let city_id = world.city_id(&city).to_string();
    let mut activity = Activity::new(city_id, name);
    if kind == "base" {
        activity.base_cost = Some(cost);
    }
    world
        .store()
        .insert_activity(&activity)
        .await
        .expect("insert activity");

    let mut item = ScheduledActivityDraft::new(activity.id.clone());
    match kind.as_str() {
        "actual" => item.actual_cost = Some(cost),
        "estimated" => item.estimated_cost = Some(cost),
        _ => {}
    }

    let day = date(&day);
    let stop = world.draft_mut(&city);
    match stop.days.iter_mut().find(|existing| existing.date == day) {
        Some(existing) => existing.activities.push(item),
        None => {
            let mut new_day = DayDraft::new(day);
            new_day.activities.push(item);
            stop.days.push(new_day);
        }
    }
}

async fn save_stops(world: &mut ItineraryWorld) {
    let trip_id = world.trip().id.clone();
    match world
        .itineraries()
        .replace_stops(&trip_id, world.drafts.clone())
        .await
    {
        Ok(itinerary) => {
            world.drafts = itinerary.to_drafts();
            world.itinerary = Some(itinerary);
            world.last_error = None;
        }
        Err(err) => world.last_error = Some(err),
    }
}

async fn set_today(world: &mut ItineraryWorld, raw: String) {
    world.today = Some(date(&raw));
    if world.state.is_none() {
        world.state = Some(TestState::new().await.expect("state"));
    }
}

async fn edit_trip(world: &mut ItineraryWorld, update: TripUpdate) {
    let trip_id = world.trip().id.clone();
    match world.trips().update_trip(&trip_id, update).await {
        Ok(trip) => {
            world.trip = Some(trip);
            world.last_error = None;
        }
        Err(err) => world.last_error = Some(err),
    }
}

#[given("a fresh application state")]
async fn given_fresh_state(world: &mut ItineraryWorld) {
    world.state = Some(TestState::new().await.expect("state"));
}

#[given(regex = r#"^today is "([^"]+)"$"#)]
async fn given_today(world: &mut ItineraryWorld, raw: String) {
    set_today(world, raw).await;
}

#[when(regex = r#"^today is "([^"]+)"$"#)]
async fn when_today(world: &mut ItineraryWorld, raw: String) {
    set_today(world, raw).await;
}

#[given(regex = r#"^a trip from "([^"]+)" to "([^"]+)"$"#)]
async fn given_planning_trip(world: &mut ItineraryWorld, start: String, end: String) {
    create_trip(world, &start, &end, true, None).await;
}

#[given(regex = r#"^a confirmed trip from "([^"]+)" to "([^"]+)"$"#)]
async fn given_confirmed_trip(world: &mut ItineraryWorld, start: String, end: String) {
    create_trip(world, &start, &end, false, None).await;
}

#[given(regex = r#"^a trip from "([^"]+)" to "([^"]+)" with budget (\d+(?:\.\d+)?)$"#)]
async fn given_trip_with_budget(
    world: &mut ItineraryWorld,
    start: String,
    end: String,
    budget: String,
) {
    create_trip(world, &start, &end, true, Some(amount(&budget))).await;
}

#[given(regex = r#"^a stop "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn given_stop(world: &mut ItineraryWorld, city: String, start: String, end: String) {
    add_stop(world, city, start, end).await;
}

#[when(regex = r#"^I add a stop "([^"]+)" from "([^"]+)" to "([^"]+)"$"#)]
async fn when_add_stop(world: &mut ItineraryWorld, city: String, start: String, end: String) {
    add_stop(world, city, start, end).await;
}

#[when(regex = r#"^I add a stop in an unlisted city from "([^"]+)" to "([^"]+)"$"#)]
async fn when_add_unlisted_stop(world: &mut ItineraryWorld, start: String, end: String) {
    let position = world.drafts.len();
    insert_stop(
        &mut world.drafts,
        position,
        StopDraft::new("unlisted-city", date(&start), date(&end)),
    );
}

#[when(regex = r#"^stop "([^"]+)" starts on "([^"]+)"$"#)]
async fn when_stop_starts(world: &mut ItineraryWorld, city: String, start: String) {
    world.draft_mut(&city).start_date = date(&start);
}

#[when(regex = r#"^I remove stop "([^"]+)"$"#)]
async fn when_remove_stop(world: &mut ItineraryWorld, city: String) {
    let order = world.draft_mut(&city).order.expect("saved stops carry an order");
    remove_stop(&mut world.drafts, order).expect("stop to remove");
}

#[given(
    regex = r#"^on "([^"]+)" in "([^"]+)" an activity "([^"]+)" with (actual|estimated|base) cost (\d+(?:\.\d+)?)$"#
)]
async fn given_activity(
    world: &mut ItineraryWorld,
    day: String,
    city: String,
    name: String,
    kind: String,
    cost: String,
) {
    add_activity(world, day, city, name, kind, cost).await;
}

#[when(
    regex = r#"^on "([^"]+)" in "([^"]+)" an activity "([^"]+)" with (actual|estimated|base) cost (\d+(?:\.\d+)?)$"#
)]
async fn when_activity(
    world: &mut ItineraryWorld,
    day: String,
    city: String,
    name: String,
    kind: String,
    cost: String,
) {
    add_activity(world, day, city, name, kind, cost).await;
}

#[when("scheduled activities can no longer be stored")]
async fn when_scheduled_activities_rejected(world: &mut ItineraryWorld) {
    sqlx::query(
        r#"CREATE TRIGGER reject_scheduled_activities
           BEFORE INSERT ON scheduled_activities
           BEGIN SELECT RAISE(ABORT, 'scheduled activities are frozen'); END"#,
    )
    .execute(world.db())
    .await
    .expect("create trigger");
}

#[when("I validate the stops")]
async fn when_validate(world: &mut ItineraryWorld) {
    let trip = world.trip().clone();
    let mut stops = world.drafts.clone();
    assign_missing_orders(&mut stops).expect("orders");
    world.validation = Some(validate_stops(trip.start_date, trip.end_date, &stops));
}

#[when("I save the stops")]
async fn when_save(world: &mut ItineraryWorld) {
    save_stops(world).await;
}

#[when("the trip status is recomputed")]
async fn when_recompute(world: &mut ItineraryWorld) {
    let trip_id = world.trip().id.clone();
    let trip = world
        .trips()
        .recompute_status(&trip_id)
        .await
        .expect("recompute status");
    world.trip = Some(trip);
}

#[when("the status sweep runs")]
async fn when_sweep(world: &mut ItineraryWorld) {
    let moved = world.trips().sweep_statuses().await.expect("sweep statuses");
    world.swept = Some(moved);
}

#[when("the owner finalizes the plan")]
async fn when_finalize(world: &mut ItineraryWorld) {
    let trip_id = world.trip().id.clone();
    let trip = world.trips().finalize_plan(&trip_id).await.expect("finalize");
    world.trip = Some(trip);
}

#[when(regex = r#"^the owner edits the notes to "([^"]+)" while the plan is being finalized$"#)]
async fn when_edit_races_finalize(world: &mut ItineraryWorld, notes: String) {
    let trip_id = world.trip().id.clone();
    let racing = FinalizeBeforeEdit {
        inner: world.store(),
        rival: world.trips(),
    };
    let trips = TripService::new(Arc::new(racing), world.clock());
    let update = TripUpdate {
        notes: Some(Some(notes)),
        ..TripUpdate::default()
    };
    let trip = trips.update_trip(&trip_id, update).await.expect("edit trip");
    world.trip = Some(trip);
}

#[when(regex = r"^the budget is changed to (\d+(?:\.\d+)?)$")]
async fn when_budget_changed(world: &mut ItineraryWorld, budget: String) {
    let update = TripUpdate {
        budget: Some(Some(amount(&budget))),
        ..TripUpdate::default()
    };
    edit_trip(world, update).await;
    assert!(world.last_error.is_none(), "budget change failed: {:?}", world.last_error);
}

#[when("the budget is cleared")]
async fn when_budget_cleared(world: &mut ItineraryWorld) {
    let update = TripUpdate {
        budget: Some(None),
        ..TripUpdate::default()
    };
    edit_trip(world, update).await;
    assert!(world.last_error.is_none(), "clearing failed: {:?}", world.last_error);
}

#[when(regex = r#"^the trip is moved to "([^"]+)" until "([^"]+)"$"#)]
async fn when_trip_moved(world: &mut ItineraryWorld, start: String, end: String) {
    let update = TripUpdate {
        start_date: Some(date(&start)),
        end_date: Some(date(&end)),
        ..TripUpdate::default()
    };
    edit_trip(world, update).await;
}

#[then("validation passes")]
async fn then_validation_passes(world: &mut ItineraryWorld) {
    let result = world.validation.as_ref().expect("validation must run first");
    assert!(result.is_valid(), "unexpected violations: {result:?}");
}

#[then(regex = r#"^validation fails with "([^"]+)"$"#)]
async fn then_validation_fails(world: &mut ItineraryWorld, reason: String) {
    let result = world.validation.as_ref().expect("validation must run first");
    assert!(
        result.violations().iter().any(|v| v.reason.contains(&reason)),
        "expected `{reason}` in {result:?}"
    );
}

#[then(regex = r#"^saving fails with "([^"]+)"$"#)]
async fn then_saving_fails(world: &mut ItineraryWorld, reason: String) {
    let err = world.last_error.as_ref().expect("an error was expected");
    let violations = err.violations().expect("a validation failure");
    assert!(
        violations.iter().any(|v| v.reason.contains(&reason)),
        "expected `{reason}` in {violations:?}"
    );
}

#[then("saving fails with a conflict")]
async fn then_saving_conflicts(world: &mut ItineraryWorld) {
    let err = world.last_error.as_ref().expect("an error was expected");
    assert!(matches!(err, AppError::Conflict(_)), "expected a conflict, got {err:?}");
}

#[then(regex = r#"^saving is rejected for an unknown (city|activity)$"#)]
async fn then_saving_rejects_reference(world: &mut ItineraryWorld, kind: String) {
    let err = world.last_error.as_ref().expect("an error was expected");
    let expected = format!("unknown {kind}");
    assert!(
        matches!(err, AppError::PreconditionViolated(message) if message.contains(&expected)),
        "expected `{expected}`, got {err:?}"
    );
}

#[then(regex = r#"^the trip status is "([^"]+)"$"#)]
async fn then_trip_status(world: &mut ItineraryWorld, expected: String) {
    assert_eq!(world.trip().status.as_str(), expected);
    let stored = world.stored_trip(&world.trip().id).await;
    assert_eq!(stored.status.as_str(), expected);
}

#[then(regex = r#"^the trip notes read "([^"]+)"$"#)]
async fn then_trip_notes(world: &mut ItineraryWorld, notes: String) {
    let stored = world.stored_trip(&world.trip().id).await;
    assert_eq!(stored.notes.as_deref(), Some(notes.as_str()));
}

#[then("recomputing again changes nothing")]
async fn then_recompute_idempotent(world: &mut ItineraryWorld) {
    let trip_id = world.trip().id.clone();
    let before = world.stored_trip(&trip_id).await;

    let later = FixedClock(FixedClock::on(world.today()).now() + Duration::hours(6));
    let again = TripService::new(world.store(), Arc::new(later))
        .recompute_status(&trip_id)
        .await
        .expect("recompute status");
    let after = world.stored_trip(&trip_id).await;

    assert_eq!(again, before);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after, before);
}

#[then(regex = r"^the sweep moved (\d+) trips?$")]
async fn then_sweep_moved(world: &mut ItineraryWorld, count: usize) {
    let moved = world.swept.as_ref().expect("a sweep must run first");
    assert_eq!(moved.len(), count, "moved {moved:?}");
}

#[then(regex = r#"^the stored trip statuses are "([^"]+)"$"#)]
async fn then_stored_statuses(world: &mut ItineraryWorld, expected: String) {
    let mut statuses = Vec::new();
    for trip_id in &world.trip_ids {
        statuses.push(world.stored_trip(trip_id).await.status.as_str().to_string());
    }
    let expected: Vec<String> = expected.split(',').map(|s| s.trim().to_string()).collect();
    assert_eq!(statuses, expected);
}

#[then(regex = r#"^the stored itinerary has stops "([^"]*)"$"#)]
async fn then_stored_stops(world: &mut ItineraryWorld, names: String) {
    let trip_id = world.trip().id.clone();
    let itinerary = world
        .itineraries()
        .find_by_trip(&trip_id)
        .await
        .expect("load itinerary");
    world.itinerary = Some(itinerary);

    let expected: Vec<String> = names
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect();
    assert_eq!(world.stored_city_names(), expected);

    let orders: Vec<u32> = world
        .itinerary
        .as_ref()
        .map(|itinerary| itinerary.stops.iter().map(|stop| stop.order).collect())
        .unwrap_or_default();
    let dense: Vec<u32> = (1..=orders.len() as u32).collect();
    assert_eq!(orders, dense);
}

#[then(regex = r#"^stop "([^"]+)" has (\d+) days? with (\d+) activit(?:y|ies)$"#)]
async fn then_stop_days(world: &mut ItineraryWorld, city: String, days: usize, activities: usize) {
    let itinerary = world.itinerary.as_ref().expect("itinerary must be loaded");
    let stop = itinerary
        .stops
        .iter()
        .find(|stop| stop.city.name == city)
        .expect("stop present");
    assert_eq!(stop.days.len(), days);
    let count: usize = stop.days.iter().map(|day| day.activities.len()).sum();
    assert_eq!(count, activities);
}

#[then("the itinerary of an unknown trip is not found")]
async fn then_unknown_not_found(world: &mut ItineraryWorld) {
    let err = world
        .itineraries()
        .find_by_trip("no-such-trip")
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound));
}

#[then(
    regex = r"^the trip costs (\d+(?:\.\d+)?) with day total (\d+(?:\.\d+)?) and stop total (\d+(?:\.\d+)?)$"
)]
async fn then_costs(world: &mut ItineraryWorld, total: String, day: String, stop: String) {
    let trip_id = world.trip().id.clone();
    let costs = world.itineraries().costs(&trip_id).await.expect("costs");
    assert_eq!(costs.summary.total, amount(&total));
    assert_eq!(costs.summary.stops[0].total, amount(&stop));
    assert_eq!(costs.summary.stops[0].days[0].total, amount(&day));
    world.costs = Some(costs);
}

#[then(regex = r"^the trip is over budget by (\d+(?:\.\d+)?)$")]
async fn then_over_budget(world: &mut ItineraryWorld, by: String) {
    let trip_id = world.trip().id.clone();
    let costs = world.itineraries().costs(&trip_id).await.expect("costs");
    assert_eq!(costs.comparison, BudgetComparison::OverBudget { by: amount(&by) });
}

#[then(regex = r"^the trip has (\d+(?:\.\d+)?) remaining$")]
async fn then_remaining(world: &mut ItineraryWorld, remaining: String) {
    let trip_id = world.trip().id.clone();
    let costs = world.itineraries().costs(&trip_id).await.expect("costs");
    assert_eq!(
        costs.comparison,
        BudgetComparison::Remaining {
            amount: amount(&remaining)
        }
    );
}

#[then("the trip has no budget set")]
async fn then_no_budget(world: &mut ItineraryWorld) {
    let trip_id = world.trip().id.clone();
    let costs = world.itineraries().costs(&trip_id).await.expect("costs");
    assert_eq!(costs.budget, None);
    assert_eq!(costs.comparison, BudgetComparison::NoBudget);
}

#[then(regex = r#"^moving the trip fails with "([^"]+)"$"#)]
async fn then_move_fails(world: &mut ItineraryWorld, reason: String) {
    let err = world.last_error.as_ref().expect("an error was expected");
    let violations = err.violations().expect("a validation failure");
    assert!(violations.iter().any(|v| v.reason.contains(&reason)));
}

#[tokio::main]
async fn main() {
    ItineraryWorld::cucumber()
        .fail_on_skipped()
        .with_default_cli()
        .run("tests/features")
        .await;
}
