use std::sync::Arc;

use anyhow::Context;
use axum::{
    Json, Router,
    extract::{Path, Query, Request, State},
    http::{HeaderValue, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
};
use chrono::{DateTime, FixedOffset, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use crate::openfoodfacts::OpenFoodFactsClient;
use glyco_core::db::Database;
use glyco_core::glucose::{GlucoseSummary, TimeWindow};
use glyco_core::models::{
    DailyNote, DailyReport, Food, GlucoseReading, InsulinRecord, Meal, MealDetail, Medication,
    NewDailyNote, NewFood, NewGlucoseReading, NewInsulinRecord, NewMeal, NewMealItem,
    NewMedication, UpdateGlucoseReading, UpdateInsulinRecord, UpdateMeal, UpdateMedication,
    validate_daily_note, validate_food_data, validate_glucose_value, validate_insulin_dose,
    validate_insulin_type, validate_meal_type, validate_measurement_type, validate_medication,
    validate_medication_type, validate_quantity,
};
use glyco_core::service::GlycoService;

const BODY_LIMIT: usize = 1024 * 1024; // 1 MB

#[derive(Clone)]
struct AppState {
    svc: Arc<GlycoService>,
    off: Arc<OpenFoodFactsClient>,
    api_key: Option<String>,
}

// --- Request / Response types ---

fn deserialize_some<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct SearchQuery {
    q: String,
}

#[derive(Deserialize)]
struct RangeQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct StatisticsQuery {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

#[derive(Deserialize)]
struct NoteRangeQuery {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
}

#[derive(Deserialize)]
struct ReportQuery {
    utc_offset_minutes: Option<i32>,
}

#[derive(Deserialize)]
struct MedicationListQuery {
    #[serde(default)]
    active: bool,
}

#[derive(Deserialize)]
struct MealItemRequest {
    food_id: i64,
    quantity_g: f64,
    notes: Option<String>,
}

#[derive(Deserialize)]
struct CreateMealRequest {
    meal_type: String,
    name: Option<String>,
    eaten_at: Option<DateTime<Utc>>,
    notes: Option<String>,
    #[serde(default)]
    items: Vec<MealItemRequest>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateMealRequest {
    meal_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    name: Option<Option<String>>,
    eaten_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    notes: Option<Option<String>>,
}

fn default_measurement_type() -> String {
    "random".to_string()
}

#[derive(Deserialize)]
struct CreateGlucoseRequest {
    value_mg_dl: f64,
    measured_at: Option<DateTime<Utc>>,
    #[serde(default = "default_measurement_type")]
    measurement_type: String,
    mood: Option<String>,
    notes: Option<String>,
    meal_id: Option<i64>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateGlucoseRequest {
    value_mg_dl: Option<f64>,
    measured_at: Option<DateTime<Utc>>,
    measurement_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    mood: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    meal_id: Option<Option<i64>>,
}

#[derive(Deserialize)]
struct CreateInsulinRequest {
    insulin_type: String,
    dose_units: f64,
    injected_at: Option<DateTime<Utc>>,
    injection_site: Option<String>,
    notes: Option<String>,
    meal_id: Option<i64>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateInsulinRequest {
    insulin_type: Option<String>,
    dose_units: Option<f64>,
    injected_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    injection_site: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    notes: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    meal_id: Option<Option<i64>>,
}

#[derive(Deserialize)]
#[allow(clippy::option_option)]
struct UpdateMedicationRequest {
    name: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    brand: Option<Option<String>>,
    medication_type: Option<String>,
    #[serde(default, deserialize_with = "deserialize_some")]
    dosage: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    frequency: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    instructions: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    prescribed_by: Option<Option<String>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    start_date: Option<Option<NaiveDate>>,
    #[serde(default, deserialize_with = "deserialize_some")]
    end_date: Option<Option<NaiveDate>>,
    is_active: Option<bool>,
    #[serde(default, deserialize_with = "deserialize_some")]
    notes: Option<Option<String>>,
}

#[derive(Serialize, Deserialize)]
struct TargetRangeBody {
    low: f64,
    high: f64,
}

#[derive(Serialize, Deserialize)]
struct CarbRatioBody {
    grams_per_unit: f64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

// --- Error handling ---

enum ApiError {
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Internal(err) => {
                tracing::error!("internal server error: {err:#}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err)
    }
}

#[allow(clippy::needless_pass_by_value)]
fn bad_request(err: anyhow::Error) -> ApiError {
    ApiError::BadRequest(format!("{err}"))
}

fn parse_date(date_str: &str) -> Result<NaiveDate, ApiError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ApiError::BadRequest(format!("Invalid date '{date_str}'. Use YYYY-MM-DD")))
}

/// Maps a failed existence check to `missing`; lookup errors stay internal.
fn require(
    found: anyhow::Result<bool>,
    missing: impl FnOnce() -> ApiError,
) -> Result<(), ApiError> {
    if found.context("database error")? {
        Ok(())
    } else {
        Err(missing())
    }
}

fn ensure_meal_exists(db: &Database, meal_id: Option<i64>) -> Result<(), ApiError> {
    if let Some(id) = meal_id {
        require(db.meal_exists(id), || {
            ApiError::BadRequest(format!("Meal with id {id} not found"))
        })?;
    }
    Ok(())
}

// --- Middleware ---

async fn require_auth(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if let Some(ref expected_key) = state.api_key {
        let authorized = request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token == expected_key);

        if !authorized {
            tracing::warn!(path = %request.uri().path(), "rejected request without valid API key");
            return (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "Invalid or missing API key".to_string(),
                }),
            )
                .into_response();
        }
    }
    next.run(request).await
}

async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    headers.insert(
        "x-content-type-options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("x-frame-options", HeaderValue::from_static("DENY"));
    headers.insert(
        "content-security-policy",
        HeaderValue::from_static("default-src 'none'"),
    );
    response
}

// --- Handlers ---

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// --- Food handlers ---

async fn search_foods(
    State(state): State<AppState>,
    Query(params): Query<SearchQuery>,
) -> Result<Json<Vec<Food>>, ApiError> {
    let query = params.q.trim();
    if query.is_empty() {
        return Err(ApiError::BadRequest("q must not be empty".to_string()));
    }
    let foods = state
        .svc
        .search_and_cache(state.off.as_ref(), query)
        .await
        .context("food search failed")?;
    Ok(Json(foods))
}

async fn get_food_by_barcode(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<Food>, ApiError> {
    let food = state
        .svc
        .barcode_lookup(state.off.as_ref(), &code)
        .await
        .context("barcode lookup failed")?;
    food.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No product found for barcode '{code}'")))
}

async fn create_food(
    State(state): State<AppState>,
    Json(mut req): Json<NewFood>,
) -> Result<(StatusCode, Json<Food>), ApiError> {
    req.name = req.name.trim().to_string();
    validate_food_data(&req).map_err(bad_request)?;

    let db = state.svc.db();
    if let Some(code) = &req.barcode {
        if db.get_food_by_barcode(code).context("database error")?.is_some() {
            return Err(ApiError::Conflict(format!(
                "A food with barcode '{code}' already exists"
            )));
        }
    }
    let food = db.insert_food(&req).context("failed to insert food")?;
    Ok((StatusCode::CREATED, Json(food)))
}

async fn get_food(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Food>, ApiError> {
    let db = state.svc.db();
    require(db.food_exists(id), || {
        ApiError::NotFound(format!("Food {id} not found"))
    })?;
    let food = db.get_food_by_id(id).context("failed to load food")?;
    Ok(Json(food))
}

async fn update_food(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut req): Json<NewFood>,
) -> Result<Json<Food>, ApiError> {
    req.name = req.name.trim().to_string();
    validate_food_data(&req).map_err(bad_request)?;

    let db = state.svc.db();
    require(db.food_exists(id), || {
        ApiError::NotFound(format!("Food {id} not found"))
    })?;
    if let Some(code) = &req.barcode {
        let existing = db.get_food_by_barcode(code).context("database error")?;
        if existing.is_some_and(|f| f.id != id) {
            return Err(ApiError::Conflict(format!(
                "A food with barcode '{code}' already exists"
            )));
        }
    }
    let food = db.update_food(id, &req).context("failed to update food")?;
    Ok(Json(food))
}

async fn delete_food(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let db = state.svc.db();
    let used = db.food_usage_count(id).context("database error")?;
    if used > 0 {
        return Err(ApiError::Conflict(format!(
            "Food {id} is used by {used} meal item(s)"
        )));
    }
    if db.delete_food(id).context("failed to delete food")? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Food {id} not found")))
    }
}

// --- Meal handlers ---

async fn list_meals(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<MealDetail>>, ApiError> {
    let ratio = state.svc.carb_ratio().context("failed to read carb ratio")?;
    let meals = state
        .svc
        .db()
        .list_meal_details(range.start, range.end, &ratio)
        .context("failed to list meals")?;
    Ok(Json(meals))
}

async fn create_meal(
    State(state): State<AppState>,
    Json(req): Json<CreateMealRequest>,
) -> Result<(StatusCode, Json<MealDetail>), ApiError> {
    let meal_type = validate_meal_type(&req.meal_type).map_err(bad_request)?;
    for item in &req.items {
        validate_quantity(item.quantity_g).map_err(bad_request)?;
    }

    let meal_id = {
        let db = state.svc.db();
        for item in &req.items {
            require(db.food_exists(item.food_id), || {
                ApiError::BadRequest(format!("Food with id {} not found", item.food_id))
            })?;
        }

        let meal = db
            .insert_meal(&NewMeal {
                meal_type,
                name: req.name,
                eaten_at: req.eaten_at.unwrap_or_else(Utc::now),
                notes: req.notes,
            })
            .context("failed to insert meal")?;
        for item in req.items {
            db.add_meal_item(
                meal.id,
                &NewMealItem {
                    food_id: item.food_id,
                    quantity_g: item.quantity_g,
                    notes: item.notes,
                },
            )
            .context("failed to insert meal item")?;
        }
        meal.id
    };

    let detail = state.svc.meal_detail(meal_id).context("failed to load meal")?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn get_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<MealDetail>, ApiError> {
    require(state.svc.db().meal_exists(id), || {
        ApiError::NotFound(format!("Meal {id} not found"))
    })?;
    let detail = state.svc.meal_detail(id).context("failed to load meal")?;
    Ok(Json(detail))
}

async fn update_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMealRequest>,
) -> Result<Json<Meal>, ApiError> {
    let update = UpdateMeal {
        meal_type: req
            .meal_type
            .as_deref()
            .map(validate_meal_type)
            .transpose()
            .map_err(bad_request)?,
        name: req.name,
        eaten_at: req.eaten_at,
        notes: req.notes,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }

    let db = state.svc.db();
    require(db.meal_exists(id), || {
        ApiError::NotFound(format!("Meal {id} not found"))
    })?;
    let meal = db.update_meal(id, &update).context("failed to update meal")?;
    Ok(Json(meal))
}

async fn delete_meal(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .svc
        .db()
        .delete_meal(id)
        .context("failed to delete meal")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Meal {id} not found")))
    }
}

async fn add_meal_item(
    State(state): State<AppState>,
    Path(meal_id): Path<i64>,
    Json(req): Json<MealItemRequest>,
) -> Result<(StatusCode, Json<MealDetail>), ApiError> {
    validate_quantity(req.quantity_g).map_err(bad_request)?;
    {
        let db = state.svc.db();
        require(db.meal_exists(meal_id), || {
            ApiError::NotFound(format!("Meal {meal_id} not found"))
        })?;
        require(db.food_exists(req.food_id), || {
            ApiError::BadRequest(format!("Food with id {} not found", req.food_id))
        })?;
        db.add_meal_item(
            meal_id,
            &NewMealItem {
                food_id: req.food_id,
                quantity_g: req.quantity_g,
                notes: req.notes,
            },
        )
        .context("failed to insert meal item")?;
    }
    let detail = state.svc.meal_detail(meal_id).context("failed to load meal")?;
    Ok((StatusCode::CREATED, Json(detail)))
}

async fn delete_meal_item(
    State(state): State<AppState>,
    Path(item_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .svc
        .db()
        .remove_meal_item(item_id)
        .context("failed to delete meal item")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Meal item {item_id} not found")))
    }
}

// --- Glucose handlers ---

async fn list_glucose(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<GlucoseReading>>, ApiError> {
    let readings = state
        .svc
        .db()
        .list_glucose_readings(range.start, range.end)
        .context("failed to list glucose readings")?;
    Ok(Json(readings))
}

async fn create_glucose(
    State(state): State<AppState>,
    Json(req): Json<CreateGlucoseRequest>,
) -> Result<(StatusCode, Json<GlucoseReading>), ApiError> {
    validate_glucose_value(req.value_mg_dl).map_err(bad_request)?;
    let measurement_type = validate_measurement_type(&req.measurement_type).map_err(bad_request)?;

    let db = state.svc.db();
    ensure_meal_exists(&db, req.meal_id)?;
    let reading = db
        .insert_glucose_reading(&NewGlucoseReading {
            value_mg_dl: req.value_mg_dl,
            measured_at: req.measured_at.unwrap_or_else(Utc::now),
            measurement_type,
            mood: req.mood,
            notes: req.notes,
            meal_id: req.meal_id,
        })
        .context("failed to insert glucose reading")?;
    Ok((StatusCode::CREATED, Json(reading)))
}

async fn glucose_statistics(
    State(state): State<AppState>,
    Query(params): Query<StatisticsQuery>,
) -> Result<Json<GlucoseSummary>, ApiError> {
    let summary = state
        .svc
        .glucose_statistics(TimeWindow::new(params.start, params.end))
        .context("failed to compute glucose statistics")?;
    Ok(Json(summary))
}

async fn get_glucose(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<GlucoseReading>, ApiError> {
    let db = state.svc.db();
    require(db.glucose_reading_exists(id), || {
        ApiError::NotFound(format!("Glucose reading {id} not found"))
    })?;
    let reading = db
        .get_glucose_reading(id)
        .context("failed to load glucose reading")?;
    Ok(Json(reading))
}

async fn update_glucose(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateGlucoseRequest>,
) -> Result<Json<GlucoseReading>, ApiError> {
    if let Some(v) = req.value_mg_dl {
        validate_glucose_value(v).map_err(bad_request)?;
    }
    let update = UpdateGlucoseReading {
        value_mg_dl: req.value_mg_dl,
        measured_at: req.measured_at,
        measurement_type: req
            .measurement_type
            .as_deref()
            .map(validate_measurement_type)
            .transpose()
            .map_err(bad_request)?,
        mood: req.mood,
        notes: req.notes,
        meal_id: req.meal_id,
    };

    let db = state.svc.db();
    require(db.glucose_reading_exists(id), || {
        ApiError::NotFound(format!("Glucose reading {id} not found"))
    })?;
    ensure_meal_exists(&db, update.meal_id.flatten())?;
    let reading = db
        .update_glucose_reading(id, &update)
        .context("failed to update glucose reading")?;
    Ok(Json(reading))
}

async fn delete_glucose(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .svc
        .db()
        .delete_glucose_reading(id)
        .context("failed to delete glucose reading")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Glucose reading {id} not found")))
    }
}

// --- Insulin handlers ---

async fn list_insulin(
    State(state): State<AppState>,
    Query(range): Query<RangeQuery>,
) -> Result<Json<Vec<InsulinRecord>>, ApiError> {
    let records = state
        .svc
        .db()
        .list_insulin_records(range.start, range.end)
        .context("failed to list insulin records")?;
    Ok(Json(records))
}

async fn create_insulin(
    State(state): State<AppState>,
    Json(req): Json<CreateInsulinRequest>,
) -> Result<(StatusCode, Json<InsulinRecord>), ApiError> {
    validate_insulin_dose(req.dose_units).map_err(bad_request)?;
    let insulin_type = validate_insulin_type(&req.insulin_type).map_err(bad_request)?;

    let db = state.svc.db();
    ensure_meal_exists(&db, req.meal_id)?;
    let record = db
        .insert_insulin_record(&NewInsulinRecord {
            insulin_type,
            dose_units: req.dose_units,
            injected_at: req.injected_at.unwrap_or_else(Utc::now),
            injection_site: req.injection_site,
            notes: req.notes,
            meal_id: req.meal_id,
        })
        .context("failed to insert insulin record")?;
    Ok((StatusCode::CREATED, Json(record)))
}

async fn get_insulin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<InsulinRecord>, ApiError> {
    let db = state.svc.db();
    require(db.insulin_record_exists(id), || {
        ApiError::NotFound(format!("Insulin record {id} not found"))
    })?;
    let record = db
        .get_insulin_record(id)
        .context("failed to load insulin record")?;
    Ok(Json(record))
}

async fn update_insulin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateInsulinRequest>,
) -> Result<Json<InsulinRecord>, ApiError> {
    if let Some(dose) = req.dose_units {
        validate_insulin_dose(dose).map_err(bad_request)?;
    }
    let update = UpdateInsulinRecord {
        insulin_type: req
            .insulin_type
            .as_deref()
            .map(validate_insulin_type)
            .transpose()
            .map_err(bad_request)?,
        dose_units: req.dose_units,
        injected_at: req.injected_at,
        injection_site: req.injection_site,
        notes: req.notes,
        meal_id: req.meal_id,
    };

    let db = state.svc.db();
    require(db.insulin_record_exists(id), || {
        ApiError::NotFound(format!("Insulin record {id} not found"))
    })?;
    ensure_meal_exists(&db, update.meal_id.flatten())?;
    let record = db
        .update_insulin_record(id, &update)
        .context("failed to update insulin record")?;
    Ok(Json(record))
}

async fn delete_insulin(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .svc
        .db()
        .delete_insulin_record(id)
        .context("failed to delete insulin record")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Insulin record {id} not found")))
    }
}

// --- Daily note handlers ---

async fn list_notes(
    State(state): State<AppState>,
    Query(range): Query<NoteRangeQuery>,
) -> Result<Json<Vec<DailyNote>>, ApiError> {
    let notes = state
        .svc
        .db()
        .list_daily_notes(range.start, range.end)
        .context("failed to list daily notes")?;
    Ok(Json(notes))
}

async fn get_note(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<Json<DailyNote>, ApiError> {
    let date = parse_date(&date_str)?;
    let note = state
        .svc
        .db()
        .get_daily_note(date)
        .context("database error")?;
    note.map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("No note for {date_str}")))
}

async fn put_note(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
    Json(req): Json<NewDailyNote>,
) -> Result<Json<DailyNote>, ApiError> {
    let date = parse_date(&date_str)?;
    validate_daily_note(&req).map_err(bad_request)?;
    let note = state
        .svc
        .db()
        .upsert_daily_note(date, &req)
        .context("failed to save daily note")?;
    Ok(Json(note))
}

async fn delete_note(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
) -> Result<StatusCode, ApiError> {
    let date = parse_date(&date_str)?;
    if state
        .svc
        .db()
        .delete_daily_note(date)
        .context("failed to delete daily note")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("No note for {date_str}")))
    }
}

// --- Medication handlers ---

async fn list_medications(
    State(state): State<AppState>,
    Query(params): Query<MedicationListQuery>,
) -> Result<Json<Vec<Medication>>, ApiError> {
    let meds = state
        .svc
        .db()
        .list_medications(params.active)
        .context("failed to list medications")?;
    Ok(Json(meds))
}

async fn create_medication(
    State(state): State<AppState>,
    Json(mut req): Json<NewMedication>,
) -> Result<(StatusCode, Json<Medication>), ApiError> {
    validate_medication(&mut req).map_err(bad_request)?;
    let med = state
        .svc
        .db()
        .insert_medication(&req)
        .context("failed to insert medication")?;
    Ok((StatusCode::CREATED, Json(med)))
}

async fn get_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Medication>, ApiError> {
    let db = state.svc.db();
    require(db.medication_exists(id), || {
        ApiError::NotFound(format!("Medication {id} not found"))
    })?;
    let med = db.get_medication(id).context("failed to load medication")?;
    Ok(Json(med))
}

async fn update_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateMedicationRequest>,
) -> Result<Json<Medication>, ApiError> {
    let update = UpdateMedication {
        name: req.name,
        brand: req.brand,
        medication_type: req
            .medication_type
            .as_deref()
            .map(validate_medication_type)
            .transpose()
            .map_err(bad_request)?,
        dosage: req.dosage,
        frequency: req.frequency,
        instructions: req.instructions,
        prescribed_by: req.prescribed_by,
        start_date: req.start_date,
        end_date: req.end_date,
        is_active: req.is_active,
        notes: req.notes,
    };
    if update.is_empty() {
        return Err(ApiError::BadRequest(
            "At least one field must be provided".to_string(),
        ));
    }

    let db = state.svc.db();
    require(db.medication_exists(id), || {
        ApiError::NotFound(format!("Medication {id} not found"))
    })?;
    let current = db.get_medication(id).context("failed to load medication")?;
    let mut merged = update.merge(&current);
    validate_medication(&mut merged).map_err(bad_request)?;
    let med = db
        .update_medication(id, &merged)
        .context("failed to update medication")?;
    Ok(Json(med))
}

async fn delete_medication(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state
        .svc
        .db()
        .delete_medication(id)
        .context("failed to delete medication")?
    {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("Medication {id} not found")))
    }
}

// --- Settings handlers ---

async fn get_target_range(
    State(state): State<AppState>,
) -> Result<Json<TargetRangeBody>, ApiError> {
    let range = state.svc.target_range().context("failed to read target range")?;
    Ok(Json(TargetRangeBody {
        low: range.low(),
        high: range.high(),
    }))
}

async fn set_target_range(
    State(state): State<AppState>,
    Json(req): Json<TargetRangeBody>,
) -> Result<Json<TargetRangeBody>, ApiError> {
    let range = state
        .svc
        .set_target_range(req.low, req.high)
        .map_err(bad_request)?;
    Ok(Json(TargetRangeBody {
        low: range.low(),
        high: range.high(),
    }))
}

async fn get_carb_ratio(State(state): State<AppState>) -> Result<Json<CarbRatioBody>, ApiError> {
    let ratio = state.svc.carb_ratio().context("failed to read carb ratio")?;
    Ok(Json(CarbRatioBody {
        grams_per_unit: ratio.grams_per_unit(),
    }))
}

async fn set_carb_ratio(
    State(state): State<AppState>,
    Json(req): Json<CarbRatioBody>,
) -> Result<Json<CarbRatioBody>, ApiError> {
    let ratio = state
        .svc
        .set_carb_ratio(req.grams_per_unit)
        .map_err(bad_request)?;
    Ok(Json(CarbRatioBody {
        grams_per_unit: ratio.grams_per_unit(),
    }))
}

// --- Reports ---

async fn daily_report(
    State(state): State<AppState>,
    Path(date_str): Path<String>,
    Query(params): Query<ReportQuery>,
) -> Result<Json<DailyReport>, ApiError> {
    let date = parse_date(&date_str)?;
    let minutes = params.utc_offset_minutes.unwrap_or(0);
    let offset = minutes
        .checked_mul(60)
        .and_then(FixedOffset::east_opt)
        .ok_or_else(|| {
            ApiError::BadRequest(format!("Invalid utc_offset_minutes '{minutes}'"))
        })?;
    let report = state
        .svc
        .daily_report_in(date, &offset)
        .context("failed to build daily report")?;
    Ok(Json(report))
}

fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/foods", post(create_food))
        .route("/api/foods/search", get(search_foods))
        .route("/api/foods/barcode/{code}", get(get_food_by_barcode))
        .route(
            "/api/foods/{id}",
            get(get_food).put(update_food).delete(delete_food),
        )
        .route("/api/meals", get(list_meals).post(create_meal))
        .route(
            "/api/meals/{id}",
            get(get_meal).put(update_meal).delete(delete_meal),
        )
        .route("/api/meals/{id}/items", post(add_meal_item))
        .route("/api/meals/items/{item_id}", delete(delete_meal_item))
        .route("/api/glucose", get(list_glucose).post(create_glucose))
        .route("/api/glucose/statistics", get(glucose_statistics))
        .route(
            "/api/glucose/{id}",
            get(get_glucose).put(update_glucose).delete(delete_glucose),
        )
        .route("/api/insulin", get(list_insulin).post(create_insulin))
        .route(
            "/api/insulin/{id}",
            get(get_insulin).put(update_insulin).delete(delete_insulin),
        )
        .route("/api/notes", get(list_notes))
        .route(
            "/api/notes/{date}",
            get(get_note).put(put_note).delete(delete_note),
        )
        .route(
            "/api/settings/target-range",
            get(get_target_range).put(set_target_range),
        )
        .route(
            "/api/settings/carb-ratio",
            get(get_carb_ratio).put(set_carb_ratio),
        )
        .route(
            "/api/medications",
            get(list_medications).post(create_medication),
        )
        .route(
            "/api/medications/{id}",
            get(get_medication)
                .put(update_medication)
                .delete(delete_medication),
        )
        .route("/api/reports/daily/{date}", get(daily_report))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_auth))
        // Registered after the auth layer so it stays reachable without a key
        .route("/api/health", get(health))
        .layer(RequestBodyLimitLayer::new(BODY_LIMIT))
        .layer(middleware::from_fn(security_headers))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// --- Server startup ---

pub async fn start_server(
    svc: GlycoService,
    off: OpenFoodFactsClient,
    port: u16,
    bind: &str,
    api_key: Option<String>,
) -> anyhow::Result<()> {
    let state = AppState {
        svc: Arc::new(svc),
        off: Arc::new(off),
        api_key: api_key.clone(),
    };

    let app = build_router(state);

    if let Some(ref key) = api_key {
        match (key.get(..4), key.get(key.len().saturating_sub(4)..)) {
            (Some(head), Some(tail)) if key.len() > 8 => {
                eprintln!("API key: {head}...{tail} (see api_key file in data directory)");
            }
            _ => eprintln!("API key: (see api_key file in data directory)"),
        }
    } else {
        eprintln!("Warning: Authentication disabled (--no-auth). API is open to anyone.");
    }

    if bind != "127.0.0.1" && bind != "localhost" && api_key.is_none() {
        tracing::warn!(
            bind,
            "listening on a non-local address with no authentication; any device on your network can access this API"
        );
    }

    let listener = tokio::net::TcpListener::bind(format!("{bind}:{port}"))
        .await
        .with_context(|| format!("failed to bind {bind}:{port}"))?;
    tracing::info!("listening on http://{bind}:{port}");
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    fn test_state(api_key: Option<String>) -> AppState {
        AppState {
            svc: Arc::new(GlycoService::new_in_memory().unwrap()),
            off: Arc::new(OpenFoodFactsClient::new().unwrap()),
            api_key,
        }
    }

    fn test_app(api_key: Option<String>) -> Router {
        build_router(test_state(api_key))
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = axum::http::Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => builder
                .header("content-type", "application/json")
                .body(Body::from(b.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn create_bread(app: &Router) -> i64 {
        let (status, food) = send(
            app,
            "POST",
            "/api/foods",
            Some(json!({
                "name": "White Bread",
                "barcode": "5000112",
                "calories_per_100g": 250.0,
                "carbs_per_100g": 50.0,
                "fiber_per_100g": 2.7
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        food["id"].as_i64().unwrap()
    }

    #[tokio::test]
    async fn auth_missing_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/api/settings/target-range")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Invalid or missing API key");
    }

    #[tokio::test]
    async fn auth_wrong_key_returns_401() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/api/settings/target-range")
                    .header("Authorization", "Bearer wrong-key")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn auth_correct_key_succeeds() {
        let app = test_app(Some("test-key-abc123".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/api/settings/target-range")
                    .header("Authorization", "Bearer test-key-abc123")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_public() {
        let app = test_app(Some("secret".to_string()));
        let (status, body) = send(&app, "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn security_headers_present() {
        let app = test_app(None);

        let response = app
            .oneshot(
                axum::http::Request::get("/api/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
        assert_eq!(response.headers().get("x-frame-options").unwrap(), "DENY");
        assert_eq!(
            response.headers().get("content-security-policy").unwrap(),
            "default-src 'none'"
        );
    }

    #[tokio::test]
    async fn security_headers_on_auth_failure() {
        let app = test_app(Some("secret".to_string()));

        let response = app
            .oneshot(
                axum::http::Request::get("/api/glucose")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get("x-content-type-options").unwrap(),
            "nosniff"
        );
    }

    #[tokio::test]
    async fn body_size_limit_rejects_oversized() {
        let app = test_app(None);

        let big_body = vec![0u8; BODY_LIMIT + 1];
        let response = app
            .oneshot(
                axum::http::Request::post("/api/meals")
                    .header("content-type", "application/json")
                    .body(Body::from(big_body))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[tokio::test]
    async fn internal_error_does_not_leak_details() {
        let error = ApiError::Internal(anyhow::anyhow!("secret database path /home/user/glyco.db"));
        let response = error.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Internal server error");
        assert!(!json["error"].as_str().unwrap().contains("secret"));
    }

    #[tokio::test]
    async fn food_crud() {
        let app = test_app(None);
        let id = create_bread(&app).await;

        let (status, food) = send(&app, "GET", &format!("/api/foods/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(food["name"], "White Bread");
        assert_eq!(food["source"], "manual");

        let (status, food) = send(
            &app,
            "PUT",
            &format!("/api/foods/{id}"),
            Some(json!({ "name": "Toast", "calories_per_100g": 290.0, "carbs_per_100g": 55.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(food["name"], "Toast");

        let (status, _) = send(&app, "DELETE", &format!("/api/foods/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/foods/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn create_food_rejects_invalid() {
        let app = test_app(None);
        let (status, body) = send(
            &app,
            "POST",
            "/api/foods",
            Some(json!({ "name": "Bad", "calories_per_100g": 10.0, "sugar_per_100g": -1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("sugar_per_100g"));

        let (status, _) = send(
            &app,
            "POST",
            "/api/foods",
            Some(json!({ "name": "  ", "calories_per_100g": 10.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn create_food_duplicate_barcode_conflicts() {
        let app = test_app(None);
        create_bread(&app).await;
        let (status, _) = send(
            &app,
            "POST",
            "/api/foods",
            Some(json!({ "name": "Other", "barcode": "5000112", "calories_per_100g": 1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn barcode_served_from_cache() {
        let app = test_app(None);
        let id = create_bread(&app).await;
        let (status, food) = send(&app, "GET", "/api/foods/barcode/5000112", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(food["id"].as_i64(), Some(id));
    }

    #[tokio::test]
    async fn search_requires_query() {
        let app = test_app(None);
        let (status, _) = send(&app, "GET", "/api/foods/search?q=%20", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn meal_totals_follow_items() {
        let app = test_app(None);
        let food_id = create_bread(&app).await;

        let (status, meal) = send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({
                "meal_type": "lunch",
                "eaten_at": "2024-06-15T12:00:00Z",
                "items": [{ "food_id": food_id, "quantity_g": 150.0 }]
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let meal_id = meal["id"].as_i64().unwrap();
        assert!((meal["totals"]["carbs"].as_f64().unwrap() - 75.0).abs() < 1e-9);
        assert!((meal["totals"]["estimated_insulin_units"].as_f64().unwrap() - 6.25).abs() < 1e-9);

        let (status, meal) = send(
            &app,
            "POST",
            &format!("/api/meals/{meal_id}/items"),
            Some(json!({ "food_id": food_id, "quantity_g": 50.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(meal["items"].as_array().unwrap().len(), 2);
        assert!((meal["totals"]["carbs"].as_f64().unwrap() - 100.0).abs() < 1e-9);

        let item_id = meal["items"][0]["id"].as_i64().unwrap();
        let (status, _) = send(&app, "DELETE", &format!("/api/meals/items/{item_id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, meal) = send(&app, "GET", &format!("/api/meals/{meal_id}"), None).await;
        assert!((meal["totals"]["carbs"].as_f64().unwrap() - 25.0).abs() < 1e-9);

        // Food in use cannot be deleted
        let (status, _) = send(&app, "DELETE", &format!("/api/foods/{food_id}"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn meal_validation_errors() {
        let app = test_app(None);
        let food_id = create_bread(&app).await;

        let (status, _) = send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({ "meal_type": "brunch" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({ "meal_type": "lunch", "items": [{ "food_id": food_id, "quantity_g": 0.0 }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({ "meal_type": "lunch", "items": [{ "food_id": 999, "quantity_g": 10.0 }] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/meals/999/items",
            Some(json!({ "food_id": food_id, "quantity_g": 10.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn meal_update_and_delete() {
        let app = test_app(None);
        let (_, meal) = send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({ "meal_type": "dinner", "name": "Pasta", "eaten_at": "2024-06-15T19:00:00Z" })),
        )
        .await;
        let id = meal["id"].as_i64().unwrap();

        let (status, _) = send(&app, "PUT", &format!("/api/meals/{id}"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, meal) = send(
            &app,
            "PUT",
            &format!("/api/meals/{id}"),
            Some(json!({ "name": null, "notes": "extra cheese" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(meal["name"].is_null());
        assert_eq!(meal["notes"], "extra cheese");
        assert_eq!(meal["meal_type"], "dinner");

        let (_, list) = send(
            &app,
            "GET",
            "/api/meals?start=2024-06-15T00:00:00Z&end=2024-06-15T23:59:59Z",
            None,
        )
        .await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "DELETE", &format!("/api/meals/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/meals/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn glucose_statistics_scenario() {
        let app = test_app(None);
        for (value, hour) in [(70.0, 8), (90.0, 10), (150.0, 13), (200.0, 18)] {
            let (status, _) = send(
                &app,
                "POST",
                "/api/glucose",
                Some(json!({
                    "value_mg_dl": value,
                    "measured_at": format!("2024-06-15T{hour:02}:00:00Z"),
                    "measurement_type": "pre-meal"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, stats) = send(
            &app,
            "GET",
            "/api/glucose/statistics?start=2024-06-15T00:00:00Z&end=2024-06-15T23:59:59Z",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["count"], 4);
        assert!((stats["in_range_pct"].as_f64().unwrap() - 50.0).abs() < 1e-9);
        assert!((stats["below_range_pct"].as_f64().unwrap() - 25.0).abs() < 1e-9);
        assert!((stats["above_range_pct"].as_f64().unwrap() - 25.0).abs() < 1e-9);
        assert!((stats["average"].as_f64().unwrap() - 127.5).abs() < 1e-9);

        let (status, _) = send(&app, "GET", "/api/glucose/statistics", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn glucose_crud_and_validation() {
        let app = test_app(None);
        let (status, _) = send(
            &app,
            "POST",
            "/api/glucose",
            Some(json!({ "value_mg_dl": 0.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/glucose",
            Some(json!({ "value_mg_dl": 120.0, "meal_id": 42 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, reading) = send(
            &app,
            "POST",
            "/api/glucose",
            Some(json!({ "value_mg_dl": 120.0, "notes": "after run" })),
        )
        .await;
        let id = reading["id"].as_i64().unwrap();
        assert_eq!(reading["measurement_type"], "random");

        let (status, reading) = send(
            &app,
            "PUT",
            &format!("/api/glucose/{id}"),
            Some(json!({ "value_mg_dl": 125.0, "notes": null })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(reading["notes"].is_null());

        let (status, _) = send(&app, "DELETE", &format!("/api/glucose/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/glucose/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn insulin_crud() {
        let app = test_app(None);
        let (status, _) = send(
            &app,
            "POST",
            "/api/insulin",
            Some(json!({ "insulin_type": "slow", "dose_units": 4.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, record) = send(
            &app,
            "POST",
            "/api/insulin",
            Some(json!({ "insulin_type": "Rapid", "dose_units": 4.0, "injection_site": "arm" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(record["insulin_type"], "rapid");
        let id = record["id"].as_i64().unwrap();

        let (status, record) = send(
            &app,
            "PUT",
            &format!("/api/insulin/{id}"),
            Some(json!({ "dose_units": 5.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!((record["dose_units"].as_f64().unwrap() - 5.5).abs() < f64::EPSILON);
        assert_eq!(record["injection_site"], "arm");

        let (_, list) = send(&app, "GET", "/api/insulin", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "DELETE", &format!("/api/insulin/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn notes_put_get_delete() {
        let app = test_app(None);
        let (status, _) = send(&app, "GET", "/api/notes/2024-06-15", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, note) = send(
            &app,
            "PUT",
            "/api/notes/2024-06-15",
            Some(json!({ "mood": "tired", "sleep_hours": 5.5 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(note["date"], "2024-06-15");

        let (status, _) = send(
            &app,
            "PUT",
            "/api/notes/2024-06-15",
            Some(json!({ "sleep_hours": 30.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, list) = send(&app, "GET", "/api/notes?start=2024-06-01", None).await;
        assert_eq!(list.as_array().unwrap().len(), 1);

        let (status, _) = send(&app, "GET", "/api/notes/june", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&app, "DELETE", "/api/notes/2024-06-15", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn settings_round_trip() {
        let app = test_app(None);
        let (_, range) = send(&app, "GET", "/api/settings/target-range", None).await;
        assert!((range["low"].as_f64().unwrap() - 80.0).abs() < f64::EPSILON);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/settings/target-range",
            Some(json!({ "low": 180.0, "high": 80.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, range) = send(
            &app,
            "PUT",
            "/api/settings/target-range",
            Some(json!({ "low": 70.0, "high": 140.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!((range["high"].as_f64().unwrap() - 140.0).abs() < f64::EPSILON);

        let (status, ratio) = send(
            &app,
            "PUT",
            "/api/settings/carb-ratio",
            Some(json!({ "grams_per_unit": 10.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!((ratio["grams_per_unit"].as_f64().unwrap() - 10.0).abs() < f64::EPSILON);

        let (status, _) = send(
            &app,
            "PUT",
            "/api/settings/carb-ratio",
            Some(json!({ "grams_per_unit": -1.0 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn daily_report_endpoint() {
        let app = test_app(None);
        let food_id = create_bread(&app).await;
        send(
            &app,
            "POST",
            "/api/meals",
            Some(json!({
                "meal_type": "breakfast",
                "eaten_at": "2024-06-15T07:30:00Z",
                "items": [{ "food_id": food_id, "quantity_g": 120.0 }]
            })),
        )
        .await;
        send(
            &app,
            "POST",
            "/api/glucose",
            Some(json!({ "value_mg_dl": 140.0, "measured_at": "2024-06-15T09:00:00Z" })),
        )
        .await;

        let (status, report) = send(&app, "GET", "/api/reports/daily/2024-06-15", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["meal_count"], 1);
        assert!((report["carbs"].as_f64().unwrap() - 60.0).abs() < 1e-9);
        assert_eq!(report["glucose"]["count"], 1);

        let (status, _) = send(&app, "GET", "/api/reports/daily/not-a-date", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn daily_report_uses_utc_offset() {
        let app = test_app(None);
        // 20:00 on the 15th at UTC-7
        send(
            &app,
            "POST",
            "/api/glucose",
            Some(json!({ "value_mg_dl": 110.0, "measured_at": "2024-06-16T03:00:00Z" })),
        )
        .await;

        let (_, report) = send(&app, "GET", "/api/reports/daily/2024-06-15", None).await;
        assert_eq!(report["glucose"]["count"], 0);

        let (status, report) = send(
            &app,
            "GET",
            "/api/reports/daily/2024-06-15?utc_offset_minutes=-420",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["glucose"]["count"], 1);

        let (_, report) = send(
            &app,
            "GET",
            "/api/reports/daily/2024-06-16?utc_offset_minutes=-420",
            None,
        )
        .await;
        assert_eq!(report["glucose"]["count"], 0);

        let (status, _) = send(
            &app,
            "GET",
            "/api/reports/daily/2024-06-15?utc_offset_minutes=100000",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn medication_crud() {
        let app = test_app(None);
        let (status, med) = send(
            &app,
            "POST",
            "/api/medications",
            Some(json!({
                "name": " Metformin ",
                "medication_type": "Oral",
                "dosage": "500 mg",
                "frequency": "twice daily",
                "start_date": "2024-01-10"
            })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(med["name"], "Metformin");
        assert_eq!(med["medication_type"], "oral");
        assert_eq!(med["is_active"], true);
        let id = med["id"].as_i64().unwrap();

        let (status, med) = send(&app, "GET", &format!("/api/medications/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(med["dosage"], "500 mg");

        let (status, med) = send(
            &app,
            "PUT",
            &format!("/api/medications/{id}"),
            Some(json!({ "dosage": "1000 mg", "frequency": null, "is_active": false })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(med["dosage"], "1000 mg");
        assert!(med["frequency"].is_null());
        assert_eq!(med["name"], "Metformin");
        assert_eq!(med["is_active"], false);

        let (_, all) = send(&app, "GET", "/api/medications", None).await;
        assert_eq!(all.as_array().unwrap().len(), 1);
        let (_, active) = send(&app, "GET", "/api/medications?active=true", None).await;
        assert!(active.as_array().unwrap().is_empty());

        let (status, _) = send(&app, "DELETE", &format!("/api/medications/{id}"), None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        let (status, _) = send(&app, "GET", &format!("/api/medications/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = send(&app, "DELETE", &format!("/api/medications/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn medication_validation_errors() {
        let app = test_app(None);
        let (status, body) = send(
            &app,
            "POST",
            "/api/medications",
            Some(json!({ "name": "Herbal tea", "medication_type": "herbal" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("medication type"));

        let (_, med) = send(
            &app,
            "POST",
            "/api/medications",
            Some(json!({
                "name": "Lantus",
                "medication_type": "insulin",
                "start_date": "2024-03-01"
            })),
        )
        .await;
        let id = med["id"].as_i64().unwrap();

        let (status, _) = send(&app, "PUT", &format!("/api/medications/{id}"), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(
            &app,
            "PUT",
            &format!("/api/medications/{id}"),
            Some(json!({ "end_date": "2024-02-01" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("end_date"));

        let (status, _) = send(
            &app,
            "PUT",
            "/api/medications/999",
            Some(json!({ "dosage": "10 U" })),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
