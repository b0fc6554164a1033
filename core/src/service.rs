use std::collections::HashSet;
use std::future::Future;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, NaiveTime, TimeZone, Utc};

use crate::db::Database;
use crate::glucose::{
    DEFAULT_TARGET_HIGH, DEFAULT_TARGET_LOW, GlucoseSample, GlucoseSummary, TargetRange,
    TimeWindow, summarize,
};
use crate::models::{DailyReport, Food, MealDetail, NewFood, validate_food_data};
use crate::nutrition::{CarbRatio, DEFAULT_CARB_RATIO};

pub const TARGET_LOW_KEY: &str = "target_low_mg_dl";
pub const TARGET_HIGH_KEY: &str = "target_high_mg_dl";
pub const CARB_RATIO_KEY: &str = "carb_ratio_g_per_unit";

/// Remote food database.
///
/// The CLI implements this with reqwest against OpenFoodFacts; tests use an
/// in-memory mock.
pub trait FoodLookupProvider: Send + Sync {
    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<NewFood>>> + Send;
    fn lookup_barcode(
        &self,
        barcode: &str,
    ) -> impl Future<Output = Result<Option<NewFood>>> + Send;
}

pub struct GlycoService {
    db: Mutex<Database>,
}

impl GlycoService {
    pub fn new(db_path: &Path) -> Result<Self> {
        let db = Database::open(db_path)?;
        Ok(Self { db: Mutex::new(db) })
    }

    pub fn new_in_memory() -> Result<Self> {
        let db = Database::open_in_memory()?;
        Ok(Self { db: Mutex::new(db) })
    }

    /// Lock the store. Never hold the guard across an `.await`.
    pub fn db(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // --- Settings ---

    fn setting_f64(db: &Database, key: &str) -> Result<Option<f64>> {
        db.get_setting(key)?
            .map(|v| {
                v.parse::<f64>()
                    .with_context(|| format!("Invalid value '{v}' for setting {key}"))
            })
            .transpose()
    }

    pub fn target_range(&self) -> Result<TargetRange> {
        let db = self.db();
        let low = Self::setting_f64(&db, TARGET_LOW_KEY)?.unwrap_or(DEFAULT_TARGET_LOW);
        let high = Self::setting_f64(&db, TARGET_HIGH_KEY)?.unwrap_or(DEFAULT_TARGET_HIGH);
        Ok(TargetRange::new(low, high)?)
    }

    pub fn set_target_range(&self, low: f64, high: f64) -> Result<TargetRange> {
        let range = TargetRange::new(low, high)?;
        let db = self.db();
        db.set_setting(TARGET_LOW_KEY, &range.low().to_string())?;
        db.set_setting(TARGET_HIGH_KEY, &range.high().to_string())?;
        tracing::info!(low, high, "target range updated");
        Ok(range)
    }

    /// Forget the stored range and fall back to the default.
    pub fn reset_target_range(&self) -> Result<TargetRange> {
        let db = self.db();
        db.delete_setting(TARGET_LOW_KEY)?;
        db.delete_setting(TARGET_HIGH_KEY)?;
        tracing::info!("target range reset to default");
        Ok(TargetRange::default())
    }

    pub fn carb_ratio(&self) -> Result<CarbRatio> {
        let db = self.db();
        let grams = Self::setting_f64(&db, CARB_RATIO_KEY)?.unwrap_or(DEFAULT_CARB_RATIO);
        Ok(CarbRatio::new(grams)?)
    }

    pub fn set_carb_ratio(&self, grams_per_unit: f64) -> Result<CarbRatio> {
        let ratio = CarbRatio::new(grams_per_unit)?;
        self.db()
            .set_setting(CARB_RATIO_KEY, &ratio.grams_per_unit().to_string())?;
        tracing::info!(grams_per_unit, "carb ratio updated");
        Ok(ratio)
    }

    pub fn reset_carb_ratio(&self) -> Result<CarbRatio> {
        self.db().delete_setting(CARB_RATIO_KEY)?;
        tracing::info!("carb ratio reset to default");
        Ok(CarbRatio::default())
    }

    // --- Foods ---

    /// Stores a manually entered food. Barcodes must be unique.
    pub fn add_food(&self, food: &NewFood) -> Result<Food> {
        validate_food_data(food)?;
        let db = self.db();
        if let Some(code) = &food.barcode {
            if db.get_food_by_barcode(code)?.is_some() {
                bail!("A food with barcode '{code}' already exists");
            }
        }
        db.insert_food(food)
    }

    // --- Meals ---

    pub fn meal_detail(&self, id: i64) -> Result<MealDetail> {
        let ratio = self.carb_ratio()?;
        self.db().get_meal_detail(id, &ratio)
    }

    pub fn meal_details(&self, window: Option<TimeWindow>) -> Result<Vec<MealDetail>> {
        let ratio = self.carb_ratio()?;
        self.db().list_meal_details(
            window.map(|w| w.start),
            window.map(|w| w.end),
            &ratio,
        )
    }

    // --- Statistics ---

    pub fn glucose_statistics(&self, window: TimeWindow) -> Result<GlucoseSummary> {
        let range = self.target_range()?;
        let readings = self
            .db()
            .list_glucose_readings(Some(window.start), Some(window.end))?;
        let samples: Vec<GlucoseSample> = readings
            .iter()
            .map(|r| GlucoseSample {
                value_mg_dl: r.value_mg_dl,
                at: r.measured_at,
            })
            .collect();
        Ok(summarize(&samples, window, range))
    }

    /// Summary of one calendar day as observed in `tz`.
    pub fn daily_report_in<Tz: TimeZone>(&self, date: NaiveDate, tz: &Tz) -> Result<DailyReport> {
        let window = day_window_in(date, tz)?;
        let glucose = self.glucose_statistics(window)?;
        let meals = self.meal_details(Some(window))?;

        let db = self.db();
        let insulin = db.list_insulin_records(Some(window.start), Some(window.end))?;
        let note = db.get_daily_note(date)?;

        Ok(DailyReport {
            date: date.format("%Y-%m-%d").to_string(),
            glucose,
            meal_count: meals.len(),
            calories: meals.iter().map(|m| m.totals.calories).sum(),
            carbs: meals.iter().map(|m| m.totals.carbs).sum(),
            estimated_insulin_units: meals
                .iter()
                .map(|m| m.totals.estimated_insulin_units)
                .sum(),
            meals,
            logged_insulin_units: insulin.iter().map(|r| r.dose_units).sum(),
            insulin_injections: insulin.len(),
            note,
        })
    }

    // --- Orchestrated lookups (search local, call provider if needed, cache results) ---

    /// Search local DB first, then call the provider for remote results, cache them, and
    /// return a deduplicated list.
    pub async fn search_and_cache<P: FoodLookupProvider>(
        &self,
        provider: &P,
        query: &str,
    ) -> Result<Vec<Food>> {
        let local = self.db().search_foods_local(query)?;
        let remote = provider.search(query).await?;
        tracing::debug!(query, local = local.len(), remote = remote.len(), "food search");

        let db = self.db();
        let mut cached_remote: Vec<Food> = Vec::new();
        for food in &remote {
            match db.upsert_food_by_barcode(food) {
                Ok(f) => cached_remote.push(f),
                Err(e) => tracing::warn!(name = %food.name, "failed to cache food: {e:#}"),
            }
        }

        let mut all = local;
        let mut seen: HashSet<i64> = all.iter().map(|f| f.id).collect();
        for f in cached_remote {
            if seen.insert(f.id) {
                all.push(f);
            }
        }

        Ok(all)
    }

    /// Look up a barcode: check local cache first, then call the provider, cache and return.
    pub async fn barcode_lookup<P: FoodLookupProvider>(
        &self,
        provider: &P,
        code: &str,
    ) -> Result<Option<Food>> {
        let cached = self.db().get_food_by_barcode(code)?;
        if let Some(cached) = cached {
            tracing::debug!(code, "barcode served from cache");
            return Ok(Some(cached));
        }

        let Some(mut new_food) = provider.lookup_barcode(code).await? else {
            return Ok(None);
        };
        if new_food.barcode.is_none() {
            new_food.barcode = Some(code.to_string());
        }
        let food = self.db().upsert_food_by_barcode(&new_food)?;
        tracing::info!(code, id = food.id, "cached food from barcode lookup");
        Ok(Some(food))
    }
}

/// `[00:00:00, 23:59:59]` on `date` in `tz`, as a UTC window.
pub fn day_window_in<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> Result<TimeWindow> {
    let end_of_day = NaiveTime::from_hms_opt(23, 59, 59).context("invalid end of day")?;
    let resolve = |time: NaiveTime| {
        let local = date.and_time(time);
        tz.from_local_datetime(&local)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc))
            .with_context(|| format!("'{local}' does not exist in the requested timezone"))
    };
    Ok(TimeWindow::new(resolve(NaiveTime::MIN)?, resolve(end_of_day)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        NewDailyNote, NewGlucoseReading, NewInsulinRecord, NewMeal, NewMealItem,
    };
    use chrono::{DateTime, FixedOffset, TimeZone, Utc};

    struct MockProvider {
        foods: Vec<NewFood>,
    }

    impl FoodLookupProvider for MockProvider {
        async fn search(&self, _query: &str) -> Result<Vec<NewFood>> {
            Ok(self.foods.clone())
        }

        async fn lookup_barcode(&self, barcode: &str) -> Result<Option<NewFood>> {
            Ok(self
                .foods
                .iter()
                .find(|f| f.barcode.as_deref() == Some(barcode))
                .cloned())
        }
    }

    struct FailingProvider;

    impl FoodLookupProvider for FailingProvider {
        async fn search(&self, _query: &str) -> Result<Vec<NewFood>> {
            anyhow::bail!("network down")
        }

        async fn lookup_barcode(&self, _barcode: &str) -> Result<Option<NewFood>> {
            anyhow::bail!("network down")
        }
    }

    fn sample_food() -> NewFood {
        NewFood {
            name: "Test Food".to_string(),
            brand: Some("Brand".to_string()),
            barcode: Some("1234567890".to_string()),
            calories_per_100g: 100.0,
            carbs_per_100g: 20.0,
            protein_per_100g: 10.0,
            fat_per_100g: 5.0,
            source: "openfoodfacts".to_string(),
            ..NewFood::default()
        }
    }

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    fn log_glucose(svc: &GlycoService, value: f64, when: DateTime<Utc>) {
        svc.db()
            .insert_glucose_reading(&NewGlucoseReading {
                value_mg_dl: value,
                measured_at: when,
                measurement_type: "random".to_string(),
                mood: None,
                notes: None,
                meal_id: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_search_and_cache() {
        let svc = GlycoService::new_in_memory().unwrap();
        let provider = MockProvider {
            foods: vec![sample_food()],
        };

        let results = svc.search_and_cache(&provider, "test").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Test Food");

        // Second search should return cached result without hitting provider
        let empty_provider = MockProvider { foods: vec![] };
        let results = svc.search_and_cache(&empty_provider, "test").await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "Test Food");
    }

    #[tokio::test]
    async fn test_search_and_cache_dedupes_local_and_remote() {
        let svc = GlycoService::new_in_memory().unwrap();
        let provider = MockProvider {
            foods: vec![sample_food()],
        };
        svc.search_and_cache(&provider, "test").await.unwrap();
        // Local hit and remote hit resolve to the same row
        let results = svc.search_and_cache(&provider, "test").await.unwrap();
        assert_eq!(results.len(), 1);
    }

    #[tokio::test]
    async fn test_search_propagates_provider_error() {
        let svc = GlycoService::new_in_memory().unwrap();
        assert!(svc.search_and_cache(&FailingProvider, "x").await.is_err());
    }

    #[tokio::test]
    async fn test_barcode_lookup_cache() {
        let svc = GlycoService::new_in_memory().unwrap();
        let provider = MockProvider {
            foods: vec![sample_food()],
        };

        let food = svc
            .barcode_lookup(&provider, "1234567890")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(food.name, "Test Food");

        // Served from the cache; the failing provider is never called
        let cached = svc
            .barcode_lookup(&FailingProvider, "1234567890")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cached.id, food.id);
    }

    #[tokio::test]
    async fn test_barcode_lookup_fills_missing_code() {
        struct NoCode;
        impl FoodLookupProvider for NoCode {
            async fn search(&self, _query: &str) -> Result<Vec<NewFood>> {
                Ok(vec![])
            }
            async fn lookup_barcode(&self, _barcode: &str) -> Result<Option<NewFood>> {
                let mut food = sample_food();
                food.barcode = None;
                Ok(Some(food))
            }
        }

        let svc = GlycoService::new_in_memory().unwrap();
        let food = svc.barcode_lookup(&NoCode, "555").await.unwrap().unwrap();
        assert_eq!(food.barcode.as_deref(), Some("555"));
    }

    #[tokio::test]
    async fn test_barcode_lookup_not_found() {
        let svc = GlycoService::new_in_memory().unwrap();
        let provider = MockProvider { foods: vec![] };

        let result = svc.barcode_lookup(&provider, "0000000000").await.unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn test_target_range_default_and_set() {
        let svc = GlycoService::new_in_memory().unwrap();
        assert_eq!(svc.target_range().unwrap(), TargetRange::default());

        let range = svc.set_target_range(70.0, 160.0).unwrap();
        assert!((range.low() - 70.0).abs() < f64::EPSILON);
        assert_eq!(svc.target_range().unwrap(), range);

        // Invalid ranges are rejected and leave the stored one alone
        assert!(svc.set_target_range(200.0, 100.0).is_err());
        assert_eq!(svc.target_range().unwrap(), range);
    }

    #[test]
    fn test_carb_ratio_default_and_set() {
        let svc = GlycoService::new_in_memory().unwrap();
        assert!((svc.carb_ratio().unwrap().grams_per_unit() - 12.0).abs() < f64::EPSILON);
        svc.set_carb_ratio(10.0).unwrap();
        assert!((svc.carb_ratio().unwrap().grams_per_unit() - 10.0).abs() < f64::EPSILON);
        assert!(svc.set_carb_ratio(0.0).is_err());
    }

    #[test]
    fn test_meal_detail_uses_stored_ratio() {
        let svc = GlycoService::new_in_memory().unwrap();
        let (meal, food) = {
            let db = svc.db();
            let food = db.insert_food(&sample_food()).unwrap();
            let meal = db
                .insert_meal(&NewMeal {
                    meal_type: "lunch".to_string(),
                    name: None,
                    eaten_at: at(15, 12),
                    notes: None,
                })
                .unwrap();
            (meal, food)
        };
        svc.db()
            .add_meal_item(
                meal.id,
                &NewMealItem {
                    food_id: food.id,
                    quantity_g: 300.0,
                    notes: None,
                },
            )
            .unwrap();

        let detail = svc.meal_detail(meal.id).unwrap();
        assert!((detail.totals.carbs - 60.0).abs() < 1e-9);
        assert!((detail.totals.estimated_insulin_units - 5.0).abs() < 1e-9);

        svc.set_carb_ratio(15.0).unwrap();
        let detail = svc.meal_detail(meal.id).unwrap();
        assert!((detail.totals.estimated_insulin_units - 4.0).abs() < 1e-9);
    }

    #[test]
    fn test_glucose_statistics_uses_target_range() {
        let svc = GlycoService::new_in_memory().unwrap();
        for (i, v) in [70.0, 90.0, 150.0, 200.0].into_iter().enumerate() {
            log_glucose(&svc, v, at(15, 8 + u32::try_from(i).unwrap()));
        }
        log_glucose(&svc, 400.0, at(16, 8));

        let window = day_window_in(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(), &Utc).unwrap();
        let s = svc.glucose_statistics(window).unwrap();
        assert_eq!(s.count, 4);
        assert!((s.in_range_pct - 50.0).abs() < 1e-9);
        assert!((s.average - 127.5).abs() < 1e-9);

        svc.set_target_range(60.0, 250.0).unwrap();
        let s = svc.glucose_statistics(window).unwrap();
        assert!((s.in_range_pct - 100.0).abs() < 1e-9);
        assert!((s.target_high - 250.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_daily_report_empty_day() {
        let svc = GlycoService::new_in_memory().unwrap();
        let report = svc
            .daily_report_in(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(), &Utc)
            .unwrap();
        assert_eq!(report.date, "2024-06-15");
        assert_eq!(report.meal_count, 0);
        assert_eq!(report.glucose.count, 0);
        assert!((report.carbs).abs() < f64::EPSILON);
        assert!(report.note.is_none());
    }

    #[test]
    fn test_daily_report_combines_day() {
        let svc = GlycoService::new_in_memory().unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        {
            let db = svc.db();
            let food = db.insert_food(&sample_food()).unwrap();
            for (kind, hour) in [("breakfast", 7), ("dinner", 19)] {
                let meal = db
                    .insert_meal(&NewMeal {
                        meal_type: kind.to_string(),
                        name: None,
                        eaten_at: at(15, hour),
                        notes: None,
                    })
                    .unwrap();
                db.add_meal_item(
                    meal.id,
                    &NewMealItem {
                        food_id: food.id,
                        quantity_g: 150.0,
                        notes: None,
                    },
                )
                .unwrap();
            }
            // Next day, excluded
            db.insert_meal(&NewMeal {
                meal_type: "snack".to_string(),
                name: None,
                eaten_at: at(16, 0),
                notes: None,
            })
            .unwrap();
            db.insert_insulin_record(&NewInsulinRecord {
                insulin_type: "rapid".to_string(),
                dose_units: 2.5,
                injected_at: at(15, 7),
                injection_site: None,
                notes: None,
                meal_id: None,
            })
            .unwrap();
            db.upsert_daily_note(
                date,
                &NewDailyNote {
                    notes: Some("long walk".to_string()),
                    ..NewDailyNote::default()
                },
            )
            .unwrap();
        }
        log_glucose(&svc, 120.0, at(15, 9));

        let report = svc.daily_report_in(date, &Utc).unwrap();
        assert_eq!(report.meal_count, 2);
        assert!((report.carbs - 60.0).abs() < 1e-9);
        assert!((report.calories - 300.0).abs() < 1e-9);
        assert!((report.estimated_insulin_units - 5.0).abs() < 1e-9);
        assert!((report.logged_insulin_units - 2.5).abs() < 1e-9);
        assert_eq!(report.insulin_injections, 1);
        assert_eq!(report.glucose.count, 1);
        assert_eq!(
            report.note.and_then(|n| n.notes).as_deref(),
            Some("long walk")
        );
    }

    #[test]
    fn test_day_window_bounds() {
        let w = day_window_in(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(), &Utc).unwrap();
        assert_eq!(w.start, at(15, 0));
        assert_eq!(w.end, at(15, 23) + chrono::Duration::seconds(3599));
    }

    #[test]
    fn test_day_window_in_offset() {
        // UTC-7, e.g. Pacific daylight time
        let pdt = FixedOffset::west_opt(7 * 3600).unwrap();
        let w = day_window_in(NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(), &pdt).unwrap();
        assert_eq!(w.start, at(15, 7));
        assert_eq!(w.end, at(16, 6) + chrono::Duration::seconds(3599));
    }

    #[test]
    fn test_daily_report_follows_local_day() {
        let svc = GlycoService::new_in_memory().unwrap();
        let pdt = FixedOffset::west_opt(7 * 3600).unwrap();
        // 20:00 local on the 15th is 03:00 UTC on the 16th
        let evening = pdt
            .with_ymd_and_hms(2024, 6, 15, 20, 0, 0)
            .unwrap()
            .with_timezone(&Utc);
        log_glucose(&svc, 150.0, evening);
        svc.db()
            .insert_meal(&NewMeal {
                meal_type: "dinner".to_string(),
                name: None,
                eaten_at: evening,
                notes: None,
            })
            .unwrap();

        let d15 = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let d16 = NaiveDate::from_ymd_opt(2024, 6, 16).unwrap();
        let local_15 = svc.daily_report_in(d15, &pdt).unwrap();
        assert_eq!(local_15.glucose.count, 1);
        assert_eq!(local_15.meal_count, 1);
        assert_eq!(local_15.meals.len(), 1);
        assert_eq!(svc.daily_report_in(d16, &pdt).unwrap().glucose.count, 0);

        // The same entry falls on the 16th when days are counted in UTC
        assert_eq!(svc.daily_report_in(d15, &Utc).unwrap().glucose.count, 0);
        assert_eq!(svc.daily_report_in(d16, &Utc).unwrap().glucose.count, 1);
    }

    #[tokio::test]
    async fn test_search_without_barcode_caches_once() {
        let svc = GlycoService::new_in_memory().unwrap();
        let provider = MockProvider {
            foods: vec![NewFood {
                name: "Rye Bread".to_string(),
                barcode: None,
                calories_per_100g: 259.0,
                carbs_per_100g: 48.0,
                source: "openfoodfacts".to_string(),
                ..NewFood::default()
            }],
        };

        for _ in 0..3 {
            let results = svc.search_and_cache(&provider, "rye").await.unwrap();
            assert_eq!(results.len(), 1);
        }
        assert_eq!(svc.db().list_foods(None).unwrap().len(), 1);
    }

    #[test]
    fn test_add_food_rejects_duplicate_barcode() {
        let svc = GlycoService::new_in_memory().unwrap();
        let first = svc.add_food(&sample_food()).unwrap();
        assert_eq!(first.barcode.as_deref(), Some("1234567890"));

        let err = svc
            .add_food(&NewFood {
                name: "Copy".to_string(),
                ..sample_food()
            })
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
        assert_eq!(svc.db().list_foods(None).unwrap().len(), 1);

        let mut bad = sample_food();
        bad.barcode = None;
        bad.calories_per_100g = -5.0;
        assert!(svc.add_food(&bad).is_err());
    }

    #[test]
    fn test_reset_settings_restores_defaults() {
        let svc = GlycoService::new_in_memory().unwrap();
        svc.set_target_range(70.0, 140.0).unwrap();
        svc.set_carb_ratio(8.0).unwrap();

        assert_eq!(svc.reset_target_range().unwrap(), TargetRange::default());
        assert_eq!(svc.target_range().unwrap(), TargetRange::default());
        assert_eq!(svc.reset_carb_ratio().unwrap(), CarbRatio::default());
        assert!((svc.carb_ratio().unwrap().grams_per_unit() - 12.0).abs() < f64::EPSILON);
        // Resetting twice is harmless
        svc.reset_target_range().unwrap();
    }
}
