use std::path::Path;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, params};

use crate::models::{
    DailyNote, Food, GlucoseReading, InsulinRecord, Meal, MealDetail, MealItem, Medication,
    NewDailyNote, NewFood, NewGlucoseReading, NewInsulinRecord, NewMeal, NewMealItem,
    NewMedication, UpdateGlucoseReading, UpdateInsulinRecord, UpdateMeal,
};
use crate::nutrition::{InsulinEstimator, Nutrients, aggregate_meal, scale_portion};

const FOOD_COLUMNS: &str = "id, name, brand, barcode, description, image_url,
    calories_per_100g, carbs_per_100g, sugar_per_100g, fiber_per_100g, protein_per_100g,
    fat_per_100g, sodium_mg_per_100g, glycemic_index, source, created_at, updated_at";

const MEAL_COLUMNS: &str = "id, meal_type, name, eaten_at, notes, created_at, updated_at";

const MEAL_ITEM_SELECT: &str = "SELECT mi.id, mi.meal_id, mi.food_id, f.name, f.brand,
        mi.quantity_g, mi.notes, mi.calories, mi.carbs, mi.sugar, mi.fiber, mi.protein,
        mi.fat, mi.sodium_mg, mi.created_at
     FROM meal_items mi
     JOIN foods f ON mi.food_id = f.id";

const GLUCOSE_COLUMNS: &str =
    "id, value_mg_dl, measured_at, measurement_type, mood, notes, meal_id, created_at";

const INSULIN_COLUMNS: &str =
    "id, insulin_type, dose_units, injected_at, injection_site, notes, meal_id, created_at";

const NOTE_COLUMNS: &str = "id, date, notes, mood, physical_activity, weight_kg, sleep_hours,
    symptoms, created_at, updated_at";

const MEDICATION_COLUMNS: &str = "id, name, brand, medication_type, dosage, frequency,
    instructions, prescribed_by, start_date, end_date, is_active, notes, created_at, updated_at";

/// Timestamps are stored as second-precision RFC 3339 UTC strings so that
/// lexical order matches chronological order.
fn ts(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn now() -> String {
    ts(&Utc::now())
}

fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn date_str(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

fn parse_date_col(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub struct Database {
    conn: Connection,
}

impl Database {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Database { conn };
        db.migrate()?;
        Ok(db)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        let version: i64 = self
            .conn
            .pragma_query_value(None, "user_version", |row| row.get(0))?;

        if version < 1 {
            tracing::info!(from = version, to = 1, "migrating database schema");
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS foods (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    brand TEXT,
                    barcode TEXT UNIQUE,
                    description TEXT,
                    image_url TEXT,
                    calories_per_100g REAL NOT NULL DEFAULT 0,
                    carbs_per_100g REAL NOT NULL DEFAULT 0,
                    sugar_per_100g REAL NOT NULL DEFAULT 0,
                    fiber_per_100g REAL NOT NULL DEFAULT 0,
                    protein_per_100g REAL NOT NULL DEFAULT 0,
                    fat_per_100g REAL NOT NULL DEFAULT 0,
                    sodium_mg_per_100g REAL NOT NULL DEFAULT 0,
                    glycemic_index INTEGER,
                    source TEXT NOT NULL,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meals (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_type TEXT NOT NULL,
                    name TEXT,
                    eaten_at TEXT NOT NULL,
                    notes TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS meal_items (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    meal_id INTEGER NOT NULL REFERENCES meals(id) ON DELETE CASCADE,
                    food_id INTEGER NOT NULL REFERENCES foods(id),
                    quantity_g REAL NOT NULL,
                    notes TEXT,
                    calories REAL NOT NULL,
                    carbs REAL NOT NULL,
                    sugar REAL NOT NULL,
                    fiber REAL NOT NULL,
                    protein REAL NOT NULL,
                    fat REAL NOT NULL,
                    sodium_mg REAL NOT NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS glucose_readings (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    value_mg_dl REAL NOT NULL,
                    measured_at TEXT NOT NULL,
                    measurement_type TEXT NOT NULL,
                    mood TEXT,
                    notes TEXT,
                    meal_id INTEGER REFERENCES meals(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS insulin_records (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    insulin_type TEXT NOT NULL,
                    dose_units REAL NOT NULL,
                    injected_at TEXT NOT NULL,
                    injection_site TEXT,
                    notes TEXT,
                    meal_id INTEGER REFERENCES meals(id) ON DELETE SET NULL,
                    created_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS daily_notes (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    date TEXT NOT NULL UNIQUE,
                    notes TEXT,
                    mood TEXT,
                    physical_activity TEXT,
                    weight_kg REAL,
                    sleep_hours REAL,
                    symptoms TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS user_settings (
                    key TEXT PRIMARY KEY NOT NULL,
                    value TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_foods_name ON foods(name);
                CREATE INDEX IF NOT EXISTS idx_meals_eaten_at ON meals(eaten_at);
                CREATE INDEX IF NOT EXISTS idx_meal_items_meal ON meal_items(meal_id);
                CREATE INDEX IF NOT EXISTS idx_meal_items_food ON meal_items(food_id);
                CREATE INDEX IF NOT EXISTS idx_glucose_measured_at ON glucose_readings(measured_at);
                CREATE INDEX IF NOT EXISTS idx_insulin_injected_at ON insulin_records(injected_at);

                PRAGMA user_version = 1;",
            )?;
        }

        if version < 2 {
            tracing::info!(from = version.max(1), to = 2, "migrating database schema");
            self.conn.execute_batch(
                "CREATE TABLE IF NOT EXISTS medications (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL,
                    brand TEXT,
                    medication_type TEXT NOT NULL,
                    dosage TEXT,
                    frequency TEXT,
                    instructions TEXT,
                    prescribed_by TEXT,
                    start_date TEXT,
                    end_date TEXT,
                    is_active INTEGER NOT NULL DEFAULT 1,
                    notes TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_medications_name ON medications(name);

                PRAGMA user_version = 2;",
            )?;
        }

        Ok(())
    }

    // --- Row mapping helpers ---

    fn food_from_row(row: &rusqlite::Row) -> rusqlite::Result<Food> {
        Ok(Food {
            id: row.get(0)?,
            name: row.get(1)?,
            brand: row.get(2)?,
            barcode: row.get(3)?,
            description: row.get(4)?,
            image_url: row.get(5)?,
            calories_per_100g: row.get(6)?,
            carbs_per_100g: row.get(7)?,
            sugar_per_100g: row.get(8)?,
            fiber_per_100g: row.get(9)?,
            protein_per_100g: row.get(10)?,
            fat_per_100g: row.get(11)?,
            sodium_mg_per_100g: row.get(12)?,
            glycemic_index: row.get(13)?,
            source: row.get(14)?,
            created_at: row.get(15)?,
            updated_at: row.get(16)?,
        })
    }

    fn meal_from_row(row: &rusqlite::Row) -> rusqlite::Result<Meal> {
        let eaten_at: String = row.get(3)?;
        Ok(Meal {
            id: row.get(0)?,
            meal_type: row.get(1)?,
            name: row.get(2)?,
            eaten_at: parse_ts(3, &eaten_at)?,
            notes: row.get(4)?,
            created_at: row.get(5)?,
            updated_at: row.get(6)?,
        })
    }

    // Expects the column order of MEAL_ITEM_SELECT.
    fn meal_item_from_row(row: &rusqlite::Row) -> rusqlite::Result<MealItem> {
        Ok(MealItem {
            id: row.get(0)?,
            meal_id: row.get(1)?,
            food_id: row.get(2)?,
            food_name: row.get(3)?,
            food_brand: row.get(4)?,
            quantity_g: row.get(5)?,
            notes: row.get(6)?,
            nutrients: Nutrients {
                calories: row.get(7)?,
                carbs: row.get(8)?,
                sugar: row.get(9)?,
                fiber: row.get(10)?,
                protein: row.get(11)?,
                fat: row.get(12)?,
                sodium_mg: row.get(13)?,
            },
            created_at: row.get(14)?,
        })
    }

    fn glucose_from_row(row: &rusqlite::Row) -> rusqlite::Result<GlucoseReading> {
        let measured_at: String = row.get(2)?;
        Ok(GlucoseReading {
            id: row.get(0)?,
            value_mg_dl: row.get(1)?,
            measured_at: parse_ts(2, &measured_at)?,
            measurement_type: row.get(3)?,
            mood: row.get(4)?,
            notes: row.get(5)?,
            meal_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn insulin_from_row(row: &rusqlite::Row) -> rusqlite::Result<InsulinRecord> {
        let injected_at: String = row.get(3)?;
        Ok(InsulinRecord {
            id: row.get(0)?,
            insulin_type: row.get(1)?,
            dose_units: row.get(2)?,
            injected_at: parse_ts(3, &injected_at)?,
            injection_site: row.get(4)?,
            notes: row.get(5)?,
            meal_id: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn note_from_row(row: &rusqlite::Row) -> rusqlite::Result<DailyNote> {
        let raw: String = row.get(1)?;
        Ok(DailyNote {
            id: row.get(0)?,
            date: parse_date_col(1, &raw)?,
            notes: row.get(2)?,
            mood: row.get(3)?,
            physical_activity: row.get(4)?,
            weight_kg: row.get(5)?,
            sleep_hours: row.get(6)?,
            symptoms: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
        })
    }

    fn medication_from_row(row: &rusqlite::Row) -> rusqlite::Result<Medication> {
        let start: Option<String> = row.get(8)?;
        let end: Option<String> = row.get(9)?;
        Ok(Medication {
            id: row.get(0)?,
            name: row.get(1)?,
            brand: row.get(2)?,
            medication_type: row.get(3)?,
            dosage: row.get(4)?,
            frequency: row.get(5)?,
            instructions: row.get(6)?,
            prescribed_by: row.get(7)?,
            start_date: start.map(|d| parse_date_col(8, &d)).transpose()?,
            end_date: end.map(|d| parse_date_col(9, &d)).transpose()?,
            is_active: row.get(10)?,
            notes: row.get(11)?,
            created_at: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn row_exists(&self, table: &str, id: i64) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {table} WHERE id = ?1"),
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn food_exists(&self, id: i64) -> Result<bool> {
        self.row_exists("foods", id)
    }

    pub fn meal_exists(&self, id: i64) -> Result<bool> {
        self.row_exists("meals", id)
    }

    pub fn glucose_reading_exists(&self, id: i64) -> Result<bool> {
        self.row_exists("glucose_readings", id)
    }

    pub fn insulin_record_exists(&self, id: i64) -> Result<bool> {
        self.row_exists("insulin_records", id)
    }

    pub fn medication_exists(&self, id: i64) -> Result<bool> {
        self.row_exists("medications", id)
    }

    // --- Foods ---

    pub fn insert_food(&self, food: &NewFood) -> Result<Food> {
        let now = now();
        self.conn.execute(
            "INSERT INTO foods (name, brand, barcode, description, image_url,
                calories_per_100g, carbs_per_100g, sugar_per_100g, fiber_per_100g,
                protein_per_100g, fat_per_100g, sodium_mg_per_100g, glycemic_index,
                source, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?15)",
            params![
                food.name,
                food.brand,
                food.barcode,
                food.description,
                food.image_url,
                food.calories_per_100g,
                food.carbs_per_100g,
                food.sugar_per_100g,
                food.fiber_per_100g,
                food.protein_per_100g,
                food.fat_per_100g,
                food.sodium_mg_per_100g,
                food.glycemic_index,
                food.source,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_food_by_id(id)
    }

    /// Insert a food unless an equivalent one is already stored. Foods with a
    /// barcode match on it; foods without one match on name, brand and source
    /// among the other barcode-less rows.
    pub fn upsert_food_by_barcode(&self, food: &NewFood) -> Result<Food> {
        let existing = match &food.barcode {
            Some(barcode) => self.get_food_by_barcode(barcode)?,
            None => self.find_unbarcoded_food(&food.name, food.brand.as_deref(), &food.source)?,
        };
        match existing {
            Some(existing) => Ok(existing),
            None => self.insert_food(food),
        }
    }

    fn find_unbarcoded_food(
        &self,
        name: &str,
        brand: Option<&str>,
        source: &str,
    ) -> Result<Option<Food>> {
        let food = self
            .conn
            .query_row(
                &format!(
                    "SELECT {FOOD_COLUMNS} FROM foods
                     WHERE barcode IS NULL AND name = ?1 AND brand IS ?2 AND source = ?3
                     ORDER BY id LIMIT 1"
                ),
                params![name, brand, source],
                Self::food_from_row,
            )
            .optional()?;
        Ok(food)
    }

    pub fn get_food_by_id(&self, id: i64) -> Result<Food> {
        self.conn
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE id = ?1"),
                params![id],
                Self::food_from_row,
            )
            .context("Food not found")
    }

    pub fn get_food_by_barcode(&self, barcode: &str) -> Result<Option<Food>> {
        let food = self
            .conn
            .query_row(
                &format!("SELECT {FOOD_COLUMNS} FROM foods WHERE barcode = ?1"),
                params![barcode],
                Self::food_from_row,
            )
            .optional()?;
        Ok(food)
    }

    pub fn search_foods_local(&self, query: &str) -> Result<Vec<Food>> {
        let escaped = query
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        let pattern = format!("%{escaped}%");
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {FOOD_COLUMNS} FROM foods
             WHERE name LIKE ?1 ESCAPE '\\' OR brand LIKE ?1 ESCAPE '\\'
             ORDER BY name LIMIT 20"
        ))?;
        let foods = stmt
            .query_map(params![pattern], Self::food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }

    pub fn list_foods(&self, search: Option<&str>) -> Result<Vec<Food>> {
        if let Some(query) = search {
            return self.search_foods_local(query);
        }
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT {FOOD_COLUMNS} FROM foods ORDER BY name LIMIT 100"))?;
        let foods = stmt
            .query_map([], Self::food_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(foods)
    }

    /// Replace a food's fields. Meal items keep the values they were logged with.
    pub fn update_food(&self, id: i64, food: &NewFood) -> Result<Food> {
        let rows = self.conn.execute(
            "UPDATE foods SET name = ?1, brand = ?2, barcode = ?3, description = ?4,
                image_url = ?5, calories_per_100g = ?6, carbs_per_100g = ?7,
                sugar_per_100g = ?8, fiber_per_100g = ?9, protein_per_100g = ?10,
                fat_per_100g = ?11, sodium_mg_per_100g = ?12, glycemic_index = ?13,
                source = ?14, updated_at = ?15
             WHERE id = ?16",
            params![
                food.name,
                food.brand,
                food.barcode,
                food.description,
                food.image_url,
                food.calories_per_100g,
                food.carbs_per_100g,
                food.sugar_per_100g,
                food.fiber_per_100g,
                food.protein_per_100g,
                food.fat_per_100g,
                food.sodium_mg_per_100g,
                food.glycemic_index,
                food.source,
                now(),
                id,
            ],
        )?;
        if rows == 0 {
            bail!("Food not found");
        }
        self.get_food_by_id(id)
    }

    /// Number of meal items referencing a food.
    pub fn food_usage_count(&self, id: i64) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM meal_items WHERE food_id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Delete a food. Refused while any meal item still references it.
    pub fn delete_food(&self, id: i64) -> Result<bool> {
        let used = self.food_usage_count(id)?;
        if used > 0 {
            bail!("Food {id} is used by {used} meal item(s) and cannot be deleted");
        }
        let rows = self
            .conn
            .execute("DELETE FROM foods WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- Meals ---

    pub fn insert_meal(&self, meal: &NewMeal) -> Result<Meal> {
        let now = now();
        self.conn.execute(
            "INSERT INTO meals (meal_type, name, eaten_at, notes, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
            params![meal.meal_type, meal.name, ts(&meal.eaten_at), meal.notes, now],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_meal(id)
    }

    pub fn get_meal(&self, id: i64) -> Result<Meal> {
        self.conn
            .query_row(
                &format!("SELECT {MEAL_COLUMNS} FROM meals WHERE id = ?1"),
                params![id],
                Self::meal_from_row,
            )
            .context("Meal not found")
    }

    pub fn update_meal(&self, id: i64, update: &UpdateMeal) -> Result<Meal> {
        let current = self.get_meal(id)?;
        let meal_type = update.meal_type.clone().unwrap_or(current.meal_type);
        let name = update.name.clone().unwrap_or(current.name);
        let eaten_at = update.eaten_at.unwrap_or(current.eaten_at);
        let notes = update.notes.clone().unwrap_or(current.notes);
        self.conn.execute(
            "UPDATE meals SET meal_type = ?1, name = ?2, eaten_at = ?3, notes = ?4, updated_at = ?5
             WHERE id = ?6",
            params![meal_type, name, ts(&eaten_at), notes, now(), id],
        )?;
        self.get_meal(id)
    }

    /// Delete a meal and its items. Linked glucose and insulin entries are kept
    /// with their meal link cleared.
    pub fn delete_meal(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM meals WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Meals eaten within `[start, end]`, newest first. Open bounds are unbounded.
    pub fn list_meals(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<Meal>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEAL_COLUMNS} FROM meals
             WHERE (?1 IS NULL OR eaten_at >= ?1) AND (?2 IS NULL OR eaten_at <= ?2)
             ORDER BY eaten_at DESC, id DESC"
        ))?;
        let meals = stmt
            .query_map(
                params![start.as_ref().map(ts), end.as_ref().map(ts)],
                Self::meal_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meals)
    }

    /// Add a food to a meal, storing the portion computed from the food's
    /// current per-100g profile.
    pub fn add_meal_item(&self, meal_id: i64, item: &NewMealItem) -> Result<MealItem> {
        self.get_meal(meal_id)?;
        let food = self.get_food_by_id(item.food_id)?;
        let portion = scale_portion(&food.profile(), item.quantity_g)?;

        self.conn.execute(
            "INSERT INTO meal_items (meal_id, food_id, quantity_g, notes, calories, carbs,
                sugar, fiber, protein, fat, sodium_mg, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                meal_id,
                item.food_id,
                item.quantity_g,
                item.notes,
                portion.calories,
                portion.carbs,
                portion.sugar,
                portion.fiber,
                portion.protein,
                portion.fat,
                portion.sodium_mg,
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.touch_meal(meal_id)?;
        self.get_meal_item(id)
    }

    pub fn get_meal_item(&self, id: i64) -> Result<MealItem> {
        self.conn
            .query_row(
                &format!("{MEAL_ITEM_SELECT} WHERE mi.id = ?1"),
                params![id],
                Self::meal_item_from_row,
            )
            .context("Meal item not found")
    }

    pub fn remove_meal_item(&self, id: i64) -> Result<bool> {
        let meal_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT meal_id FROM meal_items WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(meal_id) = meal_id else {
            return Ok(false);
        };
        self.conn
            .execute("DELETE FROM meal_items WHERE id = ?1", params![id])?;
        self.touch_meal(meal_id)?;
        Ok(true)
    }

    pub fn get_meal_items(&self, meal_id: i64) -> Result<Vec<MealItem>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{MEAL_ITEM_SELECT} WHERE mi.meal_id = ?1 ORDER BY mi.id"))?;
        let items = stmt
            .query_map(params![meal_id], Self::meal_item_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(items)
    }

    fn touch_meal(&self, meal_id: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE meals SET updated_at = ?1 WHERE id = ?2",
            params![now(), meal_id],
        )?;
        Ok(())
    }

    fn detail_for(&self, meal: Meal, estimator: &dyn InsulinEstimator) -> Result<MealDetail> {
        let items = self.get_meal_items(meal.id)?;
        let totals = aggregate_meal(items.iter().map(|i| &i.nutrients), estimator);
        Ok(MealDetail {
            meal,
            items,
            totals,
        })
    }

    /// A meal with its items and totals aggregated from the current item set.
    pub fn get_meal_detail(&self, id: i64, estimator: &dyn InsulinEstimator) -> Result<MealDetail> {
        let meal = self.get_meal(id)?;
        self.detail_for(meal, estimator)
    }

    pub fn list_meal_details(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        estimator: &dyn InsulinEstimator,
    ) -> Result<Vec<MealDetail>> {
        self.list_meals(start, end)?
            .into_iter()
            .map(|meal| self.detail_for(meal, estimator))
            .collect()
    }

    // --- Glucose readings ---

    pub fn insert_glucose_reading(&self, reading: &NewGlucoseReading) -> Result<GlucoseReading> {
        self.conn.execute(
            "INSERT INTO glucose_readings (value_mg_dl, measured_at, measurement_type, mood,
                notes, meal_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                reading.value_mg_dl,
                ts(&reading.measured_at),
                reading.measurement_type,
                reading.mood,
                reading.notes,
                reading.meal_id,
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_glucose_reading(id)
    }

    pub fn get_glucose_reading(&self, id: i64) -> Result<GlucoseReading> {
        self.conn
            .query_row(
                &format!("SELECT {GLUCOSE_COLUMNS} FROM glucose_readings WHERE id = ?1"),
                params![id],
                Self::glucose_from_row,
            )
            .context("Glucose reading not found")
    }

    pub fn update_glucose_reading(
        &self,
        id: i64,
        update: &UpdateGlucoseReading,
    ) -> Result<GlucoseReading> {
        let current = self.get_glucose_reading(id)?;
        let value = update.value_mg_dl.unwrap_or(current.value_mg_dl);
        let measured_at = update.measured_at.unwrap_or(current.measured_at);
        let measurement_type = update
            .measurement_type
            .clone()
            .unwrap_or(current.measurement_type);
        let mood = update.mood.clone().unwrap_or(current.mood);
        let notes = update.notes.clone().unwrap_or(current.notes);
        let meal_id = update.meal_id.unwrap_or(current.meal_id);
        self.conn.execute(
            "UPDATE glucose_readings SET value_mg_dl = ?1, measured_at = ?2,
                measurement_type = ?3, mood = ?4, notes = ?5, meal_id = ?6
             WHERE id = ?7",
            params![value, ts(&measured_at), measurement_type, mood, notes, meal_id, id],
        )?;
        self.get_glucose_reading(id)
    }

    pub fn delete_glucose_reading(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM glucose_readings WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    /// Readings measured within `[start, end]`, newest first.
    pub fn list_glucose_readings(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<GlucoseReading>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {GLUCOSE_COLUMNS} FROM glucose_readings
             WHERE (?1 IS NULL OR measured_at >= ?1) AND (?2 IS NULL OR measured_at <= ?2)
             ORDER BY measured_at DESC, id DESC"
        ))?;
        let readings = stmt
            .query_map(
                params![start.as_ref().map(ts), end.as_ref().map(ts)],
                Self::glucose_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(readings)
    }

    // --- Insulin records ---

    pub fn insert_insulin_record(&self, record: &NewInsulinRecord) -> Result<InsulinRecord> {
        self.conn.execute(
            "INSERT INTO insulin_records (insulin_type, dose_units, injected_at, injection_site,
                notes, meal_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                record.insulin_type,
                record.dose_units,
                ts(&record.injected_at),
                record.injection_site,
                record.notes,
                record.meal_id,
                now(),
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_insulin_record(id)
    }

    pub fn get_insulin_record(&self, id: i64) -> Result<InsulinRecord> {
        self.conn
            .query_row(
                &format!("SELECT {INSULIN_COLUMNS} FROM insulin_records WHERE id = ?1"),
                params![id],
                Self::insulin_from_row,
            )
            .context("Insulin record not found")
    }

    pub fn update_insulin_record(
        &self,
        id: i64,
        update: &UpdateInsulinRecord,
    ) -> Result<InsulinRecord> {
        let current = self.get_insulin_record(id)?;
        let insulin_type = update.insulin_type.clone().unwrap_or(current.insulin_type);
        let dose = update.dose_units.unwrap_or(current.dose_units);
        let injected_at = update.injected_at.unwrap_or(current.injected_at);
        let site = update
            .injection_site
            .clone()
            .unwrap_or(current.injection_site);
        let notes = update.notes.clone().unwrap_or(current.notes);
        let meal_id = update.meal_id.unwrap_or(current.meal_id);
        self.conn.execute(
            "UPDATE insulin_records SET insulin_type = ?1, dose_units = ?2, injected_at = ?3,
                injection_site = ?4, notes = ?5, meal_id = ?6
             WHERE id = ?7",
            params![insulin_type, dose, ts(&injected_at), site, notes, meal_id, id],
        )?;
        self.get_insulin_record(id)
    }

    pub fn delete_insulin_record(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM insulin_records WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn list_insulin_records(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<InsulinRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {INSULIN_COLUMNS} FROM insulin_records
             WHERE (?1 IS NULL OR injected_at >= ?1) AND (?2 IS NULL OR injected_at <= ?2)
             ORDER BY injected_at DESC, id DESC"
        ))?;
        let records = stmt
            .query_map(
                params![start.as_ref().map(ts), end.as_ref().map(ts)],
                Self::insulin_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    // --- Daily notes ---

    /// Create or replace the note for `date`.
    pub fn upsert_daily_note(&self, date: NaiveDate, note: &NewDailyNote) -> Result<DailyNote> {
        let now = now();
        self.conn.execute(
            "INSERT INTO daily_notes (date, notes, mood, physical_activity, weight_kg,
                sleep_hours, symptoms, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
             ON CONFLICT(date) DO UPDATE SET
                notes = excluded.notes,
                mood = excluded.mood,
                physical_activity = excluded.physical_activity,
                weight_kg = excluded.weight_kg,
                sleep_hours = excluded.sleep_hours,
                symptoms = excluded.symptoms,
                updated_at = excluded.updated_at",
            params![
                date_str(date),
                note.notes,
                note.mood,
                note.physical_activity,
                note.weight_kg,
                note.sleep_hours,
                note.symptoms,
                now,
            ],
        )?;
        self.get_daily_note(date)?
            .context("Daily note not found after upsert")
    }

    pub fn get_daily_note(&self, date: NaiveDate) -> Result<Option<DailyNote>> {
        let note = self
            .conn
            .query_row(
                &format!("SELECT {NOTE_COLUMNS} FROM daily_notes WHERE date = ?1"),
                params![date_str(date)],
                Self::note_from_row,
            )
            .optional()?;
        Ok(note)
    }

    pub fn list_daily_notes(
        &self,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<DailyNote>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {NOTE_COLUMNS} FROM daily_notes
             WHERE (?1 IS NULL OR date >= ?1) AND (?2 IS NULL OR date <= ?2)
             ORDER BY date DESC"
        ))?;
        let notes = stmt
            .query_map(
                params![start.map(date_str), end.map(date_str)],
                Self::note_from_row,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(notes)
    }

    pub fn delete_daily_note(&self, date: NaiveDate) -> Result<bool> {
        let rows = self.conn.execute(
            "DELETE FROM daily_notes WHERE date = ?1",
            params![date_str(date)],
        )?;
        Ok(rows > 0)
    }

    // --- Medications ---

    pub fn insert_medication(&self, med: &NewMedication) -> Result<Medication> {
        let now = now();
        self.conn.execute(
            "INSERT INTO medications (name, brand, medication_type, dosage, frequency,
                instructions, prescribed_by, start_date, end_date, is_active, notes,
                created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?12)",
            params![
                med.name,
                med.brand,
                med.medication_type,
                med.dosage,
                med.frequency,
                med.instructions,
                med.prescribed_by,
                med.start_date.map(date_str),
                med.end_date.map(date_str),
                med.is_active,
                med.notes,
                now,
            ],
        )?;
        let id = self.conn.last_insert_rowid();
        self.get_medication(id)
    }

    pub fn get_medication(&self, id: i64) -> Result<Medication> {
        self.conn
            .query_row(
                &format!("SELECT {MEDICATION_COLUMNS} FROM medications WHERE id = ?1"),
                params![id],
                Self::medication_from_row,
            )
            .context("Medication not found")
    }

    /// Medications ordered by name; `active_only` hides discontinued ones.
    pub fn list_medications(&self, active_only: bool) -> Result<Vec<Medication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {MEDICATION_COLUMNS} FROM medications
             WHERE (?1 = 0 OR is_active = 1)
             ORDER BY name COLLATE NOCASE, id"
        ))?;
        let meds = stmt
            .query_map(params![active_only], Self::medication_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(meds)
    }

    /// Replace every field of a medication.
    pub fn update_medication(&self, id: i64, med: &NewMedication) -> Result<Medication> {
        let rows = self.conn.execute(
            "UPDATE medications SET name = ?1, brand = ?2, medication_type = ?3, dosage = ?4,
                frequency = ?5, instructions = ?6, prescribed_by = ?7, start_date = ?8,
                end_date = ?9, is_active = ?10, notes = ?11, updated_at = ?12
             WHERE id = ?13",
            params![
                med.name,
                med.brand,
                med.medication_type,
                med.dosage,
                med.frequency,
                med.instructions,
                med.prescribed_by,
                med.start_date.map(date_str),
                med.end_date.map(date_str),
                med.is_active,
                med.notes,
                now(),
                id,
            ],
        )?;
        if rows == 0 {
            bail!("Medication not found");
        }
        self.get_medication(id)
    }

    pub fn delete_medication(&self, id: i64) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM medications WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    // --- User Settings ---

    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO user_settings (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now()],
        )?;
        Ok(())
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM user_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn delete_setting(&self, key: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM user_settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }
}
