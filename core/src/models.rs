use anyhow::{Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::glucose::GlucoseSummary;
use crate::nutrition::{MealTotals, Nutrients};

pub const MEAL_TYPES: &[&str] = &["breakfast", "lunch", "dinner", "snack"];
pub const MEASUREMENT_TYPES: &[&str] = &["fasting", "pre_meal", "post_meal", "bedtime", "random"];
pub const INSULIN_TYPES: &[&str] = &["rapid", "long", "mixed"];
pub const MEDICATION_TYPES: &[&str] = &["insulin", "oral", "injectable"];

pub const MAX_QUANTITY_G: f64 = 10_000.0;
pub const MIN_GLUCOSE_MG_DL: f64 = 1.0;
pub const MAX_GLUCOSE_MG_DL: f64 = 1000.0;
pub const MIN_INSULIN_DOSE: f64 = 0.1;
pub const MAX_INSULIN_DOSE: f64 = 100.0;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Food {
    pub id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub calories_per_100g: f64,
    pub carbs_per_100g: f64,
    pub sugar_per_100g: f64,
    pub fiber_per_100g: f64,
    pub protein_per_100g: f64,
    pub fat_per_100g: f64,
    pub sodium_mg_per_100g: f64,
    pub glycemic_index: Option<i64>,
    pub source: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Food {
    /// Nutrient profile per 100 grams.
    #[must_use]
    pub fn profile(&self) -> Nutrients {
        Nutrients {
            calories: self.calories_per_100g,
            carbs: self.carbs_per_100g,
            sugar: self.sugar_per_100g,
            fiber: self.fiber_per_100g,
            protein: self.protein_per_100g,
            fat: self.fat_per_100g,
            sodium_mg: self.sodium_mg_per_100g,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewFood {
    pub name: String,
    pub brand: Option<String>,
    pub barcode: Option<String>,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub calories_per_100g: f64,
    #[serde(default)]
    pub carbs_per_100g: f64,
    #[serde(default)]
    pub sugar_per_100g: f64,
    #[serde(default)]
    pub fiber_per_100g: f64,
    #[serde(default)]
    pub protein_per_100g: f64,
    #[serde(default)]
    pub fat_per_100g: f64,
    #[serde(default)]
    pub sodium_mg_per_100g: f64,
    pub glycemic_index: Option<i64>,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "manual".to_string()
}

impl Default for NewFood {
    fn default() -> Self {
        Self {
            name: String::new(),
            brand: None,
            barcode: None,
            description: None,
            image_url: None,
            calories_per_100g: 0.0,
            carbs_per_100g: 0.0,
            sugar_per_100g: 0.0,
            fiber_per_100g: 0.0,
            protein_per_100g: 0.0,
            fat_per_100g: 0.0,
            sodium_mg_per_100g: 0.0,
            glycemic_index: None,
            source: default_source(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Meal {
    pub id: i64,
    pub meal_type: String,
    pub name: Option<String>,
    pub eaten_at: DateTime<Utc>,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMeal {
    pub meal_type: String,
    pub name: Option<String>,
    pub eaten_at: DateTime<Utc>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateMeal {
    pub meal_type: Option<String>,
    pub name: Option<Option<String>>,
    pub eaten_at: Option<DateTime<Utc>>,
    pub notes: Option<Option<String>>,
}

impl UpdateMeal {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.meal_type.is_none()
            && self.name.is_none()
            && self.eaten_at.is_none()
            && self.notes.is_none()
    }
}

/// One food in a meal. The nutrient values are the portion computed when the
/// item was added, so later edits to the food do not rewrite past meals.
#[derive(Debug, Clone, Serialize)]
pub struct MealItem {
    pub id: i64,
    pub meal_id: i64,
    pub food_id: i64,
    pub food_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub food_brand: Option<String>,
    pub quantity_g: f64,
    pub notes: Option<String>,
    pub nutrients: Nutrients,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewMealItem {
    pub food_id: i64,
    pub quantity_g: f64,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MealDetail {
    #[serde(flatten)]
    pub meal: Meal,
    pub items: Vec<MealItem>,
    pub totals: MealTotals,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlucoseReading {
    pub id: i64,
    pub value_mg_dl: f64,
    pub measured_at: DateTime<Utc>,
    pub measurement_type: String,
    pub mood: Option<String>,
    pub notes: Option<String>,
    pub meal_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewGlucoseReading {
    pub value_mg_dl: f64,
    pub measured_at: DateTime<Utc>,
    pub measurement_type: String,
    pub mood: Option<String>,
    pub notes: Option<String>,
    pub meal_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateGlucoseReading {
    pub value_mg_dl: Option<f64>,
    pub measured_at: Option<DateTime<Utc>>,
    pub measurement_type: Option<String>,
    pub mood: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub meal_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InsulinRecord {
    pub id: i64,
    pub insulin_type: String,
    pub dose_units: f64,
    pub injected_at: DateTime<Utc>,
    pub injection_site: Option<String>,
    pub notes: Option<String>,
    pub meal_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone)]
pub struct NewInsulinRecord {
    pub insulin_type: String,
    pub dose_units: f64,
    pub injected_at: DateTime<Utc>,
    pub injection_site: Option<String>,
    pub notes: Option<String>,
    pub meal_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateInsulinRecord {
    pub insulin_type: Option<String>,
    pub dose_units: Option<f64>,
    pub injected_at: Option<DateTime<Utc>>,
    pub injection_site: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub meal_id: Option<Option<i64>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyNote {
    pub id: i64,
    pub date: NaiveDate,
    pub notes: Option<String>,
    pub mood: Option<String>,
    pub physical_activity: Option<String>,
    pub weight_kg: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub symptoms: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewDailyNote {
    pub notes: Option<String>,
    pub mood: Option<String>,
    pub physical_activity: Option<String>,
    pub weight_kg: Option<f64>,
    pub sleep_hours: Option<f64>,
    pub symptoms: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Medication {
    pub id: i64,
    pub name: String,
    pub brand: Option<String>,
    pub medication_type: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub prescribed_by: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMedication {
    pub name: String,
    pub brand: Option<String>,
    pub medication_type: String,
    pub dosage: Option<String>,
    pub frequency: Option<String>,
    pub instructions: Option<String>,
    pub prescribed_by: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default)]
#[allow(clippy::option_option)]
pub struct UpdateMedication {
    pub name: Option<String>,
    pub brand: Option<Option<String>>,
    pub medication_type: Option<String>,
    pub dosage: Option<Option<String>>,
    pub frequency: Option<Option<String>>,
    pub instructions: Option<Option<String>>,
    pub prescribed_by: Option<Option<String>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub is_active: Option<bool>,
    pub notes: Option<Option<String>>,
}

impl UpdateMedication {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.brand.is_none()
            && self.medication_type.is_none()
            && self.dosage.is_none()
            && self.frequency.is_none()
            && self.instructions.is_none()
            && self.prescribed_by.is_none()
            && self.start_date.is_none()
            && self.end_date.is_none()
            && self.is_active.is_none()
            && self.notes.is_none()
    }

    /// The full record that results from applying this update to `current`.
    #[must_use]
    pub fn merge(&self, current: &Medication) -> NewMedication {
        NewMedication {
            name: self.name.clone().unwrap_or_else(|| current.name.clone()),
            brand: self.brand.clone().unwrap_or_else(|| current.brand.clone()),
            medication_type: self
                .medication_type
                .clone()
                .unwrap_or_else(|| current.medication_type.clone()),
            dosage: self.dosage.clone().unwrap_or_else(|| current.dosage.clone()),
            frequency: self
                .frequency
                .clone()
                .unwrap_or_else(|| current.frequency.clone()),
            instructions: self
                .instructions
                .clone()
                .unwrap_or_else(|| current.instructions.clone()),
            prescribed_by: self
                .prescribed_by
                .clone()
                .unwrap_or_else(|| current.prescribed_by.clone()),
            start_date: self.start_date.unwrap_or(current.start_date),
            end_date: self.end_date.unwrap_or(current.end_date),
            is_active: self.is_active.unwrap_or(current.is_active),
            notes: self.notes.clone().unwrap_or_else(|| current.notes.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyReport {
    pub date: String,
    pub glucose: GlucoseSummary,
    pub meals: Vec<MealDetail>,
    pub meal_count: usize,
    pub calories: f64,
    pub carbs: f64,
    pub estimated_insulin_units: f64,
    pub logged_insulin_units: f64,
    pub insulin_injections: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<DailyNote>,
}

fn validate_choice(kind: &str, value: &str, allowed: &[&str]) -> Result<String> {
    let normalized = value.trim().to_lowercase().replace(['-', ' '], "_");
    if allowed.contains(&normalized.as_str()) {
        Ok(normalized)
    } else {
        bail!("Invalid {kind} '{value}'. Must be one of: {}", allowed.join(", "))
    }
}

pub fn validate_meal_type(meal: &str) -> Result<String> {
    validate_choice("meal type", meal, MEAL_TYPES)
}

/// Accepts `pre-meal`, `Pre Meal` and `pre_meal` alike.
pub fn validate_measurement_type(kind: &str) -> Result<String> {
    validate_choice("measurement type", kind, MEASUREMENT_TYPES)
}

pub fn validate_insulin_type(kind: &str) -> Result<String> {
    validate_choice("insulin type", kind, INSULIN_TYPES)
}

pub fn validate_medication_type(kind: &str) -> Result<String> {
    validate_choice("medication type", kind, MEDICATION_TYPES)
}

pub fn validate_glucose_value(value: f64) -> Result<()> {
    if !(MIN_GLUCOSE_MG_DL..=MAX_GLUCOSE_MG_DL).contains(&value) {
        bail!("Glucose value must be between {MIN_GLUCOSE_MG_DL} and {MAX_GLUCOSE_MG_DL} mg/dL");
    }
    Ok(())
}

pub fn validate_insulin_dose(dose: f64) -> Result<()> {
    if !(MIN_INSULIN_DOSE..=MAX_INSULIN_DOSE).contains(&dose) {
        bail!("Insulin dose must be between {MIN_INSULIN_DOSE} and {MAX_INSULIN_DOSE} units");
    }
    Ok(())
}

/// Meal item quantity: greater than 0, at most 10 kg.
pub fn validate_quantity(quantity_g: f64) -> Result<()> {
    if quantity_g.is_nan() || quantity_g <= 0.0 {
        bail!("quantity_g must be greater than 0");
    }
    if quantity_g > MAX_QUANTITY_G {
        bail!("quantity_g must not exceed {MAX_QUANTITY_G}");
    }
    Ok(())
}

/// Validate a manually entered food: non-empty name, no negative nutrients,
/// glycemic index within 0-100.
pub fn validate_food_data(food: &NewFood) -> Result<()> {
    if food.name.trim().is_empty() {
        bail!("Food name must not be empty");
    }
    let fields = [
        ("calories_per_100g", food.calories_per_100g),
        ("carbs_per_100g", food.carbs_per_100g),
        ("sugar_per_100g", food.sugar_per_100g),
        ("fiber_per_100g", food.fiber_per_100g),
        ("protein_per_100g", food.protein_per_100g),
        ("fat_per_100g", food.fat_per_100g),
        ("sodium_mg_per_100g", food.sodium_mg_per_100g),
    ];
    for (name, value) in fields {
        if value.is_nan() || value < 0.0 {
            bail!("{name} must not be negative");
        }
    }
    if food.glycemic_index.is_some_and(|gi| !(0..=100).contains(&gi)) {
        bail!("glycemic_index must be between 0 and 100");
    }
    Ok(())
}

pub fn validate_daily_note(note: &NewDailyNote) -> Result<()> {
    if note.weight_kg.is_some_and(|w| w.is_nan() || w <= 0.0) {
        bail!("weight_kg must be greater than 0");
    }
    if note.sleep_hours.is_some_and(|h| !(0.0..=24.0).contains(&h)) {
        bail!("sleep_hours must be between 0 and 24");
    }
    Ok(())
}

/// Trims the name, normalizes the type and checks the date range.
pub fn validate_medication(med: &mut NewMedication) -> Result<()> {
    med.name = med.name.trim().to_string();
    if med.name.is_empty() {
        bail!("Medication name must not be empty");
    }
    med.medication_type = validate_medication_type(&med.medication_type)?;
    if let (Some(start), Some(end)) = (med.start_date, med.end_date) {
        if end < start {
            bail!("end_date must not be before start_date");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_food() -> NewFood {
        NewFood {
            name: "Oatmeal".to_string(),
            calories_per_100g: 389.0,
            carbs_per_100g: 66.3,
            fiber_per_100g: 10.6,
            protein_per_100g: 16.9,
            fat_per_100g: 6.9,
            glycemic_index: Some(55),
            ..NewFood::default()
        }
    }

    #[test]
    fn test_valid_meal_types() {
        assert_eq!(validate_meal_type("breakfast").unwrap(), "breakfast");
        assert_eq!(validate_meal_type("lunch").unwrap(), "lunch");
        assert_eq!(validate_meal_type("dinner").unwrap(), "dinner");
        assert_eq!(validate_meal_type("snack").unwrap(), "snack");
    }

    #[test]
    fn test_invalid_meal_type() {
        assert!(validate_meal_type("brunch").is_err());
        assert!(validate_meal_type("").is_err());
    }

    #[test]
    fn test_meal_type_case_insensitive() {
        assert_eq!(validate_meal_type("Lunch").unwrap(), "lunch");
        assert_eq!(validate_meal_type("BREAKFAST").unwrap(), "breakfast");
    }

    #[test]
    fn test_measurement_type_normalized() {
        assert_eq!(validate_measurement_type("pre-meal").unwrap(), "pre_meal");
        assert_eq!(validate_measurement_type("Post Meal").unwrap(), "post_meal");
        assert_eq!(validate_measurement_type("FASTING").unwrap(), "fasting");
        assert!(validate_measurement_type("after_lunch").is_err());
    }

    #[test]
    fn test_insulin_type() {
        assert_eq!(validate_insulin_type("Rapid").unwrap(), "rapid");
        assert!(validate_insulin_type("slow").is_err());
    }

    #[test]
    fn test_glucose_value_bounds() {
        assert!(validate_glucose_value(1.0).is_ok());
        assert!(validate_glucose_value(1000.0).is_ok());
        assert!(validate_glucose_value(0.5).is_err());
        assert!(validate_glucose_value(1000.1).is_err());
        assert!(validate_glucose_value(f64::NAN).is_err());
    }

    #[test]
    fn test_insulin_dose_bounds() {
        assert!(validate_insulin_dose(0.1).is_ok());
        assert!(validate_insulin_dose(100.0).is_ok());
        assert!(validate_insulin_dose(0.0).is_err());
        assert!(validate_insulin_dose(120.0).is_err());
    }

    #[test]
    fn test_quantity_bounds() {
        assert!(validate_quantity(150.0).is_ok());
        assert!(validate_quantity(10_000.0).is_ok());
        assert!(validate_quantity(0.0).is_err());
        assert!(validate_quantity(-50.0).is_err());
        assert!(validate_quantity(10_000.5).is_err());
    }

    #[test]
    fn test_validate_food_data_valid() {
        assert!(validate_food_data(&sample_food()).is_ok());
    }

    #[test]
    fn test_validate_food_data_empty_name() {
        let mut food = sample_food();
        food.name = "  ".to_string();
        assert!(validate_food_data(&food).is_err());
    }

    #[test]
    fn test_validate_food_data_negative_nutrient() {
        let mut food = sample_food();
        food.sugar_per_100g = -1.0;
        let err = validate_food_data(&food).unwrap_err();
        assert!(err.to_string().contains("sugar_per_100g"));
    }

    #[test]
    fn test_validate_food_data_glycemic_index() {
        let mut food = sample_food();
        food.glycemic_index = Some(101);
        assert!(validate_food_data(&food).is_err());
    }

    #[test]
    fn test_validate_daily_note() {
        assert!(validate_daily_note(&NewDailyNote::default()).is_ok());
        let note = NewDailyNote {
            sleep_hours: Some(25.0),
            ..NewDailyNote::default()
        };
        assert!(validate_daily_note(&note).is_err());
        let note = NewDailyNote {
            weight_kg: Some(0.0),
            ..NewDailyNote::default()
        };
        assert!(validate_daily_note(&note).is_err());
    }

    #[test]
    fn test_food_profile() {
        let food = Food {
            id: 1,
            name: "Apple".to_string(),
            brand: None,
            barcode: None,
            description: None,
            image_url: None,
            calories_per_100g: 52.0,
            carbs_per_100g: 13.8,
            sugar_per_100g: 10.4,
            fiber_per_100g: 2.4,
            protein_per_100g: 0.3,
            fat_per_100g: 0.2,
            sodium_mg_per_100g: 1.0,
            glycemic_index: Some(36),
            source: "manual".to_string(),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let p = food.profile();
        assert!((p.carbs - 13.8).abs() < f64::EPSILON);
        assert!((p.sodium_mg - 1.0).abs() < f64::EPSILON);
    }

    fn metformin() -> NewMedication {
        NewMedication {
            name: " Metformin ".to_string(),
            brand: None,
            medication_type: "Oral".to_string(),
            dosage: Some("500 mg".to_string()),
            frequency: Some("twice daily".to_string()),
            instructions: None,
            prescribed_by: None,
            start_date: NaiveDate::from_ymd_opt(2024, 1, 10),
            end_date: None,
            is_active: true,
            notes: None,
        }
    }

    #[test]
    fn test_validate_medication_normalizes() {
        let mut med = metformin();
        validate_medication(&mut med).unwrap();
        assert_eq!(med.name, "Metformin");
        assert_eq!(med.medication_type, "oral");
    }

    #[test]
    fn test_validate_medication_rejects_bad_input() {
        let mut med = metformin();
        med.medication_type = "herbal".to_string();
        assert!(validate_medication(&mut med).is_err());

        let mut med = metformin();
        med.name = "   ".to_string();
        assert!(validate_medication(&mut med).is_err());

        let mut med = metformin();
        med.end_date = NaiveDate::from_ymd_opt(2024, 1, 9);
        let err = validate_medication(&mut med).unwrap_err();
        assert!(err.to_string().contains("end_date"));
    }

    #[test]
    fn test_update_medication_merge() {
        let current = Medication {
            id: 3,
            name: "Metformin".to_string(),
            brand: Some("Glucophage".to_string()),
            medication_type: "oral".to_string(),
            dosage: Some("500 mg".to_string()),
            frequency: None,
            instructions: None,
            prescribed_by: None,
            start_date: None,
            end_date: None,
            is_active: true,
            notes: Some("with food".to_string()),
            created_at: String::new(),
            updated_at: String::new(),
        };
        let update = UpdateMedication {
            dosage: Some(Some("850 mg".to_string())),
            brand: Some(None),
            is_active: Some(false),
            ..UpdateMedication::default()
        };
        assert!(!update.is_empty());
        let merged = update.merge(&current);
        assert_eq!(merged.name, "Metformin");
        assert_eq!(merged.dosage.as_deref(), Some("850 mg"));
        assert!(merged.brand.is_none());
        assert!(!merged.is_active);
        assert_eq!(merged.notes.as_deref(), Some("with food"));
        assert!(UpdateMedication::default().is_empty());
    }
}
