use std::iter::Sum;
use std::ops::Add;

use serde::{Deserialize, Serialize};

use crate::error::CalcError;

/// Grams of carbohydrate covered by one unit of insulin unless configured otherwise.
pub const DEFAULT_CARB_RATIO: f64 = 12.0;

/// A set of nutrient amounts. Used both for per-100g food profiles and for
/// scaled portions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Nutrients {
    pub calories: f64,
    pub carbs: f64,
    pub sugar: f64,
    pub fiber: f64,
    pub protein: f64,
    pub fat: f64,
    pub sodium_mg: f64,
}

impl Nutrients {
    /// Clamp negative and non-finite values to zero.
    #[must_use]
    pub fn sanitized(self) -> Self {
        Self {
            calories: non_negative(self.calories),
            carbs: non_negative(self.carbs),
            sugar: non_negative(self.sugar),
            fiber: non_negative(self.fiber),
            protein: non_negative(self.protein),
            fat: non_negative(self.fat),
            sodium_mg: non_negative(self.sodium_mg),
        }
    }

    #[must_use]
    pub fn scaled(self, factor: f64) -> Self {
        Self {
            calories: self.calories * factor,
            carbs: self.carbs * factor,
            sugar: self.sugar * factor,
            fiber: self.fiber * factor,
            protein: self.protein * factor,
            fat: self.fat * factor,
            sodium_mg: self.sodium_mg * factor,
        }
    }
}

impl Add for Nutrients {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            calories: self.calories + rhs.calories,
            carbs: self.carbs + rhs.carbs,
            sugar: self.sugar + rhs.sugar,
            fiber: self.fiber + rhs.fiber,
            protein: self.protein + rhs.protein,
            fat: self.fat + rhs.fat,
            sodium_mg: self.sodium_mg + rhs.sodium_mg,
        }
    }
}

impl Sum for Nutrients {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a Nutrients> for Nutrients {
    fn sum<I: Iterator<Item = &'a Nutrients>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

/// Scale a per-100g profile to `quantity_g` grams.
///
/// Negative profile values count as zero. The quantity must be a finite
/// number greater than zero; no upper bound is applied here.
pub fn scale_portion(per_100g: &Nutrients, quantity_g: f64) -> Result<Nutrients, CalcError> {
    if !quantity_g.is_finite() || quantity_g <= 0.0 {
        return Err(CalcError::InvalidQuantity(quantity_g));
    }
    Ok(per_100g.sanitized().scaled(quantity_g / 100.0))
}

/// Turns a meal's total carbohydrates into an insulin estimate.
pub trait InsulinEstimator: Send + Sync {
    fn estimate_units(&self, total_carbs_g: f64) -> f64;
}

/// Fixed insulin-to-carb ratio: one unit per `grams_per_unit` grams.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CarbRatio {
    grams_per_unit: f64,
}

impl CarbRatio {
    pub fn new(grams_per_unit: f64) -> Result<Self, CalcError> {
        if !grams_per_unit.is_finite() || grams_per_unit <= 0.0 {
            return Err(CalcError::InvalidCarbRatio(grams_per_unit));
        }
        Ok(Self { grams_per_unit })
    }

    #[must_use]
    pub fn grams_per_unit(&self) -> f64 {
        self.grams_per_unit
    }
}

impl Default for CarbRatio {
    fn default() -> Self {
        Self {
            grams_per_unit: DEFAULT_CARB_RATIO,
        }
    }
}

impl InsulinEstimator for CarbRatio {
    fn estimate_units(&self, total_carbs_g: f64) -> f64 {
        total_carbs_g / self.grams_per_unit
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MealTotals {
    pub calories: f64,
    pub carbs: f64,
    pub sugar: f64,
    pub fiber: f64,
    pub protein: f64,
    pub fat: f64,
    pub sodium_mg: f64,
    pub estimated_insulin_units: f64,
}

/// Sum every portion of a meal and estimate the insulin dose for its carbs.
///
/// Always computed from the full item set; an empty meal yields all zeros.
pub fn aggregate_meal<'a, I>(portions: I, estimator: &dyn InsulinEstimator) -> MealTotals
where
    I: IntoIterator<Item = &'a Nutrients>,
{
    let sum: Nutrients = portions.into_iter().sum();
    let estimated_insulin_units = if sum.carbs > 0.0 {
        estimator.estimate_units(sum.carbs)
    } else {
        0.0
    };
    MealTotals {
        calories: sum.calories,
        carbs: sum.carbs,
        sugar: sum.sugar,
        fiber: sum.fiber,
        protein: sum.protein,
        fat: sum.fat,
        sodium_mg: sum.sodium_mg,
        estimated_insulin_units,
    }
}
