use serde::Deserialize;

use crate::models::NewFood;

pub const SOURCE: &str = "openfoodfacts";

#[derive(Debug, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub products: Vec<ProductData>,
}

#[derive(Debug, Deserialize)]
pub struct ProductResponse {
    pub status: i32,
    pub product: Option<ProductData>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProductData {
    pub product_name: Option<String>,
    pub generic_name: Option<String>,
    pub brands: Option<String>,
    pub code: Option<String>,
    pub image_front_url: Option<String>,
    pub image_url: Option<String>,
    pub image_small_url: Option<String>,
    pub nutriments: Option<Nutriments>,
}

/// OpenFoodFacts reports nutriments either as JSON numbers or as strings,
/// sometimes with a comma decimal separator.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum NutrimentValue {
    Number(f64),
    Text(String),
}

impl NutrimentValue {
    /// Parsed value, or 0 when missing, unparseable or negative.
    #[must_use]
    pub fn amount(&self) -> f64 {
        let v = match self {
            NutrimentValue::Number(n) => *n,
            NutrimentValue::Text(s) => s.trim().replace(',', ".").parse().unwrap_or(0.0),
        };
        if v.is_finite() && v > 0.0 { v } else { 0.0 }
    }
}

#[derive(Debug, Default, Deserialize)]
#[allow(clippy::struct_field_names)]
pub struct Nutriments {
    #[serde(rename = "energy-kcal_100g")]
    pub energy_kcal_100g: Option<NutrimentValue>,
    pub carbohydrates_100g: Option<NutrimentValue>,
    pub sugars_100g: Option<NutrimentValue>,
    pub fiber_100g: Option<NutrimentValue>,
    pub proteins_100g: Option<NutrimentValue>,
    pub fat_100g: Option<NutrimentValue>,
    /// Grams per 100 g.
    pub sodium_100g: Option<NutrimentValue>,
}

fn amount(v: Option<&NutrimentValue>) -> f64 {
    v.map_or(0.0, NutrimentValue::amount)
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Map an OpenFoodFacts product to a new food. Products without a name are
/// skipped; missing nutriments count as zero.
#[must_use]
pub fn product_to_food(p: ProductData) -> Option<NewFood> {
    let name = non_blank(p.product_name)?;
    let n = p.nutriments.unwrap_or_default();

    let brand = p
        .brands
        .as_deref()
        .and_then(|b| b.split(',').next())
        .map(str::to_string);

    Some(NewFood {
        name,
        brand: non_blank(brand),
        barcode: non_blank(p.code),
        description: non_blank(p.generic_name),
        image_url: non_blank(p.image_front_url)
            .or_else(|| non_blank(p.image_url))
            .or_else(|| non_blank(p.image_small_url)),
        calories_per_100g: amount(n.energy_kcal_100g.as_ref()),
        carbs_per_100g: amount(n.carbohydrates_100g.as_ref()),
        sugar_per_100g: amount(n.sugars_100g.as_ref()),
        fiber_per_100g: amount(n.fiber_100g.as_ref()),
        protein_per_100g: amount(n.proteins_100g.as_ref()),
        fat_per_100g: amount(n.fat_100g.as_ref()),
        sodium_mg_per_100g: amount(n.sodium_100g.as_ref()) * 1000.0,
        glycemic_index: None,
        source: SOURCE.to_string(),
    })
}
