mod glucose;
mod helpers;
mod insulin;
mod meal;
mod medication;
mod note;
mod report;
mod search;
mod target;

use anyhow::{Result, bail};

use crate::openfoodfacts::OpenFoodFactsClient;
use glyco_core::models::Food;
use glyco_core::service::GlycoService;

use helpers::{print_food_table, prompt_choice};

pub(crate) use glucose::{
    cmd_glucose_delete, cmd_glucose_list, cmd_glucose_log, cmd_glucose_stats, cmd_glucose_update,
};
pub(crate) use insulin::{cmd_insulin_delete, cmd_insulin_list, cmd_insulin_log};
pub(crate) use meal::{
    cmd_meal_add, cmd_meal_create, cmd_meal_delete, cmd_meal_list, cmd_meal_remove_item,
    cmd_meal_show, cmd_meal_update,
};
pub(crate) use medication::{
    cmd_med_add, cmd_med_delete, cmd_med_list, cmd_med_show, cmd_med_update,
};
pub(crate) use note::{cmd_note_delete, cmd_note_set, cmd_note_show};
pub(crate) use report::cmd_report;
pub(crate) use search::{
    cmd_barcode, cmd_food_add, cmd_food_delete, cmd_food_list, cmd_food_show, cmd_search,
};
pub(crate) use target::{cmd_target_range, cmd_target_ratio};

/// Resolve a food name to a Food record, searching local DB first then `OpenFoodFacts`.
pub(super) async fn resolve_food(
    svc: &GlycoService,
    off: &OpenFoodFactsClient,
    food_query: &str,
) -> Result<Food> {
    let mut all = svc.search_and_cache(off, food_query).await?;

    if all.is_empty() {
        bail!("No food found for '{food_query}'");
    }

    if all.len() == 1 {
        return Ok(all.swap_remove(0));
    }

    let refs: Vec<&Food> = all.iter().collect();
    print_food_table(&refs);
    let idx = prompt_choice(all.len())?;
    Ok(all.swap_remove(idx))
}
