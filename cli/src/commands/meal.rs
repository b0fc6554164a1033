use anyhow::{Result, bail};
use chrono::Local;
use std::process;

use crate::openfoodfacts::OpenFoodFactsClient;
use glyco_core::glucose::TimeWindow;
use glyco_core::models::{NewMeal, NewMealItem, UpdateMeal, validate_meal_type, validate_quantity};
use glyco_core::service::{GlycoService, day_window_in};

use super::helpers::{
    last_days_window, not_found, parse_date, parse_datetime, print_json, print_meal_detail,
};
use super::resolve_food;

pub(crate) fn cmd_meal_create(
    svc: &GlycoService,
    meal_type: &str,
    name: Option<String>,
    at: Option<&str>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let meal = svc.db().insert_meal(&NewMeal {
        meal_type: validate_meal_type(meal_type)?,
        name,
        eaten_at: parse_datetime(at)?,
        notes,
    })?;

    if json {
        print_json(&meal)
    } else {
        println!("Created {} meal (id: {})", meal.meal_type, meal.id);
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
pub(crate) async fn cmd_meal_add(
    svc: &GlycoService,
    off: &OpenFoodFactsClient,
    meal_id: i64,
    food: Option<&str>,
    food_id: Option<i64>,
    quantity_g: f64,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    validate_quantity(quantity_g)?;
    if !svc.db().meal_exists(meal_id)? {
        not_found(&format!("Meal {meal_id} not found"), json);
    }

    let food = match (food_id, food) {
        (Some(id), _) => {
            if !svc.db().food_exists(id)? {
                not_found(&format!("Food {id} not found"), json);
            }
            svc.db().get_food_by_id(id)?
        }
        (None, Some(query)) => resolve_food(svc, off, query).await?,
        (None, None) => bail!("Provide a food name or --food-id"),
    };

    let item = svc.db().add_meal_item(
        meal_id,
        &NewMealItem {
            food_id: food.id,
            quantity_g,
            notes,
        },
    )?;

    if json {
        print_json(&item)
    } else {
        let n = &item.nutrients;
        println!(
            "Added {:.0}g {} to meal {meal_id}: {:.0} kcal, {:.1}g carbs",
            item.quantity_g, item.food_name, n.calories, n.carbs
        );
        let detail = svc.meal_detail(meal_id)?;
        println!(
            "Meal total: {:.1}g carbs, est. insulin {:.1} U",
            detail.totals.carbs, detail.totals.estimated_insulin_units
        );
        Ok(())
    }
}

pub(crate) fn cmd_meal_remove_item(svc: &GlycoService, item_id: i64, json: bool) -> Result<()> {
    if !svc.db().remove_meal_item(item_id)? {
        not_found(&format!("Meal item {item_id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": item_id }));
    } else {
        println!("Removed meal item {item_id}");
    }
    Ok(())
}

pub(crate) fn cmd_meal_show(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().meal_exists(id)? {
        not_found(&format!("Meal {id} not found"), json);
    }
    let detail = svc.meal_detail(id)?;

    if json {
        print_json(&detail)
    } else {
        print_meal_detail(&detail);
        Ok(())
    }
}

pub(crate) fn cmd_meal_list(
    svc: &GlycoService,
    date: Option<String>,
    days: u32,
    json: bool,
) -> Result<()> {
    let window: TimeWindow = match date {
        Some(d) => day_window_in(parse_date(Some(d))?, &Local)?,
        None => last_days_window(days)?,
    };
    let meals = svc.meal_details(Some(window))?;

    if json {
        return print_json(&meals);
    }
    if meals.is_empty() {
        eprintln!("No meals found");
        process::exit(2);
    }
    for detail in &meals {
        print_meal_detail(detail);
        println!();
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_meal_update(
    svc: &GlycoService,
    id: i64,
    meal_type: Option<&str>,
    name: Option<String>,
    at: Option<&str>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    let update = UpdateMeal {
        meal_type: meal_type.map(validate_meal_type).transpose()?,
        name: name.map(Some),
        eaten_at: at.map(|s| parse_datetime(Some(s))).transpose()?,
        notes: notes.map(Some),
    };
    if update.is_empty() {
        bail!("Nothing to update. Provide at least one of --type, --name, --at or --notes");
    }

    if !svc.db().meal_exists(id)? {
        not_found(&format!("Meal {id} not found"), json);
    }
    let meal = svc.db().update_meal(id, &update)?;

    if json {
        print_json(&meal)
    } else {
        println!("Updated meal {id} ({})", meal.meal_type);
        Ok(())
    }
}

pub(crate) fn cmd_meal_delete(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().delete_meal(id)? {
        not_found(&format!("Meal {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted meal {id}");
    }
    Ok(())
}
