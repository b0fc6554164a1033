use anyhow::{Result, bail};
use std::process;

use crate::openfoodfacts::OpenFoodFactsClient;
use glyco_core::models::{Food, NewFood};
use glyco_core::service::GlycoService;

use super::helpers::{not_found, print_food_table, print_json};

pub(crate) async fn cmd_search(
    svc: &GlycoService,
    off: &OpenFoodFactsClient,
    query: &str,
    json: bool,
) -> Result<()> {
    let all = svc.search_and_cache(off, query).await?;

    if all.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No results found for '{query}'");
        }
        process::exit(2);
    }

    if json {
        print_json(&all)
    } else {
        let refs: Vec<&Food> = all.iter().collect();
        print_food_table(&refs);
        Ok(())
    }
}

pub(crate) async fn cmd_barcode(
    svc: &GlycoService,
    off: &OpenFoodFactsClient,
    code: &str,
    json: bool,
) -> Result<()> {
    let Some(food) = svc.barcode_lookup(off, code).await? else {
        not_found(&format!("No product found for barcode '{code}'"), json);
    };

    if json {
        print_json(&food)
    } else {
        print_food_table(&[&food]);
        Ok(())
    }
}

pub(crate) fn cmd_food_add(svc: &GlycoService, food: &NewFood, json: bool) -> Result<()> {
    let food = svc.add_food(food)?;

    if json {
        print_json(&food)
    } else {
        let name = &food.name;
        let id = food.id;
        println!("Added food: {name} (id: {id})");
        Ok(())
    }
}

pub(crate) fn cmd_food_list(svc: &GlycoService, search: Option<&str>, json: bool) -> Result<()> {
    let foods = svc.db().list_foods(search)?;

    if foods.is_empty() {
        if json {
            println!("[]");
        } else {
            eprintln!("No foods found");
        }
        process::exit(2);
    }

    if json {
        print_json(&foods)
    } else {
        let refs: Vec<&Food> = foods.iter().collect();
        print_food_table(&refs);
        Ok(())
    }
}

pub(crate) fn cmd_food_show(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().food_exists(id)? {
        not_found(&format!("Food {id} not found"), json);
    }
    let food = svc.db().get_food_by_id(id)?;

    if json {
        return print_json(&food);
    }

    let brand = food
        .brand
        .as_ref()
        .map(|b| format!(" ({b})"))
        .unwrap_or_default();
    println!("[{}] {}{brand}", food.id, food.name);
    if let Some(desc) = &food.description {
        println!("  {desc}");
    }
    if let Some(code) = &food.barcode {
        println!("  Barcode:  {code}");
    }
    println!("  Per 100g: {:.0} kcal", food.calories_per_100g);
    println!(
        "            carbs {:.1}g (sugar {:.1}g, fiber {:.1}g)",
        food.carbs_per_100g, food.sugar_per_100g, food.fiber_per_100g
    );
    println!(
        "            protein {:.1}g  fat {:.1}g  sodium {:.0}mg",
        food.protein_per_100g, food.fat_per_100g, food.sodium_mg_per_100g
    );
    if let Some(gi) = food.glycemic_index {
        println!("  GI:       {gi}");
    }
    println!("  Source:   {}", food.source);
    Ok(())
}

pub(crate) fn cmd_food_delete(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    let db = svc.db();
    let used = db.food_usage_count(id)?;
    if used > 0 {
        bail!("Food {id} is used by {used} meal item(s); remove those first");
    }
    if !db.delete_food(id)? {
        not_found(&format!("Food {id} not found"), json);
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted food {id}");
    }
    Ok(())
}
