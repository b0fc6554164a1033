use anyhow::{Result, bail};
use chrono::Local;
use std::process;

use glyco_core::models::{NewInsulinRecord, validate_insulin_dose, validate_insulin_type};
use glyco_core::service::GlycoService;

use super::helpers::{last_days_window, not_found, parse_datetime, print_insulin_table, print_json};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_insulin_log(
    svc: &GlycoService,
    units: f64,
    kind: &str,
    at: Option<&str>,
    site: Option<String>,
    meal_id: Option<i64>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    validate_insulin_dose(units)?;
    let insulin_type = validate_insulin_type(kind)?;
    let injected_at = parse_datetime(at)?;

    let db = svc.db();
    if let Some(meal_id) = meal_id {
        if !db.meal_exists(meal_id)? {
            bail!("Meal {meal_id} not found");
        }
    }
    let record = db.insert_insulin_record(&NewInsulinRecord {
        insulin_type,
        dose_units: units,
        injected_at,
        injection_site: site,
        notes,
        meal_id,
    })?;

    if json {
        print_json(&record)
    } else {
        println!(
            "Logged {:.1} U {} at {} (id: {})",
            record.dose_units,
            record.insulin_type,
            record
                .injected_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M"),
            record.id
        );
        Ok(())
    }
}

pub(crate) fn cmd_insulin_list(svc: &GlycoService, days: u32, json: bool) -> Result<()> {
    let window = last_days_window(days)?;
    let records = svc
        .db()
        .list_insulin_records(Some(window.start), Some(window.end))?;

    if json {
        return print_json(&records);
    }
    if records.is_empty() {
        eprintln!("No insulin records in the last {days} days");
        process::exit(2);
    }
    print_insulin_table(&records);
    let total: f64 = records.iter().map(|r| r.dose_units).sum();
    println!("  Total: {total:.1} U");
    Ok(())
}

pub(crate) fn cmd_insulin_delete(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().delete_insulin_record(id)? {
        not_found(&format!("Insulin record {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted insulin record {id}");
    }
    Ok(())
}
