use anyhow::{Result, bail};
use chrono::Local;
use std::process;

use glyco_core::glucose::{RangeBand, TimeWindow};
use glyco_core::models::{
    NewGlucoseReading, UpdateGlucoseReading, validate_glucose_value, validate_measurement_type,
};
use glyco_core::service::GlycoService;

use super::helpers::{
    last_days_window, not_found, parse_datetime, print_glucose_summary, print_glucose_table,
    print_json,
};

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_glucose_log(
    svc: &GlycoService,
    value: f64,
    kind: &str,
    at: Option<&str>,
    meal_id: Option<i64>,
    mood: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    validate_glucose_value(value)?;
    let measurement_type = validate_measurement_type(kind)?;
    let measured_at = parse_datetime(at)?;

    let db = svc.db();
    if let Some(meal_id) = meal_id {
        if !db.meal_exists(meal_id)? {
            bail!("Meal {meal_id} not found");
        }
    }
    let reading = db.insert_glucose_reading(&NewGlucoseReading {
        value_mg_dl: value,
        measured_at,
        measurement_type,
        mood,
        notes,
        meal_id,
    })?;
    drop(db);

    if json {
        return print_json(&reading);
    }
    let range = svc.target_range()?;
    let flag = match range.classify(reading.value_mg_dl) {
        RangeBand::Below => " (below range)",
        RangeBand::InRange => "",
        RangeBand::Above => " (above range)",
    };
    println!(
        "Logged {:.0} mg/dL ({}) at {}{flag} (id: {})",
        reading.value_mg_dl,
        reading.measurement_type,
        reading
            .measured_at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M"),
        reading.id
    );
    Ok(())
}

pub(crate) fn cmd_glucose_list(svc: &GlycoService, days: u32, json: bool) -> Result<()> {
    let window = last_days_window(days)?;
    let readings = svc
        .db()
        .list_glucose_readings(Some(window.start), Some(window.end))?;

    if json {
        return print_json(&readings);
    }
    if readings.is_empty() {
        eprintln!("No glucose readings in the last {days} days");
        process::exit(2);
    }
    print_glucose_table(&readings);
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_glucose_update(
    svc: &GlycoService,
    id: i64,
    value: Option<f64>,
    kind: Option<&str>,
    at: Option<&str>,
    mood: Option<String>,
    notes: Option<String>,
    json: bool,
) -> Result<()> {
    if let Some(v) = value {
        validate_glucose_value(v)?;
    }
    let update = UpdateGlucoseReading {
        value_mg_dl: value,
        measured_at: at.map(|s| parse_datetime(Some(s))).transpose()?,
        measurement_type: kind.map(validate_measurement_type).transpose()?,
        mood: mood.map(Some),
        notes: notes.map(Some),
        meal_id: None,
    };
    if update.value_mg_dl.is_none()
        && update.measured_at.is_none()
        && update.measurement_type.is_none()
        && update.mood.is_none()
        && update.notes.is_none()
    {
        bail!("Nothing to update. Provide at least one of --value, --type, --at, --mood or --notes");
    }

    if !svc.db().glucose_reading_exists(id)? {
        not_found(&format!("Glucose reading {id} not found"), json);
    }
    let reading = svc.db().update_glucose_reading(id, &update)?;

    if json {
        print_json(&reading)
    } else {
        println!("Updated reading {id}: {:.0} mg/dL", reading.value_mg_dl);
        Ok(())
    }
}

pub(crate) fn cmd_glucose_delete(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().delete_glucose_reading(id)? {
        not_found(&format!("Glucose reading {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted glucose reading {id}");
    }
    Ok(())
}

pub(crate) fn cmd_glucose_stats(
    svc: &GlycoService,
    days: u32,
    start: Option<&str>,
    end: Option<&str>,
    json: bool,
) -> Result<()> {
    let window = if start.is_some() || end.is_some() {
        let default = last_days_window(days)?;
        TimeWindow::new(
            start.map_or(Ok(default.start), |s| parse_datetime(Some(s)))?,
            end.map_or(Ok(default.end), |s| parse_datetime(Some(s)))?,
        )
    } else {
        last_days_window(days)?
    };
    let summary = svc.glucose_statistics(window)?;

    if json {
        return print_json(&summary);
    }
    let from = window.start.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let to = window.end.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    println!("=== Glucose {from} to {to} ===");
    if summary.count == 0 {
        println!("  No readings");
    } else {
        print_glucose_summary(&summary);
    }
    Ok(())
}
