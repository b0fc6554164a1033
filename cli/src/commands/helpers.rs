use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use serde::Serialize;
use std::io::{self, BufRead, Write};
use std::process;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use glyco_core::glucose::{GlucoseSummary, TimeWindow};
use glyco_core::models::{Food, GlucoseReading, InsulinRecord, MealDetail};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            "tomorrow" => Ok(Local::now().date_naive() + chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday/tomorrow")
            }),
        },
    }
}

fn local_to_utc(naive: NaiveDateTime) -> Result<DateTime<Utc>> {
    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("'{naive}' does not exist in the local timezone"))
}

/// Parse a point in time. Accepts `now`, RFC 3339, `YYYY-MM-DD HH:MM` and
/// `HH:MM` (today); the last two are read as local time.
pub(crate) fn parse_datetime(s: Option<&str>) -> Result<DateTime<Utc>> {
    let Some(s) = s.map(str::trim) else {
        return Ok(Utc::now());
    };
    if s == "now" {
        return Ok(Utc::now());
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") {
        return local_to_utc(naive);
    }
    if let Ok(time) = NaiveTime::parse_from_str(s, "%H:%M") {
        return local_to_utc(Local::now().date_naive().and_time(time));
    }
    bail!("Invalid time '{s}'. Use now, HH:MM, 'YYYY-MM-DD HH:MM' or RFC 3339")
}

/// Local calendar days `[today - days + 1, today]` as a UTC window.
pub(crate) fn last_days_window(days: u32) -> Result<TimeWindow> {
    if days == 0 {
        bail!("--days must be at least 1");
    }
    let today = Local::now().date_naive();
    let first = today - chrono::Duration::days(i64::from(days) - 1);
    let start = local_to_utc(first.and_time(NaiveTime::MIN))?;
    Ok(TimeWindow::new(start, Utc::now()))
}

pub(crate) fn prompt_choice(count: usize) -> Result<usize> {
    eprint!("\nSelect a food (1-{count}): ");
    io::stderr().flush()?;
    let stdin = io::stdin();
    let line = stdin.lock().lines().next().context("No input")??;
    let n: usize = line.trim().parse().context("Invalid number")?;
    if n < 1 || n > count {
        bail!("Selection out of range");
    }
    Ok(n - 1)
}

pub(crate) fn print_food_table(foods: &[&Food]) {
    #[derive(Tabled)]
    struct FoodRow {
        #[tabled(rename = "#")]
        idx: usize,
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Brand")]
        brand: String,
        #[tabled(rename = "Cal/100g")]
        calories: String,
        #[tabled(rename = "Carbs")]
        carbs: String,
        #[tabled(rename = "Sugar")]
        sugar: String,
        #[tabled(rename = "Fiber")]
        fiber: String,
        #[tabled(rename = "GI")]
        gi: String,
        #[tabled(rename = "Source")]
        source: String,
    }

    let rows: Vec<FoodRow> = foods
        .iter()
        .enumerate()
        .map(|(i, f)| FoodRow {
            idx: i + 1,
            id: f.id,
            name: truncate(&f.name, 35),
            brand: f
                .brand
                .as_deref()
                .map(|b| truncate(b, 20))
                .unwrap_or_default(),
            calories: format!("{:.0}", f.calories_per_100g),
            carbs: format!("{:.1}", f.carbs_per_100g),
            sugar: format!("{:.1}", f.sugar_per_100g),
            fiber: format!("{:.1}", f.fiber_per_100g),
            gi: f.glycemic_index.map_or("-".into(), |v| v.to_string()),
            source: f.source.clone(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..9)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_meal_detail(detail: &MealDetail) {
    let meal = &detail.meal;
    let label = meal.meal_type.to_uppercase();
    let when = meal.eaten_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let name = meal
        .name
        .as_ref()
        .map(|n| format!(" {n}"))
        .unwrap_or_default();
    println!("[{}] {label}{name} at {when}", meal.id);
    if let Some(notes) = &meal.notes {
        println!("  Notes: {notes}");
    }
    for item in &detail.items {
        let brand = item
            .food_brand
            .as_ref()
            .map(|b| format!(" ({b})"))
            .unwrap_or_default();
        let n = &item.nutrients;
        println!(
            "    [{}] {}{brand} {:.0}g: {:.0} kcal | C:{:.1}g S:{:.1}g F:{:.1}g",
            item.id, item.food_name, item.quantity_g, n.calories, n.carbs, n.sugar, n.fiber
        );
    }
    let t = &detail.totals;
    println!(
        "  TOTAL: {:.0} kcal | C:{:.1}g P:{:.1}g F:{:.1}g | est. insulin {:.1} U",
        no_neg_zero(t.calories),
        no_neg_zero(t.carbs),
        no_neg_zero(t.protein),
        no_neg_zero(t.fat),
        no_neg_zero(t.estimated_insulin_units),
    );
}

pub(crate) fn print_glucose_table(readings: &[GlucoseReading]) {
    #[derive(Tabled)]
    struct GlucoseRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "mg/dL")]
        value: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Meal")]
        meal: String,
        #[tabled(rename = "Notes")]
        notes: String,
    }

    let rows: Vec<GlucoseRow> = readings
        .iter()
        .map(|r| GlucoseRow {
            id: r.id,
            time: r
                .measured_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            value: format!("{:.0}", r.value_mg_dl),
            kind: r.measurement_type.clone(),
            meal: r.meal_id.map_or("-".into(), |m| m.to_string()),
            notes: r
                .notes
                .as_deref()
                .map(|n| truncate(n, 30))
                .unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_insulin_table(records: &[InsulinRecord]) {
    #[derive(Tabled)]
    struct InsulinRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Units")]
        units: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Site")]
        site: String,
    }

    let rows: Vec<InsulinRow> = records
        .iter()
        .map(|r| InsulinRow {
            id: r.id,
            time: r
                .injected_at
                .with_timezone(&Local)
                .format("%Y-%m-%d %H:%M")
                .to_string(),
            units: format!("{:.1}", r.dose_units),
            kind: r.insulin_type.clone(),
            site: r.injection_site.clone().unwrap_or_default(),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::single(2)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn print_glucose_summary(s: &GlucoseSummary) {
    println!(
        "  Readings: {}  avg {:.0}  min {:.0}  max {:.0} mg/dL",
        s.count, s.average, s.min, s.max
    );
    println!(
        "  In range ({:.0}-{:.0}): {:.1}%  below: {:.1}%  above: {:.1}%",
        s.target_low, s.target_high, s.in_range_pct, s.below_range_pct, s.above_range_pct
    );
}

pub(crate) fn json_error(message: &str) -> String {
    #[derive(Serialize)]
    struct CliError<'a> {
        error: &'a str,
    }
    serde_json::to_string(&CliError { error: message })
        .unwrap_or_else(|_| format!("{{\"error\":\"{message}\"}}"))
}

/// Report a missing record and exit with status 2.
pub(crate) fn not_found(message: &str, json: bool) -> ! {
    if json {
        println!("{}", json_error(message));
    } else {
        eprintln!("{message}");
    }
    process::exit(2);
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}
