use anyhow::Result;
use chrono::Local;

use glyco_core::service::GlycoService;

use super::helpers::{no_neg_zero, parse_date, print_glucose_summary, print_json, print_meal_detail};
use super::note::print_note;

pub(crate) fn cmd_report(svc: &GlycoService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let report = svc.daily_report_in(date, &Local)?;

    if json {
        return print_json(&report);
    }

    println!("=== {} ===\n", report.date);

    println!("  GLUCOSE");
    if report.glucose.count == 0 {
        println!("  No readings");
    } else {
        print_glucose_summary(&report.glucose);
    }
    println!();

    println!("  MEALS ({})", report.meal_count);
    for detail in &report.meals {
        print_meal_detail(detail);
    }
    println!(
        "  TOTAL: {:.0} kcal | C:{:.1}g | est. insulin {:.1} U",
        no_neg_zero(report.calories),
        no_neg_zero(report.carbs),
        no_neg_zero(report.estimated_insulin_units)
    );
    println!(
        "  LOGGED INSULIN: {:.1} U in {} injection(s)",
        no_neg_zero(report.logged_insulin_units),
        report.insulin_injections
    );

    if let Some(note) = &report.note {
        println!();
        print_note(note);
    }

    Ok(())
}
