use anyhow::Result;

use glyco_core::models::{DailyNote, NewDailyNote, validate_daily_note};
use glyco_core::service::GlycoService;

use super::helpers::{not_found, parse_date, print_json};

pub(crate) fn print_note(note: &DailyNote) {
    println!("=== {} ===", note.date.format("%Y-%m-%d"));
    let fields = [
        ("Notes", note.notes.clone()),
        ("Mood", note.mood.clone()),
        ("Activity", note.physical_activity.clone()),
        ("Weight", note.weight_kg.map(|w| format!("{w:.1} kg"))),
        ("Sleep", note.sleep_hours.map(|h| format!("{h:.1} h"))),
        ("Symptoms", note.symptoms.clone()),
    ];
    for (label, value) in fields {
        if let Some(v) = value {
            println!("  {label:<9} {v}");
        }
    }
}

/// Replaces the whole note for the day.
pub(crate) fn cmd_note_set(
    svc: &GlycoService,
    date: Option<String>,
    note: &NewDailyNote,
    json: bool,
) -> Result<()> {
    validate_daily_note(note)?;
    let date = parse_date(date)?;
    let saved = svc.db().upsert_daily_note(date, note)?;

    if json {
        print_json(&saved)
    } else {
        println!("Saved note for {}", saved.date.format("%Y-%m-%d"));
        Ok(())
    }
}

pub(crate) fn cmd_note_show(svc: &GlycoService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let Some(note) = svc.db().get_daily_note(date)? else {
        not_found(&format!("No note for {}", date.format("%Y-%m-%d")), json);
    };

    if json {
        print_json(&note)
    } else {
        print_note(&note);
        Ok(())
    }
}

pub(crate) fn cmd_note_delete(svc: &GlycoService, date: Option<String>, json: bool) -> Result<()> {
    let date = parse_date(date)?;
    let label = date.format("%Y-%m-%d").to_string();
    if !svc.db().delete_daily_note(date)? {
        not_found(&format!("No note for {label}"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": label }));
    } else {
        println!("Deleted note for {label}");
    }
    Ok(())
}
