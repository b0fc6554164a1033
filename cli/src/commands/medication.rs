use anyhow::{Result, bail};
use std::process;
use tabled::{Table, Tabled, settings::Style};

use glyco_core::models::{Medication, NewMedication, UpdateMedication, validate_medication};
use glyco_core::service::GlycoService;

use super::helpers::{not_found, print_json, truncate};

fn print_medication_table(meds: &[Medication]) {
    #[derive(Tabled)]
    struct MedicationRow {
        #[tabled(rename = "ID")]
        id: i64,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Type")]
        kind: String,
        #[tabled(rename = "Dosage")]
        dosage: String,
        #[tabled(rename = "Frequency")]
        frequency: String,
        #[tabled(rename = "Active")]
        active: &'static str,
    }

    let rows: Vec<MedicationRow> = meds
        .iter()
        .map(|m| MedicationRow {
            id: m.id,
            name: truncate(&m.name, 30),
            kind: m.medication_type.clone(),
            dosage: m.dosage.clone().unwrap_or_default(),
            frequency: m
                .frequency
                .as_deref()
                .map(|f| truncate(f, 25))
                .unwrap_or_default(),
            active: if m.is_active { "yes" } else { "no" },
        })
        .collect();

    let table = Table::new(&rows).with(Style::rounded()).to_string();
    println!("{table}");
}

pub(crate) fn cmd_med_add(svc: &GlycoService, mut med: NewMedication, json: bool) -> Result<()> {
    validate_medication(&mut med)?;
    let med = svc.db().insert_medication(&med)?;

    if json {
        print_json(&med)
    } else {
        println!("Added medication: {} (id: {})", med.name, med.id);
        Ok(())
    }
}

pub(crate) fn cmd_med_list(svc: &GlycoService, active_only: bool, json: bool) -> Result<()> {
    let meds = svc.db().list_medications(active_only)?;

    if json {
        return print_json(&meds);
    }
    if meds.is_empty() {
        eprintln!("No medications found");
        process::exit(2);
    }
    print_medication_table(&meds);
    Ok(())
}

pub(crate) fn cmd_med_show(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().medication_exists(id)? {
        not_found(&format!("Medication {id} not found"), json);
    }
    let med = svc.db().get_medication(id)?;

    if json {
        return print_json(&med);
    }

    let brand = med
        .brand
        .as_ref()
        .map(|b| format!(" ({b})"))
        .unwrap_or_default();
    let status = if med.is_active { "active" } else { "inactive" };
    println!("[{}] {}{brand}, {}, {status}", med.id, med.name, med.medication_type);
    if let Some(dosage) = &med.dosage {
        println!("  Dosage:       {dosage}");
    }
    if let Some(frequency) = &med.frequency {
        println!("  Frequency:    {frequency}");
    }
    if let Some(instructions) = &med.instructions {
        println!("  Instructions: {instructions}");
    }
    if let Some(doctor) = &med.prescribed_by {
        println!("  Prescribed:   {doctor}");
    }
    match (med.start_date, med.end_date) {
        (Some(start), Some(end)) => println!("  Period:       {start} to {end}"),
        (Some(start), None) => println!("  Since:        {start}"),
        (None, Some(end)) => println!("  Until:        {end}"),
        (None, None) => {}
    }
    if let Some(notes) = &med.notes {
        println!("  Notes:        {notes}");
    }
    Ok(())
}

pub(crate) fn cmd_med_update(
    svc: &GlycoService,
    id: i64,
    update: &UpdateMedication,
    json: bool,
) -> Result<()> {
    if update.is_empty() {
        bail!("Nothing to update. Provide at least one field to change");
    }

    let db = svc.db();
    if !db.medication_exists(id)? {
        not_found(&format!("Medication {id} not found"), json);
    }
    let mut merged = update.merge(&db.get_medication(id)?);
    validate_medication(&mut merged)?;
    let med = db.update_medication(id, &merged)?;

    if json {
        print_json(&med)
    } else {
        println!("Updated medication {id} ({})", med.name);
        Ok(())
    }
}

pub(crate) fn cmd_med_delete(svc: &GlycoService, id: i64, json: bool) -> Result<()> {
    if !svc.db().delete_medication(id)? {
        not_found(&format!("Medication {id} not found"), json);
    }
    if json {
        println!("{}", serde_json::json!({ "deleted": id }));
    } else {
        println!("Deleted medication {id}");
    }
    Ok(())
}
