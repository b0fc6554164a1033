mod commands;
mod config;
mod openfoodfacts;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    cmd_barcode, cmd_food_add, cmd_food_delete, cmd_food_list, cmd_food_show, cmd_glucose_delete,
    cmd_glucose_list, cmd_glucose_log, cmd_glucose_stats, cmd_glucose_update, cmd_insulin_delete,
    cmd_insulin_list, cmd_insulin_log, cmd_meal_add, cmd_meal_create, cmd_meal_delete,
    cmd_meal_list, cmd_meal_remove_item, cmd_meal_show, cmd_meal_update, cmd_med_add,
    cmd_med_delete, cmd_med_list, cmd_med_show, cmd_med_update, cmd_note_delete, cmd_note_set,
    cmd_note_show, cmd_report, cmd_search, cmd_target_range, cmd_target_ratio,
};
use crate::config::Config;
use crate::openfoodfacts::OpenFoodFactsClient;
use chrono::NaiveDate;
use glyco_core::models::{NewDailyNote, NewFood, NewMedication, UpdateMedication};
use glyco_core::service::GlycoService;

#[derive(Parser)]
#[command(
    name = "glyco",
    version,
    about = "A local-first diabetes tracker: glucose, insulin, meals and nutrition"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the local food database and `OpenFoodFacts`
    Search {
        /// Search query
        query: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up a food by barcode (cached locally after the first lookup)
    Barcode {
        /// Barcode number
        code: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage foods
    Food {
        #[command(subcommand)]
        command: FoodCommands,
    },
    /// Log meals and the foods in them
    Meal {
        #[command(subcommand)]
        command: MealCommands,
    },
    /// Log and analyse blood glucose readings
    Glucose {
        #[command(subcommand)]
        command: GlucoseCommands,
    },
    /// Log insulin injections
    Insulin {
        #[command(subcommand)]
        command: InsulinCommands,
    },
    /// Keep track of prescribed medications
    Med {
        #[command(subcommand)]
        command: MedCommands,
    },
    /// Daily notes (mood, activity, sleep, symptoms)
    Note {
        #[command(subcommand)]
        command: NoteCommands,
    },
    /// Show or change the glucose target range and carb ratio
    Target {
        #[command(subcommand)]
        command: TargetCommands,
    },
    /// Daily report: glucose statistics, meals, insulin and notes
    Report {
        /// Date (YYYY-MM-DD or today/yesterday, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the REST API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum FoodCommands {
    /// Add a food with its nutrients per 100g
    Add {
        /// Food name
        name: String,
        /// Calories per 100g
        #[arg(long)]
        calories: f64,
        /// Carbohydrates per 100g
        #[arg(long, default_value = "0")]
        carbs: f64,
        /// Sugar per 100g
        #[arg(long, default_value = "0")]
        sugar: f64,
        /// Fiber per 100g
        #[arg(long, default_value = "0")]
        fiber: f64,
        /// Protein per 100g
        #[arg(long, default_value = "0")]
        protein: f64,
        /// Fat per 100g
        #[arg(long, default_value = "0")]
        fat: f64,
        /// Sodium per 100g in mg
        #[arg(long, default_value = "0")]
        sodium: f64,
        /// Glycemic index (0-100)
        #[arg(long)]
        gi: Option<i64>,
        /// Brand name
        #[arg(long)]
        brand: Option<String>,
        /// Barcode
        #[arg(long)]
        barcode: Option<String>,
        /// Short description
        #[arg(long)]
        description: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List/search local food database
    List {
        /// Search query to filter foods
        #[arg(short, long)]
        search: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one food
    Show {
        /// Food ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a food that no meal uses
    Delete {
        /// Food ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MealCommands {
    /// Start a new meal
    Create {
        /// Meal type: breakfast, lunch, dinner, snack
        meal_type: String,
        /// Optional name
        #[arg(long)]
        name: Option<String>,
        /// When it was eaten (now, HH:MM, "YYYY-MM-DD HH:MM" or RFC 3339)
        #[arg(long)]
        at: Option<String>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a food to a meal
    Add {
        /// Meal ID
        meal_id: i64,
        /// Quantity in grams
        quantity: f64,
        /// Food name to search for
        food: Option<String>,
        /// Use this food ID (skip search)
        #[arg(long)]
        food_id: Option<i64>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an item from its meal
    RemoveItem {
        /// Meal item ID
        item_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a meal with its items and totals
    Show {
        /// Meal ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List meals
    List {
        /// Only this date (YYYY-MM-DD or today/yesterday)
        #[arg(long)]
        date: Option<String>,
        /// Number of days to show
        #[arg(short, long, default_value = "1")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a meal's type, name, time or notes
    Update {
        /// Meal ID
        id: i64,
        /// New meal type
        #[arg(long = "type")]
        meal_type: Option<String>,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New time
        #[arg(long)]
        at: Option<String>,
        /// New notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a meal and its items
    Delete {
        /// Meal ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum GlucoseCommands {
    /// Log a glucose reading in mg/dL
    Log {
        /// Value in mg/dL
        value: f64,
        /// Measurement type: fasting, pre_meal, post_meal, bedtime, random
        #[arg(short = 't', long = "type", default_value = "random")]
        kind: String,
        /// When it was measured (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Link to a meal
        #[arg(long)]
        meal_id: Option<i64>,
        /// Mood
        #[arg(long)]
        mood: Option<String>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent readings
    List {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update a reading
    Update {
        /// Reading ID
        id: i64,
        /// New value in mg/dL
        #[arg(long)]
        value: Option<f64>,
        /// New measurement type
        #[arg(short = 't', long = "type")]
        kind: Option<String>,
        /// New time
        #[arg(long)]
        at: Option<String>,
        /// New mood
        #[arg(long)]
        mood: Option<String>,
        /// New notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a reading
    Delete {
        /// Reading ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Statistics against the target range
    Stats {
        /// Number of days, used for any bound not given
        #[arg(short, long, default_value = "14")]
        days: u32,
        /// Window start
        #[arg(long)]
        start: Option<String>,
        /// Window end
        #[arg(long)]
        end: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum InsulinCommands {
    /// Log an injection
    Log {
        /// Dose in units
        units: f64,
        /// Insulin type: rapid, long, mixed
        #[arg(short = 't', long = "type", default_value = "rapid")]
        kind: String,
        /// When it was injected (default: now)
        #[arg(long)]
        at: Option<String>,
        /// Injection site
        #[arg(long)]
        site: Option<String>,
        /// Link to a meal
        #[arg(long)]
        meal_id: Option<i64>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recent injections
    List {
        /// Number of days to show
        #[arg(short, long, default_value = "7")]
        days: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an injection record
    Delete {
        /// Record ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum NoteCommands {
    /// Write the note for a day (replaces any existing note)
    Set {
        /// Date (default: today)
        #[arg(long)]
        date: Option<String>,
        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
        /// Mood
        #[arg(long)]
        mood: Option<String>,
        /// Physical activity
        #[arg(long)]
        activity: Option<String>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// Hours slept
        #[arg(long)]
        sleep: Option<f64>,
        /// Symptoms
        #[arg(long)]
        symptoms: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the note for a day
    Show {
        /// Date (default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete the note for a day
    Delete {
        /// Date (default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum MedCommands {
    /// Add a medication
    Add {
        /// Medication name
        name: String,
        /// Type: insulin, oral or injectable
        #[arg(long = "type", default_value = "oral")]
        kind: String,
        /// Brand name
        #[arg(long)]
        brand: Option<String>,
        /// Dose, e.g. "500 mg" or "10 U"
        #[arg(long)]
        dosage: Option<String>,
        /// How often it is taken
        #[arg(long)]
        frequency: Option<String>,
        /// How to take it
        #[arg(long)]
        instructions: Option<String>,
        /// Prescribing doctor
        #[arg(long)]
        prescribed_by: Option<String>,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Record it as no longer taken
        #[arg(long)]
        inactive: bool,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List medications
    List {
        /// Only medications still being taken
        #[arg(long)]
        active: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show one medication
    Show {
        /// Medication ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change fields of a medication
    Update {
        /// Medication ID
        id: i64,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New type
        #[arg(long = "type")]
        kind: Option<String>,
        /// Brand name
        #[arg(long)]
        brand: Option<String>,
        /// Dose
        #[arg(long)]
        dosage: Option<String>,
        /// How often it is taken
        #[arg(long)]
        frequency: Option<String>,
        /// How to take it
        #[arg(long)]
        instructions: Option<String>,
        /// Prescribing doctor
        #[arg(long)]
        prescribed_by: Option<String>,
        /// First day (YYYY-MM-DD)
        #[arg(long)]
        start: Option<NaiveDate>,
        /// Last day (YYYY-MM-DD)
        #[arg(long)]
        end: Option<NaiveDate>,
        /// Whether it is still taken (true/false)
        #[arg(long)]
        active: Option<bool>,
        /// Notes
        #[arg(long)]
        notes: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a medication
    Delete {
        /// Medication ID
        id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TargetCommands {
    /// Show or set the glucose target range in mg/dL
    Range {
        /// Lower bound
        low: Option<f64>,
        /// Upper bound
        high: Option<f64>,
        /// Restore the default range
        #[arg(long)]
        reset: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or set grams of carbohydrate covered by one unit of insulin
    Ratio {
        /// Grams per unit
        grams_per_unit: Option<f64>,
        /// Restore the default ratio
        #[arg(long)]
        reset: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Logs go to stderr so `--json` output on stdout stays machine-readable.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("glyco=info,glyco_core=info,tower_http=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json")) {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let svc = GlycoService::new(&config.db_path)?;
    let off = OpenFoodFactsClient::new()?;

    match cli.command {
        Commands::Search { query, json } => cmd_search(&svc, &off, &query, json).await,
        Commands::Barcode { code, json } => cmd_barcode(&svc, &off, &code, json).await,
        Commands::Report { date, json } => cmd_report(&svc, date, json),
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                tracing::warn!("API key authentication disabled");
                None
            } else {
                let (key, new) = config.load_or_create_api_key()?;
                if new {
                    eprintln!("Generated new API key: {key}");
                    eprintln!("Include in requests: Authorization: Bearer {key}");
                }
                Some(key)
            };
            server::start_server(svc, off, port, &bind, api_key).await
        }
        Commands::Food { command } => match command {
            FoodCommands::Add {
                name,
                calories,
                carbs,
                sugar,
                fiber,
                protein,
                fat,
                sodium,
                gi,
                brand,
                barcode,
                description,
                json,
            } => {
                let food = NewFood {
                    name,
                    brand,
                    barcode,
                    description,
                    calories_per_100g: calories,
                    carbs_per_100g: carbs,
                    sugar_per_100g: sugar,
                    fiber_per_100g: fiber,
                    protein_per_100g: protein,
                    fat_per_100g: fat,
                    sodium_mg_per_100g: sodium,
                    glycemic_index: gi,
                    ..NewFood::default()
                };
                cmd_food_add(&svc, &food, json)
            }
            FoodCommands::List { search, json } => cmd_food_list(&svc, search.as_deref(), json),
            FoodCommands::Show { id, json } => cmd_food_show(&svc, id, json),
            FoodCommands::Delete { id, json } => cmd_food_delete(&svc, id, json),
        },
        Commands::Meal { command } => match command {
            MealCommands::Create {
                meal_type,
                name,
                at,
                notes,
                json,
            } => cmd_meal_create(&svc, &meal_type, name, at.as_deref(), notes, json),
            MealCommands::Add {
                meal_id,
                quantity,
                food,
                food_id,
                notes,
                json,
            } => {
                cmd_meal_add(
                    &svc,
                    &off,
                    meal_id,
                    food.as_deref(),
                    food_id,
                    quantity,
                    notes,
                    json,
                )
                .await
            }
            MealCommands::RemoveItem { item_id, json } => cmd_meal_remove_item(&svc, item_id, json),
            MealCommands::Show { id, json } => cmd_meal_show(&svc, id, json),
            MealCommands::List { date, days, json } => cmd_meal_list(&svc, date, days, json),
            MealCommands::Update {
                id,
                meal_type,
                name,
                at,
                notes,
                json,
            } => cmd_meal_update(
                &svc,
                id,
                meal_type.as_deref(),
                name,
                at.as_deref(),
                notes,
                json,
            ),
            MealCommands::Delete { id, json } => cmd_meal_delete(&svc, id, json),
        },
        Commands::Glucose { command } => match command {
            GlucoseCommands::Log {
                value,
                kind,
                at,
                meal_id,
                mood,
                notes,
                json,
            } => cmd_glucose_log(&svc, value, &kind, at.as_deref(), meal_id, mood, notes, json),
            GlucoseCommands::List { days, json } => cmd_glucose_list(&svc, days, json),
            GlucoseCommands::Update {
                id,
                value,
                kind,
                at,
                mood,
                notes,
                json,
            } => cmd_glucose_update(
                &svc,
                id,
                value,
                kind.as_deref(),
                at.as_deref(),
                mood,
                notes,
                json,
            ),
            GlucoseCommands::Delete { id, json } => cmd_glucose_delete(&svc, id, json),
            GlucoseCommands::Stats {
                days,
                start,
                end,
                json,
            } => cmd_glucose_stats(&svc, days, start.as_deref(), end.as_deref(), json),
        },
        Commands::Insulin { command } => match command {
            InsulinCommands::Log {
                units,
                kind,
                at,
                site,
                meal_id,
                notes,
                json,
            } => cmd_insulin_log(&svc, units, &kind, at.as_deref(), site, meal_id, notes, json),
            InsulinCommands::List { days, json } => cmd_insulin_list(&svc, days, json),
            InsulinCommands::Delete { id, json } => cmd_insulin_delete(&svc, id, json),
        },
        Commands::Note { command } => match command {
            NoteCommands::Set {
                date,
                notes,
                mood,
                activity,
                weight,
                sleep,
                symptoms,
                json,
            } => {
                let note = NewDailyNote {
                    notes,
                    mood,
                    physical_activity: activity,
                    weight_kg: weight,
                    sleep_hours: sleep,
                    symptoms,
                };
                cmd_note_set(&svc, date, &note, json)
            }
            NoteCommands::Show { date, json } => cmd_note_show(&svc, date, json),
            NoteCommands::Delete { date, json } => cmd_note_delete(&svc, date, json),
        },
        Commands::Med { command } => match command {
            MedCommands::Add {
                name,
                kind,
                brand,
                dosage,
                frequency,
                instructions,
                prescribed_by,
                start,
                end,
                inactive,
                notes,
                json,
            } => {
                let med = NewMedication {
                    name,
                    brand,
                    medication_type: kind,
                    dosage,
                    frequency,
                    instructions,
                    prescribed_by,
                    start_date: start,
                    end_date: end,
                    is_active: !inactive,
                    notes,
                };
                cmd_med_add(&svc, med, json)
            }
            MedCommands::List { active, json } => cmd_med_list(&svc, active, json),
            MedCommands::Show { id, json } => cmd_med_show(&svc, id, json),
            MedCommands::Update {
                id,
                name,
                kind,
                brand,
                dosage,
                frequency,
                instructions,
                prescribed_by,
                start,
                end,
                active,
                notes,
                json,
            } => {
                let update = UpdateMedication {
                    name,
                    brand: brand.map(Some),
                    medication_type: kind,
                    dosage: dosage.map(Some),
                    frequency: frequency.map(Some),
                    instructions: instructions.map(Some),
                    prescribed_by: prescribed_by.map(Some),
                    start_date: start.map(Some),
                    end_date: end.map(Some),
                    is_active: active,
                    notes: notes.map(Some),
                };
                cmd_med_update(&svc, id, &update, json)
            }
            MedCommands::Delete { id, json } => cmd_med_delete(&svc, id, json),
        },
        Commands::Target { command } => match command {
            TargetCommands::Range {
                low,
                high,
                reset,
                json,
            } => cmd_target_range(&svc, low, high, reset, json),
            TargetCommands::Ratio {
                grams_per_unit,
                reset,
                json,
            } => cmd_target_ratio(&svc, grams_per_unit, reset, json),
        },
    }
}
