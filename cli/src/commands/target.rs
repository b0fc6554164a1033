use anyhow::{Result, bail};

use glyco_core::service::GlycoService;

/// Show the glucose target range, set it when both bounds are given, or
/// restore the default with `reset`.
pub(crate) fn cmd_target_range(
    svc: &GlycoService,
    low: Option<f64>,
    high: Option<f64>,
    reset: bool,
    json: bool,
) -> Result<()> {
    let range = match (low, high) {
        (None, None) if reset => svc.reset_target_range()?,
        _ if reset => bail!("--reset cannot be combined with LOW and HIGH"),
        (None, None) => svc.target_range()?,
        (Some(low), Some(high)) => svc.set_target_range(low, high)?,
        _ => bail!("Provide both LOW and HIGH to change the target range"),
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "low": range.low(), "high": range.high() })
        );
    } else {
        let verb = if reset {
            "reset to"
        } else if low.is_some() {
            "set to"
        } else {
            "is"
        };
        println!(
            "Target range {verb} {:.0}-{:.0} mg/dL",
            range.low(),
            range.high()
        );
    }
    Ok(())
}

/// Show the carb ratio, set it when given, or restore the default with `reset`.
pub(crate) fn cmd_target_ratio(
    svc: &GlycoService,
    grams_per_unit: Option<f64>,
    reset: bool,
    json: bool,
) -> Result<()> {
    let ratio = match (grams_per_unit, reset) {
        (Some(_), true) => bail!("--reset cannot be combined with GRAMS_PER_UNIT"),
        (None, true) => svc.reset_carb_ratio()?,
        (Some(g), false) => svc.set_carb_ratio(g)?,
        (None, false) => svc.carb_ratio()?,
    };

    if json {
        println!(
            "{}",
            serde_json::json!({ "grams_per_unit": ratio.grams_per_unit() })
        );
    } else {
        println!("1 U insulin per {:.1} g carbs", ratio.grams_per_unit());
    }
    Ok(())
}
