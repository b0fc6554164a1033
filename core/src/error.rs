use thiserror::Error;

/// Failures from the pure nutrition and glucose calculations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalcError {
    #[error("Quantity must be greater than 0 grams (got {0})")]
    InvalidQuantity(f64),
    #[error("Target range must satisfy 0 < low < high (got {low}-{high} mg/dL)")]
    InvalidTargetRange { low: f64, high: f64 },
    #[error("Carb ratio must be greater than 0 grams per unit (got {0})")]
    InvalidCarbRatio(f64),
}
