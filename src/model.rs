//! Data models for order stacking.
//!
//! This module defines the records that flow between the upstream order API,
//! the stacker and the HTTP responses:
//! - `StackBox`: One order component with weight and weight-bearing capacity
//! - `Payload`: Opaque attributes carried through untouched
//! - `Customer`: A customer record from the upstream directory

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Validation error for component data.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Invalid weight: {0}")]
    InvalidWeight(String),
    #[error("Invalid capacity: {0}")]
    InvalidCapacity(String),
    #[error("Missing attribute '{0}'")]
    MissingAttribute(&'static str),
    #[error("Attribute '{name}' is not a number: {value}")]
    InvalidAttribute { name: &'static str, value: String },
}

fn validate_finite(value: f64, name: &str) -> Result<(), String> {
    if value.is_nan() || value.is_infinite() {
        return Err(format!("{} must be a finite number, got: {}", name, value));
    }
    Ok(())
}

/// Opaque attributes of a record (identifier, prices, product metadata, ...).
///
/// Serialized transparently as a JSON object so it can be flattened into the
/// surrounding record.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Payload(Map<String, Value>);

impl Payload {
    #[cfg(test)]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an attribute (builder style).
    #[cfg(test)]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reads a numeric attribute.
    ///
    /// Numbers encoded as strings (`"12.5"`) are accepted as well, since
    /// upstream price fields are not consistently typed.
    pub fn number(&self, key: &'static str) -> Result<f64, ValidationError> {
        let value = self
            .0
            .get(key)
            .ok_or(ValidationError::MissingAttribute(key))?;
        let parsed = match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        };
        parsed.ok_or_else(|| ValidationError::InvalidAttribute {
            name: key,
            value: value.to_string(),
        })
    }
}

/// One order component to be stacked.
///
/// # Fields
/// * `weight` - Mass of the box
/// * `capacity` - Weight this box can still bear on top of it
///   (`max_weight_capacity` on the wire)
/// * `payload` - All remaining attributes of the component record
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StackBox {
    pub weight: f64,
    #[serde(rename = "max_weight_capacity")]
    pub capacity: f64,
    #[serde(flatten)]
    pub payload: Payload,
}

impl StackBox {
    /// Creates a new box after checking that both numbers are finite.
    ///
    /// Zero or negative values are accepted; the stacker treats a box with
    /// a non-positive capacity as one that nothing can be placed on.
    pub fn new(weight: f64, capacity: f64, payload: Payload) -> Result<Self, ValidationError> {
        validate_finite(weight, "Weight").map_err(ValidationError::InvalidWeight)?;
        validate_finite(capacity, "Capacity").map_err(ValidationError::InvalidCapacity)?;
        Ok(Self {
            weight,
            capacity,
            payload,
        })
    }

    /// Creates a box without payload.
    #[cfg(test)]
    pub fn bare(weight: f64, capacity: f64) -> Self {
        Self {
            weight,
            capacity,
            payload: Payload::new(),
        }
    }

    /// Price of this component line (`unit_price × quantity_in_box`).
    pub fn line_total(&self) -> Result<f64, ValidationError> {
        let unit_price = self.payload.number("unit_price")?;
        let quantity = self.payload.number("quantity_in_box")?;
        Ok(unit_price * quantity)
    }
}

/// Sums the line totals of all components of an order.
pub fn invoice_total(components: &[StackBox]) -> Result<f64, ValidationError> {
    components.iter().map(StackBox::line_total).sum()
}

/// A customer from the upstream directory.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Customer {
    pub id: u64,
    #[serde(flatten)]
    pub details: Payload,
}

/// An order record, passed through as delivered by the upstream API.
pub type Order = Payload;
