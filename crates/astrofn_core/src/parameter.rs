use crate::error::{FunctionError, Result};
use crate::units::Unit;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// A parameter shared between a primitive function and every composite built
/// from it.
///
/// Composites reuse, and rename in place, the parameters of their operands, so
/// two composites built from the same primitive observe each other's changes.
/// Not `Sync`: callers mutating from several threads must serialize access
/// themselves.
pub type SharedParameter = Rc<RefCell<Parameter>>;

/// Parameters keyed by the name their owner knows them under, in declaration order.
pub type ParameterMap = IndexMap<String, SharedParameter>;

/// A named scalar with bounds, a unit and a free/fixed flag.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    value: f64,
    min: Option<f64>,
    max: Option<f64>,
    delta: Option<f64>,
    description: String,
    unit: Unit,
    free: bool,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min: None,
            max: None,
            delta: None,
            description: String::new(),
            unit: Unit::dimensionless(),
            free: true,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn with_delta(mut self, delta: Option<f64>) -> Self {
        self.delta = delta;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = unit;
        self
    }

    pub fn with_free(mut self, free: bool) -> Self {
        self.free = free;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn min(&self) -> Option<f64> {
        self.min
    }

    pub fn max(&self) -> Option<f64> {
        self.max
    }

    pub fn delta(&self) -> Option<f64> {
        self.delta
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn unit(&self) -> &Unit {
        &self.unit
    }

    pub fn is_free(&self) -> bool {
        self.free
    }

    pub fn set_free(&mut self, free: bool) {
        self.free = free;
    }

    pub fn set_unit(&mut self, unit: Unit) {
        self.unit = unit;
    }

    /// Sets the value, refusing values outside `[min, max]`.
    pub fn set_value(&mut self, value: f64) -> Result<()> {
        check_bounds(&self.name, value, self.min, self.max)?;
        self.value = value;
        Ok(())
    }

    /// Renames in place; every holder of the shared handle sees the new name.
    pub fn rename(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// An independent copy: same state, new identity.
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    pub fn into_shared(self) -> SharedParameter {
        Rc::new(RefCell::new(self))
    }

    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot {
            name: self.name.clone(),
            value: self.value,
            min: self.min,
            max: self.max,
            delta: self.delta,
            unit: self.unit.clone(),
            free: self.free,
        }
    }

    /// Overwrites the mutable state from a snapshot, keeping name and description.
    ///
    /// Nothing changes when the snapshot's value lies outside its own bounds.
    pub fn restore(&mut self, snapshot: &ParameterSnapshot) -> Result<()> {
        check_bounds(&self.name, snapshot.value, snapshot.min, snapshot.max)?;
        self.value = snapshot.value;
        self.min = snapshot.min;
        self.max = snapshot.max;
        self.delta = snapshot.delta;
        self.unit = snapshot.unit.clone();
        self.free = snapshot.free;
        Ok(())
    }
}

fn check_bounds(name: &str, value: f64, min: Option<f64>, max: Option<f64>) -> Result<()> {
    let below = min.is_some_and(|min| value < min);
    let above = max.is_some_and(|max| value > max);
    if below || above || value.is_nan() {
        return Err(FunctionError::ParameterOutOfBounds {
            parameter: name.to_string(),
            value,
            min: format_bound(min),
            max: format_bound(max),
        });
    }
    Ok(())
}

fn format_bound(bound: Option<f64>) -> String {
    bound.map_or_else(|| "None".to_string(), |value| value.to_string())
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} = {} [{}] (min: {}, max: {}, {})",
            self.name,
            self.value,
            self.unit,
            format_bound(self.min),
            format_bound(self.max),
            if self.free { "free" } else { "fixed" }
        )
    }
}

/// Serializable state of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSnapshot {
    pub name: String,
    pub value: f64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub delta: Option<f64>,
    pub unit: Unit,
    pub free: bool,
}
