use crate::error::{FunctionError, Result};
use crate::units::{Quantity, Unit};
use serde::{Deserialize, Serialize};

/// Input or output of a function call: a scalar or an array, with or without
/// a unit.
///
/// Scalars are evaluated as one-element arrays and squeezed back on output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Values {
    data: Vec<f64>,
    scalar: bool,
    unit: Option<Unit>,
}

impl Values {
    pub fn scalar(value: f64) -> Self {
        Self {
            data: vec![value],
            scalar: true,
            unit: None,
        }
    }

    pub fn array(data: Vec<f64>) -> Self {
        Self {
            data,
            scalar: false,
            unit: None,
        }
    }

    pub fn with_unit(mut self, unit: Unit) -> Self {
        self.unit = Some(unit);
        self
    }

    pub fn is_scalar(&self) -> bool {
        self.scalar
    }

    pub fn has_unit(&self) -> bool {
        self.unit.is_some()
    }

    pub fn unit(&self) -> Option<&Unit> {
        self.unit.as_ref()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn into_vec(self) -> Vec<f64> {
        self.data
    }

    /// The value of a scalar output.
    pub fn as_scalar(&self) -> Option<f64> {
        if self.scalar {
            self.data.first().copied()
        } else {
            None
        }
    }

    pub(crate) fn from_raw(data: Vec<f64>, scalar: bool) -> Self {
        Self {
            data,
            scalar,
            unit: None,
        }
    }

    pub(crate) fn from_quantity(quantity: Quantity, scalar: bool) -> Self {
        Self {
            data: quantity.values,
            scalar,
            unit: Some(quantity.unit),
        }
    }
}

impl From<f64> for Values {
    fn from(value: f64) -> Self {
        Self::scalar(value)
    }
}

impl From<Vec<f64>> for Values {
    fn from(data: Vec<f64>) -> Self {
        Self::array(data)
    }
}

impl From<&[f64]> for Values {
    fn from(data: &[f64]) -> Self {
        Self::array(data.to_vec())
    }
}

impl<const N: usize> From<[f64; N]> for Values {
    fn from(data: [f64; N]) -> Self {
        Self::array(data.to_vec())
    }
}

/// Positional inputs after validation: equal-length columns, with their
/// common unit status.
#[derive(Debug)]
pub(crate) struct Prepared {
    pub columns: Vec<Vec<f64>>,
    pub units: Option<Vec<Unit>>,
    pub scalar: bool,
}

impl Prepared {
    pub fn slices(&self) -> Vec<&[f64]> {
        self.columns.iter().map(Vec::as_slice).collect()
    }

    pub fn quantities(&self) -> Option<Vec<Quantity>> {
        let units = self.units.as_ref()?;
        Some(
            self.columns
                .iter()
                .zip(units)
                .map(|(column, unit)| Quantity::new(column.clone(), unit.clone()))
                .collect(),
        )
    }
}

/// Checks the arity and unit status of positional inputs and broadcasts
/// single-element inputs to the common length.
pub(crate) fn prepare(function: &str, arity: usize, inputs: &[Values]) -> Result<Prepared> {
    if inputs.len() != arity {
        return Err(FunctionError::design(format!(
            "function {function} takes {arity} positional input(s), got {}",
            inputs.len()
        )));
    }
    let with_units = inputs.iter().filter(|input| input.has_unit()).count();
    if with_units != 0 && with_units != inputs.len() {
        return Err(FunctionError::unit(format!(
            "inputs of function {function} must either all carry units or none"
        )));
    }

    let length = inputs.iter().map(Values::len).max().unwrap_or(0);
    let mut columns = Vec::with_capacity(inputs.len());
    for input in inputs {
        let column = match input.len() {
            n if n == length => input.data.clone(),
            1 => vec![input.data[0]; length],
            n => {
                return Err(FunctionError::Shape(format!(
                    "input of length {n} cannot be broadcast to length {length} in {function}"
                )))
            }
        };
        columns.push(column);
    }

    let units = (with_units != 0).then(|| {
        inputs
            .iter()
            .filter_map(|input| input.unit.clone())
            .collect()
    });
    Ok(Prepared {
        columns,
        units,
        scalar: inputs.iter().all(Values::is_scalar),
    })
}
