//! Declarative description of a function class.
//!
//! A declaration is a JSON document such as
//!
//! ```json
//! {
//!   "description": "A simple power-law",
//!   "latex": "$K x^{index}$",
//!   "parameters": {
//!     "K":     { "desc": "Normalization", "initial value": 1.0, "min": 1e-30, "max": 1e3 },
//!     "index": { "desc": "Photon index", "initial value": -2.0, "min": -10, "max": 10 }
//!   }
//! }
//! ```
//!
//! It is checked against the calling sequence of the class's evaluation rule:
//! the declared parameters must be exactly the ones the rule consumes.

use crate::error::{FunctionError, Result};
use crate::parameter::Parameter;
use crate::units::Unit;
use indexmap::IndexMap;
use serde::Deserialize;
use std::collections::BTreeSet;

/// Formula text used when a declaration carries none.
pub const NO_LATEX_FORMULA: &str = "(no latex formula available)";

const POSITIONAL_VARIABLES: [&str; 3] = ["x", "y", "z"];

#[derive(Debug, Deserialize)]
struct RawDeclaration {
    description: Option<String>,
    latex: Option<String>,
    parameters: Option<IndexMap<String, RawParameter>>,
}

#[derive(Debug, Deserialize)]
struct RawParameter {
    #[serde(rename = "initial value")]
    initial_value: Option<f64>,
    desc: Option<String>,
    min: Option<f64>,
    max: Option<f64>,
    delta: Option<f64>,
    unit: Option<String>,
    #[serde(default)]
    fix: bool,
}

/// Declared default state of one parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDeclaration {
    pub name: String,
    pub initial_value: f64,
    pub description: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub delta: Option<f64>,
    pub unit: Unit,
    pub free: bool,
}

impl ParameterDeclaration {
    pub fn new(name: impl Into<String>, description: impl Into<String>, initial_value: f64) -> Self {
        Self {
            name: name.into(),
            initial_value,
            description: description.into(),
            min: None,
            max: None,
            delta: None,
            unit: Unit::dimensionless(),
            free: true,
        }
    }

    pub fn with_bounds(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min = min;
        self.max = max;
        self
    }

    pub fn fixed(mut self) -> Self {
        self.free = false;
        self
    }

    /// A fresh parameter in its declared default state.
    pub fn instantiate(&self) -> Parameter {
        Parameter::new(self.name.clone(), self.initial_value)
            .with_bounds(self.min, self.max)
            .with_delta(self.delta)
            .with_description(self.description.clone())
            .with_unit(self.unit.clone())
            .with_free(self.free)
    }

    fn from_raw(function: &str, name: &str, raw: RawParameter) -> Result<Self> {
        let initial_value = raw.initial_value.ok_or_else(|| {
            FunctionError::definition(
                function,
                format!("value for parameter {name} must be specified"),
            )
        })?;
        let description = raw.desc.ok_or_else(|| {
            FunctionError::definition(function, format!("desc for parameter {name} must be specified"))
        })?;
        let unit = match raw.unit.as_deref() {
            None | Some("") => Unit::dimensionless(),
            Some(spec) => Unit::parse(spec).map_err(|err| {
                FunctionError::definition(function, format!("unit of parameter {name}: {err}"))
            })?,
        };
        Ok(Self {
            name: name.to_string(),
            initial_value,
            description,
            min: raw.min,
            max: raw.max,
            delta: raw.delta,
            unit,
            free: !raw.fix,
        })
    }
}

/// Immutable metadata of a function class.
#[derive(Debug, Clone)]
pub struct FunctionDeclaration {
    name: String,
    description: String,
    latex: Option<String>,
    parameters: IndexMap<String, ParameterDeclaration>,
    variables: Vec<&'static str>,
    /// Declaration index of each parameter in calling-sequence order.
    parameter_order: Vec<usize>,
}

impl FunctionDeclaration {
    /// Parses a JSON declaration and validates it against `calling_sequence`.
    pub fn from_json(name: &str, text: &str, calling_sequence: &[&'static str]) -> Result<Self> {
        let raw: RawDeclaration = serde_json::from_str(text).map_err(|err| {
            FunctionError::definition(name, format!("declaration is not valid JSON: {err}"))
        })?;

        let description = raw.description.ok_or_else(|| {
            FunctionError::definition(name, "you have to provide a 'description' token")
        })?;
        let raw_parameters = raw.parameters.ok_or_else(|| {
            FunctionError::definition(name, "you have to provide a 'parameters' token")
        })?;

        let parameters = raw_parameters
            .into_iter()
            .map(|(parameter_name, raw)| ParameterDeclaration::from_raw(name, &parameter_name, raw))
            .collect::<Result<Vec<_>>>()?;

        Self::new(name, description, raw.latex, parameters, calling_sequence)
    }

    /// Builds a declaration from already-parsed parts.
    pub fn new(
        name: &str,
        description: impl Into<String>,
        latex: Option<String>,
        parameters: Vec<ParameterDeclaration>,
        calling_sequence: &[&'static str],
    ) -> Result<Self> {
        let mut declared = IndexMap::new();
        for parameter in parameters {
            check_initial_value(name, &parameter)?;
            if declared.contains_key(&parameter.name) {
                return Err(FunctionError::definition(
                    name,
                    format!("parameter {} is declared twice", parameter.name),
                ));
            }
            declared.insert(parameter.name.clone(), parameter);
        }

        let (variables, consumed) = split_calling_sequence(name, calling_sequence)?;
        check_parameters_match(name, &declared, &consumed)?;

        let parameter_order = consumed
            .iter()
            .filter_map(|parameter| declared.get_index_of(*parameter))
            .collect();

        Ok(Self {
            name: name.to_string(),
            description: description.into(),
            latex,
            parameters: declared,
            variables,
            parameter_order,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// The declared formula, or [`NO_LATEX_FORMULA`].
    pub fn formula(&self) -> &str {
        self.latex.as_deref().unwrap_or(NO_LATEX_FORMULA)
    }

    pub fn has_formula(&self) -> bool {
        self.latex.is_some()
    }

    /// Number of positional variables the evaluation rule consumes.
    pub fn arity(&self) -> usize {
        self.variables.len()
    }

    pub fn variables(&self) -> &[&'static str] {
        &self.variables
    }

    pub fn parameters(&self) -> &IndexMap<String, ParameterDeclaration> {
        &self.parameters
    }

    pub(crate) fn parameter_order(&self) -> &[usize] {
        &self.parameter_order
    }
}

fn check_initial_value(function: &str, parameter: &ParameterDeclaration) -> Result<()> {
    let below = parameter.min.is_some_and(|min| parameter.initial_value < min);
    let above = parameter.max.is_some_and(|max| parameter.initial_value > max);
    if below || above {
        return Err(FunctionError::definition(
            function,
            format!(
                "initial value {} of parameter {} is outside its bounds",
                parameter.initial_value, parameter.name
            ),
        ));
    }
    Ok(())
}

/// Splits a calling sequence into positional variables and parameter names.
/// The variables must be a non-empty prefix of `x, y, z`.
fn split_calling_sequence<'a>(
    function: &str,
    calling_sequence: &[&'a str],
) -> Result<(Vec<&'a str>, Vec<&'a str>)> {
    let (variables, others): (Vec<&str>, Vec<&str>) = calling_sequence
        .iter()
        .copied()
        .partition(|name| POSITIONAL_VARIABLES.contains(name));

    if variables.is_empty() {
        return Err(FunctionError::definition(
            function,
            format!(
                "the variables of the evaluation rule must be one or more among {}",
                POSITIONAL_VARIABLES.join(",")
            ),
        ));
    }
    let expected = &POSITIONAL_VARIABLES[..variables.len().min(POSITIONAL_VARIABLES.len())];
    if variables.as_slice() != expected {
        return Err(FunctionError::definition(
            function,
            format!(
                "the variables {} are out of order. Should be {}",
                variables.join(","),
                expected.join(",")
            ),
        ));
    }
    Ok((variables, others))
}

fn check_parameters_match(
    function: &str,
    declared: &IndexMap<String, ParameterDeclaration>,
    consumed: &[&str],
) -> Result<()> {
    let declared_names: BTreeSet<&str> = declared.keys().map(String::as_str).collect();
    let consumed_names: BTreeSet<&str> = consumed.iter().copied().collect();
    if declared_names == consumed_names {
        return Ok(());
    }

    let unused: Vec<&str> = declared_names.difference(&consumed_names).copied().collect();
    let undeclared: Vec<&str> = consumed_names.difference(&declared_names).copied().collect();
    let mut problems = Vec::new();
    if !unused.is_empty() {
        problems.push(format!(
            "parameters {} have init values but are not used in the evaluation rule",
            unused.join(",")
        ));
    }
    if !undeclared.is_empty() {
        problems.push(format!(
            "parameters {} are used in the evaluation rule but do not have init values",
            undeclared.join(",")
        ));
    }
    Err(FunctionError::definition(function, problems.join("; ")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const LINE: &str = r#"{
        "description": "A straight line",
        "latex": "$a + b x$",
        "parameters": {
            "a": { "desc": "intercept", "initial value": 0.0 },
            "b": { "desc": "slope", "initial value": 1.0, "min": -5, "max": 5, "fix": true }
        }
    }"#;

    #[test]
    fn parses_declaration_and_infers_arity() {
        let declaration =
            FunctionDeclaration::from_json("line", LINE, &["x", "b", "a"]).expect("valid");
        assert_eq!(declaration.arity(), 1);
        assert_eq!(declaration.formula(), "$a + b x$");
        let names: Vec<&str> = declaration.parameters().keys().map(String::as_str).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert_eq!(declaration.parameter_order(), &[1, 0]);
        assert!(!declaration.parameters()["b"].free);
    }

    #[test]
    fn rejects_mismatched_parameters() {
        let err = FunctionDeclaration::from_json("line", LINE, &["x", "a"]).expect_err("b unused");
        assert!(err.to_string().contains("b have init values but are not used"));

        let err = FunctionDeclaration::from_json("line", LINE, &["x", "a", "b", "c"])
            .expect_err("c undeclared");
        assert!(err.to_string().contains("c are used in the evaluation rule"));
    }

    #[test]
    fn rejects_missing_desc_and_missing_value() {
        let text = r#"{ "description": "d", "parameters": { "a": { "initial value": 1.0 } } }"#;
        let err = FunctionDeclaration::from_json("f", text, &["x", "a"]).expect_err("no desc");
        assert!(matches!(err, FunctionError::Definition { .. }));

        let text = r#"{ "description": "d", "parameters": { "a": { "desc": "a" } } }"#;
        let err = FunctionDeclaration::from_json("f", text, &["x", "a"]).expect_err("no value");
        assert!(err.to_string().contains("value for parameter a must be specified"));
    }

    #[test]
    fn rejects_out_of_order_or_missing_variables() {
        let text = r#"{ "description": "d", "parameters": {} }"#;
        assert!(FunctionDeclaration::from_json("f", text, &["y"]).is_err());
        assert!(FunctionDeclaration::from_json("f", text, &["x", "z"]).is_err());
        assert!(FunctionDeclaration::from_json("f", text, &[]).is_err());
        let declaration =
            FunctionDeclaration::from_json("f", text, &["x", "y", "z"]).expect("3-d");
        assert_eq!(declaration.arity(), 3);
    }

    #[test]
    fn missing_latex_uses_placeholder() {
        let text = r#"{ "description": "d", "parameters": { "k": { "desc": "k", "initial value": 1 } } }"#;
        let declaration = FunctionDeclaration::from_json("f", text, &["x", "k"]).expect("valid");
        assert!(!declaration.has_formula());
        assert_eq!(declaration.formula(), NO_LATEX_FORMULA);
    }

    #[test]
    fn parses_parameter_units_and_rejects_bad_ones() {
        let text = r#"{ "description": "d", "parameters": { "k": { "desc": "k", "initial value": 1, "unit": "keV" } } }"#;
        let declaration = FunctionDeclaration::from_json("f", text, &["x", "k"]).expect("valid");
        assert_eq!(declaration.parameters()["k"].unit, Unit::parse("keV").expect("keV"));

        let text = r#"{ "description": "d", "parameters": { "k": { "desc": "k", "initial value": 1, "unit": "parsnip" } } }"#;
        assert!(FunctionDeclaration::from_json("f", text, &["x", "k"]).is_err());
    }
}
