//! Functions built by combining other functions, or scalars, through an
//! operator or through functional composition.
//!
//! A composite does not copy its operands' parameters: it shares them and
//! renames them in place to `<declared name>_<position>`, where the position is
//! the 1-based slot of the owning primitive in the composite's flattened list.
//! Composites built from the same primitives therefore observe each other's
//! parameter changes.

use crate::error::{FunctionError, Result};
use crate::expression;
use crate::function::Function;
use crate::parameter::{ParameterMap, ParameterSnapshot};
use crate::units::{Quantity, Unit};
use indexmap::IndexMap;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::iter;
use std::rc::Rc;

/// Name shared by every composite function. Reserved in the registry.
pub const COMPOSITE_NAME: &str = "composite";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    Add,
    Subtract,
    Negate,
    Multiply,
    Divide,
    Power,
    Abs,
    Compose,
}

enum Kernel {
    Unary(fn(f64) -> f64),
    Binary(fn(f64, f64) -> f64),
    Compose,
}

impl Operation {
    /// The literal used in expressions.
    pub fn symbol(self) -> &'static str {
        match self {
            Operation::Add => "+",
            Operation::Subtract => "-",
            Operation::Negate => "*-",
            Operation::Multiply => "*",
            Operation::Divide => "/",
            Operation::Power => "**",
            Operation::Abs => "abs",
            Operation::Compose => "of",
        }
    }

    pub fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => Operation::Add,
            "-" => Operation::Subtract,
            "*-" => Operation::Negate,
            "*" => Operation::Multiply,
            "/" => Operation::Divide,
            "**" => Operation::Power,
            "abs" => Operation::Abs,
            "of" => Operation::Compose,
            _ => return None,
        })
    }

    pub fn is_unary(self) -> bool {
        matches!(self, Operation::Negate | Operation::Abs)
    }

    fn kernel(self) -> Kernel {
        match self {
            Operation::Add => Kernel::Binary(|a, b| a + b),
            Operation::Subtract => Kernel::Binary(|a, b| a - b),
            Operation::Multiply => Kernel::Binary(|a, b| a * b),
            Operation::Divide => Kernel::Binary(|a, b| a / b),
            Operation::Power => Kernel::Binary(f64::powf),
            Operation::Negate => Kernel::Unary(|a| -a),
            Operation::Abs => Kernel::Unary(f64::abs),
            Operation::Compose => Kernel::Compose,
        }
    }
}

/// One side of an operation.
#[derive(Debug, Clone)]
pub enum Operand {
    Function(Function),
    Scalar(f64),
}

impl Operand {
    /// The text standing for this operand in an identifier expression.
    /// Negative scalars are parenthesized: `-2.0 ** f` would read as `-(2.0 ** f)`.
    fn uuid_token(&self) -> String {
        match self {
            Operand::Function(function) => function.uuid().to_string(),
            Operand::Scalar(value) if value.is_sign_negative() => format!("({value:?})"),
            Operand::Scalar(value) => format!("{value:?}"),
        }
    }

    fn evaluate_columns(&self, columns: &[&[f64]]) -> Result<Vec<f64>> {
        match self {
            Operand::Function(function) => function.evaluate_columns(columns),
            Operand::Scalar(value) => Ok(vec![*value; column_length(columns)]),
        }
    }

    fn evaluate_quantities(&self, inputs: &[Quantity]) -> Result<Quantity> {
        match self {
            Operand::Function(function) => function.evaluate_quantities(inputs),
            Operand::Scalar(value) => {
                let length = inputs.first().map_or(0, |input| input.values.len());
                Ok(Quantity::new(vec![*value; length], Unit::dimensionless()))
            }
        }
    }
}

fn column_length(columns: &[&[f64]]) -> usize {
    columns.first().map_or(0, |column| column.len())
}

impl From<&Function> for Operand {
    fn from(function: &Function) -> Self {
        Operand::Function(function.clone())
    }
}

impl From<Function> for Operand {
    fn from(function: Function) -> Self {
        Operand::Function(function)
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Scalar(value)
    }
}

/// The operation tree of a composite function.
#[derive(Debug)]
pub(crate) struct Composite {
    operation: Operation,
    first: Operand,
    second: Option<Operand>,
    /// De-duplicated primitives in first-seen depth-first order.
    functions: Vec<Function>,
}

/// Builds `first <operation> second`.
///
/// Between two functions, both must take the same number of variables;
/// composition needs two functions of one variable. A product or quotient of
/// two functions flags one of them to report dimensionless output when units
/// are bound, so the composite's unit stays well defined.
pub fn combine(
    operation: Operation,
    first: impl Into<Operand>,
    second: impl Into<Operand>,
) -> Result<Function> {
    if operation.is_unary() {
        return Err(FunctionError::design(format!(
            "operation {} takes a single operand",
            operation.symbol()
        )));
    }
    let first = first.into();
    let second = second.into();
    check_finite(&first)?;
    check_finite(&second)?;

    let arity = match (&first, &second) {
        (Operand::Function(a), Operand::Function(b)) => {
            if operation == Operation::Compose {
                if a.arity() != 1 || b.arity() != 1 {
                    return Err(FunctionError::design(
                        "can only compose with .of functions of 1 variable",
                    ));
                }
            } else if a.arity() != b.arity() {
                return Err(FunctionError::design(format!(
                    "cannot combine a function of {} variable(s) with one of {}",
                    a.arity(),
                    b.arity()
                )));
            }
            a.arity()
        }
        (Operand::Function(_), Operand::Scalar(_)) | (Operand::Scalar(_), Operand::Function(_))
            if operation == Operation::Compose =>
        {
            return Err(FunctionError::design(
                "both members of .of must be functions",
            ));
        }
        (Operand::Function(function), Operand::Scalar(_))
        | (Operand::Scalar(_), Operand::Function(function)) => function.arity(),
        (Operand::Scalar(_), Operand::Scalar(_)) => {
            return Err(FunctionError::design(
                "at least one operand must be a function",
            ));
        }
    };

    let composite = assemble(operation, first, Some(second), arity);
    if let Some(Composite {
        first: Operand::Function(a),
        second: Some(Operand::Function(b)),
        ..
    }) = composite.composite()
    {
        match operation {
            Operation::Multiply => flag_product(a, b, &composite),
            Operation::Divide => flag_quotient(a, b),
            _ => {}
        }
    }
    Ok(composite)
}

/// Builds `(<operation> operand)` for the unary operations.
pub fn apply(operation: Operation, operand: &Function) -> Result<Function> {
    if !operation.is_unary() {
        return Err(FunctionError::design(format!(
            "operation {} takes two operands",
            operation.symbol()
        )));
    }
    Ok(assemble(
        operation,
        Operand::Function(operand.clone()),
        None,
        operand.arity(),
    ))
}

fn check_finite(operand: &Operand) -> Result<()> {
    match operand {
        Operand::Scalar(value) if !value.is_finite() => Err(FunctionError::design(format!(
            "cannot use the non-finite value {value} in a composite function"
        ))),
        _ => Ok(()),
    }
}

fn fixed_output_is_dimensionless(units: &[Unit]) -> bool {
    units.last().is_some_and(Unit::is_dimensionless)
}

/// Unit tie-break for `a * b`.
///
/// A function whose fixed output is dimensionless (a multiplicative model)
/// gives way to the other operand; otherwise `a` keeps its unit and `b` is
/// made dimensionless.
fn flag_product(a: &Function, b: &Function, composite: &Function) {
    match a.fixed_units() {
        Some(fixed) if fixed_output_is_dimensionless(&fixed) => {
            a.set_make_dimensionless();
            if let Some(other) = b.fixed_units() {
                if fixed_output_is_dimensionless(&other) {
                    b.set_make_dimensionless();
                    composite.set_fixed_units(Some(other));
                }
            }
        }
        _ => b.set_make_dimensionless(),
    }
}

/// Unit tie-break for `a / b`. Unlike the product, a dimensionless fixed
/// numerator never marks the composite as fixed.
fn flag_quotient(a: &Function, b: &Function) {
    match a.fixed_units() {
        Some(fixed) if fixed_output_is_dimensionless(&fixed) => a.set_make_dimensionless(),
        _ => b.set_make_dimensionless(),
    }
}

/// Flattens the operands, renames the shared parameters and builds both
/// expressions. The operands must already be valid for `operation`.
fn assemble(operation: Operation, first: Operand, second: Option<Operand>, arity: usize) -> Function {
    let mut functions: Vec<Function> = Vec::new();
    for operand in iter::once(&first).chain(second.as_ref()) {
        if let Operand::Function(function) = operand {
            for primitive in function.functions() {
                if !functions.iter().any(|known| known.same_instance(&primitive)) {
                    functions.push(primitive);
                }
            }
        }
    }

    let mut parameters = ParameterMap::new();
    for (index, function) in functions.iter().enumerate() {
        for (declared, parameter) in function.parameters() {
            let name = format!("{declared}_{}", index + 1);
            parameter.borrow_mut().rename(name.clone());
            parameters.insert(name, Rc::clone(parameter));
        }
    }

    let uuid = match &second {
        None => format!("({} {})", operation.symbol(), first.uuid_token()),
        Some(second) => format!(
            "({} {} {})",
            first.uuid_token(),
            operation.symbol(),
            second.uuid_token()
        ),
    };
    let mut expression = uuid.clone();
    for (index, function) in functions.iter().enumerate() {
        expression = expression.replace(
            function.uuid(),
            &format!("{}{{{}}}", function.name(), index + 1),
        );
    }
    debug!(
        "built composite {expression} with {} parameter(s)",
        parameters.len()
    );

    Function::from_composite(
        uuid,
        expression,
        arity,
        parameters,
        Composite {
            operation,
            first,
            second,
            functions,
        },
    )
}

impl Composite {
    pub(crate) fn functions(&self) -> &[Function] {
        &self.functions
    }

    fn second(&self) -> Result<&Operand> {
        self.second.as_ref().ok_or_else(|| {
            FunctionError::design(format!(
                "operation {} is missing its second operand",
                self.operation.symbol()
            ))
        })
    }

    pub(crate) fn evaluate_columns(&self, columns: &[&[f64]]) -> Result<Vec<f64>> {
        match self.operation.kernel() {
            Kernel::Unary(kernel) => Ok(self
                .first
                .evaluate_columns(columns)?
                .into_iter()
                .map(kernel)
                .collect()),
            Kernel::Binary(kernel) => {
                let a = self.first.evaluate_columns(columns)?;
                let b = self.second()?.evaluate_columns(columns)?;
                Ok(a.into_iter().zip(b).map(|(a, b)| kernel(a, b)).collect())
            }
            Kernel::Compose => {
                let inner = self.second()?.evaluate_columns(columns)?;
                self.first.evaluate_columns(&[inner.as_slice()])
            }
        }
    }

    pub(crate) fn evaluate_quantities(&self, inputs: &[Quantity]) -> Result<Quantity> {
        match self.operation.kernel() {
            Kernel::Unary(kernel) => {
                let operand = self.first.evaluate_quantities(inputs)?;
                Ok(Quantity::new(
                    operand.values.into_iter().map(kernel).collect(),
                    operand.unit,
                ))
            }
            Kernel::Binary(kernel) => {
                let a = self.first.evaluate_quantities(inputs)?;
                let b = self.second()?.evaluate_quantities(inputs)?;
                combine_quantities(self.operation, kernel, a, b)
            }
            Kernel::Compose => {
                let inner = self.second()?.evaluate_quantities(inputs)?;
                self.first.evaluate_quantities(&[inner])
            }
        }
    }

    /// Binds units on every primitive, the output unit becoming dimensionless
    /// for the flagged ones.
    pub(crate) fn forward_units(&self, units: &[Unit]) -> Result<()> {
        let mut dimensionless = units.to_vec();
        if let Some(output) = dimensionless.last_mut() {
            *output = Unit::dimensionless();
        }
        for function in &self.functions {
            if function.makes_dimensionless() {
                function.set_units(&dimensionless)?;
            } else {
                function.set_units(units)?;
            }
        }
        Ok(())
    }

    /// Rebuilds the operation tree over duplicated primitives. Operands shared
    /// in the original stay shared in the copy.
    pub(crate) fn duplicate(&self) -> Function {
        let copies: Vec<(Function, Function)> = self
            .functions
            .iter()
            .map(|function| (function.clone(), function.duplicate()))
            .collect();
        rebuild(self, &copies)
    }
}

fn rebuild(composite: &Composite, copies: &[(Function, Function)]) -> Function {
    let copy_operand = |operand: &Operand| match operand {
        Operand::Scalar(value) => Operand::Scalar(*value),
        Operand::Function(function) => Operand::Function(copy_function(function, copies)),
    };
    let first = copy_operand(&composite.first);
    let second = composite.second.as_ref().map(copy_operand);
    let arity = match &first {
        Operand::Function(function) => function.arity(),
        Operand::Scalar(_) => match &second {
            Some(Operand::Function(function)) => function.arity(),
            _ => 1,
        },
    };
    assemble(composite.operation, first, second, arity)
}

fn copy_function(function: &Function, copies: &[(Function, Function)]) -> Function {
    if let Some(inner) = function.composite() {
        let copy = rebuild(inner, copies);
        copy.set_fixed_units(function.fixed_units());
        return copy;
    }
    copies
        .iter()
        .find(|(original, _)| original.same_instance(function))
        .map_or_else(|| function.duplicate(), |(_, copy)| copy.clone())
}

fn combine_quantities(
    operation: Operation,
    kernel: fn(f64, f64) -> f64,
    a: Quantity,
    b: Quantity,
) -> Result<Quantity> {
    let zip = |a: &[f64], b: &[f64]| -> Vec<f64> {
        a.iter().zip(b).map(|(a, b)| kernel(*a, *b)).collect()
    };
    match operation {
        Operation::Add | Operation::Subtract => {
            let b = b.to(&a.unit)?;
            Ok(Quantity::new(zip(&a.values, &b.values), a.unit))
        }
        Operation::Multiply => Ok(Quantity::new(zip(&a.values, &b.values), &a.unit * &b.unit)),
        Operation::Divide => Ok(Quantity::new(zip(&a.values, &b.values), &a.unit / &b.unit)),
        Operation::Power => {
            let exponent = b.to(&Unit::dimensionless()).map_err(|_| {
                FunctionError::unit(format!(
                    "the exponent of ** must be dimensionless, got {}",
                    b.unit
                ))
            })?;
            if a.unit.is_dimensionless() {
                let base = a.to(&Unit::dimensionless())?;
                return Ok(Quantity::new(
                    zip(&base.values, &exponent.values),
                    Unit::dimensionless(),
                ));
            }
            let Some(&power) = exponent.values.first() else {
                return Ok(Quantity::new(Vec::new(), a.unit));
            };
            if exponent.values.iter().any(|value| *value != power) {
                return Err(FunctionError::unit(format!(
                    "cannot raise a quantity in {} to more than one power at once",
                    a.unit
                )));
            }
            Ok(Quantity::new(
                a.values.iter().map(|value| value.powf(power)).collect(),
                a.unit.pow(power),
            ))
        }
        other => Err(FunctionError::design(format!(
            "{} is not a binary operation",
            other.symbol()
        ))),
    }
}

/// Serializable state of a composite function: enough to rebuild it in
/// another process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeState {
    pub expression: String,
    /// Requested units, if any were bound.
    pub units: Option<Vec<Unit>>,
    /// Parameter states keyed by composite parameter name.
    pub parameters: IndexMap<String, ParameterSnapshot>,
}

impl Function {
    /// Captures the expression, requested units and parameter states.
    pub fn to_state(&self) -> Result<CompositeState> {
        let expression = self.expression().ok_or_else(|| {
            FunctionError::design(format!(
                "only composite functions have a state; {} is a primitive",
                self.name()
            ))
        })?;
        Ok(CompositeState {
            expression: expression.to_string(),
            units: self.units(),
            parameters: self
                .parameters()
                .iter()
                .map(|(name, parameter)| (name.clone(), parameter.borrow().snapshot()))
                .collect(),
        })
    }

    /// Re-parses the expression, then re-applies units and parameter states.
    ///
    /// Missing units are tolerated: an enclosing composite binds them later.
    pub fn from_state(state: &CompositeState) -> Result<Function> {
        let function = expression::parse_function_expression(&state.expression)?;
        match &state.units {
            Some(units) => function.set_units(units)?,
            None => warn!(
                "no units stored for {}; deferring until an enclosing composite binds them",
                state.expression
            ),
        }
        for (name, snapshot) in &state.parameters {
            function.get_parameter(name)?.borrow_mut().restore(snapshot)?;
        }
        Ok(function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::function::FunctionClass;
    use crate::registry::get_function;
    use crate::traits::Model;
    use crate::values::Values;
    use approx::assert_relative_eq;
    use std::sync::Arc;

    /// A flux model locked to keV in and `1 / (cm2 s keV)` out.
    #[derive(Debug)]
    struct FixedFlux;

    impl Model for FixedFlux {
        fn calling_sequence(&self) -> &[&'static str] {
            &["x", "norm"]
        }

        fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
            inputs[0].iter().map(|x| parameters[0] / x).collect()
        }

        fn set_units(&self, _units: &[Unit], _parameters: &ParameterMap) -> Option<Vec<Unit>> {
            None
        }
    }

    fn fixed_flux() -> Function {
        let class = FunctionClass::new(
            "fixed_flux",
            r#"{ "description": "Flux in fixed units", "parameters": { "norm": { "desc": "normalization", "initial value": 1.0 } } }"#,
            FixedFlux,
        )
        .expect("valid declaration")
        .with_fixed_units(&["keV", "1 / (cm2 s keV)"])
        .expect("fixed units");
        Arc::new(class).instantiate()
    }

    fn scalar(function: &Function, x: f64) -> f64 {
        function
            .call1(x)
            .expect("call")
            .as_scalar()
            .expect("scalar output")
    }

    #[test]
    fn sum_renames_parameters_and_builds_expression() {
        let p1 = get_function("powerlaw").expect("builtin");
        let p2 = get_function("powerlaw").expect("builtin");
        let sum = (&p1 + &p2).expect("same arity");

        assert_eq!(sum.expression(), Some("(powerlaw{1} + powerlaw{2})"));
        assert_eq!(sum.parameter_names(), vec!["K_1", "index_1", "K_2", "index_2"]);
        assert_eq!(p1.get_parameter("K").expect("K").borrow().name(), "K_1");
        assert_eq!(sum.name(), COMPOSITE_NAME);
    }

    #[test]
    fn shared_parameters_track_the_primitives() {
        let p1 = get_function("powerlaw").expect("builtin");
        let p2 = get_function("powerlaw").expect("builtin");
        let sum = (&p1 + &p2).expect("same arity");
        let product = (&p1 * &p2).expect("same arity");

        p1.set_parameter("K", 2.0).expect("in bounds");
        assert_eq!(sum.parameter_value("K_1").expect("K_1"), 2.0);
        sum.set_parameter("K_2", 5.0).expect("in bounds");
        assert_eq!(product.parameter_value("K_2").expect("K_2"), 5.0);
        assert_relative_eq!(scalar(&sum, 2.0), 2.0 * 0.25 + 5.0 * 0.25);
    }

    #[test]
    fn repeated_primitive_keeps_one_slot() {
        let p = get_function("powerlaw").expect("builtin");
        let line = get_function("line").expect("builtin");
        let nested = (&(&p + &line).expect("sum") * &p).expect("product");
        assert_eq!(
            nested.expression(),
            Some("((powerlaw{1} + line{2}) * powerlaw{1})")
        );
        assert_eq!(nested.functions().len(), 2);
        assert_eq!(
            nested.parameter_names(),
            vec!["K_1", "index_1", "a_2", "b_2"]
        );
    }

    #[test]
    fn evaluates_every_operation_element_wise() {
        let line = get_function("line").expect("builtin");
        line.set_parameter("a", 1.0).expect("a");
        line.set_parameter("b", 2.0).expect("b");
        let constant = get_function("constant").expect("builtin");
        constant.set_parameter("k", 3.0).expect("k");

        let x: f64 = 2.0;
        let l = 1.0 + 2.0 * x;
        let c: f64 = 3.0;
        let cases = [
            ((&line + &constant).expect("+"), l + c),
            ((&line - &constant).expect("-"), l - c),
            ((&line * &constant).expect("*"), l * c),
            ((&line / &constant).expect("/"), l / c),
            (line.power(&constant).expect("**"), l.powf(c)),
            ((-&line).expect("*-"), -l),
            ((&constant - 10.0).expect("-").abs().expect("abs"), (c - 10.0).abs()),
            (line.of(&constant).expect("of"), 1.0 + 2.0 * c),
        ];
        for (function, expected) in cases {
            assert_relative_eq!(scalar(&function, x), expected);
        }
    }

    #[test]
    fn scalar_on_the_left_keeps_its_place() {
        let line = get_function("line").expect("builtin");
        let difference = (3.0 - &line).expect("scalar minus function");
        assert_eq!(difference.expression(), Some("(3.0 - line{1})"));
        assert_relative_eq!(scalar(&difference, 1.0), 3.0 - 1.0);

        let quotient = (2.0 / &line).expect("scalar over function");
        assert_eq!(quotient.expression(), Some("(2.0 / line{1})"));
    }

    #[test]
    fn unary_expressions_use_prefix_form() {
        let p = get_function("powerlaw").expect("builtin");
        assert_eq!(p.negate().expect("neg").expression(), Some("(*- powerlaw{1})"));
        assert_eq!(p.abs().expect("abs").expression(), Some("(abs powerlaw{1})"));
    }

    #[test]
    fn rejects_invalid_operands() {
        let line = get_function("line").expect("builtin");
        let sphere = get_function("gaussian_on_sphere").expect("builtin");
        assert!(matches!(
            &line + &sphere,
            Err(FunctionError::DesignViolation(_))
        ));
        assert!(matches!(
            sphere.of(&line),
            Err(FunctionError::DesignViolation(_))
        ));
        assert!(matches!(
            &line * f64::NAN,
            Err(FunctionError::DesignViolation(_))
        ));
        assert!(matches!(
            combine(Operation::Compose, &line, 2.0),
            Err(FunctionError::DesignViolation(_))
        ));
    }

    #[test]
    fn product_flags_the_second_operand() {
        let p = get_function("powerlaw").expect("builtin");
        let line = get_function("line").expect("builtin");
        let _product = (&p * &line).expect("product");
        assert!(!p.makes_dimensionless());
        assert!(line.makes_dimensionless());
    }

    #[test]
    fn fixed_dimensionless_factor_gives_way() {
        let absorption = get_function("phabs_approx").expect("builtin");
        let p = get_function("powerlaw").expect("builtin");
        let _product = (&absorption * &p).expect("product");
        assert!(absorption.makes_dimensionless());
        assert!(!p.makes_dimensionless());
    }

    #[test]
    fn two_fixed_dimensionless_factors_fix_the_product() {
        let a = get_function("phabs_approx").expect("builtin");
        let b = get_function("phabs_approx").expect("builtin");
        let product = (&a * &b).expect("product");
        assert!(a.makes_dimensionless() && b.makes_dimensionless());
        assert_eq!(product.fixed_units(), b.fixed_units());

        let c = get_function("phabs_approx").expect("builtin");
        let d = get_function("phabs_approx").expect("builtin");
        let quotient = (&c / &d).expect("quotient");
        assert!(c.makes_dimensionless());
        assert!(!d.makes_dimensionless());
        assert!(!quotient.has_fixed_units());
    }

    #[test]
    fn flag_on_a_composite_reaches_its_primitives() {
        let p = get_function("powerlaw").expect("builtin");
        let a = get_function("line").expect("builtin");
        let b = get_function("constant").expect("builtin");
        let inner = (&a + &b).expect("sum");
        let _product = (&p * &inner).expect("product");
        assert!(a.makes_dimensionless() && b.makes_dimensionless());
    }

    #[test]
    fn unit_path_keeps_the_dominant_unit() {
        let p1 = get_function("powerlaw").expect("builtin");
        let p2 = get_function("powerlaw").expect("builtin");
        let sum = (&p1 + &p2).expect("sum");
        sum.set_units_str(&["keV", "1 / (cm2 s keV)"]).expect("units");

        let x = Values::array(vec![1.0, 2.0]).with_unit(Unit::parse("keV").expect("keV"));
        let result = sum.call(&[x]).expect("call");
        assert_eq!(result.unit(), Some(&Unit::parse("1 / (keV s cm2)").expect("unit")));
        assert_relative_eq!(result.as_slice()[1], 0.5);
    }

    #[test]
    fn power_with_dimensional_base_needs_one_exponent() {
        let line = get_function("line").expect("builtin");
        let powered = line.power(2.0).expect("power");
        powered.set_units_str(&["keV", "keV"]).expect("units");
        let x = Values::array(vec![1.0, 2.0]).with_unit(Unit::parse("keV").expect("keV"));
        let err = powered.call(&[x.clone()]).expect_err("keV**2 is not keV");
        assert!(matches!(err, FunctionError::Unit(_)));

        powered.set_units_str(&["keV", "keV2"]).expect("units");
        let result = powered.call(&[x]).expect("call");
        assert_relative_eq!(result.as_slice()[1], 4.0);
    }

    #[test]
    fn state_round_trips_through_json() {
        let p1 = get_function("powerlaw").expect("builtin");
        let p2 = get_function("powerlaw").expect("builtin");
        let sum = (&p1 + &p2).expect("sum");
        sum.set_parameter("index_2", -1.0).expect("in bounds");
        sum.set_units_str(&["keV", "1 / (cm2 s keV)"]).expect("units");

        let text = serde_json::to_string(&sum.to_state().expect("composite")).expect("json");
        let state: CompositeState = serde_json::from_str(&text).expect("state");
        let rebuilt = Function::from_state(&state).expect("rebuild");

        assert_eq!(rebuilt.expression(), sum.expression());
        assert_eq!(rebuilt.parameter_value("index_2").expect("index_2"), -1.0);
        assert_eq!(rebuilt.units(), sum.units());
        assert_relative_eq!(scalar(&rebuilt, 2.0), scalar(&sum, 2.0));
    }

    #[test]
    fn primitive_has_no_state() {
        let p = get_function("powerlaw").expect("builtin");
        assert!(matches!(
            p.to_state(),
            Err(FunctionError::DesignViolation(_))
        ));
    }

    #[test]
    fn duplicate_preserves_sharing_but_not_identity() {
        let p = get_function("powerlaw").expect("builtin");
        let line = get_function("line").expect("builtin");
        let original = (&(&p + &line).expect("sum") * &p).expect("product");
        let copy = original.duplicate();

        assert_eq!(copy.expression(), original.expression());
        assert_ne!(copy.uuid(), original.uuid());
        assert_eq!(copy.functions().len(), 2);

        copy.set_parameter("K_1", 7.0).expect("in bounds");
        assert_eq!(original.parameter_value("K_1").expect("K_1"), 1.0);
        assert_relative_eq!(scalar(&copy, 1.0), (7.0 + 1.0) * 7.0);
    }

    #[test]
    fn fixed_dimensional_factor_keeps_its_unit() {
        let flux = fixed_flux();
        let p = get_function("powerlaw").expect("builtin");
        let product = (&flux * &p).expect("product");
        assert!(!flux.makes_dimensionless());
        assert!(p.makes_dimensionless());
        assert!(!product.has_fixed_units());

        product.set_units_str(&["MeV", "1 / (cm2 s keV)"]).expect("units");
        assert_eq!(flux.units(), flux.fixed_units());
        assert!(p.output_unit().expect("bound").is_dimensionless());

        let other = fixed_flux();
        let line = get_function("line").expect("builtin");
        let _quotient = (&other / &line).expect("quotient");
        assert!(!other.makes_dimensionless());
        assert!(line.makes_dimensionless());
    }

    #[test]
    fn quotient_tests_the_fixed_output_unit() {
        let absorption = get_function("phabs_approx").expect("builtin");
        let p = get_function("powerlaw").expect("builtin");
        let _quotient = (&absorption / &p).expect("quotient");
        assert!(absorption.makes_dimensionless());
        assert!(!p.makes_dimensionless());
    }

    #[test]
    fn from_state_rejects_out_of_bounds_values() {
        let p1 = get_function("powerlaw").expect("builtin");
        let p2 = get_function("powerlaw").expect("builtin");
        let sum = (&p1 + &p2).expect("sum");
        let mut state = sum.to_state().expect("composite");
        state.parameters.get_mut("index_1").expect("index_1").value = 50.0;
        assert!(matches!(
            Function::from_state(&state),
            Err(FunctionError::ParameterOutOfBounds { .. })
        ));
    }
}
