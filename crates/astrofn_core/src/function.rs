use crate::composite::{self, Composite, Operand, Operation};
use crate::declaration::FunctionDeclaration;
use crate::error::{FunctionError, Result};
use crate::parameter::{ParameterMap, SharedParameter};
use crate::traits::{Boundaries, Model};
use crate::units::{Quantity, Unit};
use crate::values::{self, Values};
use log::debug;
use serde::{Deserialize, Serialize};
use std::cell::{Cell, RefCell};
use std::fmt;
use std::ops;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

/// A class of primitive functions: a declaration bound to an evaluation rule.
///
/// Classes are immutable and shared through the registry; every instance owns
/// fresh copies of the declared parameters.
#[derive(Debug)]
pub struct FunctionClass {
    declaration: FunctionDeclaration,
    model: Arc<dyn Model>,
    fixed_units: Option<Vec<Unit>>,
}

/// Name and description of a class, as listed by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub name: String,
    pub description: String,
}

impl FunctionClass {
    /// Declares a class from its JSON declaration, checked against the
    /// calling sequence of `model`.
    pub fn new(name: &str, declaration: &str, model: impl Model + 'static) -> Result<Self> {
        let declaration = FunctionDeclaration::from_json(name, declaration, model.calling_sequence())?;
        Ok(Self {
            declaration,
            model: Arc::new(model),
            fixed_units: None,
        })
    }

    /// Locks the input and output units of every instance, e.g. for models
    /// wrapping a library that only works in given units.
    pub fn with_fixed_units(mut self, units: &[&str]) -> Result<Self> {
        let expected = self.arity() + 1;
        if units.len() != expected {
            return Err(FunctionError::definition(
                self.name(),
                format!("{expected} fixed units are required, got {}", units.len()),
            ));
        }
        let units = units
            .iter()
            .map(|spec| Unit::parse(spec))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| FunctionError::definition(self.name(), err.to_string()))?;
        self.fixed_units = Some(units);
        Ok(self)
    }

    pub fn name(&self) -> &str {
        self.declaration.name()
    }

    pub fn description(&self) -> &str {
        self.declaration.description()
    }

    pub fn declaration(&self) -> &FunctionDeclaration {
        &self.declaration
    }

    pub fn arity(&self) -> usize {
        self.declaration.arity()
    }

    pub fn has_fixed_units(&self) -> bool {
        self.fixed_units.is_some()
    }

    pub fn fixed_units(&self) -> Option<&[Unit]> {
        self.fixed_units.as_deref()
    }

    pub fn info(&self) -> FunctionInfo {
        FunctionInfo {
            name: self.name().to_string(),
            description: self.description().to_string(),
        }
    }

    /// A new instance with every parameter in its declared default state.
    pub fn instantiate(self: &Arc<Self>) -> Function {
        let parameters = self
            .declaration
            .parameters()
            .iter()
            .map(|(name, declared)| (name.clone(), declared.instantiate().into_shared()))
            .collect();
        Function::from_inner(FunctionInner {
            name: self.name().to_string(),
            uuid: fresh_uuid(),
            arity: self.arity(),
            description: self.description().to_string(),
            formula: self.declaration.formula().to_string(),
            parameters,
            kind: Kind::Primitive(Arc::clone(self)),
            units: RefCell::new(None),
            fixed_units: RefCell::new(self.fixed_units.clone()),
            dimensionless: Cell::new(false),
        })
    }

    /// Like [`instantiate`](Self::instantiate), overriding some initial values.
    pub fn instantiate_with(self: &Arc<Self>, values: &[(&str, f64)]) -> Result<Function> {
        let function = self.instantiate();
        for (name, value) in values {
            function.set_parameter(name, *value)?;
        }
        Ok(function)
    }
}

impl fmt::Display for FunctionClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name())?;
        writeln!(f, "  description: {}", self.description())?;
        writeln!(f, "  formula: {}", self.declaration.formula())?;
        writeln!(f, "  parameters:")?;
        for (name, declared) in self.declaration.parameters() {
            writeln!(
                f,
                "    {name}: {} (initial value: {}, min: {:?}, max: {:?}, {})",
                declared.description,
                declared.initial_value,
                declared.min,
                declared.max,
                if declared.free { "free" } else { "fixed" }
            )?;
        }
        Ok(())
    }
}

fn fresh_uuid() -> String {
    format!("{{{}}}", Uuid::new_v4())
}

#[derive(Debug)]
pub(crate) enum Kind {
    Primitive(Arc<FunctionClass>),
    Composite(Composite),
}

#[derive(Debug)]
struct FunctionInner {
    name: String,
    uuid: String,
    arity: usize,
    description: String,
    formula: String,
    parameters: ParameterMap,
    kind: Kind,
    /// Units bound by `set_units`: one per positional input, then the output.
    units: RefCell<Option<Vec<Unit>>>,
    fixed_units: RefCell<Option<Vec<Unit>>>,
    /// Report a dimensionless output when a composite forwards its units.
    dimensionless: Cell<bool>,
}

/// A live function instance, primitive or composite.
///
/// Cloning the handle does not copy the function: clones are the same
/// instance. Use [`duplicate`](Self::duplicate) for an independent copy.
#[derive(Clone)]
pub struct Function {
    inner: Rc<FunctionInner>,
}

impl Function {
    fn from_inner(inner: FunctionInner) -> Self {
        Self {
            inner: Rc::new(inner),
        }
    }

    pub(crate) fn from_composite(
        uuid: String,
        expression: String,
        arity: usize,
        parameters: ParameterMap,
        composite: Composite,
    ) -> Self {
        Self::from_inner(FunctionInner {
            name: composite::COMPOSITE_NAME.to_string(),
            uuid,
            arity,
            description: expression,
            formula: crate::declaration::NO_LATEX_FORMULA.to_string(),
            parameters,
            kind: Kind::Composite(composite),
            units: RefCell::new(None),
            fixed_units: RefCell::new(None),
            dimensionless: Cell::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Opaque identifier used to locate this instance inside composite
    /// expressions. For a composite it is its identifier expression.
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    pub fn arity(&self) -> usize {
        self.inner.arity
    }

    pub fn description(&self) -> &str {
        &self.inner.description
    }

    pub fn formula(&self) -> &str {
        &self.inner.formula
    }

    pub fn is_composite(&self) -> bool {
        matches!(self.inner.kind, Kind::Composite(_))
    }

    /// The canonical `name{position}` expression of a composite.
    pub fn expression(&self) -> Option<&str> {
        self.composite().map(|_| self.inner.description.as_str())
    }

    /// True when both handles refer to the same instance.
    pub fn same_instance(&self, other: &Function) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn function_class(&self) -> Option<&Arc<FunctionClass>> {
        match &self.inner.kind {
            Kind::Primitive(class) => Some(class),
            Kind::Composite(_) => None,
        }
    }

    pub(crate) fn composite(&self) -> Option<&Composite> {
        match &self.inner.kind {
            Kind::Primitive(_) => None,
            Kind::Composite(composite) => Some(composite),
        }
    }

    /// The de-duplicated primitives this function is made of, in first-seen
    /// order. A primitive is its own single member.
    pub fn functions(&self) -> Vec<Function> {
        match self.composite() {
            Some(composite) => composite.functions().to_vec(),
            None => vec![self.clone()],
        }
    }

    pub fn parameters(&self) -> &ParameterMap {
        &self.inner.parameters
    }

    pub fn parameter_names(&self) -> Vec<String> {
        self.inner.parameters.keys().cloned().collect()
    }

    pub fn get_parameter(&self, name: &str) -> Result<SharedParameter> {
        self.inner
            .parameters
            .get(name)
            .map(Rc::clone)
            .ok_or_else(|| FunctionError::unknown_parameter(self.name(), name))
    }

    pub fn parameter_value(&self, name: &str) -> Result<f64> {
        Ok(self.get_parameter(name)?.borrow().value())
    }

    pub fn set_parameter(&self, name: &str, value: f64) -> Result<()> {
        self.get_parameter(name)?.borrow_mut().set_value(value)
    }

    /// The parameters currently free, in order.
    pub fn free_parameters(&self) -> ParameterMap {
        self.inner
            .parameters
            .iter()
            .filter(|(_, parameter)| parameter.borrow().is_free())
            .map(|(name, parameter)| (name.clone(), Rc::clone(parameter)))
            .collect()
    }

    pub fn has_fixed_units(&self) -> bool {
        self.inner.fixed_units.borrow().is_some()
    }

    pub fn fixed_units(&self) -> Option<Vec<Unit>> {
        self.inner.fixed_units.borrow().clone()
    }

    pub(crate) fn set_fixed_units(&self, units: Option<Vec<Unit>>) {
        *self.inner.fixed_units.borrow_mut() = units;
    }

    /// Bound units: one per positional input, then the output unit.
    pub fn units(&self) -> Option<Vec<Unit>> {
        self.inner.units.borrow().clone()
    }

    pub fn output_unit(&self) -> Option<Unit> {
        self.inner.units.borrow().as_ref().and_then(|units| units.last().cloned())
    }

    pub fn makes_dimensionless(&self) -> bool {
        self.inner.dimensionless.get()
    }

    /// Flags this function, and every primitive it is made of, to report a
    /// dimensionless output when units are forwarded by a composite.
    pub(crate) fn set_make_dimensionless(&self) {
        self.inner.dimensionless.set(true);
        if let Some(composite) = self.composite() {
            for function in composite.functions() {
                function.inner.dimensionless.set(true);
            }
        }
    }

    /// Binds the input and output units.
    ///
    /// A primitive lets its class adjust its parameters' units and possibly
    /// override the requested units; a primitive with fixed units keeps them.
    /// A composite forwards the units to each of its primitives.
    pub fn set_units(&self, units: &[Unit]) -> Result<()> {
        let expected = self.arity() + 1;
        if units.len() != expected {
            return Err(FunctionError::design(format!(
                "function {} needs {expected} units ({} input(s) and the output), got {}",
                self.name(),
                self.arity(),
                units.len()
            )));
        }

        match &self.inner.kind {
            Kind::Primitive(class) => {
                // Fixed units win over requested ones; the model hook wins over both.
                let bound = class
                    .model
                    .set_units(units, &self.inner.parameters)
                    .or_else(|| self.fixed_units())
                    .unwrap_or_else(|| units.to_vec());
                debug!(
                    "bound units of {} to [{}]",
                    self.name(),
                    bound.iter().map(Unit::to_string).collect::<Vec<_>>().join(", ")
                );
                *self.inner.units.borrow_mut() = Some(bound);
            }
            Kind::Composite(composite) => {
                *self.inner.units.borrow_mut() = Some(units.to_vec());
                composite.forward_units(units)?;
            }
        }
        Ok(())
    }

    /// Like [`set_units`](Self::set_units) from unit specifiers; the empty
    /// specifier is the dimensionless unit.
    pub fn set_units_str(&self, units: &[&str]) -> Result<()> {
        let units = units
            .iter()
            .map(|spec| Unit::parse(spec))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| {
                FunctionError::unit(format!(
                    "could not get units from {units:?} when setting units for function {}: {err}",
                    self.name()
                ))
            })?;
        self.set_units(&units)
    }

    /// Evaluates the function.
    ///
    /// Inputs without units take the fast path over raw parameter values.
    /// Inputs with units are converted to the bound input units and the
    /// result carries the bound output unit.
    pub fn call(&self, inputs: &[Values]) -> Result<Values> {
        let prepared = values::prepare(self.name(), self.arity(), inputs)?;
        match prepared.quantities() {
            None => {
                let result = self.evaluate_columns(&prepared.slices())?;
                Ok(Values::from_raw(result, prepared.scalar))
            }
            Some(quantities) => {
                let mut result = self.evaluate_quantities(&quantities)?;
                if self.is_composite() {
                    if let Some(unit) = self.output_unit() {
                        result = result.to(&unit)?;
                    }
                }
                Ok(Values::from_quantity(result, prepared.scalar))
            }
        }
    }

    /// Shorthand for calling a function of one variable.
    pub fn call1(&self, x: impl Into<Values>) -> Result<Values> {
        self.call(&[x.into()])
    }

    /// Sets every parameter from `values` and calls the function.
    pub fn evaluate_at(&self, inputs: &[Values], values: &[(&str, f64)]) -> Result<Values> {
        for (name, _) in values {
            self.get_parameter(name)?;
        }
        for name in self.inner.parameters.keys() {
            let value = values
                .iter()
                .find(|(given, _)| *given == name.as_str())
                .map(|(_, value)| *value)
                .ok_or_else(|| FunctionError::unknown_parameter(self.name(), name.as_str()))?;
            self.set_parameter(name, value)?;
        }
        self.call(inputs)
    }

    /// Runs the evaluation rule of a primitive with explicit parameter values,
    /// given in declaration order.
    pub fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Result<Vec<f64>> {
        let class = self.function_class().ok_or_else(|| {
            FunctionError::design("a composite function has no evaluation rule of its own; call it instead")
        })?;
        if inputs.len() != self.arity() {
            return Err(FunctionError::design(format!(
                "function {} takes {} positional input(s), got {}",
                self.name(),
                self.arity(),
                inputs.len()
            )));
        }
        if parameters.len() != self.inner.parameters.len() {
            return Err(FunctionError::design(format!(
                "function {} takes {} parameter(s), got {}",
                self.name(),
                self.inner.parameters.len(),
                parameters.len()
            )));
        }
        if let Some(first) = inputs.first() {
            if inputs.iter().any(|input| input.len() != first.len()) {
                return Err(FunctionError::Shape(format!(
                    "inputs of {} must have the same length",
                    self.name()
                )));
            }
        }
        let ordered: Vec<f64> = class
            .declaration
            .parameter_order()
            .iter()
            .map(|&index| parameters[index])
            .collect();
        Ok(class.model.evaluate(inputs, &ordered))
    }

    /// Valid input region of a function of two or three variables.
    pub fn get_boundaries(&self) -> Result<Option<Boundaries>> {
        if self.arity() == 1 {
            return Err(FunctionError::design(
                "Cannot call get_boundaries() on a 1d function",
            ));
        }
        Ok(self
            .function_class()
            .and_then(|class| class.model.boundaries(&self.calling_values(class))))
    }

    /// An independent copy with a fresh identifier.
    ///
    /// Parameters are copied, so changes to the copy never reach the original.
    /// A composite is rebuilt over duplicates of its primitives, keeping the
    /// sharing between its operands.
    pub fn duplicate(&self) -> Function {
        match &self.inner.kind {
            Kind::Primitive(class) => Function::from_inner(FunctionInner {
                name: self.inner.name.clone(),
                uuid: fresh_uuid(),
                arity: self.inner.arity,
                description: self.inner.description.clone(),
                formula: self.inner.formula.clone(),
                parameters: self
                    .inner
                    .parameters
                    .iter()
                    .map(|(name, parameter)| (name.clone(), parameter.borrow().duplicate().into_shared()))
                    .collect(),
                kind: Kind::Primitive(Arc::clone(class)),
                units: RefCell::new(self.units()),
                fixed_units: RefCell::new(self.fixed_units()),
                dimensionless: Cell::new(self.makes_dimensionless()),
            }),
            Kind::Composite(composite) => {
                let copy = composite.duplicate();
                *copy.inner.units.borrow_mut() = self.units();
                copy.set_fixed_units(self.fixed_units());
                copy.inner.dimensionless.set(self.makes_dimensionless());
                copy
            }
        }
    }

    /// Raw parameter values in the calling-sequence order of the class.
    fn calling_values(&self, class: &FunctionClass) -> Vec<f64> {
        class
            .declaration
            .parameter_order()
            .iter()
            .filter_map(|&index| self.inner.parameters.get_index(index))
            .map(|(_, parameter)| parameter.borrow().value())
            .collect()
    }

    pub(crate) fn evaluate_columns(&self, columns: &[&[f64]]) -> Result<Vec<f64>> {
        match &self.inner.kind {
            Kind::Primitive(class) => Ok(class.model.evaluate(columns, &self.calling_values(class))),
            Kind::Composite(composite) => composite.evaluate_columns(columns),
        }
    }

    pub(crate) fn evaluate_quantities(&self, inputs: &[Quantity]) -> Result<Quantity> {
        let class = match &self.inner.kind {
            Kind::Primitive(class) => class,
            Kind::Composite(composite) => return composite.evaluate_quantities(inputs),
        };
        let units = self.units().ok_or_else(|| {
            FunctionError::unit(format!(
                "in order to call {} with units you need to set its units first",
                self.name()
            ))
        })?;
        let columns = inputs
            .iter()
            .zip(&units)
            .map(|(input, unit)| input.unit.convert(&input.values, unit))
            .collect::<Result<Vec<_>>>()
            .map_err(|err| {
                FunctionError::unit(format!("wrong units when calling {}: {err}", self.name()))
            })?;
        let slices: Vec<&[f64]> = columns.iter().map(Vec::as_slice).collect();
        let values = class.model.evaluate(&slices, &self.calling_values(class));
        let output = units.last().cloned().unwrap_or_else(Unit::dimensionless);
        Ok(Quantity::new(values, output))
    }

    pub fn plus(&self, other: impl Into<Operand>) -> Result<Function> {
        composite::combine(Operation::Add, self, other)
    }

    pub fn minus(&self, other: impl Into<Operand>) -> Result<Function> {
        composite::combine(Operation::Subtract, self, other)
    }

    pub fn times(&self, other: impl Into<Operand>) -> Result<Function> {
        composite::combine(Operation::Multiply, self, other)
    }

    pub fn divide(&self, other: impl Into<Operand>) -> Result<Function> {
        composite::combine(Operation::Divide, self, other)
    }

    pub fn power(&self, other: impl Into<Operand>) -> Result<Function> {
        composite::combine(Operation::Power, self, other)
    }

    pub fn negate(&self) -> Result<Function> {
        composite::apply(Operation::Negate, self)
    }

    pub fn abs(&self) -> Result<Function> {
        composite::apply(Operation::Abs, self)
    }

    /// Functional composition: `self(inner(x))`.
    pub fn of(&self, inner: &Function) -> Result<Function> {
        composite::combine(Operation::Compose, self, inner)
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Function")
            .field("name", &self.inner.name)
            .field("uuid", &self.inner.uuid)
            .field("parameters", &self.parameter_names())
            .finish()
    }
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.name())?;
        writeln!(f, "  description: {}", self.description())?;
        writeln!(f, "  formula: {}", self.formula())?;
        writeln!(f, "  parameters:")?;
        for (name, parameter) in &self.inner.parameters {
            writeln!(f, "    {name}: {}", parameter.borrow())?;
        }
        Ok(())
    }
}

macro_rules! binary_operator {
    ($trait:ident, $method:ident, $operation:expr) => {
        impl ops::$trait<&Function> for &Function {
            type Output = Result<Function>;

            fn $method(self, rhs: &Function) -> Result<Function> {
                composite::combine($operation, self, rhs)
            }
        }

        impl ops::$trait<f64> for &Function {
            type Output = Result<Function>;

            fn $method(self, rhs: f64) -> Result<Function> {
                composite::combine($operation, self, rhs)
            }
        }

        impl ops::$trait<&Function> for f64 {
            type Output = Result<Function>;

            fn $method(self, rhs: &Function) -> Result<Function> {
                composite::combine($operation, self, rhs)
            }
        }
    };
}

binary_operator!(Add, add, Operation::Add);
binary_operator!(Sub, sub, Operation::Subtract);
binary_operator!(Mul, mul, Operation::Multiply);
binary_operator!(Div, div, Operation::Divide);

impl ops::Neg for &Function {
    type Output = Result<Function>;

    fn neg(self) -> Result<Function> {
        composite::apply(Operation::Negate, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::get_function;
    use approx::assert_relative_eq;

    #[test]
    fn scalar_input_gives_scalar_output() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        let value = powerlaw.call1(2.0).expect("call");
        assert_relative_eq!(value.as_scalar().expect("scalar"), 0.25);

        let values = powerlaw.call1(vec![1.0, 2.0]).expect("call");
        assert!(!values.is_scalar());
        assert_relative_eq!(values.as_slice()[0], 1.0);
        assert_relative_eq!(values.as_slice()[1], 0.25);
    }

    #[test]
    fn instances_do_not_share_parameters() {
        let first = get_function("powerlaw").expect("builtin");
        let second = get_function("powerlaw").expect("builtin");
        first.set_parameter("K", 3.0).expect("in bounds");
        assert_eq!(second.parameter_value("K").expect("K"), 1.0);
        assert_ne!(first.uuid(), second.uuid());
    }

    #[test]
    fn unknown_parameter_is_reported() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        let err = powerlaw.set_parameter("Q", 1.0).expect_err("no such parameter");
        assert!(matches!(err, FunctionError::UnknownParameter { .. }));
    }

    #[test]
    fn duplicate_is_independent_with_fresh_uuid() {
        let original = get_function("powerlaw").expect("builtin");
        let copy = original.duplicate();
        assert_ne!(copy.uuid(), original.uuid());
        copy.set_parameter("index", -1.0).expect("in bounds");
        assert_relative_eq!(
            original.call1(2.0).expect("call").as_scalar().expect("scalar"),
            0.25
        );
        assert_relative_eq!(copy.call1(2.0).expect("call").as_scalar().expect("scalar"), 0.5);
    }

    #[test]
    fn unit_path_converts_inputs_and_tags_output() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        powerlaw.set_units_str(&["keV", "1 / (cm2 s keV)"]).expect("units");
        let x = Values::array(vec![1.0, 2.0]).with_unit(Unit::parse("MeV").expect("MeV"));
        let result = powerlaw.call(&[x]).expect("call");
        assert_eq!(result.unit(), Some(&Unit::parse("1 / (cm2 s keV)").expect("unit")));
        assert_relative_eq!(result.as_slice()[0], 1e-6, max_relative = 1e-12);
    }

    #[test]
    fn unit_path_requires_bound_units() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        let x = Values::scalar(1.0).with_unit(Unit::parse("keV").expect("keV"));
        let err = powerlaw.call(&[x]).expect_err("units not bound");
        assert!(matches!(err, FunctionError::Unit(_)));
    }

    #[test]
    fn set_units_checks_count_and_specifiers() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        assert!(matches!(
            powerlaw.set_units_str(&["keV"]),
            Err(FunctionError::DesignViolation(_))
        ));
        assert!(matches!(
            powerlaw.set_units_str(&["keV", "bananas"]),
            Err(FunctionError::Unit(_))
        ));
    }

    #[test]
    fn evaluate_at_requires_every_parameter() {
        let line = get_function("line").expect("builtin");
        let value = line
            .evaluate_at(&[Values::scalar(2.0)], &[("a", 1.0), ("b", 3.0)])
            .expect("all parameters");
        assert_relative_eq!(value.as_scalar().expect("scalar"), 7.0);

        let err = line
            .evaluate_at(&[Values::scalar(2.0)], &[("a", 1.0)])
            .expect_err("b missing");
        assert!(matches!(err, FunctionError::UnknownParameter { .. }));
    }

    #[test]
    fn evaluate_uses_declaration_order() {
        let line = get_function("line").expect("builtin");
        let values = line.evaluate(&[&[1.0, 2.0]], &[1.0, 2.0]).expect("rule");
        assert_eq!(values, vec![3.0, 5.0]);
    }

    #[test]
    fn boundaries_only_exist_beyond_one_dimension() {
        let line = get_function("line").expect("builtin");
        assert!(matches!(
            line.get_boundaries(),
            Err(FunctionError::DesignViolation(_))
        ));
        let gaussian = get_function("gaussian_on_sphere").expect("builtin");
        let boundaries = gaussian.get_boundaries().expect("2-d").expect("bounded");
        assert_eq!(boundaries.len(), 2);
    }

    #[test]
    fn free_parameters_skip_fixed_ones() {
        let powerlaw = get_function("powerlaw").expect("builtin");
        powerlaw.get_parameter("index").expect("index").borrow_mut().set_free(false);
        let binding = powerlaw.free_parameters();
        let free: Vec<&String> = binding.keys().collect();
        assert_eq!(free, vec!["K"]);
    }

    #[test]
    fn instantiate_with_overrides_and_rejects_unknown_names() {
        let class = crate::registry::get_function_class("powerlaw").expect("builtin");
        let function = class.instantiate_with(&[("K", 2.0)]).expect("known");
        assert_eq!(function.parameter_value("K").expect("K"), 2.0);
        assert!(class.instantiate_with(&[("N", 2.0)]).is_err());
    }
}
