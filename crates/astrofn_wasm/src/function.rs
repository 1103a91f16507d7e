//! JavaScript handle on a single function, primitive or composite.

use anyhow::{anyhow, bail, Context};
use astrofn_core::composite::{self, Operand, Operation};
use astrofn_core::{
    get_function, parse_function_expression, CompositeState, Function, FunctionError, Unit,
    Values,
};
use serde::Serialize;
use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

#[wasm_bindgen]
pub struct WasmFunction {
    function: Function,
}

#[derive(Serialize)]
struct UnitResult {
    values: Vec<f64>,
    unit: String,
}

pub(crate) fn to_js_error(err: impl std::fmt::Display) -> JsValue {
    js_sys::Error::new(&err.to_string()).into()
}

fn operation(symbol: &str) -> anyhow::Result<Operation> {
    match Operation::from_symbol(symbol) {
        Some(Operation::Compose) => bail!("use compose() to build `of` composites"),
        Some(operation) if operation.is_unary() => {
            bail!("{symbol} takes a single operand; use negate() or abs()")
        }
        Some(operation) => Ok(operation),
        None => Err(anyhow!("Unknown operator: {symbol}")),
    }
}

fn parse_units(units: &[String]) -> astrofn_core::Result<Vec<Unit>> {
    units.iter().map(|unit| Unit::parse(unit)).collect()
}

fn decode_state(json: &str) -> anyhow::Result<Function> {
    let state: CompositeState =
        serde_json::from_str(json).context("State is not a valid composite state document")?;
    Function::from_state(&state).with_context(|| format!("Cannot rebuild {}", state.expression))
}

fn encode_state(function: &Function) -> anyhow::Result<String> {
    let state = function.to_state()?;
    Ok(serde_json::to_string(&state)?)
}

impl WasmFunction {
    fn wrap(function: Function) -> Self {
        #[cfg(target_arch = "wasm32")]
        console_error_panic_hook::set_once();
        Self { function }
    }

    fn combined(&self, op: &str, other: Operand) -> anyhow::Result<WasmFunction> {
        let operation = operation(op)?;
        let function = composite::combine(operation, &self.function, other)?;
        Ok(Self::wrap(function))
    }

    fn evaluate(&self, x: Vec<f64>) -> astrofn_core::Result<Vec<f64>> {
        Ok(self.function.call1(x)?.into_vec())
    }

    fn evaluate_with_unit(&self, x: Vec<f64>, unit: &str) -> astrofn_core::Result<UnitResult> {
        let input = Values::array(x).with_unit(Unit::parse(unit)?);
        let result = self.function.call(&[input])?;
        let unit = result
            .unit()
            .map(|unit| unit.symbol().to_string())
            .ok_or_else(|| {
                FunctionError::Unit(format!("{} returned a value without unit", self.function.name()))
            })?;
        Ok(UnitResult {
            values: result.into_vec(),
            unit,
        })
    }
}

#[wasm_bindgen]
impl WasmFunction {
    /// A fresh instance of a registered function.
    #[wasm_bindgen(constructor)]
    pub fn new(name: &str) -> Result<WasmFunction, JsValue> {
        get_function(name).map(Self::wrap).map_err(to_js_error)
    }

    pub fn from_expression(expression: &str) -> Result<WasmFunction, JsValue> {
        parse_function_expression(expression)
            .map(Self::wrap)
            .map_err(to_js_error)
    }

    #[wasm_bindgen(getter)]
    pub fn name(&self) -> String {
        self.function.name().to_string()
    }

    /// The `name{index}` expression of a composite, or the name of a primitive.
    #[wasm_bindgen(getter)]
    pub fn expression(&self) -> String {
        self.function
            .expression()
            .unwrap_or_else(|| self.function.name())
            .to_string()
    }

    #[wasm_bindgen(getter)]
    pub fn parameter_names(&self) -> Vec<String> {
        self.function.parameter_names()
    }

    pub fn get_parameter(&self, name: &str) -> Result<f64, JsValue> {
        self.function.parameter_value(name).map_err(to_js_error)
    }

    pub fn set_parameter(&self, name: &str, value: f64) -> Result<(), JsValue> {
        self.function.set_parameter(name, value).map_err(to_js_error)
    }

    /// Binds one unit per variable followed by the output unit.
    pub fn set_units(&self, units: Vec<String>) -> Result<(), JsValue> {
        let units = parse_units(&units).map_err(to_js_error)?;
        self.function.set_units(&units).map_err(to_js_error)
    }

    pub fn call(&self, x: Vec<f64>) -> Result<Vec<f64>, JsValue> {
        self.evaluate(x).map_err(to_js_error)
    }

    /// Unit-checked call; returns `{ values, unit }`.
    pub fn call_with_unit(&self, x: Vec<f64>, unit: &str) -> Result<JsValue, JsValue> {
        let result = self.evaluate_with_unit(x, unit).map_err(to_js_error)?;
        to_value(&result).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
    }

    pub fn combine(&self, op: &str, other: &WasmFunction) -> Result<WasmFunction, JsValue> {
        self.combined(op, Operand::from(&other.function))
            .map_err(to_js_error)
    }

    pub fn combine_scalar(&self, op: &str, value: f64) -> Result<WasmFunction, JsValue> {
        self.combined(op, Operand::Scalar(value)).map_err(to_js_error)
    }

    /// `self(inner(x))`.
    pub fn compose(&self, inner: &WasmFunction) -> Result<WasmFunction, JsValue> {
        self.function
            .of(&inner.function)
            .map(Self::wrap)
            .map_err(to_js_error)
    }

    pub fn negate(&self) -> Result<WasmFunction, JsValue> {
        self.function.negate().map(Self::wrap).map_err(to_js_error)
    }

    pub fn abs(&self) -> Result<WasmFunction, JsValue> {
        self.function.abs().map(Self::wrap).map_err(to_js_error)
    }

    pub fn duplicate(&self) -> WasmFunction {
        Self::wrap(self.function.duplicate())
    }

    pub fn export_state(&self) -> Result<String, JsValue> {
        encode_state(&self.function).map_err(to_js_error)
    }

    pub fn import_state(json: &str) -> Result<WasmFunction, JsValue> {
        decode_state(json).map(Self::wrap).map_err(|e| to_js_error(format!("{e:#}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operator_symbols_map_to_binary_operations() {
        assert_eq!(operation("+").expect("+"), Operation::Add);
        assert_eq!(operation("**").expect("**"), Operation::Power);
        assert!(operation("of").is_err());
        assert!(operation("abs").is_err());
        assert!(operation("%").is_err());
    }

    #[test]
    fn combines_and_calls_natively() {
        let line = WasmFunction::new("line").expect("builtin");
        line.set_parameter("b", 2.0).expect("b");
        let constant = WasmFunction::new("constant").expect("builtin");
        constant.set_parameter("k", 1.0).expect("k");

        let sum = line.combined("+", Operand::from(&constant.function)).expect("sum");
        assert_eq!(sum.expression(), "(line{1} + constant{2})");
        assert_eq!(sum.parameter_names(), vec!["a_1", "b_1", "k_2"]);
        assert_eq!(sum.call(vec![1.0, 2.0]).expect("call"), vec![3.0, 5.0]);

        let scaled = sum.combined("*", Operand::Scalar(2.0)).expect("scaled");
        assert_eq!(scaled.call(vec![1.0]).expect("call"), vec![6.0]);
    }

    #[test]
    fn state_round_trips_through_json() {
        let sine = WasmFunction::new("sin").expect("builtin");
        let shifted = sine.combined("+", Operand::Scalar(1.0)).expect("shifted");
        shifted.set_parameter("K_1", 3.0).expect("K_1");

        let json = encode_state(&shifted.function).expect("state");
        let rebuilt = decode_state(&json).expect("rebuilt");
        assert_eq!(rebuilt.expression(), shifted.function.expression());
        assert_eq!(rebuilt.parameter_value("K_1").expect("K_1"), 3.0);
    }

    #[test]
    fn invalid_state_reports_its_cause() {
        let err = decode_state("{ \"expression\": 3 }").expect_err("invalid");
        assert!(format!("{err:#}").contains("composite state"));
        assert!(encode_state(&get_function("line").expect("builtin")).is_err());
    }

    #[test]
    fn unit_call_reports_output_unit() {
        let line = WasmFunction::new("line").expect("builtin");
        line.function
            .set_units_str(&["keV", "1 / keV"])
            .expect("units");
        let result = line.evaluate_with_unit(vec![1.0], "keV").expect("call");
        assert_eq!(result.values, vec![1.0]);
        assert!(!result.unit.is_empty());
    }

    #[cfg(target_arch = "wasm32")]
    mod wasm {
        use super::super::*;
        use wasm_bindgen_test::wasm_bindgen_test;

        #[wasm_bindgen_test]
        fn unknown_names_are_js_errors() {
            assert!(WasmFunction::new("not_a_real_function").is_err());
            assert!(WasmFunction::from_expression("os.remove('x')").is_err());
        }

        #[wasm_bindgen_test]
        fn combine_rejects_unknown_operators() {
            let line = WasmFunction::new("line").expect("builtin");
            assert!(line.combine_scalar("%", 2.0).is_err());
        }
    }
}
