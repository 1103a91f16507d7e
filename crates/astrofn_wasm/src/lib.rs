//! JavaScript bindings for `astrofn_core`.

use serde_wasm_bindgen::to_value;
use wasm_bindgen::prelude::*;

mod function;

pub use function::WasmFunction;

/// Every registered function as `[{ name, description }]`, sorted by name.
#[wasm_bindgen]
pub fn list_functions() -> Result<JsValue, JsValue> {
    let functions = astrofn_core::list_functions();
    to_value(&functions).map_err(|e| JsValue::from_str(&format!("Serialization error: {}", e)))
}

/// Whether `name` is a registered function.
#[wasm_bindgen]
pub fn is_known_function(name: &str) -> bool {
    astrofn_core::registry::is_known_function(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_are_known() {
        assert!(is_known_function("powerlaw"));
        assert!(!is_known_function("composite"));
    }
}
