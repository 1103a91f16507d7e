//! Process-wide table of function classes, keyed by name.
//!
//! The built-in classes are registered the first time the table is used.
//! Further classes can be registered at any time.

use crate::builtins;
use crate::composite::COMPOSITE_NAME;
use crate::error::{FunctionError, Result};
use crate::function::{Function, FunctionClass, FunctionInfo};
use log::{debug, error, warn};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Fallback consulted by [`get_function`] for names that are not registered,
/// e.g. to load a template model from a data file.
pub trait TemplateLoader: Debug + Send + Sync {
    /// `Ok(None)` when `name` is not a template this loader knows about.
    fn load(&self, name: &str) -> Result<Option<Function>>;
}

#[derive(Debug, Default)]
struct FunctionRegistry {
    classes: HashMap<String, Arc<FunctionClass>>,
    template_loader: Option<Arc<dyn TemplateLoader>>,
}

impl FunctionRegistry {
    fn with_builtins() -> Self {
        let mut registry = Self::default();
        for class in builtins::all_classes() {
            match class.and_then(|class| registry.insert(class)) {
                Ok(class) => debug!("registered builtin function {}", class.name()),
                Err(err) => error!("could not register builtin function: {err}"),
            }
        }
        registry
    }

    fn insert(&mut self, class: FunctionClass) -> Result<Arc<FunctionClass>> {
        let name = class.name().to_string();
        if name == COMPOSITE_NAME {
            return Err(FunctionError::definition(
                name,
                "the name is reserved for composite functions",
            ));
        }
        if self.classes.contains_key(&name) {
            return Err(FunctionError::definition(name, "a function with this name already exists"));
        }
        let class = Arc::new(class);
        self.classes.insert(name, Arc::clone(&class));
        Ok(class)
    }

    fn unknown(&self, name: &str) -> FunctionError {
        let mut known: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        known.sort_unstable();
        FunctionError::UnknownFunction {
            name: name.to_string(),
            known: known.join(","),
        }
    }
}

static REGISTRY: OnceLock<RwLock<FunctionRegistry>> = OnceLock::new();

fn registry() -> &'static RwLock<FunctionRegistry> {
    REGISTRY.get_or_init(|| RwLock::new(FunctionRegistry::with_builtins()))
}

/// A new instance of the named function.
///
/// Names that are not registered are handed to the template loader, if one is
/// installed.
pub fn get_function(name: &str) -> Result<Function> {
    let (loader, unknown) = {
        let registry = registry().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(class) = registry.classes.get(name) {
            return Ok(class.instantiate());
        }
        (registry.template_loader.clone(), registry.unknown(name))
    };
    // The lock is released: a loader may itself look up registered classes.
    let Some(loader) = loader else {
        return Err(unknown);
    };
    match loader.load(name) {
        Ok(Some(function)) => Ok(function),
        Ok(None) => Err(unknown),
        Err(err) => {
            warn!("template loader failed for {name}: {err}");
            Err(unknown)
        }
    }
}

/// The registered class of the named function, without instantiating it.
pub fn get_function_class(name: &str) -> Result<Arc<FunctionClass>> {
    let registry = registry().read().unwrap_or_else(PoisonError::into_inner);
    registry
        .classes
        .get(name)
        .cloned()
        .ok_or_else(|| registry.unknown(name))
}

pub fn is_known_function(name: &str) -> bool {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .classes
        .contains_key(name)
}

/// Every registered function with its description, sorted by name.
pub fn list_functions() -> Vec<FunctionInfo> {
    let registry = registry().read().unwrap_or_else(PoisonError::into_inner);
    let mut functions: Vec<FunctionInfo> =
        registry.classes.values().map(|class| class.info()).collect();
    functions.sort_by(|a, b| a.name.cmp(&b.name));
    functions
}

/// Adds a user-defined class. Names are unique and `composite` is reserved.
pub fn register_function_class(class: FunctionClass) -> Result<Arc<FunctionClass>> {
    let class = registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(class)?;
    debug!("registered function {}", class.name());
    Ok(class)
}

/// Installs the fallback used by [`get_function`] for unregistered names,
/// replacing any previous one.
pub fn set_template_loader(loader: impl TemplateLoader + 'static) {
    registry()
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .template_loader = Some(Arc::new(loader));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parameter::ParameterMap;
    use crate::traits::Model;
    use crate::units::Unit;

    #[derive(Debug)]
    struct Doubler;

    impl Model for Doubler {
        fn calling_sequence(&self) -> &[&'static str] {
            &["x", "gain"]
        }

        fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
            inputs[0].iter().map(|x| 2.0 * parameters[0] * x).collect()
        }

        fn set_units(&self, _units: &[Unit], _parameters: &ParameterMap) -> Option<Vec<Unit>> {
            None
        }
    }

    fn doubler(name: &str) -> FunctionClass {
        FunctionClass::new(
            name,
            r#"{ "description": "Doubles its input", "parameters": { "gain": { "desc": "gain", "initial value": 1.0 } } }"#,
            Doubler,
        )
        .expect("valid declaration")
    }

    #[derive(Debug)]
    struct TestTemplates;

    impl TemplateLoader for TestTemplates {
        fn load(&self, name: &str) -> Result<Option<Function>> {
            match name {
                "registry_test_template" => Ok(Some(doubler_class().instantiate())),
                "registry_broken_template" => Err(FunctionError::design("missing data file")),
                _ => Ok(None),
            }
        }
    }

    fn doubler_class() -> Arc<FunctionClass> {
        Arc::new(doubler("registry_test_template"))
    }

    #[test]
    fn unknown_function_lists_known_names() {
        let err = get_function("not_a_real_function").expect_err("unknown");
        match err {
            FunctionError::UnknownFunction { name, known } => {
                assert_eq!(name, "not_a_real_function");
                assert!(known.contains("powerlaw"));
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(get_function_class("not_a_real_function").is_err());
    }

    #[test]
    fn listing_is_sorted_and_described() {
        let functions = list_functions();
        let names: Vec<&str> = functions.iter().map(|info| info.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        let powerlaw = functions
            .iter()
            .find(|info| info.name == "powerlaw")
            .expect("builtin");
        assert!(!powerlaw.description.is_empty());
    }

    #[test]
    fn registers_user_classes_once() {
        register_function_class(doubler("registry_test_doubler")).expect("new name");
        assert!(is_known_function("registry_test_doubler"));
        let function = get_function("registry_test_doubler").expect("registered");
        let value = function.call1(3.0).expect("call").as_scalar().expect("scalar");
        assert_eq!(value, 6.0);

        let err = register_function_class(doubler("registry_test_doubler")).expect_err("taken");
        assert!(matches!(err, FunctionError::Definition { .. }));
    }

    #[test]
    fn composite_name_is_reserved() {
        let err = register_function_class(doubler(COMPOSITE_NAME)).expect_err("reserved");
        assert!(matches!(err, FunctionError::Definition { .. }));
    }

    #[test]
    fn template_loader_is_the_fallback() {
        set_template_loader(TestTemplates);
        let template = get_function("registry_test_template").expect("loaded");
        assert_eq!(template.name(), "registry_test_template");
        assert!(matches!(
            get_function("registry_broken_template"),
            Err(FunctionError::UnknownFunction { .. })
        ));
        assert!(get_function_class("registry_test_template").is_err());
    }
}
