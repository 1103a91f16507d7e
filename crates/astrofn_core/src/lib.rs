//! The `astrofn_core` crate provides composable, unit-aware parametric
//! functions for describing astrophysical source spectra and shapes.
//!
//! Key components:
//! - **Function**: primitive instances of a registered `FunctionClass`, with a
//!   fast numeric call path and a unit-checked one.
//! - **Composite engine**: arithmetic and composition (`of`) of functions and
//!   scalars into new functions, sharing and renaming the operands' parameters.
//! - **Registry**: process-wide table of function classes by name.
//! - **Expression parser**: rebuilds a composite from its `name{index}`
//!   expression text without evaluating anything but the fixed grammar.
pub mod builtins;
pub mod composite;
pub mod declaration;
pub mod error;
pub mod expression;
pub mod function;
pub mod parameter;
pub mod registry;
pub mod traits;
pub mod units;
pub mod values;

pub use composite::{CompositeState, Operand, Operation};
pub use error::{FunctionError, Result};
pub use expression::{parse_function_expression, ParseLimits};
pub use function::{Function, FunctionClass, FunctionInfo};
pub use parameter::{Parameter, ParameterMap, ParameterSnapshot, SharedParameter};
pub use registry::{get_function, get_function_class, list_functions, register_function_class};
pub use units::{Quantity, Unit};
pub use values::Values;
