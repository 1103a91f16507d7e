use crate::parameter::ParameterMap;
use crate::units::Unit;
use std::fmt::Debug;

/// Valid range of each input coordinate, e.g. `[(ra_min, ra_max), (dec_min, dec_max)]`.
pub type Boundaries = Vec<(f64, f64)>;

/// The evaluation rule of a primitive function class.
///
/// A model is shared by every instance of its class, so it carries no
/// per-instance state: parameter values are handed in on every call.
pub trait Model: Debug + Send + Sync {
    /// Names consumed by `evaluate`: the positional variables first (a prefix
    /// of `x`, `y`, `z`), then one name per parameter.
    fn calling_sequence(&self) -> &[&'static str];

    /// Evaluates the rule element-wise.
    /// inputs: one slice per positional variable, all of the same length
    /// parameters: parameter values in calling-sequence order
    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64>;

    /// Called after the instance's units were bound so that the model can
    /// give its parameters consistent units.
    /// Returning `Some` overrides the requested units (fixed-unit models).
    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>>;

    /// Valid input region of 2-D and 3-D models.
    fn boundaries(&self, _parameters: &[f64]) -> Option<Boundaries> {
        None
    }
}
