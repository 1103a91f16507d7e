//! Built-in primitive functions.

use crate::error::Result;
use crate::function::FunctionClass;
use crate::parameter::ParameterMap;
use crate::traits::{Boundaries, Model};
use crate::units::Unit;
use std::f64::consts::PI;

/// Every built-in class, in registration order.
pub fn all_classes() -> Vec<Result<FunctionClass>> {
    vec![
        FunctionClass::new("powerlaw", POWERLAW, Powerlaw),
        FunctionClass::new("cutoff_powerlaw", CUTOFF_POWERLAW, CutoffPowerlaw),
        FunctionClass::new("line", LINE, Line),
        FunctionClass::new("constant", CONSTANT, Constant),
        FunctionClass::new("sin", SIN, Sin),
        FunctionClass::new("gaussian", GAUSSIAN, Gaussian),
        FunctionClass::new("exponential_cutoff", EXPONENTIAL_CUTOFF, ExponentialCutoff),
        FunctionClass::new("phabs_approx", PHABS_APPROX, PhabsApprox)
            .and_then(|class| class.with_fixed_units(&["keV", ""])),
        FunctionClass::new("gaussian_on_sphere", GAUSSIAN_ON_SPHERE, GaussianOnSphere),
        FunctionClass::new("constant_3d", CONSTANT_3D, Constant3D),
    ]
}

fn set_unit(parameters: &ParameterMap, name: &str, unit: Unit) {
    if let Some(parameter) = parameters.get(name) {
        parameter.borrow_mut().set_unit(unit);
    }
}

fn map_x(inputs: &[&[f64]], rule: impl Fn(f64) -> f64) -> Vec<f64> {
    inputs
        .first()
        .map(|x| x.iter().copied().map(rule).collect())
        .unwrap_or_default()
}

const POWERLAW: &str = r#"{
    "description": "A simple power-law",
    "latex": "$K~x^{index}$",
    "parameters": {
        "K": { "desc": "Normalization (differential flux at x = 1)", "initial value": 1.0, "min": 1e-30, "max": 1e3, "delta": 0.1 },
        "index": { "desc": "Photon index", "initial value": -2.0, "min": -10.0, "max": 10.0, "delta": 0.2 }
    }
}"#;

#[derive(Debug)]
struct Powerlaw;

impl Model for Powerlaw {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "K", "index"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (k, index) = (parameters[0], parameters[1]);
        map_x(inputs, |x| k * x.powf(index))
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "K", units[1].clone());
        set_unit(parameters, "index", Unit::dimensionless());
        None
    }
}

const CUTOFF_POWERLAW: &str = r#"{
    "description": "A power law multiplied by an exponential cutoff",
    "latex": "$K~x^{index}~\\exp(-x / xc)$",
    "parameters": {
        "K": { "desc": "Normalization (differential flux at x = 1)", "initial value": 1.0, "min": 1e-30, "max": 1e3 },
        "index": { "desc": "Photon index", "initial value": -2.0, "min": -10.0, "max": 10.0 },
        "xc": { "desc": "Cutoff energy", "initial value": 10.0, "min": 1e-30 }
    }
}"#;

#[derive(Debug)]
struct CutoffPowerlaw;

impl Model for CutoffPowerlaw {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "K", "index", "xc"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (k, index, xc) = (parameters[0], parameters[1], parameters[2]);
        map_x(inputs, |x| k * x.powf(index) * (-x / xc).exp())
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "K", units[1].clone());
        set_unit(parameters, "index", Unit::dimensionless());
        set_unit(parameters, "xc", units[0].clone());
        None
    }
}

const LINE: &str = r#"{
    "description": "A linear function",
    "latex": "$b * x + a$",
    "parameters": {
        "a": { "desc": "intercept", "initial value": 0.0 },
        "b": { "desc": "coefficient", "initial value": 1.0 }
    }
}"#;

#[derive(Debug)]
struct Line;

impl Model for Line {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "a", "b"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (a, b) = (parameters[0], parameters[1]);
        map_x(inputs, |x| b * x + a)
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "a", units[1].clone());
        set_unit(parameters, "b", &units[1] / &units[0]);
        None
    }
}

const CONSTANT: &str = r#"{
    "description": "Return k",
    "latex": "$k$",
    "parameters": {
        "k": { "desc": "Constant value", "initial value": 0.0 }
    }
}"#;

#[derive(Debug)]
struct Constant;

impl Model for Constant {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "k"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let k = parameters[0];
        map_x(inputs, |_| k)
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "k", units[1].clone());
        None
    }
}

const SIN: &str = r#"{
    "description": "A sine function",
    "latex": "$K~\\sin{(2\\pi f x + \\phi)}$",
    "parameters": {
        "K": { "desc": "Normalization", "initial value": 1.0 },
        "f": { "desc": "frequency", "initial value": 0.159154943, "min": 0.0 },
        "phi": { "desc": "phase", "initial value": 0.0, "min": -3.141592653589793, "max": 3.141592653589793, "unit": "rad" }
    }
}"#;

#[derive(Debug)]
struct Sin;

impl Model for Sin {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "K", "f", "phi"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (k, f, phi) = (parameters[0], parameters[1], parameters[2]);
        map_x(inputs, |x| k * (2.0 * PI * f * x + phi).sin())
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "K", units[1].clone());
        set_unit(parameters, "f", units[0].pow(-1.0));
        set_unit(parameters, "phi", Unit::radian());
        None
    }
}

const GAUSSIAN: &str = r#"{
    "description": "A Gaussian function",
    "latex": "$\\frac{F}{\\sigma \\sqrt{2 \\pi}} \\exp{\\frac{(x-\\mu)^2}{2~(\\sigma)^2}}$",
    "parameters": {
        "F": { "desc": "Integral between -inf and +inf", "initial value": 1.0 },
        "mu": { "desc": "Central value", "initial value": 0.0 },
        "sigma": { "desc": "standard deviation", "initial value": 1.0, "min": 1e-12 }
    }
}"#;

#[derive(Debug)]
struct Gaussian;

impl Model for Gaussian {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "F", "mu", "sigma"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (norm, mu, sigma) = (parameters[0], parameters[1], parameters[2]);
        let scale = norm / (sigma * (2.0 * PI).sqrt());
        map_x(inputs, |x| scale * (-(x - mu).powi(2) / (2.0 * sigma * sigma)).exp())
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "F", &units[1] * &units[0]);
        set_unit(parameters, "mu", units[0].clone());
        set_unit(parameters, "sigma", units[0].clone());
        None
    }
}

const EXPONENTIAL_CUTOFF: &str = r#"{
    "description": "An exponential cutoff, meant to multiply another function",
    "latex": "$\\exp(-x / xc)$",
    "parameters": {
        "xc": { "desc": "cutoff", "initial value": 10.0, "min": 1.0 }
    }
}"#;

#[derive(Debug)]
struct ExponentialCutoff;

impl Model for ExponentialCutoff {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "xc"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let xc = parameters[0];
        map_x(inputs, |x| (-x / xc).exp())
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "xc", units[0].clone());
        None
    }
}

/// Approximate photoelectric absorption: a cross section falling as
/// `E^(-8/3)`, normalized to 2e-22 cm2 at 1 keV.
const PHABS_APPROX: &str = r#"{
    "description": "Approximate photoelectric absorption (energies in keV)",
    "latex": "$\\exp(-N_H~\\sigma(x))$",
    "parameters": {
        "NH": { "desc": "absorbing column density in units of 1e22 particles per cm2", "initial value": 1.0, "min": 1e-4, "max": 1e4, "delta": 0.1 }
    }
}"#;

const PHABS_CROSS_SECTION: f64 = 2.0;

#[derive(Debug)]
struct PhabsApprox;

impl Model for PhabsApprox {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "NH"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let nh = parameters[0];
        map_x(inputs, |energy| (-nh * PHABS_CROSS_SECTION * energy.powf(-8.0 / 3.0)).exp())
    }

    fn set_units(&self, _units: &[Unit], _parameters: &ParameterMap) -> Option<Vec<Unit>> {
        None
    }
}

const GAUSSIAN_ON_SPHERE: &str = r#"{
    "description": "A bidimensional Gaussian function on a sphere (in spherical coordinates, degrees)",
    "latex": "$\\frac{1}{2\\pi \\sigma^2} \\exp{-\\frac{d^2}{2\\sigma^2}}$",
    "parameters": {
        "lon0": { "desc": "Longitude of the center of the source", "initial value": 1.0, "min": 0.0, "max": 360.0 },
        "lat0": { "desc": "Latitude of the center of the source", "initial value": 1.0, "min": -90.0, "max": 90.0 },
        "sigma": { "desc": "Standard deviation of the Gaussian distribution", "initial value": 1.0, "min": 1e-6, "max": 20.0 }
    }
}"#;

#[derive(Debug)]
struct GaussianOnSphere;

/// Angular distance in degrees between two points given in degrees.
fn angular_distance(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let (lon1, lat1, lon2, lat2) = (
        lon1.to_radians(),
        lat1.to_radians(),
        lon2.to_radians(),
        lat2.to_radians(),
    );
    let delta = lon2 - lon1;
    let numerator = ((lat2.cos() * delta.sin()).powi(2)
        + (lat1.cos() * lat2.sin() - lat1.sin() * lat2.cos() * delta.cos()).powi(2))
    .sqrt();
    let denominator = lat1.sin() * lat2.sin() + lat1.cos() * lat2.cos() * delta.cos();
    numerator.atan2(denominator).to_degrees()
}

impl Model for GaussianOnSphere {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "y", "lon0", "lat0", "sigma"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let (lon0, lat0, sigma) = (parameters[0], parameters[1], parameters[2]);
        let norm = (180.0 / PI).powi(2) / (2.0 * PI * sigma * sigma);
        match inputs {
            [lon, lat, ..] => lon
                .iter()
                .zip(lat.iter())
                .map(|(&lon, &lat)| {
                    let distance = angular_distance(lon0, lat0, lon, lat);
                    norm * (-0.5 * distance * distance / (sigma * sigma)).exp()
                })
                .collect(),
            _ => Vec::new(),
        }
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "lon0", units[0].clone());
        set_unit(parameters, "lat0", units[1].clone());
        set_unit(parameters, "sigma", units[0].clone());
        None
    }

    /// Five standard deviations around the center, widened in longitude near
    /// the poles.
    fn boundaries(&self, parameters: &[f64]) -> Option<Boundaries> {
        let (lon0, lat0, sigma) = (parameters[0], parameters[1], parameters[2]);
        let max_sigma = 5.0 * sigma;
        let min_lat = (lat0 - max_sigma).max(-90.0);
        let max_lat = (lat0 + max_sigma).min(90.0);
        let max_abs_lat = min_lat.abs().max(max_lat.abs());
        let lon_half_width = max_sigma / max_abs_lat.to_radians().cos();
        let (min_lon, max_lon) = if max_abs_lat > 89.0 || lon_half_width >= 180.0 {
            (0.0, 360.0)
        } else {
            (lon0 - lon_half_width, lon0 + lon_half_width)
        };
        Some(vec![(min_lon, max_lon), (min_lat, max_lat)])
    }
}

const CONSTANT_3D: &str = r#"{
    "description": "A constant function of three variables",
    "latex": "$k$",
    "parameters": {
        "k": { "desc": "Constant value", "initial value": 0.0 }
    }
}"#;

#[derive(Debug)]
struct Constant3D;

impl Model for Constant3D {
    fn calling_sequence(&self) -> &[&'static str] {
        &["x", "y", "z", "k"]
    }

    fn evaluate(&self, inputs: &[&[f64]], parameters: &[f64]) -> Vec<f64> {
        let k = parameters[0];
        map_x(inputs, |_| k)
    }

    fn set_units(&self, units: &[Unit], parameters: &ParameterMap) -> Option<Vec<Unit>> {
        set_unit(parameters, "k", units[3].clone());
        None
    }
}
