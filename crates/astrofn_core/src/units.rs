//! Physical units: dimension maps, unit-string parsing and conversion.
//!
//! A [`Unit`] is a map from base dimensions to exponents plus a magnitude
//! relative to the SI base units (kg, m, s, rad, K, A) and a display symbol.
//! Two units are convertible when their dimension maps match; the conversion
//! factor is the ratio of the magnitudes.

use crate::error::{FunctionError, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{fmt, ops};

const EXPONENT_TOLERANCE: f64 = 1e-10;

/// Deepest parenthesis nesting accepted in a unit specifier.
const MAX_UNIT_NESTING: usize = 32;

/// A base dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Mass,
    Length,
    Time,
    Angle,
    Temperature,
    Current,
    /// Photon or event counts.
    Count,
}

/// A map of dimensions and their exponents.
///
/// `cm2 s` is `{Length: 2, Time: 1}`. Zero exponents are never stored, so a
/// dimensionless unit has an empty map.
#[derive(Debug, Clone, Default)]
pub struct DimensionMap(IndexMap<Dimension, f64>);

impl DimensionMap {
    pub fn dimensionless() -> Self {
        Self(IndexMap::new())
    }

    pub fn single(dimension: Dimension, exponent: f64) -> Self {
        let mut map = IndexMap::new();
        map.insert(dimension, exponent);
        Self(map)
    }

    pub fn is_dimensionless(&self) -> bool {
        self.0.is_empty()
    }

    pub fn exponent(&self, dimension: Dimension) -> f64 {
        self.0.get(&dimension).copied().unwrap_or(0.0)
    }

    pub fn pow(&self, exponent: f64) -> Self {
        Self(
            self.0
                .iter()
                .map(|(dimension, value)| (*dimension, value * exponent))
                .filter(|(_, value)| value.abs() > EXPONENT_TOLERANCE)
                .collect(),
        )
    }

    fn combine(&self, rhs: &Self, sign: f64) -> Self {
        let mut result = self.0.clone();
        for (dimension, value) in &rhs.0 {
            *result.entry(*dimension).or_insert(0.0) += sign * value;
        }
        result.retain(|_, value| value.abs() > EXPONENT_TOLERANCE);
        Self(result)
    }
}

impl PartialEq for DimensionMap {
    /// Fuzzy on exponents, so `(m**0.5)**2 == m`.
    fn eq(&self, other: &Self) -> bool {
        self.0.len() == other.0.len()
            && self.0.iter().all(|(dimension, value)| {
                other
                    .0
                    .get(dimension)
                    .is_some_and(|other| (other - value).abs() <= EXPONENT_TOLERANCE)
            })
    }
}

/// A physical unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Unit {
    dimensions: DimensionMap,
    magnitude: f64,
    symbol: String,
}

impl Unit {
    /// The unscaled dimensionless unit.
    pub fn dimensionless() -> Self {
        Self {
            dimensions: DimensionMap::dimensionless(),
            magnitude: 1.0,
            symbol: String::new(),
        }
    }

    pub fn radian() -> Self {
        Self::base("rad", DimensionMap::single(Dimension::Angle, 1.0), 1.0)
    }

    fn base(symbol: &str, dimensions: DimensionMap, magnitude: f64) -> Self {
        Self {
            dimensions,
            magnitude,
            symbol: symbol.to_string(),
        }
    }

    /// Resolves a unit specifier such as `keV`, `1 / (cm2 s keV)` or
    /// `erg cm-2 s-1`. The empty string is the dimensionless unit.
    pub fn parse(spec: &str) -> Result<Self> {
        let trimmed = spec.trim();
        if trimmed.is_empty() || trimmed == "dimensionless" {
            return Ok(Self::dimensionless());
        }
        let mut parser = UnitParser {
            chars: trimmed.chars().collect(),
            pos: 0,
            depth: 0,
        };
        let mut unit = parser.parse_product()?;
        parser.skip_whitespace();
        if parser.pos < parser.chars.len() {
            return Err(FunctionError::unit(format!(
                "Could not get a unit from '{spec}': unexpected '{}'",
                parser.chars[parser.pos]
            )));
        }
        unit.symbol = trimmed.to_string();
        Ok(unit)
    }

    pub fn dimensions(&self) -> &DimensionMap {
        &self.dimensions
    }

    pub fn magnitude(&self) -> f64 {
        self.magnitude
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// True for units without dimensions, whatever their scale.
    pub fn is_dimensionless(&self) -> bool {
        self.dimensions.is_dimensionless()
    }

    /// True when both units measure the same physical quantity.
    pub fn is_equivalent(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions
    }

    /// Factor `f` such that a value `v` in `self` equals `v * f` in `target`.
    pub fn conversion_factor(&self, target: &Self) -> Result<f64> {
        if !self.is_equivalent(target) {
            return Err(FunctionError::unit(format!(
                "'{}' and '{}' are not convertible",
                self.display_symbol(),
                target.display_symbol()
            )));
        }
        Ok(self.magnitude / target.magnitude)
    }

    pub fn convert(&self, values: &[f64], target: &Self) -> Result<Vec<f64>> {
        let factor = self.conversion_factor(target)?;
        Ok(values.iter().map(|value| value * factor).collect())
    }

    pub fn pow(&self, exponent: f64) -> Self {
        let symbol = if self.symbol.is_empty() || exponent == 1.0 {
            self.symbol.clone()
        } else if is_simple_symbol(&self.symbol) {
            format!("{}**{}", self.symbol, exponent)
        } else {
            format!("({})**{}", self.symbol, exponent)
        };
        Self {
            dimensions: self.dimensions.pow(exponent),
            magnitude: self.magnitude.powf(exponent),
            symbol,
        }
    }

    fn display_symbol(&self) -> &str {
        if self.symbol.is_empty() {
            "dimensionless"
        } else {
            &self.symbol
        }
    }
}

fn is_simple_symbol(symbol: &str) -> bool {
    symbol.chars().all(char::is_alphabetic)
}

impl PartialEq for Unit {
    /// Same dimensions and same scale; the symbol is only cosmetic.
    fn eq(&self, other: &Self) -> bool {
        self.dimensions == other.dimensions
            && (self.magnitude - other.magnitude).abs()
                <= 1e-12 * self.magnitude.abs().max(other.magnitude.abs())
    }
}

impl ops::Mul for &Unit {
    type Output = Unit;

    fn mul(self, rhs: &Unit) -> Unit {
        let symbol = match (self.symbol.is_empty(), rhs.symbol.is_empty()) {
            (true, _) => rhs.symbol.clone(),
            (false, true) => self.symbol.clone(),
            (false, false) => format!("{} {}", self.symbol, rhs.symbol),
        };
        Unit {
            dimensions: self.dimensions.combine(&rhs.dimensions, 1.0),
            magnitude: self.magnitude * rhs.magnitude,
            symbol,
        }
    }
}

impl ops::Div for &Unit {
    type Output = Unit;

    fn div(self, rhs: &Unit) -> Unit {
        let denominator = if is_simple_symbol(&rhs.symbol) {
            rhs.symbol.clone()
        } else {
            format!("({})", rhs.symbol)
        };
        let symbol = match (self.symbol.is_empty(), rhs.symbol.is_empty()) {
            (_, true) => self.symbol.clone(),
            (true, false) => format!("1 / {denominator}"),
            (false, false) => format!("{} / {denominator}", self.symbol),
        };
        Unit {
            dimensions: self.dimensions.combine(&rhs.dimensions, -1.0),
            magnitude: self.magnitude / rhs.magnitude,
            symbol,
        }
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_symbol())
    }
}

impl TryFrom<String> for Unit {
    type Error = FunctionError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Unit> for String {
    fn from(unit: Unit) -> Self {
        unit.symbol
    }
}

/// An array of values carrying a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Quantity {
    pub values: Vec<f64>,
    pub unit: Unit,
}

impl Quantity {
    pub fn new(values: Vec<f64>, unit: Unit) -> Self {
        Self { values, unit }
    }

    pub fn to(&self, target: &Unit) -> Result<Self> {
        Ok(Self {
            values: self.unit.convert(&self.values, target)?,
            unit: target.clone(),
        })
    }
}

fn lookup_base(name: &str) -> Option<Unit> {
    use Dimension::*;

    let energy = || {
        DimensionMap::single(Mass, 1.0)
            .combine(&DimensionMap::single(Length, 2.0), 1.0)
            .combine(&DimensionMap::single(Time, 2.0), -1.0)
    };
    let electron_volt = 1.602_176_634e-19;
    let parsec = 3.085_677_581_491_367e16;

    let (dimensions, magnitude) = match name {
        "m" => (DimensionMap::single(Length, 1.0), 1.0),
        "cm" => (DimensionMap::single(Length, 1.0), 1e-2),
        "mm" => (DimensionMap::single(Length, 1.0), 1e-3),
        "km" => (DimensionMap::single(Length, 1.0), 1e3),
        "Angstrom" => (DimensionMap::single(Length, 1.0), 1e-10),
        "AU" => (DimensionMap::single(Length, 1.0), 1.495_978_707e11),
        "pc" => (DimensionMap::single(Length, 1.0), parsec),
        "kpc" => (DimensionMap::single(Length, 1.0), parsec * 1e3),
        "Mpc" => (DimensionMap::single(Length, 1.0), parsec * 1e6),
        "g" => (DimensionMap::single(Mass, 1.0), 1e-3),
        "kg" => (DimensionMap::single(Mass, 1.0), 1.0),
        "s" => (DimensionMap::single(Time, 1.0), 1.0),
        "ms" => (DimensionMap::single(Time, 1.0), 1e-3),
        "us" => (DimensionMap::single(Time, 1.0), 1e-6),
        "ns" => (DimensionMap::single(Time, 1.0), 1e-9),
        "min" => (DimensionMap::single(Time, 1.0), 60.0),
        "h" => (DimensionMap::single(Time, 1.0), 3600.0),
        "d" => (DimensionMap::single(Time, 1.0), 86400.0),
        "yr" => (DimensionMap::single(Time, 1.0), 3.155_76e7),
        "Hz" => (DimensionMap::single(Time, -1.0), 1.0),
        "kHz" => (DimensionMap::single(Time, -1.0), 1e3),
        "MHz" => (DimensionMap::single(Time, -1.0), 1e6),
        "GHz" => (DimensionMap::single(Time, -1.0), 1e9),
        "J" => (energy(), 1.0),
        "erg" => (energy(), 1e-7),
        "eV" => (energy(), electron_volt),
        "keV" => (energy(), electron_volt * 1e3),
        "MeV" => (energy(), electron_volt * 1e6),
        "GeV" => (energy(), electron_volt * 1e9),
        "TeV" => (energy(), electron_volt * 1e12),
        "W" => (
            energy().combine(&DimensionMap::single(Time, 1.0), -1.0),
            1.0,
        ),
        "Jy" => (
            DimensionMap::single(Mass, 1.0).combine(&DimensionMap::single(Time, 2.0), -1.0),
            1e-26,
        ),
        "rad" => return Some(Unit::radian()),
        "deg" => (DimensionMap::single(Angle, 1.0), std::f64::consts::PI / 180.0),
        "arcmin" => (
            DimensionMap::single(Angle, 1.0),
            std::f64::consts::PI / 10_800.0,
        ),
        "arcsec" => (
            DimensionMap::single(Angle, 1.0),
            std::f64::consts::PI / 648_000.0,
        ),
        "sr" => (DimensionMap::single(Angle, 2.0), 1.0),
        "K" => (DimensionMap::single(Temperature, 1.0), 1.0),
        "A" => (DimensionMap::single(Current, 1.0), 1.0),
        "ph" | "photon" | "ct" | "count" => (DimensionMap::single(Count, 1.0), 1.0),
        _ => return None,
    };
    Some(Unit::base(name, dimensions, magnitude))
}

/// Recursive descent over unit specifiers:
///
/// ```text
/// product := factor (('*' | '.' | ' ') factor | '/' factor)*
/// factor  := (name | number | '(' product ')') (('**' | '^') exponent | exponent)?
/// ```
struct UnitParser {
    chars: Vec<char>,
    pos: usize,
    depth: usize,
}

impl UnitParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
    }

    fn error(&self, reason: &str) -> FunctionError {
        let text: String = self.chars.iter().collect();
        FunctionError::unit(format!("Could not get a unit from '{text}': {reason}"))
    }

    fn parse_product(&mut self) -> Result<Unit> {
        let mut unit = self.parse_factor()?;
        loop {
            self.skip_whitespace();
            match self.peek() {
                Some('/') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    unit = &unit / &rhs;
                }
                Some('*') | Some('.') => {
                    self.pos += 1;
                    let rhs = self.parse_factor()?;
                    unit = &unit * &rhs;
                }
                Some(c) if c.is_alphanumeric() || c == '(' => {
                    let rhs = self.parse_factor()?;
                    unit = &unit * &rhs;
                }
                _ => break,
            }
        }
        Ok(unit)
    }

    fn parse_factor(&mut self) -> Result<Unit> {
        self.skip_whitespace();
        let unit = match self.peek() {
            Some('(') => {
                self.pos += 1;
                self.depth += 1;
                if self.depth > MAX_UNIT_NESTING {
                    return Err(self.error(&format!(
                        "parentheses nested deeper than {MAX_UNIT_NESTING} levels"
                    )));
                }
                let inner = self.parse_product()?;
                self.depth -= 1;
                self.skip_whitespace();
                if self.peek() != Some(')') {
                    return Err(self.error("expected ')'"));
                }
                self.pos += 1;
                inner
            }
            Some(c) if c.is_ascii_digit() => {
                let number = self.parse_number()?;
                Unit {
                    dimensions: DimensionMap::dimensionless(),
                    magnitude: number,
                    symbol: String::new(),
                }
            }
            Some(c) if c.is_alphabetic() => {
                let start = self.pos;
                while self.peek().is_some_and(char::is_alphabetic) {
                    self.pos += 1;
                }
                let name: String = self.chars[start..self.pos].iter().collect();
                lookup_base(&name).ok_or_else(|| self.error(&format!("unknown unit '{name}'")))?
            }
            _ => return Err(self.error("expected a unit")),
        };
        self.parse_exponent(unit)
    }

    fn parse_exponent(&mut self, unit: Unit) -> Result<Unit> {
        if self.peek() == Some('*') && self.chars.get(self.pos + 1) == Some(&'*') {
            self.pos += 2;
            let exponent = self.parse_signed_number()?;
            return Ok(unit.pow(exponent));
        }
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.parse_signed_number()?;
            return Ok(unit.pow(exponent));
        }
        // Suffix exponents such as `cm2` or `s-1`.
        let signed = self.peek() == Some('-')
            && self.chars.get(self.pos + 1).is_some_and(char::is_ascii_digit);
        if signed || self.peek().is_some_and(|c| c.is_ascii_digit()) {
            let exponent = self.parse_signed_number()?;
            return Ok(unit.pow(exponent));
        }
        Ok(unit)
    }

    fn parse_signed_number(&mut self) -> Result<f64> {
        self.skip_whitespace();
        let negative = match self.peek() {
            Some('-') => {
                self.pos += 1;
                true
            }
            Some('+') => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        let value = self.parse_number()?;
        Ok(if negative { -value } else { value })
    }

    fn parse_number(&mut self) -> Result<f64> {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_digit() || c == '.')
        {
            self.pos += 1;
        }
        let text: String = self.chars[start..self.pos].iter().collect();
        text.parse::<f64>()
            .map_err(|_| self.error(&format!("invalid number '{text}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn parses_energy_units_and_converts() {
        let kev = Unit::parse("keV").expect("keV");
        let mev = Unit::parse("MeV").expect("MeV");
        assert!(kev.is_equivalent(&mev));
        assert_relative_eq!(
            mev.conversion_factor(&kev).expect("factor"),
            1000.0,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            Unit::parse("erg").expect("erg").conversion_factor(&kev).expect("factor"),
            1e-7 / 1.602_176_634e-16,
            max_relative = 1e-12
        );
    }

    #[test]
    fn parses_compound_forms_to_the_same_dimensions() {
        let slash = Unit::parse("1 / (cm2 s keV)").expect("slash form");
        let suffix = Unit::parse("cm-2 s-1 keV-1").expect("suffix form");
        let power = Unit::parse("(keV cm**2 s)**-1").expect("power form");
        assert_eq!(slash, suffix);
        assert_eq!(slash, power);
        assert_eq!(slash.dimensions().exponent(Dimension::Time), 1.0);
        assert_eq!(slash.dimensions().exponent(Dimension::Mass), -1.0);
    }

    #[test]
    fn empty_specifier_is_dimensionless() {
        let unit = Unit::parse("").expect("dimensionless");
        assert!(unit.is_dimensionless());
        assert_eq!(unit.to_string(), "dimensionless");
        assert!(Unit::parse("keV / eV").expect("ratio").is_dimensionless());
    }

    #[test]
    fn rejects_unknown_and_malformed_specifiers() {
        assert!(matches!(Unit::parse("furlong"), Err(FunctionError::Unit(_))));
        assert!(matches!(Unit::parse("(keV"), Err(FunctionError::Unit(_))));
        assert!(matches!(Unit::parse("keV )"), Err(FunctionError::Unit(_))));
    }

    #[test]
    fn conversion_between_incompatible_units_fails() {
        let kev = Unit::parse("keV").expect("keV");
        let cm = Unit::parse("cm").expect("cm");
        assert!(matches!(
            Quantity::new(vec![1.0], kev).to(&cm),
            Err(FunctionError::Unit(_))
        ));
    }

    #[test]
    fn derived_symbols_parse_back() {
        let flux = &Unit::parse("ph").expect("ph") / &Unit::parse("cm2 s keV").expect("area");
        let reparsed = Unit::parse(flux.symbol()).expect("derived symbol");
        assert_eq!(flux, reparsed);

        let squared = Unit::parse("cm2 s").expect("cm2 s").pow(2.0);
        assert_eq!(Unit::parse(squared.symbol()).expect("squared"), squared);
    }

    #[test]
    fn serde_uses_the_symbol() {
        let unit = Unit::parse("keV").expect("keV");
        let json = serde_json::to_string(&unit).expect("serialize");
        assert_eq!(json, "\"keV\"");
        let back: Unit = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, unit);
    }

    #[test]
    fn deeply_nested_specifiers_are_unit_errors() {
        let nested = format!("{}keV{}", "(".repeat(1000), ")".repeat(1000));
        assert!(matches!(Unit::parse(&nested), Err(FunctionError::Unit(_))));

        let shallow = format!("{}keV{}", "(".repeat(4), ")".repeat(4));
        assert_eq!(
            Unit::parse(&shallow).expect("shallow"),
            Unit::parse("keV").expect("keV")
        );

        let json = serde_json::to_string(&[nested]).expect("json");
        assert!(serde_json::from_str::<Vec<Unit>>(&json).is_err());
    }

    #[test]
    fn radian_matches_its_specifier() {
        assert_eq!(Unit::radian(), Unit::parse("rad").expect("rad"));
        assert_eq!(Unit::radian().symbol(), "rad");
    }
}
