//! Physical units.
//!
//! Parses unit strings into a scale/offset pair over SI base dimensions and
//! converts values between compatible units.
//!
//! # Supported syntax
//!
//! ```text
//! ft              single unit
//! m/s**2          products, quotients and integer powers
//! kg*m/(s*s)      parenthesized groups
//! 1               dimensionless
//! ```
//!
//! Conversion follows `base = (value + offset) * scale`. Offsets (degC, degF)
//! are only valid on a lone unit, never inside a compound expression.

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, one_of, space0};
use nom::combinator::{map, opt};
use nom::sequence::{delimited, preceded};
use nom::IResult;
use nom::Parser;

use crate::error::{CouplerError, Result};

/// Number of base dimensions: m, kg, s, A, K, mol, cd, rad.
const N_DIMS: usize = 8;

type Dims = [i32; N_DIMS];

const DIMENSIONLESS: Dims = [0; N_DIMS];
const LENGTH: Dims = [1, 0, 0, 0, 0, 0, 0, 0];
const MASS: Dims = [0, 1, 0, 0, 0, 0, 0, 0];
const TIME: Dims = [0, 0, 1, 0, 0, 0, 0, 0];
const CURRENT: Dims = [0, 0, 0, 1, 0, 0, 0, 0];
const TEMPERATURE: Dims = [0, 0, 0, 0, 1, 0, 0, 0];
const AMOUNT: Dims = [0, 0, 0, 0, 0, 1, 0, 0];
const ANGLE: Dims = [0, 0, 0, 0, 0, 0, 0, 1];
const FREQUENCY: Dims = [0, 0, -1, 0, 0, 0, 0, 0];
const FORCE: Dims = [1, 1, -2, 0, 0, 0, 0, 0];
const PRESSURE: Dims = [-1, 1, -2, 0, 0, 0, 0, 0];
const ENERGY: Dims = [2, 1, -2, 0, 0, 0, 0, 0];
const POWER: Dims = [2, 1, -3, 0, 0, 0, 0, 0];
const VOLTAGE: Dims = [2, 1, -3, -1, 0, 0, 0, 0];
const RESISTANCE: Dims = [2, 1, -3, -2, 0, 0, 0, 0];

/// (name, scale to SI, offset, dimensions)
const UNIT_TABLE: &[(&str, f64, f64, Dims)] = &[
    ("1", 1.0, 0.0, DIMENSIONLESS),
    ("percent", 0.01, 0.0, DIMENSIONLESS),
    // length
    ("m", 1.0, 0.0, LENGTH),
    ("km", 1e3, 0.0, LENGTH),
    ("cm", 1e-2, 0.0, LENGTH),
    ("mm", 1e-3, 0.0, LENGTH),
    ("um", 1e-6, 0.0, LENGTH),
    ("inch", 0.0254, 0.0, LENGTH),
    ("in", 0.0254, 0.0, LENGTH),
    ("ft", 0.3048, 0.0, LENGTH),
    ("yd", 0.9144, 0.0, LENGTH),
    ("mi", 1609.344, 0.0, LENGTH),
    ("nmi", 1852.0, 0.0, LENGTH),
    // mass
    ("kg", 1.0, 0.0, MASS),
    ("g", 1e-3, 0.0, MASS),
    ("t", 1e3, 0.0, MASS),
    ("lbm", 0.453_592_37, 0.0, MASS),
    // time
    ("s", 1.0, 0.0, TIME),
    ("ms", 1e-3, 0.0, TIME),
    ("min", 60.0, 0.0, TIME),
    ("h", 3600.0, 0.0, TIME),
    ("d", 86400.0, 0.0, TIME),
    ("Hz", 1.0, 0.0, FREQUENCY),
    // force
    ("N", 1.0, 0.0, FORCE),
    ("kN", 1e3, 0.0, FORCE),
    ("lbf", 4.448_221_615_260_5, 0.0, FORCE),
    // pressure
    ("Pa", 1.0, 0.0, PRESSURE),
    ("kPa", 1e3, 0.0, PRESSURE),
    ("MPa", 1e6, 0.0, PRESSURE),
    ("bar", 1e5, 0.0, PRESSURE),
    ("psi", 6_894.757_293_168, 0.0, PRESSURE),
    ("atm", 101_325.0, 0.0, PRESSURE),
    // energy and power
    ("J", 1.0, 0.0, ENERGY),
    ("kJ", 1e3, 0.0, ENERGY),
    ("W", 1.0, 0.0, POWER),
    ("kW", 1e3, 0.0, POWER),
    ("hp", 745.699_871_582_270_2, 0.0, POWER),
    // electrical
    ("A", 1.0, 0.0, CURRENT),
    ("V", 1.0, 0.0, VOLTAGE),
    ("ohm", 1.0, 0.0, RESISTANCE),
    // temperature
    ("K", 1.0, 0.0, TEMPERATURE),
    ("degR", 5.0 / 9.0, 0.0, TEMPERATURE),
    ("degC", 1.0, 273.15, TEMPERATURE),
    ("degF", 5.0 / 9.0, 459.67, TEMPERATURE),
    // amount, angle
    ("mol", 1.0, 0.0, AMOUNT),
    ("rad", 1.0, 0.0, ANGLE),
    ("deg", std::f64::consts::PI / 180.0, 0.0, ANGLE),
];

/// A parsed unit: `base = (value + offset) * scale`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Unit {
    pub scale: f64,
    pub offset: f64,
    dims: Dims,
}

impl Unit {
    /// True when both units measure the same physical dimension.
    pub fn is_compatible(&self, other: &Unit) -> bool {
        self.dims == other.dims
    }
}

/// Affine map from one unit to another: `to = from * factor + add`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UnitConversion {
    pub factor: f64,
    pub add: f64,
}

impl UnitConversion {
    pub const IDENTITY: UnitConversion = UnitConversion {
        factor: 1.0,
        add: 0.0,
    };

    pub fn apply(&self, value: f64) -> f64 {
        value * self.factor + self.add
    }

    pub fn apply_all(&self, values: &mut [f64]) {
        if *self == Self::IDENTITY {
            return;
        }
        for v in values.iter_mut() {
            *v = self.apply(*v);
        }
    }

    pub fn inverse(&self) -> UnitConversion {
        UnitConversion {
            factor: 1.0 / self.factor,
            add: -self.add / self.factor,
        }
    }
}

fn lookup(name: &str) -> Option<Unit> {
    UNIT_TABLE
        .iter()
        .find(|(n, ..)| *n == name)
        .map(|&(_, scale, offset, dims)| Unit { scale, offset, dims })
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

fn unit_name(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| c.is_ascii_alphanumeric() || c == '_').parse(input)
}

fn atom(input: &str) -> IResult<&str, Vec<(&str, i32)>> {
    alt((
        delimited((char('('), space0), product, (space0, char(')'))),
        map(unit_name, |n| vec![(n, 1)]),
    ))
    .parse(input)
}

fn factor(input: &str) -> IResult<&str, Vec<(&str, i32)>> {
    let (rest, mut terms) = atom(input)?;
    let (rest, power) = opt(preceded(
        (space0, tag("**"), space0),
        nom::character::complete::i32,
    ))
    .parse(rest)?;
    if let Some(p) = power {
        for term in &mut terms {
            term.1 *= p;
        }
    }
    Ok((rest, terms))
}

fn product(input: &str) -> IResult<&str, Vec<(&str, i32)>> {
    let (mut rest, mut terms) = factor(input)?;
    loop {
        let op: IResult<&str, char> = delimited(space0, one_of("*/"), space0).parse(rest);
        let Ok((after_op, op)) = op else { break };
        let (after, mut next) = factor(after_op)?;
        if op == '/' {
            for term in &mut next {
                term.1 = -term.1;
            }
        }
        terms.extend(next);
        rest = after;
    }
    Ok((rest, terms))
}

/// Parse a unit string such as `"ft"`, `"m/s**2"` or `"kg*m/s**2"`.
pub fn parse_units(units: &str) -> Result<Unit> {
    let trimmed = units.trim();
    let (rest, terms) = product(trimmed)
        .map_err(|_| CouplerError::Units(format!("The units '{}' are invalid.", units)))?;
    if !rest.trim().is_empty() {
        return Err(CouplerError::Units(format!(
            "The units '{}' are invalid.",
            units
        )));
    }

    if let [(name, 1)] = terms.as_slice() {
        return lookup(name)
            .ok_or_else(|| CouplerError::Units(format!("The units '{}' are invalid.", units)));
    }

    let mut scale = 1.0;
    let mut dims = DIMENSIONLESS;
    for (name, power) in terms {
        let unit = lookup(name)
            .ok_or_else(|| CouplerError::Units(format!("The units '{}' are invalid.", units)))?;
        if unit.offset != 0.0 {
            return Err(CouplerError::Units(format!(
                "Offset unit '{}' cannot be combined in '{}'.",
                name, units
            )));
        }
        scale *= unit.scale.powi(power);
        for (d, u) in dims.iter_mut().zip(unit.dims.iter()) {
            *d += u * power;
        }
    }
    Ok(Unit {
        scale,
        offset: 0.0,
        dims,
    })
}

/// Returns true when `a` and `b` parse and measure the same dimension.
pub fn is_compatible(a: &str, b: &str) -> Result<bool> {
    Ok(parse_units(a)?.is_compatible(&parse_units(b)?))
}

/// Conversion taking values in `from` units to `to` units.
pub fn conversion(from: &str, to: &str) -> Result<UnitConversion> {
    if from == to {
        return Ok(UnitConversion::IDENTITY);
    }
    let f = parse_units(from)?;
    let t = parse_units(to)?;
    if !f.is_compatible(&t) {
        return Err(CouplerError::Units(format!(
            "Cannot convert from '{}' to '{}'.",
            from, to
        )));
    }
    let factor = f.scale / t.scale;
    Ok(UnitConversion {
        factor,
        add: f.offset * factor - t.offset,
    })
}

/// Conversion between optional units. A missing unit on either side means the
/// values pass through unchanged.
pub fn conversion_opt(from: Option<&str>, to: Option<&str>) -> Result<UnitConversion> {
    match (from, to) {
        (Some(f), Some(t)) => conversion(f, t),
        _ => Ok(UnitConversion::IDENTITY),
    }
}

/// Convert `values` in place from `from` units to `to` units.
pub fn convert_values(values: &mut [f64], from: Option<&str>, to: Option<&str>) -> Result<()> {
    conversion_opt(from, to)?.apply_all(values);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn inch_to_ft() {
        let c = conversion("inch", "ft").unwrap();
        assert_relative_eq!(c.apply(24.0), 2.0, epsilon = 1e-12);
        assert_relative_eq!(c.inverse().apply(2.0), 24.0, epsilon = 1e-12);
    }

    #[test]
    fn celsius_to_fahrenheit() {
        let c = conversion("degC", "degF").unwrap();
        assert_relative_eq!(c.apply(100.0), 212.0, epsilon = 1e-9);
        assert_relative_eq!(c.apply(0.0), 32.0, epsilon = 1e-9);
        assert_relative_eq!(c.inverse().apply(212.0), 100.0, epsilon = 1e-9);
    }

    #[test]
    fn compound_units() {
        assert!(is_compatible("kg*m/s**2", "N").unwrap());
        assert!(is_compatible("kg*m/(s*s)", "lbf").unwrap());
        let c = conversion("m/s", "km/h").unwrap();
        assert_relative_eq!(c.apply(10.0), 36.0, epsilon = 1e-9);
    }

    #[test]
    fn incompatible_units_error() {
        let err = conversion("ft", "s").unwrap_err();
        assert_eq!(err.to_string(), "Units error: Cannot convert from 'ft' to 's'.");
    }

    #[test]
    fn unknown_unit_error() {
        let err = parse_units("furlong").unwrap_err();
        assert!(err.to_string().contains("'furlong' are invalid"));
    }

    #[test]
    fn offset_unit_in_compound_rejected() {
        assert!(parse_units("degC/s").is_err());
    }

    #[test]
    fn missing_units_pass_through() {
        let mut vals = [1.0, 2.0];
        convert_values(&mut vals, Some("ft"), None).unwrap();
        assert_eq!(vals, [1.0, 2.0]);
    }
}
