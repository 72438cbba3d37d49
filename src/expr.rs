//! Expression language used by `ExecComp`.
//!
//! # Supported syntax
//!
//! ```text
//! y = 2*x                    assignment, one per statement
//! z = x**2 + sin(y) / 3.     + - * / ** and unary minus
//! s = sum(x)                 sin cos tan exp log log10 sqrt abs sum
//! a = pi * r**2              constants pi, e
//! ```
//!
//! Evaluation is element-wise over complex arrays so partial derivatives can
//! be taken by complex step. Size-1 operands broadcast.

use std::collections::{BTreeSet, HashMap};

use nom::branch::alt;
use nom::bytes::complete::{tag, take_while};
use nom::character::complete::{char, digit1, one_of, satisfy, space0};
use nom::combinator::{map, opt, recognize};
use nom::multi::separated_list0;
use nom::sequence::{delimited, preceded};
use nom::IResult;
use nom::Parser;
use num_complex::Complex64;

use crate::error::{CouplerError, Result};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Func {
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Log10,
    Sqrt,
    Abs,
    Sum,
}

impl Func {
    fn from_name(name: &str) -> Option<Func> {
        Some(match name {
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "exp" => Func::Exp,
            "log" => Func::Log,
            "log10" => Func::Log10,
            "sqrt" => Func::Sqrt,
            "abs" => Func::Abs,
            "sum" => Func::Sum,
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
}

/// One `target = expr` assignment.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub target: String,
    pub expr: Expr,
}

// ---------------------------------------------------------------------------
// Token parsers
// ---------------------------------------------------------------------------

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize((
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))
    .parse(input)
}

/// Decimal number without sign: `2`, `2.`, `.5`, `1e-3`.
fn number(input: &str) -> IResult<&str, f64> {
    let exponent = (one_of("eE"), opt(one_of("+-")), digit1);
    let (rest, text) = recognize((
        alt((
            recognize((digit1, opt((char('.'), opt(digit1))))),
            recognize((char('.'), digit1)),
        )),
        opt(exponent),
    ))
    .parse(input)?;
    // The recognized text is always a valid float literal.
    let value = text.parse::<f64>().unwrap_or(f64::NAN);
    Ok((rest, value))
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn call_or_var(input: &str) -> IResult<&str, Expr> {
    let (rest, name) = identifier(input)?;
    let (rest, args) = opt(delimited(
        (space0, char('('), space0),
        separated_list0((space0, char(','), space0), sum),
        (space0, char(')')),
    ))
    .parse(rest)?;

    match args {
        None => Ok((rest, Expr::Var(name.to_string()))),
        Some(mut args) => {
            let func = Func::from_name(name);
            match (func, args.len()) {
                (Some(f), 1) => Ok((rest, Expr::Call(f, Box::new(args.remove(0))))),
                _ => Err(nom::Err::Failure(nom::error::Error::new(
                    input,
                    nom::error::ErrorKind::Verify,
                ))),
            }
        }
    }
}

fn atom(input: &str) -> IResult<&str, Expr> {
    alt((
        map(number, Expr::Num),
        call_or_var,
        delimited((char('('), space0), sum, (space0, char(')'))),
    ))
    .parse(input)
}

fn power(input: &str) -> IResult<&str, Expr> {
    let (rest, base) = atom(input)?;
    let (rest, exp) = opt(preceded((space0, tag("**"), space0), unary)).parse(rest)?;
    match exp {
        Some(e) => Ok((rest, Expr::Binary(BinOp::Pow, Box::new(base), Box::new(e)))),
        None => Ok((rest, base)),
    }
}

fn unary(input: &str) -> IResult<&str, Expr> {
    alt((
        map(preceded((char('-'), space0), unary), |e| Expr::Neg(Box::new(e))),
        preceded((char('+'), space0), unary),
        power,
    ))
    .parse(input)
}

fn product(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut lhs) = unary(input)?;
    loop {
        let op: IResult<&str, char> = delimited(space0, one_of("*/"), space0).parse(rest);
        let Ok((after_op, op)) = op else { break };
        let (after, rhs) = unary(after_op)?;
        let op = if op == '*' { BinOp::Mul } else { BinOp::Div };
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        rest = after;
    }
    Ok((rest, lhs))
}

fn sum(input: &str) -> IResult<&str, Expr> {
    let (mut rest, mut lhs) = product(input)?;
    loop {
        let op: IResult<&str, char> = delimited(space0, one_of("+-"), space0).parse(rest);
        let Ok((after_op, op)) = op else { break };
        let (after, rhs) = product(after_op)?;
        let op = if op == '+' { BinOp::Add } else { BinOp::Sub };
        lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        rest = after;
    }
    Ok((rest, lhs))
}

/// Parse a single `name = expression` statement.
pub fn parse_statement(text: &str) -> Result<Statement> {
    let parsed: IResult<&str, (&str, Expr)> = (
        preceded(space0, identifier),
        preceded((space0, char('='), space0), sum),
    )
        .parse(text.trim());

    match parsed {
        Ok((rest, (target, expr))) if rest.trim().is_empty() => Ok(Statement {
            target: target.to_string(),
            expr,
        }),
        _ => Err(CouplerError::Expr(format!(
            "failed to parse expression '{}'",
            text
        ))),
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn is_constant(name: &str) -> bool {
    name == "pi" || name == "e"
}

impl Expr {
    /// Collect the variable names referenced by this expression. Constants are
    /// skipped unless `vars` shadows them at evaluation time.
    pub fn collect_names(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Num(_) => {}
            Expr::Var(name) => {
                if !is_constant(name) {
                    out.insert(name.clone());
                }
            }
            Expr::Neg(e) | Expr::Call(_, e) => e.collect_names(out),
            Expr::Binary(_, a, b) => {
                a.collect_names(out);
                b.collect_names(out);
            }
        }
    }

    /// Evaluate element-wise against named complex arrays.
    pub fn eval(&self, vars: &HashMap<String, Vec<Complex64>>) -> Result<Vec<Complex64>> {
        match self {
            Expr::Num(v) => Ok(vec![Complex64::new(*v, 0.0)]),
            Expr::Var(name) => match vars.get(name) {
                Some(v) => Ok(v.clone()),
                None if name == "pi" => Ok(vec![Complex64::new(std::f64::consts::PI, 0.0)]),
                None if name == "e" => Ok(vec![Complex64::new(std::f64::consts::E, 0.0)]),
                None => Err(CouplerError::Expr(format!("unknown variable '{}'", name))),
            },
            Expr::Neg(e) => Ok(e.eval(vars)?.into_iter().map(|v| -v).collect()),
            Expr::Binary(op, a, b) => {
                let a = a.eval(vars)?;
                let b = b.eval(vars)?;
                broadcast(&a, &b, |x, y| match op {
                    BinOp::Add => x + y,
                    BinOp::Sub => x - y,
                    BinOp::Mul => x * y,
                    BinOp::Div => x / y,
                    BinOp::Pow => complex_pow(x, y),
                })
            }
            Expr::Call(func, arg) => {
                let a = arg.eval(vars)?;
                if *func == Func::Sum {
                    return Ok(vec![a.iter().sum()]);
                }
                Ok(a.into_iter()
                    .map(|v| match func {
                        Func::Sin => v.sin(),
                        Func::Cos => v.cos(),
                        Func::Tan => v.tan(),
                        Func::Exp => v.exp(),
                        Func::Log => v.ln(),
                        Func::Log10 => v.ln() / std::f64::consts::LN_10,
                        Func::Sqrt => v.sqrt(),
                        // Complex-step safe absolute value.
                        Func::Abs => {
                            if v.re < 0.0 {
                                -v
                            } else {
                                v
                            }
                        }
                        Func::Sum => v,
                    })
                    .collect())
            }
        }
    }
}

fn complex_pow(x: Complex64, y: Complex64) -> Complex64 {
    if y.im == 0.0 {
        if y.re.fract() == 0.0 && y.re.abs() < i32::MAX as f64 {
            return x.powi(y.re as i32);
        }
        return x.powf(y.re);
    }
    x.powc(y)
}

fn broadcast(
    a: &[Complex64],
    b: &[Complex64],
    f: impl Fn(Complex64, Complex64) -> Complex64,
) -> Result<Vec<Complex64>> {
    if a.len() == b.len() {
        Ok(a.iter().zip(b).map(|(&x, &y)| f(x, y)).collect())
    } else if a.len() == 1 {
        Ok(b.iter().map(|&y| f(a[0], y)).collect())
    } else if b.len() == 1 {
        Ok(a.iter().map(|&x| f(x, b[0])).collect())
    } else {
        Err(CouplerError::Expr(format!(
            "operands could not be broadcast together with sizes {} and {}",
            a.len(),
            b.len()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn real_vars(pairs: &[(&str, &[f64])]) -> HashMap<String, Vec<Complex64>> {
        pairs
            .iter()
            .map(|(n, v)| {
                (
                    n.to_string(),
                    v.iter().map(|&x| Complex64::new(x, 0.0)).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_parse_simple_assignment() {
        let stmt = parse_statement("y=2*x").unwrap();
        assert_eq!(stmt.target, "y");
        let mut names = BTreeSet::new();
        stmt.expr.collect_names(&mut names);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), vec!["x"]);
    }

    #[test]
    fn test_trailing_dot_number() {
        let stmt = parse_statement("y=x*2.").unwrap();
        let out = stmt.expr.eval(&real_vars(&[("x", &[1.5, 3.0])])).unwrap();
        assert_relative_eq!(out[0].re, 3.0);
        assert_relative_eq!(out[1].re, 6.0);
    }

    #[test]
    fn test_precedence_and_unary_minus() {
        let stmt = parse_statement("z = -x**2 + 3*y - 4/2").unwrap();
        let out = stmt
            .expr
            .eval(&real_vars(&[("x", &[3.0]), ("y", &[2.0])]))
            .unwrap();
        assert_relative_eq!(out[0].re, -9.0 + 6.0 - 2.0);
    }

    #[test]
    fn test_functions_and_constants() {
        let stmt = parse_statement("a = pi*sqrt(r) + sum(v)").unwrap();
        let out = stmt
            .expr
            .eval(&real_vars(&[("r", &[4.0]), ("v", &[1.0, 2.0, 3.0])]))
            .unwrap();
        assert_relative_eq!(out[0].re, std::f64::consts::PI * 2.0 + 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_broadcast_mismatch() {
        let stmt = parse_statement("y = a + b").unwrap();
        let err = stmt
            .expr
            .eval(&real_vars(&[("a", &[1.0, 2.0]), ("b", &[1.0, 2.0, 3.0])]))
            .unwrap_err();
        assert!(err.to_string().contains("could not be broadcast"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_statement("y=2*").is_err());
        assert!(parse_statement("2*x").is_err());
        assert!(parse_statement("y=foo(x)").is_err());
    }

    #[test]
    fn test_complex_step_derivative() {
        let stmt = parse_statement("y = x**3").unwrap();
        let h = 1e-40;
        let mut vars = HashMap::new();
        vars.insert("x".to_string(), vec![Complex64::new(2.0, h)]);
        let out = stmt.expr.eval(&vars).unwrap();
        assert_relative_eq!(out[0].im / h, 12.0, epsilon = 1e-9);
    }
}
