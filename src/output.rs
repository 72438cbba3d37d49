//! Results output formatting (CSV).

use crate::error::Result;
use std::io::Write;

/// Write variable values as CSV.
///
/// Scalars get one row. Arrays get one row per element, suffixed with
/// the flat index.
///
/// Format:
/// ```csv
/// Variable,Value
/// x,3.0
/// y[0],1.5
/// y[1],2.5
/// ```
pub fn write_values_csv<W: Write>(values: &[(String, Vec<f64>)], writer: &mut W) -> Result<()> {
    writeln!(writer, "Variable,Value")?;
    for (name, vals) in values {
        if vals.len() == 1 {
            writeln!(writer, "{},{}", name, vals[0])?;
        } else {
            for (i, v) in vals.iter().enumerate() {
                writeln!(writer, "{}[{}],{}", name, i, v)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_and_array_rows() {
        let values = vec![
            ("x".to_string(), vec![3.0]),
            ("y".to_string(), vec![1.5, 2.5]),
        ];
        let mut buf = Vec::new();
        write_values_csv(&values, &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(text, "Variable,Value\nx,3\ny[0],1.5\ny[1],2.5\n");
    }

    #[test]
    fn empty_has_header_only() {
        let mut buf = Vec::new();
        write_values_csv(&[], &mut buf).unwrap();
        assert_eq!(buf, b"Variable,Value\n");
    }
}
