//! Source indices: which flat elements of a source output feed an input.

use std::ops::Range;

use crate::error::{CouplerError, Result};

/// Flat indices into a source array. Negative indices count from the end.
#[derive(Debug, Clone, PartialEq)]
pub enum SrcIndices {
    List(Vec<i64>),
    /// `start:stop:step` with Python-like open ends.
    Slice {
        start: Option<i64>,
        stop: Option<i64>,
        step: i64,
    },
}

impl SrcIndices {
    pub fn new(indices: Vec<i64>) -> Self {
        SrcIndices::List(indices)
    }

    pub fn slice(start: Option<i64>, stop: Option<i64>, step: i64) -> Self {
        SrcIndices::Slice { start, stop, step }
    }

    /// Resolve against a source of `size` elements.
    pub fn resolve(&self, size: usize) -> Result<Vec<usize>> {
        let n = size as i64;
        match self {
            SrcIndices::List(list) => list
                .iter()
                .map(|&i| {
                    let idx = if i < 0 { i + n } else { i };
                    if idx < 0 || idx >= n {
                        Err(CouplerError::Value(format!(
                            "index {} is out of bounds for source dimension of size {}.",
                            i, size
                        )))
                    } else {
                        Ok(idx as usize)
                    }
                })
                .collect(),
            SrcIndices::Slice { start, stop, step } => {
                if *step == 0 {
                    return Err(CouplerError::Value("slice step cannot be zero.".into()));
                }
                let clamp = |v: i64, lo: i64, hi: i64| v.max(lo).min(hi);
                let norm = |v: i64| if v < 0 { v + n } else { v };
                let mut out = Vec::new();
                if *step > 0 {
                    let s = clamp(start.map(norm).unwrap_or(0), 0, n);
                    let e = clamp(stop.map(norm).unwrap_or(n), 0, n);
                    let mut next = Some(s);
                    while let Some(i) = next.filter(|&i| i < e) {
                        out.push(i as usize);
                        next = i.checked_add(*step);
                    }
                } else {
                    let s = clamp(start.map(norm).unwrap_or(n - 1), -1, n - 1);
                    let e = clamp(stop.map(norm).unwrap_or(-1), -1, n - 1);
                    let mut next = Some(s);
                    while let Some(i) = next.filter(|&i| i > e) {
                        out.push(i as usize);
                        next = i.checked_add(*step);
                    }
                }
                Ok(out)
            }
        }
    }
}

impl From<Vec<i64>> for SrcIndices {
    fn from(v: Vec<i64>) -> Self {
        SrcIndices::List(v)
    }
}

impl From<Vec<usize>> for SrcIndices {
    fn from(v: Vec<usize>) -> Self {
        SrcIndices::List(v.into_iter().map(|i| i as i64).collect())
    }
}

impl<const N: usize> From<[i64; N]> for SrcIndices {
    fn from(v: [i64; N]) -> Self {
        SrcIndices::List(v.to_vec())
    }
}

impl From<Range<usize>> for SrcIndices {
    fn from(r: Range<usize>) -> Self {
        SrcIndices::List(r.map(|i| i as i64).collect())
    }
}

/// Compose stacked indices. `levels` runs from the input outwards (the
/// innermost promote first, the connect last); `source_size` is the size of
/// the output at the top of the stack.
pub fn compose(levels: &[SrcIndices], source_size: usize) -> Result<Option<Vec<usize>>> {
    if levels.is_empty() {
        return Ok(None);
    }
    // Resolve top-down: the outermost level selects from the source, each
    // inner level selects from the level above it.
    let mut current: Option<Vec<usize>> = None;
    for level in levels.iter().rev() {
        let size = current.as_ref().map(|c| c.len()).unwrap_or(source_size);
        let local = level.resolve(size)?;
        current = Some(match current {
            None => local,
            Some(outer) => local.into_iter().map(|i| outer[i]).collect(),
        });
    }
    Ok(current)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_index_counts_from_end() {
        assert_eq!(SrcIndices::new(vec![-1]).resolve(5).unwrap(), vec![4]);
    }

    #[test]
    fn out_of_bounds_index() {
        let err = SrcIndices::from(0..12).resolve(10).unwrap_err();
        assert_eq!(
            err.to_string(),
            "index 10 is out of bounds for source dimension of size 10."
        );
    }

    #[test]
    fn slices() {
        assert_eq!(
            SrcIndices::slice(Some(1), None, 2).resolve(6).unwrap(),
            vec![1, 3, 5]
        );
        assert_eq!(
            SrcIndices::slice(None, None, -1).resolve(3).unwrap(),
            vec![2, 1, 0]
        );
        assert_eq!(
            SrcIndices::slice(Some(-3), None, 1).resolve(5).unwrap(),
            vec![2, 3, 4]
        );
    }

    #[test]
    fn huge_slice_steps_stop_at_the_bounds() {
        assert_eq!(
            SrcIndices::slice(Some(1), None, i64::MAX).resolve(5).unwrap(),
            vec![1]
        );
        assert_eq!(
            SrcIndices::slice(Some(3), None, i64::MIN).resolve(5).unwrap(),
            vec![3]
        );
    }

    #[test]
    fn compose_levels() {
        // connect picks 7..10 out of 10; an inner promote picks the last two.
        let levels = vec![SrcIndices::new(vec![1, 2]), SrcIndices::from(7..10)];
        assert_eq!(compose(&levels, 10).unwrap(), Some(vec![8, 9]));
        assert_eq!(compose(&[], 10).unwrap(), None);
    }
}
