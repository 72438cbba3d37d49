//! Dotted-name helpers, promotes pattern matching and name suggestions.

/// Join a parent path and a child name. The model's path is empty.
pub fn join(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

/// Parent path of a dotted name; empty at the top level.
pub fn parent(path: &str) -> &str {
    path.rsplit_once('.').map(|(p, _)| p).unwrap_or("")
}

/// Longest common dotted prefix of a set of absolute names' parent systems.
pub fn common_ancestor<'a>(paths: impl IntoIterator<Item = &'a str>) -> String {
    let mut common: Option<Vec<&str>> = None;
    for path in paths {
        let parts: Vec<&str> = match parent(path) {
            "" => Vec::new(),
            p => p.split('.').collect(),
        };
        common = Some(match common {
            None => parts,
            Some(prev) => prev
                .iter()
                .zip(parts.iter())
                .take_while(|(a, b)| a == b)
                .map(|(a, _)| *a)
                .collect(),
        });
    }
    common.unwrap_or_default().join(".")
}

/// Valid subsystem and variable names: non-empty, no dots, no whitespace.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && !name.contains('.')
        && !name.chars().any(char::is_whitespace)
        && name
            .chars()
            .next()
            .map(|c| c.is_alphabetic() || c == '_')
            .unwrap_or(false)
}

/// Shell-style glob match supporting `*` and `?`.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;
    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

// ---------------------------------------------------------------------------
// Suggestions
// ---------------------------------------------------------------------------

const SUGGEST_CUTOFF: f64 = 0.25;
const MAX_SUGGESTIONS: usize = 10;

/// Number of characters in matching blocks, found by repeatedly taking the
/// longest common substring and recursing on both sides.
fn matching_chars(a: &[char], b: &[char]) -> usize {
    if a.is_empty() || b.is_empty() {
        return 0;
    }
    let (mut best_len, mut best_a, mut best_b) = (0, 0, 0);
    let mut prev = vec![0usize; b.len() + 1];
    for i in 0..a.len() {
        let mut cur = vec![0usize; b.len() + 1];
        for j in 0..b.len() {
            if a[i] == b[j] {
                cur[j + 1] = prev[j] + 1;
                if cur[j + 1] > best_len {
                    best_len = cur[j + 1];
                    best_a = i + 1 - best_len;
                    best_b = j + 1 - best_len;
                }
            }
        }
        prev = cur;
    }
    if best_len == 0 {
        return 0;
    }
    best_len
        + matching_chars(&a[..best_a], &b[..best_b])
        + matching_chars(&a[best_a + best_len..], &b[best_b + best_len..])
}

/// Similarity ratio in `[0, 1]`: `2 * matches / (len(a) + len(b))`.
pub fn similarity(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let total = a.len() + b.len();
    if total == 0 {
        return 1.0;
    }
    2.0 * matching_chars(&a, &b) as f64 / total as f64
}

/// Candidates close enough to `name` to be worth suggesting, sorted.
pub fn suggest<'a>(name: &str, candidates: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = candidates
        .into_iter()
        .filter(|c| similarity(name, c) >= SUGGEST_CUTOFF)
        .map(str::to_string)
        .collect();
    out.sort();
    out.dedup();
    out.truncate(MAX_SUGGESTIONS);
    out
}

/// Render names the way error messages quote lists: `['a', 'b']`.
pub fn quoted_list<S: AsRef<str>>(names: &[S]) -> String {
    let inner: Vec<String> = names.iter().map(|n| format!("'{}'", n.as_ref())).collect();
    format!("[{}]", inner.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_and_parent() {
        assert_eq!(join("", "g"), "g");
        assert_eq!(join("g", "c"), "g.c");
        assert_eq!(parent("g.c.x"), "g.c");
        assert_eq!(parent("x"), "");
    }

    #[test]
    fn common_ancestor_of_vars() {
        assert_eq!(common_ancestor(["C1.x", "C2.x", "C3.x"]), "");
        assert_eq!(common_ancestor(["G.a.x", "G.b.x"]), "G");
    }

    #[test]
    fn globbing() {
        assert!(glob_match("*", "x"));
        assert!(glob_match("x*", "x_in"));
        assert!(glob_match("?.y", "a.y"));
        assert!(!glob_match("x?", "x"));
        assert!(glob_match("*_out", "a_b_out"));
    }

    #[test]
    fn suggestions_match_close_names() {
        assert_eq!(suggest("x", ["g.c.x", "g.c.y"]), vec!["g.c.x"]);
        assert_eq!(suggest("g.c.x", ["c.x", "c.y"]), vec!["c.x", "c.y"]);
        assert_eq!(suggest("g.c2.x", ["x", "y", "z"]), vec!["x"]);
        assert_eq!(suggest("y", ["c.y", "c.x"]), vec!["c.y"]);
    }

    #[test]
    fn quoting() {
        assert_eq!(quoted_list(&["a", "b"]), "['a', 'b']");
    }
}
