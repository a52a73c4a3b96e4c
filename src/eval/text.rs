//! Token-wise fuzzy text matching.

use serde_json::Value;

/// Gather every string inside a value, separated by spaces.
pub(crate) fn searchable_text(value: &Value) -> String {
    let mut out = String::new();
    collect_strings(value, &mut out);
    out
}

fn collect_strings(value: &Value, out: &mut String) {
    match value {
        Value::String(s) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(s);
        }
        Value::Array(items) => items.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {}
    }
}

/// Levenshtein distance of at most one, comparing chars.
pub(crate) fn within_one_edit(a: &str, b: &str) -> bool {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (short, long) = if a.len() <= b.len() { (&a, &b) } else { (&b, &a) };
    if long.len() - short.len() > 1 {
        return false;
    }

    let prefix = short.iter().zip(long.iter()).take_while(|(x, y)| x == y).count();
    if prefix == short.len() {
        // Equal, or one trailing insertion.
        return true;
    }
    if short.len() == long.len() {
        short[prefix + 1..] == long[prefix + 1..]
    } else {
        short[prefix..] == long[prefix + 1..]
    }
}

/// Lowercased search terms, prepared once per condition.
#[derive(Clone, Debug, Default)]
pub(crate) struct TextTerms {
    loose: Vec<String>,
    exact: Vec<String>,
    reject: Vec<String>,
}

impl TextTerms {
    pub(crate) fn new(loose: &[String], exact: &[String], reject: &[String]) -> Self {
        let lower = |terms: &[String]| -> Vec<String> {
            terms.iter().map(|t| t.to_lowercase()).collect()
        };
        Self {
            loose: lower(loose),
            exact: lower(exact),
            reject: lower(reject),
        }
    }

    /// Every loose term fuzzy-matches a token, every exact term is a
    /// substring, and no reject term fuzzy-matches a token.
    pub(crate) fn matches(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        let tokens: Vec<&str> = text.split_whitespace().collect();
        let fuzzy = |term: &String| tokens.iter().any(|t| within_one_edit(term, t));

        self.loose.iter().all(fuzzy)
            && self.exact.iter().all(|term| text.contains(term.as_str()))
            && !self.reject.iter().any(fuzzy)
    }
}
