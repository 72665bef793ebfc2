//! Fuzzy patching of model-proposed edits into a live document.

pub mod matcher;
pub mod parse;

use thiserror::Error;

pub use matcher::{MatchSpan, find_best_match};
pub use parse::{ParsedChange, parse_changes};

#[derive(Debug, Error)]
pub enum PatchError {
    #[error("search pattern not found in document")]
    NoMatch,
}

/// Applies one parsed change to `content`, returning the new document.
/// The substituted span is the true matched region, so normalization
/// differences between pattern and content never leave fragments behind.
pub fn apply_change(content: &str, change: &ParsedChange) -> Result<String, PatchError> {
    let span = find_best_match(content, &change.search).ok_or(PatchError::NoMatch)?;

    let mut result = String::with_capacity(
        content.len() - span.length + change.replace.len(),
    );
    result.push_str(&content[..span.start]);
    result.push_str(&change.replace);
    result.push_str(&content[span.start + span.length..]);
    Ok(result)
}

/// Applies every change in sequence, each against the output of the last.
/// Fails on the first change whose pattern cannot be located.
pub fn apply_changes(content: &str, changes: &[ParsedChange]) -> Result<String, PatchError> {
    let mut document = content.to_string();
    for change in changes {
        document = apply_change(&document, change)?;
    }
    Ok(document)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_exact_change() {
        let change = ParsedChange {
            search: "let x = 1;".to_string(),
            replace: "let x = 2;".to_string(),
        };
        let out = apply_change("fn main() { let x = 1; }", &change).unwrap();
        assert_eq!(out, "fn main() { let x = 2; }");
    }

    #[test]
    fn test_apply_fuzzy_change_leaves_no_fragments() {
        let content = "fn  add( a,  b ) ->  i32  { a + b }";
        let change = ParsedChange {
            search: "fn add( a, b ) -> i32 { a + b }".to_string(),
            replace: "fn add(a: i32, b: i32) -> i32 { a + b }".to_string(),
        };
        let out = apply_change(content, &change).unwrap();
        assert_eq!(out, "fn add(a: i32, b: i32) -> i32 { a + b }");
    }

    #[test]
    fn test_apply_keeps_separator_before_match() {
        // The span must not absorb the whitespace in front of the matched
        // text, or substitution eats the separator.
        let change = ParsedChange {
            search: "file\n".to_string(),
            replace: "tape".to_string(),
        };
        let out = apply_change("end of file", &change).unwrap();
        assert_eq!(out, "end of tape");
    }

    #[test]
    fn test_apply_missing_pattern_errors() {
        let change = ParsedChange {
            search: "nothing here".to_string(),
            replace: "x".to_string(),
        };
        assert!(matches!(
            apply_change("document", &change),
            Err(PatchError::NoMatch)
        ));
    }

    #[test]
    fn test_apply_changes_sequentially() {
        let changes = vec![
            ParsedChange {
                search: "one".to_string(),
                replace: "two".to_string(),
            },
            ParsedChange {
                search: "two three".to_string(),
                replace: "four".to_string(),
            },
        ];
        let out = apply_changes("one three", &changes).unwrap();
        assert_eq!(out, "four");
    }

    #[test]
    fn test_parse_then_apply_round() {
        let response = "<change>\n<search>\ngreet(  \"world\"  );\n</search>\n<replace>\ngreet(\"there\");\n</replace>\n</change>";
        let changes = parse_changes(response);
        let out = apply_changes("greet( \"world\" );", &changes).unwrap();
        assert_eq!(out, "greet(\"there\");");
    }
}
