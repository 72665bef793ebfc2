//! Parsing of model-proposed edits out of free-form response text.
//!
//! Edits arrive embedded in a response as tagged search/replace blocks:
//!
//! ```text
//! <change>
//! <search>
//! old code
//! </search>
//! <replace>
//! new code
//! </replace>
//! </change>
//! ```
//!
//! Parsing is strict at the boundary: blocks with missing or misordered
//! tags are skipped rather than guessed at.

/// One proposed edit: locate `search` fuzzily, substitute `replace`.
/// Produced by parsing, consumed once by the substitution engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChange {
    pub search: String,
    pub replace: String,
}

const CHANGE_OPEN: &str = "<change>";
const CHANGE_CLOSE: &str = "</change>";
const SEARCH_OPEN: &str = "<search>";
const SEARCH_CLOSE: &str = "</search>";
const REPLACE_OPEN: &str = "<replace>";
const REPLACE_CLOSE: &str = "</replace>";

/// Extracts every well-formed change block from `response`, in order.
/// Malformed blocks are dropped silently.
pub fn parse_changes(response: &str) -> Vec<ParsedChange> {
    let mut changes = Vec::new();
    let mut rest = response;

    while let Some(open) = rest.find(CHANGE_OPEN) {
        let after_open = &rest[open + CHANGE_OPEN.len()..];
        let Some(close) = after_open.find(CHANGE_CLOSE) else {
            break;
        };
        let block = &after_open[..close];

        if let Some(change) = parse_block(block) {
            changes.push(change);
        }
        rest = &after_open[close + CHANGE_CLOSE.len()..];
    }

    changes
}

fn parse_block(block: &str) -> Option<ParsedChange> {
    let search = tagged_section(block, SEARCH_OPEN, SEARCH_CLOSE)?;
    let remainder = &block[block.find(SEARCH_CLOSE)? + SEARCH_CLOSE.len()..];
    let replace = tagged_section(remainder, REPLACE_OPEN, REPLACE_CLOSE)?;
    Some(ParsedChange { search, replace })
}

fn tagged_section(text: &str, open: &str, close: &str) -> Option<String> {
    let start = text.find(open)? + open.len();
    let end = start + text[start..].find(close)?;
    Some(trim_block(&text[start..end]))
}

/// Strips the single newline that follows the opening tag and precedes the
/// closing tag, keeping all interior whitespace intact.
fn trim_block(raw: &str) -> String {
    let raw = raw.strip_prefix("\r\n").or_else(|| raw.strip_prefix('\n')).unwrap_or(raw);
    let raw = raw.strip_suffix('\n').unwrap_or(raw);
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    raw.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_single_change() {
        let response = "Here is the fix:\n<change>\n<search>\nlet x = 1;\n</search>\n<replace>\nlet x = 2;\n</replace>\n</change>\nDone.";
        let changes = parse_changes(response);
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].search, "let x = 1;");
        assert_eq!(changes[0].replace, "let x = 2;");
    }

    #[test]
    fn test_parses_multiple_changes_in_order() {
        let response = "<change>\n<search>\na\n</search>\n<replace>\nb\n</replace>\n</change>\n<change>\n<search>\nc\n</search>\n<replace>\nd\n</replace>\n</change>";
        let changes = parse_changes(response);
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].search, "a");
        assert_eq!(changes[1].search, "c");
    }

    #[test]
    fn test_skips_block_missing_replace() {
        let response = "<change>\n<search>\nonly search\n</search>\n</change>";
        assert!(parse_changes(response).is_empty());
    }

    #[test]
    fn test_skips_misordered_tags() {
        let response = "<change>\n<replace>\nb\n</replace>\n<search>\na\n</search>\n</change>";
        assert!(parse_changes(response).is_empty());
    }

    #[test]
    fn test_interior_whitespace_preserved() {
        let response = "<change>\n<search>\n    indented\n\n</search>\n<replace>\n\tother\n</replace>\n</change>";
        let changes = parse_changes(response);
        assert_eq!(changes[0].search, "    indented\n");
        assert_eq!(changes[0].replace, "\tother");
    }

    #[test]
    fn test_unterminated_change_is_dropped() {
        let response = "<change>\n<search>\na\n</search>\n<replace>\nb\n</replace>";
        assert!(parse_changes(response).is_empty());
    }
}
