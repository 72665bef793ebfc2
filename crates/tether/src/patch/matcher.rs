//! Whitespace-tolerant pattern location inside a live document.

/// Span of document content consumed by a successful match.
///
/// `length` is the true number of content bytes matched, which can differ
/// from the pattern's length once whitespace normalization is applied.
/// Replacing `content[start..start + length]` removes exactly the matched
/// region with no leftover fragments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpan {
    pub start: usize,
    pub length: usize,
}

/// Locates `pattern` inside `content`.
///
/// Tries an exact substring search first. When that fails, retries with a
/// structural match at every offset: runs of spaces and tabs on both sides
/// are interchangeable, extra inline whitespace in the content is skipped
/// when the pattern has none, newline sequences match newline sequences
/// with `\n`, `\r\n` and `\r` treated as equivalent, and whitespace left
/// over in the pattern after the content ends is tolerated. A pattern with
/// inline whitespace the content entirely lacks at that position does not
/// match there.
pub fn find_best_match(content: &str, pattern: &str) -> Option<MatchSpan> {
    if let Some(start) = content.find(pattern) {
        return Some(MatchSpan {
            start,
            length: pattern.len(),
        });
    }

    let content_bytes = content.as_bytes();
    let pattern_bytes = pattern.as_bytes();
    for start in 0..=content_bytes.len() {
        if let Some(length) = match_at(content_bytes, pattern_bytes, start) {
            return Some(MatchSpan { start, length });
        }
    }
    None
}

fn is_inline_ws(b: u8) -> bool {
    b == b' ' || b == b'\t'
}

fn is_newline(b: u8) -> bool {
    b == b'\n' || b == b'\r'
}

/// Advances past one newline sequence, treating `\r\n` as a single unit.
fn consume_newline(bytes: &[u8], i: usize) -> usize {
    if bytes[i] == b'\r' && bytes.get(i + 1) == Some(&b'\n') {
        i + 2
    } else {
        i + 1
    }
}

fn skip_inline_ws(bytes: &[u8], mut i: usize) -> usize {
    while i < bytes.len() && is_inline_ws(bytes[i]) {
        i += 1;
    }
    i
}

/// Lockstep structural walk starting at `start`. Returns the number of
/// content bytes consumed when the whole pattern is satisfied.
fn match_at(content: &[u8], pattern: &[u8], start: usize) -> Option<usize> {
    let mut ci = start;
    let mut pi = 0;

    while pi < pattern.len() {
        if ci >= content.len() {
            // Content exhausted: leftover pattern whitespace is tolerated.
            return pattern[pi..]
                .iter()
                .all(|b| b.is_ascii_whitespace())
                .then_some(ci - start);
        }

        let pc = pattern[pi];
        let cc = content[ci];

        if is_newline(pc) {
            if is_newline(cc) {
                ci = consume_newline(content, ci);
                pi = consume_newline(pattern, pi);
            } else if is_inline_ws(cc) {
                // Trailing spaces in the content before its line break.
                ci = skip_inline_ws(content, ci);
            } else {
                return None;
            }
        } else if is_inline_ws(pc) {
            if is_inline_ws(cc) {
                ci = skip_inline_ws(content, ci);
                pi = skip_inline_ws(pattern, pi);
            } else {
                // Pattern demands whitespace the content lacks.
                return None;
            }
        } else if is_inline_ws(cc) {
            if pi == 0 {
                // No pattern byte consumed yet: a match beginning after
                // this whitespace belongs to a later offset, and counting
                // the run into this span would delete it on substitution.
                return None;
            }
            // Extra content whitespace with no pattern counterpart.
            ci = skip_inline_ws(content, ci);
        } else if cc == pc {
            ci += 1;
            pi += 1;
        } else {
            return None;
        }
    }

    Some(ci - start)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_match_fast_path() {
        let content = "let x = 1;\nlet y = 2;\n";
        let m = find_best_match(content, "let y = 2;").unwrap();
        assert_eq!(m.start, 11);
        assert_eq!(m.length, 10);
    }

    #[test]
    fn test_no_match_returns_none() {
        assert!(find_best_match("fn main() {}", "struct Foo").is_none());
    }

    #[test]
    fn test_collapsed_whitespace_matches() {
        let content = "function  test()   {\n\treturn   42;\n}";
        let pattern = "function test() {\n return 42;\n}";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(m.length, content.len());
    }

    #[test]
    fn test_match_length_covers_spaced_out_content() {
        // The matched span must be the true consumed content length, never
        // the pattern length: substituting content[start..start+length]
        // must leave no fragment of the original text behind.
        let content = "function         test(         x,         y         )         {         return         x         +         y;         }";
        let pattern = "function test( x, y ) { return x + y; }";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(m.length, content.len());

        let mut replaced = String::new();
        replaced.push_str(&content[..m.start]);
        replaced.push_str("REPLACED");
        replaced.push_str(&content[m.start + m.length..]);
        assert_eq!(replaced, "REPLACED");
    }

    #[test]
    fn test_crlf_matches_lf() {
        let content = "alpha\r\nbeta\r\ngamma";
        let pattern = "alpha\nbeta\n";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(m.length, "alpha\r\nbeta\r\n".len());
    }

    #[test]
    fn test_trailing_pattern_whitespace_tolerated() {
        let content = "end of file";
        let pattern = "file\n  ";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 7);
        assert_eq!(m.length, 4);
    }

    #[test]
    fn test_span_never_starts_on_skipped_whitespace() {
        // A structural match must begin at the first matched byte, not at
        // preceding content whitespace it would otherwise skip over.
        let content = "end of file";
        let m = find_best_match(content, "file\n").unwrap();
        assert_eq!(m.start, 7);
        assert_eq!(&content[m.start..m.start + m.length], "file");
    }

    #[test]
    fn test_pattern_whitespace_missing_in_content_is_no_match() {
        // Known limitation: extra inline whitespace demanded by the
        // pattern where the content has none means no match, not a
        // false positive.
        assert!(find_best_match("foobar", "foo bar").is_none());
    }

    #[test]
    fn test_trailing_content_spaces_before_newline() {
        let content = "line one   \nline two";
        let pattern = "line one\nline two";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(m.length, content.len());
    }

    #[test]
    fn test_match_at_later_offset() {
        let content = "prefix\nfn  go( )  {}\nsuffix";
        let pattern = "fn go( ) {}";
        let m = find_best_match(content, pattern).unwrap();
        assert_eq!(m.start, 7);
        assert_eq!(&content[m.start..m.start + m.length], "fn  go( )  {}");
    }

    #[test]
    fn test_newline_does_not_satisfy_inline_whitespace() {
        assert!(find_best_match("foo\nbar", "foo bar").is_none());
    }

    #[test]
    fn test_empty_pattern_matches_at_start() {
        let m = find_best_match("anything", "").unwrap();
        assert_eq!(m.start, 0);
        assert_eq!(m.length, 0);
    }
}
