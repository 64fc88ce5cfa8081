//
// declaration/chain.rs
//
// Call-site detection and method-chain extraction
//
// A chain is written `root:>link:>...:>term`. Extraction walks backward from
// the reference, so links come out last-first; callers reverse them.
//

use super::line_kind::{code_area, is_comment_or_blank};
use super::types::{ChainLink, SourceBuffer};

/// Token separating the links of a method-invocation chain
pub const INVOCATION_TOKEN: &str = ":>";

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn is_chain_char(c: char) -> bool {
    is_name_char(c) || c == ':' || c == '>'
}

/// Start of the identifier run ending at `column`
fn identifier_start(chars: &[char], column: usize) -> usize {
    let mut pos = column.min(chars.len());
    while pos > 0 && is_name_char(chars[pos - 1]) {
        pos -= 1;
    }
    pos
}

/// Whether the identifier ending at `column` is invoked through `:>`.
pub fn is_method_call(line: &str, column: usize) -> bool {
    let chars: Vec<char> = code_area(line).chars().collect();
    let mut pos = identifier_start(&chars, column);
    while pos > 0 && chars[pos - 1] == ' ' {
        pos -= 1;
    }
    pos >= 2 && chars[pos - 2] == ':' && chars[pos - 1] == '>'
}

/// Remove balanced `( ... )` groups. Unmatched parens are kept so they still
/// delimit the chain.
fn strip_argument_lists(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut opens: Vec<usize> = Vec::new();
    for c in text.chars() {
        match c {
            '(' => {
                opens.push(out.len());
                out.push(c);
            }
            ')' => match opens.pop() {
                Some(at) => out.truncate(at),
                None => out.push(c),
            },
            _ => out.push(c),
        }
    }
    out
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find("*>") {
        Some(at) => &line[..at],
        None => line,
    }
}

/// Links found on one physical line
struct Segment {
    /// Last-first
    links: Vec<ChainLink>,
    /// Nothing but blanks precedes the chain text on this line
    at_line_start: bool,
    /// The chain text opens with the invocation token
    opens_with_token: bool,
}

fn extract_segment(fragment: &str) -> Segment {
    let stripped = strip_argument_lists(fragment);
    let chars: Vec<char> = stripped.trim_end().chars().collect();
    let mut start = chars.len();
    while start > 0 && is_chain_char(chars[start - 1]) {
        start -= 1;
    }
    let run: String = chars[start..].iter().collect();
    let at_line_start = chars[..start].iter().all(|c| c.is_whitespace());

    let mut parts: Vec<&str> = run.split(INVOCATION_TOKEN).collect();
    // The reference sits right after a token, leaving an empty tail
    if parts.last() == Some(&"") {
        parts.pop();
    }
    let links = parts
        .into_iter()
        .rev()
        .filter(|part| !part.is_empty())
        .map(ChainLink::new)
        .collect();

    Segment {
        links,
        at_line_start,
        opens_with_token: run.starts_with(INVOCATION_TOKEN),
    }
}

fn previous_code_line(buffer: &SourceBuffer, from: usize) -> Option<usize> {
    (0..from)
        .rev()
        .find(|&i| buffer.line(i).is_some_and(|text| !is_comment_or_blank(text)))
}

/// Collect the chain links preceding the reference at `line`/`column`.
///
/// Returns links last-first. A chain that starts a line continues on the
/// previous code line when either side of the break carries the token.
/// At most `max_lines` physical lines are visited.
pub fn resolve_full_chain(
    buffer: &SourceBuffer,
    line: usize,
    column: usize,
    max_lines: usize,
) -> Vec<ChainLink> {
    let mut links = Vec::new();
    let Some(text) = buffer.line(line) else {
        return links;
    };
    // Sequence numbers would otherwise hide a chain starting its line
    let chars: Vec<char> = code_area(text).chars().collect();
    let end = identifier_start(&chars, column);
    let mut fragment: String = chars[..end].iter().collect();
    let mut line_index = line;

    for _ in 0..max_lines.max(1) {
        let segment = extract_segment(&fragment);
        links.extend(segment.links);
        if !segment.at_line_start {
            break;
        }
        let Some(prev) = previous_code_line(buffer, line_index) else {
            break;
        };
        let prev_code = code_area(buffer.line(prev).unwrap_or_default());
        let prev_text = strip_inline_comment(&prev_code).trim_end();
        if !segment.opens_with_token && !prev_text.ends_with(INVOCATION_TOKEN) {
            break;
        }
        log::trace!("Chain continues on line {} from line {}", prev, line_index);
        line_index = prev;
        fragment = prev_text.to_string();
    }

    links
}
