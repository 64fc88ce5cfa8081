//
// declaration/backward_scan.rs
//
// Nearest-preceding declaration lookup within one buffer
//

use super::line_kind::{is_declaration, statement_column};
use super::types::{Position, Resolution, ResolveError, SourceBuffer};

/// Scan from `from_line` (inclusive, clamped to the buffer) toward the top
/// and return the first line declaring `term`.
pub fn scan_backward(buffer: &SourceBuffer, term: &str, from_line: usize) -> Option<Position> {
    let start = from_line.min(buffer.last_line_index()?);
    (0..=start).rev().find_map(|index| {
        let line = buffer.line(index)?;
        is_declaration(term, line).then(|| Position::local(index, statement_column(line)))
    })
}

/// Scan a whole buffer from its last line
pub fn scan_from_end(buffer: &SourceBuffer, term: &str) -> Option<Position> {
    scan_backward(buffer, term, usize::MAX)
}

/// Resolve `term` referenced at `line` of the originating buffer
pub fn resolve_local(buffer: &SourceBuffer, term: &str, line: usize) -> Resolution {
    match scan_backward(buffer, term, line) {
        Some(position) => {
            log::trace!(
                "Found local declaration of '{}' at {}:{}",
                term,
                position.line,
                position.column
            );
            Ok(position)
        }
        None => Err(ResolveError::DeclarationNotFoundLocally),
    }
}
