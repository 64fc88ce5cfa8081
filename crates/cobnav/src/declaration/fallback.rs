//
// declaration/fallback.rs
//
// Declaration lookup through the macro-expanded program
//
// Names introduced by copybooks or REPLACING only exist in the expanded
// text. Every expanded line that stems from real source ends in a trailer
//
//     *> <opts> <line> [<file> (<n>)]
//
// which maps the hit back to the original file and 1-based line.
//

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;

use super::config::ResolverConfig;
use super::content_provider::FileAccessor;
use super::expansion::{ExpansionCache, MacroExpander};
use super::line_kind::{is_comment_or_blank, is_declaration, statement_column};
use super::path_resolve::{resolve_source_file, same_file, PathContext};
use super::types::{Position, Query, Resolution, ResolveError, SourceBuffer};

/// Origin annotation trailing an expanded line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Trailer<'a> {
    /// Byte offset of the `*>` that opens the trailer
    pub start: usize,
    pub options: &'a str,
    /// 1-based line in the original file
    pub line: usize,
    /// Original file when it differs from the file in scope
    pub file: Option<&'a str>,
}

fn trailer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\*>\s+(\S+)\s+(\d+)(?:\s+(\S+)\s+\((\d+)\))?\s*$").unwrap()
    })
}

fn header_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?i)^\s*\*>>\s*source\s*:?\s*(\S+)").unwrap())
}

/// Parse the origin trailer of an expanded line.
pub fn parse_trailer(line: &str) -> Option<Trailer<'_>> {
    let caps = trailer_pattern().captures(line)?;
    let whole = caps.get(0)?;
    let line_number = match caps[2].parse::<usize>() {
        Ok(n) => n,
        Err(e) => {
            log::warn!("Malformed expansion trailer '{}': {}", whole.as_str(), e);
            return None;
        }
    };
    Some(Trailer {
        start: whole.start(),
        options: caps.get(1)?.as_str(),
        line: line_number,
        file: caps.get(3).map(|m| m.as_str()),
    })
}

/// Primary source named by a `*>> SOURCE <path>` header line
pub fn source_header(line: &str) -> Option<&str> {
    header_pattern()
        .captures(line)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

/// Pattern matching the code of `reference` with any run of blanks between
/// its tokens. `None` for lines that carry no code.
fn reference_pattern(reference: &str) -> Option<Regex> {
    if is_comment_or_blank(reference) {
        return None;
    }
    let code = reference.split("*>").next().unwrap_or_default();
    let tokens: Vec<String> = code.split_whitespace().map(regex::escape).collect();
    if tokens.is_empty() {
        return None;
    }
    Regex::new(&tokens.join(r"\s+")).ok()
}

/// Whether an expansion still contains the line the query was issued from.
pub fn expansion_matches_reference(expanded: &str, reference: &str) -> bool {
    match reference_pattern(reference) {
        Some(pattern) => pattern.is_match(expanded),
        None => true,
    }
}

/// A declaration hit in the expanded text, before its file is resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpandedHit {
    /// 0-based line in the original file
    pub line: usize,
    pub column: usize,
    /// File name as written by the expander
    pub file: String,
}

/// Declarations of `term` in `expanded`, from the last line upward.
///
/// `default_file` names the primary source when no `*>> SOURCE` header is
/// in effect at a hit.
pub fn expansion_hits<'e>(
    expanded: &'e str,
    term: &'e str,
    default_file: &'e str,
) -> impl Iterator<Item = ExpandedHit> + 'e {
    let lines: Vec<&'e str> = expanded.lines().collect();
    (0..lines.len()).rev().filter_map(move |index| {
        let line = lines[index];
        // Lines without a trailer were generated by the expander
        let trailer = parse_trailer(line)?;
        let code = &line[..trailer.start];
        if !is_declaration(term, code) {
            return None;
        }
        if trailer.line == 0 {
            log::warn!("Expansion trailer with line 0 at expanded line {}", index);
            return None;
        }
        let file = match trailer.file {
            Some(file) => file.to_string(),
            None => lines[..index]
                .iter()
                .rev()
                .find_map(|l| source_header(l))
                .unwrap_or(default_file)
                .to_string(),
        };
        Some(ExpandedHit {
            line: trailer.line - 1,
            column: statement_column(code),
            file,
        })
    })
}

/// Last declaration of `term` in `expanded`
pub fn find_in_expansion(expanded: &str, term: &str, default_file: &str) -> Option<ExpandedHit> {
    expansion_hits(expanded, term, default_file).next()
}

/// Whether a bare file name from a trailer is the origin's. Expanders
/// often change the case of names.
fn names_origin(named: &Path, origin: &Path) -> bool {
    match (named.file_name(), origin.file_name()) {
        (Some(named), Some(origin)) => named
            .to_string_lossy()
            .eq_ignore_ascii_case(&origin.to_string_lossy()),
        _ => false,
    }
}

/// Resolves terms the local buffer does not declare by searching the
/// macro-expanded program.
pub struct FallbackResolver<'a> {
    config: &'a ResolverConfig,
    accessor: &'a dyn FileAccessor,
    expander: Option<&'a dyn MacroExpander>,
    expansions: &'a ExpansionCache,
}

impl<'a> FallbackResolver<'a> {
    pub fn new(
        config: &'a ResolverConfig,
        accessor: &'a dyn FileAccessor,
        expander: Option<&'a dyn MacroExpander>,
        expansions: &'a ExpansionCache,
    ) -> Self {
        Self {
            config,
            accessor,
            expander,
            expansions,
        }
    }

    /// Look `query.term` up in the expansion of the origin file.
    ///
    /// A miss against a cached expansion regenerates it once and retries.
    pub async fn resolve(&self, query: &Query, origin: &SourceBuffer) -> Resolution {
        let Some(expander) = self.expander else {
            log::trace!("No macro expander configured, skipping fallback for '{}'", query.term);
            return Err(ResolveError::ExpansionUnavailable);
        };

        let mut expansion = self
            .expansions
            .get_or_expand(&query.origin, expander, false)
            .await?;
        loop {
            if let Some(position) = self.search(&expansion.text, query, origin).await {
                return Ok(position);
            }
            if expansion.fresh {
                log::trace!("'{}' not found in expansion of '{}'", query.term, query.origin.display());
                return Err(ResolveError::NotFound);
            }
            log::trace!(
                "'{}' not found in cached expansion of '{}', regenerating",
                query.term,
                query.origin.display()
            );
            expansion = self
                .expansions
                .get_or_expand(&query.origin, expander, true)
                .await?;
        }
    }

    async fn search(&self, expanded: &str, query: &Query, origin: &SourceBuffer) -> Option<Position> {
        let reference = origin.line(query.line).unwrap_or_default();
        if !expansion_matches_reference(expanded, reference) {
            log::trace!(
                "Expansion of '{}' does not contain line {}, treating it as stale",
                query.origin.display(),
                query.line
            );
            return None;
        }

        let origin_name = query
            .origin
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        // A hit whose file cannot be located gives way to the next one up
        for hit in expansion_hits(expanded, &query.term, &origin_name) {
            let Some(path) = self.resolve_hit_file(&hit.file, &query.origin).await else {
                continue;
            };
            log::trace!(
                "Found '{}' through expansion at {}:{} in '{}'",
                query.term,
                hit.line,
                hit.column,
                path.display()
            );
            return if same_file(&path, &query.origin) {
                Some(Position::local(hit.line, hit.column))
            } else {
                Some(Position::in_file(hit.line, hit.column, path))
            };
        }
        None
    }

    async fn resolve_hit_file(&self, name: &str, origin: &Path) -> Option<PathBuf> {
        let named = Path::new(name);
        // The origin may be an unsaved buffer, so it is not probed on disk
        if named.components().count() == 1 && names_origin(named, origin) {
            return Some(origin.to_path_buf());
        }
        let context = PathContext::new(origin, self.config.fallback_root.as_deref());
        let resolved = resolve_source_file(name, &context, self.accessor).await;
        if resolved.is_none() {
            log::warn!("Expansion names '{}', which could not be located", name);
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_trailer() {
        let trailer = parse_trailer("       01 ws-a pic x.                       *> 0 12").unwrap();
        assert_eq!(trailer.options, "0");
        assert_eq!(trailer.line, 12);
        assert_eq!(trailer.file, None);

        let trailer = parse_trailer("           05 cust-name pic x(30). *> 1 4 CUSTREC.CPY (1)").unwrap();
        assert_eq!(trailer.line, 4);
        assert_eq!(trailer.file, Some("CUSTREC.CPY"));
    }

    #[test]
    fn test_lines_without_trailer() {
        assert!(parse_trailer("       01 ws-a pic x.").is_none());
        assert!(parse_trailer("       01 ws-a pic x. *> plain comment").is_none());
        assert!(parse_trailer("").is_none());
    }

    #[test]
    fn test_source_header() {
        assert_eq!(source_header("*>> SOURCE /src/MAIN.cbl"), Some("/src/MAIN.cbl"));
        assert_eq!(source_header("  *>> source: lib/A.cbl"), Some("lib/A.cbl"));
        assert_eq!(source_header("*> 0 1"), None);
    }

    #[test]
    fn test_reference_check_tolerates_reflowed_blanks() {
        let expanded = "           move   1 to cust-name      *> 0 9\n";
        assert!(expansion_matches_reference(expanded, "           move 1 to cust-name"));
        assert!(expansion_matches_reference(expanded, "           move 1 to cust-name *> set"));
        assert!(!expansion_matches_reference(expanded, "           move 2 to cust-name"));
    }

    #[test]
    fn test_reference_check_escapes_pattern_characters() {
        let expanded = "           move ws-a(1) to ws-b    *> 0 3\n";
        assert!(expansion_matches_reference(expanded, "           move ws-a(1) to ws-b"));
        assert!(!expansion_matches_reference(expanded, "           move ws-a(2) to ws-b"));
    }

    #[test]
    fn test_blank_reference_skips_check() {
        assert!(expansion_matches_reference("anything", "   "));
        assert!(expansion_matches_reference("anything", "      * note"));
    }

    #[test]
    fn test_find_in_expansion_maps_copybook_line() {
        let expanded = [
            "*>> SOURCE MAIN.cbl",
            "       working-storage section.         *> 0 3",
            "       01 cust-rec.                     *> 1 1 CUSTREC.CPY (1)",
            "           05 cust-name pic x(30).      *> 1 2 CUSTREC.CPY (1)",
            "       procedure division.              *> 0 6",
            "           move 1 to cust-name          *> 0 7",
        ]
        .join("\n");
        let hit = find_in_expansion(&expanded, "CUST-NAME", "ORIGIN.cbl").unwrap();
        assert_eq!(
            hit,
            ExpandedHit {
                line: 1,
                column: 11,
                file: "CUSTREC.CPY".into()
            }
        );
    }

    #[test]
    fn test_find_in_expansion_uses_header_scope() {
        let expanded = [
            "*>> SOURCE PROG.cbl",
            "       01 counter pic 9.               *> 0 5",
        ]
        .join("\n");
        let hit = find_in_expansion(&expanded, "counter", "ORIGIN.cbl").unwrap();
        assert_eq!(hit.file, "PROG.cbl");
        assert_eq!(hit.line, 4);

        let without_header = "       01 counter pic 9.               *> 0 5";
        let hit = find_in_expansion(without_header, "counter", "ORIGIN.cbl").unwrap();
        assert_eq!(hit.file, "ORIGIN.cbl");
    }

    #[test]
    fn test_find_in_expansion_skips_generated_lines() {
        let expanded = [
            "       01 counter pic 9.               *> 0 2",
            "       01 counter pic 9.",
        ]
        .join("\n");
        let hit = find_in_expansion(&expanded, "counter", "MAIN.cbl").unwrap();
        assert_eq!(hit.line, 1);
    }

    #[test]
    fn test_find_in_expansion_prefers_last_declaration() {
        let expanded = [
            "       01 grp-a.                       *> 0 1",
            "           05 item pic x.              *> 0 2",
            "       01 grp-b.                       *> 0 3",
            "           05 item pic 9.              *> 0 4",
        ]
        .join("\n");
        assert_eq!(find_in_expansion(&expanded, "item", "MAIN.cbl").unwrap().line, 3);
        assert!(find_in_expansion(&expanded, "missing", "MAIN.cbl").is_none());
    }

    #[test]
    fn test_expansion_hits_run_bottom_up() {
        let expanded = [
            "       01 item pic x.                  *> 1 1 A.CPY (1)",
            "       01 item pic 9.                  *> 0 2",
            "       01 item pic z.                  *> 1 1 B.CPY (1)",
        ]
        .join("\n");
        let files: Vec<String> = expansion_hits(&expanded, "item", "MAIN.cbl")
            .map(|hit| hit.file)
            .collect();
        assert_eq!(files, vec!["B.CPY", "MAIN.cbl", "A.CPY"]);
    }

    #[test]
    fn test_origin_name_ignores_case() {
        assert!(names_origin(Path::new("MAIN.CBL"), Path::new("/ws/main.cbl")));
        assert!(!names_origin(Path::new("OTHER.CBL"), Path::new("/ws/main.cbl")));
    }
}
