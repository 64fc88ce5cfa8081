//
// declaration/line_kind.rs
//
// Line classification for COBOL declaration detection
//

use regex::{Captures, Regex};
use std::sync::OnceLock;

use crate::reserved_words::is_reserved_word;

/// What a single source line declares, if anything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineKind {
    /// Area-A label: `       name.` or `       name section.`
    Paragraph(String),
    /// Level-numbered data item or `$SET CONSTANT` definition
    Variable(String),
    /// `SELECT name ASSIGN ...`
    Select(String),
    /// Repository entry binding an alias to a class package
    ClassAlias { alias: String, package: String },
    /// `METHOD-ID. name`
    MethodId(String),
    EndMethod,
    Comment,
    Other,
}

impl LineKind {
    /// Name introduced by a line the declaration classifier accepts
    pub fn declared_name(&self) -> Option<&str> {
        match self {
            LineKind::Paragraph(name) | LineKind::Variable(name) | LineKind::Select(name) => {
                Some(name)
            }
            LineKind::ClassAlias { alias, .. } => Some(alias),
            _ => None,
        }
    }
}

/// Compiled regex patterns for line classification
struct LinePatterns {
    paragraph: Regex,
    variable: Regex,
    select: Regex,
    class_as: Regex,
    is_class: Regex,
    method_id: Regex,
    end_method: Regex,
    object_reference: Regex,
    returning: Regex,
    procedure_division: Regex,
}

// Declared names may carry `(tag)` segments used by COPY ... REPLACING templates.
const NAME: &str = r"[A-Za-z0-9_\-()]+";

fn patterns() -> &'static LinePatterns {
    static PATTERNS: OnceLock<LinePatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        // Package groups: 2=double-quoted, 3=single-quoted, 4=unquoted
        let package = r#"(?:"([^"]+)"|'([^']+)'|([A-Za-z0-9_\-$./\\]+))"#;
        LinePatterns {
            paragraph: Regex::new(&format!(
                r"(?i)^ {{7}}({NAME})(?:\s+section)?\.\s*(?:\*>.*)?$"
            ))
            .unwrap(),
            variable: Regex::new(&format!(
                r"(?i)^\s*(?:\d{{2}}\s+|\$set\s+constant\s+)({NAME})(?:\s|\.|$)"
            ))
            .unwrap(),
            select: Regex::new(&format!(
                r"(?i)^\s*select\s+(?:optional\s+)?({NAME})(?:\s+assign\b|\s*$)"
            ))
            .unwrap(),
            class_as: Regex::new(&format!(
                r"(?i)^\s*class\s+([A-Za-z0-9_\-]+)\s+as\s+{package}"
            ))
            .unwrap(),
            is_class: Regex::new(&format!(
                r"(?i)^\s*([A-Za-z0-9_\-]+)\s+is\s+class\s+{package}"
            ))
            .unwrap(),
            method_id: Regex::new(
                r#"(?i)^\s*method-id\.\s*(?:"([^"]+)"|'([^']+)'|([A-Za-z0-9_\-]+))"#,
            )
            .unwrap(),
            end_method: Regex::new(r"(?i)^\s*end\s+method\b").unwrap(),
            object_reference: Regex::new(
                r#"(?i)(?:^|\s)(?:object\s+reference\s+(?:class\s+)?|type\s+)["']?([A-Za-z0-9_\-]+)"#,
            )
            .unwrap(),
            returning: Regex::new(r"(?i)(?:^|\s)returning\s+([A-Za-z0-9_\-]+)").unwrap(),
            procedure_division: Regex::new(r"(?i)^\s*procedure\s+division\b").unwrap(),
        }
    })
}

/// First non-empty capture among consecutive alternative groups
fn first_capture(caps: &Captures, groups: std::ops::RangeInclusive<usize>) -> Option<String> {
    groups
        .filter_map(|i| caps.get(i))
        .map(|m| m.as_str())
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn package_capture(caps: &Captures) -> Option<String> {
    // Unquoted packages at the end of a repository entry swallow the period
    if let Some(quoted) = first_capture(caps, 2..=3) {
        return Some(quoted);
    }
    caps.get(4)
        .map(|m| m.as_str().trim_end_matches('.').to_string())
        .filter(|s| !s.is_empty())
}

/// Blank out a numeric sequence area (columns 1-6) so column-sensitive
/// patterns see the same layout as unnumbered sources.
pub(crate) fn code_area(line: &str) -> std::borrow::Cow<'_, str> {
    let prefix: Vec<char> = line.chars().take(6).collect();
    if prefix.len() == 6 && prefix.iter().all(|c| c.is_ascii_digit()) {
        let rest: String = line.chars().skip(6).collect();
        std::borrow::Cow::Owned(format!("      {rest}"))
    } else {
        std::borrow::Cow::Borrowed(line)
    }
}

/// True for fixed-format comment lines and `*>` comment lines
pub fn is_comment(line: &str) -> bool {
    let line = code_area(line);
    if matches!(line.chars().nth(6), Some('*') | Some('/')) {
        return true;
    }
    line.trim_start().starts_with("*>")
}

pub fn is_comment_or_blank(line: &str) -> bool {
    code_area(line).trim().is_empty() || is_comment(line)
}

/// Classify a source line.
pub fn classify(line: &str) -> LineKind {
    if is_comment(line) {
        return LineKind::Comment;
    }
    let line = code_area(line);
    let line = line.as_ref();
    let patterns = patterns();

    if patterns.end_method.is_match(line) {
        return LineKind::EndMethod;
    }
    if let Some(caps) = patterns.method_id.captures(line) {
        if let Some(name) = first_capture(&caps, 1..=3) {
            return LineKind::MethodId(name);
        }
    }
    for pattern in [&patterns.class_as, &patterns.is_class] {
        if let Some(caps) = pattern.captures(line) {
            if let Some(package) = package_capture(&caps) {
                return LineKind::ClassAlias {
                    alias: caps[1].to_string(),
                    package,
                };
            }
        }
    }
    if let Some(caps) = patterns.select.captures(line) {
        return LineKind::Select(caps[1].to_string());
    }
    if let Some(caps) = patterns.variable.captures(line) {
        return LineKind::Variable(caps[1].to_string());
    }
    if let Some(caps) = patterns.paragraph.captures(line) {
        let name = &caps[1];
        if !is_reserved_word(name) {
            return LineKind::Paragraph(name.to_string());
        }
    }
    LineKind::Other
}

/// Class named by an `OBJECT REFERENCE` or `TYPE` clause on a data item line
pub fn object_reference_target(line: &str) -> Option<String> {
    if is_comment(line) {
        return None;
    }
    let line = code_area(line);
    // Only the clauses after the item's own name can type it
    let name_end = patterns()
        .variable
        .captures(&line)
        .and_then(|caps| caps.get(1))
        .map_or(0, |name| name.end());
    patterns()
        .object_reference
        .captures(&line[name_end..])
        .map(|caps| caps[1].to_string())
}

/// Item named by a `RETURNING` clause
pub fn returning_item(line: &str) -> Option<String> {
    if is_comment(line) {
        return None;
    }
    patterns()
        .returning
        .captures(line)
        .map(|caps| caps[1].to_string())
}

/// Header of a procedure division, where a method's `RETURNING` is declared
pub fn is_procedure_division(line: &str) -> bool {
    !is_comment(line) && patterns().procedure_division.is_match(&code_area(line))
}

/// Compare a declared name with a query term.
///
/// Case-insensitive. A parenthesised segment on either side is a template
/// slot and matches any run of name characters.
pub fn names_match(declared: &str, term: &str) -> bool {
    declared.eq_ignore_ascii_case(term)
        || template_matches(declared, term)
        || template_matches(term, declared)
}

fn template_matches(template: &str, candidate: &str) -> bool {
    if !(template.contains('(') && template.contains(')')) {
        return false;
    }
    let mut pattern = String::from("(?i)^");
    let mut rest = template;
    while let Some(open) = rest.find('(') {
        let Some(close) = rest[open..].find(')') else {
            break;
        };
        pattern.push_str(&regex::escape(&rest[..open]));
        pattern.push_str(r"[A-Za-z0-9_\-()]*");
        rest = &rest[open + close + 1..];
    }
    pattern.push_str(&regex::escape(rest));
    pattern.push('$');
    match Regex::new(&pattern) {
        Ok(re) => re.is_match(candidate),
        Err(e) => {
            log::warn!("Invalid template pattern built from '{}': {}", template, e);
            false
        }
    }
}

/// Whether `line` is the declaration of `term`.
pub fn is_declaration(term: &str, line: &str) -> bool {
    classify(line)
        .declared_name()
        .is_some_and(|name| names_match(name, term))
}

/// Column of the declaration statement: its first non-blank character.
pub fn statement_column(line: &str) -> usize {
    line.chars().take_while(|c| c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_paragraph() {
        assert_eq!(classify("       foo."), LineKind::Paragraph("foo".into()));
        assert_eq!(
            classify("       main-para.  *> entry point"),
            LineKind::Paragraph("main-para".into())
        );
        assert_eq!(
            classify("       init-data SECTION."),
            LineKind::Paragraph("init-data".into())
        );
    }

    #[test]
    fn test_paragraph_requires_area_a() {
        assert_eq!(classify("           foo."), LineKind::Other);
        assert_eq!(classify("      foo."), LineKind::Other);
        assert_eq!(classify("       perform foo."), LineKind::Other);
    }

    #[test]
    fn test_reserved_words_are_not_paragraphs() {
        assert_eq!(classify("       goback."), LineKind::Other);
        assert_eq!(classify("       exit."), LineKind::Other);
        assert_eq!(classify("       working-storage section."), LineKind::Other);
    }

    #[test]
    fn test_sequence_area_is_ignored() {
        assert_eq!(classify("000100 foo."), LineKind::Paragraph("foo".into()));
        assert_eq!(
            classify("000200     05 bar pic x."),
            LineKind::Variable("bar".into())
        );
        assert!(is_comment("000300* note"));
        assert!(is_comment_or_blank("000400"));
    }

    #[test]
    fn test_variables() {
        assert_eq!(
            classify("           05 bar pic 9(5)."),
            LineKind::Variable("bar".into())
        );
        assert_eq!(classify("       01 ws-rec."), LineKind::Variable("ws-rec".into()));
        assert_eq!(
            classify("       78 max-items value 10."),
            LineKind::Variable("max-items".into())
        );
        assert_eq!(
            classify("       $SET CONSTANT app-name \"demo\""),
            LineKind::Variable("app-name".into())
        );
        assert_eq!(
            classify("           88 flag-(x) value 1."),
            LineKind::Variable("flag-(x)".into())
        );
    }

    #[test]
    fn test_level_number_must_have_two_digits() {
        assert_eq!(classify("           5 bar pic x."), LineKind::Other);
        assert_eq!(classify("           move 05 to bar."), LineKind::Other);
    }

    #[test]
    fn test_select() {
        assert_eq!(
            classify("           SELECT cust-file ASSIGN TO \"cust.dat\""),
            LineKind::Select("cust-file".into())
        );
        assert_eq!(
            classify("           select optional log-file"),
            LineKind::Select("log-file".into())
        );
        assert_eq!(classify("           select-x."), LineKind::Other);
    }

    #[test]
    fn test_class_alias_forms() {
        assert_eq!(
            classify("           CLASS Customer AS \"app.model.Customer\""),
            LineKind::ClassAlias {
                alias: "Customer".into(),
                package: "app.model.Customer".into()
            }
        );
        assert_eq!(
            classify("           Order-List IS CLASS \"OrderList\"."),
            LineKind::ClassAlias {
                alias: "Order-List".into(),
                package: "OrderList".into()
            }
        );
        assert_eq!(
            classify("           class Helper as Helper."),
            LineKind::ClassAlias {
                alias: "Helper".into(),
                package: "Helper".into()
            }
        );
    }

    #[test]
    fn test_method_boundaries() {
        assert_eq!(
            classify("       METHOD-ID. GetTotal."),
            LineKind::MethodId("GetTotal".into())
        );
        assert_eq!(
            classify("       method-id. \"New\" override."),
            LineKind::MethodId("New".into())
        );
        assert_eq!(classify("       END METHOD GetTotal."), LineKind::EndMethod);
        assert_eq!(classify("       end method."), LineKind::EndMethod);
    }

    #[test]
    fn test_comments() {
        assert_eq!(classify("      * 05 bar pic x."), LineKind::Comment);
        assert_eq!(classify("      / page"), LineKind::Comment);
        assert_eq!(classify("           *> 05 bar pic x."), LineKind::Comment);
        assert!(is_comment_or_blank("   "));
        assert!(!is_comment_or_blank("       foo."));
    }

    #[test]
    fn test_is_declaration_is_case_insensitive() {
        assert!(is_declaration("BAR", "           05 bar pic 9(5)."));
        assert!(is_declaration("foo", "       FOO."));
        assert!(!is_declaration("ba", "           05 bar pic 9(5)."));
        assert!(!is_declaration("foo", "      *foo."));
    }

    #[test]
    fn test_method_id_is_not_a_declaration() {
        assert!(!is_declaration("GetTotal", "       METHOD-ID. GetTotal."));
    }

    #[test]
    fn test_template_names_match_both_ways() {
        assert!(names_match("flag-(x)", "flag-active"));
        assert!(names_match("flag-active", "flag-(x)"));
        assert!(names_match("(pfx)-total", "WS-TOTAL"));
        assert!(names_match("flag-(x)", "flag-"));
        assert!(!names_match("flag-(x)", "other-active"));
        assert!(!names_match("flag-active", "flag-passive"));
    }

    #[test]
    fn test_object_reference_target() {
        assert_eq!(
            object_reference_target("       01 obj object reference Customer."),
            Some("Customer".into())
        );
        assert_eq!(
            object_reference_target("       01 obj usage OBJECT REFERENCE CLASS Order."),
            Some("Order".into())
        );
        assert_eq!(
            object_reference_target("       01 lst type OrderList."),
            Some("OrderList".into())
        );
        assert_eq!(object_reference_target("       01 cnt pic 9."), None);
    }

    #[test]
    fn test_object_reference_target_skips_item_name() {
        assert_eq!(
            object_reference_target("       01 ws-type object reference Customer."),
            Some("Customer".into())
        );
        assert_eq!(
            object_reference_target("       01 cust-type type Customer."),
            Some("Customer".into())
        );
        assert_eq!(object_reference_target("       01 rec-type pic x."), None);
        assert_eq!(object_reference_target("       01 type pic x."), None);
        assert_eq!(
            object_reference_target("000100 01 ws-type object reference Customer."),
            Some("Customer".into())
        );
    }

    #[test]
    fn test_returning_item() {
        assert_eq!(
            returning_item("       procedure division returning ls-result."),
            Some("ls-result".into())
        );
        assert_eq!(
            returning_item("       PROCEDURE DIVISION USING a RETURNING b."),
            Some("b".into())
        );
        assert_eq!(returning_item("       procedure division."), None);
        assert_eq!(returning_item("      * returning x"), None);
    }

    #[test]
    fn test_procedure_division_header() {
        assert!(is_procedure_division("       PROCEDURE DIVISION RETURNING r."));
        assert!(is_procedure_division("       procedure division."));
        assert!(!is_procedure_division("      *procedure division."));
        assert!(!is_procedure_division("           perform procedure-x."));
    }

    #[test]
    fn test_statement_column() {
        assert_eq!(statement_column("       foo."), 7);
        assert_eq!(statement_column("           05 bar pic 9(5)."), 11);
        assert_eq!(statement_column(""), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // Any filler inside the template slot must still match the template.
        #[test]
        fn prop_template_slot_accepts_any_filler(
            prefix in "[a-z][a-z0-9]{0,6}-",
            tag in "[a-z]{1,4}",
            filler in "[a-z0-9\\-]{0,8}",
            suffix in "(-[a-z]{1,4})?",
        ) {
            let template = format!("{prefix}({tag}){suffix}");
            let term = format!("{prefix}{filler}{suffix}");
            prop_assert!(names_match(&template, &term));
            prop_assert!(names_match(&term, &template));
            let line = format!("           88 {template} value 1.");
            prop_assert!(is_declaration(&term.to_uppercase(), &line));
        }

        #[test]
        fn prop_plain_names_only_match_themselves(
            a in "[a-z][a-z0-9\\-]{0,10}",
            b in "[a-z][a-z0-9\\-]{0,10}",
        ) {
            prop_assert_eq!(names_match(&a, &b), a == b);
        }
    }
}
