/// Reserved words module for COBOL paragraph detection.
///
/// A line of the form `       name.` in area A is only a paragraph label when
/// `name` is not one of the words below. These are statement words and
/// section/paragraph headers that routinely stand alone on such a line
/// (`goback.`, `exit.`, `linkage section.`, `repository.`).

/// Words that never name a user-defined paragraph or section.
pub const RESERVED_WORDS: &[&str] = &[
    "goback",
    "exit",
    "continue",
    "else",
    "end-if",
    "end-perform",
    "end-evaluate",
    "end-read",
    "end-write",
    "end-call",
    "end-invoke",
    "end-search",
    "end-string",
    "end-compute",
    "end-exec",
    "end-try",
    "declaratives",
    "identification",
    "environment",
    "data",
    "procedure",
    "configuration",
    "input-output",
    "file-control",
    "i-o-control",
    "repository",
    "special-names",
    "source-computer",
    "object-computer",
    "file",
    "working-storage",
    "local-storage",
    "linkage",
    "screen",
    "report",
    "object",
    "factory",
];

/// Check if a name is reserved in area A.
///
/// The check is case-insensitive, matching COBOL's treatment of words.
///
/// # Examples
///
/// ```
/// use cobnav::reserved_words::is_reserved_word;
///
/// assert!(is_reserved_word("goback"));
/// assert!(is_reserved_word("WORKING-STORAGE"));
/// assert!(!is_reserved_word("main-para"));
/// ```
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS
        .iter()
        .any(|word| word.eq_ignore_ascii_case(name))
}
