//
// declaration/types.rs
//
// Core data types for declaration resolution
//

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Resolved declaration site.
///
/// `file` is `None` when the declaration lives in the buffer the query
/// originated from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub line: usize,
    pub column: usize,
    pub file: Option<PathBuf>,
}

impl Position {
    /// Position inside the originating buffer
    pub fn local(line: usize, column: usize) -> Self {
        Self {
            line,
            column,
            file: None,
        }
    }

    /// Position inside another file
    pub fn in_file(line: usize, column: usize, file: PathBuf) -> Self {
        Self {
            line,
            column,
            file: Some(file),
        }
    }
}

/// A single "where is this declared" request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub term: String,
    pub origin: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl Query {
    pub fn new(term: impl Into<String>, origin: impl Into<PathBuf>, line: usize, column: usize) -> Self {
        Self {
            term: term.into(),
            origin: origin.into(),
            line,
            column,
        }
    }
}

/// Read-only line view of a source file or live editor buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceBuffer {
    lines: Vec<String>,
}

impl SourceBuffer {
    pub fn from_text(text: &str) -> Self {
        Self {
            lines: text.lines().map(str::to_string).collect(),
        }
    }

    pub fn from_lines<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            lines: lines.into_iter().map(Into::into).collect(),
        }
    }

    pub fn line(&self, index: usize) -> Option<&str> {
        self.lines.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn last_line_index(&self) -> Option<usize> {
        self.lines.len().checked_sub(1)
    }

    pub fn lines(&self) -> impl DoubleEndedIterator<Item = &str> + ExactSizeIterator {
        self.lines.iter().map(String::as_str)
    }

    /// Code of the statement starting at `first_line`, joined across lines up
    /// to its terminating period. Inline `*>` comments are dropped.
    pub fn statement(&self, first_line: usize, max_lines: usize) -> String {
        let mut statement = String::new();
        for line in self.lines.iter().skip(first_line).take(max_lines) {
            let code = line.split("*>").next().unwrap_or_default();
            statement.push_str(code);
            statement.push(' ');
            if code.trim_end().ends_with('.') {
                break;
            }
        }
        statement
    }
}

/// Reserved root identifier for the current instance
pub const SELF_LINK: &str = "self";

/// Method name that constructs an instance of its own class
pub const CONSTRUCTOR_LINK: &str = "new";

/// One identifier in a method-invocation chain.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChainLink(String);

impl ChainLink {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_self(&self) -> bool {
        self.0.eq_ignore_ascii_case(SELF_LINK)
    }

    pub fn is_constructor(&self) -> bool {
        self.0.eq_ignore_ascii_case(CONSTRUCTOR_LINK)
    }
}

impl std::fmt::Display for ChainLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Root-first list of chain links
pub type Chain = Vec<ChainLink>;

/// What a chain link turned out to refer to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeclaredType {
    /// No local declaration; the name is assumed to be a class file name
    Dummy(String),
    /// `CLASS alias AS "pkg"` / `alias IS CLASS "pkg"`
    ClassAlias { alias: String, package: String },
    /// Variable holding a reference to an instance of the named class
    ObjectReference(String),
}

/// Loaded class source the chain walk is currently positioned in.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub path: PathBuf,
    pub buffer: std::sync::Arc<SourceBuffer>,
}

impl ClassFile {
    pub fn directory(&self) -> Option<&Path> {
        self.path.parent()
    }
}

/// Outcome of a failed resolution step.
///
/// Everything except [`ResolveError::Io`] and [`ResolveError::ExpansionFailed`]
/// is an expected "not found" that selects the next strategy.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("term is empty or too short to resolve from a comment or blank line")]
    EmptyOrTrivialTerm,
    #[error("reference is not part of a method-invocation chain")]
    NotAtCallSite,
    #[error("class '{0}' was not found in any search root")]
    ClassNotFound(String),
    #[error("method '{0}' has no METHOD-ID declaration")]
    MethodNotFound(String),
    #[error("method '{0}' declares no RETURNING item")]
    NoReturnType(String),
    #[error("no declaration found in the local buffer")]
    DeclarationNotFoundLocally,
    #[error("macro expansion is unavailable")]
    ExpansionUnavailable,
    #[error("declaration not found")]
    NotFound,
    #[error("failed to read source: {0}")]
    Io(#[from] std::io::Error),
    #[error("macro expansion failed: {0}")]
    ExpansionFailed(String),
}

impl ResolveError {
    /// Whether the error aborts the query instead of selecting the next strategy
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Io(_) | Self::ExpansionFailed(_))
    }
}

pub type Resolution = Result<Position, ResolveError>;
