//
// declaration/mod.rs
//
// Declaration and type resolution for COBOL sources
//

pub mod backward_scan;
pub mod chain;
pub mod config;
pub mod content_provider;
pub mod expansion;
pub mod fallback;
pub mod file_cache;
pub mod finder;
pub mod line_kind;
pub mod method;
pub mod package;
pub mod path_resolve;
pub mod types;


pub use config::{ResolverConfig, EXPANDER_FILE_PLACEHOLDER};
pub use content_provider::{DiskFileAccessor, FileAccessor, SourceEncoding};
pub use expansion::{Expansion, ExpansionCache, MacroExpander};
pub use file_cache::FileCache;
pub use finder::DeclarationFinder;
pub use line_kind::{is_declaration, LineKind};
pub use types::{
    Chain, ChainLink, ClassFile, DeclaredType, Position, Query, Resolution, ResolveError,
    SourceBuffer,
};
