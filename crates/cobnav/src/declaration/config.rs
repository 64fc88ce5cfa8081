//
// declaration/config.rs
//
// Configuration for declaration resolution
//

use std::path::PathBuf;
use std::time::Duration;

use super::content_provider::SourceEncoding;

/// Placeholder in expander arguments replaced by the source path
pub const EXPANDER_FILE_PLACEHOLDER: &str = "{file}";

/// Declaration resolver configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolverConfig {
    /// Canonical repository root probed after the referencing file's directory
    pub fallback_root: Option<PathBuf>,
    /// Encoding of sources read from disk
    pub encoding: SourceEncoding,
    /// Upper bound on chain links walked and continuation lines visited
    pub max_chain_depth: usize,
    /// External macro expander executable
    pub expander_command: Option<PathBuf>,
    /// Expander arguments; `{file}` is replaced by the source path
    pub expander_args: Vec<String>,
    /// Optional subprocess timeout for the expander
    pub expander_timeout: Option<Duration>,
    /// Number of expansions kept in memory
    pub expansion_cache_capacity: usize,
}

impl Default for ResolverConfig {
    /// Local-directory-only probing, Latin-1 sources, no expander.
    ///
    /// # Examples
    ///
    /// ```
    /// use cobnav::declaration::ResolverConfig;
    ///
    /// let cfg = ResolverConfig::default();
    /// assert_eq!(cfg.max_chain_depth, 32);
    /// assert!(cfg.fallback_root.is_none());
    /// assert!(cfg.expander_command.is_none());
    /// ```
    fn default() -> Self {
        Self {
            fallback_root: None,
            encoding: SourceEncoding::Latin1,
            max_chain_depth: 32,
            expander_command: None,
            expander_args: Vec::new(),
            expander_timeout: None,
            expansion_cache_capacity: 64,
        }
    }
}

impl ResolverConfig {
    /// Check if settings that shape cached expansions changed
    pub fn expansion_settings_changed(&self, other: &Self) -> bool {
        self.expander_command != other.expander_command
            || self.expander_args != other.expander_args
            || self.encoding != other.encoding
    }
}
