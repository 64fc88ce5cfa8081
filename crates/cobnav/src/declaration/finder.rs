//
// declaration/finder.rs
//
// Entry point for "where is this declared" queries
//
// Strategies run strictly in order: method chain, backward scan of the
// origin buffer, then the macro-expanded program. A chain that is not
// recognised as one falls through; any other chain outcome is final.
//

use std::sync::Arc;

use super::backward_scan::resolve_local;
use super::chain::{is_method_call, resolve_full_chain};
use super::config::ResolverConfig;
use super::content_provider::{DiskFileAccessor, FileAccessor};
use super::expansion::{ExpansionCache, MacroExpander};
use super::fallback::FallbackResolver;
use super::file_cache::FileCache;
use super::line_kind::is_comment_or_blank;
use super::method::ChainResolver;
use super::types::{Query, Resolution, ResolveError};
use crate::expander_subprocess::ExpanderSubprocess;
use crate::perf::TimingGuard;

/// Terms shorter than this are not looked up from comment or blank lines
const MIN_TERM_LEN_OFF_CODE: usize = 3;

/// Resolves declaration queries against COBOL sources.
///
/// Holds the collaborators shared across queries. The [`FileCache`] is
/// passed per call so each caller decides how long loaded files stay valid.
pub struct DeclarationFinder {
    config: ResolverConfig,
    accessor: Arc<dyn FileAccessor>,
    expander: Option<Arc<dyn MacroExpander>>,
    expansions: Arc<ExpansionCache>,
}

impl DeclarationFinder {
    /// Finder reading from disk, expanding with the configured command
    pub fn new(config: ResolverConfig) -> Self {
        let expander = ExpanderSubprocess::from_config(&config)
            .map(|expander| Arc::new(expander) as Arc<dyn MacroExpander>);
        Self::with_collaborators(config, Arc::new(DiskFileAccessor), expander)
    }

    pub fn with_collaborators(
        config: ResolverConfig,
        accessor: Arc<dyn FileAccessor>,
        expander: Option<Arc<dyn MacroExpander>>,
    ) -> Self {
        let expansions = Arc::new(ExpansionCache::new(config.expansion_cache_capacity));
        Self {
            config,
            accessor,
            expander,
            expansions,
        }
    }

    /// Share an existing expansion cache, e.g. across a configuration reload
    /// that did not change how expansions are produced
    pub fn with_expansion_cache(mut self, expansions: Arc<ExpansionCache>) -> Self {
        self.expansions = expansions;
        self
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn expansions(&self) -> &Arc<ExpansionCache> {
        &self.expansions
    }

    pub fn has_expander(&self) -> bool {
        self.expander.is_some()
    }

    /// Find the declaration of `query.term` as referenced from
    /// `query.origin` at `query.line`/`query.column`.
    ///
    /// Files are read through `files`; seed it with open editor buffers so
    /// they take precedence over disk.
    pub async fn find_declaration(&self, query: &Query, files: &FileCache) -> Resolution {
        let timing = TimingGuard::with_threshold("find_declaration", 500);
        let result = self.resolve(query, files).await;
        match &result {
            Ok(position) => log::trace!(
                "Resolved '{}' from {}:{} to {:?} in {:?}",
                query.term,
                query.origin.display(),
                query.line,
                position,
                timing.elapsed()
            ),
            Err(e) if e.is_fatal() => log::warn!(
                "Declaration lookup for '{}' in '{}' aborted: {}",
                query.term,
                query.origin.display(),
                e
            ),
            Err(e) => log::trace!("No declaration for '{}': {}", query.term, e),
        }
        result
    }

    async fn resolve(&self, query: &Query, files: &FileCache) -> Resolution {
        if query.term.is_empty() {
            return Err(ResolveError::EmptyOrTrivialTerm);
        }
        let origin = files
            .get_or_load(&query.origin, self.accessor.as_ref(), self.config.encoding)
            .await?;
        let line = origin.line(query.line).unwrap_or_default();
        if query.term.chars().count() < MIN_TERM_LEN_OFF_CODE && is_comment_or_blank(line) {
            return Err(ResolveError::EmptyOrTrivialTerm);
        }

        if is_method_call(line, query.column) {
            let mut chain = resolve_full_chain(
                &origin,
                query.line,
                query.column,
                self.config.max_chain_depth,
            );
            chain.reverse();
            log::trace!(
                "'{}' is invoked through chain [{}]",
                query.term,
                chain
                    .iter()
                    .map(|link| link.as_str())
                    .collect::<Vec<_>>()
                    .join(":>")
            );
            let resolver = ChainResolver::new(&self.config, self.accessor.as_ref(), files);
            match resolver.resolve(&chain, query, origin.clone()).await {
                Err(ResolveError::NotAtCallSite) => {}
                outcome => return outcome,
            }
        }

        match resolve_local(&origin, &query.term, query.line) {
            Ok(position) => return Ok(position),
            Err(e) => log::trace!("{} for '{}', trying expansion", e, query.term),
        }

        FallbackResolver::new(
            &self.config,
            self.accessor.as_ref(),
            self.expander.as_deref(),
            &self.expansions,
        )
        .resolve(query, &origin)
        .await
    }
}
