//
// declaration/method.rs
//
// Method declaration lookup and method-chain resolution
//
// A chain `root:>m1:>m2:>term` is walked one link at a time. The root picks
// the starting class file; every following link must be a METHOD-ID in the
// current class whose RETURNING item names the class of the next step. The
// term is finally looked up inside the last class reached.
//

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use super::backward_scan::scan_from_end;
use super::config::ResolverConfig;
use super::content_provider::FileAccessor;
use super::file_cache::FileCache;
use super::line_kind::{
    classify, is_procedure_division, names_match, returning_item, statement_column, LineKind,
};
use super::package::{declared_type, locate_class_file, MAX_STATEMENT_LINES};
use super::path_resolve::{same_file, PathContext};
use super::types::{ChainLink, ClassFile, Position, Query, Resolution, ResolveError, SourceBuffer};

/// A `METHOD-ID.` block located in a class source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDeclaration {
    pub name: String,
    pub line: usize,
    pub column: usize,
    /// Line of the matching `END METHOD`, if the block is closed
    pub end_line: Option<usize>,
    /// Item named by the procedure division's `RETURNING` clause
    pub returning: Option<String>,
}

/// Find the first `METHOD-ID.` named `name` and describe its block.
pub fn find_method(buffer: &SourceBuffer, name: &str) -> Option<MethodDeclaration> {
    let (line, declared) = buffer.lines().enumerate().find_map(|(index, text)| match classify(text) {
        LineKind::MethodId(declared) if names_match(&declared, name) => Some((index, declared)),
        _ => None,
    })?;

    let mut end_line = None;
    let mut returning = None;
    for (index, text) in buffer.lines().enumerate().skip(line + 1) {
        match classify(text) {
            LineKind::EndMethod => {
                end_line = Some(index);
                break;
            }
            // An unterminated method runs into the next one
            LineKind::MethodId(_) => break,
            _ => {}
        }
        if returning.is_none() && is_procedure_division(text) {
            returning = returning_item(&buffer.statement(index, MAX_STATEMENT_LINES));
        }
    }

    Some(MethodDeclaration {
        name: declared,
        line,
        column: buffer.line(line).map(statement_column).unwrap_or(0),
        end_line,
        returning,
    })
}

type ResolutionFuture<'a> = Pin<Box<dyn Future<Output = Resolution> + Send + 'a>>;

/// Walks a root-first chain across class files.
///
/// Borrows the caches and configuration of the query it serves; nothing is
/// shared between walks except through the [`FileCache`].
pub struct ChainResolver<'a> {
    config: &'a ResolverConfig,
    accessor: &'a dyn FileAccessor,
    files: &'a FileCache,
}

impl<'a> ChainResolver<'a> {
    pub fn new(config: &'a ResolverConfig, accessor: &'a dyn FileAccessor, files: &'a FileCache) -> Self {
        Self {
            config,
            accessor,
            files,
        }
    }

    /// Resolve `query.term` as the final member of `chain`.
    ///
    /// `origin` is the buffer the query was issued from.
    pub async fn resolve(
        &self,
        chain: &[ChainLink],
        query: &Query,
        origin: Arc<SourceBuffer>,
    ) -> Resolution {
        let Some((root, rest)) = chain.split_first() else {
            return Err(ResolveError::NotAtCallSite);
        };
        if chain.len() > self.config.max_chain_depth {
            log::warn!(
                "Chain of {} links for '{}' exceeds the limit of {}",
                chain.len(),
                query.term,
                self.config.max_chain_depth
            );
            return Err(ResolveError::NotFound);
        }

        let start = if root.is_self() {
            log::trace!("Chain rooted at self, staying in '{}'", query.origin.display());
            ClassFile {
                path: query.origin.clone(),
                buffer: origin,
            }
        } else {
            let declared = declared_type(&origin, root.as_str(), query.line);
            let context = self.path_context(&query.origin);
            let path =
                locate_class_file(&origin, &declared, query.line, &context, self.accessor).await?;
            self.load(path).await?
        };

        self.walk(rest, start, query).await
    }

    fn walk<'b>(
        &'b self,
        links: &'b [ChainLink],
        current: ClassFile,
        query: &'b Query,
    ) -> ResolutionFuture<'b>
    where
        'a: 'b,
    {
        Box::pin(async move {
            let Some((link, rest)) = links.split_first() else {
                return self.find_member(&current, query);
            };

            let next = if link.is_constructor() {
                // An instance of the class itself; `new` may be inherited
                current
            } else {
                let method = find_method(&current.buffer, link.as_str())
                    .ok_or_else(|| ResolveError::MethodNotFound(link.to_string()))?;
                let item = method
                    .returning
                    .ok_or_else(|| ResolveError::NoReturnType(link.to_string()))?;
                let from_line = method.end_line.unwrap_or(usize::MAX);
                let declared = declared_type(&current.buffer, &item, from_line);
                log::trace!(
                    "'{}' in '{}' returns '{}' ({:?})",
                    link,
                    current.path.display(),
                    item,
                    declared
                );
                let context = self.path_context(&current.path);
                let path = locate_class_file(
                    &current.buffer,
                    &declared,
                    from_line,
                    &context,
                    self.accessor,
                )
                .await?;
                self.load(path).await?
            };

            self.walk(rest, next, query).await
        })
    }

    /// Look up the queried term inside the class the chain ended in
    fn find_member(&self, class: &ClassFile, query: &Query) -> Resolution {
        let found = match find_method(&class.buffer, &query.term) {
            Some(method) => Some(Position::local(method.line, method.column)),
            None => scan_from_end(&class.buffer, &query.term),
        };
        let Some(position) = found else {
            log::trace!(
                "'{}' not declared in '{}'",
                query.term,
                class.path.display()
            );
            return Err(ResolveError::NotFound);
        };
        if same_file(&class.path, &query.origin) {
            Ok(position)
        } else {
            Ok(Position::in_file(position.line, position.column, class.path.clone()))
        }
    }

    fn path_context(&self, file: &Path) -> PathContext {
        PathContext::new(file, self.config.fallback_root.as_deref())
    }

    async fn load(&self, path: PathBuf) -> Result<ClassFile, ResolveError> {
        let buffer = self
            .files
            .get_or_load(&path, self.accessor, self.config.encoding)
            .await?;
        Ok(ClassFile { path, buffer })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::declaration::content_provider::DiskFileAccessor;
    use crate::declaration::path_resolve::normalize_path;
    use tempfile::TempDir;

    fn class_k() -> SourceBuffer {
        SourceBuffer::from_lines([
            "       class-id. K.",
            "       method-id. method1.",
            "       local-storage section.",
            "       01 result object reference J.",
            "       procedure division",
            "           returning result.",
            "           invoke J \"new\" returning result.",
            "       end method method1.",
            "       method-id. Clear.",
            "       procedure division.",
            "       end method Clear.",
            "       end class K.",
        ])
    }

    #[test]
    fn test_find_method_with_returning_on_continuation() {
        let method = find_method(&class_k(), "METHOD1").unwrap();
        assert_eq!(method.name, "method1");
        assert_eq!(method.line, 1);
        assert_eq!(method.column, 7);
        assert_eq!(method.end_line, Some(7));
        assert_eq!(method.returning.as_deref(), Some("result"));
    }

    #[test]
    fn test_find_method_without_returning() {
        let method = find_method(&class_k(), "clear").unwrap();
        assert_eq!(method.line, 8);
        assert_eq!(method.end_line, Some(10));
        assert_eq!(method.returning, None);
    }

    #[test]
    fn test_find_method_missing() {
        assert!(find_method(&class_k(), "method2").is_none());
    }

    #[test]
    fn test_invoke_returning_in_body_is_not_the_method_result() {
        let buffer = SourceBuffer::from_lines([
            "       method-id. Build.",
            "       procedure division.",
            "           invoke Other \"make\" returning tmp.",
            "       end method Build.",
        ]);
        assert_eq!(find_method(&buffer, "Build").unwrap().returning, None);
    }

    #[tokio::test]
    async fn test_self_chain_stays_in_origin() {
        let origin = Arc::new(SourceBuffer::from_lines([
            "       method-id. bar.",
            "       end method bar.",
            "           invoke self:>bar",
        ]));
        let config = ResolverConfig::default();
        let files = FileCache::new();
        let resolver = ChainResolver::new(&config, &DiskFileAccessor, &files);
        let query = Query::new("bar", "/nonexistent/MAIN.cbl", 2, 25);

        let position = resolver
            .resolve(&[ChainLink::new("self")], &query, origin)
            .await
            .unwrap();
        assert_eq!(position, Position::local(0, 7));
        assert!(files.is_empty());
    }

    #[tokio::test]
    async fn test_constructor_keeps_class() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("Widget.cbl"),
            "       class-id. Widget.\n       01 size-x pic 9.\n",
        )
        .unwrap();
        let origin_path = dir.path().join("MAIN.cbl");
        let origin = Arc::new(SourceBuffer::from_lines(["           invoke Widget:>new:>size-x"]));
        let config = ResolverConfig::default();
        let files = FileCache::new();
        let resolver = ChainResolver::new(&config, &DiskFileAccessor, &files);
        let query = Query::new("size-x", &origin_path, 0, 34);

        let chain = [ChainLink::new("Widget"), ChainLink::new("new")];
        let position = resolver.resolve(&chain, &query, origin).await.unwrap();
        assert_eq!(position.line, 1);
        assert_eq!(position.column, 7);
        assert_eq!(position.file, normalize_path(&dir.path().join("Widget.cbl")));
    }

    #[tokio::test]
    async fn test_method_without_returning_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("K.cbl"),
            "       method-id. Clear.\n       procedure division.\n       end method Clear.\n",
        )
        .unwrap();
        let origin = Arc::new(SourceBuffer::from_lines(["           invoke K:>Clear:>x"]));
        let config = ResolverConfig::default();
        let files = FileCache::new();
        let resolver = ChainResolver::new(&config, &DiskFileAccessor, &files);
        let query = Query::new("x", dir.path().join("MAIN.cbl"), 0, 29);

        let chain = [ChainLink::new("K"), ChainLink::new("Clear")];
        let result = resolver.resolve(&chain, &query, origin.clone()).await;
        assert!(matches!(result, Err(ResolveError::NoReturnType(m)) if m == "Clear"));

        let chain = [ChainLink::new("K"), ChainLink::new("Missing")];
        let result = resolver.resolve(&chain, &query, origin).await;
        assert!(matches!(result, Err(ResolveError::MethodNotFound(m)) if m == "Missing"));
    }

    #[tokio::test]
    async fn test_chain_longer_than_limit_is_rejected() {
        let config = ResolverConfig {
            max_chain_depth: 2,
            ..Default::default()
        };
        let files = FileCache::new();
        let resolver = ChainResolver::new(&config, &DiskFileAccessor, &files);
        let query = Query::new("x", "/nonexistent/MAIN.cbl", 0, 0);
        let chain = [ChainLink::new("a"), ChainLink::new("b"), ChainLink::new("c")];

        let result = resolver
            .resolve(&chain, &query, Arc::new(SourceBuffer::default()))
            .await;
        assert!(matches!(result, Err(ResolveError::NotFound)));
    }
}
