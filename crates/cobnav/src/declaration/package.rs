//
// declaration/package.rs
//
// Class alias and object-reference resolution
//
// A chain link names either a repository alias (`CLASS k AS "pkg"`), a
// variable typed as an object reference, or nothing declared at all. In the
// last case the link itself is taken as the class file name.
//

use std::path::PathBuf;

use super::backward_scan::scan_backward;
use super::content_provider::FileAccessor;
use super::line_kind::{classify, object_reference_target, LineKind};
use super::path_resolve::{resolve_class_file, PathContext};
use super::types::{DeclaredType, ResolveError, SourceBuffer};

/// A data item may spread its clauses over several lines
pub(crate) const MAX_STATEMENT_LINES: usize = 6;

/// Determine what `link` refers to, looking for its declaration at or above
/// `from_line`.
pub fn declared_type(buffer: &SourceBuffer, link: &str, from_line: usize) -> DeclaredType {
    let Some(position) = scan_backward(buffer, link, from_line) else {
        log::trace!("No declaration for '{}', assuming a class of that name", link);
        return DeclaredType::Dummy(link.to_string());
    };
    let line = buffer.line(position.line).unwrap_or_default();
    let declared = match classify(line) {
        LineKind::ClassAlias { alias, package } => DeclaredType::ClassAlias { alias, package },
        LineKind::Variable(_) => {
            match object_reference_target(&buffer.statement(position.line, MAX_STATEMENT_LINES)) {
                Some(class) => DeclaredType::ObjectReference(class),
                None => DeclaredType::Dummy(link.to_string()),
            }
        }
        _ => DeclaredType::Dummy(link.to_string()),
    };
    log::trace!(
        "'{}' declared at line {} as {:?}",
        link,
        position.line,
        declared
    );
    declared
}

/// Package string naming the class a declared type points at.
///
/// Object references take one more hop through the repository alias of the
/// referenced class.
pub fn class_package(buffer: &SourceBuffer, declared: &DeclaredType, from_line: usize) -> String {
    match declared {
        DeclaredType::Dummy(name) => name.clone(),
        DeclaredType::ClassAlias { package, .. } => package.clone(),
        DeclaredType::ObjectReference(class) => match declared_type(buffer, class, from_line) {
            DeclaredType::ClassAlias { package, .. } => package,
            _ => class.clone(),
        },
    }
}

/// Resolve a declared type to the file defining its class.
pub async fn locate_class_file(
    buffer: &SourceBuffer,
    declared: &DeclaredType,
    from_line: usize,
    context: &PathContext,
    accessor: &dyn FileAccessor,
) -> Result<PathBuf, ResolveError> {
    let package = class_package(buffer, declared, from_line);
    resolve_class_file(&package, context, accessor)
        .await
        .ok_or(ResolveError::ClassNotFound(package))
}
