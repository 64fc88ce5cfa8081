//
// declaration/path_resolve.rs
//
// Path resolution for class files and expansion trailers
//
// Search order is fixed: the referencing file's own directory first, then
// the configured fallback repository root. Within each root `.cbl` is tried
// before `.cob`.
//

use std::path::{Component, Path, PathBuf};

use super::content_provider::FileAccessor;

/// Source extensions probed for a class name, in order
pub const CLASS_EXTENSIONS: &[&str] = &["cbl", "cob"];

/// Context for path resolution
#[derive(Debug, Clone)]
pub struct PathContext {
    /// Path of the referencing file
    pub file_path: PathBuf,
    /// Canonical fallback repository root
    pub fallback_root: Option<PathBuf>,
}

impl PathContext {
    pub fn new(file_path: &Path, fallback_root: Option<&Path>) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            fallback_root: fallback_root.map(Path::to_path_buf),
        }
    }

    /// Directory of the referencing file
    pub fn local_directory(&self) -> PathBuf {
        self.file_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Search roots in probe order
    pub fn search_roots(&self) -> Vec<PathBuf> {
        let mut roots = vec![self.local_directory()];
        if let Some(root) = &self.fallback_root {
            roots.push(root.clone());
        }
        roots
    }
}

/// Reduce a class package string to the file stem it lives in.
///
/// `"app.model.Customer"` → `Customer`, `'lib/Order.cbl'` → `Order`.
pub fn class_file_stem(package: &str) -> Option<String> {
    let trimmed = package.trim().trim_matches(|c| c == '"' || c == '\'');
    let lower = trimmed.to_ascii_lowercase();
    let without_ext = CLASS_EXTENSIONS
        .iter()
        .find_map(|ext| {
            lower
                .strip_suffix(&format!(".{ext}"))
                .map(|rest| &trimmed[..rest.len()])
        })
        .unwrap_or(trimmed);
    let stem = without_ext
        .rsplit(['/', '\\', '.'])
        .next()
        .unwrap_or(without_ext);
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Candidate paths for a class, in probe order
pub fn class_file_candidates(class: &str, context: &PathContext) -> Vec<PathBuf> {
    let Some(stem) = class_file_stem(class) else {
        return Vec::new();
    };
    let stem = stem.as_str();
    context
        .search_roots()
        .into_iter()
        .flat_map(|root| {
            CLASS_EXTENSIONS
                .iter()
                .map(move |ext| root.join(format!("{stem}.{ext}")))
        })
        .filter_map(|candidate| normalize_path(&candidate))
        .collect()
}

/// Locate the source file defining `class`.
pub async fn resolve_class_file(
    class: &str,
    context: &PathContext,
    accessor: &dyn FileAccessor,
) -> Option<PathBuf> {
    for candidate in class_file_candidates(class, context) {
        if accessor.exists(&candidate).await {
            log::trace!(
                "Resolved class '{}' to '{}'",
                class,
                candidate.display()
            );
            return Some(candidate);
        }
        log::trace!("Class '{}' not at '{}'", class, candidate.display());
    }
    log::trace!(
        "Failed to resolve class '{}' from '{}' (roots: {:?})",
        class,
        context.file_path.display(),
        context.search_roots()
    );
    None
}

/// Locate a file named by an expansion trailer.
///
/// Absolute names are used as-is; relative names are tried in the local
/// directory and then the fallback root.
pub async fn resolve_source_file(
    name: &str,
    context: &PathContext,
    accessor: &dyn FileAccessor,
) -> Option<PathBuf> {
    if name.is_empty() {
        return None;
    }
    let named = Path::new(name);
    if named.is_absolute() {
        let normalized = normalize_path(named)?;
        return accessor.exists(&normalized).await.then_some(normalized);
    }
    for root in context.search_roots() {
        let Some(candidate) = normalize_path(&root.join(named)) else {
            continue;
        };
        if accessor.exists(&candidate).await {
            return Some(candidate);
        }
    }
    log::trace!(
        "Failed to resolve source '{}' from '{}'",
        name,
        context.file_path.display()
    );
    None
}

/// Normalize a path by resolving . and .. components
pub fn normalize_path(path: &Path) -> Option<PathBuf> {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                // Only pop if the last component is a Normal segment
                if let Some(Component::Normal(_)) = components.last() {
                    components.pop();
                }
            }
            Component::CurDir => {}
            c => components.push(c),
        }
    }

    if components.is_empty() {
        return None;
    }

    let mut result = PathBuf::new();
    for c in components {
        result.push(c);
    }
    Some(result)
}

/// Whether two paths name the same file after normalization
pub fn same_file(a: &Path, b: &Path) -> bool {
    normalize_path(a) == normalize_path(b)
}
