//
// declaration/content_provider.rs
//
// File access for declaration resolution
//

use std::path::Path;

use async_trait::async_trait;

/// Text encoding of COBOL sources on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SourceEncoding {
    /// ISO-8859-1; every byte maps to the code point of the same value
    #[default]
    Latin1,
    /// UTF-8, decoded lossily when the bytes are not valid
    Utf8,
}

impl SourceEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            SourceEncoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
            SourceEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    /// Parse a configuration value (`latin1`, `iso-8859-1`, `utf8`, `utf-8`)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "latin1" | "latin-1" | "iso-8859-1" | "iso8859-1" => Some(SourceEncoding::Latin1),
            "utf8" | "utf-8" => Some(SourceEncoding::Utf8),
            _ => None,
        }
    }
}

/// Read access to source files.
///
/// Abstracted so tests can count reads and serve in-memory trees.
#[async_trait]
pub trait FileAccessor: Send + Sync {
    async fn read(&self, path: &Path, encoding: SourceEncoding) -> std::io::Result<String>;

    async fn exists(&self, path: &Path) -> bool;
}

/// Filesystem-backed accessor
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileAccessor;

#[async_trait]
impl FileAccessor for DiskFileAccessor {
    async fn read(&self, path: &Path, encoding: SourceEncoding) -> std::io::Result<String> {
        let bytes = tokio::fs::read(path).await?;
        Ok(encoding.decode(&bytes))
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }
}
