//
// backend.rs
//
// Language server exposing declaration lookup as textDocument/definition
//

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::RwLock;
use tower_lsp::jsonrpc::Result;
use tower_lsp::lsp_types::*;
use tower_lsp::Client;
use tower_lsp::LanguageServer;
use tower_lsp::LspService;
use tower_lsp::Server;

use crate::declaration::{
    DeclarationFinder, DiskFileAccessor, ExpansionCache, FileCache,
    Position as DeclarationPosition, Query, ResolverConfig, SourceBuffer, SourceEncoding,
};

/// The `cobol` section of the client settings
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct CobolSettings {
    fallback_root: Option<PathBuf>,
    encoding: Option<String>,
    max_chain_depth: Option<usize>,
    expander_command: Option<PathBuf>,
    expander_args: Option<Vec<String>>,
    expander_timeout_ms: Option<u64>,
    expansion_cache_capacity: Option<usize>,
}

/// Parse resolver configuration from LSP settings.
///
/// Reads the top-level `cobol` section. Only fields present in the JSON are
/// applied; absent fields keep their defaults.
///
/// # Returns
///
/// `Some(ResolverConfig)` when the `cobol` section is present and well-formed;
/// `None` otherwise.
fn parse_resolver_config(settings: &serde_json::Value) -> Option<ResolverConfig> {
    let section = settings.get("cobol")?;
    let parsed: CobolSettings = match serde_json::from_value(section.clone()) {
        Ok(parsed) => parsed,
        Err(e) => {
            log::warn!("Invalid cobol settings: {}", e);
            return None;
        }
    };

    let mut config = ResolverConfig::default();
    if parsed.fallback_root.is_some() {
        config.fallback_root = parsed.fallback_root;
    }
    if let Some(name) = parsed.encoding {
        match SourceEncoding::from_name(&name) {
            Some(encoding) => config.encoding = encoding,
            None => log::warn!("Unknown source encoding '{}', keeping {:?}", name, config.encoding),
        }
    }
    if let Some(v) = parsed.max_chain_depth {
        config.max_chain_depth = v;
    }
    if parsed.expander_command.is_some() {
        config.expander_command = parsed.expander_command;
    }
    if let Some(args) = parsed.expander_args {
        config.expander_args = args;
    }
    if let Some(ms) = parsed.expander_timeout_ms {
        config.expander_timeout = Some(Duration::from_millis(ms));
    }
    if let Some(v) = parsed.expansion_cache_capacity {
        config.expansion_cache_capacity = v;
    }
    Some(config)
}

fn is_identifier_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

/// Identifier under (or immediately left of) `character`, with its start
/// column.
fn identifier_at(line: &str, character: usize) -> Option<(usize, String)> {
    let chars: Vec<char> = line.chars().collect();
    let mut pos = character.min(chars.len());
    if pos == chars.len() || !is_identifier_char(chars[pos]) {
        // Cursor placed right after the identifier
        if pos == 0 || !is_identifier_char(chars[pos - 1]) {
            return None;
        }
        pos -= 1;
    }
    let start = (0..=pos)
        .rev()
        .take_while(|&i| is_identifier_char(chars[i]))
        .last()?;
    let end = (pos..chars.len())
        .take_while(|&i| is_identifier_char(chars[i]))
        .last()?;
    Some((start, chars[start..=end].iter().collect()))
}

pub struct Backend {
    client: Client,
    /// Open documents by URI, full text
    documents: Arc<RwLock<HashMap<Url, String>>>,
    finder: Arc<RwLock<Arc<DeclarationFinder>>>,
}

impl Backend {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            documents: Arc::new(RwLock::new(HashMap::new())),
            finder: Arc::new(RwLock::new(Arc::new(DeclarationFinder::new(
                ResolverConfig::default(),
            )))),
        }
    }

    /// Swap in a finder for `config`, keeping cached expansions when they are
    /// still valid. Returns true when the expansion cache was replaced.
    async fn apply_config(&self, config: ResolverConfig) -> bool {
        let mut finder = self.finder.write().await;
        let reuse = !finder.config().expansion_settings_changed(&config)
            && finder.config().expansion_cache_capacity == config.expansion_cache_capacity;
        let expansions = finder.expansions().clone();
        let mut replacement = DeclarationFinder::new(config);
        if reuse {
            replacement = replacement.with_expansion_cache(expansions);
        }
        log::info!(
            "Resolver configured (fallback root: {:?}, expander: {})",
            replacement.config().fallback_root,
            replacement.has_expander()
        );
        *finder = Arc::new(replacement);
        !reuse
    }

    /// File cache seeded with every open document
    async fn seeded_file_cache(&self) -> FileCache {
        let files = FileCache::new();
        let documents = self.documents.read().await;
        for (uri, text) in documents.iter() {
            if let Ok(path) = uri.to_file_path() {
                files.insert(&path, SourceBuffer::from_text(text));
            }
        }
        files
    }

    async fn definition(&self, uri: &Url, position: Position) -> Option<Location> {
        let path = uri.to_file_path().ok()?;
        let files = self.seeded_file_cache().await;
        let finder = self.finder.read().await.clone();

        let buffer = match files.get(&path) {
            Some(buffer) => buffer,
            None => {
                match files
                    .get_or_load(&path, &DiskFileAccessor, finder.config().encoding)
                    .await
                {
                    Ok(buffer) => buffer,
                    Err(e) => {
                        log::warn!("Failed to read '{}': {}", path.display(), e);
                        return None;
                    }
                }
            }
        };
        let line = buffer.line(position.line as usize)?;
        let (column, term) = identifier_at(line, position.character as usize)?;

        let query = Query::new(term, path, position.line as usize, column);
        let found = finder.find_declaration(&query, &files).await.ok()?;
        Some(to_location(uri, found))
    }
}

/// Log the number of macro expansions in flight until `cache` is dropped
fn watch_expansions(cache: &ExpansionCache) {
    let mut busy = cache.busy();
    tokio::spawn(async move {
        while busy.changed().await.is_ok() {
            let running = *busy.borrow_and_update();
            log::trace!("Macro expansions running: {}", running);
        }
    });
}

fn to_location(origin: &Url, found: DeclarationPosition) -> Location {
    let uri = found
        .file
        .and_then(|path| Url::from_file_path(path).ok())
        .unwrap_or_else(|| origin.clone());
    // Sources are single-byte encoded, so char offsets equal UTF-16 offsets
    let at = Position::new(found.line as u32, found.column as u32);
    Location::new(uri, Range::new(at, at))
}

#[tower_lsp::async_trait]
impl LanguageServer for Backend {
    async fn initialize(&self, params: InitializeParams) -> Result<InitializeResult> {
        log::info!("Initializing cobnav");

        if let Some(config) = params
            .initialization_options
            .as_ref()
            .and_then(parse_resolver_config)
        {
            self.apply_config(config).await;
        }

        Ok(InitializeResult {
            capabilities: ServerCapabilities {
                text_document_sync: Some(TextDocumentSyncCapability::Options(
                    TextDocumentSyncOptions {
                        open_close: Some(true),
                        change: Some(TextDocumentSyncKind::FULL),
                        save: Some(TextDocumentSyncSaveOptions::Supported(true)),
                        ..Default::default()
                    },
                )),
                definition_provider: Some(OneOf::Left(true)),
                ..Default::default()
            },
            server_info: Some(ServerInfo {
                name: String::from("cobnav"),
                version: Some(String::from(env!("CARGO_PKG_VERSION"))),
            }),
        })
    }

    async fn initialized(&self, _: InitializedParams) {
        log::info!("cobnav initialized");
        watch_expansions(self.finder.read().await.expansions());
        self.client
            .log_message(MessageType::INFO, "cobnav ready")
            .await;
    }

    async fn shutdown(&self) -> Result<()> {
        log::info!(
            "cobnav shutting down after {} macro expander runs",
            crate::perf::get_expander_runs()
        );
        Ok(())
    }

    async fn did_open(&self, params: DidOpenTextDocumentParams) {
        let uri = params.text_document.uri;
        log::trace!("Opened {}", uri);
        self.documents
            .write()
            .await
            .insert(uri, params.text_document.text);
    }

    async fn did_change(&self, params: DidChangeTextDocumentParams) {
        // Full sync: the last change carries the whole document
        let Some(change) = params.content_changes.into_iter().last() else {
            return;
        };
        self.documents
            .write()
            .await
            .insert(params.text_document.uri, change.text);
    }

    async fn did_save(&self, params: DidSaveTextDocumentParams) {
        let Ok(path) = params.text_document.uri.to_file_path() else {
            return;
        };
        log::trace!("Saved '{}', dropping its expansion", path.display());
        self.finder.read().await.expansions().invalidate(&path);
    }

    async fn did_close(&self, params: DidCloseTextDocumentParams) {
        self.documents
            .write()
            .await
            .remove(&params.text_document.uri);
    }

    async fn did_change_configuration(&self, params: DidChangeConfigurationParams) {
        log::trace!("Configuration changed");
        match parse_resolver_config(&params.settings) {
            Some(config) => {
                if self.apply_config(config).await {
                    watch_expansions(self.finder.read().await.expansions());
                }
            }
            None => log::warn!(
                "Failed to parse cobol configuration from settings, using existing configuration"
            ),
        }
    }

    async fn goto_definition(
        &self,
        params: GotoDefinitionParams,
    ) -> Result<Option<GotoDefinitionResponse>> {
        let _timing = crate::perf::TimingGuard::new("goto_definition");
        let uri = &params.text_document_position_params.text_document.uri;
        let position = params.text_document_position_params.position;
        Ok(self
            .definition(uri, position)
            .await
            .map(GotoDefinitionResponse::Scalar))
    }
}

pub async fn start_lsp() -> anyhow::Result<()> {
    let stdin = tokio::io::stdin();
    let stdout = tokio::io::stdout();

    let (service, socket) = LspService::new(Backend::new);
    Server::new(stdin, stdout, socket).serve(service).await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_resolver_config() {
        let settings = json!({
            "cobol": {
                "fallbackRoot": "/repo/classes",
                "encoding": "utf-8",
                "maxChainDepth": 8,
                "expanderCommand": "cobpp",
                "expanderArgs": ["-E", "{file}"],
                "expanderTimeoutMs": 1500,
                "expansionCacheCapacity": 16
            }
        });
        let config = parse_resolver_config(&settings).unwrap();
        assert_eq!(config.fallback_root, Some(PathBuf::from("/repo/classes")));
        assert_eq!(config.encoding, SourceEncoding::Utf8);
        assert_eq!(config.max_chain_depth, 8);
        assert_eq!(config.expander_command, Some(PathBuf::from("cobpp")));
        assert_eq!(config.expander_args, vec!["-E", "{file}"]);
        assert_eq!(config.expander_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.expansion_cache_capacity, 16);
    }

    #[test]
    fn test_absent_fields_keep_defaults() {
        let config = parse_resolver_config(&json!({ "cobol": { "maxChainDepth": 4 } })).unwrap();
        let defaults = ResolverConfig::default();
        assert_eq!(config.max_chain_depth, 4);
        assert_eq!(config.encoding, defaults.encoding);
        assert_eq!(config.fallback_root, defaults.fallback_root);
        assert_eq!(config.expansion_cache_capacity, defaults.expansion_cache_capacity);
    }

    #[test]
    fn test_unknown_encoding_keeps_default() {
        let config = parse_resolver_config(&json!({ "cobol": { "encoding": "ebcdic" } })).unwrap();
        assert_eq!(config.encoding, SourceEncoding::Latin1);
    }

    #[test]
    fn test_missing_or_malformed_section() {
        assert!(parse_resolver_config(&json!({ "other": {} })).is_none());
        assert!(parse_resolver_config(&json!({ "cobol": { "maxChainDepth": "deep" } })).is_none());
    }

    #[test]
    fn test_identifier_at() {
        let line = "           move ws-total to out-rec.";
        assert_eq!(identifier_at(line, 16), Some((16, "ws-total".into())));
        assert_eq!(identifier_at(line, 20), Some((16, "ws-total".into())));
        // Right after the identifier
        assert_eq!(identifier_at(line, 24), Some((16, "ws-total".into())));
        assert_eq!(identifier_at(line, 35), Some((28, "out-rec".into())));
        assert_eq!(identifier_at("   ", 1), None);
        assert_eq!(identifier_at("", 0), None);
    }

    #[test]
    fn test_local_position_keeps_origin_uri() {
        let origin = Url::parse("file:///src/MAIN.cbl").unwrap();
        let location = to_location(&origin, DeclarationPosition::local(3, 7));
        assert_eq!(location.uri, origin);
        assert_eq!(location.range.start, Position::new(3, 7));
    }

    #[cfg(unix)]
    #[test]
    fn test_remote_position_uses_its_file() {
        let origin = Url::parse("file:///src/MAIN.cbl").unwrap();
        let location = to_location(
            &origin,
            DeclarationPosition::in_file(1, 11, PathBuf::from("/src/CUSTREC.CPY")),
        );
        assert_eq!(location.uri.as_str(), "file:///src/CUSTREC.CPY");
    }
}
