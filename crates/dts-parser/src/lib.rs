//! # Devicetree source parser
//!
//! Tokenizer, recovering parser and AST for [Devicetree][1] source files,
//! plus the process-wide document cache the rest of the language-service
//! core consumes parses from.
//!
//! Every stage is total: any byte sequence tokenizes, any token stream
//! parses, and problems surface as diagnostics on AST elements instead of
//! errors. Only unreadable sources and cancellation abort a parse.
//!
//! [1]: https://www.devicetree.org/

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, warn};

pub use dts_diagnostic::SourceId;

pub use cache::{CachedDocument, TokenizedDocumentCache};
pub use parser::parse_source;

pub mod ast;
pub mod cache;
pub mod lexer;
mod parser;

/// Maps a URI to source text. Filesystem and include-path handling live
/// behind this seam; the core never touches the filesystem itself.
pub trait SourceProvider {
    fn read(&self, uri: &SourceId) -> Result<Arc<str>, SourceError>;
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum SourceError {
    #[error("source not found: {0}")]
    NotFound(SourceId),
    #[error("failed to read {0}: {1}")]
    Io(SourceId, String),
}

/// In-memory provider, used by tests and embedders that manage documents
/// themselves.
#[derive(Debug, Clone, Default)]
pub struct MemorySourceProvider {
    files: FxHashMap<SourceId, Arc<str>>,
}

impl MemorySourceProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, uri: impl Into<SourceId>, text: impl Into<Arc<str>>) {
        self.files.insert(uri.into(), text.into());
    }
}

impl<U: Into<SourceId> + Clone, T: Into<Arc<str>> + Clone> FromIterator<(U, T)>
    for MemorySourceProvider
{
    fn from_iter<I: IntoIterator<Item = (U, T)>>(iter: I) -> Self {
        let mut provider = Self::new();
        for (uri, text) in iter {
            provider.insert(uri, text);
        }
        provider
    }
}

impl SourceProvider for MemorySourceProvider {
    fn read(&self, uri: &SourceId) -> Result<Arc<str>, SourceError> {
        self.files
            .get(uri)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(uri.clone()))
    }
}

/// Cooperative cancellation flag, checked at every suspension point.
#[derive(Debug, Clone, Default)]
pub struct Cancellation(Arc<AtomicBool>);

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ParseAbort {
    /// The handle was cancelled; no partial AST was published.
    #[error("parse cancelled")]
    Cancelled,
    #[error(transparent)]
    Source(#[from] SourceError),
}

/// A parsed file together with its resolved includes.
#[derive(Debug)]
pub struct ParsedDocument {
    pub uri: SourceId,
    pub root: Arc<ast::SourceDoc>,
    pub tokens: Arc<[lexer::Token]>,
    pub issues: Vec<dts_diagnostic::Diagnostic>,
    /// Directly included documents, in include order. Each is parsed into
    /// the cache by [`Parser::stable`].
    pub includes: Vec<SourceId>,
}

/// Configured parse of one document and its includes.
///
/// [`stable`](Self::stable) is the one-shot handle of the pipeline: it
/// blocks until the document has reached a stable parse (source loaded,
/// includes resolved, cache published) and can be awaited from a
/// single-threaded executor by running it as a task.
#[derive(Debug, Clone)]
pub struct Parser {
    uri: SourceId,
    /// Preprocessor macro overrides substituted inside cell arrays. Nothing
    /// else of the preprocessor is evaluated.
    macros: FxHashMap<String, String>,
    /// Directories searched for `/include/` and `#include` targets, after
    /// the including file's own directory.
    include_dirs: Vec<String>,
}

impl Parser {
    pub fn new(
        uri: impl Into<SourceId>,
        macros: FxHashMap<String, String>,
        include_dirs: Vec<String>,
    ) -> Self {
        Self {
            uri: uri.into(),
            macros,
            include_dirs,
        }
    }

    /// Parses the document, resolving includes through `provider` and
    /// memoizing every file in `cache`.
    ///
    /// Suspension points (source reads, include loads, cache lookups) check
    /// `cancel`; a cancelled parse returns [`ParseAbort::Cancelled`] without
    /// publishing anything for the root document.
    pub fn stable(
        &self,
        provider: &dyn SourceProvider,
        cache: &TokenizedDocumentCache,
        cancel: &Cancellation,
    ) -> Result<Arc<ParsedDocument>, ParseAbort> {
        let mut visited = FxHashSet::default();
        visited.insert(self.uri.clone());
        self.load(&self.uri, provider, cache, cancel, &mut visited)
    }

    fn load(
        &self,
        uri: &SourceId,
        provider: &dyn SourceProvider,
        cache: &TokenizedDocumentCache,
        cancel: &Cancellation,
        visited: &mut FxHashSet<SourceId>,
    ) -> Result<Arc<ParsedDocument>, ParseAbort> {
        if cancel.is_cancelled() {
            return Err(ParseAbort::Cancelled);
        }
        let text = provider.read(uri)?;

        if cancel.is_cancelled() {
            return Err(ParseAbort::Cancelled);
        }
        let entry = cache.get_or_parse(uri, &text, &self.macros);

        let mut includes = Vec::new();
        for (_, path) in entry.root.includes() {
            if cancel.is_cancelled() {
                return Err(ParseAbort::Cancelled);
            }
            match self.resolve_include(uri, path, provider) {
                Some((include_uri, _)) => {
                    if visited.insert(include_uri.clone()) {
                        // Parse the include into the cache; its own issues
                        // surface when the context asks for that file.
                        self.load(&include_uri, provider, cache, cancel, visited)?;
                    } else {
                        debug!(%include_uri, "include cycle broken");
                    }
                    includes.push(include_uri);
                }
                None => {
                    warn!(%uri, path, "include not found on any search path");
                }
            }
        }

        Ok(Arc::new(ParsedDocument {
            uri: uri.clone(),
            root: entry.root.clone(),
            tokens: entry.tokens.clone(),
            issues: entry.issues.to_vec(),
            includes,
        }))
    }

    /// The including file's directory is searched first, then the
    /// configured include directories.
    fn resolve_include(
        &self,
        from: &SourceId,
        path: &str,
        provider: &dyn SourceProvider,
    ) -> Option<(SourceId, Arc<str>)> {
        let parent = from.rsplit_once('/').map(|(dir, _)| dir);
        parent
            .into_iter()
            .map(str::to_owned)
            .chain(self.include_dirs.iter().cloned())
            .map(|dir| SourceId::from(format!("{dir}/{path}")))
            .find_map(|candidate| {
                let text = provider.read(&candidate).ok()?;
                Some((candidate, text))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn provider(files: &[(&str, &str)]) -> MemorySourceProvider {
        files.iter().copied().collect()
    }

    #[test]
    fn stable_parses_document_and_includes() {
        let provider = provider(&[
            ("file:///board.dts", "/include/ \"soc.dtsi\"\n/ { x; };"),
            ("file:///soc.dtsi", "/ { soc {}; };"),
        ]);
        let cache = TokenizedDocumentCache::new();
        let parser = Parser::new("file:///board.dts", FxHashMap::default(), Vec::new());

        let doc = parser
            .stable(&provider, &cache, &Cancellation::new())
            .unwrap();
        assert_eq!(doc.includes, vec![SourceId::from("file:///soc.dtsi")]);
        // The include was parsed into the cache too.
        assert!(cache.get(&SourceId::from("file:///soc.dtsi")).is_some());
    }

    #[test]
    fn include_dirs_are_searched_in_order() {
        let provider = provider(&[
            ("file:///src/board.dts", "#include <irq.h>"),
            ("file:///inc/irq.h", "#define IRQ 1"),
        ]);
        let cache = TokenizedDocumentCache::new();
        let parser = Parser::new(
            "file:///src/board.dts",
            FxHashMap::default(),
            vec!["file:///inc".to_owned()],
        );

        let doc = parser
            .stable(&provider, &cache, &Cancellation::new())
            .unwrap();
        assert_eq!(doc.includes, vec![SourceId::from("file:///inc/irq.h")]);
    }

    #[test]
    fn include_cycles_terminate() {
        let provider = provider(&[
            ("file:///a.dtsi", "/include/ \"b.dtsi\"\n/ { a; };"),
            ("file:///b.dtsi", "/include/ \"a.dtsi\"\n/ { b; };"),
        ]);
        let cache = TokenizedDocumentCache::new();
        let parser = Parser::new("file:///a.dtsi", FxHashMap::default(), Vec::new());

        let doc = parser
            .stable(&provider, &cache, &Cancellation::new())
            .unwrap();
        assert_eq!(doc.includes, vec![SourceId::from("file:///b.dtsi")]);
    }

    #[test]
    fn missing_source_is_fatal() {
        let provider = MemorySourceProvider::new();
        let cache = TokenizedDocumentCache::new();
        let parser = Parser::new("file:///gone.dts", FxHashMap::default(), Vec::new());

        let err = parser
            .stable(&provider, &cache, &Cancellation::new())
            .unwrap_err();
        assert!(matches!(err, ParseAbort::Source(SourceError::NotFound(_))));
    }

    #[test]
    fn cancellation_aborts_before_publishing() {
        let provider = provider(&[("file:///a.dts", "/ {};")]);
        let cache = TokenizedDocumentCache::new();
        let parser = Parser::new("file:///a.dts", FxHashMap::default(), Vec::new());

        let cancel = Cancellation::new();
        cancel.cancel();
        let err = parser.stable(&provider, &cache, &cancel).unwrap_err();
        assert!(matches!(err, ParseAbort::Cancelled));
        assert!(cache.get(&SourceId::from("file:///a.dts")).is_none());
    }
}
