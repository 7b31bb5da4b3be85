//! Process-wide tokenize+parse memoization.
//!
//! Entries are keyed by URI and invalidated by content hash. The cache is an
//! explicit service object handed to [`Parser`](crate::Parser) and the
//! context builder rather than an ambient singleton; [`reset`] exists for
//! test isolation and is only safe between top-level operations.
//!
//! [`reset`]: TokenizedDocumentCache::reset

use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use rustc_hash::{FxHashMap, FxHasher};
use tracing::debug;

use dts_diagnostic::{Diagnostic, SourceId};

use crate::ast::SourceDoc;
use crate::lexer::{tokenize_all, Token};
use crate::parser::parse_tokens;

/// One published tokenize+parse snapshot. Immutable once inserted; readers
/// hold the `Arc` and never observe partial state.
#[derive(Debug)]
pub struct CachedDocument {
    pub uri: SourceId,
    pub content_hash: u64,
    pub tokens: Arc<[Token]>,
    pub root: Arc<SourceDoc>,
    pub issues: Arc<[Diagnostic]>,
}

#[derive(Debug, Clone, Default)]
pub struct TokenizedDocumentCache {
    entries: Arc<Mutex<FxHashMap<SourceId, Arc<CachedDocument>>>>,
}

impl TokenizedDocumentCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current snapshot for `uri`, if any.
    pub fn get(&self, uri: &SourceId) -> Option<Arc<CachedDocument>> {
        self.entries.lock().expect("cache lock poisoned").get(uri).cloned()
    }

    /// Returns the cached parse when the content hash matches, otherwise
    /// tokenizes and parses `text` and publishes a fresh entry.
    ///
    /// The parse runs outside the lock; the lock only guards the publish.
    pub fn get_or_parse(
        &self,
        uri: &SourceId,
        text: &str,
        macros: &FxHashMap<String, String>,
    ) -> Arc<CachedDocument> {
        let hash = content_hash(text);
        if let Some(entry) = self.get(uri) {
            if entry.content_hash == hash {
                debug!(%uri, "document cache hit");
                return entry;
            }
        }

        debug!(%uri, "document cache miss, parsing");
        let (tokens, eof) = tokenize_all(text);
        let (root, issues) = parse_tokens(uri.clone(), &tokens, eof, macros);
        let entry = Arc::new(CachedDocument {
            uri: uri.clone(),
            content_hash: hash,
            tokens: tokens.into(),
            root: Arc::new(root),
            issues: issues.into(),
        });
        self.entries
            .lock()
            .expect("cache lock poisoned")
            .insert(uri.clone(), entry.clone());
        entry
    }

    /// Drops all entries. Test/teardown only.
    pub fn reset(&self) {
        self.entries.lock().expect("cache lock poisoned").clear();
    }
}

fn content_hash(text: &str) -> u64 {
    let mut hasher = FxHasher::default();
    text.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uri(name: &str) -> SourceId {
        SourceId::from(name)
    }

    #[test]
    fn same_content_reuses_the_parse() {
        let cache = TokenizedDocumentCache::new();
        let macros = FxHashMap::default();
        let uri = uri("file:///a.dts");

        let first = cache.get_or_parse(&uri, "/ {};", &macros);
        let second = cache.get_or_parse(&uri, "/ {};", &macros);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn changed_content_reparses() {
        let cache = TokenizedDocumentCache::new();
        let macros = FxHashMap::default();
        let uri = uri("file:///a.dts");

        let first = cache.get_or_parse(&uri, "/ {};", &macros);
        let second = cache.get_or_parse(&uri, "/ { x; };", &macros);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_ne!(first.content_hash, second.content_hash);

        // The new snapshot replaced the old one.
        let current = cache.get(&uri).unwrap();
        assert!(Arc::ptr_eq(&current, &second));
    }

    #[test]
    fn reset_clears_entries() {
        let cache = TokenizedDocumentCache::new();
        let macros = FxHashMap::default();
        let uri = uri("file:///a.dts");

        cache.get_or_parse(&uri, "/ {};", &macros);
        cache.reset();
        assert!(cache.get(&uri).is_none());
    }
}
