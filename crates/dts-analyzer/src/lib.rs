//! # Devicetree context analyzer
//!
//! Folds an ordered list of parsed files into one logical [`RuntimeNode`]
//! tree, applying override semantics (later definitions win), label-based
//! cross references and `/delete-node/` / `/delete-property/` directives.
//!
//! The fold is total: unresolved references, bad deletes and duplicate
//! definitions become [`ContextIssue`] diagnostics while the tree stays as
//! useful as possible.

use std::sync::Arc;

use rustc_hash::FxHashSet;
use tracing::{instrument, warn};
use vec1::Vec1;

use dts_diagnostic::{
    ContextIssue, Diagnostic, DiagnosticTag, SourceId, SrcSpan,
};
use dts_parser::ast::{
    ChildNode, Declaration, DeleteNode, DeleteProperty, DeleteTarget, Element, ElementRef,
    LabelAssign, NodeBody, Property, RefNode, Reference, SourceDoc,
};
use dts_parser::TokenizedDocumentCache;

pub use string::{unescape, StringParseError};
pub use tree::{
    NodeDefinition, PropertyDefinition, RefEntry, RuntimeNode, RuntimeProperty,
};
pub use value::{
    classify_value, value_profile, ArrayItem, PhandleTarget, PropertyType, Value, ValueError,
};

pub mod string;
#[cfg(test)]
mod tests;
pub mod tree;
pub mod value;

/// What a label is attached to. Distinct owners with the same label text are
/// a conflict; re-labeling the same object is not.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelOwner {
    Node(Vec<String>),
    Property(Vec<String>, String),
}

impl LabelOwner {
    fn node_path(&self) -> &[String] {
        match self {
            Self::Node(path) => path,
            Self::Property(path, _) => path,
        }
    }
}

/// One `label:` assignment somewhere in the context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelEntry {
    pub name: String,
    pub owner: LabelOwner,
    pub assign: LabelAssign,
    pub uri: SourceId,
}

/// The resolved context for an ordered set of files.
///
/// Built fresh per invocation and immutable afterwards; the validator
/// accumulates its diagnostics in its own list.
#[derive(Debug)]
pub struct ContextAware {
    pub root: RuntimeNode,
    pub issues: Vec<Diagnostic>,
    pub file_map: Vec<SourceId>,
    labels: Vec<LabelEntry>,
    documents: Vec<Arc<SourceDoc>>,
}

impl ContextAware {
    /// Folds the cached parses of `file_map`, in order. Files missing from
    /// the cache are skipped; parsing them first is the caller's job.
    #[instrument(skip(cache), fields(files = file_map.len()))]
    pub fn new(file_map: Vec<SourceId>, cache: &TokenizedDocumentCache) -> Self {
        let mut builder = TreeBuilder {
            root: RuntimeNode::new("/", Vec::new()),
            labels: Vec::new(),
            issues: Vec::new(),
        };

        let mut documents = Vec::new();
        for uri in &file_map {
            match cache.get(uri) {
                Some(entry) => {
                    builder.fold_document(&entry.root);
                    documents.push(entry.root.clone());
                }
                None => warn!(%uri, "no cached parse for file, skipping"),
            }
        }
        builder.check_label_pool();

        Self {
            root: builder.root,
            issues: builder.issues,
            file_map,
            labels: builder.labels,
            documents,
        }
    }

    /// The node at an absolute path (segments below `/`).
    pub fn node_at_path(&self, path: &[String]) -> Option<&RuntimeNode> {
        self.root.node_at(path)
    }

    /// First label entry with this text, in file-map + document order.
    pub fn find_label(&self, name: &str) -> Option<&LabelEntry> {
        self.labels.iter().find(|entry| entry.name == name)
    }

    pub fn labels(&self) -> impl Iterator<Item = &LabelEntry> {
        self.labels.iter()
    }

    /// The node a label refers to, if the label names a node.
    pub fn node_by_label(&self, name: &str) -> Option<&RuntimeNode> {
        let entry = self.find_label(name)?;
        match &entry.owner {
            LabelOwner::Node(path) => self.node_at_path(path),
            LabelOwner::Property(..) => None,
        }
    }

    /// Resolves a path whose head may be a `&label` reference to an
    /// absolute path. Deterministic under a fixed file map: the first
    /// matching label wins.
    pub fn resolve_path(&self, segments: &[String]) -> Option<Vec<String>> {
        let mut segments = segments.to_vec();
        loop {
            let first = segments.first()?;
            let Some(label) = first.strip_prefix('&') else {
                return Some(segments);
            };
            let entry = self
                .labels
                .iter()
                .find(|entry| entry.name == label && matches!(entry.owner, LabelOwner::Node(_)))?;
            let mut resolved = entry.owner.node_path().to_vec();
            resolved.extend(segments.into_iter().skip(1));
            segments = resolved;
        }
    }

    /// The deepest AST element at a position in one of the context's files.
    pub fn element_at(&self, uri: &SourceId, line: u32, col: u32) -> Option<ElementRef<'_>> {
        self.documents
            .iter()
            .find(|doc| &doc.uri == uri)?
            .element_at(line, col)
    }
}

struct TreeBuilder {
    root: RuntimeNode,
    labels: Vec<LabelEntry>,
    issues: Vec<Diagnostic>,
}

impl TreeBuilder {
    fn node_mut(&mut self, path: &[String]) -> Option<&mut RuntimeNode> {
        let mut node = &mut self.root;
        for segment in path {
            node = node.child_mut(segment)?;
        }
        Some(node)
    }

    fn issue(&mut self, kind: ContextIssue, uri: &SourceId, span: SrcSpan) -> &mut Diagnostic {
        self.issues.push(Diagnostic::new(kind, uri.clone(), span));
        self.issues.last_mut().expect("just pushed")
    }

    fn fold_document(&mut self, doc: &SourceDoc) {
        let uri = &doc.uri;
        for decl in &doc.declarations {
            match decl {
                Declaration::Root(root) => {
                    self.root.definitions.push(NodeDefinition::Root {
                        uri: uri.clone(),
                        ast: root.clone(),
                    });
                    self.root.labels.extend(root.labels.iter().cloned());
                    self.register_labels(&root.labels, LabelOwner::Node(Vec::new()), uri);
                    self.merge_body(&[], &root.body, uri);
                }
                // The parser flags top-level named nodes; they still merge
                // under `/` so the rest of the pipeline sees them.
                Declaration::Child(child) => {
                    let mut seen = FxHashSet::default();
                    self.merge_child(&[], child, uri, &mut seen);
                }
                Declaration::Ref(ref_node) => self.merge_ref(ref_node, uri),
                Declaration::Property(prop) => self.merge_property(&[], prop, uri),
                Declaration::DeleteNode(del) => self.delete_node(&[], del, uri),
                Declaration::DeleteProperty(del) => self.delete_property(&[], del, uri),
                Declaration::Directive(_) | Declaration::Invalid(_) => {}
            }
        }
    }

    fn merge_body(&mut self, path: &[String], body: &NodeBody, uri: &SourceId) {
        // Sibling-name uniqueness is scoped to one block.
        let mut seen = FxHashSet::default();
        for decl in &body.declarations {
            match decl {
                Declaration::Child(child) => self.merge_child(path, child, uri, &mut seen),
                Declaration::Property(prop) => self.merge_property(path, prop, uri),
                Declaration::DeleteNode(del) => self.delete_node(path, del, uri),
                Declaration::DeleteProperty(del) => self.delete_property(path, del, uri),
                // Root and ref blocks cannot nest; the parser already turned
                // them into invalid elements.
                _ => {}
            }
        }
    }

    fn merge_child(
        &mut self,
        parent_path: &[String],
        ast: &Arc<ChildNode>,
        uri: &SourceId,
        seen: &mut FxHashSet<String>,
    ) {
        let Some(name_ast) = &ast.name else {
            // Nameless nodes stay AST-only; the parser flagged them.
            return;
        };
        let name = name_ast.full_name();
        if name.is_empty() {
            return;
        }
        let duplicate_sibling = !seen.insert(name.clone());

        let (child_path, previous) = {
            // The merge point can vanish mid-body when a delete removed an
            // ancestor; the remaining declarations have nowhere to go.
            let Some(parent) = self.node_mut(parent_path) else {
                return;
            };
            if parent.child(&name).is_none() {
                let mut path = parent_path.to_vec();
                path.push(name.clone());
                parent.children.push(RuntimeNode::new(name.clone(), path));
            }
            let child = parent.child_mut(&name).expect("created above");
            let previous = child
                .definitions
                .last()
                .map(|def| (def.uri().clone(), def.name_span()));
            child.definitions.push(NodeDefinition::Child {
                uri: uri.clone(),
                ast: ast.clone(),
            });
            child.labels.extend(ast.labels.iter().cloned());
            (child.path.clone(), previous)
        };

        if duplicate_sibling {
            let diag = self.issue(
                ContextIssue::DuplicateNodeName,
                uri,
                name_ast.name_span(),
            );
            diag.args.push(name.clone());
            if let Some((prev_uri, prev_span)) = previous {
                diag.linked_to.push(dts_diagnostic::Linked {
                    uri: prev_uri,
                    span: prev_span,
                });
            }
        }

        self.register_labels(&ast.labels, LabelOwner::Node(child_path.clone()), uri);
        self.merge_body(&child_path, &ast.body, uri);
    }

    fn merge_property(&mut self, path: &[String], ast: &Arc<Property>, uri: &SourceId) {
        let name = ast.name.text.clone();
        if name.is_empty() {
            return;
        }

        let shadowed = {
            let Some(node) = self.node_mut(path) else {
                return;
            };
            match node.properties.iter_mut().find(|prop| prop.name == name) {
                Some(existing) => {
                    let previous = existing.current().clone();
                    existing.definitions.push(PropertyDefinition {
                        uri: uri.clone(),
                        ast: ast.clone(),
                    });
                    Some(previous)
                }
                None => {
                    node.properties.push(RuntimeProperty {
                        name: name.clone(),
                        definitions: Vec1::new(PropertyDefinition {
                            uri: uri.clone(),
                            ast: ast.clone(),
                        }),
                    });
                    None
                }
            }
        };

        // The earlier definition gains the hint; the effective one stays
        // clean.
        if let Some(previous) = shadowed {
            let span = previous.ast.span();
            let diag = self.issue(ContextIssue::DuplicatePropertyName, &previous.uri, span);
            diag.args.push(name.clone());
            diag.tags.push(DiagnosticTag::Unnecessary);
            diag.linked_to.push(dts_diagnostic::Linked {
                uri: uri.clone(),
                span: ast.span(),
            });
        }

        self.register_labels(
            &ast.labels,
            LabelOwner::Property(path.to_vec(), name),
            uri,
        );
    }

    fn merge_ref(&mut self, ast: &Arc<RefNode>, uri: &SourceId) {
        let target = match &ast.reference {
            Reference::Label(label) if !label.value.is_empty() => {
                self.resolve_label(&label.value)
            }
            Reference::Path(path_ref) => {
                let path = path_ref.segments.clone();
                self.root.node_at(&path).is_some().then_some(path)
            }
            Reference::Label(_) => None,
        };

        let Some(path) = target else {
            let display = match &ast.reference {
                Reference::Label(label) => format!("&{}", label.value),
                Reference::Path(path_ref) => format!("&{{/{}}}", path_ref.segments.join("/")),
            };
            self.issue(
                ContextIssue::UnableToResolveChildNode,
                uri,
                ast.reference.span(),
            )
            .args
            .push(display);
            return;
        };

        {
            let node = self
                .node_mut(&path)
                .expect("labels always point at live nodes");
            node.referenced_by.push(RefEntry {
                uri: uri.clone(),
                ast: ast.clone(),
            });
            node.labels.extend(ast.labels.iter().cloned());
        }
        self.register_labels(&ast.labels, LabelOwner::Node(path.clone()), uri);
        self.merge_body(&path, &ast.body, uri);
    }

    fn delete_node(&mut self, path: &[String], del: &Arc<DeleteNode>, uri: &SourceId) {
        let target_path = match &del.target {
            DeleteTarget::Name(name) => {
                if name.text.is_empty() {
                    return;
                }
                let mut target = path.to_vec();
                target.push(name.text.clone());
                Some(target)
            }
            DeleteTarget::Ref(label) => self.resolve_label(&label.value),
            DeleteTarget::Path(path_ref) => Some(path_ref.segments.clone()),
        };

        let removed = target_path.as_ref().is_some_and(|target| {
            let Some((name, parent_path)) = target.split_last() else {
                return false;
            };
            let Some(parent) = self.node_mut(parent_path) else {
                return false;
            };
            let Some(idx) = parent
                .children
                .iter()
                .position(|child| &child.name == name)
            else {
                return false;
            };
            parent.children.remove(idx);
            true
        });

        if let Some(target) = &target_path {
            if removed {
                // Labels of a detached subtree leave the pool with it.
                self.labels
                    .retain(|entry| !entry.owner.node_path().starts_with(target));
                return;
            }
        }

        let display = match &del.target {
            DeleteTarget::Name(name) => name.text.clone(),
            DeleteTarget::Ref(label) => format!("&{}", label.value),
            DeleteTarget::Path(path_ref) => format!("&{{/{}}}", path_ref.segments.join("/")),
        };
        self.issue(ContextIssue::NodeDoesNotExist, uri, del.target.span())
            .args
            .push(display);
    }

    fn delete_property(&mut self, path: &[String], del: &Arc<DeleteProperty>, uri: &SourceId) {
        let name = del.name.text.clone();
        if name.is_empty() {
            return;
        }

        let removed = {
            let Some(node) = self.node_mut(path) else {
                return;
            };
            match node.properties.iter().position(|prop| prop.name == name) {
                Some(idx) => {
                    node.properties.remove(idx);
                    true
                }
                None => false,
            }
        };

        if removed {
            self.labels.retain(|entry| {
                entry.owner != LabelOwner::Property(path.to_vec(), name.clone())
            });
        } else {
            self.issue(ContextIssue::PropertyDoesNotExist, uri, del.name.span())
                .args
                .push(name);
        }
    }

    fn register_labels(&mut self, labels: &[LabelAssign], owner: LabelOwner, uri: &SourceId) {
        for label in labels {
            self.labels.push(LabelEntry {
                name: label.name.clone(),
                owner: owner.clone(),
                assign: label.clone(),
                uri: uri.clone(),
            });
        }
    }

    fn resolve_label(&self, name: &str) -> Option<Vec<String>> {
        self.labels.iter().find_map(|entry| match &entry.owner {
            LabelOwner::Node(path) if entry.name == name => Some(path.clone()),
            _ => None,
        })
    }

    /// A label text used for more than one logical object flags the
    /// last-seen assignment, linking the earlier conflicting ones.
    fn check_label_pool(&mut self) {
        let mut order: Vec<String> = Vec::new();
        let mut seen: FxHashSet<&str> = FxHashSet::default();
        for entry in &self.labels {
            if seen.insert(entry.name.as_str()) {
                order.push(entry.name.clone());
            }
        }

        for name in order {
            let group: Vec<&LabelEntry> = self
                .labels
                .iter()
                .filter(|entry| entry.name == name)
                .collect();
            let last = group.last().expect("group built from existing entries");
            let conflicting: Vec<_> = group[..group.len() - 1]
                .iter()
                .filter(|entry| entry.owner != last.owner)
                .map(|entry| dts_diagnostic::Linked {
                    uri: entry.uri.clone(),
                    span: entry.assign.span(),
                })
                .collect();
            if conflicting.is_empty() {
                continue;
            }
            let uri = last.uri.clone();
            let span = last.assign.span();
            let diag = self.issue(ContextIssue::LabelAlreadyInUse, &uri, span);
            diag.args.push(name);
            diag.linked_to = conflicting;
        }
    }
}
