//! The logical device tree produced by folding parsed files.

use std::sync::Arc;

use vec1::Vec1;

use dts_diagnostic::{SourceId, SrcSpan};
use dts_parser::ast::{ChildNode, Element, LabelAssign, Property, RefNode, RootNode};

/// Where every AST node definition of a [`RuntimeNode`] came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeDefinition {
    Root { uri: SourceId, ast: Arc<RootNode> },
    Child { uri: SourceId, ast: Arc<ChildNode> },
}

impl NodeDefinition {
    pub fn uri(&self) -> &SourceId {
        match self {
            Self::Root { uri, .. } | Self::Child { uri, .. } => uri,
        }
    }

    pub fn span(&self) -> SrcSpan {
        match self {
            Self::Root { ast, .. } => ast.span(),
            Self::Child { ast, .. } => ast.span(),
        }
    }

    /// The span of the defining name, falling back to the whole definition.
    pub fn name_span(&self) -> SrcSpan {
        match self {
            Self::Root { ast, .. } => SrcSpan::point(ast.first.pos),
            Self::Child { ast, .. } => ast
                .name
                .as_ref()
                .map(|name| name.name_span())
                .unwrap_or_else(|| ast.span()),
        }
    }
}

/// A `&label { … }` block that merged into a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefEntry {
    pub uri: SourceId,
    pub ast: Arc<RefNode>,
}

/// One logical property. The last definition wins; earlier ones stay
/// reachable for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeProperty {
    pub name: String,
    /// Oldest first; never empty.
    pub definitions: Vec1<PropertyDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyDefinition {
    pub uri: SourceId,
    pub ast: Arc<Property>,
}

impl RuntimeProperty {
    /// The effective definition.
    pub fn current(&self) -> &PropertyDefinition {
        self.definitions.last()
    }

    /// The shadowed definitions, oldest first.
    pub fn replaced(&self) -> &[PropertyDefinition] {
        let all = self.definitions.as_slice();
        &all[..all.len() - 1]
    }
}

/// One logical node, identified by its path from `/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeNode {
    /// Node identity including the unit address (`serial@10000000`); `/`
    /// for the root.
    pub name: String,
    /// Path segments from the root; empty for the root itself.
    pub path: Vec<String>,
    /// Insertion-ordered.
    pub children: Vec<RuntimeNode>,
    /// Insertion-ordered.
    pub properties: Vec<RuntimeProperty>,
    /// Every AST definition that contributed to this node, in merge order.
    pub definitions: Vec<NodeDefinition>,
    /// Every `&label { … }` block that merged into this node.
    pub referenced_by: Vec<RefEntry>,
    /// Union of all labels assigned to this node.
    pub labels: Vec<LabelAssign>,
}

impl RuntimeNode {
    pub fn new(name: impl Into<String>, path: Vec<String>) -> Self {
        Self {
            name: name.into(),
            path,
            children: Vec::new(),
            properties: Vec::new(),
            definitions: Vec::new(),
            referenced_by: Vec::new(),
            labels: Vec::new(),
        }
    }

    pub fn child(&self, name: &str) -> Option<&RuntimeNode> {
        self.children.iter().find(|child| child.name == name)
    }

    pub(crate) fn child_mut(&mut self, name: &str) -> Option<&mut RuntimeNode> {
        self.children.iter_mut().find(|child| child.name == name)
    }

    pub fn property(&self, name: &str) -> Option<&RuntimeProperty> {
        self.properties.iter().find(|prop| prop.name == name)
    }

    /// Descends along `rel` from this node.
    pub fn node_at(&self, rel: &[String]) -> Option<&RuntimeNode> {
        rel.iter()
            .try_fold(self, |node, segment| node.child(segment))
    }

    /// This node and all descendants, preorder.
    pub fn dfs(&self) -> Box<dyn Iterator<Item = &RuntimeNode> + '_> {
        Box::new(
            std::iter::once(self).chain(self.children.iter().flat_map(|child| child.dfs())),
        )
    }

    pub fn path_string(&self) -> String {
        if self.path.is_empty() {
            "/".to_owned()
        } else {
            format!("/{}", self.path.join("/"))
        }
    }

    pub fn last_definition(&self) -> Option<&NodeDefinition> {
        self.definitions.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn path_strings() {
        let root = RuntimeNode::new("/", Vec::new());
        assert_eq!(root.path_string(), "/");

        let node = RuntimeNode::new(
            "uart@0",
            vec!["soc".to_owned(), "uart@0".to_owned()],
        );
        assert_eq!(node.path_string(), "/soc/uart@0");
    }

    #[test]
    fn node_at_descends() {
        let mut root = RuntimeNode::new("/", Vec::new());
        let mut soc = RuntimeNode::new("soc", vec!["soc".to_owned()]);
        soc.children.push(RuntimeNode::new(
            "uart@0",
            vec!["soc".to_owned(), "uart@0".to_owned()],
        ));
        root.children.push(soc);

        let path = ["soc".to_owned(), "uart@0".to_owned()];
        assert_eq!(root.node_at(&path).unwrap().name, "uart@0");
        assert!(root.node_at(&["missing".to_owned()]).is_none());

        assert_eq!(root.dfs().count(), 3);
    }
}
