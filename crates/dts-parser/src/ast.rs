//! Abstract syntax trees.
//!
//! Every element carries its first and last token; child ranges nest within
//! their parent's range. Elements the parser could not complete stay in the
//! tree (a [`ChildNode`] may have no [`NodeName`], an [`InvalidElement`]
//! keeps the tokens recovery skipped) so that diagnostics always have a
//! concrete element to anchor to.

use std::sync::Arc;

use enum_as_inner::EnumAsInner;

use dts_diagnostic::{SourceId, SrcSpan};

use crate::lexer::Token;

/// Common surface of all AST elements.
pub trait Element {
    fn first_token(&self) -> &Token;
    fn last_token(&self) -> &Token;

    fn span(&self) -> SrcSpan {
        SrcSpan::new(self.first_token().pos, self.last_token().pos)
    }
}

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDoc {
    pub uri: SourceId,
    pub declarations: Vec<Declaration>,
    pub first: Token,
    pub last: Token,
}

impl Element for SourceDoc {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

impl SourceDoc {
    /// Include directives in document order.
    pub fn includes(&self) -> impl Iterator<Item = (&DirectiveStmt, &str)> + '_ {
        self.declarations.iter().filter_map(|decl| {
            let dir = decl.as_directive()?;
            match &dir.kind {
                DirectiveKind::Include { path, .. } => Some((dir.as_ref(), path.as_str())),
                _ => None,
            }
        })
    }

    /// Returns the deepest element containing the character at `(line, col)`.
    pub fn element_at(&self, line: u32, col: u32) -> Option<ElementRef<'_>> {
        fn descend<'a>(current: ElementRef<'a>, line: u32, col: u32) -> ElementRef<'a> {
            for child in current.children() {
                if child.span().contains(line, col) {
                    return descend(child, line, col);
                }
            }
            current
        }

        let root = ElementRef::Doc(self);
        root.span()
            .contains(line, col)
            .then(|| descend(root, line, col))
    }
}

/// One top-level or node-body statement.
#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Declaration {
    Root(Arc<RootNode>),
    Child(Arc<ChildNode>),
    Ref(Arc<RefNode>),
    Property(Arc<Property>),
    DeleteNode(Arc<DeleteNode>),
    DeleteProperty(Arc<DeleteProperty>),
    Directive(Arc<DirectiveStmt>),
    Invalid(Arc<InvalidElement>),
}

impl Declaration {
    pub fn as_element(&self) -> ElementRef<'_> {
        match self {
            Self::Root(it) => ElementRef::Root(it),
            Self::Child(it) => ElementRef::Child(it),
            Self::Ref(it) => ElementRef::Ref(it),
            Self::Property(it) => ElementRef::Property(it),
            Self::DeleteNode(it) => ElementRef::DeleteNode(it),
            Self::DeleteProperty(it) => ElementRef::DeleteProperty(it),
            Self::Directive(it) => ElementRef::Directive(it),
            Self::Invalid(it) => ElementRef::Invalid(it),
        }
    }
}

impl Element for Declaration {
    fn first_token(&self) -> &Token {
        match self {
            Self::Root(it) => it.first_token(),
            Self::Child(it) => it.first_token(),
            Self::Ref(it) => it.first_token(),
            Self::Property(it) => it.first_token(),
            Self::DeleteNode(it) => it.first_token(),
            Self::DeleteProperty(it) => it.first_token(),
            Self::Directive(it) => it.first_token(),
            Self::Invalid(it) => it.first_token(),
        }
    }
    fn last_token(&self) -> &Token {
        match self {
            Self::Root(it) => it.last_token(),
            Self::Child(it) => it.last_token(),
            Self::Ref(it) => it.last_token(),
            Self::Property(it) => it.last_token(),
            Self::DeleteNode(it) => it.last_token(),
            Self::DeleteProperty(it) => it.last_token(),
            Self::Directive(it) => it.last_token(),
            Self::Invalid(it) => it.last_token(),
        }
    }
}

/// The brace-delimited contents of a node.
///
/// `close` is `None` only while parsing; an unclosed body gets a synthetic
/// zero-length token at end-of-file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeBody {
    pub declarations: Vec<Declaration>,
    pub open: Token,
    pub close: Token,
    /// True when `close` was synthesized at end-of-file.
    pub close_synthetic: bool,
}

/// A `/ { … };` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootNode {
    pub labels: Vec<LabelAssign>,
    pub body: NodeBody,
    pub first: Token,
    pub last: Token,
}

impl Element for RootNode {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// A named node, `name[@address] { … };`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildNode {
    pub labels: Vec<LabelAssign>,
    /// Missing when recovery could not produce a name; the node still exists.
    pub name: Option<NodeName>,
    pub body: NodeBody,
    pub first: Token,
    pub last: Token,
}

impl Element for ChildNode {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// A node name with its optional unit address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeName {
    pub name: String,
    /// Unit addresses are hexadecimal, with or without a `0x` prefix.
    pub address: Option<u64>,
    pub name_first: Token,
    pub name_last: Token,
    pub at: Option<Token>,
    pub address_first: Option<Token>,
    pub address_last: Option<Token>,
}

impl NodeName {
    /// The span of the name alone, excluding `@` and the address.
    pub fn name_span(&self) -> SrcSpan {
        SrcSpan::new(self.name_first.pos, self.name_last.pos)
    }

    /// Node identity as it appears in paths: `name` or `name@addr`.
    pub fn full_name(&self) -> String {
        match self.address {
            Some(addr) => format!("{}@{:x}", self.name, addr),
            None => self.name.clone(),
        }
    }
}

impl Element for NodeName {
    fn first_token(&self) -> &Token {
        &self.name_first
    }
    fn last_token(&self) -> &Token {
        self.address_last
            .as_ref()
            .or(self.at.as_ref())
            .unwrap_or(&self.name_last)
    }
}

/// A `&label { … };` or `&{/path} { … };` extension block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefNode {
    pub labels: Vec<LabelAssign>,
    pub reference: Reference,
    pub body: NodeBody,
    pub first: Token,
    pub last: Token,
}

impl Element for RefNode {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Reference {
    Label(LabelRef),
    Path(NodePathRef),
}

impl Element for Reference {
    fn first_token(&self) -> &Token {
        match self {
            Self::Label(it) => it.first_token(),
            Self::Path(it) => it.first_token(),
        }
    }
    fn last_token(&self) -> &Token {
        match self {
            Self::Label(it) => it.last_token(),
            Self::Path(it) => it.last_token(),
        }
    }
}

/// A `label:` prefix attached to the following element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelAssign {
    pub name: String,
    pub first: Token,
    /// The colon.
    pub last: Token,
}

impl Element for LabelAssign {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// `&name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelRef {
    pub value: String,
    pub first: Token,
    pub last: Token,
}

impl Element for LabelRef {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// `&{/absolute/path}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodePathRef {
    pub segments: Vec<String>,
    pub first: Token,
    pub last: Token,
}

impl Element for NodePathRef {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// A recombined name with the tokens it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub text: String,
    pub first: Token,
    pub last: Token,
}

impl Element for Name {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// `name = value, …;` or the boolean form `name;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub labels: Vec<LabelAssign>,
    pub name: Name,
    pub values: Vec<PropValue>,
    pub first: Token,
    pub last: Token,
}

impl Element for Property {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum PropValue {
    Str(StringValue),
    Cells(CellArray),
    Ref(LabelRef),
    Path(NodePathRef),
    Bytes(ByteString),
}

impl Element for PropValue {
    fn first_token(&self) -> &Token {
        match self {
            Self::Str(it) => &it.token,
            Self::Cells(it) => &it.first,
            Self::Ref(it) => it.first_token(),
            Self::Path(it) => it.first_token(),
            Self::Bytes(it) => &it.first,
        }
    }
    fn last_token(&self) -> &Token {
        match self {
            Self::Str(it) => &it.token,
            Self::Cells(it) => &it.last,
            Self::Ref(it) => it.last_token(),
            Self::Path(it) => it.last_token(),
            Self::Bytes(it) => &it.last,
        }
    }
}

/// A double-quoted string literal. The token text keeps the quotes and
/// escapes; unescaping happens in the analyzer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StringValue {
    pub token: Token,
}

impl StringValue {
    /// The text between the quotes, escapes untouched.
    pub fn raw(&self) -> &str {
        let text = self.token.text.as_str();
        let text = text.strip_prefix('"').unwrap_or(text);
        text.strip_suffix('"').unwrap_or(text)
    }

    pub fn unterminated(&self) -> bool {
        self.token.unterminated
    }
}

impl Element for StringValue {
    fn first_token(&self) -> &Token {
        &self.token
    }
    fn last_token(&self) -> &Token {
        &self.token
    }
}

/// `< … >`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellArray {
    pub cells: Vec<Cell>,
    pub first: Token,
    pub last: Token,
}

impl Element for CellArray {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum Cell {
    Number(CellNumber),
    Ref(LabelRef),
    Path(NodePathRef),
    Expr(CellExpr),
    Macro(MacroUse),
}

impl Element for Cell {
    fn first_token(&self) -> &Token {
        match self {
            Self::Number(it) => &it.token,
            Self::Ref(it) => it.first_token(),
            Self::Path(it) => it.first_token(),
            Self::Expr(it) => &it.first,
            Self::Macro(it) => &it.token,
        }
    }
    fn last_token(&self) -> &Token {
        match self {
            Self::Number(it) => &it.token,
            Self::Ref(it) => it.last_token(),
            Self::Path(it) => it.last_token(),
            Self::Expr(it) => &it.last,
            Self::Macro(it) => &it.token,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellNumber {
    pub value: u64,
    pub token: Token,
}

/// A parenthesized integer expression. `value` is present when every operand
/// was a literal or a resolved macro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellExpr {
    pub value: Option<u64>,
    pub first: Token,
    pub last: Token,
}

/// A bare identifier in cell position: a preprocessor macro reference.
/// `value` is present when the identifier matched a macro override with a
/// numeric replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MacroUse {
    pub name: String,
    pub value: Option<u64>,
    pub token: Token,
}

/// `[ 00 11 22 ]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteString {
    pub bytes: Vec<u8>,
    pub first: Token,
    pub last: Token,
}

impl Element for ByteString {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// `/delete-node/ name;` or `/delete-node/ &label;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteNode {
    pub labels: Vec<LabelAssign>,
    pub target: DeleteTarget,
    pub first: Token,
    pub last: Token,
}

impl Element for DeleteNode {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum DeleteTarget {
    Name(Name),
    Ref(LabelRef),
    Path(NodePathRef),
}

impl DeleteTarget {
    pub fn span(&self) -> SrcSpan {
        match self {
            Self::Name(it) => it.span(),
            Self::Ref(it) => it.span(),
            Self::Path(it) => it.span(),
        }
    }
}

/// `/delete-property/ name;`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteProperty {
    pub labels: Vec<LabelAssign>,
    pub name: Name,
    pub first: Token,
    pub last: Token,
}

impl Element for DeleteProperty {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// A directive statement kept in the tree for queries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectiveStmt {
    pub kind: DirectiveKind,
    pub first: Token,
    pub last: Token,
}

impl Element for DirectiveStmt {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

#[derive(Debug, Clone, PartialEq, Eq, EnumAsInner)]
pub enum DirectiveKind {
    DtsVersion,
    Plugin,
    MemReserve {
        start: Option<u64>,
        len: Option<u64>,
    },
    Include {
        path: String,
        /// True for `#include`, false for `/include/`.
        preprocessor: bool,
    },
    OmitIfNoRef,
    /// A tokenized, unevaluated preprocessor line other than `#include`.
    Preprocessor { text: String },
}

/// Tokens skipped during panic-mode recovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidElement {
    pub tokens: Vec<Token>,
    pub first: Token,
    pub last: Token,
}

impl Element for InvalidElement {
    fn first_token(&self) -> &Token {
        &self.first
    }
    fn last_token(&self) -> &Token {
        &self.last
    }
}

/// A borrowed view of any AST element, for generic traversal.
#[derive(Debug, Clone, Copy)]
pub enum ElementRef<'a> {
    Doc(&'a SourceDoc),
    Root(&'a RootNode),
    Child(&'a ChildNode),
    Ref(&'a RefNode),
    Property(&'a Property),
    Value(&'a PropValue),
    DeleteNode(&'a DeleteNode),
    DeleteProperty(&'a DeleteProperty),
    Directive(&'a DirectiveStmt),
    Invalid(&'a InvalidElement),
    Name(&'a NodeName),
    Label(&'a LabelAssign),
    LabelRef(&'a LabelRef),
}

impl<'a> ElementRef<'a> {
    pub fn span(&self) -> SrcSpan {
        match self {
            Self::Doc(it) => it.span(),
            Self::Root(it) => it.span(),
            Self::Child(it) => it.span(),
            Self::Ref(it) => it.span(),
            Self::Property(it) => it.span(),
            Self::Value(it) => it.span(),
            Self::DeleteNode(it) => it.span(),
            Self::DeleteProperty(it) => it.span(),
            Self::Directive(it) => it.span(),
            Self::Invalid(it) => it.span(),
            Self::Name(it) => it.span(),
            Self::Label(it) => it.span(),
            Self::LabelRef(it) => it.span(),
        }
    }

    pub fn children(&self) -> Vec<ElementRef<'a>> {
        fn body_children<'a>(out: &mut Vec<ElementRef<'a>>, body: &'a NodeBody) {
            out.extend(body.declarations.iter().map(Declaration::as_element));
        }

        let mut out = Vec::new();
        match self {
            Self::Doc(doc) => {
                out.extend(doc.declarations.iter().map(Declaration::as_element));
            }
            Self::Root(node) => {
                out.extend(node.labels.iter().map(ElementRef::Label));
                body_children(&mut out, &node.body);
            }
            Self::Child(node) => {
                out.extend(node.labels.iter().map(ElementRef::Label));
                if let Some(name) = &node.name {
                    out.push(ElementRef::Name(name));
                }
                body_children(&mut out, &node.body);
            }
            Self::Ref(node) => {
                out.extend(node.labels.iter().map(ElementRef::Label));
                if let Reference::Label(label) = &node.reference {
                    out.push(ElementRef::LabelRef(label));
                }
                body_children(&mut out, &node.body);
            }
            Self::Property(prop) => {
                out.extend(prop.labels.iter().map(ElementRef::Label));
                out.extend(prop.values.iter().map(ElementRef::Value));
            }
            Self::Value(PropValue::Ref(label)) => out.push(ElementRef::LabelRef(label)),
            Self::DeleteNode(del) => {
                out.extend(del.labels.iter().map(ElementRef::Label));
                if let DeleteTarget::Ref(label) = &del.target {
                    out.push(ElementRef::LabelRef(label));
                }
            }
            Self::DeleteProperty(del) => {
                out.extend(del.labels.iter().map(ElementRef::Label));
            }
            Self::Value(_) | Self::Directive(_) | Self::Invalid(_) | Self::Name(_)
            | Self::Label(_) | Self::LabelRef(_) => {}
        }
        out
    }

    /// Outline metadata for document-symbol queries.
    pub fn doc_symbol(&self) -> Option<DocSymbol> {
        let (name, kind) = match self {
            Self::Root(_) => ("/".to_owned(), SymbolKind::Node),
            Self::Child(node) => (node.name.as_ref()?.full_name(), SymbolKind::Node),
            Self::Ref(node) => match &node.reference {
                Reference::Label(label) => (format!("&{}", label.value), SymbolKind::Node),
                Reference::Path(path) => {
                    (format!("&{{/{}}}", path.segments.join("/")), SymbolKind::Node)
                }
            },
            Self::Property(prop) => (prop.name.text.clone(), SymbolKind::Property),
            Self::Label(label) => (label.name.clone(), SymbolKind::Label),
            _ => return None,
        };
        Some(DocSymbol {
            name,
            kind,
            span: self.span(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocSymbol {
    pub name: String,
    pub kind: SymbolKind,
    pub span: SrcSpan,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Node,
    Property,
    Label,
}
