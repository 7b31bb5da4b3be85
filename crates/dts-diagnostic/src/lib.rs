//! Diagnostic model for the DTS language-service core.
//!
//! Every pipeline stage is total: structural problems become [`Diagnostic`]s
//! attached to AST elements, they are never raised as errors. The issue kinds
//! are partitioned into three closed enumerations by producing stage:
//! [`SyntaxIssue`] (parser), [`ContextIssue`] (tree merge) and
//! [`StandardTypeIssue`] (binding validator).

use std::sync::Arc;

use smallvec::{smallvec, SmallVec};

pub use position::{Position, SrcSpan};

mod position;

/// Identifies a source document, usually a URI.
pub type SourceId = Arc<str>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    Error,
    Warning,
    Hint,
    Information,
}

/// Extra presentation hints, mirroring the LSP diagnostic tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticTag {
    Unnecessary,
    Deprecated,
}

/// Issues produced by the parser.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyntaxIssue {
    EndStatement,
    NodeAddress,
    NodeNameAddressWhitespace,
    MissingBrace,
    UnexpectedToken,
    UnterminatedString,
    MissingValue,
    ExpectedName,
    LabelNotAllowed,
}

/// Issues produced while folding files into the runtime tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextIssue {
    DuplicateNodeName,
    DuplicatePropertyName,
    NodeDoesNotExist,
    PropertyDoesNotExist,
    UnableToResolveChildNode,
    LabelAlreadyInUse,
}

/// Issues produced by the standard-binding validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StandardTypeIssue {
    Required,
    Omitted,
    ExpectedEmpty,
    ExpectedString,
    ExpectedStringList,
    ExpectedU32,
    ExpectedU64,
    ExpectedPropEncodedArray,
    ExpectedOne,
    ExpectedCompositeLength,
    ExpectedEnum,
    Ignored,
    PropertyRequiresOtherPropertyInNode,
    InterruptsParentNodeNotFound,
    InterruptsValueCellMismatch,
    DeprecatedProperty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IssueKind {
    Syntax(SyntaxIssue),
    Context(ContextIssue),
    Type(StandardTypeIssue),
}

impl From<SyntaxIssue> for IssueKind {
    fn from(value: SyntaxIssue) -> Self {
        Self::Syntax(value)
    }
}
impl From<ContextIssue> for IssueKind {
    fn from(value: ContextIssue) -> Self {
        Self::Context(value)
    }
}
impl From<StandardTypeIssue> for IssueKind {
    fn from(value: StandardTypeIssue) -> Self {
        Self::Type(value)
    }
}

impl IssueKind {
    /// The human-readable message template; `{0}`, `{1}`, … are replaced by
    /// the diagnostic's args.
    pub fn template(&self) -> &'static str {
        use ContextIssue as C;
        use StandardTypeIssue as T;
        use SyntaxIssue as S;
        match self {
            Self::Syntax(S::EndStatement) => "Missing ';' at the end of the statement",
            Self::Syntax(S::NodeAddress) => "Expected a unit address after '@'",
            Self::Syntax(S::NodeNameAddressWhitespace) => {
                "White space is not allowed between the node name, '@' and the unit address"
            }
            Self::Syntax(S::MissingBrace) => "Missing closing '{0}'",
            Self::Syntax(S::UnexpectedToken) => "Unexpected '{0}'",
            Self::Syntax(S::UnterminatedString) => "Unterminated string",
            Self::Syntax(S::MissingValue) => "Expected a property value",
            Self::Syntax(S::ExpectedName) => "Expected a name",
            Self::Syntax(S::LabelNotAllowed) => "A label is not allowed here",
            Self::Context(C::DuplicateNodeName) => "Duplicate node name '{0}'",
            Self::Context(C::DuplicatePropertyName) => {
                "Property '{0}' is redefined later; this definition has no effect"
            }
            Self::Context(C::NodeDoesNotExist) => "Cannot delete node '{0}': it does not exist",
            Self::Context(C::PropertyDoesNotExist) => {
                "Cannot delete property '{0}': it does not exist"
            }
            Self::Context(C::UnableToResolveChildNode) => "Unable to resolve reference to '{0}'",
            Self::Context(C::LabelAlreadyInUse) => "Label '{0}' is already in use",
            Self::Type(T::Required) => "Property '{0}' is required in node '{1}'",
            Self::Type(T::Omitted) => "Property '{0}' must be omitted",
            Self::Type(T::ExpectedEmpty) => "Property '{0}' must be empty",
            Self::Type(T::ExpectedString) => "Expected a string",
            Self::Type(T::ExpectedStringList) => "Expected a string or a list of strings",
            Self::Type(T::ExpectedU32) => "Expected a single 32-bit cell",
            Self::Type(T::ExpectedU64) => "Expected a 64-bit value",
            Self::Type(T::ExpectedPropEncodedArray) => "Expected a property-encoded array",
            Self::Type(T::ExpectedOne) => "Property '{0}' takes exactly one value",
            Self::Type(T::ExpectedCompositeLength) => "Expected {0} values, found {1}",
            Self::Type(T::ExpectedEnum) => "Value must be one of: {0}",
            Self::Type(T::Ignored) => "'{0}' is ignored because '{1}' is present",
            Self::Type(T::PropertyRequiresOtherPropertyInNode) => {
                "Property '{0}' requires '{1}' in node '{2}'"
            }
            Self::Type(T::InterruptsParentNodeNotFound) => {
                "Unable to resolve interrupt parent '{0}'"
            }
            Self::Type(T::InterruptsValueCellMismatch) => {
                "Expected {0} interrupt cells after the parent phandle, found {1}"
            }
            Self::Type(T::DeprecatedProperty) => "Property '{0}' is deprecated",
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            Self::Syntax(_) => Severity::Error,
            Self::Context(ContextIssue::DuplicatePropertyName) => Severity::Hint,
            Self::Context(_) => Severity::Error,
            Self::Type(StandardTypeIssue::Ignored) => Severity::Warning,
            Self::Type(StandardTypeIssue::DeprecatedProperty) => Severity::Warning,
            Self::Type(_) => Severity::Error,
        }
    }
}

/// A range in another document, referenced from a diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Linked {
    pub uri: SourceId,
    pub span: SrcSpan,
}

/// A single reported issue, anchored to an AST element's span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kinds: SmallVec<[IssueKind; 2]>,
    pub uri: SourceId,
    pub span: SrcSpan,
    pub severity: Severity,
    pub tags: Vec<DiagnosticTag>,
    pub linked_to: Vec<Linked>,
    pub args: Vec<String>,
}

impl Diagnostic {
    pub fn new(kind: impl Into<IssueKind>, uri: SourceId, span: SrcSpan) -> Self {
        let kind = kind.into();
        Self {
            severity: kind.default_severity(),
            kinds: smallvec![kind],
            uri,
            span,
            tags: Vec::new(),
            linked_to: Vec::new(),
            args: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: DiagnosticTag) -> Self {
        self.tags.push(tag);
        self
    }

    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn with_linked(mut self, uri: SourceId, span: SrcSpan) -> Self {
        self.linked_to.push(Linked { uri, span });
        self
    }

    /// Renders the message templates of all kinds, populated with the args.
    pub fn message(&self) -> String {
        let mut out = String::new();
        for (idx, kind) in self.kinds.iter().enumerate() {
            if idx > 0 {
                out.push_str("; ");
            }
            out.push_str(&render_template(kind.template(), &self.args));
        }
        out
    }
}

fn render_template(template: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            if let Some(digit) = chars.peek().and_then(|c| c.to_digit(10)) {
                let mut rest = chars.clone();
                rest.next();
                if rest.peek() == Some(&'}') {
                    rest.next();
                    chars = rest;
                    match args.get(digit as usize) {
                        Some(arg) => out.push_str(arg),
                        None => out.push('?'),
                    }
                    continue;
                }
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn uri() -> SourceId {
        SourceId::from("file:///test.dts")
    }

    #[test]
    fn message_rendering() {
        let diag = Diagnostic::new(
            ContextIssue::DuplicateNodeName,
            uri(),
            SrcSpan::point(Position::new(0, 3, 4)),
        )
        .with_arg("node");
        assert_eq!(diag.message(), "Duplicate node name 'node'");
    }

    #[test]
    fn message_with_multiple_args() {
        let diag = Diagnostic::new(
            StandardTypeIssue::ExpectedCompositeLength,
            uri(),
            SrcSpan::point(Position::new(2, 0, 5)),
        )
        .with_arg("3")
        .with_arg("1");
        assert_eq!(diag.message(), "Expected 3 values, found 1");
    }

    #[test]
    fn missing_arg_is_visible() {
        let diag = Diagnostic::new(
            SyntaxIssue::MissingBrace,
            uri(),
            SrcSpan::point(Position::new(0, 0, 1)),
        );
        assert_eq!(diag.message(), "Missing closing '?'");
    }

    #[test]
    fn default_severities() {
        assert_eq!(
            IssueKind::from(SyntaxIssue::EndStatement).default_severity(),
            Severity::Error
        );
        assert_eq!(
            IssueKind::from(ContextIssue::DuplicatePropertyName).default_severity(),
            Severity::Hint
        );
        assert_eq!(
            IssueKind::from(StandardTypeIssue::DeprecatedProperty).default_severity(),
            Severity::Warning
        );
    }
}
