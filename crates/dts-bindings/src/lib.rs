//! # Standard-binding catalogue and validator
//!
//! A [`TypeCatalogue`] is a declarative registry of [`PropertyBinding`]s
//! keyed by literal property name or pattern. [`TypeCatalogue::validate`]
//! walks a resolved [`ContextAware`] tree and dispatches every matching
//! property through its binding's type slots, enum set and additional
//! checks, producing [`StandardTypeIssue`](dts_diagnostic::StandardTypeIssue)
//! diagnostics.

use regex::Regex;
use smallvec::SmallVec;

use dts_analyzer::{ContextAware, PropertyType, RuntimeNode, RuntimeProperty};
use dts_diagnostic::Diagnostic;

pub use standard::standard_catalogue;

mod standard;
#[cfg(test)]
mod tests;
mod validate;

/// How a binding's name is matched against property names.
pub enum NameMatch {
    Exact(String),
    Pattern(Regex),
}

impl NameMatch {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            Self::Exact(exact) => exact == name,
            Self::Pattern(pattern) => pattern.is_match(name),
        }
    }
}

impl From<&str> for NameMatch {
    fn from(value: &str) -> Self {
        Self::Exact(value.to_owned())
    }
}

impl From<Regex> for NameMatch {
    fn from(value: Regex) -> Self {
        Self::Pattern(value)
    }
}

/// One position of a binding's type spec: the set of acceptable shapes.
#[derive(Debug, Clone)]
pub struct TypeSlot(SmallVec<[PropertyType; 2]>);

impl TypeSlot {
    pub fn of(types: &[PropertyType]) -> Self {
        Self(types.iter().copied().collect())
    }

    /// Membership with the assignability rules: a `StringList` slot accepts
    /// strings, a `PropEncodedArray` slot accepts `U32`/`U64`, an `Unknown`
    /// value is never flagged.
    pub fn accepts(&self, ty: PropertyType) -> bool {
        if ty == PropertyType::Unknown {
            return true;
        }
        self.0.iter().any(|slot| match slot {
            PropertyType::StringList => {
                matches!(ty, PropertyType::String | PropertyType::StringList)
            }
            PropertyType::PropEncodedArray => matches!(
                ty,
                PropertyType::U32 | PropertyType::U64 | PropertyType::PropEncodedArray
            ),
            other => *other == ty,
        })
    }

    pub fn contains(&self, ty: PropertyType) -> bool {
        self.0.contains(&ty)
    }

    /// The slot's leading type, used to pick the `Expected*` issue kind.
    pub fn primary(&self) -> PropertyType {
        self.0.first().copied().unwrap_or(PropertyType::Unknown)
    }

    pub fn is_empty_only(&self) -> bool {
        self.0.as_slice() == [PropertyType::Empty]
    }
}

/// Whether a property must, may or must not appear on a node.
#[derive(Clone, Copy)]
pub enum Requirement {
    Required,
    Optional,
    Omitted,
    /// Decided per owning node, e.g. `#interrupt-cells` on interrupt
    /// controllers.
    Computed(fn(&RuntimeNode) -> Requirement),
}

/// Everything the validator passes to an additional check. Checks are pure:
/// they read the tree and produce diagnostics.
pub struct CheckContext<'a> {
    pub ctx: &'a ContextAware,
    pub node: &'a RuntimeNode,
    pub property: &'a RuntimeProperty,
}

pub type AdditionalCheck = Box<dyn Fn(&CheckContext<'_>, &mut Vec<Diagnostic>) + Send + Sync>;

/// One property-binding rule.
pub struct PropertyBinding {
    pub name: NameMatch,
    /// Ordered type spec. Empty means the binding is opaque to type checks.
    pub slots: Vec<TypeSlot>,
    /// True when a single slot repeats over all values.
    pub list: bool,
    pub required: Requirement,
    /// Documentation payload, shipped verbatim to presentation layers.
    pub doc: Option<String>,
    pub default: Option<String>,
    pub enum_values: Option<Vec<String>>,
    pub deprecated: bool,
    pub additional_check: Option<AdditionalCheck>,
}

impl PropertyBinding {
    pub fn new(name: impl Into<NameMatch>) -> Self {
        Self {
            name: name.into(),
            slots: Vec::new(),
            list: false,
            required: Requirement::Optional,
            doc: None,
            default: None,
            enum_values: None,
            deprecated: false,
            additional_check: None,
        }
    }

    #[must_use]
    pub fn slot(mut self, types: &[PropertyType]) -> Self {
        self.slots.push(TypeSlot::of(types));
        self
    }

    #[must_use]
    pub fn list(mut self) -> Self {
        self.list = true;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = Requirement::Required;
        self
    }

    #[must_use]
    pub fn omitted(mut self) -> Self {
        self.required = Requirement::Omitted;
        self
    }

    #[must_use]
    pub fn required_when(mut self, decide: fn(&RuntimeNode) -> Requirement) -> Self {
        self.required = Requirement::Computed(decide);
        self
    }

    #[must_use]
    pub fn values(mut self, allowed: &[&str]) -> Self {
        self.enum_values = Some(allowed.iter().map(|s| (*s).to_owned()).collect());
        self
    }

    #[must_use]
    pub fn deprecated(mut self) -> Self {
        self.deprecated = true;
        self
    }

    #[must_use]
    pub fn doc(mut self, text: &str) -> Self {
        self.doc = Some(text.to_owned());
        self
    }

    #[must_use]
    pub fn default_value(mut self, text: &str) -> Self {
        self.default = Some(text.to_owned());
        self
    }

    #[must_use]
    pub fn check(
        mut self,
        check: impl Fn(&CheckContext<'_>, &mut Vec<Diagnostic>) + Send + Sync + 'static,
    ) -> Self {
        self.additional_check = Some(Box::new(check));
        self
    }

    /// Resolves `Computed` requirements against the owning node.
    pub fn requirement_for(&self, node: &RuntimeNode) -> Requirement {
        match self.required {
            Requirement::Computed(decide) => match decide(node) {
                // One level of indirection is enough.
                Requirement::Computed(_) => Requirement::Optional,
                resolved => resolved,
            },
            other => other,
        }
    }
}

/// Registry of property bindings, dispatched in registration order.
#[derive(Default)]
pub struct TypeCatalogue {
    bindings: Vec<PropertyBinding>,
}

impl TypeCatalogue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, binding: PropertyBinding) {
        self.bindings.push(binding);
    }

    pub fn bindings(&self) -> &[PropertyBinding] {
        &self.bindings
    }

    /// The binding for a property name. The registry is keyed by name:
    /// a literal entry beats any pattern entry.
    pub fn lookup(&self, name: &str) -> Option<&PropertyBinding> {
        self.bindings
            .iter()
            .find(|binding| matches!(&binding.name, NameMatch::Exact(exact) if exact == name))
            .or_else(|| {
                self.bindings
                    .iter()
                    .find(|binding| binding.name.matches(name))
            })
    }

    /// Walks the tree and returns the diagnostics for every node and
    /// binding. Deterministic for a fixed catalogue and tree.
    pub fn validate(&self, ctx: &ContextAware) -> Vec<Diagnostic> {
        validate::validate(self, ctx)
    }
}
