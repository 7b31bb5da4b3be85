//! The validator walk: dispatch every property of every node through the
//! matching bindings.

use itertools::Itertools;
use tracing::instrument;

use dts_analyzer::{unescape, value_profile, ContextAware, PropertyType, RuntimeNode};
use dts_diagnostic::{Diagnostic, DiagnosticTag, SourceId, SrcSpan, StandardTypeIssue};
use dts_parser::ast::{Element, PropValue};

use crate::{CheckContext, NameMatch, PropertyBinding, Requirement, TypeCatalogue, TypeSlot};

#[instrument(skip_all, fields(bindings = catalogue.bindings().len()))]
pub(crate) fn validate(catalogue: &TypeCatalogue, ctx: &ContextAware) -> Vec<Diagnostic> {
    let mut out = Vec::new();
    for node in ctx.root.dfs() {
        // Presence: only literally-named bindings can demand a property.
        for binding in catalogue.bindings() {
            let NameMatch::Exact(name) = &binding.name else {
                continue;
            };
            if node.property(name).is_some() {
                continue;
            }
            if matches!(binding.requirement_for(node), Requirement::Required) {
                if let Some(def) = node.last_definition() {
                    out.push(
                        Diagnostic::new(
                            StandardTypeIssue::Required,
                            def.uri().clone(),
                            def.name_span(),
                        )
                        .with_arg(name)
                        .with_arg(node.path_string()),
                    );
                }
            }
        }

        // Each property dispatches through at most one binding.
        for property in &node.properties {
            let Some(binding) = catalogue.lookup(&property.name) else {
                continue;
            };
            check_property(binding, node, property, ctx, &mut out);
        }
    }
    out
}

fn check_property(
    binding: &PropertyBinding,
    node: &RuntimeNode,
    property: &dts_analyzer::RuntimeProperty,
    ctx: &ContextAware,
    out: &mut Vec<Diagnostic>,
) {
    let current = property.current();
    let uri = &current.uri;
    let span = current.ast.span();

    if matches!(binding.requirement_for(node), Requirement::Omitted) {
        out.push(
            Diagnostic::new(StandardTypeIssue::Omitted, uri.clone(), span)
                .with_arg(&property.name),
        );
    }
    if binding.deprecated {
        out.push(
            Diagnostic::new(StandardTypeIssue::DeprecatedProperty, uri.clone(), span)
                .with_arg(&property.name)
                .with_tag(DiagnosticTag::Deprecated),
        );
    }

    let cx = CheckContext {
        ctx,
        node,
        property,
    };
    check_types(binding, &cx, out);
    check_enum(binding, &cx, out);
    if let Some(check) = &binding.additional_check {
        check(&cx, out);
    }
}

fn check_types(binding: &PropertyBinding, cx: &CheckContext<'_>, out: &mut Vec<Diagnostic>) {
    let current = cx.property.current();
    let values = &current.ast.values;
    let profile = value_profile(values);
    let uri = &current.uri;
    let prop_span = current.ast.span();
    let name = &cx.property.name;

    match binding.slots.as_slice() {
        // No type spec: the binding is opaque.
        [] => {}
        [slot] if binding.list => {
            if values.is_empty() {
                if !slot.accepts(PropertyType::Empty) {
                    out.push(expected_issue(slot, uri, prop_span, name));
                }
                return;
            }
            for (value, ty) in values.iter().zip(&profile) {
                if !slot.accepts(*ty) {
                    out.push(expected_issue(slot, uri, value.span(), name));
                }
            }
        }
        [slot] if slot.contains(PropertyType::StringList) => {
            // A stringlist is any number of strings.
            if values.is_empty() {
                out.push(expected_issue(slot, uri, prop_span, name));
                return;
            }
            for (value, ty) in values.iter().zip(&profile) {
                if !matches!(ty, PropertyType::String | PropertyType::Unknown) {
                    out.push(expected_issue(slot, uri, value.span(), name));
                }
            }
        }
        [slot] => match profile.as_slice() {
            [] => {
                if !slot.accepts(PropertyType::Empty) {
                    out.push(expected_issue(slot, uri, prop_span, name));
                }
            }
            [single] => {
                if !slot.accepts(*single) {
                    out.push(expected_issue(slot, uri, values[0].span(), name));
                }
            }
            _ => {
                let kind = if slot.is_empty_only() {
                    StandardTypeIssue::ExpectedEmpty
                } else {
                    StandardTypeIssue::ExpectedOne
                };
                out.push(Diagnostic::new(kind, uri.clone(), prop_span).with_arg(name));
            }
        },
        slots => {
            if profile.len() != slots.len() {
                out.push(
                    Diagnostic::new(
                        StandardTypeIssue::ExpectedCompositeLength,
                        uri.clone(),
                        prop_span,
                    )
                    .with_arg(slots.len().to_string())
                    .with_arg(profile.len().to_string()),
                );
                return;
            }
            for ((slot, ty), value) in slots.iter().zip(&profile).zip(values) {
                if !slot.accepts(*ty) {
                    out.push(expected_issue(slot, uri, value.span(), name));
                }
            }
        }
    }
}

fn expected_issue(slot: &TypeSlot, uri: &SourceId, span: SrcSpan, name: &str) -> Diagnostic {
    let kind = match slot.primary() {
        PropertyType::Empty => StandardTypeIssue::ExpectedEmpty,
        PropertyType::U32 => StandardTypeIssue::ExpectedU32,
        PropertyType::U64 => StandardTypeIssue::ExpectedU64,
        PropertyType::String => StandardTypeIssue::ExpectedString,
        PropertyType::StringList => StandardTypeIssue::ExpectedStringList,
        PropertyType::PropEncodedArray | PropertyType::ByteString | PropertyType::Unknown => {
            StandardTypeIssue::ExpectedPropEncodedArray
        }
    };
    Diagnostic::new(kind, uri.clone(), span).with_arg(name)
}

fn check_enum(binding: &PropertyBinding, cx: &CheckContext<'_>, out: &mut Vec<Diagnostic>) {
    let Some(allowed) = &binding.enum_values else {
        return;
    };
    let current = cx.property.current();
    for value in &current.ast.values {
        let PropValue::Str(string) = value else {
            // Non-string values already failed the type check.
            continue;
        };
        let Ok(text) = unescape(string.raw()) else {
            continue;
        };
        if !allowed.iter().any(|candidate| candidate == &text) {
            out.push(
                Diagnostic::new(
                    StandardTypeIssue::ExpectedEnum,
                    current.uri.clone(),
                    value.span(),
                )
                .with_arg(allowed.iter().join(", ")),
            );
        }
    }
}
