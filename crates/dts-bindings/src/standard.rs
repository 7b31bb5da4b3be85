//! The catalogue of standard properties from the Devicetree specification.

use once_cell::sync::Lazy;
use regex::Regex;

use dts_analyzer::{PropertyType, RuntimeNode, Value};
use dts_diagnostic::{Diagnostic, StandardTypeIssue};
use dts_parser::ast::{Cell, Element, PropValue};

use crate::{CheckContext, PropertyBinding, Requirement, TypeCatalogue};

use PropertyType::{ByteString, Empty, PropEncodedArray, StringList, U32, U64};

/// The standard catalogue, built once per process.
pub fn standard_catalogue() -> &'static TypeCatalogue {
    &STANDARD
}

static STANDARD: Lazy<TypeCatalogue> = Lazy::new(build);

fn build() -> TypeCatalogue {
    let mut catalogue = TypeCatalogue::new();

    catalogue.register(
        PropertyBinding::new("compatible")
            .slot(&[StringList])
            .doc("Programming models the device is compatible with, most specific first."),
    );
    catalogue.register(
        PropertyBinding::new("model")
            .slot(&[PropertyType::String])
            .doc("Manufacturer,model of the device."),
    );
    catalogue.register(PropertyBinding::new("phandle").slot(&[U32]));
    catalogue.register(
        PropertyBinding::new("status")
            .slot(&[PropertyType::String])
            .values(&["okay", "disabled", "reserved", "fail", "fail-sss"])
            .doc("Operational status of the device."),
    );
    catalogue.register(
        PropertyBinding::new("#address-cells")
            .slot(&[U32])
            .default_value("2"),
    );
    catalogue.register(
        PropertyBinding::new("#size-cells")
            .slot(&[U32])
            .default_value("1"),
    );
    catalogue.register(PropertyBinding::new("reg").slot(&[PropEncodedArray]).list());
    catalogue.register(PropertyBinding::new("virtual-reg").slot(&[U32]));
    catalogue.register(
        PropertyBinding::new("ranges")
            .slot(&[Empty, PropEncodedArray])
            .list()
            .check(ranges_check),
    );
    catalogue.register(
        PropertyBinding::new("dma-ranges")
            .slot(&[Empty, PropEncodedArray])
            .list()
            .check(ranges_check),
    );
    catalogue.register(PropertyBinding::new("dma-coherent").slot(&[Empty]));
    catalogue.register(
        PropertyBinding::new("device_type")
            .slot(&[PropertyType::String])
            .deprecated()
            .doc("Only to be used for cpu and memory nodes."),
    );
    // Generated from the node name; never written by hand.
    catalogue.register(PropertyBinding::new("name").slot(&[PropertyType::String]).omitted());

    catalogue.register(
        PropertyBinding::new("interrupts")
            .slot(&[PropEncodedArray])
            .list(),
    );
    catalogue.register(PropertyBinding::new("interrupt-parent").slot(&[U32]));
    catalogue.register(
        PropertyBinding::new("interrupts-extended")
            .slot(&[PropEncodedArray])
            .list()
            .check(interrupts_extended_check),
    );
    catalogue.register(
        PropertyBinding::new("#interrupt-cells")
            .slot(&[U32])
            .required_when(interrupt_controller_needs_cells),
    );
    catalogue.register(PropertyBinding::new("interrupt-controller").slot(&[Empty]));
    catalogue.register(
        PropertyBinding::new("interrupt-map")
            .slot(&[PropEncodedArray])
            .list(),
    );
    catalogue.register(
        PropertyBinding::new("interrupt-map-mask")
            .slot(&[PropEncodedArray])
            .list(),
    );

    catalogue.register(PropertyBinding::new("clock-frequency").slot(&[U32, U64]));
    catalogue.register(PropertyBinding::new("reg-shift").slot(&[U32]));
    catalogue.register(PropertyBinding::new("local-mac-address").slot(&[ByteString]));

    // Any other specifier-width property defaults to a single cell.
    catalogue.register(
        PropertyBinding::new(
            Regex::new(r"^#.+-cells$").expect("specifier-width pattern compiles"),
        )
        .slot(&[U32]),
    );

    catalogue
}

fn interrupt_controller_needs_cells(node: &RuntimeNode) -> Requirement {
    if node.property("interrupt-controller").is_some() {
        Requirement::Required
    } else {
        Requirement::Optional
    }
}

/// `interrupts-extended` walks `[&parent, cell…]` tuples whose width comes
/// from each referenced parent's `#interrupt-cells`.
fn interrupts_extended_check(cx: &CheckContext<'_>, out: &mut Vec<Diagnostic>) {
    let current = cx.property.current();
    let uri = &current.uri;

    // The extended form replaces both of these.
    for shadowed in ["interrupts", "interrupt-parent"] {
        if let Some(other) = cx.node.property(shadowed) {
            let def = other.current();
            out.push(
                Diagnostic::new(StandardTypeIssue::Ignored, def.uri.clone(), def.ast.span())
                    .with_arg(shadowed)
                    .with_arg("interrupts-extended"),
            );
        }
    }

    let cells: Vec<&Cell> = current
        .ast
        .values
        .iter()
        .filter_map(PropValue::as_cells)
        .flat_map(|array| array.cells.iter())
        .collect();

    let mut idx = 0;
    while idx < cells.len() {
        let head = cells[idx];
        idx += 1;

        let parent = match head {
            Cell::Ref(label) => match cx.ctx.node_by_label(&label.value) {
                Some(node) => node,
                None => {
                    out.push(
                        Diagnostic::new(
                            StandardTypeIssue::InterruptsParentNodeNotFound,
                            uri.clone(),
                            label.span(),
                        )
                        .with_arg(format!("&{}", label.value)),
                    );
                    return;
                }
            },
            Cell::Path(path) => {
                let resolved = cx
                    .ctx
                    .resolve_path(&path.segments)
                    .and_then(|resolved| cx.ctx.node_at_path(&resolved));
                match resolved {
                    Some(node) => node,
                    None => {
                        out.push(
                            Diagnostic::new(
                                StandardTypeIssue::InterruptsParentNodeNotFound,
                                uri.clone(),
                                path.span(),
                            )
                            .with_arg(format!("&{{/{}}}", path.segments.join("/"))),
                        );
                        return;
                    }
                }
            }
            other => {
                // A literal phandle number cannot be resolved here.
                out.push(
                    Diagnostic::new(
                        StandardTypeIssue::InterruptsParentNodeNotFound,
                        uri.clone(),
                        other.span(),
                    )
                    .with_arg(other.first_token().text.clone()),
                );
                return;
            }
        };

        let Some(width_prop) = parent.property("#interrupt-cells") else {
            out.push(
                Diagnostic::new(
                    StandardTypeIssue::PropertyRequiresOtherPropertyInNode,
                    uri.clone(),
                    head.span(),
                )
                .with_arg("interrupts-extended")
                .with_arg("#interrupt-cells")
                .with_arg(parent.path_string()),
            );
            return;
        };
        let width = Value::from_values(&width_prop.current().ast.values)
            .ok()
            .and_then(|value| value.as_u32().copied());
        let Some(width) = width else {
            // Unresolvable width; nothing further to check.
            return;
        };

        let remaining = cells.len() - idx;
        if remaining < width as usize {
            out.push(
                Diagnostic::new(
                    StandardTypeIssue::InterruptsValueCellMismatch,
                    uri.clone(),
                    current.ast.span(),
                )
                .with_arg(width.to_string())
                .with_arg(remaining.to_string()),
            );
            return;
        }
        idx += width as usize;
    }
}

/// `ranges` tuples are `child-address parent-address child-size`, with the
/// cell counts taken from this node and its parent.
fn ranges_check(cx: &CheckContext<'_>, out: &mut Vec<Diagnostic>) {
    let current = cx.property.current();
    let total: usize = current
        .ast
        .values
        .iter()
        .filter_map(PropValue::as_cells)
        .map(|array| array.cells.len())
        .sum();
    if total == 0 {
        return;
    }

    let child_address = cell_count(cx.node, "#address-cells").unwrap_or(2);
    let child_size = cell_count(cx.node, "#size-cells").unwrap_or(1);
    let parent_address = cx
        .node
        .path
        .split_last()
        .map(|(_, parent_path)| parent_path)
        .and_then(|path| cx.ctx.node_at_path(path))
        .and_then(|parent| cell_count(parent, "#address-cells"))
        .unwrap_or(2);

    let tuple = child_address + parent_address + child_size;
    if tuple == 0 {
        return;
    }
    if total % tuple != 0 {
        out.push(
            Diagnostic::new(
                StandardTypeIssue::ExpectedCompositeLength,
                current.uri.clone(),
                current.ast.span(),
            )
            .with_arg(format!("a multiple of {tuple}"))
            .with_arg(total.to_string()),
        );
    }
}

fn cell_count(node: &RuntimeNode, prop: &str) -> Option<usize> {
    let prop = node.property(prop)?;
    Value::from_values(&prop.current().ast.values)
        .ok()
        .and_then(|value| value.as_u32().copied())
        .map(|value| value as usize)
}
