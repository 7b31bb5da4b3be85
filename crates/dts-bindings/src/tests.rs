use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use dts_analyzer::{ContextAware, PropertyType};
use dts_diagnostic::{
    Diagnostic, DiagnosticTag, IssueKind, Severity, SourceId, StandardTypeIssue,
};
use dts_parser::TokenizedDocumentCache;

use crate::{standard_catalogue, PropertyBinding, TypeCatalogue};

fn context(src: &str) -> ContextAware {
    let cache = TokenizedDocumentCache::new();
    let uri = SourceId::from("file:///test.dts");
    let entry = cache.get_or_parse(&uri, src, &FxHashMap::default());
    assert!(entry.issues.is_empty(), "unexpected syntax issues");
    let ctx = ContextAware::new(vec![uri], &cache);
    assert_eq!(ctx.issues, Vec::new(), "unexpected context issues");
    ctx
}

fn kinds(diags: &[Diagnostic]) -> Vec<StandardTypeIssue> {
    diags
        .iter()
        .flat_map(|diag| diag.kinds.iter())
        .map(|kind| match kind {
            IssueKind::Type(kind) => *kind,
            other => panic!("expected a type issue, got {other:?}"),
        })
        .collect()
}

fn standard(src: &str) -> Vec<Diagnostic> {
    standard_catalogue().validate(&context(src))
}

#[test]
fn clean_tree_validates_clean() {
    let diags = standard(
        "/ { soc { serial@0 { compatible = \"acme,uart\", \"ns16550\"; reg = <0 0x100>; \
         status = \"okay\"; clock-frequency = <1000000>; }; }; };",
    );
    assert_eq!(kinds(&diags), Vec::new());
}

#[test]
fn stringlist_rejects_cells() {
    let diags = standard("/ { compatible = <1>; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedStringList]);
}

#[test]
fn u32_rejects_wider_values() {
    let diags = standard("/ { #address-cells = <1 2>; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedU32]);

    // Both u32 and u64 satisfy a {u32,u64} slot.
    assert_eq!(kinds(&standard("/ { clock-frequency = <1>; };")), Vec::new());
    assert_eq!(
        kinds(&standard("/ { clock-frequency = <1 0>; };")),
        Vec::new()
    );
}

#[test]
fn empty_slot_rejects_values() {
    let diags = standard("/ { dma-coherent = <1>; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedEmpty]);
    assert_eq!(kinds(&standard("/ { dma-coherent; };")), Vec::new());
}

#[test]
fn single_value_specs_reject_lists() {
    let diags = standard("/ { model = \"a\", \"b\"; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedOne]);
}

#[test]
fn enum_values_are_checked() {
    let diags = standard("/ { status = \"ok\"; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedEnum]);
    assert!(diags[0].message().contains("okay, disabled"));

    assert_eq!(kinds(&standard("/ { status = \"disabled\"; };")), Vec::new());
}

#[test]
fn omitted_properties_are_flagged() {
    let diags = standard("/ { node { name = \"node\"; }; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::Omitted]);
}

#[test]
fn deprecated_properties_warn() {
    let diags = standard("/ { node { device_type = \"serial\"; }; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::DeprecatedProperty]);
    assert_eq!(diags[0].severity, Severity::Warning);
    assert_eq!(diags[0].tags, vec![DiagnosticTag::Deprecated]);
}

#[test]
fn computed_requirement_on_interrupt_controllers() {
    // An interrupt controller must declare its specifier width.
    let diags = standard("/ { pic@0 { interrupt-controller; }; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::Required]);
    assert_eq!(
        diags[0].args,
        vec!["#interrupt-cells".to_owned(), "/pic@0".to_owned()]
    );

    let diags = standard(
        "/ { pic@0 { interrupt-controller; #interrupt-cells = <1>; }; };",
    );
    assert_eq!(kinds(&diags), Vec::new());

    // Without the controller marker nothing is required.
    assert_eq!(kinds(&standard("/ { pic@0 {}; };")), Vec::new());
}

#[test]
fn pattern_bindings_cover_specifier_widths() {
    let diags = standard("/ { bus { #gpio-cells = \"two\"; }; };");
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedU32]);
}

#[test]
fn composite_specs_check_arity_and_positions() {
    let mut catalogue = TypeCatalogue::new();
    catalogue.register(
        PropertyBinding::new("acme,timing")
            .slot(&[PropertyType::String])
            .slot(&[PropertyType::U32]),
    );

    let diags = catalogue.validate(&context("/ { acme,timing = \"fast\"; };"));
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedCompositeLength]);
    assert_eq!(diags[0].args, vec!["2".to_owned(), "1".to_owned()]);

    let diags = catalogue.validate(&context("/ { acme,timing = <1>, <2>; };"));
    assert_eq!(kinds(&diags), vec![StandardTypeIssue::ExpectedString]);

    let diags = catalogue.validate(&context("/ { acme,timing = \"fast\", <2>; };"));
    assert_eq!(kinds(&diags), Vec::new());
}

#[test]
fn required_binding_reports_on_the_node() {
    let mut catalogue = TypeCatalogue::new();
    catalogue.register(
        PropertyBinding::new("acme,mode")
            .slot(&[PropertyType::String])
            .required(),
    );

    let diags = catalogue.validate(&context("/ { dev { }; };"));
    // Both `/` and `/dev` lack the property.
    assert_eq!(
        kinds(&diags),
        vec![StandardTypeIssue::Required, StandardTypeIssue::Required]
    );
}

#[test]
fn interrupts_extended_resolves_each_parent_width() {
    let src = "/ {\n\
         pic1: pic@1 { interrupt-controller; #interrupt-cells = <1>; };\n\
         pic2: pic@2 { interrupt-controller; #interrupt-cells = <2>; };\n\
         dev { interrupts-extended = <&pic1 9>, <&pic2 5 7>; };\n\
         };";
    assert_eq!(kinds(&standard(src)), Vec::new());
}

#[test]
fn interrupts_extended_truncated_tuple() {
    let src = "/ {\n\
         pic: pic@0 { interrupt-controller; #interrupt-cells = <2>; };\n\
         dev { interrupts-extended = <&pic 1>; };\n\
         };";
    assert_eq!(
        kinds(&standard(src)),
        vec![StandardTypeIssue::InterruptsValueCellMismatch]
    );
    let diag = standard(src).into_iter().next().unwrap();
    assert_eq!(diag.args, vec!["2".to_owned(), "1".to_owned()]);
}

#[test]
fn interrupts_extended_unresolved_parent() {
    let src = "/ { dev { interrupts-extended = <&ghost 1>; }; };";
    assert_eq!(
        kinds(&standard(src)),
        vec![StandardTypeIssue::InterruptsParentNodeNotFound]
    );
}

#[test]
fn interrupts_extended_parent_without_width() {
    let src = "/ {\n\
         pic: pic@0 { interrupt-controller; #interrupt-cells = <1>; };\n\
         plain: other {};\n\
         dev { interrupts-extended = <&plain 1>; };\n\
         };";
    let diags = standard(src);
    assert_eq!(
        kinds(&diags),
        vec![StandardTypeIssue::PropertyRequiresOtherPropertyInNode]
    );
    assert_eq!(
        diags[0].args,
        vec![
            "interrupts-extended".to_owned(),
            "#interrupt-cells".to_owned(),
            "/other".to_owned(),
        ]
    );
}

#[test]
fn interrupts_extended_shadows_interrupts() {
    let src = "/ {\n\
         pic: pic@0 { interrupt-controller; #interrupt-cells = <1>; };\n\
         dev { interrupt-parent = <&pic>; interrupts = <3>; interrupts-extended = <&pic 4>; };\n\
         };";
    let diags = standard(src);
    let ignored: Vec<_> = kinds(&diags)
        .into_iter()
        .filter(|kind| *kind == StandardTypeIssue::Ignored)
        .collect();
    assert_eq!(
        ignored,
        vec![StandardTypeIssue::Ignored, StandardTypeIssue::Ignored]
    );
}

#[test]
fn ranges_arity_follows_cell_counts() {
    let ok = "/ { #address-cells = <1>; soc { #address-cells = <1>; #size-cells = <1>; \
              ranges = <0x0 0x80000000 0x10000>; }; };";
    assert_eq!(kinds(&standard(ok)), Vec::new());

    let bad = "/ { #address-cells = <1>; soc { #address-cells = <1>; #size-cells = <1>; \
               ranges = <0x0 0x80000000>; }; };";
    assert_eq!(
        kinds(&standard(bad)),
        vec![StandardTypeIssue::ExpectedCompositeLength]
    );
}

#[test]
fn validation_is_deterministic() {
    let src = "/ { compatible = <1>; status = \"weird\"; node { name = \"x\"; }; };";
    let first = standard(src);
    let second = standard(src);
    assert_eq!(first, second);
    assert!(!first.is_empty());
}
