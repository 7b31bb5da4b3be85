use pretty_assertions::assert_eq;
use rustc_hash::FxHashMap;

use dts_diagnostic::{ContextIssue, DiagnosticTag, IssueKind, Severity, SourceId};
use dts_parser::TokenizedDocumentCache;

use crate::{ContextAware, PropertyType, RuntimeNode};

/// Parses each `(uri, text)` into a fresh cache and builds the context in
/// the given order.
fn context(sources: &[(&str, &str)]) -> ContextAware {
    let cache = TokenizedDocumentCache::new();
    let macros = FxHashMap::default();
    let mut file_map = Vec::new();
    for (uri, text) in sources {
        let uri = SourceId::from(*uri);
        cache.get_or_parse(&uri, text, &macros);
        file_map.push(uri);
    }
    ContextAware::new(file_map, &cache)
}

fn context_kinds(ctx: &ContextAware) -> Vec<ContextIssue> {
    ctx.issues
        .iter()
        .flat_map(|diag| diag.kinds.iter())
        .map(|kind| match kind {
            IssueKind::Context(kind) => *kind,
            other => panic!("expected a context issue, got {other:?}"),
        })
        .collect()
}

/// Flattens a tree to `(path, property names)` pairs for shape comparison.
fn outline(node: &RuntimeNode) -> Vec<(String, Vec<String>)> {
    node.dfs()
        .map(|node| {
            (
                node.path_string(),
                node.properties
                    .iter()
                    .map(|prop| prop.name.clone())
                    .collect(),
            )
        })
        .collect()
}

fn seg(path: &[&str]) -> Vec<String> {
    path.iter().map(|s| (*s).to_owned()).collect()
}

#[test]
fn merges_children_across_files() {
    let ctx = context(&[
        ("file:///base.dtsi", "/ { soc { uart@0 { reg = <0 1>; }; }; };"),
        ("file:///board.dts", "/ { soc { spi@100 {}; }; };"),
    ]);
    assert_eq!(ctx.issues, Vec::new());
    assert_eq!(
        outline(&ctx.root),
        vec![
            ("/".to_owned(), vec![]),
            ("/soc".to_owned(), vec![]),
            ("/soc/uart@0".to_owned(), vec!["reg".to_owned()]),
            ("/soc/spi@100".to_owned(), vec![]),
        ]
    );

    // Both files contributed definitions to /soc.
    let soc = ctx.node_at_path(&seg(&["soc"])).unwrap();
    assert_eq!(soc.definitions.len(), 2);
}

#[test]
fn later_property_definition_wins() {
    let ctx = context(&[
        ("file:///base.dtsi", "/ { uart { status = \"disabled\"; }; };"),
        ("file:///board.dts", "/ { uart { status = \"okay\"; }; };"),
    ]);

    let uart = ctx.node_at_path(&seg(&["uart"])).unwrap();
    let status = uart.property("status").unwrap();
    assert_eq!(status.definitions.len(), 2);
    assert_eq!(status.replaced().len(), 1);
    assert_eq!(
        status.current().uri,
        SourceId::from("file:///board.dts")
    );

    // The shadowed definition carries the hint, tagged unnecessary, linked
    // to the effective one.
    assert_eq!(context_kinds(&ctx), vec![ContextIssue::DuplicatePropertyName]);
    let hint = &ctx.issues[0];
    assert_eq!(hint.severity, Severity::Hint);
    assert_eq!(hint.tags, vec![DiagnosticTag::Unnecessary]);
    assert_eq!(hint.uri, SourceId::from("file:///base.dtsi"));
    assert_eq!(hint.linked_to.len(), 1);
    assert_eq!(hint.linked_to[0].uri, SourceId::from("file:///board.dts"));
}

#[test]
fn ref_node_extends_target() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { intc: pic@0 {}; };\n&intc { #interrupt-cells = <2>; };",
    )]);
    assert_eq!(ctx.issues, Vec::new());

    let pic = ctx.node_at_path(&seg(&["pic@0"])).unwrap();
    assert!(pic.property("#interrupt-cells").is_some());
    assert_eq!(pic.referenced_by.len(), 1);
    assert_eq!(pic.labels.len(), 1);

    assert_eq!(ctx.node_by_label("intc").unwrap().name, "pic@0");
}

#[test]
fn unresolved_ref_is_reported() {
    let ctx = context(&[("file:///a.dts", "&nope { x; };")]);
    assert_eq!(
        context_kinds(&ctx),
        vec![ContextIssue::UnableToResolveChildNode]
    );
    assert_eq!(ctx.issues[0].args, vec!["&nope".to_owned()]);
}

#[test]
fn delete_node_detaches_subtree_and_labels() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { gone: victim { sub {}; }; };\n/delete-node/ &gone;\n&gone { x; };",
    )]);

    assert!(ctx.node_at_path(&seg(&["victim"])).is_none());
    // The deleted subtree's labels left the pool, so the later extension
    // cannot resolve.
    assert_eq!(
        context_kinds(&ctx),
        vec![ContextIssue::UnableToResolveChildNode]
    );
}

#[test]
fn delete_property_removes_and_missing_targets_report() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { uart { status = \"okay\"; /delete-property/ status; /delete-property/ other; /delete-node/ ghost; }; };",
    )]);

    let uart = ctx.node_at_path(&seg(&["uart"])).unwrap();
    assert!(uart.property("status").is_none());
    assert_eq!(
        context_kinds(&ctx),
        vec![
            ContextIssue::PropertyDoesNotExist,
            ContextIssue::NodeDoesNotExist,
        ]
    );
    assert_eq!(ctx.issues[0].args, vec!["other".to_owned()]);
    assert_eq!(ctx.issues[1].args, vec!["ghost".to_owned()]);
}

#[test]
fn duplicate_sibling_names_in_one_block() {
    let ctx = context(&[("file:///a.dts", "/ { twin {}; twin {}; };")]);
    assert_eq!(context_kinds(&ctx), vec![ContextIssue::DuplicateNodeName]);
    // Both definitions still merged into one node.
    let twin = ctx.node_at_path(&seg(&["twin"])).unwrap();
    assert_eq!(twin.definitions.len(), 2);

    // The same name in separate blocks is an override, not a duplicate.
    let ctx = context(&[("file:///a.dts", "/ { twin {}; };\n/ { twin {}; };")]);
    assert_eq!(ctx.issues, Vec::new());
}

#[test]
fn nodes_with_distinct_unit_addresses_are_distinct() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { serial@0 {}; serial@1 {}; };",
    )]);
    assert_eq!(ctx.issues, Vec::new());
    assert!(ctx.node_at_path(&seg(&["serial@0"])).is_some());
    assert!(ctx.node_at_path(&seg(&["serial@1"])).is_some());
}

#[test]
fn label_reuse_on_distinct_nodes_is_flagged() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { dup: first {}; dup: second {}; };",
    )]);
    assert_eq!(context_kinds(&ctx), vec![ContextIssue::LabelAlreadyInUse]);
    let diag = &ctx.issues[0];
    assert_eq!(diag.args, vec!["dup".to_owned()]);
    assert_eq!(diag.linked_to.len(), 1);

    // Re-labeling the same logical node is fine.
    let ctx = context(&[(
        "file:///a.dts",
        "/ { ok: node {}; };\n/ { ok: node {}; };",
    )]);
    assert_eq!(ctx.issues, Vec::new());
}

#[test]
fn resolve_path_follows_labels() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { soc { uart: serial@0 { child {}; }; }; };",
    )]);

    assert_eq!(
        ctx.resolve_path(&seg(&["&uart", "child"])),
        Some(seg(&["soc", "serial@0", "child"]))
    );
    assert_eq!(ctx.resolve_path(&seg(&["soc"])), Some(seg(&["soc"])));
    assert_eq!(ctx.resolve_path(&seg(&["&missing"])), None);
}

#[test]
fn merge_is_idempotent_modulo_shadow_hints() {
    let src = "/ { soc { uart@0 { reg = <0 1>; lbl: sub {}; }; }; };\n&lbl { x; };";
    let once = context(&[("file:///f.dts", src)]);
    let twice = context(&[("file:///f.dts", src), ("file:///f.dts", src)]);

    assert_eq!(outline(&once.root), outline(&twice.root));

    // The only extra issues from folding the same file twice are the
    // shadowing hints on properties.
    let extra: Vec<_> = twice
        .issues
        .iter()
        .filter(|diag| {
            !matches!(
                diag.kinds.as_slice(),
                [IssueKind::Context(ContextIssue::DuplicatePropertyName)]
            )
        })
        .collect();
    assert_eq!(extra, Vec::<&dts_diagnostic::Diagnostic>::new());
}

#[test]
fn top_level_property_attaches_to_root() {
    let ctx = context(&[("file:///a.dts", "model = \"board\";\n/ { };")]);
    let model = ctx.root.property("model").unwrap();
    assert_eq!(
        crate::value_profile(&model.current().ast.values),
        vec![PropertyType::String]
    );
}

#[test]
fn path_reference_extension() {
    let ctx = context(&[(
        "file:///a.dts",
        "/ { soc { serial@0 {}; }; };\n&{/soc/serial@0} { status = \"okay\"; };",
    )]);
    assert_eq!(ctx.issues, Vec::new());
    let serial = ctx.node_at_path(&seg(&["soc", "serial@0"])).unwrap();
    assert!(serial.property("status").is_some());
}
