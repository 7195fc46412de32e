//! Property tests: namespace restrictions match whole segments.

use proptest::prelude::*;
use quill_audit::SecurityAuditor;
use quill_lang::{compile_units, ModuleImage, SourceUnit};
use quill_types::{OutputKind, Restriction, SecurityPolicy};

/// Dotted namespace of one to three capitalized segments.
fn arb_namespace() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[A-Z][a-z]{2,6}", 1..4)
}

/// A module whose only type has a field of `namespace.Thing`.
fn module_using(namespace: &str) -> ModuleImage {
    let source = format!("(type Probe (field f {namespace}.Thing))");
    compile_units(
        "QuillModule1",
        &[SourceUnit::new("probe.ql", source)],
        &[],
        OutputKind::Library,
    )
    .image
    .unwrap()
}

fn auditor(restriction: Restriction) -> SecurityAuditor {
    SecurityAuditor::new(SecurityPolicy::permissive().with_namespace_restriction(restriction))
}

proptest! {
    /// Forbidding the root forbids every namespace under it.
    #[test]
    fn exclusive_root_flags_children(segments in arb_namespace()) {
        let namespace = segments.join(".");
        let image = module_using(&namespace);
        let violations = auditor(Restriction::exclusive(segments[0].clone())).inspect(&image);
        prop_assert_eq!(violations.len(), 1);
        prop_assert_eq!(&violations[0].offending, &namespace);
    }

    /// Allowing the root allows every namespace under it.
    #[test]
    fn inclusive_root_admits_children(segments in arb_namespace()) {
        let image = module_using(&segments.join("."));
        let violations = auditor(Restriction::inclusive(segments[0].clone())).inspect(&image);
        prop_assert!(violations.is_empty());
    }

    /// A rule that is only a string prefix of the root never matches.
    #[test]
    fn partial_segments_never_match(segments in arb_namespace()) {
        let root = &segments[0];
        let partial = &root[..root.len() - 1];
        let image = module_using(&segments.join("."));

        prop_assert!(auditor(Restriction::exclusive(partial)).inspect(&image).is_empty());
        prop_assert_eq!(auditor(Restriction::inclusive(partial)).inspect(&image).len(), 1);
    }
}
