//! End-to-end test: nothing reaches the runtime without passing the auditor.

use quill_domain::{DomainError, LoadError};
use quill_tests::Fixture;
use quill_types::{Restriction, RestrictionKind, RestrictionMode};

#[test]
fn default_policy_blocks_code_emission() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let err = fx
        .domain
        .compile_and_load_source("(type Forge (field writer Host.Emit.ILWriter))")
        .unwrap_err();

    let report = err.security_report().expect("security rejection");
    assert_eq!(report.violation_count(), 1);
    let violation = &report.violations[0];
    assert_eq!(violation.kind, RestrictionKind::Namespace);
    assert_eq!(violation.mode, RestrictionMode::Exclusive);
    assert_eq!(violation.rule, "Host.Emit");
    assert_eq!(fx.runtime.image_count(), 0);
    assert!(fx.domain.assemblies().is_empty());
    Ok(())
}

#[test]
fn exclusive_reference_names_the_reference() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| s.with_reference("bytecode-weaver"))?;
    let err = fx
        .domain
        .compile_and_load_sources([r#"(use "bytecode-weaver") (type Patch (field n Int))"#])
        .unwrap_err();
    assert!(matches!(err, DomainError::Security(_)));
    assert!(err.to_string().contains("bytecode-weaver"));
    assert!(fx
        .domain
        .last_security_report()
        .expect("report")
        .mentions("bytecode-weaver"));
    Ok(())
}

#[test]
fn inclusive_namespaces_form_an_allow_list() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| {
        s.without_restrictions()
            .with_namespace_restriction(Restriction::inclusive("Game"))
            .with_namespace_restriction(Restriction::inclusive("Math"))
    })?;

    assert!(fx
        .domain
        .try_compile_and_load_source("(type Ok (field v Math.Vec3) (field s Game.Ui.Score))")
        .is_some());

    let err = fx
        .domain
        .compile_and_load_source("(type Spy (field sock Net.Tcp.Socket) (field v Math.Vec3))")
        .unwrap_err();
    let report = err.security_report().expect("security rejection");
    assert_eq!(report.violation_count(), 1);
    assert!(report.mentions("Net.Tcp"));
    assert_eq!(report.violations[0].rule, "Game, Math");
    Ok(())
}

#[test]
fn disabled_checks_load_anything_readable() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| s.with_security_checks(false))?;
    let ty = fx
        .domain
        .compile_and_load_source("(type Forge (field writer Host.Emit.ILWriter))")?;
    assert!(!ty.module().is_audited());
    assert_eq!(fx.runtime.image_count(), 1);

    let err = fx.domain.load_bytes(b"QMOD".to_vec(), None).unwrap_err();
    assert!(matches!(err, DomainError::Load(LoadError::Image(_))));
    Ok(())
}

#[test]
fn probing_never_loads() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| s.with_security_checks(false))?;
    fx.domain
        .compile_and_load_source("(type Forge (field writer Host.Emit.ILWriter))")?;
    let bytes = fx
        .domain
        .last_compile_result()
        .and_then(|r| r.module.clone())
        .expect("module bytes");

    let mut strict = Fixture::new()?;
    let report = strict.domain.check_security(&bytes);
    assert!(report.audited);
    assert!(!report.passed());
    assert!(report.mentions("Host.Emit"));
    assert_eq!(strict.runtime.image_count(), 0);
    assert!(strict.domain.try_load_bytes(bytes, None).is_none());
    Ok(())
}
