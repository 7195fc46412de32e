//! End-to-end test: modules and debug symbols on disk.
//!
//! Compiles with symbols, stores the artifacts as a named reference, loads
//! them back, and checks that runtime faults point at the source.

use quill_domain::{DomainError, LoadError};
use quill_lang::{RuntimeError, Value};
use quill_tests::Fixture;
use quill_types::{CompileRequest, OutputKind};

const METER: &str = r#"
(namespace Tools
  (type Meter
    (field total Int 10)
    (method split ((parts Int)) Int
      (/ total parts))))
(entry Tools.Meter)
"#;

fn store(fx: &Fixture, name: &str) -> anyhow::Result<()> {
    let result = fx.domain.last_compile_result().expect("compile result");
    let module = result.module.as_ref().expect("module bytes");
    std::fs::write(fx.dir().join(format!("{name}.qmod")), module)?;
    if let Some(symbols) = &result.symbols {
        std::fs::write(fx.dir().join(format!("{name}.qsym")), symbols)?;
    }
    Ok(())
}

#[test]
fn named_references_load_with_symbols() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| s.with_debug_symbols(true))?;
    let source = fx.dir().join("meter.ql");
    std::fs::write(&source, METER)?;
    fx.domain.compile_and_load_file(&source)?;
    store(&fx, "meter")?;

    let assembly = fx.domain.load_reference("meter")?;
    assert!(assembly.module().symbols().is_some());
    let meter = assembly.main_type().expect("main type");
    assert_eq!(meter.full_name(), "Tools.Meter");

    let proxy = meter.create_instance(None, vec![])?;
    assert_eq!(
        proxy.call("split", vec![Value::Int(2)])?.into_value(),
        Some(Value::Int(5))
    );

    let err = proxy.call("split", vec![Value::Int(0)]).unwrap_err();
    assert_eq!(err.runtime_error(), Some(&RuntimeError::DivisionByZero));
    let location = err.location().expect("fault location");
    assert!(location.file.ends_with("meter.ql"));
    assert_eq!(location.line, 5);
    Ok(())
}

#[test]
fn without_symbols_faults_carry_no_location() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let meter = fx.domain.compile_and_load_source(METER)?;
    assert!(meter.module().symbols().is_none());

    let proxy = meter.create_instance(None, vec![])?;
    let err = proxy.call("split", vec![Value::Int(0)]).unwrap_err();
    assert!(err.location().is_none());
    Ok(())
}

#[test]
fn missing_references_are_load_errors() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let err = fx.domain.load_reference("absent").unwrap_err();
    match err {
        DomainError::Load(LoadError::MissingReference { name, path }) => {
            assert_eq!(name, "absent");
            assert_eq!(path, fx.dir().join("absent.qmod"));
        }
        other => panic!("unexpected error: {other}"),
    }
    Ok(())
}

#[test]
fn reload_swaps_in_a_fresh_module() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let meter = fx.domain.compile_and_load_source(METER)?;
    let old = fx.domain.assemblies()[0].clone();
    let old_proxy = meter.create_instance(None, vec![])?;

    let fresh = fx.domain.reload(&old)?;
    assert_ne!(fresh.id(), old.id());
    assert_eq!(fresh.module().content_hash(), old.module().content_hash());
    assert_eq!(fx.domain.assemblies().len(), 1);
    assert!(fx.domain.find_type("Meter").is_some_and(|t| t != meter));
    assert!(old_proxy.field("total").is_err());

    fx.domain.unload(&fresh)?;
    assert!(fx.domain.find_type("Meter").is_none());
    assert_eq!(fx.runtime.image_count(), 2);
    Ok(())
}

#[test]
fn executables_need_sources_and_an_entry() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let empty = CompileRequest::from_texts(Vec::<String>::new())
        .with_output_kind(OutputKind::Executable);
    let err = fx.domain.compile_and_load_request(empty).unwrap_err();
    assert!(matches!(err, DomainError::Compilation { .. }));
    let result = fx.domain.last_compile_result().expect("compile result");
    assert!(result.module.is_none());
    assert_eq!(result.first_error().map(|d| d.code.as_str()), Some("QE0002"));

    let no_entry = CompileRequest::from_texts(["(type Tool (field n Int))"])
        .with_output_kind(OutputKind::Executable);
    assert!(fx.domain.try_compile_and_load_request(no_entry).is_none());
    assert_eq!(
        fx.domain.last_compile_result().and_then(|r| r.first_error()).map(|d| d.code.clone()),
        Some("QE0112".to_string())
    );

    let with_entry = CompileRequest::from_texts([METER]).with_output_kind(OutputKind::Executable);
    let assembly = fx.domain.compile_and_load_request(with_entry)?;
    assert_eq!(assembly.main_type().map(|t| t.name().to_string()), Some("Meter".into()));
    Ok(())
}
