//! End-to-end scenarios: the three canonical host flows.

use quill_async::AsyncCompileTask;
use quill_lang::Value;
use quill_tests::Fixture;

/// One empty type, security disabled: the assembly holds exactly that type
/// and it is the main type.
#[test]
fn single_empty_type_is_the_main_type() -> anyhow::Result<()> {
    let mut fx = Fixture::with(|s| s.with_security_checks(false))?;
    let assembly = fx.domain.compile_and_load_sources(["(type Empty)"])?;

    let types = assembly.types();
    assert_eq!(types.len(), 1);
    assert_eq!(Some(&types[0]), assembly.main_type().as_ref());
    assert_eq!(types[0].full_name(), "Empty");
    assert!(!assembly.module().is_audited());

    let result = fx.domain.last_compile_result().expect("compile result");
    assert!(result.success());
    assert_eq!(result.warnings().next().map(|d| d.code.as_str()), Some("QW0100"));
    Ok(())
}

/// `safe_call` of a method the type does not have yields `None`.
#[test]
fn safe_call_of_unknown_method_is_none() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let ty = fx.domain.compile_and_load_source(
        "(type Greeter (field name String \"quill\") (method greet () String (concat \"hi \" name)))",
    )?;
    let proxy = ty.create_instance(None, vec![])?;

    assert!(proxy.safe_call("wave", vec![]).is_none());
    assert!(proxy.safe_call("greet", vec![Value::Int(1)]).is_none());
    let greeting = proxy.safe_call("greet", vec![]).and_then(|o| o.into_value());
    assert_eq!(greeting, Some(Value::from("hi quill")));
    Ok(())
}

/// Two tasks started together both succeed, under distinct artifact names.
#[test]
fn concurrent_tasks_get_distinct_artifacts() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let mut first = AsyncCompileTask::start_sources(&fx.domain, ["(type First (field n Int 1))"]);
    let mut second =
        AsyncCompileTask::start_sources(&fx.domain, ["(type Second (field n Int 2))"]);

    fx.drive(&mut first)?;
    fx.drive(&mut second)?;
    assert!(first.is_successful());
    assert!(second.is_successful());

    let a = &first.result()?.artifact_name;
    let b = &second.result()?.artifact_name;
    assert_ne!(a, b);
    assert_eq!(first.assembly()?.name(), a);
    assert_eq!(second.main_type()?.name(), "Second");
    assert_eq!(fx.domain.assemblies().len(), 2);
    Ok(())
}
