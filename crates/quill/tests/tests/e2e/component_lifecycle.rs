//! End-to-end test: engine-backed instances through a headless host.
//!
//! Components attach to a node and their routines run on the host's frame
//! ticks; managed objects come from the host factory; both are destroyed by
//! the host on dispose.

use quill_lang::Value;
use quill_reflect::{CallOutcome, Capability, Node, ProxyError};
use quill_tests::Fixture;

const LAMPS: &str = r#"
(namespace Lights
  (type Lamp (extends Engine.Component)
    (field lit Bool false)
    (field pulses Int 0)
    (routine pulse ((times Int))
      (set pulses times)
      (yield)
      (set lit true)
      (yield)
      (set lit false)))
  (type Grid (extends Engine.ManagedObject)
    (field load Int 3))
  (type Bulb
    (field watts Int 40)))
"#;

#[test]
fn component_routines_run_on_host_ticks() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let assembly = fx.domain.compile_and_load_sources([LAMPS])?;
    let lamp = assembly.find_type("Lamp").expect("Lamp");
    assert_eq!(lamp.capability(), Capability::EngineComponent);

    assert!(matches!(
        lamp.create_instance(None, vec![]),
        Err(ProxyError::ContainerRequired(_))
    ));

    let node = Node::new("porch");
    let proxy = lamp.create_instance(Some(&node), vec![])?;
    assert_eq!(node.component_count(), 1);

    let outcome = proxy.call("pulse", vec![Value::Int(2)])?;
    assert!(matches!(outcome, CallOutcome::Scheduled(_)));
    assert_eq!(fx.host.running_routines(), 1);

    fx.host.tick();
    assert_eq!(proxy.field("pulses")?, Value::Int(2));
    fx.host.tick();
    assert_eq!(proxy.field("lit")?, Value::Bool(true));
    let report = fx.host.tick();
    assert_eq!(report.completed, 1);
    assert_eq!(proxy.field("lit")?, Value::Bool(false));

    proxy.dispose()?;
    assert_eq!(node.component_count(), 0);
    assert!(matches!(proxy.dispose(), Err(ProxyError::AlreadyDisposed(_))));
    Ok(())
}

#[test]
fn disposing_mid_routine_stops_it_quietly() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let assembly = fx.domain.compile_and_load_sources([LAMPS])?;
    let node = Node::new("hall");
    let proxy = assembly
        .find_type("Lamp")
        .expect("Lamp")
        .create_instance(Some(&node), vec![])?;

    proxy.call("pulse", vec![Value::Int(5)])?;
    fx.host.tick();
    proxy.dispose()?;

    let report = fx.host.tick();
    assert_eq!(report.faulted, 0);
    assert_eq!(fx.host.running_routines(), 0);
    Ok(())
}

#[test]
fn managed_objects_belong_to_the_host() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let assembly = fx.domain.compile_and_load_sources([LAMPS])?;
    let grid = assembly.find_type("Lights.Grid").expect("Grid");
    assert_eq!(grid.capability(), Capability::EngineManagedObject);

    let proxy = grid.create_instance(None, vec![])?;
    assert_eq!(fx.host.live_objects(), 1);
    assert_eq!(proxy.field("load")?, Value::Int(3));
    assert!(matches!(
        grid.create_instance(None, vec![Value::Int(1)]),
        Err(ProxyError::ArgumentsNotSupported(_))
    ));

    proxy.dispose()?;
    assert_eq!(fx.host.live_objects(), 0);
    Ok(())
}

#[test]
fn plain_objects_stay_with_the_caller() -> anyhow::Result<()> {
    let mut fx = Fixture::new()?;
    let assembly = fx.domain.compile_and_load_sources([LAMPS])?;
    let bulb = assembly.find_type("Bulb").expect("Bulb");
    assert_eq!(bulb.capability(), Capability::PlainObject);

    let proxy = bulb.create_instance(None, vec![])?;
    assert_eq!(proxy.field("watts")?, Value::Int(40));
    assert_eq!(fx.host.live_objects(), 0);
    proxy.dispose()?;
    assert!(proxy.instance().is_destroyed());
    Ok(())
}
