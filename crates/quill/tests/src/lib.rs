#![deny(unsafe_code)]
//! # quill-tests
//!
//! Fixtures shared by the end-to-end (`tests/e2e`) and property
//! (`tests/property`) suites.

use std::rc::Rc;
use std::time::Duration;

use anyhow::{bail, Context};
use quill_async::AsyncCompileTask;
use quill_domain::ScriptDomain;
use quill_lang::Runtime;
use quill_reflect::Headless;
use quill_types::ScriptSettings;
use tempfile::TempDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// A domain over a fresh runtime, a headless host and a scratch working
/// directory that lives as long as the fixture.
pub struct Fixture {
    pub domain: ScriptDomain,
    pub host: Rc<Headless>,
    pub runtime: Rc<Runtime>,
    dir: TempDir,
}

impl Fixture {
    /// Default settings.
    pub fn new() -> anyhow::Result<Self> {
        Self::with(|settings| settings)
    }

    /// Settings adjusted by `configure` before the domain is built.
    pub fn with(configure: impl FnOnce(ScriptSettings) -> ScriptSettings) -> anyhow::Result<Self> {
        init_tracing();
        let dir = tempfile::tempdir().context("creating working directory")?;
        let settings = configure(ScriptSettings::default())
            .with_working_directory(dir.path())
            .context("setting working directory")?;
        let runtime = Rc::new(Runtime::new());
        let host = Rc::new(Headless::new());
        let domain = ScriptDomain::new(settings, Rc::clone(&runtime), host.clone())
            .context("building script domain")?;
        Ok(Self {
            domain,
            host,
            runtime,
            dir,
        })
    }

    pub fn dir(&self) -> &std::path::Path {
        self.dir.path()
    }

    /// Poll `task` the way a frame loop would until it is finalized.
    pub fn drive(&mut self, task: &mut AsyncCompileTask) -> anyhow::Result<()> {
        for _ in 0..4000 {
            if task.poll(&mut self.domain) {
                return Ok(());
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        bail!("compile task {} did not finish", task.id())
    }
}

/// Install a test-friendly subscriber once; `RUST_LOG` controls the filter.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer().without_time())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_uses_its_own_directory() {
        let fixture = Fixture::new().unwrap();
        assert_eq!(fixture.domain.settings().working_directory(), fixture.dir());
        assert!(fixture.domain.assemblies().is_empty());
    }
}
