//! Compile tasks that run off the host thread.
//!
//! A task owns one worker thread. The worker runs the domain's
//! [`CompilePipeline`] (compile, then audit) and sends the outcome through a
//! oneshot channel. Nothing on the worker touches the domain: the load is
//! committed when the host calls [`AsyncCompileTask::poll`] from its frame
//! loop.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use quill_domain::{CompilePipeline, PipelineOutput, ScriptDomain};
use quill_reflect::{ScriptAssembly, ScriptType};
use quill_types::{
    CompileDiagnostic, CompileRequest, CompileResult, SecurityReport, SecurityViolation,
};
use tokio::sync::oneshot::{self, error::TryRecvError};
use tracing::{debug, info, warn};

use crate::error::{TaskError, TaskResult};

/// Unique identifier of a compile task.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a task. Transitions only move forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Spawned; the worker has not picked it up yet.
    Pending,
    /// The worker is compiling, or has finished and awaits a `poll`.
    Running,
    /// Finalized with a loaded module.
    Succeeded,
    /// Finalized without one.
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

struct Settled {
    result: CompileResult,
    report: Option<SecurityReport>,
    outcome: Result<ScriptAssembly, String>,
}

/// A compile-and-load running on a worker thread.
///
/// Must be polled until [`is_done`](Self::is_done) even when the result is
/// not wanted; dropping an undrained task detaches its worker and logs a
/// warning.
pub struct AsyncCompileTask {
    id: TaskId,
    started: Arc<AtomicBool>,
    receiver: Option<oneshot::Receiver<PipelineOutput>>,
    worker: Option<JoinHandle<()>>,
    settled: Option<Settled>,
}

impl AsyncCompileTask {
    /// Run `pipeline` over `request` on a new worker thread.
    pub fn spawn(pipeline: CompilePipeline, request: CompileRequest) -> Self {
        let id = TaskId::generate();
        let started = Arc::new(AtomicBool::new(false));
        let (sender, receiver) = oneshot::channel();
        let worker = {
            let id = id.clone();
            let started = Arc::clone(&started);
            std::thread::spawn(move || {
                started.store(true, Ordering::Release);
                let output = pipeline.run(&request);
                if sender.send(output).is_err() {
                    debug!(task = %id, "compile task dropped before its worker finished");
                }
            })
        };
        debug!(task = %id, "compile task spawned");
        Self {
            id,
            started,
            receiver: Some(receiver),
            worker: Some(worker),
            settled: None,
        }
    }

    /// Compile a caller-built request with the domain's pipeline and
    /// references.
    pub fn start(domain: &ScriptDomain, request: CompileRequest) -> Self {
        Self::spawn(domain.pipeline(), domain.prepare(request))
    }

    /// Compile source texts with the domain's settings.
    pub fn start_sources<I, S>(domain: &ScriptDomain, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = domain.configure(CompileRequest::from_texts(sources));
        Self::spawn(domain.pipeline(), request)
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn state(&self) -> TaskState {
        match &self.settled {
            Some(settled) if settled.outcome.is_ok() => TaskState::Succeeded,
            Some(_) => TaskState::Failed,
            None if self.started.load(Ordering::Acquire) => TaskState::Running,
            None => TaskState::Pending,
        }
    }

    /// Whether the task has been finalized. Once true, stays true.
    pub fn is_done(&self) -> bool {
        self.settled.is_some()
    }

    pub fn is_successful(&self) -> bool {
        self.state() == TaskState::Succeeded
    }

    /// Check on the worker and, once it has finished, commit its module into
    /// `domain`. Returns [`is_done`](Self::is_done).
    ///
    /// Call from the host thread, typically once per frame. Never blocks on
    /// the compilation itself.
    pub fn poll(&mut self, domain: &mut ScriptDomain) -> bool {
        if self.settled.is_some() {
            return true;
        }
        let Some(receiver) = self.receiver.as_mut() else {
            return false;
        };
        let received = match receiver.try_recv() {
            Ok(output) => Some(output),
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Closed) => None,
        };
        self.receiver = None;
        let panic = self.join_worker();
        self.settle(domain, received, panic);
        true
    }

    /// Block until the worker finishes, then finalize like
    /// [`poll`](Self::poll). Returns [`is_successful`](Self::is_successful).
    ///
    /// Meant for tools and tests; a frame loop should use `poll`. Safe to
    /// call from inside an async runtime: it joins the worker thread rather
    /// than blocking on the channel.
    pub fn wait(&mut self, domain: &mut ScriptDomain) -> bool {
        if let Some(mut receiver) = self.receiver.take() {
            // the worker sends before it exits
            let panic = self.join_worker();
            let received = receiver.try_recv().ok();
            self.settle(domain, received, panic);
        }
        self.is_successful()
    }

    fn settle(
        &mut self,
        domain: &mut ScriptDomain,
        received: Option<PipelineOutput>,
        panic: Option<String>,
    ) {
        let settled = match received {
            Some(output) => {
                let report = match &output.audit {
                    Some(Ok(module)) => Some(module.report().clone()),
                    Some(Err(failure)) => failure.report().cloned(),
                    None => None,
                };
                let result = output.result.clone();
                let outcome = domain.finish(output).map_err(|e| e.to_string());
                Settled {
                    result,
                    report,
                    outcome,
                }
            }
            None => {
                let reason = format!(
                    "compile worker stopped without a result: {}",
                    panic.as_deref().unwrap_or("channel closed")
                );
                Settled {
                    result: CompileResult {
                        diagnostics: vec![CompileDiagnostic::general("QE9999", reason.clone())],
                        ..CompileResult::default()
                    },
                    report: None,
                    outcome: Err(reason),
                }
            }
        };
        match &settled.outcome {
            Ok(assembly) => info!(
                task = %self.id,
                module = %assembly.name(),
                "compile task succeeded"
            ),
            Err(reason) => warn!(task = %self.id, %reason, "compile task failed"),
        }
        self.settled = Some(settled);
    }

    fn join_worker(&mut self) -> Option<String> {
        let worker = self.worker.take()?;
        worker.join().err().map(|payload| panic_message(payload.as_ref()))
    }

    fn settled(&self) -> TaskResult<&Settled> {
        self.settled
            .as_ref()
            .ok_or_else(|| TaskError::NotFinished(self.id.clone()))
    }

    /// The compile result, available once finalized whether or not the
    /// module loaded.
    pub fn result(&self) -> TaskResult<&CompileResult> {
        Ok(&self.settled()?.result)
    }

    pub fn diagnostics(&self) -> TaskResult<&[CompileDiagnostic]> {
        Ok(&self.settled()?.result.diagnostics)
    }

    /// `None` when the audit never ran.
    pub fn security_report(&self) -> TaskResult<Option<&SecurityReport>> {
        Ok(self.settled()?.report.as_ref())
    }

    pub fn violations(&self) -> TaskResult<&[SecurityViolation]> {
        Ok(self
            .settled()?
            .report
            .as_ref()
            .map_or(&[][..], |r| r.violations.as_slice()))
    }

    pub fn assembly(&self) -> TaskResult<&ScriptAssembly> {
        match &self.settled()?.outcome {
            Ok(assembly) => Ok(assembly),
            Err(reason) => Err(TaskError::Failed {
                task: self.id.clone(),
                reason: reason.clone(),
            }),
        }
    }

    pub fn main_type(&self) -> TaskResult<ScriptType> {
        let assembly = self.assembly()?;
        assembly.main_type().ok_or_else(|| TaskError::Failed {
            task: self.id.clone(),
            reason: format!("module `{}` has no discoverable types", assembly.name()),
        })
    }
}

impl Drop for AsyncCompileTask {
    fn drop(&mut self) {
        if self.settled.is_none() {
            warn!(
                task = %self.id,
                state = %self.state(),
                "compile task dropped before it was drained, detaching worker"
            );
        }
    }
}

impl fmt::Debug for AsyncCompileTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncCompileTask")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{mpsc, Mutex};
    use std::time::Duration;

    use quill_compiler::{BackendInvocation, BackendResult, CompilerBackend, QuillBackend};
    use quill_types::ScriptSettings;
    use tempfile::TempDir;

    /// Holds every compilation until the test releases it.
    struct Gated {
        gate: Mutex<mpsc::Receiver<()>>,
    }

    impl CompilerBackend for Gated {
        fn name(&self) -> &str {
            "gated"
        }

        fn emit(&self, invocation: &BackendInvocation<'_>) -> BackendResult<Vec<CompileDiagnostic>> {
            let _ = self.gate.lock().unwrap().recv();
            QuillBackend.emit(invocation)
        }
    }

    fn domain() -> (ScriptDomain, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let settings = ScriptSettings::default()
            .with_working_directory(dir.path())
            .unwrap();
        (ScriptDomain::headless(settings).unwrap(), dir)
    }

    fn gated_domain() -> (ScriptDomain, TempDir, mpsc::Sender<()>) {
        let (release, gate) = mpsc::channel();
        let (domain, dir) = domain();
        let backend = Arc::new(Gated {
            gate: Mutex::new(gate),
        });
        (domain.with_backend(backend), dir, release)
    }

    fn drive(task: &mut AsyncCompileTask, domain: &mut ScriptDomain) {
        for _ in 0..2000 {
            if task.poll(domain) {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("task {} never finished", task.id());
    }

    #[test]
    fn results_fault_until_finalized() {
        let (mut domain, _dir, release) = gated_domain();
        let mut task = AsyncCompileTask::start_sources(&domain, ["(type Late (field n Int))"]);

        assert!(!task.poll(&mut domain));
        assert!(!task.is_done());
        assert!(!task.is_successful());
        assert!(matches!(task.state(), TaskState::Pending | TaskState::Running));
        assert!(matches!(task.result(), Err(TaskError::NotFinished(_))));
        assert!(matches!(task.assembly(), Err(TaskError::NotFinished(_))));
        assert!(matches!(task.main_type(), Err(TaskError::NotFinished(_))));
        assert!(matches!(task.diagnostics(), Err(TaskError::NotFinished(_))));
        assert!(matches!(task.violations(), Err(TaskError::NotFinished(_))));
        assert!(domain.assemblies().is_empty());

        release.send(()).unwrap();
        drive(&mut task, &mut domain);
        for _ in 0..3 {
            assert!(task.poll(&mut domain));
            assert!(task.is_done());
        }
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.main_type().unwrap().name(), "Late");
        assert!(task.violations().unwrap().is_empty());
        assert_eq!(domain.assemblies().len(), 1);
    }

    #[tokio::test]
    async fn wait_inside_a_runtime() {
        let (mut domain, _dir) = domain();
        let mut task = AsyncCompileTask::start_sources(&domain, ["(type Awaited (field n Int))"]);
        assert!(task.wait(&mut domain));
        assert_eq!(task.state(), TaskState::Succeeded);
        assert_eq!(task.main_type().unwrap().name(), "Awaited");
        // finalized once
        assert!(task.wait(&mut domain));
        assert_eq!(domain.assemblies().len(), 1);
    }

    #[test]
    fn compile_errors_fail_the_task() {
        let (mut domain, _dir) = domain();
        let mut task = AsyncCompileTask::start_sources(&domain, ["(type Bad (field x Nope))"]);
        drive(&mut task, &mut domain);

        assert_eq!(task.state(), TaskState::Failed);
        assert!(task.result().unwrap().has_errors());
        assert_eq!(task.diagnostics().unwrap()[0].code, "QE0100");
        assert!(task.security_report().unwrap().is_none());
        assert!(matches!(task.assembly(), Err(TaskError::Failed { .. })));
        assert!(domain.assemblies().is_empty());
        assert!(domain.last_compile_result().unwrap().has_errors());
    }

    #[test]
    fn violations_surface_after_finalization() {
        let (mut domain, _dir) = domain();
        let mut task =
            AsyncCompileTask::start_sources(&domain, ["(type Writer (field out Host.Emit.Stream))"]);
        assert!(!task.wait(&mut domain));

        let violations = task.violations().unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].offending, "Host.Emit");
        assert!(task.result().unwrap().success());
        assert!(domain.assemblies().is_empty());
    }

    #[test]
    fn caller_requests_keep_their_options() {
        let (mut domain, _dir) = domain();
        let request = CompileRequest::from_texts(Vec::<String>::new())
            .with_output_kind(quill_types::OutputKind::Executable);
        let mut task = AsyncCompileTask::start(&domain, request);
        assert!(!task.wait(&mut domain));
        assert_eq!(task.diagnostics().unwrap()[0].code, "QE0002");
        assert!(task.result().unwrap().module.is_none());
    }

    #[test]
    fn dropping_an_undrained_task_detaches() {
        let (domain, _dir, release) = gated_domain();
        let task = AsyncCompileTask::start_sources(&domain, ["(type Orphan)"]);
        let id = task.id().clone();
        drop(task);
        release.send(()).unwrap();
        assert!(!id.0.is_empty());
    }

    #[test]
    fn tasks_get_distinct_ids() {
        let (mut domain, _dir) = domain();
        let mut a = AsyncCompileTask::start_sources(&domain, ["(type A)"]);
        let mut b = AsyncCompileTask::start_sources(&domain, ["(type B)"]);
        assert_ne!(a.id(), b.id());
        assert!(a.wait(&mut domain));
        assert!(b.wait(&mut domain));
    }
}
