use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;

use quill_audit::{AuditFailure, AuditedModule, SecurityAuditor};
use quill_compiler::{CompilerBackend, ScriptCompiler};
use quill_lang::{Runtime, SymbolTable};
use quill_reflect::{EngineHost, Headless, LoadedModule, ScriptAssembly, ScriptType};
use quill_types::{CompileRequest, CompileResult, ScriptSettings, SecurityReport};
use tracing::{debug, info, warn};

use crate::error::{DomainError, DomainResult, LoadError};
use crate::pipeline::{CompilePipeline, PipelineOutput};

/// File extension of module artifacts.
pub const MODULE_EXTENSION: &str = "qmod";
/// File extension of debug symbol artifacts.
pub const SYMBOLS_EXTENSION: &str = "qsym";

/// The set of modules loaded at run time, masked from the host's own code.
///
/// Every load goes through [`commit`](Self::commit), which only accepts an
/// [`AuditedModule`]. Types are found only in assemblies this domain loaded;
/// native types registered on the shared [`Runtime`] never show up.
pub struct ScriptDomain {
    settings: ScriptSettings,
    runtime: Rc<Runtime>,
    host: Rc<dyn EngineHost>,
    pipeline: CompilePipeline,
    assemblies: Vec<ScriptAssembly>,
    last_compile: Option<CompileResult>,
    last_report: Option<SecurityReport>,
}

impl ScriptDomain {
    /// A domain over `runtime`, creating engine objects through `host`.
    pub fn new(
        settings: ScriptSettings,
        runtime: Rc<Runtime>,
        host: Rc<dyn EngineHost>,
    ) -> DomainResult<Self> {
        settings.validate()?;
        let pipeline = CompilePipeline::new(
            ScriptCompiler::new(&settings),
            SecurityAuditor::from_settings(&settings),
        );
        Ok(Self {
            settings,
            runtime,
            host,
            pipeline,
            assemblies: Vec::new(),
            last_compile: None,
            last_report: None,
        })
    }

    /// A domain with its own runtime and a [`Headless`] host.
    pub fn headless(settings: ScriptSettings) -> DomainResult<Self> {
        Self::new(settings, Rc::new(Runtime::new()), Rc::new(Headless::new()))
    }

    /// Swap the compiler backend (builder pattern).
    pub fn with_backend(mut self, backend: Arc<dyn CompilerBackend>) -> Self {
        self.pipeline = CompilePipeline::new(
            ScriptCompiler::with_backend(&self.settings, backend),
            self.pipeline.auditor().clone(),
        );
        self
    }

    pub fn settings(&self) -> &ScriptSettings {
        &self.settings
    }

    pub fn runtime(&self) -> &Rc<Runtime> {
        &self.runtime
    }

    pub fn host(&self) -> &Rc<dyn EngineHost> {
        &self.host
    }

    /// A detached copy of the compile/audit stages, safe to move to a worker.
    pub fn pipeline(&self) -> CompilePipeline {
        self.pipeline.clone()
    }

    /// Append the settings' references to a caller-built request.
    pub fn prepare(&self, request: CompileRequest) -> CompileRequest {
        request.with_references(self.settings.references.iter().cloned())
    }

    /// [`prepare`](Self::prepare), also replacing the options with the ones
    /// the settings describe.
    pub fn configure(&self, request: CompileRequest) -> CompileRequest {
        self.prepare(request.with_options(self.settings.compile_options()))
    }

    // ---- loading ----

    /// Load an audited module. The single entry point into the runtime.
    pub fn commit(&mut self, module: AuditedModule) -> DomainResult<ScriptAssembly> {
        let audited = module.is_audited();
        let (bytes, symbol_bytes, report) = module.into_parts();
        self.last_report = Some(report);

        let image = self.runtime.load(&bytes)?;
        let symbols = symbol_bytes
            .as_deref()
            .and_then(|raw| match SymbolTable::decode(raw) {
                Ok(table) => Some(table),
                Err(e) => {
                    warn!(module = %image.name, error = %e, "ignoring unreadable debug symbols");
                    None
                }
            });
        let module = LoadedModule::new(image, bytes, symbols, symbol_bytes, audited);
        let assembly = ScriptAssembly::new(
            module,
            Rc::clone(&self.host),
            *self.runtime.interpreter(),
            self.settings.discovery(),
        );
        info!(
            module = %assembly.name(),
            id = %assembly.id(),
            hash = %assembly.module().content_hash().to_hex(),
            types = assembly.types().len(),
            audited,
            "module loaded into domain"
        );
        self.assemblies.push(assembly.clone());
        Ok(assembly)
    }

    /// Record the outcome of a pipeline run and load its module.
    ///
    /// The compile result is stored before any error is returned, so it stays
    /// available through [`last_compile_result`](Self::last_compile_result).
    pub fn finish(&mut self, output: PipelineOutput) -> DomainResult<ScriptAssembly> {
        let PipelineOutput { result, audit } = output;
        let audit = match audit {
            Some(audit) if !result.has_errors() => audit,
            _ => {
                let error = DomainError::compilation(&result);
                self.last_compile = Some(result);
                return Err(error);
            }
        };
        self.last_compile = Some(result);
        match audit {
            Ok(module) => self.commit(module),
            Err(failure) => Err(self.rejected(failure)),
        }
    }

    fn rejected(&mut self, failure: AuditFailure) -> DomainError {
        if let Some(report) = failure.report() {
            self.last_report = Some(report.clone());
        }
        DomainError::from(failure)
    }

    /// Audit raw module bytes and load them.
    pub fn load_bytes(
        &mut self,
        bytes: Vec<u8>,
        symbols: Option<Vec<u8>>,
    ) -> DomainResult<ScriptAssembly> {
        match self.pipeline.auditor().certify(bytes, symbols) {
            Ok(module) => self.commit(module),
            Err(failure) => Err(self.rejected(failure)),
        }
    }

    /// Audit without loading. The report is also kept as the last one.
    pub fn check_security(&mut self, bytes: &[u8]) -> SecurityReport {
        let report = self.pipeline.auditor().probe(bytes);
        self.last_report = Some(report.clone());
        report
    }

    /// Load `<working directory>/<name>.qmod`.
    pub fn load_reference(&mut self, name: &str) -> DomainResult<ScriptAssembly> {
        self.settings.validate()?;
        let path = self
            .settings
            .working_directory()
            .join(format!("{name}.{MODULE_EXTENSION}"));
        if !path.is_file() {
            return Err(LoadError::MissingReference {
                name: name.to_string(),
                path,
            }
            .into());
        }
        self.load_path(path)
    }

    /// Load a module file plus its sibling `.qsym` file when one exists.
    pub fn load_path(&mut self, path: impl AsRef<Path>) -> DomainResult<ScriptAssembly> {
        let path = path.as_ref();
        let bytes = read(path)?;
        let symbols_path = path.with_extension(SYMBOLS_EXTENSION);
        let symbols = if symbols_path.is_file() {
            match read(&symbols_path) {
                Ok(raw) => Some(raw),
                Err(e) => {
                    warn!(error = %e, "ignoring unreadable debug symbols");
                    None
                }
            }
        } else {
            None
        };
        debug!(
            path = %path.display(),
            len = bytes.len(),
            symbols = symbols.is_some(),
            "loading module file"
        );
        self.load_bytes(bytes, symbols)
    }

    // ---- compile and load ----

    /// Compile one source text and return its main type.
    pub fn compile_and_load_source(&mut self, source: impl Into<String>) -> DomainResult<ScriptType> {
        let assembly = self.compile_and_load_sources([source.into()])?;
        main_type(&assembly)
    }

    pub fn compile_and_load_sources<I, S>(&mut self, sources: I) -> DomainResult<ScriptAssembly>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let request = self.configure(CompileRequest::from_texts(sources));
        self.run(&request)
    }

    /// Compile one source file and return its main type.
    pub fn compile_and_load_file(&mut self, path: impl Into<PathBuf>) -> DomainResult<ScriptType> {
        let assembly = self.compile_and_load_files([path.into()])?;
        main_type(&assembly)
    }

    pub fn compile_and_load_files<I, P>(&mut self, paths: I) -> DomainResult<ScriptAssembly>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        let request = self.configure(CompileRequest::from_files(paths));
        self.run(&request)
    }

    /// Compile a caller-built request. Its options are kept as given; the
    /// settings' references are appended.
    pub fn compile_and_load_request(
        &mut self,
        request: CompileRequest,
    ) -> DomainResult<ScriptAssembly> {
        let request = self.prepare(request);
        self.run(&request)
    }

    fn run(&mut self, request: &CompileRequest) -> DomainResult<ScriptAssembly> {
        let output = self.pipeline.run(request);
        self.finish(output)
    }

    // ---- logging counterparts ----

    fn attempt<T>(
        &mut self,
        operation: &'static str,
        f: impl FnOnce(&mut Self) -> DomainResult<T>,
    ) -> Option<T> {
        match f(self) {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(operation, error = %e, "script domain operation failed");
                None
            }
        }
    }

    pub fn try_load_bytes(
        &mut self,
        bytes: Vec<u8>,
        symbols: Option<Vec<u8>>,
    ) -> Option<ScriptAssembly> {
        self.attempt("load_bytes", |d| d.load_bytes(bytes, symbols))
    }

    pub fn try_load_reference(&mut self, name: &str) -> Option<ScriptAssembly> {
        self.attempt("load_reference", |d| d.load_reference(name))
    }

    pub fn try_load_path(&mut self, path: impl AsRef<Path>) -> Option<ScriptAssembly> {
        self.attempt("load_path", |d| d.load_path(path))
    }

    pub fn try_compile_and_load_source(&mut self, source: impl Into<String>) -> Option<ScriptType> {
        self.attempt("compile_and_load_source", |d| d.compile_and_load_source(source))
    }

    pub fn try_compile_and_load_sources<I, S>(&mut self, sources: I) -> Option<ScriptAssembly>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attempt("compile_and_load_sources", |d| d.compile_and_load_sources(sources))
    }

    pub fn try_compile_and_load_file(&mut self, path: impl Into<PathBuf>) -> Option<ScriptType> {
        self.attempt("compile_and_load_file", |d| d.compile_and_load_file(path))
    }

    pub fn try_compile_and_load_files<I, P>(&mut self, paths: I) -> Option<ScriptAssembly>
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.attempt("compile_and_load_files", |d| d.compile_and_load_files(paths))
    }

    pub fn try_compile_and_load_request(
        &mut self,
        request: CompileRequest,
    ) -> Option<ScriptAssembly> {
        self.attempt("compile_and_load_request", |d| d.compile_and_load_request(request))
    }

    // ---- queries ----

    /// Result of the most recent compilation, successful or not.
    pub fn last_compile_result(&self) -> Option<&CompileResult> {
        self.last_compile.as_ref()
    }

    /// Report of the most recent audit, passed or not.
    pub fn last_security_report(&self) -> Option<&SecurityReport> {
        self.last_report.as_ref()
    }

    /// Loaded assemblies, oldest first.
    pub fn assemblies(&self) -> &[ScriptAssembly] {
        &self.assemblies
    }

    pub fn is_loaded(&self, assembly: &ScriptAssembly) -> bool {
        self.assemblies.contains(assembly)
    }

    /// First type with this name across every loaded assembly.
    pub fn find_type(&self, name: &str) -> Option<ScriptType> {
        self.assemblies.iter().find_map(|a| a.find_type(name))
    }

    /// Subtypes of `ancestor` across every loaded assembly.
    pub fn find_subtypes_of(&self, ancestor: &str) -> Vec<ScriptType> {
        self.assemblies
            .iter()
            .flat_map(|a| a.find_subtypes_of(ancestor))
            .collect()
    }

    // ---- lifecycle ----

    /// Remove an assembly from the mask and drop every cache built over it.
    pub fn unload(&mut self, assembly: &ScriptAssembly) -> DomainResult<()> {
        let Some(position) = self.assemblies.iter().position(|a| a == assembly) else {
            return Err(DomainError::NotLoaded(assembly.name().to_string()));
        };
        let removed = self.assemblies.remove(position);
        removed.invalidate();
        info!(module = %removed.name(), id = %removed.id(), "module unloaded from domain");
        Ok(())
    }

    /// Load the bytes behind `assembly` again as a fresh module, replacing it
    /// when it is still loaded. A failed reload leaves `assembly` loaded.
    pub fn reload(&mut self, assembly: &ScriptAssembly) -> DomainResult<ScriptAssembly> {
        let module = Rc::clone(assembly.module());
        debug!(module = %module.name(), "reloading module");
        let fresh = self.load_bytes(
            module.bytes().to_vec(),
            module.symbol_bytes().map(<[u8]>::to_vec),
        )?;
        if self.is_loaded(assembly) {
            self.unload(assembly)?;
        }
        Ok(fresh)
    }
}

fn main_type(assembly: &ScriptAssembly) -> DomainResult<ScriptType> {
    assembly
        .main_type()
        .ok_or_else(|| DomainError::NoTypes(assembly.name().to_string()))
}

fn read(path: &Path) -> Result<Vec<u8>, LoadError> {
    std::fs::read(path).map_err(|source| LoadError::Io {
        path: path.to_path_buf(),
        source,
    })
}
