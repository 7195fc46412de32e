//! Property tests: every compilation gets its own artifact, and artifacts
//! never stay behind in the working directory.

use std::collections::HashSet;

use proptest::prelude::*;
use quill_compiler::ScriptCompiler;
use quill_types::{CompileRequest, ScriptSettings};

fn settings(dir: &tempfile::TempDir) -> ScriptSettings {
    ScriptSettings::default()
        .with_working_directory(dir.path())
        .unwrap()
        .with_debug_symbols(true)
}

/// A type with `fields` integer fields.
fn source(fields: usize) -> String {
    let fields: String = (0..fields).map(|i| format!(" (field f{i} Int {i})")).collect();
    format!("(type Sample{fields})")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    /// Names stay unique across compilers and threads.
    #[test]
    fn artifact_names_never_repeat(per_thread in 1usize..5, threads in 1usize..4) {
        let dir = tempfile::tempdir().unwrap();
        let compiler = ScriptCompiler::new(&settings(&dir));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let compiler = compiler.clone();
                std::thread::spawn(move || {
                    (0..per_thread)
                        .map(|_| compiler.compile(&CompileRequest::from_texts(["(type A)"])).artifact_name)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let names: HashSet<String> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        prop_assert_eq!(names.len(), per_thread * threads);
    }

    /// Module and symbol bytes are read back and the files removed.
    #[test]
    fn compiling_leaves_no_files(fields in 0usize..6) {
        let dir = tempfile::tempdir().unwrap();
        let settings = settings(&dir);
        let request = CompileRequest::from_texts([source(fields)])
            .with_options(settings.compile_options());
        let result = ScriptCompiler::new(&settings).compile(&request);
        prop_assert!(result.success());
        prop_assert!(result.module.is_some());
        prop_assert!(result.symbols.is_some());
        prop_assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
