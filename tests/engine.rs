#![cfg(unix)]

use async_trait::async_trait;
use kiln::engine::environment::{Invocation, ProcessRunner, ToolStatus};
use kiln::engine::error::{EngineError, FailureKind};
use kiln::engine::fetcher::FetchOutcome;
use kiln::template::expand_pipeline;
use kiln::{load_pipeline, Engine, EngineSettings, Jobs, Pipeline, BUILTIN_PIPELINE};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

/// What tree-sitter's makefile leaves in its tree.
#[derive(Debug, Default, Clone, Copy)]
enum MakeLayout {
    /// `libtree-sitter.so.0.0` with `.so` and `.so.0` symlinked to it.
    #[default]
    Soname,
    /// Only `libtree-sitter.so`.
    Plain,
}

/// Records every invocation and imitates the side effects the real tools would have.
#[derive(Debug, Default)]
struct FakeRunner {
    log: Mutex<Vec<Invocation>>,
    fail_program: Option<String>,
    make_layout: MakeLayout,
}

impl FakeRunner {
    fn failing(program: &str) -> Self {
        FakeRunner {
            fail_program: Some(program.to_string()),
            ..Default::default()
        }
    }

    fn with_layout(make_layout: MakeLayout) -> Self {
        FakeRunner {
            make_layout,
            ..Default::default()
        }
    }

    fn programs(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .map(|inv| inv.program.clone())
            .collect()
    }

    fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().unwrap().clone()
    }
}

fn arg_after<'a>(inv: &'a Invocation, flag: &str) -> Option<&'a str> {
    inv.args
        .iter()
        .position(|arg| arg == flag)
        .and_then(|idx| inv.args.get(idx + 1))
        .map(String::as_str)
}

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    // ET_DYN, x86_64
    let mut elf = vec![0x7F, b'E', b'L', b'F', 2, 1, 1];
    elf.resize(16, 0);
    elf.extend_from_slice(&[3, 0, 0x3E, 0]);
    elf.resize(64, 0);
    std::fs::write(path, elf).unwrap();
}

fn relink(target: &str, link: &Path) {
    let _ = std::fs::remove_file(link);
    std::os::unix::fs::symlink(target, link).unwrap();
}

fn make_outputs(dir: &Path, layout: MakeLayout) {
    match layout {
        MakeLayout::Soname => {
            touch(&dir.join("libtree-sitter.so.0.0"));
            relink("libtree-sitter.so.0.0", &dir.join("libtree-sitter.so.0"));
            relink("libtree-sitter.so.0.0", &dir.join("libtree-sitter.so"));
        }
        MakeLayout::Plain => touch(&dir.join("libtree-sitter.so")),
    }
}

#[async_trait]
impl ProcessRunner for FakeRunner {
    async fn run(&self, invocation: &Invocation) -> io::Result<ToolStatus> {
        self.log.lock().unwrap().push(invocation.clone());

        if self.fail_program.as_deref() == Some(invocation.program.as_str()) {
            return Ok(ToolStatus::from_code(Some(2)));
        }

        let cwd = &invocation.cwd;
        match invocation.program.as_str() {
            "git" => {
                let target = cwd.join(invocation.args.last().unwrap());
                std::fs::create_dir_all(&target).unwrap();
                if target.ends_with("tree-sitter-c") {
                    touch(&target.join("src/parser.c"));
                }
            }
            "clang" => touch(&cwd.join(arg_after(invocation, "-o").unwrap())),
            "make" => make_outputs(&cwd.join(arg_after(invocation, "-C").unwrap()), self.make_layout),
            "cmake" => match arg_after(invocation, "--build") {
                Some(dir) => touch(&cwd.join(dir).join("libtree-sitter-jni.so")),
                None => std::fs::create_dir_all(cwd.join(arg_after(invocation, "-B").unwrap())).unwrap(),
            },
            "ninja" => touch(&cwd.join(arg_after(invocation, "-C").unwrap()).join("libtree-sitter-jni.so")),
            _ => {}
        }

        Ok(ToolStatus::SUCCESS)
    }
}

fn pipeline(jobs: Jobs) -> Pipeline {
    let mut pipeline = load_pipeline(BUILTIN_PIPELINE, None).unwrap();
    expand_pipeline(&mut pipeline, jobs.get()).unwrap();
    pipeline
}

fn engine(root: &Path, runner: Arc<FakeRunner>) -> (Engine, Pipeline) {
    let jobs = Jobs::new(8);
    let pipeline = pipeline(jobs);
    std::fs::create_dir_all(root.join("lib/src/main/cpp")).unwrap();

    let settings = EngineSettings::from_pipeline(root, &pipeline, jobs);
    (Engine::with_runner(settings, runner), pipeline)
}

fn native(root: &Path) -> PathBuf {
    root.join("lib/build/native")
}

fn artifact_names(root: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(native(root))
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[tokio::test]
async fn fresh_checkout_fetches_and_builds_everything() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner.clone());

    let report = engine.run(&pipeline).await.unwrap();

    assert!(root.join("lib/build/src/tree-sitter").is_dir());
    assert!(root.join("lib/build/src/tree-sitter-c").is_dir());
    assert_eq!(
        artifact_names(root),
        vec![
            "libtree-sitter-c.so",
            "libtree-sitter-jni.so",
            "libtree-sitter.so"
        ]
    );

    assert_eq!(report.fetch_count(), 2);
    assert_eq!(report.artifacts.len(), 3);
    assert!(report.artifacts.iter().all(|a| a.sha256.is_some()));
    assert!(report.artifacts.iter().all(|a| a.size == Some(64)));
    assert_eq!(
        runner.programs(),
        vec!["git", "git", "clang", "make", "cmake", "ninja"]
    );
}

#[tokio::test]
async fn second_run_does_not_fetch_again() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner.clone());

    engine.run(&pipeline).await.unwrap();
    let report = engine.run(&pipeline).await.unwrap();

    assert_eq!(report.fetch_count(), 0);
    assert!(report
        .fetched
        .iter()
        .all(|dep| dep.outcome == FetchOutcome::Present));

    let programs = runner.programs();
    assert_eq!(programs.iter().filter(|p| *p == "git").count(), 2);
    // compilation is not idempotent, every step runs again
    assert_eq!(
        &programs[6..],
        &["clang", "make", "cmake", "ninja"].map(String::from)
    );
}

#[tokio::test]
async fn populated_sources_missing_output() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(root.join("lib/build/src/tree-sitter")).unwrap();
    touch(&root.join("lib/build/src/tree-sitter-c/src/parser.c"));

    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner.clone());

    assert!(!native(root).exists());
    engine.run(&pipeline).await.unwrap();

    assert!(!runner.programs().contains(&"git".to_string()));
    assert_eq!(artifact_names(root).len(), 3);
}

#[tokio::test]
async fn existing_output_directory_is_kept() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    std::fs::create_dir_all(native(root)).unwrap();
    std::fs::write(native(root).join("libother.so"), b"keep me").unwrap();

    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner);

    engine.run(&pipeline).await.unwrap();

    assert_eq!(
        std::fs::read(native(root).join("libother.so")).unwrap(),
        b"keep me"
    );
    assert_eq!(artifact_names(root).len(), 4);
}

#[tokio::test]
async fn make_runs_after_its_dependency_exists() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner.clone());

    engine.run(&pipeline).await.unwrap();

    let invocations = runner.invocations();
    let clone_idx = invocations
        .iter()
        .position(|inv| inv.program == "git" && inv.args.last().unwrap().ends_with("/tree-sitter"))
        .unwrap();
    let make_idx = invocations.iter().position(|inv| inv.program == "make").unwrap();
    let cmake_idx = invocations.iter().position(|inv| inv.program == "cmake").unwrap();
    let ninja_idx = invocations.iter().position(|inv| inv.program == "ninja").unwrap();

    assert!(clone_idx < make_idx);
    assert!(cmake_idx < ninja_idx);

    let make = &invocations[make_idx];
    assert_eq!(make.args[0], "-j8");
    assert_eq!(invocations[ninja_idx].args[0], "-j8");
}

#[tokio::test]
async fn compile_failure_stops_the_pipeline() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::failing("make"));
    let (engine, pipeline) = engine(root, runner.clone());

    let err = engine.run(&pipeline).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Compile);
    assert_eq!(err.step(), Some("tree-sitter"));
    assert_eq!(err.tool(), Some("make"));

    // nothing after the failing step was attempted
    assert_eq!(runner.programs(), vec!["git", "git", "clang", "make"]);

    // the artifact built before the failure stays in place
    assert_eq!(artifact_names(root), vec!["libtree-sitter-c.so"]);
}

#[tokio::test]
async fn fetch_failure_is_reported_before_building() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::failing("git"));
    let (engine, pipeline) = engine(root, runner.clone());

    let err = engine.run(&pipeline).await.unwrap_err();

    assert!(matches!(err, EngineError::Fetch { ref dependency, .. } if dependency == "tree-sitter"));
    assert_eq!(runner.programs(), vec!["git"]);
}

#[tokio::test]
async fn missing_cmake_source_fails_precondition() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner.clone());
    std::fs::remove_dir_all(root.join("lib/src/main/cpp")).unwrap();

    let err = engine.run(&pipeline).await.unwrap_err();

    assert!(matches!(err, EngineError::MissingInput { ref step, .. } if step == "tree-sitter-jni"));
    assert!(!runner.programs().contains(&"cmake".to_string()));
}

#[tokio::test]
async fn tool_that_produces_nothing_is_an_artifact_failure() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let jobs = Jobs::new(2);

    let mut pipeline = load_pipeline(
        r#"
        pipeline "silent" {
            compile "quiet" {
                sources "a.c"
            }
        }
        "#,
        None,
    )
    .unwrap();
    expand_pipeline(&mut pipeline, jobs.get()).unwrap();

    // the fake only produces files for clang, so a differently named compiler writes nothing
    pipeline.toolchain.cc = "tcc".to_string();
    std::fs::write(root.join("a.c"), b"int x;").unwrap();

    let engine = Engine::with_runner(EngineSettings::from_pipeline(root, &pipeline, jobs), runner);
    let err = engine.run(&pipeline).await.unwrap_err();

    assert_eq!(err.kind(), FailureKind::Artifact);
    assert!(matches!(err, EngineError::MissingArtifact { ref path, .. } if path.ends_with("libquiet.so")));
}

#[tokio::test]
async fn strip_runs_only_when_enabled() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (_, mut pipeline) = engine(root, runner.clone());
    pipeline.options.strip = Some(true);

    let jobs = Jobs::new(8);
    let engine = Engine::with_runner(EngineSettings::from_pipeline(root, &pipeline, jobs), runner.clone());
    engine.run(&pipeline).await.unwrap();

    let strip = runner
        .invocations()
        .into_iter()
        .find(|inv| inv.program == "strip")
        .unwrap();

    assert_eq!(strip.args[0], "--strip-unneeded");
    assert_eq!(strip.args.len(), 4);
}

#[tokio::test]
async fn unversioned_make_output_is_collected() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::with_layout(MakeLayout::Plain));
    let (engine, pipeline) = engine(root, runner);

    engine.run(&pipeline).await.unwrap();

    assert_eq!(
        artifact_names(root),
        vec![
            "libtree-sitter-c.so",
            "libtree-sitter-jni.so",
            "libtree-sitter.so"
        ]
    );
}

#[tokio::test]
async fn soname_chain_is_copied_as_a_regular_file() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let (engine, pipeline) = engine(root, runner);

    engine.run(&pipeline).await.unwrap();

    let collected = native(root).join("libtree-sitter.so");
    let metadata = std::fs::symlink_metadata(&collected).unwrap();
    assert!(metadata.file_type().is_file());
    assert_eq!(metadata.len(), 64);
}

#[tokio::test]
async fn makefile_generator_is_built_by_cmake() {
    let temp_dir = TempDir::new().unwrap();
    let root = temp_dir.path();
    let runner = Arc::new(FakeRunner::default());
    let jobs = Jobs::new(3);
    std::fs::create_dir_all(root.join("cpp")).unwrap();

    let mut pipeline = load_pipeline(
        r#"
        pipeline "jni" {
            cmake "jni" {
                source "cpp"
                generator "Unix Makefiles"
                artifact "libtree-sitter-jni.so"
            }
        }
        "#,
        None,
    )
    .unwrap();
    expand_pipeline(&mut pipeline, jobs.get()).unwrap();

    let engine = Engine::with_runner(
        EngineSettings::from_pipeline(root, &pipeline, jobs),
        runner.clone(),
    );
    engine.run(&pipeline).await.unwrap();

    let invocations = runner.invocations();
    assert_eq!(runner.programs(), vec!["cmake", "cmake"]);
    assert_eq!(invocations[0].args[0], "-GUnix Makefiles");
    assert_eq!(invocations[1].args[0], "--build");
    assert_eq!(invocations[1].args[3], "3");
    assert_eq!(artifact_names(root), vec!["libjni.so"]);
}
