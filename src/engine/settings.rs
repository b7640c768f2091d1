use crate::definition::steps::Step;
use crate::definition::{Dependency, Layout, Pipeline, Toolchain};
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Parallelism used when the host cannot report its processing units.
pub const DEFAULT_JOBS: usize = 16;

/// Degree of parallelism handed to the native build tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Jobs(usize);

impl Jobs {
    pub fn new(jobs: usize) -> Self {
        Jobs(jobs.max(1))
    }

    pub fn detect() -> Self {
        Self::from_detected(Some(num_cpus::get()))
    }

    pub fn from_detected(detected: Option<usize>) -> Self {
        match detected {
            Some(n) if n > 0 => Jobs(n),
            _ => Jobs(DEFAULT_JOBS),
        }
    }

    /// Manifest value wins over `KILN_JOBS`, which wins over detection.
    pub fn resolve(manifest: Option<usize>, env: Option<&str>, detected: Jobs) -> Self {
        if let Some(jobs) = manifest {
            return Jobs::new(jobs);
        }

        if let Some(raw) = env {
            match raw.trim().parse::<usize>() {
                Ok(jobs) if jobs > 0 => return Jobs(jobs),
                _ => warn!(value = raw, "ignoring invalid KILN_JOBS"),
            }
        }

        detected
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Display for Jobs {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
pub struct EngineSettings {
    root_path: PathBuf,
    source_path: PathBuf,
    native_path: PathBuf,
    generated_path: PathBuf,
    toolchain: Toolchain,
    strip: bool,
    jobs: Jobs,
}

impl EngineSettings {
    pub fn new(root: impl Into<PathBuf>, layout: &Layout, toolchain: Toolchain, jobs: Jobs) -> Self {
        EngineSettings {
            root_path: root.into(),
            source_path: PathBuf::from(&layout.source),
            native_path: PathBuf::from(&layout.native),
            generated_path: PathBuf::from(&layout.generated),
            toolchain,
            strip: false,
            jobs,
        }
    }

    pub fn from_pipeline(root: impl Into<PathBuf>, pipeline: &Pipeline, jobs: Jobs) -> Self {
        let mut settings = Self::new(root, &pipeline.layout, pipeline.toolchain.clone(), jobs);
        settings.strip = pipeline.options.strip.unwrap_or(false);
        settings
    }

    pub fn root_path(&self) -> &Path {
        self.root_path.as_path()
    }

    /// Resolves a manifest path against the working directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root_path.join(path)
    }

    pub fn source_path(&self) -> PathBuf {
        self.root_path.join(&self.source_path)
    }

    pub fn source_path_for_dependency(&self, dependency: &Dependency) -> PathBuf {
        self.source_path_for_project(&dependency.name)
    }

    pub fn source_path_for_project(&self, name: &str) -> PathBuf {
        self.source_path().join(name)
    }

    pub fn native_path(&self) -> PathBuf {
        self.root_path.join(&self.native_path)
    }

    pub fn artifact_path_for_step(&self, step: &Step) -> PathBuf {
        self.native_path().join(step.artifact_file_name())
    }

    pub fn generated_path(&self) -> PathBuf {
        self.root_path.join(&self.generated_path)
    }

    pub fn generated_path_for_scope(&self, scope: &str) -> PathBuf {
        self.generated_path().join(scope)
    }

    pub fn toolchain(&self) -> &Toolchain {
        &self.toolchain
    }

    pub fn strip(&self) -> bool {
        self.strip
    }

    pub fn jobs(&self) -> Jobs {
        self.jobs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::steps::{CompileStep, StepKind};

    #[test]
    fn fallback_when_detection_fails() {
        assert_eq!(Jobs::from_detected(None).get(), DEFAULT_JOBS);
        assert_eq!(Jobs::from_detected(Some(0)).get(), DEFAULT_JOBS);
        assert_eq!(Jobs::from_detected(Some(6)).get(), 6);
    }

    #[test]
    fn detection_is_positive() {
        assert!(Jobs::detect().get() >= 1);
    }

    #[test]
    fn resolve_precedence() {
        let detected = Jobs::new(8);

        assert_eq!(Jobs::resolve(Some(2), Some("4"), detected).get(), 2);
        assert_eq!(Jobs::resolve(None, Some("4"), detected).get(), 4);
        assert_eq!(Jobs::resolve(None, Some(" 3 "), detected).get(), 3);
        assert_eq!(Jobs::resolve(None, Some("many"), detected).get(), 8);
        assert_eq!(Jobs::resolve(None, Some("0"), detected).get(), 8);
        assert_eq!(Jobs::resolve(None, None, detected).get(), 8);
    }

    #[test]
    fn layout_paths_are_rooted() {
        let settings = EngineSettings::new(
            "/work",
            &Layout::default(),
            Toolchain::default(),
            Jobs::new(4),
        );

        let dep = Dependency {
            name: "tree-sitter-c".into(),
            url: "https://example.com/tree-sitter-c".into(),
            depth: 1,
            recursive: true,
            branch: None,
        };

        let step = Step {
            name: "tree-sitter-c".into(),
            kind: StepKind::Compile(CompileStep {
                flags: vec![],
                includes: vec![],
                sources: vec!["parser.c".into()],
            }),
        };

        assert_eq!(
            settings.source_path_for_dependency(&dep),
            PathBuf::from("/work/lib/build/src/tree-sitter-c")
        );
        assert_eq!(
            settings.artifact_path_for_step(&step),
            PathBuf::from("/work/lib/build/native/libtree-sitter-c.so")
        );
        assert_eq!(
            settings.generated_path_for_scope("cxx"),
            PathBuf::from("/work/lib/build/cmake/cxx")
        );
        assert_eq!(settings.resolve("/abs/path"), PathBuf::from("/abs/path"));
    }
}
