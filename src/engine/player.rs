use crate::definition::steps::{CMakeStep, CompileStep, MakeStep, Step, StepKind};
use crate::engine::build_state::{BuildState, BuiltArtifact};
use crate::engine::environment::{Environment, Invocation};
use crate::engine::error::EngineError;
use crate::engine::settings::EngineSettings;
use crate::utils::{is_file, path_exists};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Player {
    settings: Arc<EngineSettings>,
}

impl Player {
    pub fn new(settings: Arc<EngineSettings>) -> Player {
        Player { settings }
    }

    /// Runs one step. Steps are never skipped, an existing artifact is overwritten.
    pub async fn play<'a>(
        &self,
        state: &mut BuildState<'a>,
        step: &Step,
        environment: &Environment,
    ) -> Result<(), EngineError> {
        info!(step = %step.name, kind = step.kind.name(), "running step");

        self.check_preconditions(step).await?;

        match &step.kind {
            StepKind::Compile(compile) => self.compile(step, compile, environment).await?,
            StepKind::Make(make) => self.make(step, make, environment).await?,
            StepKind::CMake(cmake) => self.cmake(step, cmake, environment).await?,
        }

        let artifact = self.settings.artifact_path_for_step(step);
        if !is_file(&artifact)
            .await
            .map_err(EngineError::io(format!("checking {}", artifact.display())))?
        {
            return Err(EngineError::MissingArtifact {
                step: step.name.clone(),
                path: artifact,
            });
        }

        state.artifacts.push(BuiltArtifact {
            step: step.name.clone(),
            path: artifact,
        });

        Ok(())
    }

    async fn check_preconditions(&self, step: &Step) -> Result<(), EngineError> {
        let inputs: Vec<PathBuf> = match &step.kind {
            StepKind::Compile(compile) => compile
                .sources
                .iter()
                .map(|src| self.settings.resolve(src))
                .collect(),
            StepKind::Make(make) => vec![self.settings.source_path_for_project(&make.project)],
            StepKind::CMake(cmake) => vec![self.settings.resolve(&cmake.source)],
        };

        for path in inputs {
            if !path_exists(&path)
                .await
                .map_err(EngineError::io(format!("checking {}", path.display())))?
            {
                return Err(EngineError::MissingInput {
                    step: step.name.clone(),
                    path,
                });
            }
        }

        Ok(())
    }

    async fn run_tool(
        &self,
        step: &Step,
        environment: &Environment,
        invocation: Invocation,
    ) -> Result<(), EngineError> {
        let status = environment.execute(&invocation).await?;
        if !status.success() {
            return Err(EngineError::Compile {
                step: step.name.clone(),
                tool: invocation.program,
                status,
            });
        }

        Ok(())
    }

    pub fn compile_invocation(
        &self,
        step: &Step,
        compile: &CompileStep,
        environment: &Environment,
    ) -> Invocation {
        let mut args: Vec<String> = compile.flags.clone();

        for include in &compile.includes {
            args.push(format!("-I{}", include));
        }

        args.extend(compile.sources.iter().cloned());
        args.push("-o".to_string());
        args.push(
            self.settings
                .artifact_path_for_step(step)
                .to_string_lossy()
                .into_owned(),
        );

        environment.invocation(&self.settings.toolchain().cc, args)
    }

    async fn compile(
        &self,
        step: &Step,
        compile: &CompileStep,
        environment: &Environment,
    ) -> Result<(), EngineError> {
        let invocation = self.compile_invocation(step, compile, environment);
        self.run_tool(step, environment, invocation).await
    }

    pub fn make_invocation(&self, make: &MakeStep, environment: &Environment) -> Invocation {
        let jobs = format!("-j{}", self.settings.jobs());
        let project = self.settings.source_path_for_project(&make.project);

        let mut args = vec![jobs, "-C".to_string(), project.to_string_lossy().into_owned()];
        args.extend(make.args.iter().cloned());

        environment.invocation(&self.settings.toolchain().make, args)
    }

    async fn make(
        &self,
        step: &Step,
        make: &MakeStep,
        environment: &Environment,
    ) -> Result<(), EngineError> {
        let invocation = self.make_invocation(make, environment);
        self.run_tool(step, environment, invocation).await?;

        let project = self.settings.source_path_for_project(&make.project);
        self.collect_artifact(step, &project, &make.artifact).await
    }

    /// The generator call followed by the executor call, in that order.
    /// Ninja graphs are executed by ninja itself, any other generator through `cmake --build`.
    pub fn cmake_invocations(
        &self,
        cmake: &CMakeStep,
        environment: &Environment,
    ) -> (Invocation, Invocation) {
        let build_dir = self.settings.generated_path_for_scope(&cmake.scope);
        let build_dir = build_dir.to_string_lossy().into_owned();

        let mut generate = vec![
            format!("-G{}", cmake.generator),
            "-S".to_string(),
            cmake.source.clone(),
            "-B".to_string(),
            build_dir.clone(),
        ];
        generate.extend(
            cmake
                .defines
                .iter()
                .map(|(key, value)| format!("-D{}={}", key, value)),
        );

        let toolchain = self.settings.toolchain();
        let execute = if cmake.uses_ninja() {
            environment.invocation(
                &toolchain.ninja,
                vec![format!("-j{}", self.settings.jobs()), "-C".to_string(), build_dir],
            )
        } else {
            environment.invocation(
                &toolchain.cmake,
                vec![
                    "--build".to_string(),
                    build_dir,
                    "--parallel".to_string(),
                    self.settings.jobs().to_string(),
                ],
            )
        };

        (environment.invocation(&toolchain.cmake, generate), execute)
    }

    async fn cmake(
        &self,
        step: &Step,
        cmake: &CMakeStep,
        environment: &Environment,
    ) -> Result<(), EngineError> {
        let (generate, execute) = self.cmake_invocations(cmake, environment);

        self.run_tool(step, environment, generate).await?;
        self.run_tool(step, environment, execute).await?;

        let build_dir = self.settings.generated_path_for_scope(&cmake.scope);
        self.collect_artifact(step, &build_dir, &cmake.artifact).await
    }

    /// Copies the tool's own output into the native directory under the step's name.
    async fn collect_artifact(
        &self,
        step: &Step,
        dir: &Path,
        candidates: &[String],
    ) -> Result<(), EngineError> {
        let source = self.locate_artifact(step, dir, candidates).await?;
        let target = self.settings.artifact_path_for_step(step);

        debug!(from = %source.display(), to = %target.display(), "collecting artifact");

        tokio::fs::copy(&source, &target).await.map_err(EngineError::io(format!(
            "copying {} to {}",
            source.display(),
            target.display()
        )))?;

        Ok(())
    }

    /// Tries each candidate in order and returns the first that resolves to a file.
    pub async fn locate_artifact(
        &self,
        step: &Step,
        dir: &Path,
        candidates: &[String],
    ) -> Result<PathBuf, EngineError> {
        for pattern in candidates {
            if let Some(found) = self.match_artifact(step, dir, pattern).await? {
                return Ok(found);
            }
        }

        Err(EngineError::MissingArtifact {
            step: step.name.clone(),
            path: dir.join(candidates.first().map(String::as_str).unwrap_or_default()),
        })
    }

    /// A literal path wins; otherwise `pattern` is matched as a glob. Matches that are
    /// symlinks to the same file count once, anything else must be unique.
    async fn match_artifact(
        &self,
        step: &Step,
        dir: &Path,
        pattern: &str,
    ) -> Result<Option<PathBuf>, EngineError> {
        let literal = dir.join(pattern);
        if is_file(&literal)
            .await
            .map_err(EngineError::io(format!("checking {}", literal.display())))?
        {
            return Ok(Some(literal));
        }

        let glob = wax::Glob::from_str(pattern).map_err(|err| EngineError::ArtifactPattern {
            step: step.name.clone(),
            pattern: pattern.to_string(),
            message: err.to_string(),
        })?;

        let mut candidates = vec![];
        for item in glob.walk(dir) {
            let item = match item {
                Err(_) => continue,
                Ok(item) => item,
            };

            let candidate = item.to_candidate_path();
            candidates.push(dir.join(PathBuf::from(candidate.as_ref())));
        }

        drop(glob);
        candidates.sort();

        let mut targets: BTreeMap<PathBuf, PathBuf> = BTreeMap::new();
        for candidate in candidates {
            if !is_file(&candidate)
                .await
                .map_err(EngineError::io(format!("checking {}", candidate.display())))?
            {
                continue;
            }

            let target = tokio::fs::canonicalize(&candidate)
                .await
                .map_err(EngineError::io(format!("resolving {}", candidate.display())))?;
            targets.entry(target).or_insert(candidate);
        }

        match targets.len() {
            0 => Ok(None),
            1 => Ok(targets.into_values().next()),
            _ => {
                let mut matches: Vec<PathBuf> = targets.into_values().collect();
                matches.sort();
                Err(EngineError::AmbiguousArtifact {
                    step: step.name.clone(),
                    pattern: pattern.to_string(),
                    matches,
                })
            }
        }
    }
}
