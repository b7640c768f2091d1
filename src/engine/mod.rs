use crate::definition::Pipeline;
use crate::engine::build_state::{BuildState, RunReport, Stage};
use crate::engine::environment::{Environment, ProcessRunner, SystemRunner};
use crate::engine::error::EngineError;
use crate::engine::fetcher::Fetcher;
use crate::engine::hooks::{HookTrigger, SORTED_HOOKS};
use crate::engine::player::Player;
use crate::engine::settings::EngineSettings;
use std::sync::Arc;
use tracing::{debug, info};

pub mod build_state;
pub mod environment;
pub mod error;
pub mod fetcher;
mod hooks;
pub mod player;
pub mod settings;

/// Drives a pipeline: fetch missing dependencies, prepare the output directory,
/// then run every build step in declared order, stopping at the first failure.
#[derive(Debug)]
pub struct Engine {
    fetcher: Fetcher,
    player: Player,
    environment: Environment,
    pub settings: Arc<EngineSettings>,
}

impl Engine {
    pub fn new(settings: EngineSettings) -> Self {
        Self::with_runner(settings, Arc::new(SystemRunner))
    }

    pub fn with_runner(settings: EngineSettings, runner: Arc<dyn ProcessRunner>) -> Self {
        let settings = Arc::from(settings);
        Engine {
            fetcher: Fetcher::new(settings.clone()),
            player: Player::new(settings.clone()),
            environment: Environment::new(settings.clone(), runner),
            settings,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.environment
    }

    /// Creates the native output directory. Existing contents are left alone.
    pub async fn prepare_engine(&self) -> Result<(), EngineError> {
        let native = self.settings.native_path();
        tokio::fs::create_dir_all(&native)
            .await
            .map_err(EngineError::io(format!("creating {}", native.display())))?;

        Ok(())
    }

    async fn run_hooks<'a>(
        &self,
        state: &mut BuildState<'a>,
        stage: Stage,
        trigger: HookTrigger,
    ) -> Result<(), EngineError> {
        for hook in SORTED_HOOKS.iter().copied() {
            if hook.when() == (stage, trigger) {
                debug!(?hook, "running hook");
                hook.trigger(state, self).await?;
            }
        }
        Ok(())
    }

    pub async fn run(&self, pipeline: &Pipeline) -> Result<RunReport, EngineError> {
        let mut state = BuildState::new(pipeline);

        info!(pipeline = %pipeline.name, jobs = %self.settings.jobs(), "starting build");

        for stage in Stage::stages() {
            debug!(?stage, "entering stage");
            state.stage = stage;

            self.run_hooks(&mut state, stage, HookTrigger::Before)
                .await?;

            match stage {
                Stage::Fetch => self.fetch(&mut state).await?,
                Stage::Prepare => self.prepare_engine().await?,
                Stage::Build => self.build(&mut state).await?,
            }

            self.run_hooks(&mut state, stage, HookTrigger::After)
                .await?;
        }

        Ok(state.into_report())
    }

    async fn fetch<'a>(&self, state: &mut BuildState<'a>) -> Result<(), EngineError> {
        let source = self.settings.source_path();
        tokio::fs::create_dir_all(&source)
            .await
            .map_err(EngineError::io(format!("creating {}", source.display())))?;

        let pipeline = state.pipeline;
        for dependency in &pipeline.dependencies {
            let fetched = self.fetcher.fetch(dependency, &self.environment).await?;
            state.fetched.push(fetched);
        }

        Ok(())
    }

    async fn build<'a>(&self, state: &mut BuildState<'a>) -> Result<(), EngineError> {
        let pipeline = state.pipeline;
        for step in &pipeline.steps {
            self.player.play(state, step, &self.environment).await?;
        }

        Ok(())
    }
}
