use crate::definition::Dependency;
use crate::engine::environment::{Environment, Invocation};
use crate::engine::error::EngineError;
use crate::engine::settings::EngineSettings;
use crate::utils::path_exists;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

#[derive(Debug)]
pub struct Fetcher {
    settings: Arc<EngineSettings>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The materialization path already existed; nothing was run.
    Present,
    Fetched,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedDependency {
    pub name: String,
    pub path: PathBuf,
    pub outcome: FetchOutcome,
}

impl Fetcher {
    pub fn new(settings: Arc<EngineSettings>) -> Self {
        Fetcher { settings }
    }

    /// Materializes the dependency unless its directory is already there.
    /// Presence is the only completion signal; contents are not inspected.
    pub async fn fetch(
        &self,
        dependency: &Dependency,
        environment: &Environment,
    ) -> Result<FetchedDependency, EngineError> {
        let path = self.settings.source_path_for_dependency(dependency);

        if path_exists(&path)
            .await
            .map_err(EngineError::io(format!("checking {}", path.display())))?
        {
            info!(dependency = %dependency.name, path = %path.display(), "already materialized, skipping fetch");
            return Ok(FetchedDependency {
                name: dependency.name.clone(),
                path,
                outcome: FetchOutcome::Present,
            });
        }

        info!(dependency = %dependency.name, url = %dependency.url, "fetching");

        let invocation = self.clone_invocation(dependency, &path, environment);
        let status = environment.execute(&invocation).await?;

        if !status.success() {
            return Err(EngineError::Fetch {
                dependency: dependency.name.clone(),
                tool: invocation.program,
                status,
            });
        }

        if !path_exists(&path)
            .await
            .map_err(EngineError::io(format!("checking {}", path.display())))?
        {
            return Err(EngineError::NotMaterialized {
                dependency: dependency.name.clone(),
                path,
            });
        }

        Ok(FetchedDependency {
            name: dependency.name.clone(),
            path,
            outcome: FetchOutcome::Fetched,
        })
    }

    pub fn clone_invocation(
        &self,
        dependency: &Dependency,
        target: &Path,
        environment: &Environment,
    ) -> Invocation {
        let mut args = vec!["clone".to_string()];

        if dependency.depth > 0 {
            args.push("--depth".to_string());
            args.push(dependency.depth.to_string());
        }

        if dependency.recursive {
            args.push("--recursive".to_string());
        }

        if let Some(branch) = &dependency.branch {
            args.push("--branch".to_string());
            args.push(branch.clone());
        }

        args.push("--".to_string());
        args.push(dependency.url.clone());
        args.push(target.to_string_lossy().into_owned());

        environment.invocation(&self.settings.toolchain().git, args)
    }
}
