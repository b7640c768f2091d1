use crate::definition::Pipeline;
use crate::engine::fetcher::{FetchOutcome, FetchedDependency};
use crate::utils::elf::ElfHeader;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, SystemTime};
use tracing::info;

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
#[repr(u8)]
pub enum Stage {
    Fetch,
    Prepare,
    Build,
}

impl Stage {
    pub const fn stages() -> [Stage; 3] {
        [Stage::Fetch, Stage::Prepare, Stage::Build]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltArtifact {
    pub step: String,
    pub path: PathBuf,
}

pub struct BuildState<'a> {
    pub build_time: SystemTime,
    pub pipeline: &'a Pipeline,
    pub stage: Stage,
    pub fetched: Vec<FetchedDependency>,
    pub artifacts: Vec<BuiltArtifact>,
    pub elf_headers: HashMap<PathBuf, ElfHeader>,
    /// Byte size and SHA-256 per artifact path.
    pub digests: HashMap<PathBuf, (u64, [u8; 32])>,
}

impl<'a> BuildState<'a> {
    pub fn new(pipeline: &'a Pipeline) -> Self {
        BuildState {
            build_time: SystemTime::now(),
            pipeline,
            stage: Stage::Fetch,
            fetched: vec![],
            artifacts: vec![],
            elf_headers: Default::default(),
            digests: Default::default(),
        }
    }

    pub fn into_report(self) -> RunReport {
        let BuildState {
            build_time,
            fetched,
            artifacts,
            mut digests,
            ..
        } = self;

        let artifacts = artifacts
            .into_iter()
            .map(|artifact| {
                let digest = digests.remove(&artifact.path);
                ArtifactRecord {
                    size: digest.map(|(size, _)| size),
                    sha256: digest.map(|(_, sha)| hex::encode(sha)),
                    step: artifact.step,
                    path: artifact.path,
                }
            })
            .collect();

        RunReport {
            fetched,
            artifacts,
            elapsed: build_time.elapsed().unwrap_or_default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRecord {
    pub step: String,
    pub path: PathBuf,
    pub size: Option<u64>,
    pub sha256: Option<String>,
}

/// What a successful run did.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub fetched: Vec<FetchedDependency>,
    pub artifacts: Vec<ArtifactRecord>,
    pub elapsed: Duration,
}

impl RunReport {
    pub fn fetch_count(&self) -> usize {
        self.fetched
            .iter()
            .filter(|dep| dep.outcome == FetchOutcome::Fetched)
            .count()
    }

    pub fn log(&self) {
        for dep in &self.fetched {
            info!(dependency = %dep.name, outcome = ?dep.outcome, path = %dep.path.display(), "dependency");
        }

        for artifact in &self.artifacts {
            info!(
                step = %artifact.step,
                path = %artifact.path.display(),
                size = artifact.size.unwrap_or_default(),
                sha256 = artifact.sha256.as_deref().unwrap_or("-"),
                "artifact"
            );
        }

        info!(
            fetched = self.fetch_count(),
            artifacts = self.artifacts.len(),
            elapsed = ?self.elapsed,
            "build finished"
        );
    }
}
