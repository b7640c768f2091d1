use crate::engine::environment::ToolStatus;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Coarse classification of a failed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// A dependency could not be materialized.
    Fetch,
    /// A compiler or native build tool reported failure.
    Compile,
    /// A build step finished but its artifact could not be collected.
    Artifact,
    /// The driver itself could not touch the filesystem or start a tool.
    Environment,
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("fetching dependency `{dependency}` failed: `{tool}` {status}")]
    Fetch {
        dependency: String,
        tool: String,
        status: ToolStatus,
    },

    #[error("dependency `{dependency}` is still missing at {} after fetching", path.display())]
    NotMaterialized { dependency: String, path: PathBuf },

    #[error("step `{step}` failed: `{tool}` {status}")]
    Compile {
        step: String,
        tool: String,
        status: ToolStatus,
    },

    #[error("step `{step}` cannot start, {} does not exist", path.display())]
    MissingInput { step: String, path: PathBuf },

    #[error("step `{step}` did not produce {}", path.display())]
    MissingArtifact { step: String, path: PathBuf },

    #[error("step `{step}` artifact pattern `{pattern}` matched {} files", matches.len())]
    AmbiguousArtifact {
        step: String,
        pattern: String,
        matches: Vec<PathBuf>,
    },

    #[error("step `{step}` has an invalid artifact pattern `{pattern}`: {message}")]
    ArtifactPattern {
        step: String,
        pattern: String,
        message: String,
    },

    #[error("could not start `{tool}`")]
    Spawn {
        tool: String,
        #[source]
        source: io::Error,
    },

    #[error("stripping artifacts failed: `{tool}` {status}")]
    Strip { tool: String, status: ToolStatus },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl EngineError {
    /// Wraps an `io::Error` with a description of what was being attempted.
    pub fn io(context: impl Into<String>) -> impl FnOnce(io::Error) -> EngineError {
        let context = context.into();
        move |source| EngineError::Io { context, source }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            EngineError::Fetch { .. } | EngineError::NotMaterialized { .. } => FailureKind::Fetch,
            EngineError::Compile { .. } | EngineError::MissingInput { .. } => FailureKind::Compile,
            EngineError::MissingArtifact { .. }
            | EngineError::AmbiguousArtifact { .. }
            | EngineError::ArtifactPattern { .. }
            | EngineError::Strip { .. } => FailureKind::Artifact,
            EngineError::Spawn { .. } | EngineError::Io { .. } => FailureKind::Environment,
        }
    }

    /// Name of the build step that failed, when the failure belongs to one.
    pub fn step(&self) -> Option<&str> {
        match self {
            EngineError::Compile { step, .. }
            | EngineError::MissingInput { step, .. }
            | EngineError::MissingArtifact { step, .. }
            | EngineError::AmbiguousArtifact { step, .. }
            | EngineError::ArtifactPattern { step, .. } => Some(step),
            _ => None,
        }
    }

    /// The external tool that reported the failure, if one did.
    pub fn tool(&self) -> Option<&str> {
        match self {
            EngineError::Fetch { tool, .. }
            | EngineError::Compile { tool, .. }
            | EngineError::Spawn { tool, .. }
            | EngineError::Strip { tool, .. } => Some(tool),
            _ => None,
        }
    }
}
