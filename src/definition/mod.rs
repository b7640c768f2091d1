pub mod parsing;
pub mod steps;

use crate::definition::parsing::ParseDocument;
use crate::definition::steps::Step;
use kdl::KdlDocument;
use kiln_utils::ObjectTraversal;
use miette::{miette, IntoDiagnostic, WrapErr};
use serde::Serialize;

/// Pipeline used when the working directory carries no manifest of its own.
pub const BUILTIN_PIPELINE: &str = include_str!("../../pipelines/tree-sitter.kdl");

#[derive(Default, Debug, Clone)]
pub struct Document {
    pub pipelines: Vec<Pipeline>,
}

#[derive(Debug, Clone, ObjectTraversal)]
pub struct Pipeline {
    #[skip]
    pub name: String,
    #[skip]
    pub layout: Layout,
    pub toolchain: Toolchain,
    pub options: PipelineOptions,
    pub dependencies: Vec<Dependency>,
    pub steps: Vec<Step>,
}

#[derive(Serialize, Debug)]
pub struct PipelineTemplate {
    pub pipeline: String,
    pub source: String,
    pub native: String,
    pub generated: String,
    pub jobs: usize,
}

impl Pipeline {
    pub fn template_vars(&self, jobs: usize) -> PipelineTemplate {
        PipelineTemplate {
            pipeline: self.name.clone(),
            source: self.layout.source.clone(),
            native: self.layout.native.clone(),
            generated: self.layout.generated.clone(),
            jobs,
        }
    }

    pub fn dependency(&self, name: &str) -> Option<&Dependency> {
        self.dependencies.iter().find(|dep| dep.name == name)
    }
}

/// Directories the driver reads from and writes to, relative to the working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub source: String,
    pub native: String,
    pub generated: String,
}

impl Default for Layout {
    fn default() -> Self {
        Layout {
            source: "lib/build/src".to_string(),
            native: "lib/build/native".to_string(),
            generated: "lib/build/cmake".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct Toolchain {
    pub git: String,
    pub cc: String,
    pub make: String,
    pub cmake: String,
    pub ninja: String,
    pub strip: String,
}

impl Default for Toolchain {
    fn default() -> Self {
        Toolchain {
            git: "git".to_string(),
            cc: "clang".to_string(),
            make: "make".to_string(),
            cmake: "cmake".to_string(),
            ninja: "ninja".to_string(),
            strip: "strip".to_string(),
        }
    }
}

#[derive(Default, Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct PipelineOptions {
    pub strip: Option<bool>,
    pub jobs: Option<usize>,
}

/// An upstream source tree, materialized once under `<source>/<name>`.
#[derive(Debug, Clone, PartialEq, Eq, ObjectTraversal)]
pub struct Dependency {
    #[skip]
    pub name: String,
    pub url: String,
    /// `0` clones the full history.
    pub depth: usize,
    pub recursive: bool,
    pub branch: Option<String>,
}

/// Parses a manifest and returns its first pipeline.
pub fn load_pipeline(source: &str, filename: Option<&str>) -> miette::Result<Pipeline> {
    let kdl: KdlDocument = source
        .parse()
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not a valid KDL document", filename.unwrap_or("manifest")))?;

    let mut document = Document::parse_document_strict(&kdl, source, filename)?;

    if document.pipelines.len() > 1 {
        tracing::warn!(
            count = document.pipelines.len(),
            "manifest declares several pipelines, only the first one runs"
        );
    }

    if document.pipelines.is_empty() {
        return Err(miette!("manifest declares no pipeline"));
    }

    Ok(document.pipelines.remove(0))
}
