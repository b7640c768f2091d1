use anyhow::Context;
use kiln::template::expand_pipeline;
use kiln::{load_pipeline, Engine, EngineSettings, Jobs, BUILTIN_PIPELINE};
use std::borrow::Cow;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

const MANIFEST_NAME: &str = "kiln.kdl";

fn read_manifest(root: &Path, arg: Option<PathBuf>) -> anyhow::Result<(Cow<'static, str>, String)> {
    let path = match arg {
        Some(path) => path,
        None => {
            let candidate = root.join(MANIFEST_NAME);
            if !candidate.is_file() {
                info!("no {} found, using the built-in tree-sitter pipeline", MANIFEST_NAME);
                return Ok((Cow::Borrowed(BUILTIN_PIPELINE), "tree-sitter.kdl".to_string()));
            }
            candidate
        }
    };

    let source = std::fs::read_to_string(&path)
        .with_context(|| format!("reading manifest {}", path.display()))?;

    Ok((Cow::Owned(source), path.display().to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("KILN_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .without_time()
        .init();

    let root = std::env::current_dir().context("resolving the working directory")?;
    let (source, filename) = read_manifest(&root, std::env::args_os().nth(1).map(PathBuf::from))?;

    let mut pipeline = match load_pipeline(&source, Some(&filename)) {
        Ok(pipeline) => pipeline,
        Err(report) => {
            eprintln!("{:?}", report);
            anyhow::bail!("could not load pipeline from {}", filename);
        }
    };

    let jobs = Jobs::resolve(
        pipeline.options.jobs,
        std::env::var("KILN_JOBS").ok().as_deref(),
        Jobs::detect(),
    );

    expand_pipeline(&mut pipeline, jobs.get())
        .with_context(|| format!("expanding templates in {}", filename))?;

    let engine = Engine::new(EngineSettings::from_pipeline(root, &pipeline, jobs));
    let report = engine.run(&pipeline).await?;
    report.log();

    Ok(())
}
