use crate::engine::build_state::{BuildState, Stage};
use crate::engine::error::EngineError;
use crate::engine::hooks::{Hook, HookTrigger};
use crate::engine::Engine;
use crate::utils::elf::ElfHeader;
use async_trait::async_trait;
use ring::digest::{Context, SHA256};
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};
use tracing::{debug, info, warn};

/// Reads the ELF header of every produced artifact.
#[derive(Debug)]
pub struct InspectArtifacts;

#[async_trait]
impl Hook for InspectArtifacts {
    const PRIORITY: usize = 0;
    const TRIGGER: HookTrigger = HookTrigger::After;
    const STAGE: Stage = Stage::Build;

    async fn run(&self, state: &mut BuildState<'_>, _engine: &Engine) -> Result<(), EngineError> {
        for artifact in &state.artifacts {
            let file = File::open(&artifact.path)
                .await
                .map_err(EngineError::io(format!("opening {}", artifact.path.display())))?;

            let header = ElfHeader::parse(&mut BufReader::new(file))
                .await
                .map_err(EngineError::io(format!("reading {}", artifact.path.display())))?;

            match header {
                Some(header) if header.is_shared_object() => {
                    debug!(
                        step = %artifact.step,
                        class = ?header.class,
                        byte_order = ?header.byte_order,
                        machine = header.machine,
                        "artifact is a shared object"
                    );
                    state.elf_headers.insert(artifact.path.clone(), header);
                }
                Some(header) => {
                    let kind = if header.is_executable() { "an executable" } else { "not a shared object" };
                    warn!(step = %artifact.step, path = %artifact.path.display(), "artifact is {}", kind);
                    state.elf_headers.insert(artifact.path.clone(), header);
                }
                None => {
                    warn!(step = %artifact.step, path = %artifact.path.display(), "artifact is not an ELF file");
                }
            }
        }

        Ok(())
    }
}

/// Strips unneeded symbols from shared-object artifacts when the pipeline asks for it.
#[derive(Debug)]
pub struct StripArtifacts;

#[async_trait]
impl Hook for StripArtifacts {
    const PRIORITY: usize = 100;
    const TRIGGER: HookTrigger = HookTrigger::After;
    const STAGE: Stage = Stage::Build;

    async fn run(&self, state: &mut BuildState<'_>, engine: &Engine) -> Result<(), EngineError> {
        if !engine.settings.strip() {
            return Ok(());
        }

        let libraries: Vec<String> = state
            .artifacts
            .iter()
            .filter(|artifact| {
                state
                    .elf_headers
                    .get(&artifact.path)
                    .map_or(false, |header| header.is_shared_object())
            })
            .map(|artifact| artifact.path.to_string_lossy().into_owned())
            .collect();

        if libraries.is_empty() {
            return Ok(());
        }

        info!(count = libraries.len(), "stripping artifacts");

        let mut args = vec!["--strip-unneeded".to_string()];
        args.extend(libraries);

        let invocation = engine
            .environment()
            .invocation(&engine.settings.toolchain().strip, args);
        let status = engine.environment().execute(&invocation).await?;

        if !status.success() {
            return Err(EngineError::Strip {
                tool: invocation.program,
                status,
            });
        }

        Ok(())
    }
}

/// Size and SHA-256 of each artifact, for the run report.
#[derive(Debug)]
pub struct RecordDigests;

#[async_trait]
impl Hook for RecordDigests {
    const PRIORITY: usize = 200;
    const TRIGGER: HookTrigger = HookTrigger::After;
    const STAGE: Stage = Stage::Build;

    async fn run(&self, state: &mut BuildState<'_>, _engine: &Engine) -> Result<(), EngineError> {
        for artifact in &state.artifacts {
            let digest = digest_file(&artifact.path)
                .await
                .map_err(EngineError::io(format!("hashing {}", artifact.path.display())))?;

            state.digests.insert(artifact.path.clone(), digest);
        }

        Ok(())
    }
}

/// Returns the number of bytes hashed along with the digest.
pub async fn digest_file(path: &Path) -> std::io::Result<(u64, [u8; 32])> {
    let mut file = File::open(path).await?;
    let mut ctx = Context::new(&SHA256);
    let mut buffer = vec![0; 4096];
    let mut size = 0u64;

    loop {
        let r = file.read(&mut buffer).await?;
        if r == 0 {
            break;
        }

        ctx.update(&buffer[..r]);
        size += r as u64;
    }

    let mut out = [0u8; 32];
    out.copy_from_slice(ctx.finish().as_ref());
    Ok((size, out))
}
