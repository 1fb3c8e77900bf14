// SPDX-License-Identifier: CEPL-1.0
//! GLSL → SPIR-V compilation and a filesystem watcher that recompiles shader
//! sources as they change.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use anyhow::{anyhow, Context, Result};
use naga::ShaderStage;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, error, info, warn};

/// Entry point every shader must define.
pub const ENTRY_POINT: &str = "main";

/// Stage implied by the file extension; `None` for anything that is not a
/// shader source.
pub fn shader_stage(path: &Path) -> Option<ShaderStage> {
    match path.extension()?.to_str()? {
        "vert" => Some(ShaderStage::Vertex),
        "frag" => Some(ShaderStage::Fragment),
        _ => None,
    }
}

/// `<output_dir>/<file name>.spv`, e.g. `triangle.vert` → `triangle.vert.spv`.
pub fn spirv_path(output_dir: &Path, source: &Path) -> Option<PathBuf> {
    let name = source.file_name()?.to_str()?;
    Some(output_dir.join(format!("{name}.spv")))
}

pub fn compile_glsl(source: &str, stage: ShaderStage) -> Result<Vec<u32>> {
    let mut frontend = naga::front::glsl::Frontend::default();
    let module = frontend
        .parse(&naga::front::glsl::Options::from(stage), source)
        .map_err(|e| anyhow!("GLSL parse error: {e:?}"))?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::PUSH_CONSTANT,
    );
    let info = validator
        .validate(&module)
        .map_err(|e| anyhow!("validation error: {e}"))?;

    let options = naga::back::spv::Options::default();
    let pipeline_options = naga::back::spv::PipelineOptions {
        shader_stage: stage,
        entry_point: ENTRY_POINT.to_string(),
    };
    naga::back::spv::write_vec(&module, &info, &options, Some(&pipeline_options))
        .context("SPIR-V generation failed")
}

/// Compile one source file and write the binary next to its siblings in
/// `output_dir`. Returns the written path.
pub fn compile_file(source: &Path, output_dir: &Path) -> Result<PathBuf> {
    let stage = shader_stage(source)
        .with_context(|| format!("not a shader source: {}", source.display()))?;
    let out = spirv_path(output_dir, source)
        .with_context(|| format!("bad shader file name: {}", source.display()))?;

    let text = fs::read_to_string(source)
        .with_context(|| format!("read {}", source.display()))?;
    let words =
        compile_glsl(&text, stage).with_context(|| format!("compile {}", source.display()))?;

    fs::create_dir_all(output_dir)
        .with_context(|| format!("create {}", output_dir.display()))?;
    fs::write(&out, bytemuck::cast_slice::<u32, u8>(&words))
        .with_context(|| format!("write {}", out.display()))?;
    Ok(out)
}

/// Compile every `.vert` / `.frag` in `source_dir`. Stops at the first failure.
pub fn compile_all(source_dir: &Path, output_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut sources: Vec<PathBuf> = fs::read_dir(source_dir)
        .with_context(|| format!("read dir {}", source_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && shader_stage(p).is_some())
        .collect();
    sources.sort();

    let mut written = Vec::with_capacity(sources.len());
    for src in &sources {
        written.push(compile_file(src, output_dir)?);
    }
    info!(count = written.len(), dir = %output_dir.display(), "shaders compiled");
    Ok(written)
}

/// Shaders recompiled during one `poll`; the pipeline should be rebuilt.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReloadRequest {
    pub shaders: Vec<PathBuf>,
}

/// Shader sources touched by a batch of events, deduplicated.
fn changed_sources<I>(events: I) -> BTreeSet<PathBuf>
where
    I: IntoIterator<Item = Event>,
{
    events
        .into_iter()
        .filter(|ev| matches!(ev.kind, EventKind::Create(_) | EventKind::Modify(_)))
        .flat_map(|ev| ev.paths)
        .filter(|p| shader_stage(p).is_some())
        .collect()
}

pub struct ShaderWatcher {
    _watcher: RecommendedWatcher,
    events: mpsc::Receiver<Event>,
    source_dir: PathBuf,
    output_dir: PathBuf,
}

impl ShaderWatcher {
    pub fn new(source_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Result<Self> {
        let source_dir = source_dir.into();
        let output_dir = output_dir.into();
        let (tx, rx) = mpsc::channel::<Event>();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = tx.send(event);
            }
            Err(e) => warn!(error = %e, "shader watch error"),
        })
        .context("create shader watcher")?;
        watcher
            .watch(&source_dir, RecursiveMode::NonRecursive)
            .with_context(|| format!("watch {}", source_dir.display()))?;

        info!(dir = %source_dir.display(), "watching shaders");
        Ok(Self {
            _watcher: watcher,
            events: rx,
            source_dir,
            output_dir,
        })
    }

    pub fn source_dir(&self) -> &Path {
        &self.source_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Non-blocking. Recompiles whatever changed since the last call and
    /// returns the outputs, or `None` when nothing compiled.
    pub fn poll(&self) -> Option<ReloadRequest> {
        let changed = changed_sources(self.events.try_iter());
        if changed.is_empty() {
            return None;
        }

        let mut shaders = Vec::new();
        for src in changed {
            // editors often save through a temp file and rename; the event
            // may name a path that is already gone
            if !src.is_file() {
                debug!(path = %src.display(), "changed shader vanished");
                continue;
            }
            match compile_file(&src, &self.output_dir) {
                Ok(out) => {
                    info!(shader = %src.display(), "recompiled");
                    shaders.push(out);
                }
                Err(e) => error!(shader = %src.display(), "shader compile failed: {e:#}"),
            }
        }

        (!shaders.is_empty()).then_some(ReloadRequest { shaders })
    }
}
