//! Batch mode: many independent mosaics on a dedicated worker pool.
//!
//! Jobs come from a TOML manifest:
//!
//! ```toml
//! [defaults]
//! nb_columns = 10
//! three_axis = false
//!
//! [[job]]
//! image = "sub-01/fa.nii.gz"
//!
//! [[job]]
//! image = "sub-01/t1.nii.gz"
//! blend = "sub-01/wm_mask.nii.gz"
//! is_mask = true
//! blend_val = 0.3
//! ```
//!
//! Relative paths resolve against the manifest's directory.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use rayon::prelude::*;
use serde::Deserialize;
use tracing::{info, warn};
use web_time::Instant;

use crate::blend::{BlendOptions, screenshot_mosaic_blend};
use crate::error::{MosaicError, Result};
use crate::mosaic::{Coloring, LabelSource, MosaicOptions, OutputTarget, screenshot_mosaic_wrapper};
use crate::text::TextRenderer;

/// Turn the `cmap` / `lut` / `compute_lut` switches into a colouring.
///
/// `None` when no switch is set; at most one may be set.
pub fn coloring_from_flags(
    cmap: Option<&str>,
    lut: Option<&Path>,
    compute_lut: bool,
) -> Result<Option<Coloring>> {
    match (cmap, lut, compute_lut) {
        (None, None, false) => Ok(None),
        (Some(name), None, false) => Ok(Some(Coloring::Colormap(name.to_owned()))),
        (None, Some(path), false) => Ok(Some(Coloring::Labels(LabelSource::LutFile(
            path.to_path_buf(),
        )))),
        (None, None, true) => Ok(Some(Coloring::Labels(LabelSource::Generated))),
        _ => Err(MosaicError::Configuration(
            "cmap, lut and compute_lut are mutually exclusive".into(),
        )),
    }
}

/// One unit of batch work.
#[derive(Debug, Clone, PartialEq)]
pub enum ScreenshotJob {
    Mosaic {
        image: PathBuf,
        options: MosaicOptions,
    },
    Blend {
        image: PathBuf,
        overlay: PathBuf,
        options: MosaicOptions,
        blend: BlendOptions,
    },
}

impl ScreenshotJob {
    pub fn image(&self) -> &Path {
        match self {
            ScreenshotJob::Mosaic { image, .. } | ScreenshotJob::Blend { image, .. } => image,
        }
    }

    pub fn run(&self, target: &OutputTarget, text: &dyn TextRenderer) -> Result<PathBuf> {
        match self {
            ScreenshotJob::Mosaic { image, options } => {
                screenshot_mosaic_wrapper(image, options, target, text)
            }
            ScreenshotJob::Blend {
                image,
                overlay,
                options,
                blend,
            } => screenshot_mosaic_blend(image, overlay, options, blend, target, text),
        }
    }
}

fn default_blend_val() -> f32 {
    0.5
}

/// A `[[job]]` entry.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JobEntry {
    pub image: PathBuf,
    #[serde(default)]
    pub blend: Option<PathBuf>,
    #[serde(default = "default_blend_val")]
    pub blend_val: f32,
    #[serde(default)]
    pub is_mask: bool,
    #[serde(default)]
    pub cmap: Option<String>,
    #[serde(default)]
    pub lut: Option<PathBuf>,
    #[serde(default)]
    pub compute_lut: bool,
}

impl JobEntry {
    /// Resolve against `defaults` and `base_dir`.
    ///
    /// For blends the colormap applies to the base image while a LUT
    /// colours the overlay.
    pub fn to_job(&self, defaults: &MosaicOptions, base_dir: &Path) -> Result<ScreenshotJob> {
        let lut = self.lut.as_ref().map(|path| base_dir.join(path));
        let coloring =
            coloring_from_flags(self.cmap.as_deref(), lut.as_deref(), self.compute_lut)?;
        let image = base_dir.join(&self.image);

        let Some(overlay) = &self.blend else {
            let options = MosaicOptions {
                coloring: coloring.unwrap_or_else(|| defaults.coloring.clone()),
                ..defaults.clone()
            };
            return Ok(ScreenshotJob::Mosaic { image, options });
        };

        let (base_coloring, overlay_labels) = match coloring {
            Some(Coloring::Labels(source)) => (Coloring::Gray, Some(source)),
            Some(other) => (other, None),
            None => (defaults.coloring.clone(), None),
        };
        Ok(ScreenshotJob::Blend {
            image,
            overlay: base_dir.join(overlay),
            options: MosaicOptions {
                coloring: base_coloring,
                ..defaults.clone()
            },
            blend: BlendOptions {
                blend_val: self.blend_val,
                is_mask: self.is_mask,
                overlay_labels,
            },
        })
    }
}

/// Parsed batch manifest.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub defaults: MosaicOptions,
    #[serde(default)]
    pub job: Vec<JobEntry>,
}

impl Manifest {
    pub fn parse(source: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(source)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::parse(&source).map_err(|e| {
            MosaicError::Configuration(format!("{}: {}", path.display(), e.message()))
        })
    }

    pub fn jobs(&self, base_dir: &Path) -> Result<Vec<ScreenshotJob>> {
        self.job
            .iter()
            .map(|entry| entry.to_job(&self.defaults, base_dir))
            .collect()
    }
}

/// Result of one batch item.
#[derive(Debug)]
pub enum JobOutcome {
    Written(PathBuf),
    Failed(MosaicError),
    /// Skipped because the batch was cancelled first.
    Cancelled,
}

impl JobOutcome {
    pub fn is_written(&self) -> bool {
        matches!(self, JobOutcome::Written(_))
    }
}

/// Run `jobs` on a pool of `threads` workers (0 picks one per core).
///
/// A failed job never stops the others. Once `cancel` is set, jobs that
/// have not started yet report [`JobOutcome::Cancelled`]. Outcomes are in
/// job order.
pub fn run_batch(
    jobs: &[ScreenshotJob],
    target: &OutputTarget,
    threads: usize,
    cancel: &AtomicBool,
    text: &dyn TextRenderer,
) -> Result<Vec<JobOutcome>> {
    let batch_start = Instant::now();
    if !target.directory.as_os_str().is_empty() {
        fs::create_dir_all(&target.directory)?;
    }
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| MosaicError::Configuration(format!("failed to build worker pool: {e}")))?;

    let outcomes: Vec<JobOutcome> = pool.install(|| {
        jobs.par_iter()
            .map(|job| {
                if cancel.load(Ordering::Relaxed) {
                    return JobOutcome::Cancelled;
                }
                match job.run(target, text) {
                    Ok(path) => JobOutcome::Written(path),
                    Err(e) => {
                        warn!(image = %job.image().display(), error = %e, "mosaic failed");
                        JobOutcome::Failed(e)
                    }
                }
            })
            .collect()
    });

    let written = outcomes.iter().filter(|o| o.is_written()).count();
    info!(
        jobs = jobs.len(),
        written,
        elapsed_ms = batch_start.elapsed().as_millis() as u64,
        "batch finished"
    );
    Ok(outcomes)
}
