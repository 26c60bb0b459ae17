use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use dmriqc_mosaic::{
    BlendOptions, Coloring, GlyphRenderer, MosaicOptions, OutputTarget, ResizeFilter,
    batch::{JobOutcome, Manifest, coloring_from_flags, run_batch},
    screenshot_mosaic_blend, screenshot_mosaic_wrapper,
    text::DEFAULT_FONT_PATH,
};

#[derive(Parser)]
#[command(name = "dmriqc-mosaic")]
#[command(version, about = "Quality-control mosaics for diffusion MRI volumes", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a mosaic (PNG, or GIF for 4D series) of one volume
    Mosaic {
        /// NIfTI file, DICOM file or DICOM directory
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        coloring: ColoringArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Blend an overlay volume on top of a base volume
    Blend {
        /// Base volume
        #[arg(value_name = "IMAGE")]
        image: PathBuf,

        /// Overlay volume (mask or labels)
        #[arg(value_name = "OVERLAY")]
        overlay: PathBuf,

        /// Overlay weight in [0, 1]
        #[arg(long, value_name = "FLOAT", default_value = "0.5")]
        blend_val: f32,

        /// Treat the overlay as a binary mask painted red
        #[arg(long)]
        is_mask: bool,

        #[command(flatten)]
        layout: LayoutArgs,

        #[command(flatten)]
        coloring: ColoringArgs,

        #[command(flatten)]
        output: OutputArgs,
    },

    /// Run every job of a TOML manifest
    Batch {
        /// Manifest file
        #[arg(value_name = "MANIFEST")]
        manifest: PathBuf,

        /// Number of parallel workers (0 = one per core)
        #[arg(short = 'j', long, value_name = "N", default_value = "0")]
        threads: usize,

        #[command(flatten)]
        output: OutputArgs,
    },
}

#[derive(Args)]
struct LayoutArgs {
    /// Take every n-th axial slice
    #[arg(long, value_name = "N", default_value = "1")]
    skip: usize,

    /// Gutter between slices in pixels
    #[arg(long, value_name = "PX", default_value = "20")]
    pad: usize,

    /// Slices per grid row
    #[arg(long, value_name = "N", default_value = "15")]
    nb_columns: usize,

    /// Leave out the sagittal/coronal/axial overview strip
    #[arg(long)]
    no_three_axis: bool,

    /// Draw A/P/L/R around the grid
    #[arg(long)]
    axis_labels: bool,

    /// Downscale mosaics wider than this
    #[arg(long, value_name = "PX", default_value = "1920")]
    max_width: u32,

    /// Resampling filter: nearest, triangle, catmull-rom, gaussian or lanczos3
    #[arg(long, value_name = "FILTER", default_value = "lanczos3")]
    filter: ResizeFilter,

    /// GIF frame duration in milliseconds
    #[arg(long, value_name = "MS", default_value = "100")]
    duration: u32,

    /// Seed for generated label palettes
    #[arg(long, value_name = "N", default_value = "1")]
    seed: u64,
}

#[derive(Args)]
struct ColoringArgs {
    /// Named colormap (gray, hot, jet, bone, ...)
    #[arg(long, value_name = "NAME")]
    cmap: Option<String>,

    /// Label lookup table file
    #[arg(long, value_name = "FILE")]
    lut: Option<PathBuf>,

    /// Generate a distinguishable palette for the labels present
    #[arg(long)]
    compute_lut: bool,
}

#[derive(Args)]
struct OutputArgs {
    /// Output directory
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    out: PathBuf,

    /// Prefix for output file names
    #[arg(long, value_name = "PREFIX", default_value = "")]
    prefix: String,

    /// TrueType font for burned-in text
    #[arg(long, value_name = "FILE", default_value = DEFAULT_FONT_PATH)]
    font: PathBuf,
}

impl LayoutArgs {
    fn to_options(&self) -> MosaicOptions {
        MosaicOptions {
            skip: self.skip,
            pad: self.pad,
            nb_columns: self.nb_columns,
            three_axis: !self.no_three_axis,
            orientation_labels: self.axis_labels,
            coloring: Coloring::Gray,
            max_width: self.max_width,
            resize_filter: self.filter,
            frame_duration_ms: self.duration,
            palette_seed: self.seed,
        }
    }
}

impl ColoringArgs {
    fn resolve(&self) -> Result<Option<Coloring>> {
        Ok(coloring_from_flags(
            self.cmap.as_deref(),
            self.lut.as_deref(),
            self.compute_lut,
        )?)
    }
}

impl OutputArgs {
    fn prepare(&self) -> Result<(OutputTarget, GlyphRenderer)> {
        std::fs::create_dir_all(&self.out)
            .with_context(|| format!("failed to create {}", self.out.display()))?;
        let text = GlyphRenderer::load(&self.font);
        if !text.is_available() {
            tracing::warn!(font = %self.font.display(), "font unavailable, labelled output will fail");
        }
        Ok((OutputTarget::new(&self.out, self.prefix.clone()), text))
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Mosaic {
            image,
            layout,
            coloring,
            output,
        } => {
            let mut options = layout.to_options();
            if let Some(coloring) = coloring.resolve()? {
                options.coloring = coloring;
            }
            let (target, text) = output.prepare()?;
            let written = screenshot_mosaic_wrapper(&image, &options, &target, &text)
                .with_context(|| format!("failed to render {}", image.display()))?;
            println!("{}", written.display());
        }
        Commands::Blend {
            image,
            overlay,
            blend_val,
            is_mask,
            layout,
            coloring,
            output,
        } => {
            let mut options = layout.to_options();
            let mut blend = BlendOptions {
                blend_val,
                is_mask,
                overlay_labels: None,
            };
            match coloring.resolve()? {
                Some(Coloring::Labels(source)) => blend.overlay_labels = Some(source),
                Some(other) => options.coloring = other,
                None => {}
            }
            let (target, text) = output.prepare()?;
            let written = screenshot_mosaic_blend(&image, &overlay, &options, &blend, &target, &text)
                .with_context(|| {
                    format!("failed to blend {} over {}", overlay.display(), image.display())
                })?;
            println!("{}", written.display());
        }
        Commands::Batch {
            manifest,
            threads,
            output,
        } => run_manifest(&manifest, threads, &output)?,
    }
    Ok(())
}

fn run_manifest(path: &Path, threads: usize, output: &OutputArgs) -> Result<()> {
    let manifest = Manifest::from_file(path)?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let jobs = manifest.jobs(base_dir)?;
    if jobs.is_empty() {
        bail!("{} contains no [[job]] entries", path.display());
    }
    info!(jobs = jobs.len(), threads, "starting batch");

    let (target, text) = output.prepare()?;
    let outcomes = run_batch(&jobs, &target, threads, &AtomicBool::new(false), &text)?;

    let mut failed = 0;
    for (job, outcome) in jobs.iter().zip(&outcomes) {
        match outcome {
            JobOutcome::Written(written) => println!("{}", written.display()),
            JobOutcome::Failed(e) => {
                failed += 1;
                eprintln!("{}: {e}", job.image().display());
            }
            JobOutcome::Cancelled => {}
        }
    }
    if failed > 0 {
        bail!("{failed} of {} jobs failed", jobs.len());
    }
    Ok(())
}
