use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use exporters::{run_export, AssetMap, ExportError, ExportPlan};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "driftcut-cli", about = "Driftcut render tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a timeline snapshot into a single output file.
    Render {
        /// Snapshot JSON produced by the editor.
        #[arg(long)]
        snapshot: PathBuf,
        /// JSON object mapping each source id to a local file.
        /// Omitted: sources are resolved as paths directly.
        #[arg(long)]
        assets: Option<PathBuf>,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 1920)]
        width: u32,
        #[arg(long, default_value_t = 1080)]
        height: u32,
        #[arg(long, default_value_t = 30.0)]
        fps: f64,
    },
    /// Probe a media file and print what the editor would import.
    Probe { path: PathBuf },
}

fn main() -> Result<()> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
    let cli = Cli::parse();
    match cli.command {
        Commands::Render { snapshot, assets, output, width, height, fps } => {
            render(snapshot, assets, output, width, height, fps)
        }
        Commands::Probe { path } => {
            let info = media_io::probe_media(&path)
                .with_context(|| format!("probe failed for {}", path.display()))?;
            println!("{}", serde_json::to_string_pretty(&info)?);
            Ok(())
        }
    }
}

fn render(
    snapshot_path: PathBuf,
    assets_path: Option<PathBuf>,
    output: PathBuf,
    width: u32,
    height: u32,
    fps: f64,
) -> Result<()> {
    let restored = project::load_snapshot(&snapshot_path)
        .with_context(|| format!("cannot load snapshot {}", snapshot_path.display()))?;

    let assets: AssetMap = match assets_path {
        Some(p) => {
            let raw: HashMap<String, String> = serde_json::from_str(
                &std::fs::read_to_string(&p)
                    .with_context(|| format!("cannot read asset map {}", p.display()))?,
            )?;
            raw
        }
        None => {
            // No map: every src must already be a resolvable local file.
            restored
                .model
                .actions()
                .filter_map(|(_, a)| {
                    let src = a.kind.source().src.clone();
                    media_io::resolve_source(&src)
                        .map(|r| (src, r.path.to_string_lossy().into_owned()))
                })
                .collect()
        }
    };

    let plan = match ExportPlan::build(&restored.model, &assets, width, height, fps) {
        Ok(plan) => plan,
        Err(ExportError::MissingAsset { src }) => {
            bail!("missing asset: no file available for source '{src}'")
        }
        Err(e) => return Err(e.into()),
    };
    if plan.video_segments.is_empty() {
        bail!("snapshot has no video content to render");
    }

    tracing::info!(
        segments = plan.video_segments.len(),
        audio = plan.audio_clips.len(),
        "rendering {}",
        output.display()
    );
    run_export(&plan, &output, |p| {
        eprint!("\rprogress: {:>5.1}%", p * 100.0);
    })?;
    eprintln!();
    println!("wrote {}", output.display());
    Ok(())
}
