use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use likeness_core::decision::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_MAX_FACES};
use likeness_core::{load_gallery, DecisionEngine, MatchPolicy, OnnxEmbeddingSource};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "likeness", about = "Likeness known-person matching CLI")]
struct Cli {
    /// Directory containing det_10g.onnx and w600k_r50.onnx
    #[arg(long, global = true, default_value = "models")]
    model_dir: PathBuf,

    /// Root of <identity>/<image> reference faces
    #[arg(long, global = true, default_value = "reference-faces")]
    reference_dir: PathBuf,

    /// ONNX Runtime intra-op threads per session
    #[arg(long, global = true, default_value_t = 2)]
    intra_threads: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the reference gallery and print what was loaded
    Gallery,
    /// Match one image against the reference gallery
    Detect {
        /// Image file to check
        image: PathBuf,
        /// Distance cutoff for an accepted match
        #[arg(long, default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
        threshold: f32,
        /// Skip images with more faces than this
        #[arg(long, default_value_t = DEFAULT_MAX_FACES)]
        max_faces: usize,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut source = OnnxEmbeddingSource::load(&cli.model_dir, cli.intra_threads)
        .with_context(|| format!("loading models from {}", cli.model_dir.display()))?;
    let gallery = load_gallery(&cli.reference_dir, &mut source);

    match cli.command {
        Commands::Gallery => {
            println!("{}", serde_json::to_string_pretty(&gallery.summary())?);
        }
        Commands::Detect {
            image,
            threshold,
            max_faces,
        } => {
            if !(threshold.is_finite() && threshold > 0.0) {
                anyhow::bail!("--threshold must be a positive number");
            }
            let policy = MatchPolicy {
                confidence_threshold: threshold,
                max_faces,
            };
            let decoded = likeness_core::decode_image(
                &std::fs::read(&image).with_context(|| format!("reading {}", image.display()))?,
            )?;
            let report = DecisionEngine::new(policy).recognize(&mut source, &decoded, &gallery)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}
