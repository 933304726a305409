//! One-shot overlay runs and API key management without the HTTP server.
//!
//!   overlay-cli run --input capture.png --output overlay.png
//!   overlay-cli key set --provider deepl --value <KEY>

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use ocr_overlay::{
    core::{types::OverlayRegion, Config},
    services::{CredentialStore, KeyringStore},
    orchestration::spawn_worker,
    utils::encode_png,
    OverlayPipeline,
};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "overlay-cli",
    about = "Detect, translate and redraw text in a single image",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the overlay pipeline once on an image file
    Run {
        /// Screen capture to translate
        #[arg(long, short = 'i')]
        input: PathBuf,

        /// Where to write the rendered PNG
        #[arg(long, short = 'o', default_value = "overlay.png")]
        output: PathBuf,

        /// Overrides TARGET_LANG
        #[arg(long, short = 't')]
        target_lang: Option<String>,

        /// Print regions and timings as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage translation API keys in the OS keychain
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    /// Store a key
    Set {
        #[arg(long, short = 'p')]
        provider: String,
        #[arg(long)]
        value: String,
    },
    /// Report whether a key is stored (the key itself is not printed)
    Get {
        #[arg(long, short = 'p')]
        provider: String,
    },
    /// Remove a stored key
    Delete {
        #[arg(long, short = 'p')]
        provider: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("ocr_overlay=info,ort=off")
        .with_target(false)
        .init();

    match Args::parse().command {
        Commands::Run {
            input,
            output,
            target_lang,
            json,
        } => run(input, output, target_lang, json).await,
        Commands::Key { action } => key(action),
    }
}

async fn run(
    input: PathBuf,
    output: PathBuf,
    target_lang: Option<String>,
    json: bool,
) -> Result<()> {
    if !input.exists() {
        bail!("Image not found: {}", input.display());
    }

    let config = Config::new().context("Failed to load configuration")?;
    let pipeline = OverlayPipeline::load(&config, None)?;
    let (worker, _task) = spawn_worker(pipeline, 1);

    info!("Loading image: {}", input.display());
    let image = image::open(&input)
        .with_context(|| format!("Failed to open {}", input.display()))?
        .to_rgba8();

    let result = worker
        .submit(image, target_lang.map(|lang| lang.to_uppercase()))
        .await?;

    let png = encode_png(&result.image)?;
    std::fs::write(&output, png)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if json {
        let regions: Vec<OverlayRegion> = result
            .regions
            .iter()
            .zip(&result.translations)
            .map(|(region, translation)| OverlayRegion {
                quad: *region.quad(),
                text: region.text().to_string(),
                confidence: region.confidence(),
                translation: translation.clone(),
            })
            .collect();
        let report = serde_json::json!({
            "regions": regions,
            "timings": result.timings,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("\n=== Results ===");
        for (i, (region, translation)) in result.regions.iter().zip(&result.translations).enumerate()
        {
            println!(
                "  {}. [{:.2}] {} -> {}",
                i + 1,
                region.confidence(),
                region.text(),
                translation
            );
        }
        println!(
            "{} regions in {:.2}ms, written to {}",
            result.regions.len(),
            result.timings.total_ms,
            output.display()
        );
    }

    Ok(())
}

fn key(action: KeyAction) -> Result<()> {
    let store = KeyringStore::default();
    match action {
        KeyAction::Set { provider, value } => {
            if value.trim().is_empty() {
                bail!("Refusing to store an empty key");
            }
            store.set_key(&provider, value.trim())?;
            println!("Stored {} key", provider);
        }
        KeyAction::Get { provider } => match store.get_key(&provider) {
            Some(key) => println!("{} key present ({} chars)", provider, key.len()),
            None => println!("No {} key stored", provider),
        },
        KeyAction::Delete { provider } => {
            store.delete_key(&provider)?;
            println!("Deleted {} key", provider);
        }
    }
    Ok(())
}
