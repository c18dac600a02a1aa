use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use editstream_client::{AIProgressState, EditClient};
use editstream_proto::EditRequest;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "editstream", version, about = "Agentic image edits with live progress")]
struct Cli {
    /// Base URL of the editstream server
    #[arg(long, global = true, default_value = "http://localhost:8000")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Edit an image from a text instruction
    Edit(EditArgs),
    /// Edit only the masked region (mask required, 3 iterations)
    Inpaint(EditArgs),
}

#[derive(Args, Debug)]
struct EditArgs {
    /// Source image
    #[arg(long)]
    image: PathBuf,

    /// Mask image, white where the edit may happen
    #[arg(long)]
    mask: Option<PathBuf>,

    /// What to change
    #[arg(long)]
    prompt: String,

    /// Generate/self-check rounds (1-5)
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Where to write the final image
    #[arg(long, default_value = "edited.png")]
    output: PathBuf,
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/png",
    }
}

fn read_data_url(path: &Path) -> Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    Ok(format!("data:{};base64,{}", mime_for(path), STANDARD.encode(bytes)))
}

fn decode_data_url(url: &str) -> Result<Vec<u8>> {
    let Some((_, payload)) = url.split_once("base64,") else {
        bail!("result image is not a base64 data URL");
    };
    STANDARD.decode(payload).context("result image is not valid base64")
}

/// Prints a log row whenever it appears or its step/message changes.
#[derive(Default)]
struct LogPrinter {
    seen: HashMap<String, (String, String)>,
}

impl LogPrinter {
    fn print(&mut self, state: &AIProgressState) {
        for (index, entry) in state.log.iter().enumerate() {
            let view = (entry.step.to_string(), entry.message.clone());
            if self.seen.get(&entry.id) == Some(&view) {
                continue;
            }

            let iteration = entry
                .iteration
                .filter(|i| i.current > 0)
                .map(|i| format!(" [{}/{}]", i.current, i.max))
                .unwrap_or_default();
            let duration = entry
                .duration_ms
                .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
                .unwrap_or_default();
            println!("#{:<2} {:<13}{} {}{}", index + 1, view.0, iteration, view.1, duration);

            self.seen.insert(entry.id.clone(), view);
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string()))
        .init();

    let cli = Cli::parse();
    let client = EditClient::new(&cli.server);

    let (args, inpaint) = match cli.command {
        Command::Edit(args) => (args, false),
        Command::Inpaint(args) => (args, true),
    };
    if inpaint && args.mask.is_none() {
        bail!("--mask is required for inpaint");
    }

    let request = EditRequest {
        source_image: read_data_url(&args.image)?,
        prompt: args.prompt.clone(),
        mask_image: args.mask.as_deref().map(read_data_url).transpose()?,
        reference_points: None,
        max_iterations: args.max_iterations,
    };

    info!("Sending request to {}", cli.server);

    let mut printer = LogPrinter::default();
    let observer = |state: &AIProgressState| printer.print(state);
    let result = if inpaint {
        client.inpaint(&request, observer).await
    } else {
        client.agentic_edit(&request, observer).await
    }
    .context("edit failed")?;

    let image = decode_data_url(&result.image_data)?;
    std::fs::write(&args.output, image).with_context(|| format!("failed to write {}", args.output.display()))?;

    eprintln!(
        "Done after {} iteration(s), saved to {}",
        result.iterations,
        args.output.display()
    );
    eprintln!("Final prompt: {}", result.final_prompt);

    Ok(())
}
