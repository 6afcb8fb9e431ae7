use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "llm-layout-rust",
    version,
    about = "Place generated copy onto marked regions of a background image"
)]
struct Cli {
    /// Background image (png/jpg/jpeg) to import into the storage root
    #[arg(short = 'i', long = "image")]
    image: Option<PathBuf>,

    /// Rectangles as a JSON list of {left, top, width, height}, or a path to such a file
    #[arg(short = 'R', long = "rects")]
    rects: Option<String>,

    /// Design intention passed to the generation service
    #[arg(short = 'p', long = "prompt", default_value = "")]
    prompt: String,

    /// Resume from a saved preview name (rect_<base>_<uuid>.<ext>)
    #[arg(short = 'D', long = "document")]
    document: Option<String>,

    /// Stop after writing the annotated preview and document
    #[arg(long = "skip-enrich")]
    skip_enrich: bool,

    /// Also rasterize the composed SVG to PNG
    #[arg(long = "png")]
    png: bool,

    /// Model name or provider:model (e.g. openai:gpt-4o-mini)
    #[arg(short = 'm', long = "model")]
    model: Option<String>,

    /// API key (overrides environment variables)
    #[arg(short = 'k', long = "key")]
    key: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,

    /// Start the HTTP server instead of running once
    #[arg(long = "server")]
    server: bool,

    /// Address for --server
    #[arg(long = "addr", default_value = "127.0.0.1:5000")]
    addr: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    llm_layout_rust::logging::init(cli.verbose)?;

    if cli.server {
        let settings =
            llm_layout_rust::settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
        return llm_layout_rust::server::run_server(settings, cli.addr).await;
    }

    let config = llm_layout_rust::Config {
        image: cli.image,
        rects: cli.rects,
        prompt: cli.prompt,
        document: cli.document,
        skip_enrich: cli.skip_enrich,
        png: cli.png,
        model: cli.model,
        key: cli.key,
        settings_path: cli.read_settings,
    };
    let output = llm_layout_rust::run(config).await?;
    println!("{}", output);
    Ok(())
}
