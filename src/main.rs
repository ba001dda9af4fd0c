use anyhow::Result;
use clap::Parser;
use std::path::Path;

#[derive(Parser, Debug)]
#[command(
    name = "ocr-translator-rust",
    version,
    about = "Recognize text in images, translate it and paint it back"
)]
struct Cli {
    /// Image file to recognize
    #[arg(short = 'd', long = "data")]
    data: Option<String>,

    /// Translate the transcript into this language (e.g. zh, de, ja)
    #[arg(short = 'l', long = "lang")]
    lang: Option<String>,

    /// Write the annotated image (PNG) to this path
    #[arg(short = 'o', long = "overlay")]
    overlay: Option<String>,

    /// Draw overlay boxes without text
    #[arg(long = "boxes-only")]
    boxes_only: bool,

    /// Print merged lines with their boxes and confidence
    #[arg(long = "segments")]
    segments: bool,

    /// Show languages installed for the tesseract engine and exit
    #[arg(long = "show-ocr-languages")]
    show_ocr_languages: bool,

    /// Run the HTTP server instead of a one-shot recognition
    #[arg(short = 's', long = "server")]
    server: bool,

    /// Server bind address (overrides settings [server] addr)
    #[arg(long = "addr")]
    addr: Option<String>,

    /// Read extra settings from a local TOML file
    #[arg(short = 'r', long = "read-settings")]
    read_settings: Option<String>,

    /// Enable verbose logging
    #[arg(long = "verbose")]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    ocr_translator_rust::logging::init(cli.verbose)?;

    if cli.server {
        let settings =
            ocr_translator_rust::settings::load_settings(cli.read_settings.as_deref().map(Path::new))?;
        let addr = cli.addr.unwrap_or_else(|| settings.server.addr.clone());
        return ocr_translator_rust::server::run_server(settings, addr).await;
    }

    let output = ocr_translator_rust::run(ocr_translator_rust::Config {
        data: cli.data,
        lang: cli.lang,
        overlay: cli.overlay,
        boxes_only: cli.boxes_only,
        segments: cli.segments,
        settings_path: cli.read_settings,
        show_ocr_languages: cli.show_ocr_languages,
    })
    .await?;

    println!("{}", output);
    Ok(())
}
