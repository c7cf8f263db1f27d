use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use inkflow::config::{resolve_api_key, RendererPreference, Settings};
use inkflow::editor;
use inkflow::generation::GeminiClient;
use inkflow::session::DiagramSession;
use inkflow::web_server;

// Define the command-line interface structure using clap
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Gemini API key. Takes precedence over GEMINI_API_KEY.
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Gemini model name (gemini-2.5-flash when unset)
    #[arg(long, global = true, env = "GEMINI_MODEL")]
    model: Option<String>,

    /// Upper bound on each model call, in seconds (120 when unset)
    #[arg(long, global = true, env = "INKFLOW_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    #[command(subcommand)]
    command: Commands,
}

// Define the available subcommands
#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the web editor.
    Serve {
        #[arg(long, default_value_t = 9900, help = "Port for the web server.")]
        port: u16,
        #[arg(long, value_enum, env = "INKFLOW_RENDERER", help = "Diagram renderer (auto when unset).")]
        renderer: Option<RendererPreference>,
        #[arg(
            long,
            env = "INKFLOW_SESSION_IDLE_SECS",
            help = "Discard browser sessions idle for this many seconds (3600 when unset)."
        )]
        session_idle_secs: Option<u64>,
        #[arg(long, default_value = "templates", help = "Directory holding the HTML templates.")]
        templates: PathBuf,
        #[arg(long, default_value = "static", help = "Directory served under /static.")]
        static_dir: PathBuf,
    },
    /// Convert one image to Mermaid code and exit.
    Convert {
        /// PNG or JPEG drawing.
        image: PathBuf,
        #[arg(long, help = "Extra description to help the model read the drawing.")]
        context: Option<String>,
        #[arg(long, short, help = "Write the code to this file instead of stdout.")]
        output: Option<PathBuf>,
    },
    /// Convert an image, then refine the diagram with plain-language requests.
    Edit {
        /// PNG or JPEG drawing.
        image: PathBuf,
        #[arg(long, help = "Extra description to help the model read the drawing.")]
        context: Option<String>,
    },
}

impl Cli {
    fn settings(&self) -> Settings {
        let mut settings = Settings::default();
        // A blank --api-key falls back to the configured key.
        settings.api_key =
            resolve_api_key(self.api_key.as_deref(), settings.api_key.as_deref()).ok();
        if let Some(model) = &self.model {
            settings.model = model.clone();
        }
        if let Some(secs) = self.timeout_secs {
            settings.timeout = Duration::from_secs(secs);
        }
        settings
    }
}

fn generator_for(settings: &Settings) -> Result<GeminiClient> {
    let api_key = settings.api_key_for(None)?;
    Ok(GeminiClient::new(
        reqwest::Client::new(),
        settings.api_base.clone(),
        api_key,
        settings.model.clone(),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (GEMINI_API_KEY and friends)
    dotenvy::dotenv().ok();

    // Logs go to stderr so `convert` output can be piped.
    // Reads log level from RUST_LOG (e.g. RUST_LOG=info,inkflow=debug)
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = cli.settings();

    match cli.command {
        Commands::Serve {
            port,
            renderer,
            session_idle_secs,
            templates,
            static_dir,
        } => {
            let settings = Settings {
                renderer: renderer.unwrap_or(settings.renderer),
                session_idle: session_idle_secs
                    .map(Duration::from_secs)
                    .unwrap_or(settings.session_idle),
                templates_dir: templates,
                static_dir,
                ..settings
            };
            if settings.api_key.is_none() {
                info!("No API key configured; each request must supply one");
            }
            info!("Starting web editor on port {}...", port);

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::select! {
                res = web_server::start_web_server(port, settings) => {
                    if let Err(e) = &res {
                        error!("Web server failed: {:?}", e);
                    }
                    res?;
                }
                _ = ctrl_c => {
                    info!("Ctrl-C received, shutting down");
                }
            }
        }
        Commands::Convert {
            image,
            context,
            output,
        } => {
            let generator = generator_for(&settings)?;
            let image = editor::read_image(&image).await?;
            let mut session = DiagramSession::new(settings.timeout);
            let code = editor::convert(&mut session, &generator, &image, context.as_deref()).await?;
            match output {
                Some(path) => {
                    tokio::fs::write(&path, &code)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    info!(path = %path.display(), "Diagram written");
                }
                None => println!("{}", code),
            }
        }
        Commands::Edit { image, context } => {
            let generator = generator_for(&settings)?;
            let image = editor::read_image(&image).await?;
            let mut session = DiagramSession::new(settings.timeout);
            let code = editor::convert(&mut session, &generator, &image, context.as_deref()).await?;
            println!("{}\n", code);

            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            let mut stdout = tokio::io::stdout();
            editor::run_editor(&mut session, &generator, stdin, &mut stdout)
                .await
                .context("Editor session failed")?;
        }
    }

    Ok(())
}
