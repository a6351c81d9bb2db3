//! CLI binary for edgequake-pdf2json.
//!
//! A thin shim over the library crate: `serve` runs the HTTP service,
//! `extract` runs one PDF through the pipeline and prints the JSON, and
//! `login` walks through the chat-provider email-code flow on the terminal.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_pdf2json::model::{build_model, ModelSettings};
use edgequake_pdf2json::server::{serve, AppState, ServerConfig};
use edgequake_pdf2json::session::{LoginRegistry, SessionStore};
use edgequake_pdf2json::{extract, ExtractionConfig, PdfSource, PipelineMode, TextSufficiency};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Run the HTTP service on port 5000
  pdf2json serve --base-dir /srv/ordenes

  # One-off extraction (stdout)
  pdf2json extract cotizacion.pdf

  # Text layer / OCR instead of page images
  pdf2json extract --mode text https://example.com/factura.pdf

  # Log in to the chat provider and save its cookies
  pdf2json login --email compras@empresa.pe

ENVIRONMENT VARIABLES:
  GROQ_API_KEY            Key for the default Groq backend
  PDF2JSON_PROVIDER       groq (default), openai-compatible, auto, or an edgequake-llm provider
  PDF2JSON_BASE_URL       API root for openai-compatible backends
  GROQ_VISION_MODEL       Model id
  PDF_IMG_DPI             Rendering DPI (72–400)
  PDF_MAX_PAGES           Pages sent to the model
  PDF_BASE_DIR            Share directory for ?pdf=<name> and /chat/orden/{name}
  CHAT_PROVIDER_URL       Chat-provider web origin; enables /chat and /auth routes
  TESSERACT_BIN           OCR executable for the text mode fallback
  PDFIUM_LIB_PATH         Path to libpdfium
"#;

/// Extract quotation and invoice data from PDFs as JSON using vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "pdf2json",
    version,
    about = "Extract quotation / invoice headers and line items from PDFs as JSON",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "PDF2JSON_VERBOSE")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP service.
    Serve(ServeArgs),
    /// Extract one PDF (path or URL) and print the JSON result.
    Extract(ExtractArgs),
    /// Email-code login against the chat provider; saves the session cookies.
    Login(LoginArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(long, env = "PDF2JSON_HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PDF2JSON_PORT", default_value_t = 5000)]
    port: u16,

    /// Share directory searched by `?pdf=<name>`.
    #[arg(long, env = "PDF_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Upper bound for one request in seconds.
    #[arg(long, env = "PDF2JSON_REQUEST_TIMEOUT", default_value_t = 600)]
    request_timeout: u64,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Args, Debug)]
struct ExtractArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Print the extraction statistics along with the result.
    #[arg(long)]
    stats: bool,

    #[command(flatten)]
    model: ModelArgs,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long, env = "CHAT_PROVIDER_EMAIL")]
    email: String,

    #[command(flatten)]
    chat: ChatArgs,
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Backend: groq, openai-compatible, auto, or an edgequake-llm provider name.
    #[arg(long, env = "PDF2JSON_PROVIDER", default_value = "groq")]
    provider: String,

    #[arg(long, env = "GROQ_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// API root for openai-compatible backends.
    #[arg(long, env = "PDF2JSON_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "GROQ_VISION_MODEL")]
    model: Option<String>,

    /// Per-call model timeout in seconds.
    #[arg(long, env = "PDF2JSON_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// vision (page images), text (text layer / OCR) or document (the PDF itself).
    #[arg(long, env = "PDF2JSON_MODE", default_value = "vision")]
    mode: PipelineMode,

    #[arg(long, env = "PDF_IMG_DPI", default_value_t = 200,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    #[arg(long, env = "PDF_MAX_PAGES", default_value_t = 5)]
    max_pages: usize,

    /// Retries after the first model call.
    #[arg(long, env = "PDF2JSON_MAX_RETRIES", default_value_t = 2)]
    max_retries: u32,

    #[arg(long, env = "PDF2JSON_TEMP_DIR")]
    temp_dir: Option<PathBuf>,

    /// Our own RUC; never reported as the supplier's.
    #[arg(long, env = "PDF2JSON_OWN_TAX_ID")]
    own_tax_id: Option<String>,

    /// Tesseract language.
    #[arg(long, env = "PDF2JSON_OCR_LANG", default_value = "spa")]
    ocr_lang: String,

    /// Minimum text-layer length before OCR is tried.
    #[arg(long, env = "PDF2JSON_OCR_MIN_CHARS", default_value_t = 150)]
    ocr_min_chars: usize,

    /// OCR executable (tesseract-compatible command line).
    #[arg(long, env = "TESSERACT_BIN", default_value = "tesseract")]
    ocr_command: String,

    /// Largest PDF accepted from a URL, in MiB.
    #[arg(long, env = "PDF2JSON_MAX_DOWNLOAD_MB", default_value_t = 50)]
    max_download_mb: u64,

    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_path: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ChatArgs {
    /// Chat-provider web origin. Unset disables the chat and auth routes.
    #[arg(long, env = "CHAT_PROVIDER_URL")]
    chat_url: Option<String>,

    #[arg(long, env = "PDF2JSON_COOKIES_FILE", default_value = "chat_cookies.json")]
    cookies_file: PathBuf,

    /// Timeout of chat-provider calls in seconds.
    #[arg(long, env = "CHAT_PROVIDER_TIMEOUT", default_value_t = 180)]
    chat_timeout: u64,
}

impl ModelArgs {
    fn settings(&self) -> ModelSettings {
        ModelSettings {
            provider: self.provider.clone(),
            api_key: self.api_key.clone().filter(|k| !k.trim().is_empty()),
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            timeout: Duration::from_secs(self.api_timeout),
        }
    }
}

impl PipelineArgs {
    fn config(&self, api_timeout: u64) -> Result<ExtractionConfig> {
        let mut builder = ExtractionConfig::builder()
            .mode(self.mode)
            .dpi(self.dpi)
            .max_pages(self.max_pages)
            .max_retries(self.max_retries)
            .api_timeout_secs(api_timeout)
            .ocr_lang(&self.ocr_lang)
            .ocr_command(&self.ocr_command)
            .max_download_bytes(self.max_download_mb.saturating_mul(1024 * 1024))
            .text_sufficiency(TextSufficiency {
                min_chars: self.ocr_min_chars,
                ..TextSufficiency::default()
            });
        if let Some(dir) = &self.temp_dir {
            builder = builder.temp_dir(dir);
        }
        if let Some(id) = &self.own_tax_id {
            builder = builder.own_tax_id(id);
        }
        if let Some(path) = &self.pdfium_lib_path {
            builder = builder.pdfium_lib_path(path);
        }
        builder.build().context("Invalid configuration")
    }
}

impl ChatArgs {
    fn stores(&self) -> (Arc<SessionStore>, Arc<LoginRegistry>) {
        let timeout = Duration::from_secs(self.chat_timeout);
        (
            Arc::new(SessionStore::new(self.chat_url.clone(), &self.cookies_file, timeout)),
            Arc::new(LoginRegistry::new(self.chat_url.clone(), &self.cookies_file, timeout)),
        )
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env before parsing so its values act as env fallbacks.
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "edgequake_pdf2json=debug,tower_http=debug,info"
    } else {
        "edgequake_pdf2json=info,tower_http=info,warn"
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match cli.command {
        Command::Serve(args) => run_serve(args).await,
        Command::Extract(args) => run_extract(args).await,
        Command::Login(args) => run_login(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = args.pipeline.config(args.model.api_timeout)?;
    let (sessions, logins) = args.chat.stores();

    let mut state = AppState::new(config, sessions, logins);
    match build_model(&args.model.settings()) {
        Ok(model) => {
            tracing::info!(model = model.name(), "Vision backend ready");
            state = state.with_model(model);
        }
        Err(e) => tracing::warn!("No vision backend, /process will answer 503: {e}"),
    }
    if let Some(dir) = args.base_dir {
        if !dir.is_dir() {
            tracing::warn!(dir = %dir.display(), "PDF_BASE_DIR does not exist");
        }
        state = state.with_share_dir(dir);
    }

    let server = ServerConfig {
        host: args.host,
        port: args.port,
        request_timeout_secs: args.request_timeout,
    };
    serve(&server, state).await.context("Server failed")
}

async fn run_extract(args: ExtractArgs) -> Result<()> {
    let config = args.pipeline.config(args.model.api_timeout)?;
    let model = build_model(&args.model.settings()).context("Model backend unavailable")?;

    let source = PdfSource::from_arg(&args.input);
    let output = extract(&source, model.as_ref(), &config)
        .await
        .context("Extraction failed")?;

    let json = if args.stats {
        serde_json::to_string_pretty(&output)
    } else {
        serde_json::to_string_pretty(&output.result)
    }
    .context("Failed to serialise output")?;

    let mut stdout = io::stdout().lock();
    writeln!(stdout, "{json}").context("Failed to write to stdout")?;
    Ok(())
}

async fn run_login(args: LoginArgs) -> Result<()> {
    if args.chat.chat_url.is_none() {
        bail!("CHAT_PROVIDER_URL (or --chat-url) is required to log in");
    }
    let (sessions, logins) = args.chat.stores();

    let message = logins.send_code(&args.email).await.context("Could not send the code")?;
    eprintln!("{message}");
    eprint!("Código de 6 dígitos: ");
    io::stderr().flush().ok();

    let code = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        io::stdin().lock().read_line(&mut line).map(|_| line)
    })
    .await
    .context("Input task failed")?
    .context("Failed to read the code")?;

    let login = logins
        .verify_code(&args.email, code.trim())
        .await
        .context("Login failed")?;
    eprintln!(
        "Login exitoso: {} cookies guardadas en {}",
        login.cookies_saved,
        args.chat.cookies_file.display()
    );

    let session = sessions.reload().await.context("Saved cookies do not open a session")?;
    eprintln!("Organización: {}", session.organization_id());
    Ok(())
}
