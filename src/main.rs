use clap::{Parser, Subcommand};
use image_seo::ai::{self, Credential, GeminiClient};
use image_seo::config::{self, AppConfig, GenerationSettings};
use image_seo::jobs::Orchestrator;
use image_seo::store::{CredentialStore, FileCredentialStore, FileSettingsStore, SettingsStore};
use image_seo::{export, output, scan};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Per-field overrides for the generation settings.
#[derive(clap::Args, Clone)]
struct SettingsArgs {
    /// Number of tags per image (1-50)
    #[arg(long = "tags")]
    tag_count: Option<u32>,

    /// Maximum title length in characters (20-200)
    #[arg(long = "max-title")]
    max_title_length: Option<u32>,

    /// Maximum description length in characters (50-200)
    #[arg(long = "max-description")]
    max_description_length: Option<u32>,
}

impl SettingsArgs {
    fn apply(&self, base: GenerationSettings) -> Result<GenerationSettings, config::ConfigError> {
        base.with_overrides(
            self.tag_count,
            self.max_title_length,
            self.max_description_length,
        )
    }
}

#[derive(Parser)]
#[command(name = "image-seo")]
#[command(about = "Generate SEO titles, descriptions and tags for images")]
#[command(long_about = "\
Generate SEO titles, descriptions and tags for images

Each image is sent to a Gemini vision model, which returns a title, a
description and a fixed number of snake_case tags. Images are independent:
one failure never stops the others. Successful results can be exported as
CSV (filename,title,description,tags).

Getting started:

  image-seo key set AIza...            # save and verify your Gemini API key
  image-seo settings set --tags 8      # optional: change the defaults
  image-seo generate photos/ --csv     # generate and write image_seo_data.csv

State lives in the state directory (default .image-seo/):

  .image-seo/
  ├── config.toml      # provider and export config (see gen-config)
  ├── credential       # the API key
  └── settings.json    # saved generation settings

Set RUST_LOG (e.g. RUST_LOG=image_seo=debug) for detailed logs.")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml, the API key and saved settings
    #[arg(long, default_value = ".image-seo", global = true)]
    state_dir: PathBuf,

    /// Log at debug level (overridden by RUST_LOG)
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate metadata for images and directories of images
    Generate {
        /// Image files or directories to scan
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Write successful results as CSV
        #[arg(long)]
        csv: bool,

        /// Directory for the CSV file
        #[arg(long, default_value = ".")]
        output: PathBuf,

        /// Overrides for this run only (not saved)
        #[command(flatten)]
        settings: SettingsArgs,
    },
    /// Manage the API key
    #[command(subcommand)]
    Key(KeyCommand),
    /// Show or change the saved generation settings
    #[command(subcommand)]
    Settings(SettingsCommand),
    /// Print a stock config.toml with all options documented
    GenConfig,
}

#[derive(Subcommand)]
enum KeyCommand {
    /// Save an API key (verified with the provider first)
    Set {
        key: String,
        /// Save without contacting the provider
        #[arg(long)]
        no_verify: bool,
    },
    /// Forget the saved API key
    Remove,
    /// Show whether a key is saved
    Status,
    /// Check the saved key with the provider
    Verify,
}

#[derive(Subcommand)]
enum SettingsCommand {
    /// Print the effective settings
    Show,
    /// Change and save settings
    Set(SettingsArgs),
}

/// Config and stores from the state directory.
struct State {
    config: AppConfig,
    credentials: FileCredentialStore,
    settings: FileSettingsStore,
}

impl State {
    fn load(state_dir: &Path) -> Result<Self, config::ConfigError> {
        let config = config::load_config(state_dir)?;
        let settings = FileSettingsStore::new(state_dir, config.generation);
        Ok(Self {
            credentials: FileCredentialStore::new(state_dir),
            settings,
            config,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Generate {
            paths,
            csv,
            output: out_dir,
            settings,
        } => {
            let state = State::load(&cli.state_dir)?;
            let settings = settings.apply(state.settings.load())?;
            let csv_dir = csv.then_some(out_dir.as_path());
            run_generate(&state, settings, &paths, csv_dir).await?;
        }
        Command::Key(cmd) => {
            let state = State::load(&cli.state_dir)?;
            run_key(cmd, &state).await?;
        }
        Command::Settings(SettingsCommand::Show) => {
            let state = State::load(&cli.state_dir)?;
            output::print_settings(&state.settings.load());
        }
        Command::Settings(SettingsCommand::Set(args)) => {
            let state = State::load(&cli.state_dir)?;
            let settings = args.apply(state.settings.load())?;
            state.settings.save(&settings)?;
            output::print_settings(&settings);
        }
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
        }
    }

    Ok(())
}

async fn run_generate(
    state: &State,
    settings: GenerationSettings,
    paths: &[PathBuf],
    csv_dir: Option<&Path>,
) -> Result<(), Box<dyn std::error::Error>> {
    let client = GeminiClient::new(&state.config.provider)?;
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            for line in output::format_job_event(&event) {
                println!("{}", line);
            }
        }
    });

    let orchestrator = Orchestrator::new(client)
        .with_events(tx)
        .with_credential(state.credentials.load()?);

    let records = scan::scan_paths(paths)?;
    if records.is_empty() {
        println!("No images found");
        return Ok(());
    }
    info!(count = records.len(), "queued images");
    orchestrator.add_images(records);

    let report = orchestrator.generate_all(settings).await?;
    let images = orchestrator.images();
    let results = orchestrator.results();
    let loading = orchestrator.loading();
    let encoded = csv_dir.map(|_| orchestrator.export_csv());
    drop(orchestrator);
    printer.join().map_err(|_| "output thread panicked")?;

    println!();
    output::print_results(&images, &results, &loading);
    println!();
    output::print_batch_report(&report);

    if let (Some(dir), Some(encoded)) = (csv_dir, encoded) {
        match encoded {
            Ok(text) => {
                let path = export::write_csv(dir, &state.config.export.filename, &text)?;
                println!("Wrote {}", path.display());
            }
            Err(export::ExportError::NothingToExport) => {
                println!("{}", export::ExportError::NothingToExport);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

async fn run_key(cmd: KeyCommand, state: &State) -> Result<(), Box<dyn std::error::Error>> {
    let credentials = &state.credentials;
    match cmd {
        KeyCommand::Set { key, no_verify } => {
            let credential = Credential::parse(&key)?;
            if !no_verify {
                let client = GeminiClient::new(&state.config.provider)?;
                let check = ai::validate_credential(&client, credential.expose()).await;
                if !check.valid {
                    return Err(check.reason.unwrap_or_else(|| "API key rejected".into()).into());
                }
            }
            credentials.save(&credential)?;
            println!("Saved API key {}", credential.masked());
        }
        KeyCommand::Remove => {
            credentials.remove()?;
            println!("API key removed");
        }
        KeyCommand::Status => {
            for line in output::format_credential_status(credentials.load()?.as_ref()) {
                println!("{}", line);
            }
        }
        KeyCommand::Verify => {
            let Some(credential) = credentials.load()? else {
                return Err(image_seo::jobs::JobError::NoCredential.into());
            };
            let client = GeminiClient::new(&state.config.provider)?;
            let check = ai::validate_credential(&client, credential.expose()).await;
            for line in output::format_credential_check(&check) {
                println!("{}", line);
            }
            if !check.valid {
                return Err("API key verification failed".into());
            }
        }
    }
    Ok(())
}

/// Install the stderr log subscriber. `RUST_LOG` takes precedence over `--verbose`.
fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
