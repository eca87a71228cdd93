use chariot::{
    config::{Format, SystemConfig},
    session::LogLevel,
    ChariotError, System,
};
use clap::{command, Parser};
use std::path::PathBuf;
use tokio_stream::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Program to run in a fresh session
    #[arg(short, long)]
    program: Option<PathBuf>,

    /// Dump the global registry here after the run
    #[arg(short, long)]
    save: Option<PathBuf>,

    /// Format of the dump
    #[arg(short, long, default_value_t = Format::Text)]
    format: Format,

    /// Enable debug logging and print lifecycle events
    #[arg(short, long)]
    verbose: bool,
}

async fn run(cli: &Cli) -> Result<(), ChariotError> {
    let config = if cli.config.exists() {
        SystemConfig::from_file(&cli.config)?
    } else {
        SystemConfig::default()
    };
    info!("config loaded.");
    debug!("config: {:?}", config);

    let system = System::new(config);
    if cli.verbose {
        let mut events = Box::pin(system.event_bus().stream());
        tokio::spawn(async move {
            while let Some(event) = events.next().await {
                debug!(?event, "event");
            }
        });
    }
    system.bootstrap().await?;

    if let Some(path) = &cli.program {
        let source = tokio::fs::read_to_string(path).await?;
        let sessions = system.sessions();
        let token = uuid::Uuid::new_v4().to_string();
        sessions.new_session("cli", &token, None).await?;
        let result = sessions.execute(&source, &token).await?;

        for record in &result.logs {
            let marker = match record.level {
                LogLevel::Warn | LogLevel::Error => "!",
                LogLevel::Debug | LogLevel::Info => " ",
            };
            println!("{} [{}] {}", marker, record.level, record.message);
        }
        match &result.error {
            None => println!("{}", result.value),
            Some(error) => eprintln!("Error: {}", error),
        }
        sessions.end_session(&token).await?;
    }

    if let Some(path) = &cli.save {
        let snapshot = system
            .store()
            .snapshot_registry(system.config().persistence.function_policy)
            .await?;
        chariot::tree::serializer::write_document(path, &snapshot, cli.format).await?;
        info!(path = %path.display(), "global registry saved");
    }

    system.shutdown().await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(e) = run(&cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
