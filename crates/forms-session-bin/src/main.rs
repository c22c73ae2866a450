//! forms-session - command-line client for the forms session layer.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use session_config::{init_logging, Config, Paths};

/// forms-session command-line interface.
#[derive(Parser)]
#[command(name = "forms-session")]
#[command(about = "Session, token refresh and realtime comments client for the forms API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error). Defaults to the configured level
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for credentials, config and logs. Defaults to ~/.forms-session
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the stored session and show who is logged in
    Status,
    /// Log in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "FORMS_PASSWORD")]
        password: String,
    },
    /// Create an account and log in
    Register {
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        #[arg(long, env = "FORMS_PASSWORD")]
        password: String,
    },
    /// Clear the stored session
    Logout,
    /// Refresh the access token now
    Refresh,
    /// Authenticated GET against the API, e.g. `get templates/latest`
    Get {
        path: String,
    },
    /// Stream live comments and likes for a template until interrupted
    Watch {
        template_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    paths.ensure_dirs()?;
    let config = Config::load(&paths)?;

    let level = cli.log_level.as_deref().unwrap_or(&config.log_level);
    init_logging(level, &paths);

    let session = app::SessionApp::build(config, paths)?;

    match cli.command {
        Commands::Status => app::status(&session).await?,
        Commands::Login { email, password } => app::login(&session, &email, &password).await?,
        Commands::Register {
            name,
            email,
            password,
        } => app::register(&session, &name, &email, &password).await?,
        Commands::Logout => app::logout(&session).await?,
        Commands::Refresh => app::refresh(&session).await?,
        Commands::Get { path } => app::get(&session, &path).await?,
        Commands::Watch { template_id } => app::watch(&session, &template_id).await?,
    }

    Ok(())
}
