//! sluice CLI - front-end asset pipeline.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;

#[derive(Parser)]
#[command(name = "sluice")]
#[command(about = "Bundle scripts, compile styles and serve them with live reload")]
#[command(version)]
pub struct Cli {
    /// Task to run (defaults to `default`)
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to sluice.toml config file
    #[arg(short, long, default_value = "sluice.toml", global = true)]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Bundle scripts, serve with live reload and watch everything
    Default,

    /// Bundle scripts once into the development output
    Js,

    /// Compile the stylesheet once into the development output
    Sass,

    /// Recompile the stylesheet on change
    #[command(name = "sass:watch")]
    SassWatch,

    /// Serve the development output, watching styles, HTML and fonts
    Serve,

    /// Copy HTML templates into the development output
    Copy,

    /// Copy fonts into the development output
    #[command(name = "copy:fonts")]
    CopyFonts,

    /// Build the release into the distribution directory
    Build,

    /// Run one release task and the tasks it depends on
    Run {
        /// Task name, e.g. `scss:release`
        task: String,
    },

    /// List release tasks and their dependencies
    Tasks,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    fmt().with_env_filter(filter).with_target(false).init();

    let command = cli.command.unwrap_or(Commands::Default);
    if let Commands::Tasks = command {
        return commands::build::list();
    }

    let config = commands::config::load_config(&cli.config)?;

    match command {
        Commands::Default => commands::dev::run_default(config).await?,
        Commands::Js => commands::assets::js(&config)?,
        Commands::Sass => commands::assets::sass(&config)?,
        Commands::SassWatch => commands::dev::run_sass_watch(config).await?,
        Commands::Serve => commands::dev::run_serve(config).await?,
        Commands::Copy => commands::assets::copy(&config)?,
        Commands::CopyFonts => commands::assets::fonts(&config)?,
        Commands::Build => commands::build::run(config).await?,
        Commands::Run { task } => commands::build::run_task(config, &task).await?,
        Commands::Tasks => commands::build::list()?,
    }

    Ok(())
}
