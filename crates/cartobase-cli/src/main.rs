mod cmd;

use cartobase_core::external::SyncOptions;
use cartobase_core::gtfs::GTFS_CONFIG_FILE;
use cartobase_core::{DbOverrides, CONFIG_FILE};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "cartobase",
    about = "Provision and load self-hosted map and transit servers",
    version,
    propagate_version = true
)]
struct Cli {
    /// Config file (YAML)
    #[arg(long, global = true, env = "CARTOBASE_CONFIG", default_value = CONFIG_FILE)]
    config: PathBuf,

    #[command(flatten)]
    db: DbArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Connection parameters that win over the config file.
#[derive(Args)]
struct DbArgs {
    /// Database host
    #[arg(long, global = true)]
    host: Option<String>,

    /// Database port
    #[arg(long, global = true)]
    port: Option<u16>,

    /// Database name
    #[arg(long, global = true)]
    dbname: Option<String>,

    /// Database user
    #[arg(long, global = true)]
    user: Option<String>,

    /// Database password
    #[arg(long, global = true, env = "PGPASSWORD", hide_env_values = true)]
    password: Option<String>,
}

impl DbArgs {
    fn overrides(&self) -> DbOverrides {
        DbOverrides {
            host: self.host.clone(),
            port: self.port,
            dbname: self.dbname.clone(),
            user: self.user.clone(),
            password: self.password.clone(),
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Install host prerequisites (docker, kubectl, gdal, postgres tooling)
    Provision,

    /// Synchronize external geodata tables from their configured sources
    External {
        /// Download new data even when freshness says it is not required
        #[arg(long, short = 'f')]
        force: bool,

        /// Keep downloads and their freshness sidecars for later runs
        #[arg(long, short = 'c')]
        cache: bool,

        /// Work from cached downloads without asking the sources
        #[arg(long)]
        no_update: bool,

        /// Remove cached downloads after their table is published
        #[arg(long, short = 'D')]
        delete_cache: bool,

        /// Re-import downloaded content even when the database is current
        #[arg(long)]
        force_import: bool,
    },

    /// Import GTFS transit feeds into the gtfs schema
    Gtfs {
        /// Feed configuration (JSON)
        #[arg(long, env = "GTFS_CONFIG", default_value = GTFS_CONFIG_FILE)]
        feeds: PathBuf,
    },

    /// Apply Kubernetes manifests in sorted order
    Deploy {
        /// Directory holding *.yaml manifests
        #[arg(long, default_value = "manifests")]
        manifests: PathBuf,
    },

    /// Validate and inspect the configuration
    Config {
        #[command(subcommand)]
        subcommand: cmd::config::ConfigSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let default_level = match &cli.command {
        Commands::Config { .. } => tracing::Level::WARN,
        _ => tracing::Level::INFO,
    };

    let mut filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(default_level.into());
    if matches!(cli.command, Commands::Gtfs { .. }) {
        // the pipeline's own level knob; RUST_LOG directives still win
        if let Ok(level) = std::env::var("GTFS_LOG_LEVEL") {
            match level.parse::<tracing_subscriber::filter::Directive>() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(_) => eprintln!("warning: unparseable GTFS_LOG_LEVEL '{level}' ignored"),
            }
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let overrides = cli.db.overrides();

    let result = match cli.command {
        Commands::Provision => cmd::provision::run(&cli.config),
        Commands::External {
            force,
            cache,
            no_update,
            delete_cache,
            force_import,
        } => cmd::external::run(
            &cli.config,
            &overrides,
            SyncOptions {
                force,
                cache,
                no_update,
                delete_cache,
                force_import,
            },
        ),
        Commands::Gtfs { feeds } => cmd::gtfs::run(&feeds, &overrides),
        Commands::Deploy { manifests } => cmd::deploy::run(&cli.config, &manifests),
        Commands::Config { subcommand } => cmd::config::run(&cli.config, subcommand),
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
