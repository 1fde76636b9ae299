use clap::{Parser, Subcommand};
use sqlite_provision::{DatabaseHelper, DatabaseValidator, ProvisionConfig};
use tracing::Level;

mod commands;

use commands::inspect::NameArgs;
use commands::open::OpenArgs;

#[derive(Parser)]
#[clap(author, version, about, long_about = None)]
#[clap(propagate_version = true)]
struct Cli {
    /// configuration file path, by default $HOME/.sqlite-provision/provision.toml is used
    #[clap(short, long)]
    config: Option<String>,

    /// Print debug information
    #[clap(long)]
    debug: bool,

    /// Output as JSON
    #[clap(long, global = true)]
    json: bool,

    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the file path a logical database name resolves to
    Path(NameArgs),

    /// Open a database, creating, seeding and migrating it as needed
    Open(OpenArgs),

    /// Check that a database exists and passes an integrity check
    Check(NameArgs),

    /// Print the stored schema version of a database without migrating it
    Version(NameArgs),

    /// Delete the database file of a logical name
    Remove(NameArgs),

    /// Show configuration
    Config,
}

fn main() {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.debug {
        tracing_subscriber::fmt()
            // filter spans/events with level DEBUG or higher.
            .with_max_level(Level::DEBUG)
            .init();
    }

    let config = match ProvisionConfig::new(&cli.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    if let Commands::Config = cli.command {
        commands::config::run(&config, cli.json);
        return;
    }

    // An unusable storage location is a configuration error, not retried
    let helper = match DatabaseHelper::from_config(&config) {
        Ok(h) => h,
        Err(e) => {
            eprintln!("ERROR: {}", e);
            std::process::exit(1);
        }
    };

    let result = match cli.command {
        Commands::Path(args) => {
            commands::inspect::path(&helper, args, cli.json);
            Ok(())
        }
        Commands::Open(args) => commands::open::run(&helper, args, cli.json),
        Commands::Check(args) => {
            let validator = DatabaseValidator::from(&helper);
            commands::inspect::check(&validator, args, cli.json)
        }
        Commands::Version(args) => commands::inspect::version(&helper, args, cli.json),
        Commands::Remove(args) => commands::inspect::remove(&helper, args),
        Commands::Config => Ok(()),
    };

    if let Err(e) = result {
        eprintln!("ERROR: {}", e);
        std::process::exit(1);
    }
}
