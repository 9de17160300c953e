use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use clap::{ArgGroup, Parser, Subcommand};
use issue_migrate::commands::migrate::MigrateArgs;
use issue_migrate::commands::reporter::NewReporter;
use issue_migrate::commands::transition::TransitionArgs;
use issue_migrate::commands::{self, collect_keys};
use issue_migrate::config::{Config, Overrides};
use issue_migrate::output::Format;
use issue_migrate::tracker;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "issue-migrate",
    version,
    about = "Migrate issue-tracker records between projects with field remapping"
)]
struct Cli {
    /// Config file
    #[arg(long, short, global = true, default_value = "migrate.yaml")]
    config: PathBuf,
    /// Tracker URL, overrides the config file
    #[arg(long, global = true)]
    server: Option<String>,
    /// Tracker user, overrides the config file
    #[arg(long, global = true)]
    user: Option<String>,
    /// Tracker API key, overrides the config file
    #[arg(long, global = true)]
    api_key: Option<String>,
    /// Output format
    #[arg(long, global = true, value_enum, default_value = "pretty")]
    format: Format,
    /// Enable debug logging
    #[arg(long, short, global = true)]
    debug: bool,
    /// Only log errors
    #[arg(long, short, global = true, conflicts_with = "debug")]
    silent: bool,
    /// Write log lines to this file instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create an empty file-backed tracker store
    InitStore {
        /// Store directory
        path: PathBuf,
        /// JSON document with fields, create_meta, users, transitions and records
        #[arg(long)]
        seed: Option<PathBuf>,
    },
    /// Migrate source records into the destination project
    Migrate {
        /// Source record keys
        keys: Vec<String>,
        /// File with one key per line
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Do not copy source comments
        #[arg(long)]
        no_comments: bool,
        /// Extra destination field to fill after create (repeatable)
        #[arg(long = "field")]
        fields: Vec<String>,
        /// Print the create payload instead of writing
        #[arg(long)]
        dry_run: bool,
    },
    /// Display a record
    Show {
        key: String,
        /// Show every field, not just those in the record's schema
        #[arg(long)]
        all: bool,
    },
    /// Key, status and selected fields of a record
    Summary {
        key: String,
        /// Field to include (repeatable); defaults to the configured list
        #[arg(long = "field")]
        fields: Vec<String>,
    },
    /// Current status of records
    Status {
        keys: Vec<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// Move records through a workflow transition
    Transition {
        keys: Vec<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
        /// Transition name
        #[arg(long, default_value = "Close")]
        to: String,
        /// Resolution to set with the transition
        #[arg(long)]
        resolution: Option<String>,
        /// Comment to add with the transition
        #[arg(long)]
        comment: Option<String>,
        /// Target release to set with the transition
        #[arg(long)]
        target: Option<String>,
    },
    /// Add a comment to a record
    Comment { key: String, text: String },
    /// Set one field on a record
    UpdateField {
        key: String,
        /// Field name or id
        field: String,
        /// Plain text, or JSON for option and array fields
        value: String,
    },
    /// Attach a web link to a record
    Weblink { key: String, url: String, title: String },
    /// Change the reporter of a record, or of many from a CSV file
    #[command(group(ArgGroup::new("who").args(["email", "account_id"])))]
    UpdateReporter {
        #[arg(required_unless_present = "csv")]
        key: Option<String>,
        #[arg(long)]
        email: Option<String>,
        #[arg(long)]
        account_id: Option<String>,
        /// CSV file with `key,email` columns
        #[arg(long, conflicts_with_all = ["key", "email", "account_id"])]
        csv: Option<PathBuf>,
    },
    /// Copy reporters from source records onto migrated records
    CopyReporters {
        /// Destination record keys
        keys: Vec<String>,
        #[arg(long, short)]
        file: Option<PathBuf>,
    },
    /// List destination fields
    Schema {
        /// Only required fields
        #[arg(long)]
        required: bool,
    },
    /// Run a raw tracker query
    Search { jql: String },
}

fn init_tracing(debug: bool, silent: bool, log_file: Option<&Path>) -> issue_migrate::error::Result<()> {
    let filter = if debug {
        EnvFilter::new("debug")
    } else if silent {
        EnvFilter::new("error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    let _ = match log_file {
        Some(path) => builder
            .with_ansi(false)
            .with_writer(Mutex::new(File::create(path)?))
            .try_init(),
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    Ok(())
}

fn run(cli: Cli, format: Format) -> issue_migrate::error::Result<()> {
    // Commands that need no config or tracker
    if let Commands::InitStore { path, seed } = &cli.command {
        return commands::store::init(path, seed.as_deref());
    }

    let overrides = Overrides {
        server: cli.server,
        user: cli.user,
        api_key: cli.api_key,
    };
    let config = Config::load(&cli.config, &overrides)?;
    let tracker = tracker::connect(&config.tracker)?;
    let tracker = tracker.as_ref();

    match cli.command {
        Commands::InitStore { .. } => unreachable!(),
        Commands::Migrate {
            keys,
            file,
            no_comments,
            fields,
            dry_run,
        } => {
            let keys = collect_keys(keys, file.as_deref())?;
            let args = MigrateArgs {
                no_comments,
                fields,
                dry_run,
            };
            commands::migrate::run(tracker, &config.migration, &keys, &args, format)
        }
        Commands::Show { key, all } => commands::records::show(tracker, &config, &key, all, format),
        Commands::Summary { key, fields } => {
            commands::records::summary(tracker, &config, &key, &fields, format)
        }
        Commands::Status { keys, file } => {
            let keys = collect_keys(keys, file.as_deref())?;
            commands::records::status(tracker, &config, &keys, format)
        }
        Commands::Transition {
            keys,
            file,
            to,
            resolution,
            comment,
            target,
        } => {
            let keys = collect_keys(keys, file.as_deref())?;
            let args = TransitionArgs {
                to,
                resolution,
                comment,
                target,
            };
            commands::transition::run(tracker, &config, &keys, &args, format)
        }
        Commands::Comment { key, text } => {
            commands::records::comment(tracker, &config, &key, &text, format)
        }
        Commands::UpdateField { key, field, value } => {
            commands::records::update_field(tracker, &config, &key, &field, &value, format)
        }
        Commands::Weblink { key, url, title } => {
            commands::records::weblink(tracker, &config, &key, &url, &title, format)
        }
        Commands::UpdateReporter {
            key,
            email,
            account_id,
            csv,
        } => match (csv, key) {
            (Some(path), _) => commands::reporter::update_from_csv(tracker, &config, &path, format),
            (None, Some(key)) => {
                let who = match (email, account_id) {
                    (Some(email), _) => NewReporter::Email(email),
                    (None, Some(id)) => NewReporter::AccountId(id),
                    (None, None) => {
                        return Err(issue_migrate::error::MigrateError::InvalidInput(
                            "pass --email or --account-id".into(),
                        ));
                    }
                };
                commands::reporter::update(tracker, &config, &key, &who, format)
            }
            (None, None) => Err(issue_migrate::error::MigrateError::InvalidInput(
                "pass KEY with --email/--account-id, or --csv".into(),
            )),
        },
        Commands::CopyReporters { keys, file } => {
            let keys = collect_keys(keys, file.as_deref())?;
            commands::reporter::copy_from_source(tracker, &config, &keys, format)
        }
        Commands::Schema { required } => commands::schema::run(tracker, &config, required, format),
        Commands::Search { jql } => commands::records::search(tracker, &config, &jql, format),
    }
}

fn main() {
    let cli = Cli::parse();
    let format = cli.format;
    if let Err(e) = init_tracing(cli.debug, cli.silent, cli.log_file.as_deref()) {
        eprintln!("error: cannot open log file: {e}");
        std::process::exit(1);
    }
    if let Err(e) = run(cli, format) {
        match format {
            Format::Json => {
                eprintln!(
                    "{}",
                    serde_json::json!({
                        "error": e.code(),
                        "message": e.to_string()
                    })
                );
            }
            Format::Pretty => {
                eprintln!("error: {e}");
                if e.is_config() {
                    eprintln!("hint: pass --config PATH or --server/--user/--api-key");
                }
            }
        }
        std::process::exit(1);
    }
}
