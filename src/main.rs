mod cache;
mod commands;
mod config;
mod digest;
mod error;
mod gerrit;
mod logging;
mod scheduler;
mod sync;
mod timestamp;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gerrit-digest")]
#[command(about = "Cache recently merged Gerrit changes and mail filtered digests")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./gerrit-digest.yaml, ./config.yaml or $XDG_CONFIG_HOME/gerrit-digest/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Append logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Fetch recently merged changes and update the cache
  UpdateCache,

  /// Mail today's digest to recipients
  SendEmail {
    /// Every recipient in the users directory
    #[arg(short, long)]
    all_users: bool,

    /// A recipient by name (users/<name>.yaml); repeatable
    #[arg(short, long = "user")]
    users: Vec<String>,

    /// Render and log digests without sending them
    #[arg(short, long)]
    debug: bool,

    /// Decrypt the SMTP secret from <REC>.gpg
    #[arg(short, long)]
    rec: Option<String>,
  },

  /// Update the cache and mail all recipients once a day
  Schedule {
    /// Decrypt the SMTP secret from <REC>.gpg
    #[arg(short, long)]
    rec: Option<String>,

    /// Local time of day to run at
    #[arg(long, default_value = "04:56")]
    at: String,
  },
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.log_file.as_deref())?;

  let config = config::Config::load(args.config.as_deref())?;

  match args.command {
    Command::UpdateCache => {
      commands::update_cache(&config).await?;
    }
    Command::SendEmail {
      all_users,
      users,
      debug,
      rec,
    } => {
      let options = commands::SendOptions {
        all_users,
        users,
        dry_run: debug,
        gpg_recipient: rec,
      };
      commands::send_email(&config, &options).await?;
    }
    Command::Schedule { rec, at } => {
      let at = commands::parse_time_of_day(&at)?;
      commands::schedule(&config, at, rec).await?;
    }
  }

  Ok(())
}
