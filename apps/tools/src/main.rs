use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use shared::{domain::TaskQuery, roster::Roster};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, env = "DATABASE_URL", default_value = "sqlite://./data/taskboard.db")]
    database_url: String,
    /// Server config whose `[[roster]]` (if any) replaces the built-in team.
    #[arg(long, env = "TASKBOARD_CONFIG", default_value = "server.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Store (or replace) the sign-in credential for a roster email.
    SetCredential { email: String, credential: String },
    /// Print the built-in roster.
    Roster,
    ListTasks {
        #[arg(long)]
        assignee: Option<String>,
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },
}

/// Same rule as the server: a missing file means the built-in team.
fn load_roster(config: &Path) -> Result<Roster> {
    let Ok(raw) = fs::read_to_string(config) else {
        return Ok(Roster::default_team());
    };
    let roster = Roster::from_server_toml(&raw)
        .with_context(|| format!("invalid {}", config.display()))?;
    Ok(roster.unwrap_or_default())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let cli = Cli::parse();
    let roster = load_roster(&cli.config)?;

    match cli.command {
        Command::Roster => {
            for user in roster.users() {
                println!("{}\t{}\t{}", user.role, user.name, user.email);
            }
        }
        Command::SetCredential { email, credential } => {
            if roster.find_by_email(&email).is_none() {
                bail!("{email} is not on the roster");
            }
            let storage = Storage::new(&cli.database_url).await?;
            storage.set_credential(&email, &credential).await?;
            println!("credential stored for {}", email.trim());
        }
        Command::ListTasks { assignee, from, to } => {
            let query = match (from, to, assignee) {
                (Some(start), Some(end), _) => TaskQuery::DateRange { start, end },
                (_, _, Some(name)) => TaskQuery::Assignee { name },
                _ => TaskQuery::All,
            };
            let storage = Storage::new(&cli.database_url).await?;
            for task in storage.list_tasks(&query).await? {
                println!(
                    "{}\t{}\t{}\t{}\t{}",
                    task.id,
                    task.date_string(),
                    task.status.label(),
                    task.assignee,
                    task.title
                );
            }
        }
    }

    Ok(())
}
