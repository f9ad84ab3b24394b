use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    ActionOutcome, AlwaysConfirm, AuthProvider, BoardEvent, ConfirmPrompt, ConfirmationGate,
    HttpBackend, LocalBackend, TaskBoard, TaskFeed, TaskStore, XlsxExporter,
};
use shared::{
    domain::{Task, TaskId, TaskStatus, ViewMode},
    roster::Roster,
};
use storage::Storage;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod render;

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;

#[derive(Parser, Debug)]
#[command(name = "taskboard", about = "Team task board")]
struct Cli {
    /// Task service base url, e.g. http://127.0.0.1:8443
    #[arg(long, env = "TASKBOARD_SERVER_URL", conflicts_with = "database_url")]
    server_url: Option<String>,
    /// Work directly on a local SQLite database instead of a server.
    #[arg(long, env = "TASKBOARD_DATABASE_URL")]
    database_url: Option<String>,
    #[arg(long, env = "TASKBOARD_EMAIL")]
    email: String,
    #[arg(long, env = "TASKBOARD_CREDENTIAL", hide_env_values = true)]
    credential: String,
    /// `server.toml` whose `[[roster]]` replaces the built-in team. A server
    /// sends its own roster at login, so this matters for --database-url.
    #[arg(long, env = "TASKBOARD_ROSTER_FILE")]
    roster_file: Option<PathBuf>,
    /// Skip confirmation prompts for complete and delete.
    #[arg(long, short = 'y')]
    yes: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Tasks dated today.
    Today,
    /// Every task.
    All,
    Create {
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// yyyy-MM-dd
        #[arg(long)]
        date: String,
        #[arg(long)]
        assignee: String,
    },
    Edit {
        id: String,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
    },
    Report {
        id: String,
        /// complete / incomplete (完成 / 未完成 also accepted)
        #[arg(long)]
        status: TaskStatus,
        #[arg(long, default_value = "")]
        note: String,
    },
    Complete {
        id: String,
    },
    Delete {
        id: String,
    },
    History {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        /// Keep printing the range as it changes until interrupted.
        #[arg(long)]
        follow: bool,
    },
    Export {
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = ".")]
        dir: PathBuf,
        #[arg(long)]
        file: Option<String>,
    },
    /// Print the board on every change until interrupted.
    Watch {
        #[arg(long)]
        all: bool,
    },
}

/// Asks on the terminal before destructive actions.
struct StdinConfirmation;

#[async_trait]
impl ConfirmationGate for StdinConfirmation {
    async fn confirm(&self, prompt: ConfirmPrompt, task: &Task) -> bool {
        let question = format!("{} ({}) [y/N] ", prompt.message(), task.title);
        let mut stdout = tokio::io::stdout();
        if stdout.write_all(question.as_bytes()).await.is_err() || stdout.flush().await.is_err() {
            return false;
        }
        let mut answer = String::new();
        if BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .is_err()
        {
            return false;
        }
        matches!(answer.trim(), "y" | "Y" | "yes")
    }
}

async fn backends(cli: &Cli) -> Result<(Arc<dyn AuthProvider>, Arc<dyn TaskStore>)> {
    if let Some(server_url) = &cli.server_url {
        let backend = Arc::new(HttpBackend::new(server_url)?);
        let auth: Arc<dyn AuthProvider> = backend.clone();
        let store: Arc<dyn TaskStore> = backend;
        return Ok((auth, store));
    }
    if let Some(database_url) = &cli.database_url {
        let backend = Arc::new(LocalBackend::new(Storage::new(database_url).await?));
        let auth: Arc<dyn AuthProvider> = backend.clone();
        let store: Arc<dyn TaskStore> = backend;
        return Ok((auth, store));
    }
    bail!("either --server-url or --database-url is required")
}

fn load_roster(path: Option<&Path>) -> Result<Roster> {
    let Some(path) = path else {
        return Ok(Roster::default_team());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read roster file '{}'", path.display()))?;
    let roster = Roster::from_server_toml(&raw)
        .with_context(|| format!("invalid roster file '{}'", path.display()))?;
    Ok(roster.unwrap_or_default())
}

fn export_target(dir: &Path, file: Option<&str>) -> XlsxExporter {
    let exporter = XlsxExporter::new(dir);
    match file {
        Some(file) => exporter.with_file_name(file),
        None => exporter,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    let roster = load_roster(cli.roster_file.as_deref())?;
    let (auth, store) = backends(&cli).await?;
    let exporter = match &cli.command {
        Command::Export { dir, file, .. } => export_target(dir, file.as_deref()),
        _ => XlsxExporter::new("."),
    };
    let confirmation: Arc<dyn ConfirmationGate> = if cli.yes {
        Arc::new(AlwaysConfirm)
    } else {
        Arc::new(StdinConfirmation)
    };
    let board = TaskBoard::new(
        roster,
        auth,
        store,
        Arc::new(exporter),
        confirmation,
    );

    let user = board.login(&cli.email, &cli.credential).await?;
    info!(name = %user.name, role = %user.role, "signed in");

    let result = run(&board, cli.command).await;
    board.logout().await;
    result
}

async fn run(board: &Arc<TaskBoard>, command: Command) -> Result<()> {
    match command {
        Command::Today => {
            println!("{}", render::view_text(&board.list_view(ViewMode::Today).await?));
        }
        Command::All => println!("{}", render::view_text(&board.list_view(ViewMode::All).await?)),
        Command::Create {
            title,
            description,
            date,
            assignee,
        } => {
            let task = board
                .create_task(&title, &description, &date, &assignee)
                .await?;
            println!("created #{}", task.id);
        }
        Command::Edit {
            id,
            title,
            description,
        } => {
            let task = board.edit_task(&TaskId(id), &title, &description).await?;
            println!("updated #{}", task.id);
        }
        Command::Report { id, status, note } => {
            let task = board.report_task(&TaskId(id), status, &note).await?;
            println!("reported #{} as {}", task.id, task.status.label());
        }
        Command::Complete { id } => match board.complete_task(&TaskId(id)).await? {
            ActionOutcome::Applied(task) => println!("completed #{}", task.id),
            ActionOutcome::Declined => println!("cancelled"),
        },
        Command::Delete { id } => match board.delete_task(&TaskId(id.clone())).await? {
            ActionOutcome::Applied(()) => println!("deleted #{id}"),
            ActionOutcome::Declined => println!("cancelled"),
        },
        Command::History { from, to, follow } => {
            if follow {
                follow_history(board.history_feed(&from, &to).await?).await?;
            } else {
                println!("{}", render::history_text(&board.history(&from, &to).await?));
            }
        }
        Command::Export { from, to, .. } => {
            let export = board.export_range(&from, &to).await?;
            println!(
                "exported {} tasks to {}",
                export.receipt.rows,
                export.receipt.path.display()
            );
        }
        Command::Watch { all } => {
            let mode = if all { ViewMode::All } else { ViewMode::Today };
            board.set_view_mode(mode).await;
            watch(board).await?;
        }
    }
    Ok(())
}

async fn watch(board: &Arc<TaskBoard>) -> Result<()> {
    let follower = board.follow_auth_changes();
    let result = print_board_changes(board).await;
    follower.abort();
    result
}

async fn print_board_changes(board: &Arc<TaskBoard>) -> Result<()> {
    let mut events = board.subscribe_events();
    println!("{}", render::view_text(&board.current_view().await?));
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            event = events.recv() => match event {
                Ok(BoardEvent::TasksReplaced { .. }) => {
                    println!("\n{}", render::view_text(&board.current_view().await?));
                }
                Ok(BoardEvent::FeedClosed) => bail!("task feed closed"),
                Ok(BoardEvent::SessionChanged(None)) => bail!("signed out"),
                Ok(BoardEvent::Error(message)) => eprintln!("error: {message}"),
                Ok(BoardEvent::SessionChanged(Some(_))) => {}
                // Missed some replacements; reload instead of trusting the mirror.
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {
                    board.refresh().await?;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => return Ok(()),
            },
        }
    }
}

async fn follow_history(mut feed: TaskFeed) -> Result<()> {
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => return Ok(()),
            snapshot = feed.next_snapshot() => match snapshot {
                Some(tasks) => println!("{}\n", render::history_text(&tasks)),
                None => bail!("history feed closed"),
            },
        }
    }
}
