//! `taskify`: command-line client for a Taskify hub.
//!
//! Signs in, syncs tasks and teams, runs one command and exits. `watch`
//! keeps the session open and prints change notices as they arrive.
//! Configuration via CLI flags, environment variables, or config file
//! (`~/.config/taskify/config.toml`).
//!
//! ```bash
//! # Dashboard
//! cargo run --bin taskify -- --user ada summary
//!
//! # Create a task due tomorrow
//! cargo run --bin taskify -- --user ada add "Write report" --due 2024-05-02
//!
//! # Or via environment variables
//! TASKIFY_HUB_URL=ws://127.0.0.1:9100/ws TASKIFY_USER=ada cargo run --bin taskify -- list
//! ```

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_appender::non_blocking::WorkerGuard;

use taskify::config::{CliArgs, ClientConfig, Command};
use taskify::remote::hub::HubClient;
use taskify::session::Session;
use taskify::sync::{Notice, NoticeLevel};
use taskify::tasks::{TaskFilter, views};
use taskify_proto::ids::{TaskId, TeamId, UserId};
use taskify_proto::task::{Task, TaskChanges, TaskDraft, TaskPriority, TaskStatus};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    let identity = match config.identity() {
        Ok(identity) => identity,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    tracing::info!(hub = %config.hub_url, user_id = %identity.id, "taskify starting");

    let client = match HubClient::connect(&config.hub_url, config.hub_options()).await {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let (mut session, mut notices) =
        Session::start(Arc::clone(&client), identity, config.session_options()).await;

    let command = cli.command.clone().unwrap_or(Command::Summary);
    let result = if command == Command::Watch {
        watch(&client, &mut session, &mut notices).await;
        Ok(())
    } else {
        run(&session, command, &config).await
    };

    let report = session.flush_pending().await;
    if report.remaining > 0 {
        eprintln!("{} change(s) could not be sent and were dropped", report.remaining);
    }
    session.close().await;
    client.close().await;
    print_notices(&mut notices);

    tracing::info!("taskify exiting");
    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

/// Initialize logging.
///
/// Logs go to stderr unless `file_path` is given, in which case they are
/// written through a non-blocking file appender. The returned
/// [`WorkerGuard`] must be held until shutdown to flush buffered entries.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let Some((log_dir, file_name)) = file_path.and_then(|p| Some((p.parent()?, p.file_name()?)))
    else {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(env_filter)
            .init();
        return None;
    };

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(
    session: &Session<HubClient>,
    command: Command,
    config: &ClientConfig,
) -> Result<(), BoxError> {
    let tasks = session.tasks();
    let teams = session.teams();
    let me = session
        .identity()
        .map(|i| i.id)
        .ok_or("not signed in")?;
    let now = Utc::now();

    match command {
        Command::Summary => {
            let all = tasks.tasks();
            let s = tasks.summary(&me, now);
            println!(
                "assigned {}  due today {}  overdue {}  completed {}  ({}%)",
                s.assigned, s.due_today, s.overdue, s.completed, s.completion_rate
            );
            println!("\nDue soon:");
            for task in views::due_soon(now, config.due_soon_days, &views::assigned_to(&me, &all)) {
                print_task(&task);
            }
            println!("\nRecent:");
            for task in views::recent(config.recent_limit, &all) {
                print_task(&task);
            }
        }
        Command::List {
            search,
            status,
            priority,
            mine,
        } => {
            let filter = TaskFilter {
                search: search.unwrap_or_default(),
                status: status.as_deref().map(str::parse::<TaskStatus>).transpose()?,
                priority: priority.as_deref().map(str::parse::<TaskPriority>).transpose()?,
            };
            let scope = if mine {
                tasks.tasks_assigned_to(&me)
            } else {
                tasks.tasks()
            };
            for task in filter.apply(&scope) {
                print_task(&task);
            }
        }
        Command::Add {
            title,
            due,
            description,
            priority,
            assign,
            team,
        } => {
            let mut draft = TaskDraft::new(title, parse_due(&due)?);
            if let Some(description) = description {
                draft = draft.with_description(description);
            }
            if let Some(priority) = priority {
                draft = draft.with_priority(priority.parse()?);
            }
            if let Some(user) = assign {
                draft = draft.assigned_to(UserId::new(user));
            }
            if let Some(team) = team {
                draft = draft.in_team(TeamId::new(team));
            }
            print_task(&tasks.create_task(draft).await?);
        }
        Command::Status { id, status } => {
            let status: TaskStatus = status.parse()?;
            print_task(&tasks.set_status(&TaskId::new(id), status).await?);
        }
        Command::Advance { id } => print_task(&tasks.advance(&TaskId::new(id)).await?),
        Command::Reopen { id } => print_task(&tasks.reopen(&TaskId::new(id)).await?),
        Command::Assign { id, user } => {
            let changes = TaskChanges::assignee(user.map(UserId::new));
            print_task(&tasks.update_task(&TaskId::new(id), &changes).await?);
        }
        Command::Delete { id } => {
            tasks.delete_task(&TaskId::new(id.clone())).await?;
            println!("deleted {id}");
        }
        Command::Teams => {
            let current = teams.current_team_id();
            for team in teams.teams() {
                let marker = if current.as_ref() == Some(&team.id) { "*" } else { " " };
                println!("{marker} {}  {}  (join code {})", team.id, team.name, team.join_code);
            }
        }
        Command::TeamCreate { name, description } => {
            let team = teams.create_team(&name, description.as_deref()).await?;
            println!("created {} ({}), join code {}", team.name, team.id, team.join_code);
        }
        Command::Join { code } => {
            let team = teams.join_team_by_code(&code).await?;
            println!("{} ({})", team.name, team.id);
        }
        Command::Leave { team } => {
            teams.leave_team(&TeamId::new(team.clone())).await?;
            println!("left {team}");
        }
        Command::Members { team } => {
            if let Some(team) = team {
                teams.set_current_team(Some(TeamId::new(team))).await?;
            }
            for view in teams.members_view() {
                println!(
                    "{}  {:<7} {}",
                    view.member.id,
                    view.member.role.to_string(),
                    view.display_name()
                );
            }
        }
        Command::Watch => {}
    }
    Ok(())
}

/// Applies feed signals and prints notices until the hub goes away.
async fn watch(
    client: &HubClient,
    session: &mut Session<HubClient>,
    notices: &mut mpsc::Receiver<Notice>,
) {
    println!("watching for changes...");
    let mut liveness = tokio::time::interval(Duration::from_secs(1));
    loop {
        tokio::select! {
            signal = session.recv_signal() => {
                let Some(signal) = signal else {
                    break;
                };
                session.dispatch(&signal).await;
            }
            Some(notice) = notices.recv() => print_notice(&notice),
            _ = liveness.tick() => {
                if !client.is_connected() {
                    println!("hub connection lost");
                    break;
                }
            }
        }
    }
}

fn parse_due(raw: &str) -> Result<DateTime<Utc>, BoxError> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date.and_time(NaiveTime::MIN).and_utc());
    }
    Ok(DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc))
}

fn print_task(task: &Task) {
    let assignee = task.assigned_to.as_ref().map_or("-", UserId::as_str);
    println!(
        "{}  [{:<11}] {:<6} due {}  @{}  {}",
        task.id,
        task.status.to_string(),
        task.priority.to_string(),
        task.due_date.format("%Y-%m-%d"),
        assignee,
        task.title
    );
}

fn print_notices(notices: &mut mpsc::Receiver<Notice>) {
    while let Ok(notice) = notices.try_recv() {
        if notice.level != NoticeLevel::Info {
            print_notice(&notice);
        }
    }
}

fn print_notice(notice: &Notice) {
    let tag = match notice.level {
        NoticeLevel::Info => "info",
        NoticeLevel::Warning => "warn",
        NoticeLevel::Error => "error",
    };
    println!("[{tag}] {}: {}", notice.title, notice.detail);
}
