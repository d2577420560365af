use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use lib::api::{ApiClient, ApiError};
use lib::credentials::CredentialStore;
use lib::guard::{edge_gate, EdgeDecision, GuardDecision, RouteGuard};
use lib::session::{SessionManager, SessionState, User};
use lib::tasks::{Priority, StatusFilter, Task, TaskDraft, TaskPatch, TaskStore, ViewMode};

#[derive(Parser)]
#[command(name = "taskmate")]
#[command(about = "Taskmate CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Log in to the task service and persist the session token.
    Login {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,

        /// Account password (prompted when omitted)
        #[arg(long)]
        password: Option<String>,
    },

    /// Create an account and log in.
    Signup {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,

        /// Account password (prompted when omitted, together with a confirmation)
        #[arg(long)]
        password: Option<String>,
    },

    /// Log out and purge the stored session token.
    Logout {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Show the identity behind the stored session, if any.
    Whoami {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Work with the task list (requires a session).
    Tasks {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,

        #[command(subcommand)]
        command: TasksCommand,
    },

    /// Chat with the assistant (interactive). The assistant can change
    /// tasks, so the local collection is refreshed after every turn.
    Chat {
        /// Config file path (default: TASKMATE_CONFIG_PATH or ~/.taskmate/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List tasks, optionally filtered.
    List {
        /// Substring to match against title and description
        #[arg(long, short)]
        search: Option<String>,

        /// all | active | completed (default all)
        #[arg(long)]
        status: Option<String>,

        /// list | grid (default list)
        #[arg(long)]
        view: Option<String>,
    },

    /// Create a task.
    Add {
        title: String,

        #[arg(long, short)]
        description: Option<String>,

        /// low | medium | high | urgent (default medium)
        #[arg(long, short)]
        priority: Option<String>,
    },

    /// Change a task's title, description, or completion.
    Edit {
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(long)]
        description: Option<String>,

        #[arg(long)]
        completed: Option<bool>,
    },

    /// Toggle a task's completion.
    Done { id: String },

    /// Delete a task.
    Rm { id: String },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Version) => {
            println!("taskmate {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Some(Commands::Login {
            config,
            email,
            password,
        }) => run_login(config, email, password).await,
        Some(Commands::Signup {
            config,
            email,
            password,
        }) => run_signup(config, email, password).await,
        Some(Commands::Logout { config }) => run_logout(config).await,
        Some(Commands::Whoami { config }) => run_whoami(config).await,
        Some(Commands::Tasks { config, command }) => run_tasks(config, command).await,
        Some(Commands::Chat { config }) => run_chat(config).await,
        None => {
            println!("Run with --help for usage");
            Ok(())
        }
    };

    if let Err(e) = result {
        log::error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Everything a command needs, wired once per invocation.
struct App {
    api: Arc<ApiClient>,
    creds: CredentialStore,
    session: Arc<SessionManager>,
    tasks: Arc<TaskStore>,
}

fn build_app(config_path: Option<PathBuf>) -> anyhow::Result<App> {
    let (config, path) = lib::config::load_config(config_path)?;
    let creds = CredentialStore::new(lib::config::profile_dir(&path));
    let api = Arc::new(ApiClient::new(lib::config::resolve_api_url(&config)));
    let session = Arc::new(SessionManager::new(api.clone(), creds.clone()));
    let tasks = Arc::new(TaskStore::new(api.clone()));
    Ok(App {
        api,
        creds,
        session,
        tasks,
    })
}

fn prompt(label: &str) -> anyhow::Result<String> {
    use std::io::{self, Write};
    let mut stdout = io::stdout();
    write!(stdout, "{}: ", label)?;
    stdout.flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line).context("reading input")?;
    Ok(line.trim().to_string())
}

/// Settle the session and run both gates for a protected view. Bails with a
/// login hint when either gate says no.
async fn require_session(app: &App, path: &str) -> anyhow::Result<User> {
    // Edge gate first: a cheap mirror check before any network call.
    if edge_gate(path, app.creds.read_token_mirror().as_deref()) == EdgeDecision::RedirectToRoot {
        anyhow::bail!("not logged in; run `taskmate login` first");
    }

    let mut guard = RouteGuard::new();
    if guard.observe(&app.session.state()) == GuardDecision::Wait {
        app.session.restore().await;
    }
    match guard.observe(&app.session.state()) {
        GuardDecision::Render => app
            .session
            .current_user()
            .ok_or_else(|| anyhow::anyhow!("session state changed under the guard")),
        _ => anyhow::bail!("session expired; run `taskmate login` first"),
    }
}

/// Turn an API error into the command failure. A dead token additionally
/// tears the session down and discards the cached collection.
async fn surface_api_error(app: &App, err: ApiError) -> anyhow::Error {
    if matches!(err, ApiError::Unauthorized) {
        app.session.handle_unauthorized();
        app.tasks.clear().await;
    }
    anyhow::Error::new(err)
}

async fn run_login(
    config_path: Option<PathBuf>,
    email: Option<String>,
    password: Option<String>,
) -> anyhow::Result<()> {
    let app = build_app(config_path)?;
    let email = match email {
        Some(e) => e,
        None => prompt("email")?,
    };
    let password = match password {
        Some(p) => p,
        None => prompt("password")?,
    };
    let user = app.session.login(&email, &password).await?;
    println!("logged in as {}", user.email);
    Ok(())
}

async fn run_signup(
    config_path: Option<PathBuf>,
    email: Option<String>,
    password: Option<String>,
) -> anyhow::Result<()> {
    let app = build_app(config_path)?;
    let email = match email {
        Some(e) => e,
        None => prompt("email")?,
    };
    let (password, confirm) = match password {
        Some(p) => {
            let confirm = prompt("confirm password")?;
            (p, confirm)
        }
        None => (prompt("password")?, prompt("confirm password")?),
    };
    let user = app.session.signup(&email, &password, &confirm).await?;
    println!("registered as {}", user.email);
    Ok(())
}

async fn run_logout(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = build_app(config_path)?;
    app.session.logout();
    app.tasks.clear().await;
    println!("logged out");
    Ok(())
}

async fn run_whoami(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let app = build_app(config_path)?;
    // The profile area sits behind the edge gate like the task views, but a
    // missing session is an answer here, not a failure.
    if edge_gate("/profile", app.creds.read_token_mirror().as_deref())
        == EdgeDecision::RedirectToRoot
    {
        println!("not logged in");
        return Ok(());
    }
    match app.session.restore().await {
        SessionState::Authenticated(user) => {
            println!("{} ({})", user.email, user.id);
            println!("member since {}", user.created_at.format("%Y-%m-%d"));
        }
        _ => println!("not logged in"),
    }
    Ok(())
}

async fn run_tasks(config_path: Option<PathBuf>, command: TasksCommand) -> anyhow::Result<()> {
    let app = build_app(config_path)?;
    require_session(&app, "/tasks").await?;

    match command {
        TasksCommand::List {
            search,
            status,
            view,
        } => {
            let status = parse_status(status.as_deref().unwrap_or("all"))?;
            let view = parse_view(view.as_deref().unwrap_or("list"))?;
            if let Err(e) = app.tasks.refresh().await {
                return Err(surface_api_error(&app, e).await);
            }
            let tasks = app
                .tasks
                .filtered(search.as_deref().unwrap_or(""), status)
                .await;
            println!("{} {}", tasks.len(), if tasks.len() == 1 { "task" } else { "tasks" });
            if !tasks.is_empty() {
                println!("{}", render_tasks(&tasks, view));
            }
        }
        TasksCommand::Add {
            title,
            description,
            priority,
        } => {
            let priority = match priority.as_deref() {
                Some(p) => parse_priority(p)?,
                None => Priority::default(),
            };
            let draft = TaskDraft {
                title,
                description,
                completed: false,
                priority,
            };
            match app.tasks.create(&draft).await {
                Ok(task) => println!("created {}  {}", task.id, task.title),
                Err(e) => return Err(surface_api_error(&app, e).await),
            }
        }
        TasksCommand::Edit {
            id,
            title,
            description,
            completed,
        } => {
            let patch = TaskPatch {
                title,
                description,
                completed,
            };
            match app.tasks.update(&id, &patch).await {
                Ok(task) => println!("updated {}  {}", task.id, task.title),
                Err(e) => return Err(surface_api_error(&app, e).await),
            }
        }
        TasksCommand::Done { id } => match app.tasks.toggle(&id).await {
            Ok(task) => {
                let state = if task.completed { "completed" } else { "reopened" };
                println!("{} {}  {}", state, task.id, task.title);
            }
            Err(e) => return Err(surface_api_error(&app, e).await),
        },
        TasksCommand::Rm { id } => match app.tasks.remove(&id).await {
            Ok(()) => println!("deleted {}", id),
            Err(e) => return Err(surface_api_error(&app, e).await),
        },
    }
    Ok(())
}

async fn run_chat(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use std::io::{self, Write};

    let app = build_app(config_path)?;
    require_session(&app, "/tasks").await?;

    let mut bridge = lib::chat::ChatBridge::new(app.api.clone(), app.creds.clone(), app.tasks.clone());
    if let Err(e) = bridge.load_history().await {
        log::warn!("loading chat history failed: {}", e);
    }
    for msg in bridge.transcript() {
        let mark = if msg.role == "user" { ">" } else { "<" };
        println!("{} {}", mark, msg.content.trim());
    }

    if let Err(e) = app.tasks.refresh().await {
        return Err(surface_api_error(&app, e).await);
    }

    // The assistant's turns can change the server-side collection; refetch
    // whenever the bridge signals.
    let mut rx = app.tasks.subscribe();
    let tasks = app.tasks.clone();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            match tasks.refresh().await {
                Ok(list) => log::info!("tasks refreshed after assistant turn ({} total)", list.len()),
                Err(e) => log::warn!("task refresh failed: {}", e),
            }
        }
    });

    let stdin = io::stdin();
    let mut stdout = io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }

        match bridge.send(input).await {
            Ok(reply) => println!("< {}", reply.trim()),
            Err(ApiError::Unauthorized) => {
                return Err(surface_api_error(&app, ApiError::Unauthorized).await);
            }
            Err(e) => eprintln!("chat error: {}", e),
        }
    }

    Ok(())
}

fn parse_status(s: &str) -> anyhow::Result<StatusFilter> {
    match s.trim().to_lowercase().as_str() {
        "all" => Ok(StatusFilter::All),
        "active" => Ok(StatusFilter::Active),
        "completed" => Ok(StatusFilter::Completed),
        other => anyhow::bail!("unknown status filter: {} (expected all|active|completed)", other),
    }
}

fn parse_view(s: &str) -> anyhow::Result<ViewMode> {
    match s.trim().to_lowercase().as_str() {
        "list" => Ok(ViewMode::List),
        "grid" => Ok(ViewMode::Grid),
        other => anyhow::bail!("unknown view mode: {} (expected list|grid)", other),
    }
}

fn parse_priority(s: &str) -> anyhow::Result<Priority> {
    match s.trim().to_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        "urgent" => Ok(Priority::Urgent),
        other => anyhow::bail!("unknown priority: {} (expected low|medium|high|urgent)", other),
    }
}

/// Pure projection of a task list into terminal lines for the given mode.
fn render_tasks(tasks: &[Task], mode: ViewMode) -> String {
    let cells: Vec<String> = tasks.iter().map(render_cell).collect();
    match mode {
        ViewMode::List => cells.join("\n"),
        ViewMode::Grid => cells
            .chunks(2)
            .map(|row| row.join("    "))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

fn render_cell(task: &Task) -> String {
    let mark = if task.completed { "x" } else { " " };
    let priority = format!("{:?}", task.priority).to_lowercase();
    format!("[{}] {}  ({})  {}", mark, task.title, priority, task.id)
}
