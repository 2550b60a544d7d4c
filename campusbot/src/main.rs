//! campusbot - chat assistant for university students
//!
//! Answers questions from FAQs and registration events, and fetches grades
//! from the student portal on the user's behalf.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/campusbot/campusbot.db (~/.local/share/campusbot/campusbot.db)
//! - Logs: $XDG_STATE_HOME/campusbot/ (~/.local/state/campusbot/)
//! - Config: $XDG_CONFIG_HOME/campusbot/config.toml (~/.config/campusbot/config.toml)

use std::io::{BufRead, Write};

use anyhow::{bail, Context, Result};
use campusbot_core::chat::{ChatDeps, ChatService};
use campusbot_core::format::{format_event_date, format_relative_time};
use campusbot_core::llm::CompletionBackend;
use campusbot_core::portal::{GradeExtractor, PortalClient};
use campusbot_core::store::{CredentialStore, KnowledgeBase, NewRegistrationEvent, SessionStore};
use campusbot_core::types::{semester_number, DetailLevel, ExtractionParams, PortalCredentials};
use campusbot_core::vault::AesVault;
use campusbot_core::{Config, Database};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

/// Read by `portal connect` before falling back to stdin
const PASSWORD_ENV: &str = "CAMPUSBOT_PORTAL_PASSWORD";

#[derive(Parser)]
#[command(name = "campusbot")]
#[command(about = "Chat assistant for university students")]
#[command(version)]
struct Args {
    /// User the command acts for
    #[arg(long, global = true, default_value = "1")]
    user: i64,

    /// Print replies as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Send one message
    Chat {
        /// Continue this session
        #[arg(long)]
        session: Option<i64>,

        #[arg(required = true, trailing_var_arg = true)]
        message: Vec<String>,
    },
    /// Chat line by line from stdin
    Repl {
        #[arg(long)]
        session: Option<i64>,
    },
    /// Manage the student portal account
    Portal {
        #[command(subcommand)]
        command: PortalCommand,
    },
    /// Fetch grades with explicit filters
    Grades {
        #[arg(long)]
        year: Option<i64>,

        /// 1, 2, 3 or I, II, III
        #[arg(long)]
        semester: Option<String>,

        /// Only show courses whose title or code contains this text
        #[arg(long)]
        course: Option<String>,

        /// Include the course breakdown
        #[arg(long)]
        detailed: bool,
    },
    /// Browse chat history
    Sessions {
        #[command(subcommand)]
        command: SessionsCommand,
    },
    /// Manage FAQ entries
    Faq {
        #[command(subcommand)]
        command: FaqCommand,
    },
    /// Manage registration events
    Events {
        #[command(subcommand)]
        command: EventsCommand,
    },
}

#[derive(Subcommand)]
enum PortalCommand {
    /// Log in and save the account (password from CAMPUSBOT_PORTAL_PASSWORD or stdin)
    Connect { username: String },
    /// Forget the saved account and cookies
    Disconnect,
}

#[derive(Subcommand)]
enum SessionsCommand {
    List,
    Show { id: i64 },
    Delete { id: i64 },
}

#[derive(Subcommand)]
enum FaqCommand {
    Add { question: String, answer: String },
}

#[derive(Subcommand)]
enum EventsCommand {
    Add {
        title: String,

        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        start: String,

        /// RFC 3339 timestamp or YYYY-MM-DD
        #[arg(long)]
        end: String,

        #[arg(long)]
        location: Option<String>,

        #[arg(long)]
        description: Option<String>,
    },
}

/// Services the chat commands share.
struct Runtime {
    config: Config,
    portal: PortalClient,
    extractor: GradeExtractor,
    vault: AesVault,
    completion: Option<CompletionBackend>,
}

impl Runtime {
    fn new(config: Config) -> Result<Self> {
        let secret = config
            .vault
            .resolve_secret()
            .context("a vault secret is needed to store portal passwords")?;
        let completion = match &config.llm {
            Some(llm) => Some(
                CompletionBackend::from_config(llm).context("failed to create completion backend")?,
            ),
            None => None,
        };
        Ok(Self {
            portal: PortalClient::new(&config.portal).context("failed to create portal client")?,
            extractor: GradeExtractor::new(&config.portal).context("invalid portal configuration")?,
            vault: AesVault::new(&secret).context("failed to create credential vault")?,
            completion,
            config,
        })
    }

    fn chat<'a>(&'a self, db: &'a Database) -> Result<ChatService<'a, Database>> {
        let deps = ChatDeps {
            vault: &self.vault,
            portal: &self.portal,
            extractor: &self.extractor,
            completion: self.completion.as_ref(),
        };
        Ok(ChatService::new(db, deps, self.config.chat.clone())?)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = Config::load().context("failed to load configuration")?;
    let _log_guard =
        campusbot_core::logging::init(&config.logging).context("failed to initialize logging")?;

    let db_path = Config::database_path();
    tracing::info!(path = %db_path.display(), "Opening database");
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let result = run(args, config, &db).await;
    if let Err(e) = &result {
        tracing::error!(error = %e, "Command failed");
    }
    result
}

async fn run(args: Args, config: Config, db: &Database) -> Result<()> {
    let user = args.user;
    match args.command {
        Command::Chat { session, message } => {
            let runtime = Runtime::new(config)?;
            let chat = runtime.chat(db)?;
            let reply = chat.handle(user, session, &message.join(" ")).await?;
            if args.json {
                println!("{}", serde_json::to_string_pretty(&reply)?);
            } else {
                println!("{}", reply.reply);
            }
        }
        Command::Repl { session } => {
            let runtime = Runtime::new(config)?;
            let chat = runtime.chat(db)?;
            run_repl(&chat, user, session, args.json).await?;
        }
        Command::Portal { command } => match command {
            PortalCommand::Connect { username } => {
                let password = read_password()?;
                let runtime = Runtime::new(config)?;
                let chat = runtime.chat(db)?;
                let credentials = PortalCredentials::new(username, password);
                if let Err(e) = chat.connect_portal(user, &credentials).await? {
                    bail!(campusbot_core::format::login_failed(&e));
                }
                println!("Connected portal account {}", credentials.username);
            }
            PortalCommand::Disconnect => {
                if db.clear_credentials(user)? {
                    println!("Portal account disconnected");
                } else {
                    println!("No portal account connected");
                }
            }
        },
        Command::Grades {
            year,
            semester,
            course,
            detailed,
        } => {
            let semester = match semester {
                Some(s) => Some(
                    semester_number(&s)
                        .with_context(|| format!("semester must be 1, 2 or 3 (got {s:?})"))?,
                ),
                None => None,
            };
            let params = ExtractionParams {
                year,
                semester,
                detail_level: if detailed {
                    DetailLevel::Detailed
                } else {
                    DetailLevel::Summary
                },
                course_filter: course,
            };
            let runtime = Runtime::new(config)?;
            let chat = runtime.chat(db)?;
            println!("{}", chat.grades(user, &params).await?);
        }
        Command::Sessions { command } => run_sessions(db, user, command, args.json)?,
        Command::Faq {
            command: FaqCommand::Add { question, answer },
        } => {
            let faq = db.insert_faq(&question, &answer)?;
            println!("Added FAQ {}", faq.id);
        }
        Command::Events {
            command:
                EventsCommand::Add {
                    title,
                    start,
                    end,
                    location,
                    description,
                },
        } => {
            let start_at = parse_when(&start).context("invalid --start")?;
            let end_at = parse_when(&end).context("invalid --end")?;
            if end_at < start_at {
                bail!("--end must not be before --start");
            }
            let event = db.insert_registration_event(&NewRegistrationEvent {
                title,
                description,
                start_at,
                end_at,
                location,
            })?;
            println!(
                "Added event {} ({} to {})",
                event.id,
                format_event_date(event.start_at),
                format_event_date(event.end_at)
            );
        }
    }
    Ok(())
}

async fn run_repl(
    chat: &ChatService<'_, Database>,
    user: i64,
    mut session: Option<i64>,
    json: bool,
) -> Result<()> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    let mut line = String::new();
    loop {
        print!("> ");
        stdout.flush()?;
        line.clear();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim();
        if message.is_empty() {
            continue;
        }
        if matches!(message, "exit" | "quit") {
            break;
        }
        let reply = chat.handle(user, session, message).await?;
        session = Some(reply.session_id);
        if json {
            println!("{}", serde_json::to_string(&reply)?);
        } else {
            println!("{}\n", reply.reply);
        }
    }
    Ok(())
}

fn run_sessions(db: &Database, user: i64, command: SessionsCommand, json: bool) -> Result<()> {
    match command {
        SessionsCommand::List => {
            let sessions = db.list_sessions(user)?;
            if json {
                let rows: Vec<_> = sessions
                    .iter()
                    .map(|s| {
                        serde_json::json!({
                            "id": s.id,
                            "title": s.title,
                            "started_at": s.started_at.to_rfc3339(),
                            "last_activity_at": s.last_activity_at.to_rfc3339(),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if sessions.is_empty() {
                println!("No sessions");
            } else {
                for s in &sessions {
                    println!(
                        "{:>5}  {:<8}  {}",
                        s.id,
                        format_relative_time(s.last_activity_at),
                        s.title.as_deref().unwrap_or(campusbot_core::chat::UNTITLED)
                    );
                }
            }
        }
        SessionsCommand::Show { id } => {
            let session = db
                .get_session(id)?
                .filter(|s| s.user_id == user)
                .with_context(|| format!("session {id} not found"))?;
            println!(
                "{}",
                session.title.as_deref().unwrap_or(campusbot_core::chat::UNTITLED)
            );
            for message in db.session_messages(id)? {
                println!("[{}] {}", message.sender.as_str(), message.text);
            }
        }
        SessionsCommand::Delete { id } => {
            if !db.delete_session(user, id)? {
                bail!("session {id} not found");
            }
            println!("Deleted session {id}");
        }
    }
    Ok(())
}

fn read_password() -> Result<String> {
    if let Ok(password) = std::env::var(PASSWORD_ENV) {
        if !password.is_empty() {
            return Ok(password);
        }
    }
    eprint!("Portal password: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .context("failed to read password")?;
    let password = line.trim_end_matches(['\r', '\n']).to_string();
    if password.is_empty() {
        bail!("no password given");
    }
    Ok(password)
}

fn parse_when(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .with_context(|| format!("expected RFC 3339 or YYYY-MM-DD, got {raw:?}"))?;
    date.and_hms_opt(0, 0, 0)
        .map(|naive| naive.and_utc())
        .context("invalid date")
}
