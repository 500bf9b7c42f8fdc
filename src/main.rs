use cf_tracker::{config, console, database, mailer, models, roster, scheduler, sync};

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::fs;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::LinesStream;
use tokio_stream::StreamExt;
use tracing::{error, info, warn};

use chrono::Local;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use cf_tracker::codeforces::CodeforcesClient;
use config::TrackerConfig;
use database::Database;
use mailer::SmtpMailer;
use models::{NewSubject, SubjectFilter};
use scheduler::Scheduler;
use sync::SyncEngine;

#[derive(Parser)]
#[command(name = "cf_tracker")]
#[command(about = "Keeps students' Codeforces progress in sync and nudges inactive ones", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a config template
    CreateConfig,
    /// Run the scheduled sync daemon
    Run {
        /// Config file path
        #[arg(short, long)]
        config: String,
    },
    /// Sync now, either every student or just one
    Sync {
        #[arg(short, long)]
        config: String,
        /// Student id
        #[arg(long)]
        student: Option<String>,
    },
    /// Register a student and run a first sync
    AddStudent {
        #[arg(short, long)]
        config: String,
        #[arg(long)]
        name: String,
        #[arg(long)]
        email: String,
        /// Codeforces handle
        #[arg(long)]
        handle: String,
        #[arg(long)]
        coach: String,
    },
    /// Register every student listed in a name,email,handle CSV
    ImportStudents {
        #[arg(short, long)]
        config: String,
        #[arg(long, value_name = "FILE")]
        csv: String,
        #[arg(long)]
        coach: String,
    },
    /// List registered students
    ListStudents {
        #[arg(short, long)]
        config: String,
        #[arg(long)]
        coach: Option<String>,
    },
    /// Edit a student's name, email or handle
    UpdateStudent {
        #[arg(short, long)]
        config: String,
        #[arg(long)]
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        email: Option<String>,
        /// Codeforces handle
        #[arg(long)]
        handle: Option<String>,
    },
    /// Show one student's synced progress
    ShowStudent {
        #[arg(short, long)]
        config: String,
        #[arg(long, conflicts_with = "token", required_unless_present = "token")]
        id: Option<String>,
        /// Profile link token
        #[arg(long)]
        token: Option<String>,
    },
    /// Delete a student and their synced history
    RemoveStudent {
        #[arg(short, long)]
        config: String,
        #[arg(long)]
        id: String,
    },
    /// Turn inactivity reminders on or off for a student
    SetReminders {
        #[arg(short, long)]
        config: String,
        #[arg(long)]
        id: String,
        #[arg(long, action = ArgAction::Set)]
        enabled: bool,
    },
}

fn init_tracing(log_dir: &str) -> Result<()> {
    let log_dir = std::path::PathBuf::from(log_dir);
    fs::create_dir_all(&log_dir)?;

    let log_file = log_dir.join(format!("cf_tracker_{}.log", Local::now().format("%Y%m%d")));

    let file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)
        .with_context(|| format!("Failed to open log file: {}", log_file.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let console_layer = fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .compact();

    let file_layer = fmt::layer()
        .with_writer(Arc::new(file))
        .with_target(true)
        .with_ansi(false)
        .with_line_number(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}

struct App {
    config: TrackerConfig,
    db: Arc<Database>,
    mailer: Arc<SmtpMailer>,
    engine: Arc<SyncEngine>,
}

impl App {
    fn load(config_path: &str) -> Result<Self> {
        let config = TrackerConfig::load(config_path)?;
        init_tracing(&config.logs.path)?;
        info!("Configuration loaded from {}", config_path);

        let db = Arc::new(Database::new(&config.database.path)?);
        db.init()?;
        info!("Database initialized at: {}", config.database.path);

        let source = Arc::new(CodeforcesClient::new(&config.codeforces)?);
        let mailer = Arc::new(SmtpMailer::new(config.mail.clone()));
        let engine = Arc::new(SyncEngine::new(source, mailer.clone(), db.clone()));

        Ok(Self {
            config,
            db,
            mailer,
            engine,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::CreateConfig) => {
            config::create_config_template()?;
            println!("Config template created successfully at config.json");
            Ok(())
        }
        Some(Commands::Run { config }) => run_daemon(App::load(&config)?).await,
        Some(Commands::Sync { config, student }) => {
            let app = App::load(&config)?;
            let report = app
                .engine
                .reconcile(&SubjectFilter::from_option(student))
                .await?;
            info!(
                "Sync finished: {} synced, {} failed, {} reminders sent",
                report.synced.len(),
                report.failed.len(),
                report.reminders_sent
            );
            for failure in &report.failed {
                warn!("{} ({}): {}", failure.handle, failure.subject_id, failure.error);
            }
            Ok(())
        }
        Some(Commands::AddStudent {
            config,
            name,
            email,
            handle,
            coach,
        }) => {
            let app = App::load(&config)?;
            let new = NewSubject {
                name,
                email,
                handle,
                coach_id: coach,
            };
            let registration = roster::register(
                &app.db,
                &app.engine,
                app.mailer.as_ref(),
                &app.config.profile,
                new,
            )
            .await?;
            for warning in &registration.warnings {
                warn!("{}", warning);
            }
            println!(
                "{}\t{}\trating {}",
                registration.subject.id,
                registration.subject.handle,
                registration.subject.current_rating
            );
            Ok(())
        }
        Some(Commands::ImportStudents { config, csv, coach }) => {
            let app = App::load(&config)?;
            import_students(&app, &csv, &coach).await
        }
        Some(Commands::ListStudents { config, coach }) => {
            let app = App::load(&config)?;
            for s in app.db.list_by_coach(coach.as_deref())? {
                let last_synced = s
                    .last_synced
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}\t{}\t{}\t{}/{}\tsynced {}\treminders {} ({} sent)",
                    s.id,
                    s.name,
                    s.handle,
                    s.current_rating,
                    s.max_rating,
                    last_synced,
                    if s.reminders_enabled { "on" } else { "off" },
                    s.reminders_sent
                );
            }
            Ok(())
        }
        Some(Commands::UpdateStudent {
            config,
            id,
            name,
            email,
            handle,
        }) => {
            let app = App::load(&config)?;
            let changes = roster::SubjectChanges {
                name,
                email,
                handle,
            };
            let updated = roster::update(
                &app.db,
                app.mailer.as_ref(),
                &app.config.profile,
                &id,
                changes,
            )
            .await?;
            for warning in &updated.warnings {
                warn!("{}", warning);
            }
            println!(
                "{}\t{}\t{}\t{}",
                updated.subject.id, updated.subject.name, updated.subject.email, updated.subject.handle
            );
            Ok(())
        }
        Some(Commands::ShowStudent { config, id, token }) => {
            let app = App::load(&config)?;
            let student = match (&id, &token) {
                (Some(id), _) => database::find_one(app.db.as_ref(), id)?,
                (None, Some(token)) => app.db.find_by_token(token)?,
                (None, None) => None,
            };
            let Some(s) = student else {
                anyhow::bail!("Student not found");
            };
            let last_synced = s
                .last_synced
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            println!("{} ({})", s.name, s.id);
            println!("  Handle: {}", s.handle);
            println!("  Email: {}", s.email);
            println!("  Rating: {} (max {})", s.current_rating, s.max_rating);
            println!("  Last synced: {}", last_synced);
            println!("  Contests: {}", s.contest_history.len());
            println!("  Submissions: {}", s.submissions.len());
            println!(
                "  Reminders: {} ({} sent)",
                if s.reminders_enabled { "on" } else { "off" },
                s.reminders_sent
            );
            Ok(())
        }
        Some(Commands::RemoveStudent { config, id }) => {
            let app = App::load(&config)?;
            if !app.db.delete(&id)? {
                anyhow::bail!("Student not found: {}", id);
            }
            info!("Student {} deleted", id);
            Ok(())
        }
        Some(Commands::SetReminders {
            config,
            id,
            enabled,
        }) => {
            let app = App::load(&config)?;
            if !app.db.set_reminders(&id, enabled)? {
                anyhow::bail!("Student not found: {}", id);
            }
            info!("Reminders for {} turned {}", id, if enabled { "on" } else { "off" });
            Ok(())
        }
        None => {
            if let Some(config_path) = cli.config {
                run_daemon(App::load(&config_path)?).await
            } else {
                eprintln!("Please specify a config file or use --help");
                Ok(())
            }
        }
    }
}

async fn import_students(app: &App, csv_path: &str, coach: &str) -> Result<()> {
    let file = fs::File::open(csv_path)
        .with_context(|| format!("Failed to open roster file: {}", csv_path))?;
    let roster = roster::read_roster(file, coach)?;

    for (line, reason) in &roster.rejected {
        warn!("Skipping line {}: {}", line, reason);
    }

    let mut registered = 0;
    for row in roster.rows {
        match roster::register(
            &app.db,
            &app.engine,
            app.mailer.as_ref(),
            &app.config.profile,
            row.student,
        )
        .await
        {
            Ok(registration) => {
                registered += 1;
                for warning in &registration.warnings {
                    warn!("Line {}: {}", row.line, warning);
                }
            }
            Err(e) => error!("Line {}: {}", row.line, e),
        }
    }

    info!(
        "Imported {} student(s), {} line(s) skipped",
        registered,
        roster.rejected.len()
    );
    Ok(())
}

async fn run_daemon(app: App) -> Result<()> {
    let mut scheduler = Scheduler::new(
        &app.config.schedule.expression,
        app.config.schedule.cadence,
        app.engine.clone(),
    )?;
    scheduler.start();

    if let Some(next) = scheduler.next_fire() {
        info!("Next sync at {}", next);
    }
    info!("Ready! Type 'help' for operator commands.");

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = LinesStream::new(stdin.lines());

    loop {
        tokio::select! {
            line = lines.next() => match line {
                Some(Ok(line)) => {
                    let command = console::parse(&line);
                    let reply = console::execute(command, &mut scheduler, &app.engine).await;
                    println!("{}", reply);
                }
                Some(Err(e)) => {
                    error!("Error reading operator input: {}", e);
                    tokio::signal::ctrl_c().await?;
                    break;
                }
                None => {
                    info!("Operator input closed; running until Ctrl-C");
                    tokio::signal::ctrl_c().await?;
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    info!("Shutting down");
    scheduler.stop();
    Ok(())
}
