//! CLI module
//!
//! This module provides the command-line interface for klaris: running the
//! HTTP server, planning a curriculum end to end from the terminal, and
//! running a focus session countdown.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use colored::Colorize;

use crate::{
    api::{
        gateway::FileBlob, serve, AgentGateway, AppState, GatewayConfig, GatewayError,
        HttpAgentGateway, HttpUploadGateway, ServerConfig, UploadGateway,
    },
    focus::{FocusOutcome, FocusSessionTimer},
    models::{Priority, ScheduledDay, Summary, Task, TaskStatus},
    pipeline::{PipelineController, StageOutcome},
    prefs::JsonFileStore,
    presets::{
        format_clock, AgentIds, CHAT_AGENT_ID, DEFAULT_FOCUS_MINUTES, PLANNING_AGENT_ID,
        SUMMARY_AGENT_ID, TASK_AGENT_ID,
    },
    session::Session,
};

#[derive(Parser)]
#[command(author, version, about = "Your curriculum, clarified", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    gateway: GatewayArgs,

    /// Preferences file (theme, gamification mode and progress). Kept in memory when absent.
    #[arg(long, env = "KLARIS_PREFS", global = true)]
    prefs: Option<PathBuf>,
}

#[derive(Args)]
struct GatewayArgs {
    /// Agent service endpoint
    #[arg(long, env = "KLARIS_AGENT_URL", global = true, default_value = "http://localhost:8787/api/agent")]
    agent_url: String,

    /// Upload service endpoint
    #[arg(long, env = "KLARIS_UPLOAD_URL", global = true, default_value = "http://localhost:8787/api/upload")]
    upload_url: String,

    /// Bearer token sent to both services
    #[arg(long, env = "KLARIS_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, env = "KLARIS_TIMEOUT", global = true, default_value_t = 120)]
    timeout: u64,

    #[arg(long, env = "KLARIS_SUMMARY_AGENT", global = true, default_value = SUMMARY_AGENT_ID)]
    summary_agent: String,

    #[arg(long, env = "KLARIS_TASK_AGENT", global = true, default_value = TASK_AGENT_ID)]
    task_agent: String,

    #[arg(long, env = "KLARIS_PLANNING_AGENT", global = true, default_value = PLANNING_AGENT_ID)]
    planning_agent: String,

    #[arg(long, env = "KLARIS_CHAT_AGENT", global = true, default_value = CHAT_AGENT_ID)]
    chat_agent: String,
}

impl GatewayArgs {
    fn config(&self) -> GatewayConfig {
        GatewayConfig {
            agent_url: self.agent_url.clone(),
            upload_url: self.upload_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout),
        }
    }

    fn agent_ids(&self) -> AgentIds {
        AgentIds {
            summary: self.summary_agent.clone(),
            task: self.task_agent.clone(),
            planning: self.planning_agent.clone(),
            chat: self.chat_agent.clone(),
        }
    }

    fn gateways(&self) -> Result<(Arc<dyn AgentGateway>, Arc<dyn UploadGateway>), GatewayError> {
        let config = self.config();
        Ok((
            Arc::new(HttpAgentGateway::with_config(config.clone())?),
            Arc::new(HttpUploadGateway::with_config(config)?),
        ))
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Start the klaris API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value_t = 3000)]
        port: u16,
    },

    /// Build a study plan from curriculum text or files
    Plan {
        /// Curriculum text
        #[arg(short, long, required_unless_present = "file", conflicts_with = "file")]
        text: Option<String>,

        /// Curriculum documents to upload
        #[arg(short, long)]
        file: Vec<PathBuf>,

        /// Stop after generating tasks
        #[arg(long)]
        no_timeline: bool,
    },

    /// Run a focus session countdown. Ctrl-C abandons it.
    Focus {
        /// Session length in minutes
        #[arg(short, long, default_value_t = DEFAULT_FOCUS_MINUTES)]
        minutes: u32,

        /// What the session is for
        #[arg(short, long, default_value = "")]
        goal: String,
    },

    /// Generate shell completions
    Completions {
        /// The shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Run the CLI application
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr so printed plans and completions stay clean
    tracing_subscriber::fmt().with_writer(io::stderr).init();

    match &cli.command {
        Commands::Serve { port } => {
            println!("Starting klaris API server on port {}...", port);

            let (agents, uploads) = cli.gateway.gateways()?;
            let session = open_session(cli.prefs.as_deref());
            let state = AppState::new(session, agents, uploads, cli.gateway.agent_ids());

            let config = ServerConfig {
                address: ([127, 0, 0, 1], *port).into(),
            };
            serve(state, config).await?;
            Ok(())
        }

        Commands::Plan {
            text,
            file,
            no_timeline,
        } => {
            let (agents, uploads) = cli.gateway.gateways()?;
            let session = open_session(cli.prefs.as_deref());
            let pipeline =
                PipelineController::new(session.clone(), agents, uploads, cli.gateway.agent_ids());

            let outcome = match text {
                Some(text) => pipeline.submit_text(text).await,
                None => {
                    let mut files = Vec::with_capacity(file.len());
                    for path in file {
                        files.push(FileBlob::read(path).await?);
                    }
                    pipeline.submit_files(files).await
                }
            };
            check_outcome("Summary", &outcome)?;
            if let Some(summary) = session.read(|state| state.plan().summary().cloned()) {
                print_summary(&summary);
            }

            check_outcome("Tasks", &pipeline.generate_tasks().await?)?;
            print_tasks(&session.read(|state| state.plan().tasks().to_vec()));

            if !*no_timeline {
                check_outcome("Timeline", &pipeline.generate_timeline().await?)?;
                print_schedule(&session.read(|state| state.plan().schedule()));
            }
            Ok(())
        }

        Commands::Focus { minutes, goal } => {
            let session = open_session(cli.prefs.as_deref());
            run_focus(&session, *minutes, goal).await
        }

        Commands::Completions { shell } => {
            // Generate completions for the specified shell
            let mut cmd = Cli::command();
            let bin_name = cmd.get_name().to_string();
            generate(*shell, &mut cmd, bin_name, &mut io::stdout());
            Ok(())
        }
    }
}

fn open_session(prefs: Option<&Path>) -> Session {
    match prefs {
        Some(path) => Session::new(Arc::new(JsonFileStore::open(path))),
        None => Session::in_memory(),
    }
}

fn check_outcome(stage: &str, outcome: &StageOutcome) -> Result<(), Box<dyn std::error::Error>> {
    match outcome {
        StageOutcome::Committed => Ok(()),
        StageOutcome::Degraded { reason } => {
            println!(
                "{} {}",
                format!("{} unavailable ({}); showing demo data.", stage, reason).yellow(),
                "Start a new project to try again.".dimmed()
            );
            Ok(())
        }
        StageOutcome::Stale => Err(format!("{} result was discarded", stage).into()),
        StageOutcome::Rejected { reason } => Err(format!("{} rejected: {}", stage, reason).into()),
    }
}

fn print_list(title: &str, items: &[String]) {
    println!("{}", title.bold());
    if items.is_empty() {
        println!("  {}", "(none)".dimmed());
    }
    for item in items {
        println!("  • {}", item);
    }
}

fn print_summary(summary: &Summary) {
    println!("\n{}", "Curriculum Summary".bold().underline());
    print_list("Goals", &summary.goals);
    print_list("Requirements", &summary.requirements);
    print_list("Deadlines", &summary.deadlines);
    if !summary.raw_notes.is_empty() {
        println!("{} {}", "Notes:".bold(), summary.notes_preview().dimmed());
    }
}

fn priority_label(priority: Priority) -> colored::ColoredString {
    match priority {
        Priority::High => priority.as_str().red(),
        Priority::Medium => priority.as_str().yellow(),
        Priority::Low => priority.as_str().green(),
    }
}

fn status_marker(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Todo => "[ ]",
        TaskStatus::InProgress => "[~]",
        TaskStatus::Done => "[x]",
    }
}

fn print_task(task: &Task, indent: &str) {
    println!(
        "{}{} {} ({}, {}) {}",
        indent,
        status_marker(task.status()),
        task.title().bold(),
        priority_label(task.priority()),
        task.estimated_time(),
        format!("#{}", task.id()).dimmed()
    );
    if !task.description().is_empty() {
        println!("{}    {}", indent, task.description());
    }
}

fn print_tasks(tasks: &[Task]) {
    println!("\n{}", "Tasks".bold().underline());
    for task in tasks {
        print_task(task, "  ");
    }
}

fn print_schedule(schedule: &[ScheduledDay]) {
    println!("\n{}", "Timeline".bold().underline());
    for day in schedule {
        let date = if day.date.is_empty() {
            String::new()
        } else {
            format!(" ({})", day.date)
        };
        println!("{}{}: {}", day.day.cyan().bold(), date, day.focus);
        for task in &day.tasks {
            print_task(task, "    ");
        }
    }
}

async fn run_focus(session: &Session, minutes: u32, goal: &str) -> Result<(), Box<dyn std::error::Error>> {
    let timer = FocusSessionTimer::new(session.clone());
    if let FocusOutcome::Rejected { reason } = timer.start(minutes, goal) {
        return Err(reason.to_string().into());
    }

    let mut refresh = tokio::time::interval(Duration::from_millis(250));
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                timer.cancel();
                println!("\n{}", "Focus session abandoned. No progress earned.".yellow());
                return Ok(());
            }
            _ = refresh.tick() => {
                let state = timer.state();
                if !state.is_active() {
                    println!(
                        "\r{} Progress: {}%",
                        "Focus session complete!".green().bold(),
                        session.progress().value()
                    );
                    return Ok(());
                }
                print!("\r{} {}", format_clock(state.remaining_seconds()).bold(), goal);
                io::stdout().flush()?;
            }
        }
    }
}
