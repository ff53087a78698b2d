//! uq - USSD command scheduler
//!
//! CLI entry point for managing devices, queuing commands and running the
//! scheduler loop.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use clap::{CommandFactory, Parser};
use colored::{ColoredString, Colorize};
use eyre::{Context, Result, eyre};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use ussdq::cli::{Cli, Command, DeviceCommand, OutputFormat, SessionCommand, SimCommand, get_log_path};
use ussdq::domain::IdResolver;
use ussdq::queue::QueueEvent;
use ussdq::registry::today;
use ussdq::{
    App, Carrier, CommandFilter, CommandRequest, CommandStatus, CommandType, Config, Session, SessionStatus, Sim,
    StepState, Trigger, run_context,
};

fn setup_logging(level: &str) -> Result<()> {
    let log_path = get_log_path();
    let log_dir = log_path.parent().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("."));

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Write to log file, not stdout/stderr
    let level: tracing::Level = level.parse().map_err(|_| eyre!("Invalid log level: {}", level))?;
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    setup_logging(&config.effective_log_level(cli.log_level.as_deref())).context("Failed to setup logging")?;

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        println!();
        return Ok(());
    };

    let app = App::open(&config).await.context("Failed to start")?;
    if app.recovered.commands_failed + app.recovered.sessions_failed > 0 {
        println!(
            "{} marked interrupted work as failed ({})",
            "recovered:".yellow(),
            app.recovered
        );
    }

    let result = match command {
        Command::Device { command } => match command {
            DeviceCommand::Add { name, sims } => cmd_device_add(&app, &name, sims).await,
            DeviceCommand::List { format } => cmd_device_list(&app, format).await,
            DeviceCommand::Touch { id } => cmd_device_touch(&app, &id).await,
        },
        Command::Sim { command } => match command {
            SimCommand::List { device, format } => cmd_sim_list(&app, device.as_deref(), format).await,
            SimCommand::Reset => cmd_sim_reset(&app).await,
        },
        Command::Submit {
            sim,
            code,
            command_type,
            carrier,
        } => cmd_submit(&app, &sim, &code, &command_type, carrier.as_deref()).await,
        Command::History {
            status,
            sim,
            device,
            search,
            oldest_first,
            limit,
            format,
        } => {
            let query = HistoryQuery {
                status,
                sim,
                device,
                search,
                oldest_first,
                limit,
            };
            cmd_history(&app, query, format).await
        }
        Command::Execute { id } => cmd_execute(&app, id).await,
        Command::Session { command } => match command {
            SessionCommand::Run { sim, inputs } => cmd_session_run(&app, &sim, inputs).await,
            SessionCommand::List { format } => cmd_session_list(&app, format).await,
            SessionCommand::Show { id, format } => cmd_session_show(&app, &id, format).await,
        },
        Command::Run { manual, once } => cmd_run(&app, manual, once).await,
        Command::Stats { format } => cmd_stats(&app, format).await,
    };

    app.close().await;
    result
}

// === Helpers ===

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn status_colored(status: CommandStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        CommandStatus::Pending => label.yellow(),
        CommandStatus::Executing => label.cyan(),
        CommandStatus::Success => label.green(),
        CommandStatus::Failed => label.red(),
        CommandStatus::QuotaExceeded => label.magenta(),
    }
}

fn session_status_colored(status: SessionStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        SessionStatus::Pending => label.yellow(),
        SessionStatus::Running => label.cyan(),
        SessionStatus::Completed => label.green(),
        SessionStatus::Failed => label.red(),
    }
}

fn usage_colored(sim: &Sim) -> ColoredString {
    let usage = format!("{}/{}", sim.used_today, sim.daily_quota);
    if sim.has_quota() { usage.normal() } else { usage.red() }
}

/// Resolve a full or partial ID against `ids` (id -> display name)
fn resolve(ids: &HashMap<String, String>, reference: &str, kind: &str) -> Result<String> {
    match IdResolver::new(ids).resolve(reference) {
        Ok(Some(id)) => Ok(id),
        Ok(None) => Err(eyre!("No {} matches '{}'", kind, reference)),
        Err(candidates) => Err(eyre!(
            "'{}' matches several {}s: {}",
            reference,
            kind,
            candidates.join(", ")
        )),
    }
}

async fn resolve_sim(app: &App, reference: &str) -> Result<Sim> {
    let ids: HashMap<String, String> = app
        .registry
        .list_sims()
        .await
        .into_iter()
        .map(|s| (s.id, s.phone_number))
        .collect();
    let id = resolve(&ids, reference, "SIM")?;
    Ok(app.registry.get_sim(&id).await?)
}

async fn resolve_device(app: &App, reference: &str) -> Result<String> {
    let ids: HashMap<String, String> = app
        .registry
        .list_devices()
        .await
        .into_iter()
        .map(|d| (d.id, d.name))
        .collect();
    resolve(&ids, reference, "device")
}

// === Devices and SIMs ===

async fn cmd_device_add(app: &App, name: &str, sims: Option<u32>) -> Result<()> {
    let (device, sims) = app.registry.register_device(name, sims).await?;
    println!("{} {} ({})", "Registered".green(), device.name.bold(), device.id);
    for sim in &sims {
        println!("  {}  {}  {}  quota {}", sim.id, sim.phone_number, sim.carrier, sim.daily_quota);
    }
    Ok(())
}

async fn cmd_device_list(app: &App, format: OutputFormat) -> Result<()> {
    let devices = app.registry.list_devices().await;
    if format == OutputFormat::Json {
        return print_json(&devices);
    }
    if devices.is_empty() {
        println!("No devices registered");
        return Ok(());
    }
    for device in devices {
        let status = if device.is_online() {
            device.status.to_string().green()
        } else {
            device.status.to_string().red()
        };
        let last_seen = device
            .last_seen
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_else(|| "never".to_string());
        println!(
            "{:<40} {:<20} {:<8} sims: {:<3} last seen: {}",
            device.id, device.name, status, device.sim_count, last_seen
        );
    }
    Ok(())
}

async fn cmd_device_touch(app: &App, reference: &str) -> Result<()> {
    let id = resolve_device(app, reference).await?;
    let device = app.registry.touch_device(&id).await?;
    println!("{} {} is {}", "Heartbeat:".green(), device.name.bold(), device.status);
    Ok(())
}

async fn cmd_sim_list(app: &App, device: Option<&str>, format: OutputFormat) -> Result<()> {
    let sims = match device {
        Some(reference) => {
            let id = resolve_device(app, reference).await?;
            app.registry.sims_for_device(&id).await
        }
        None => app.registry.list_sims().await,
    };
    if format == OutputFormat::Json {
        return print_json(&sims);
    }
    if sims.is_empty() {
        println!("No SIMs");
        return Ok(());
    }
    for sim in sims {
        let overrun = match sim.overrun() {
            0 => String::new(),
            n => format!("  {}", format!("over by {}", n).red()),
        };
        println!(
            "{:<18} {:<15} {:<7} {:>7}  left: {:<3} device: {}{}",
            sim.id,
            sim.phone_number,
            sim.carrier,
            usage_colored(&sim),
            sim.remaining(),
            sim.device_id,
            overrun
        );
    }
    Ok(())
}

async fn cmd_sim_reset(app: &App) -> Result<()> {
    let reset = app.registry.reset_daily(today()).await?;
    println!("Reset {} SIM(s) for {}", reset, today());
    Ok(())
}

// === Commands ===

async fn cmd_submit(app: &App, sim: &str, code: &str, command_type: &str, carrier: Option<&str>) -> Result<()> {
    let sim = resolve_sim(app, sim).await?;
    let command_type: CommandType = command_type.parse().map_err(|e: String| eyre!(e))?;
    let carrier: Carrier = match carrier {
        Some(c) => c.parse().map_err(|e: String| eyre!(e))?,
        None => sim.carrier,
    };

    let command = app
        .queue
        .submit(CommandRequest {
            code: code.to_string(),
            command_type,
            carrier,
            device_id: sim.device_id.clone(),
            sim_id: sim.id.clone(),
        })
        .await?;

    println!(
        "{} #{} {} on {} ({})",
        "Queued".green(),
        command.id,
        command.code.bold(),
        sim.phone_number,
        command.command_type
    );
    if carrier != sim.carrier {
        println!(
            "{} SIM carrier is {}, command carrier is {}; it will never run",
            "warning:".yellow(),
            sim.carrier,
            carrier
        );
    }
    Ok(())
}

struct HistoryQuery {
    status: Option<String>,
    sim: Option<String>,
    device: Option<String>,
    search: Option<String>,
    oldest_first: bool,
    limit: Option<usize>,
}

async fn cmd_history(app: &App, query: HistoryQuery, format: OutputFormat) -> Result<()> {
    let mut filter = CommandFilter::all();
    if let Some(status) = query.status {
        filter.status = Some(status.parse::<CommandStatus>().map_err(|e| eyre!(e))?);
    }
    if let Some(sim) = query.sim {
        filter = filter.with_sim(resolve_sim(app, &sim).await?.id);
    }
    if let Some(device) = query.device {
        filter = filter.with_device(resolve_device(app, &device).await?);
    }
    if let Some(search) = query.search {
        filter = filter.with_search(search);
    }

    let mut commands = app.queue.list(&filter).await;
    if !query.oldest_first {
        commands.reverse();
    }
    if let Some(limit) = query.limit {
        commands.truncate(limit);
    }

    if format == OutputFormat::Json {
        return print_json(&commands);
    }
    if commands.is_empty() {
        println!("No commands");
        return Ok(());
    }
    for command in commands {
        let mode = if command.auto_executed { "auto" } else { "manual" };
        let when = command
            .executed_at
            .unwrap_or(command.created_at)
            .format("%Y-%m-%d %H:%M:%S");
        println!(
            "#{:<5} {:<12} {:<16} {:<10} {:<7} {:<6} {}  {}",
            command.id,
            command.code,
            status_colored(command.status),
            command.command_type,
            command.carrier,
            mode,
            when,
            command.result.as_deref().unwrap_or("").dimmed()
        );
    }
    Ok(())
}

async fn cmd_execute(app: &App, id: u64) -> Result<()> {
    let command = app.engine.execute(id, Trigger::Manual).await?;
    println!(
        "#{} {} {}",
        command.id,
        status_colored(command.status),
        command.result.as_deref().unwrap_or("")
    );
    Ok(())
}

// === Sessions ===

fn print_session(session: &Session) {
    println!(
        "{} {} on {}",
        session.id.bold(),
        session_status_colored(session.status),
        session.sim_id
    );
    for (index, step) in session.steps.iter().enumerate() {
        let detail = match &step.state {
            StepState::Completed { response } => response.clone(),
            StepState::Failed { reason } => reason.red().to_string(),
            _ => String::new(),
        };
        println!("  {}. {:<10} {:<10} {}", index + 1, step.input, step.state.label(), detail);
    }
}

async fn cmd_session_run(app: &App, sim: &str, inputs: Vec<String>) -> Result<()> {
    let sim = resolve_sim(app, sim).await?;
    let session = app.queue.open_session(&sim.device_id, &sim.id, inputs).await?;
    let session = app.engine.run_session(&session.id).await?;
    print_session(&session);
    Ok(())
}

async fn cmd_session_list(app: &App, format: OutputFormat) -> Result<()> {
    let sessions = app.queue.list_sessions().await;
    if format == OutputFormat::Json {
        return print_json(&sessions);
    }
    if sessions.is_empty() {
        println!("No sessions");
        return Ok(());
    }
    for session in sessions {
        let done = session
            .steps
            .iter()
            .filter(|s| matches!(s.state, StepState::Completed { .. }))
            .count();
        println!(
            "{:<18} {:<10} {}/{} steps  {}",
            session.id,
            session_status_colored(session.status),
            done,
            session.steps.len(),
            session.sim_id
        );
    }
    Ok(())
}

async fn cmd_session_show(app: &App, reference: &str, format: OutputFormat) -> Result<()> {
    let ids: HashMap<String, String> = app
        .queue
        .list_sessions()
        .await
        .into_iter()
        .map(|s| (s.id.clone(), s.id))
        .collect();
    let id = resolve(&ids, reference, "session")?;
    let session = app.queue.get_session(&id).await?;
    if format == OutputFormat::Json {
        return print_json(&session);
    }
    print_session(&session);
    Ok(())
}

// === Scheduler ===

async fn cmd_run(app: &App, manual: bool, once: bool) -> Result<()> {
    if once {
        let report = app.scheduler.run_cycle().await;
        println!(
            "scanned {}  dispatched {}  {} {}  {} {}  {} {}",
            report.scanned,
            report.dispatched,
            "success".green(),
            report.succeeded,
            "failed".red(),
            report.failed,
            "quota".magenta(),
            report.quota_exceeded
        );
        return Ok(());
    }

    let scheduler_config = app.scheduler.config();
    let auto = scheduler_config.auto_execute && !manual;
    let (handle, ctx) = run_context(auto);
    let scheduler = app.scheduler.clone();
    let task = tokio::spawn(async move { scheduler.run(ctx).await });

    let mut events = app.queue.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    println!(
        "Scheduler running every {}ms (automatic execution {}). Type 'auto', 'auto on', 'auto off' or 'quit'; Ctrl-C stops.",
        scheduler_config.tick_ms,
        if auto { "on".green() } else { "off".yellow() }
    );

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Ctrl-C received");
                break;
            }
            event = events.recv() => match event {
                Ok(QueueEvent::StatusChanged { id, to, .. }) => {
                    println!("#{} {}", id, status_colored(to));
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Event stream lagged"),
            },
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) => match line.trim() {
                    "auto on" => {
                        handle.set_auto_execute(true);
                        println!("automatic execution {}", "on".green());
                    }
                    "auto off" => {
                        handle.set_auto_execute(false);
                        println!("automatic execution {}", "off".yellow());
                    }
                    "auto" => {
                        let state = if handle.auto_execute() { "on".green() } else { "off".yellow() };
                        println!("automatic execution {}", state);
                    }
                    "quit" | "exit" => break,
                    "" => {}
                    other => println!("unknown input: {}", other),
                },
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }

    handle.shutdown().await;
    task.await.context("Scheduler task panicked")?;

    let stats = app.scheduler.stats().await;
    println!(
        "cycles {}  dispatched {}  succeeded {}  failed {}  quota exceeded {}",
        stats.cycles, stats.total_dispatched, stats.total_succeeded, stats.total_failed, stats.total_quota_exceeded
    );
    Ok(())
}

async fn cmd_stats(app: &App, format: OutputFormat) -> Result<()> {
    let overview = app.overview().await;
    if format == OutputFormat::Json {
        return print_json(&overview);
    }
    println!("{}", "Overview".bold());
    println!("  Devices online:    {}/{}", overview.active_devices, overview.total_devices);
    println!("  SIMs connected:    {}/{}", overview.connected_sims, overview.total_sims);
    println!("  SIMs exhausted:    {}", overview.exhausted_sims);
    if overview.overrun_sims > 0 {
        println!("  SIMs over quota:   {}", overview.overrun_sims.to_string().red());
    }
    println!("  Running commands:  {}", overview.running_commands);
    println!("  Completed today:   {}", overview.completed_today.to_string().green());
    println!("  Pending:           {}", overview.pending.to_string().yellow());
    println!("  Failed:            {}", overview.failed.to_string().red());
    println!("  Quota exceeded:    {}", overview.quota_exceeded.to_string().magenta());
    println!("  Total commands:    {}", overview.total_commands);
    Ok(())
}
