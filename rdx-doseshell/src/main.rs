use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, TimeZone, Utc};
use colored::Colorize;
use dosekeeper::prelude::*;
use dosekeeper::sim::{
    DispenseStep, NotifyStep, ScriptedActuator, ScriptedNotifier, ScriptedRig, ScriptedSensors,
    ScriptedVerifier, SensorStep, VerifyStep,
};
use dosekeeper::{ENGINE_NAME, VERSION as LIB_VERSION};
use rustyline::highlight::Highlighter;
use rustyline::Editor;
use rustyline_derive::{Completer, Helper, Hinter, Validator};
use std::borrow::Cow;
use std::env;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const SHELL_VERSION: &str = env!("CARGO_PKG_VERSION");

type BenchEngine = DispenserEngine<
    ManualClock,
    ScriptedVerifier,
    ScriptedActuator,
    ScriptedSensors,
    ScriptedNotifier,
>;

/// A custom helper struct for rustyline that enables syntax highlighting.
#[derive(Completer, Helper, Hinter, Validator)]
struct MyHighlighter;

impl Highlighter for MyHighlighter {
    fn highlight<'l>(&self, line: &'l str, _pos: usize) -> Cow<'l, str> {
        if let Some((command, rest)) = line.split_once(' ') {
            let colored_command = command.yellow().bold();
            let colored_rest = rest.yellow();
            Cow::Owned(format!("{} {}", colored_command, colored_rest))
        } else {
            Cow::Owned(line.yellow().bold().to_string())
        }
    }
    fn highlight_char(&self, _line: &str, _pos: usize, _forced: bool) -> bool {
        true
    }
}

fn print_banner() {
    if env::var("QUIET_MODE").is_ok() {
        return;
    }
    println!("{}", format!("  {} bench shell", ENGINE_NAME).cyan().bold());

    let version_string = format!(
        "          Shell   v{:<8} Library   v{:<8}",
        SHELL_VERSION, LIB_VERSION
    );
    println!("{}", "-".repeat(72).dimmed());
    println!("{}", version_string);
    println!(
        "{}",
        "    Devices are simulated; the clock only moves when you move it.".dimmed()
    );
    println!("{}", "-".repeat(72).dimmed());
}

/// Spawns tasks that print the engine's dose events as they arrive.
fn spawn_event_listeners(engine: &BenchEngine) {
    let mut dose_rx = engine.subscribe_dose_events();
    tokio::spawn(async move {
        while let Ok(event) = dose_rx.recv().await {
            let line = match event {
                DoseEvent::StateChanged(t) => format!("{} {} -> {}", t.dose, t.from, t.to),
                DoseEvent::Finished(outcome) => format!("{:?}", outcome),
                DoseEvent::NotificationFailed { dose, error, .. } => {
                    format!("notification for {} failed: {}", dose, error).red().to_string()
                }
                DoseEvent::DriverError(e) => e.to_string().red().to_string(),
            };
            println!("<-- [DOSE] {}", line);
        }
    });
}

fn print_status(engine: &BenchEngine, clock: &ManualClock) {
    let tz = engine.scheduler().options().timezone;
    println!(
        "Clock: {} ({})",
        clock.now().with_timezone(&tz).format("%Y-%m-%d %H:%M:%S"),
        tz
    );
    match engine.scheduler().active_dose() {
        Some(dose) => println!("Dispenser held by: {}", dose),
        None => println!("Dispenser idle."),
    }
    for record in engine.scheduler().records() {
        let state = match record.state() {
            DoseState::Completed => record.state().to_string().green(),
            DoseState::Missed | DoseState::DispenseFailed => record.state().to_string().red(),
            DoseState::VerificationFailed => record.state().to_string().yellow(),
            other => other.to_string().normal(),
        };
        let snapshot = record
            .snapshot
            .map(|s| s.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  {:<24} {:<20} at {}  attempts {}  {}",
            record.dose.to_string(),
            state,
            record.scheduled_at.with_timezone(&tz).format("%H:%M"),
            record.verification_attempts,
            snapshot
        );
    }
}

/// Parses `90`, `90s`, `5m` or `2h`.
fn parse_span(text: &str) -> Option<Duration> {
    let (digits, unit) = match text.char_indices().last()? {
        (i, c) if c.is_ascii_alphabetic() => (&text[..i], c),
        _ => (text, 's'),
    };
    let amount: i64 = digits.parse().ok()?;
    match unit {
        's' => Duration::try_seconds(amount),
        'm' => Duration::try_minutes(amount),
        'h' => Duration::try_hours(amount),
        _ => None,
    }
}

/// Resolves `HH:MM` on the clock's current local date.
fn local_time_today(engine: &BenchEngine, clock: &ManualClock, text: &str) -> Option<DateTime<Utc>> {
    let time = NaiveTime::parse_from_str(text, "%H:%M").ok()?;
    let tz = engine.scheduler().options().timezone;
    let date = clock.now().with_timezone(&tz).date_naive();
    tz.from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|at| at.with_timezone(&Utc))
}

fn print_help() {
    println!("Available commands:");
    println!("  status                   - Shows the clock and every dose record.");
    println!("  tick                     - Runs one control cycle at the current clock.");
    println!("  at <HH:MM>               - Sets the clock to a local time today.");
    println!("  advance <N>[s|m|h]       - Moves the clock forward.");
    println!("  verify allow|deny|timeout|error");
    println!("                           - Scripts the next fingerprint result.");
    println!("  dispense ok|fault <why>  - Scripts the next dispense result.");
    println!("  sensor ok|absent|hang    - Scripts the next health sample.");
    println!("  notify ok|fail           - Sets how the notifier behaves from now on.");
    println!("  exit                     - Quits the shell.");
}

fn script(rig: &ScriptedRig, args: &[&str]) -> Result<String, String> {
    match args {
        ["verify", "allow"] => rig.verify.push(VerifyStep::Allow),
        ["verify", "deny"] => rig.verify.push(VerifyStep::Deny),
        ["verify", "timeout"] => rig.verify.push(VerifyStep::Hang),
        ["verify", "error"] => rig.verify.push(VerifyStep::Fail("reader offline".into())),
        ["dispense", "ok"] => rig.dispense.push(DispenseStep::Ok),
        ["dispense", "fault", reason @ ..] if !reason.is_empty() => {
            rig.dispense.push(DispenseStep::Fault(reason.join(" ")))
        }
        ["sensor", "ok"] => rig
            .sensor
            .push(SensorStep::Reading(dosekeeper::sim::NOMINAL_READING)),
        ["sensor", "absent"] => rig.sensor.push(SensorStep::Fail("no finger on sensor".into())),
        ["sensor", "hang"] => rig.sensor.push(SensorStep::Hang),
        ["notify", "ok"] => rig.notify.set_fallback(NotifyStep::Ok),
        ["notify", "fail"] => rig.notify.set_fallback(NotifyStep::Fail("no signal".into())),
        _ => return Err(format!("Usage error: '{}'. Type 'help'.", args.join(" "))),
    }
    Ok(format!("--> Scripted: {}", args.join(" ")))
}

#[tokio::main]
async fn main() -> Result<()> {
    print_banner();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_target(false)
        .init();

    let config = match env::args_os().nth(1).map(PathBuf::from) {
        Some(path) => DispenserConfig::load(&path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DispenserConfig::default(),
    };

    let rig = ScriptedRig::new();
    let clock = ManualClock::new(Utc::now());
    let mut engine = DispenserEngine::new(&config, clock.clone(), rig.devices())?;
    spawn_event_listeners(&engine);

    let mut rl = Editor::new()?;
    let helper = MyHighlighter {};
    rl.set_helper(Some(helper));

    println!("{} is ready. Type 'help' for commands or 'exit' to quit.", ENGINE_NAME.cyan());

    loop {
        let prompt = format!("{}", ">> ".cyan().bold());
        let readline = rl.readline(&prompt);
        match readline {
            Ok(line) => {
                rl.add_history_entry(line.as_str())?;
                let args = line.split_whitespace().collect::<Vec<_>>();

                if let Some(command) = args.first() {
                    match *command {
                        "status" => print_status(&engine, &clock),
                        "tick" => {
                            let out = engine.step().await;
                            // Give the listener task a moment to print.
                            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                            println!(
                                "--> Cycle #{}: {} transition(s), {} request(s).",
                                engine.cycles(),
                                out.transitions.len(),
                                out.requests.len()
                            );
                        }
                        "at" => match args.get(1).and_then(|t| local_time_today(&engine, &clock, t)) {
                            Some(at) => {
                                clock.set(at);
                                println!("--> Clock set to {}.", at);
                            }
                            None => println!("Usage: at <HH:MM>"),
                        },
                        "advance" => match args.get(1).and_then(|s| parse_span(s)) {
                            Some(by) => {
                                clock.advance(by);
                                println!("--> Clock is now {}.", clock.now());
                            }
                            None => println!("Usage: advance <N>[s|m|h]"),
                        },
                        "verify" | "dispense" | "sensor" | "notify" => {
                            match script(&rig, &args) {
                                Ok(message) => println!("{}", message),
                                Err(message) => println!("{}", message),
                            }
                        }
                        "help" => print_help(),
                        "exit" => break,
                        _ => println!("Unknown command: '{}'. Type 'help'.", line),
                    }
                }
            }
            Err(_) => {
                println!("Exiting doseshell...");
                break;
            }
        }
    }

    Ok(())
}
