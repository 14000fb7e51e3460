//! CLI entry point for the pagebus memory monitor.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use clap::Parser;
use pagebus_core as _;
use pagebus_monitor::{demo_profile, load_profile, parse_command, MonitorError, Session};
use serde as _;
use serde_json as _;
#[cfg(test)]
use tempfile as _;
use thiserror as _;
use tracing as _;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "pagebus-mon",
    version,
    about = "Inspect and poke a paged 8-bit address space without disturbing its devices."
)]
struct Args {
    /// Machine profile (JSON); the built-in demo machine when omitted
    #[arg(long, value_name = "PATH")]
    profile: Option<PathBuf>,

    /// Access trace ring capacity (power of two; 0 disables tracing)
    #[arg(long, value_name = "RECORDS", default_value_t = 256)]
    trace_capacity: usize,

    /// Command to run; repeatable. Commands are read from stdin when none are given
    #[arg(short = 'c', long = "command", value_name = "COMMAND")]
    commands: Vec<String>,

    /// Print the resolved profile as JSON and exit
    #[arg(long, action = clap::ArgAction::SetTrue)]
    print_profile: bool,
}

fn open_session(args: &Args) -> Result<Option<Session>, MonitorError> {
    let profile = match &args.profile {
        Some(path) => load_profile(path)?,
        None => demo_profile(),
    };
    if args.print_profile {
        println!("{}", profile.to_json()?);
        return Ok(None);
    }
    let capacity = (args.trace_capacity != 0).then_some(args.trace_capacity);
    Session::build(&profile, capacity).map(Some)
}

fn run_line(session: &mut Session, line: &str) -> Result<(), MonitorError> {
    let command = parse_command(line)?;
    let output = session.execute(&command)?;
    print!("{output}");
    Ok(())
}

fn run_commands(session: &mut Session, commands: &[String]) -> Result<(), i32> {
    for line in commands {
        if let Err(e) = run_line(session, line) {
            eprintln!("error: {line}: {e}");
            return Err(1);
        }
    }
    Ok(())
}

fn run_stdin(session: &mut Session) -> Result<(), i32> {
    let mut failures = 0_usize;
    for line in io::stdin().lock().lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                eprintln!("error: failed to read stdin: {e}");
                return Err(1);
            }
        };
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if matches!(line, "quit" | "exit" | "q") {
            break;
        }
        if let Err(e) = run_line(session, line) {
            eprintln!("error: {e}");
            failures += 1;
        }
        let _ = io::stdout().flush();
    }
    if failures == 0 {
        Ok(())
    } else {
        Err(1)
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let exit_code = match open_session(&args) {
        Ok(None) => 0,
        Ok(Some(mut session)) => {
            let result = if args.commands.is_empty() {
                run_stdin(&mut session)
            } else {
                run_commands(&mut session, &args.commands)
            };
            match result {
                Ok(()) => 0,
                Err(code) => code,
            }
        }
        Err(e) => {
            eprintln!("error: {e}");
            1
        }
    };

    std::process::exit(exit_code);
}
