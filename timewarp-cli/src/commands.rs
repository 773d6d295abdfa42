use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use crossbeam::channel::{self, Receiver, Sender};
use timewarp_config::TimewarpConfig;
use timewarp_core::source::{ScopedTime, TimeSource};
use timewarp_core::{Activation, Scheduler, TimeError, TrackedThreads};
use timewarp_telemetry::EventLogger;
use tracing::{debug, info};

use crate::error::CliError;

#[derive(Parser)]
#[command(name = "timewarp", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run retrying workers against a virtual clock and print the timeline
    Demo(DemoArgs),
    /// Load and validate configuration, then print it
    CheckConfig(CheckConfigArgs),
}

#[derive(Args, Debug, Clone)]
pub struct DemoArgs {
    /// Number of worker threads; worker `i` succeeds on attempt `i + 1`
    #[arg(long, default_value_t = 3)]
    pub workers: u32,
    /// Delay before the first retry; doubled after every failure
    #[arg(long, default_value_t = 100)]
    pub backoff_ms: u64,
    /// Attempts per worker before giving up
    #[arg(long, default_value_t = 5)]
    pub attempts: u32,
    /// Virtual start instant in milliseconds (defaults to configuration)
    #[arg(long)]
    pub start: Option<u64>,
    /// Print scheduler metrics after the run
    #[arg(long)]
    pub metrics: bool,
}

#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Configuration file to load instead of the default layers
    #[arg(short, long)]
    pub path: Option<PathBuf>,
}

pub fn run_command(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Commands::Demo(args) => {
            let config = TimewarpConfig::load()?;
            EventLogger::init(&config.telemetry);
            let report = run_demo(&args, &config)?;
            print_report(&report);
            if args.metrics {
                if let Some(metrics) = &report.metrics {
                    println!("\n{metrics}");
                }
            }
            Ok(())
        }
        Commands::CheckConfig(args) => {
            let config = match &args.path {
                Some(path) => TimewarpConfig::load_from_path(path)?,
                None => TimewarpConfig::load()?,
            };
            print!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attempt {
    pub at: u64,
    pub worker: String,
    pub number: u32,
    pub succeeded: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded { attempts: u32 },
    GaveUp,
}

#[derive(Debug)]
pub struct DemoReport {
    pub start: u64,
    pub timeline: Vec<Attempt>,
    pub outcomes: Vec<(String, Outcome)>,
    pub metrics: Option<String>,
}

/// Runs the workers to completion, moving the clock straight to each next deadline.
pub fn run_demo(args: &DemoArgs, config: &TimewarpConfig) -> Result<DemoReport, CliError> {
    let threads = TrackedThreads::new();
    let scheduler = Arc::new(Scheduler::new(config.scheduler.clone(), threads.clone()));
    scheduler.start(args.start)?;
    let start = scheduler.now();

    let (tx, rx) = channel::unbounded();
    let mut handles = Vec::with_capacity(args.workers as usize);
    for index in 0..args.workers {
        let name = format!("worker-{index}");
        let time = ScopedTime::new(scheduler.clone(), Activation::Virtual);
        let events = tx.clone();
        let (worker, attempts, backoff_ms) = (name.clone(), args.attempts, args.backoff_ms);
        let handle = threads.spawn(name.clone(), move || {
            retry_with_backoff(&time, &worker, index + 1, attempts, backoff_ms, &events)
        })?;
        handles.push((name, handle));
    }
    drop(tx);

    let mut timeline = Vec::new();
    if let Err(e) = drive(&scheduler, &rx, &mut timeline) {
        scheduler.reset();
        return Err(e);
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for (name, handle) in handles {
        let outcome = handle
            .join()
            .map_err(|_| CliError::WorkerPanicked(name.clone()))??;
        outcomes.push((name, outcome));
    }
    timeline.extend(rx.try_iter());
    timeline.sort_by(|a, b| (a.at, &a.worker, a.number).cmp(&(b.at, &b.worker, b.number)));

    let metrics = scheduler.metrics().gather_metrics().ok();
    scheduler.reset();
    Ok(DemoReport {
        start,
        timeline,
        outcomes,
        metrics,
    })
}

fn drive(
    scheduler: &Scheduler,
    events: &Receiver<Attempt>,
    timeline: &mut Vec<Attempt>,
) -> Result<(), CliError> {
    loop {
        scheduler.wait_until_frozen_default()?;
        timeline.extend(events.try_iter());
        match scheduler.next_deadline() {
            Some(instant) => {
                debug!(instant, "moving clock to next deadline");
                scheduler.set_time(instant)?;
            }
            None => {
                info!(now = scheduler.now(), "no pending deadlines left");
                return Ok(());
            }
        }
    }
}

fn retry_with_backoff(
    time: &dyn TimeSource,
    worker: &str,
    succeeds_on: u32,
    attempts: u32,
    backoff_ms: u64,
    events: &Sender<Attempt>,
) -> Result<Outcome, TimeError> {
    let mut delay = backoff_ms;
    for number in 1..=attempts {
        let succeeded = number >= succeeds_on;
        let attempt = Attempt {
            at: time.time_millis()?,
            worker: worker.to_owned(),
            number,
            succeeded,
        };
        if let Err(e) = events.send(attempt) {
            debug!(worker, number, "timeline receiver dropped, attempt not recorded: {e}");
        }
        if succeeded {
            return Ok(Outcome::Succeeded { attempts: number });
        }
        if number < attempts {
            time.sleep(Duration::from_millis(delay))?;
            delay = delay.saturating_mul(2);
        }
    }
    Ok(Outcome::GaveUp)
}

fn print_report(report: &DemoReport) {
    println!("virtual clock started at {} ms", report.start);
    for attempt in &report.timeline {
        println!(
            "[+{:>8} ms] {} attempt {} {}",
            attempt.at - report.start,
            attempt.worker,
            attempt.number,
            if attempt.succeeded { "succeeded" } else { "failed" }
        );
    }
    for (worker, outcome) in &report.outcomes {
        match outcome {
            Outcome::Succeeded { attempts } => {
                println!("{worker}: done after {attempts} attempt(s)")
            }
            Outcome::GaveUp => println!("{worker}: gave up"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timewarp_core::source::SystemTimeSource;
    use tracing_test::traced_test;

    fn config() -> TimewarpConfig {
        let mut config = TimewarpConfig::default();
        config.scheduler.freeze_poll_interval_ms = 1;
        config.scheduler.settle_timeout_ms = 5_000;
        config
    }

    fn demo(workers: u32, attempts: u32) -> DemoArgs {
        DemoArgs {
            workers,
            backoff_ms: 100,
            attempts,
            start: Some(1_000),
            metrics: false,
        }
    }

    #[test]
    fn backoff_doubles_on_virtual_time() {
        let report = run_demo(&demo(3, 5), &config()).unwrap();

        let successes: Vec<(u64, &str)> = report
            .timeline
            .iter()
            .filter(|attempt| attempt.succeeded)
            .map(|attempt| (attempt.at, attempt.worker.as_str()))
            .collect();
        assert_eq!(
            successes,
            vec![(1_000, "worker-0"), (1_100, "worker-1"), (1_300, "worker-2")]
        );
        assert_eq!(report.timeline.len(), 6);
        assert_eq!(
            report.outcomes[2],
            ("worker-2".to_string(), Outcome::Succeeded { attempts: 3 })
        );
    }

    #[test]
    fn exhausted_attempts_give_up_without_sleeping() {
        let report = run_demo(&demo(2, 1), &config()).unwrap();
        assert_eq!(report.outcomes[1].1, Outcome::GaveUp);
        assert!(report.timeline.iter().all(|attempt| attempt.at == 1_000));
        assert!(report.metrics.unwrap().contains("timewarp_clock_moves_total 0"));
    }

    #[traced_test]
    #[test]
    fn attempts_survive_a_dropped_timeline() {
        let (tx, rx) = channel::unbounded();
        drop(rx);
        let outcome =
            retry_with_backoff(&SystemTimeSource::new(), "worker-0", 1, 3, 100, &tx).unwrap();
        assert_eq!(outcome, Outcome::Succeeded { attempts: 1 });
        assert!(logs_contain("timeline receiver dropped"));
    }

    #[test]
    fn cli_parses_demo_flags() {
        let cli = Cli::try_parse_from([
            "timewarp",
            "demo",
            "--workers",
            "2",
            "--backoff-ms",
            "50",
            "--start",
            "7",
        ])
        .unwrap();
        match cli.command {
            Commands::Demo(args) => {
                assert_eq!(args.workers, 2);
                assert_eq!(args.backoff_ms, 50);
                assert_eq!(args.attempts, 5);
                assert_eq!(args.start, Some(7));
            }
            Commands::CheckConfig(_) => panic!("parsed the wrong subcommand"),
        }
    }
}
