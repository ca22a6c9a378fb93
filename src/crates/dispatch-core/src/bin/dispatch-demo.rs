//! # dispatch-demo
//!
//! Small driver exercising the dispatch runtime end to end.

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use dispatch_core::{action, load_config_file, DispatchConfig, DispatchRuntime, State};
use dispatch_sequence::{Context, Interleave, Jump, Latch, Memoize, Next, Runner, Sequence};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "dispatch-demo")]
#[command(about = "Drive the action dispatch runtime through sample scenarios", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file (YAML or JSON)
    #[arg(short, long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Prefix of environment variables overriding the configuration
    #[arg(long, default_value = "DISPATCH")]
    env_prefix: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply an action that chains two asynchronous increments
    Counter {
        /// Starting value
        #[arg(short, long, default_value_t = 0)]
        start: i64,
    },

    /// Apply actions while stopped, then resume
    Pause {
        /// Number of actions applied while stopped
        #[arg(short, long, default_value_t = 3)]
        actions: u32,
    },

    /// Run a continuation pipeline with a memoized step and a jump
    Pipeline {
        /// Number of times the pipeline is started
        #[arg(short, long, default_value_t = 2)]
        runs: usize,
    },
}

/// Observer the machine reports to; held weakly by the machine
struct Console;

impl Console {
    fn show(&self, what: &str, value: i64) {
        println!("{:>10}: {}", what, value);
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => load_config_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => DispatchConfig::default(),
    }
    .with_env_overrides(&cli.env_prefix)?;

    match cli.command {
        Commands::Counter { start } => counter(config, start),
        Commands::Pause { actions } => pause(config, actions),
        Commands::Pipeline { runs } => pipeline(runs),
    }
}

type Tally = State<i64, Console>;

fn add(label: &'static str, n: i64) -> impl dispatch_core::Action<i64, Console> {
    action(move |state: Tally, console: &Console| {
        let state = state.map(|v| v + n);
        console.show(label, *state.value());
        Ok(state)
    })
}

fn counter(config: DispatchConfig, start: i64) -> anyhow::Result<()> {
    let runtime = DispatchRuntime::from_config(config)?;
    let console = Arc::new(Console);
    let machine = runtime.machine(Tally::new(start)).bind(runtime.worker(), &console);

    machine.start();
    machine.apply(action(|state: Tally, console: &Console| {
        let state = state
            .map(|v| v + 1)
            .spawn(|| {
                std::thread::sleep(Duration::from_millis(20));
                Ok(add("+10", 10))
            })
            .spawn(|| Ok(add("+100", 100)));
        console.show("+1", *state.value());
        Ok(state)
    }));

    runtime.settle(&machine.machine().backlog());
    println!("final: {}", machine.peek());
    runtime.shutdown(Duration::from_secs(1));
    Ok(())
}

fn pause(config: DispatchConfig, actions: u32) -> anyhow::Result<()> {
    let runtime = DispatchRuntime::from_config(config)?;
    let console = Arc::new(Console);
    let machine = runtime.machine(Tally::new(0)).bind(runtime.worker(), &console);

    for _ in 0..actions {
        machine.apply(add("deferred", 5));
    }
    runtime.settle(&machine.machine().backlog());
    println!("while stopped: {} ({} queued)", machine.peek(), machine.state().pending());

    machine.start();
    machine.start();
    println!("after start: {}", machine.peek());
    runtime.shutdown(Duration::from_secs(1));
    Ok(())
}

fn pipeline(runs: usize) -> anyhow::Result<()> {
    let runner = Interleave::new(Context::serial("demo-worker"), Context::serial("demo-main"));
    let memo = Memoize::new();
    let jump = Jump::new();
    let loads = Arc::new(AtomicUsize::new(0));
    let resets = Arc::new(AtomicUsize::new(0));

    let counter = loads.clone();
    let reset = resets.clone();
    let sequence = Sequence::of(runner.apply(memo.label("deck", move |(), next: Next<Vec<u8>>| {
        counter.fetch_add(1, Ordering::SeqCst);
        next.resume((1..=13).collect());
    })))
    .pipe(jump.label("shuffle", |deck: Vec<u8>, next: Next<Vec<u8>>| {
        next.resume(deck.into_iter().rev().collect());
    }))
    .pipe(jump.apply(move |deck: Vec<u8>, next: Next<u8>| {
        // First pass of every run asks for a reshuffle.
        if reset.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
            next.jump("shuffle");
        } else {
            next.resume(deck[0]);
        }
    }));

    for run in 0..runs {
        let done = Arc::new(Latch::new());
        let publish = done.clone();
        sequence.begin_with(runner.run(Next::new(move |top: u8| {
            let _ = publish.set(top);
        })));
        let top = done
            .wait_timeout(Duration::from_secs(5))?
            .context("pipeline did not finish")?;
        println!("run {}: top card {}", run, top);
    }

    println!(
        "deck loaded {} time(s), {} shuffle step(s)",
        loads.load(Ordering::SeqCst),
        resets.load(Ordering::SeqCst)
    );
    Ok(())
}
