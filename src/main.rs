//! chanrpc demo node - main entry point.
//!
//! Runs two modules:
//! - gate: produces `Hello` messages and routes them to the game module
//! - game: greets senders, exposes a `stats` console command, logs a heartbeat
//!
//! Commands are read from stdin until `quit` or Ctrl-C.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use tokio::io::BufReader;
use tokio_util::sync::CancellationToken;

use chanrpc::chanrpc::{Args, Handler};
use chanrpc::console::Console;
use chanrpc::module::{Module, ModuleHost, Skeleton};
use chanrpc::router::MessageRouter;
use chanrpc::timer::Every;
use chanrpc::{Config, FunctionId, Result};

#[derive(Parser)]
#[command(name = "chanrpc-node", about = "Demo node running chanrpc modules")]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, env = "CHANRPC_CONFIG")]
    config: Option<PathBuf>,

    /// Interval between generated Hello messages
    #[arg(long, default_value = "2s", value_parser = humantime_serde::re::humantime::parse_duration)]
    hello_every: Duration,

    /// Do not read console commands from stdin
    #[arg(long)]
    no_console: bool,
}

#[derive(Debug)]
struct Hello {
    name: String,
}

#[derive(Debug)]
struct Agent {
    id: u64,
}

struct Game {
    skeleton: Skeleton,
}

impl Game {
    fn new(config: &Config) -> Result<Self> {
        let mut skeleton = Skeleton::new("game", &config.module);
        let ctx = skeleton.context();
        let greeted = Arc::new(AtomicU64::new(0));

        let counter = Arc::clone(&greeted);
        skeleton.register_chanrpc(
            FunctionId::of::<Hello>(),
            Handler::no_return(move |mut args: Args| {
                let hello = args.take::<Hello>(0)?;
                let agent = args.take::<Agent>(1)?;
                counter.fetch_add(1, Ordering::Relaxed);
                let name = hello.name;
                ctx.go(
                    move || format!("welcome, {}", name),
                    move |greeting| match greeting {
                        Ok(greeting) => tracing::info!(agent = agent.id, "{}", greeting),
                        Err(err) => tracing::warn!(agent = agent.id, "greeting failed: {}", err),
                    },
                )
            }),
        )?;

        let counter = Arc::clone(&greeted);
        skeleton.register_command(
            "stats",
            "show how many players were greeted",
            Handler::single(move |_| Ok(format!("greeted: {}", counter.load(Ordering::Relaxed)))),
        )?;

        let counter = Arc::clone(&greeted);
        skeleton.schedule(Every(Duration::from_secs(30)), move || {
            tracing::info!(greeted = counter.load(Ordering::Relaxed), "game_heartbeat");
        })?;

        Ok(Self { skeleton })
    }
}

#[async_trait]
impl Module for Game {
    fn name(&self) -> &str {
        self.skeleton.name()
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        self.skeleton.run(&shutdown).await
    }
}

struct Gate {
    router: MessageRouter,
    every: Duration,
}

#[async_trait]
impl Module for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<()> {
        let mut ticker = tokio::time::interval(self.every);
        let mut next_id = 0u64;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    next_id += 1;
                    let hello = Hello { name: format!("player-{}", next_id) };
                    self.router.route(hello, Agent { id: next_id }).await?;
                }
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Load configuration
    let config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };

    // Initialize observability
    chanrpc::observability::init_tracing(&config.observability);
    chanrpc::recovery::capture_traces(config.fault.trace_bytes);

    let game = Game::new(&config)?;
    let mut router = MessageRouter::new();
    router.set_route::<Hello>(game.skeleton.server_ref())?;

    let mut console = Console::from_config(&config.console);
    console.add(game.skeleton.command_set())?;

    let mut host = ModuleHost::new();
    host.register(Gate {
        router,
        every: cli.hello_every,
    });
    host.register(game);

    let stop = CancellationToken::new();
    if config.console.enabled && !cli.no_console {
        let token = stop.clone();
        tokio::spawn(async move {
            let stdin = BufReader::new(tokio::io::stdin());
            if let Err(err) = console.serve(stdin, tokio::io::stdout(), &token).await {
                tracing::warn!("console stopped: {}", err);
            }
            // Leaving the console stops the node.
            token.cancel();
        });
    }

    tracing::info!("chanrpc node starting");
    let signal = stop.clone();
    host.run_until(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => tracing::info!("shutdown_signal_received"),
                Err(err) => tracing::error!("ctrl_c_listener_failed: {}", err),
            },
            _ = signal.cancelled() => {}
        }
    })
    .await?;
    stop.cancel();
    Ok(())
}
