//! Module lifecycle host.
//!
//! Modules are initialised in registration order, run concurrently, and
//! destroyed in reverse registration order.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::recovery::extract_panic_message;
use crate::types::{Error, Result};

/// A unit of the application with its own event loop.
#[async_trait]
pub trait Module: Send + 'static {
    fn name(&self) -> &str;

    /// Called before any module runs, in registration order.
    async fn on_init(&mut self) -> Result<()> {
        Ok(())
    }

    /// Serve until `shutdown` is cancelled.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<()>;

    /// Called after `run` returned, in reverse registration order.
    async fn on_destroy(&mut self) -> Result<()> {
        Ok(())
    }
}

type RunOutcome = (Box<dyn Module>, Result<()>);

struct Running {
    name: String,
    shutdown: CancellationToken,
    task: JoinHandle<RunOutcome>,
}

/// Starts and stops a set of modules.
pub struct ModuleHost {
    pending: Vec<Box<dyn Module>>,
    running: Vec<Running>,
}

impl std::fmt::Debug for ModuleHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let running: Vec<&str> = self.running.iter().map(|r| r.name.as_str()).collect();
        f.debug_struct("ModuleHost")
            .field("pending", &self.pending.len())
            .field("running", &running)
            .finish()
    }
}

impl Default for ModuleHost {
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleHost {
    pub fn new() -> Self {
        Self {
            pending: Vec::new(),
            running: Vec::new(),
        }
    }

    pub fn register(&mut self, module: impl Module) {
        self.pending.push(Box::new(module));
    }

    /// Names of running modules, in start order.
    pub fn running(&self) -> Vec<&str> {
        self.running.iter().map(|r| r.name.as_str()).collect()
    }

    /// Initialise every registered module, then spawn their loops.
    ///
    /// If any `on_init` fails nothing is spawned and the error is returned.
    pub async fn start(&mut self) -> Result<()> {
        for module in self.pending.iter_mut() {
            if let Err(err) = module.on_init().await {
                tracing::error!(module = module.name(), "module_init_failed: {}", err);
                return Err(err);
            }
        }

        for mut module in self.pending.drain(..) {
            let name = module.name().to_string();
            let shutdown = CancellationToken::new();
            let token = shutdown.clone();
            let task = tokio::spawn(async move {
                let outcome = AssertUnwindSafe(module.run(token)).catch_unwind().await;
                (module, flatten_panic(outcome))
            });
            tracing::info!(module = %name, "module_spawned");
            self.running.push(Running {
                name,
                shutdown,
                task,
            });
        }
        Ok(())
    }

    /// Stop modules in reverse start order. A failing module does not
    /// prevent the others from stopping.
    pub async fn shutdown(&mut self) {
        while let Some(Running {
            name,
            shutdown,
            task,
        }) = self.running.pop()
        {
            shutdown.cancel();
            let mut module = match task.await {
                Ok((module, Ok(()))) => module,
                Ok((module, Err(err))) => {
                    tracing::error!(module = %name, "module_run_failed: {}", err);
                    module
                }
                Err(err) => {
                    tracing::error!(module = %name, "module_task_failed: {}", err);
                    continue;
                }
            };

            let destroyed = AssertUnwindSafe(module.on_destroy()).catch_unwind().await;
            if let Err(err) = flatten_panic(destroyed) {
                tracing::error!(module = %name, "module_destroy_failed: {}", err);
            }
            tracing::info!(module = %name, "module_stopped");
        }
    }

    /// Start, wait for `signal`, then shut down.
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        self.start().await?;
        signal.await;
        self.shutdown().await;
        Ok(())
    }

    /// Start, wait for Ctrl-C, then shut down.
    pub async fn run_until_ctrl_c(&mut self) -> Result<()> {
        self.run_until(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => tracing::info!("shutdown_signal_received"),
                Err(err) => tracing::error!("ctrl_c_listener_failed: {}", err),
            }
        })
        .await
    }
}

fn flatten_panic(
    outcome: std::result::Result<Result<()>, Box<dyn std::any::Any + Send>>,
) -> Result<()> {
    match outcome {
        Ok(result) => result,
        Err(payload) => Err(Error::fault(extract_panic_message(payload.as_ref()), None)),
    }
}
