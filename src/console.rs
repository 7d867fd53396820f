//! Operator console.
//!
//! Collects the command sets of modules and executes command lines against
//! them. Arguments are whitespace-separated and passed to the command
//! handler as `String` values; the handler returns its output as a `String`.

use std::collections::BTreeMap;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;

use crate::chanrpc::{downcast, Args, ServerRef};
use crate::module::CommandSet;
use crate::types::{ConsoleConfig, Error, FunctionId, Result};

const BUILTINS: [(&str, &str); 2] = [("help", "this help text"), ("quit", "exit console")];

#[derive(Debug)]
struct Command {
    help: String,
    server: ServerRef,
}

#[derive(Debug)]
pub struct Console {
    prompt: String,
    commands: BTreeMap<String, Command>,
}

impl Console {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            commands: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &ConsoleConfig) -> Self {
        Self::new(config.prompt.clone())
    }

    /// Add a module's commands. Nothing is added if any name is taken.
    pub fn add(&mut self, set: CommandSet) -> Result<()> {
        for entry in &set.entries {
            let taken = self.commands.contains_key(&entry.name)
                || BUILTINS.iter().any(|(name, _)| *name == entry.name);
            if taken {
                return Err(Error::AlreadyRegistered(FunctionId::from(entry.name.clone())));
            }
        }
        for entry in set.entries {
            self.commands.insert(
                entry.name,
                Command {
                    help: entry.help,
                    server: set.server.clone(),
                },
            );
        }
        Ok(())
    }

    pub fn help(&self) -> String {
        let mut lines: Vec<(&str, &str)> = BUILTINS.to_vec();
        lines.extend(
            self.commands
                .iter()
                .map(|(name, cmd)| (name.as_str(), cmd.help.as_str())),
        );
        lines.sort_by(|a, b| a.0.cmp(b.0));

        let mut out = String::from("Commands:");
        for (name, help) in lines {
            out.push_str(&format!("\n{} - {}", name, help));
        }
        out
    }

    /// Execute one command line. Blank lines yield `None`.
    pub async fn exec_line(&self, line: &str) -> Result<Option<String>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        if name == "help" {
            return Ok(Some(self.help()));
        }

        let command = self
            .commands
            .get(name)
            .ok_or_else(|| Error::NotRegistered(FunctionId::from(name.to_string())))?;
        let args = words.fold(Args::new(), |args, word| args.with(word.to_string()));
        let output = command.server.call1(name.to_string(), args).await?;
        downcast::<String>(output).map(Some)
    }

    /// Line-oriented prompt loop. Ends on `quit`, end of input or `shutdown`.
    pub async fn serve<R, W>(&self, reader: R, mut writer: W, shutdown: &CancellationToken) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            writer.write_all(self.prompt.as_bytes()).await?;
            writer.flush().await?;

            let line = tokio::select! {
                _ = shutdown.cancelled() => break,
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                break;
            };
            if line.trim() == "quit" {
                break;
            }

            let reply = match self.exec_line(&line).await {
                Ok(Some(output)) => output,
                Ok(None) => continue,
                Err(Error::NotRegistered(_)) => {
                    "command not found, try `help` for help".to_string()
                }
                Err(err) => format!("error: {}", err),
            };
            writer.write_all(reply.as_bytes()).await?;
            writer.write_all(b"\n").await?;
        }
        writer.flush().await?;
        Ok(())
    }
}
