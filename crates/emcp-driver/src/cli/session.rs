//! Interactive CLI session: prompt tracking and configuration mode.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, trace, warn};

use crate::channel::PromptChannel;
use crate::cli::dialect::Dialect;
use crate::error::{DriverError, DriverResult};
use crate::protocol::DriverCommand;
use crate::transport::Transport;

/// Where the session currently sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliMode {
    Exec,
    Config,
}

/// A logged-in CLI session speaking one [`Dialect`].
pub struct CliSession {
    channel: PromptChannel,
    dialect: Dialect,
    timeout: Duration,
    mode: CliMode,
}

impl CliSession {
    pub fn new(transport: Box<dyn Transport>, dialect: Dialect, timeout: Duration) -> Self {
        Self {
            channel: PromptChannel::new(transport),
            dialect,
            timeout,
            mode: CliMode::Exec,
        }
    }

    pub fn dialect(&self) -> &Dialect {
        &self.dialect
    }

    pub fn mode(&self) -> CliMode {
        self.mode
    }

    pub fn channel_mut(&mut self) -> &mut PromptChannel {
        &mut self.channel
    }

    /// Waits for the first prompt after login and runs the dialect's
    /// on-open commands.
    pub async fn start(&mut self) -> DriverResult<()> {
        let banner = self
            .channel
            .read_until(&self.dialect.any_prompt, self.timeout)
            .await?;
        self.track_mode(&banner);
        trace!(dialect = %self.dialect.name, banner = %banner, "Initial prompt");

        for command in self.dialect.on_open.clone() {
            self.send_command(&command).await?;
        }
        Ok(())
    }

    fn track_mode(&mut self, output: &str) {
        let tail = output.lines().last().unwrap_or("");
        self.mode = if self.dialect.is_config_prompt(tail) {
            CliMode::Config
        } else {
            CliMode::Exec
        };
    }

    /// Sends one line and returns its output without echo or prompt.
    ///
    /// Output matching the dialect's error patterns fails the command. In
    /// configuration mode the session is force-exited before the error is
    /// returned.
    pub async fn send_command(&mut self, command: &str) -> DriverResult<String> {
        let raw = self.exchange(command, None).await?;
        let output = strip_echo_and_prompt(&raw, command);

        if let Some(line) = self.dialect.find_error(&output) {
            let err = DriverError::CommandFailed {
                command: command.to_string(),
                output: line.trim().to_string(),
            };
            if self.mode == CliMode::Config {
                warn!(dialect = %self.dialect.name, command, error = %err, "Error in configuration mode, leaving");
                if let Err(exit_err) = self.force_exit().await {
                    warn!(error = %exit_err, "Forced exit from configuration mode failed");
                }
            }
            return Err(err);
        }
        Ok(output)
    }

    /// Runs a scripted exchange, stopping at the first failing step.
    pub async fn run_commands(&mut self, commands: &[DriverCommand]) -> DriverResult<Vec<String>> {
        let mut outputs = Vec::with_capacity(commands.len());
        for command in commands {
            let output = match &command.expect {
                None => self.send_command(&command.payload).await?,
                Some(pattern) => {
                    let raw = self.exchange(&command.payload, Some(pattern)).await?;
                    strip_echo_and_prompt(&raw, &command.payload)
                }
            };
            outputs.push(output);
        }
        Ok(outputs)
    }

    /// Writes `command` and reads through `expect` (any prompt by default),
    /// answering a save prompt with the dialect's "no" on the way.
    async fn exchange(&mut self, command: &str, expect: Option<&Regex>) -> DriverResult<String> {
        self.channel.write_line(command).await?;
        let pattern = expect.unwrap_or(&self.dialect.any_prompt).clone();
        let mut output = self.channel.read_until(&pattern, self.timeout).await?;

        if expect.is_none() && self.dialect.is_save_prompt(&output) {
            debug!(dialect = %self.dialect.name, answer = %self.dialect.save_answer, "Answering save prompt");
            self.channel.write_line(&self.dialect.save_answer).await?;
            let rest = self
                .channel
                .read_until(&self.dialect.any_prompt, self.timeout)
                .await?;
            output.push_str(&rest);
        }
        self.track_mode(&output);
        Ok(output)
    }

    pub async fn enter_config(&mut self) -> DriverResult<()> {
        if self.mode == CliMode::Config {
            return Ok(());
        }
        let command = self.dialect.enter_config.clone();
        self.send_command(&command).await?;
        if self.mode != CliMode::Config {
            return Err(DriverError::protocol(format!(
                "'{}' did not reach configuration mode",
                command
            )));
        }
        Ok(())
    }

    /// Leaves configuration mode normally (changes already committed).
    pub async fn exit_config(&mut self) -> DriverResult<()> {
        if self.mode == CliMode::Exec {
            return Ok(());
        }
        let command = self.dialect.exit_config.clone();
        self.send_command(&command).await?;
        Ok(())
    }

    /// Abandons uncommitted changes and returns to exec mode.
    ///
    /// Errors in the abort sequence itself are not re-checked against the
    /// error patterns; the goal is only to get back to exec mode.
    pub async fn force_exit(&mut self) -> DriverResult<()> {
        for command in self.dialect.abort.clone() {
            if self.mode == CliMode::Exec {
                break;
            }
            self.exchange(&command, None).await?;
        }
        if self.mode == CliMode::Config {
            let command = self.dialect.exit_config.clone();
            self.exchange(&command, None).await?;
        }
        if self.mode == CliMode::Config {
            return Err(DriverError::protocol("still in configuration mode after abort"));
        }
        Ok(())
    }

    pub async fn close(&mut self) -> DriverResult<()> {
        if self.mode == CliMode::Config {
            if let Err(e) = self.force_exit().await {
                warn!(error = %e, "Could not leave configuration mode before closing");
            }
        }
        self.channel.transport_mut().close().await
    }
}

/// Drops the echoed command line and the trailing prompt line.
fn strip_echo_and_prompt(raw: &str, command: &str) -> String {
    let normalized = raw.replace("\r\n", "\n").replace('\r', "");
    let mut lines: Vec<&str> = normalized.lines().collect();
    if lines.first().is_some_and(|first| first.trim_end().ends_with(command.trim())) {
        lines.remove(0);
    }
    lines.pop();
    lines.join("\n").trim_end().to_string()
}
