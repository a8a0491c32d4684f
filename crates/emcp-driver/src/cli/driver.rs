//! Interactive CLI protocol driver.

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use crate::cli::dialect::Dialect;
use crate::cli::session::{CliMode, CliSession};
use crate::error::{DriverError, DriverResult};
use crate::protocol::{ProtocolDriver, Reply, RequestType};
use crate::retry::{connect_with_retry, DriverTimers};
use crate::transport::Transport;

/// [`ProtocolDriver`] over an interactive shell.
///
/// `EditConfig` and `Remove` payloads are newline-separated configuration
/// lines. `Lock` enters configuration mode and `Unlock` leaves it.
pub struct CliDriver {
    device: String,
    session: CliSession,
    timers: DriverTimers,
    connected: bool,
    confirm_pending: bool,
}

impl CliDriver {
    pub fn new(
        device: impl Into<String>,
        transport: Box<dyn Transport>,
        dialect: Dialect,
        timers: DriverTimers,
    ) -> Self {
        Self {
            device: device.into(),
            session: CliSession::new(transport, dialect, timers.operation_timeout),
            timers,
            connected: false,
            confirm_pending: false,
        }
    }

    pub fn mode(&self) -> CliMode {
        self.session.mode()
    }

    fn dialect(&self) -> &Dialect {
        self.session.dialect()
    }

    async fn send_lines(&mut self, lines: &str, negate: bool) -> DriverResult<String> {
        self.session.enter_config().await?;
        let mut output = Vec::new();
        for line in lines.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let command = if negate {
                self.dialect().negate(line)
            } else {
                line.to_string()
            };
            output.push(self.session.send_command(&command).await?);
        }
        Ok(output.join("\n"))
    }

    fn required(&self, command: &Option<String>, what: &str) -> DriverResult<String> {
        command.clone().ok_or_else(|| DriverError::InvalidParams {
            message: format!("dialect '{}' has no {} command", self.dialect().name, what),
        })
    }

    async fn commit(&mut self) -> DriverResult<String> {
        let command = if self.confirm_pending {
            self.required(&self.dialect().confirm, "confirm")?
        } else {
            self.required(&self.dialect().commit, "commit")?
        };
        self.session.enter_config().await?;
        let output = self.session.send_command(&command).await?;
        self.confirm_pending = false;
        self.session.exit_config().await?;
        Ok(output)
    }

    async fn confirmed_commit(&mut self, payload: &str) -> DriverResult<String> {
        let template = self.dialect().confirmed_commit.clone().ok_or_else(|| {
            DriverError::InvalidParams {
                message: format!("dialect '{}' has no confirmed commit", self.dialect().name),
            }
        })?;
        let secs = match payload.trim() {
            "" => self.timers.confirm_window.map(|w| w.as_secs()).unwrap_or(600),
            value => value
                .parse()
                .map_err(|_| DriverError::protocol(format!("bad confirm timeout '{}'", value)))?,
        };
        self.session.enter_config().await?;
        let output = self.session.send_command(&template.render(secs)).await?;
        self.confirm_pending = true;
        Ok(output)
    }

    async fn rollback(&mut self) -> DriverResult<String> {
        let commands = self.dialect().rollback.clone();
        if commands.is_empty() {
            return Err(DriverError::InvalidParams {
                message: format!("dialect '{}' has no rollback", self.dialect().name),
            });
        }
        if self.dialect().rollback_in_config {
            self.session.enter_config().await?;
        } else {
            self.session.force_exit().await?;
        }
        let mut output = Vec::new();
        for command in &commands {
            output.push(self.session.send_command(command).await?);
        }
        self.confirm_pending = false;
        if self.session.mode() == CliMode::Config {
            self.session.force_exit().await?;
        }
        Ok(output.join("\n"))
    }
}

#[async_trait]
impl ProtocolDriver for CliDriver {
    #[instrument(skip(self), fields(device = %self.device))]
    async fn connect(&mut self) -> DriverResult<()> {
        if self.connected {
            return Ok(());
        }
        let timers = self.timers;
        let device = self.device.clone();
        connect_with_retry(&timers, &device, self.session.channel_mut(), |channel| {
            channel.transport_mut().open()
        })
        .await?;

        if let Err(e) = self.session.start().await {
            if let Err(close_err) = self.session.close().await {
                debug!(device = %self.device, error = %close_err, "Closing after failed session start");
            }
            return Err(e);
        }
        info!(device = %self.device, dialect = %self.dialect().name, "CLI session established");
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, request: RequestType, payload: &str) -> DriverResult<Reply> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        let output = match request {
            RequestType::GetConfig => {
                let command = self.dialect().show_config.clone();
                self.session.send_command(&command).await?
            }
            RequestType::EditConfig => self.send_lines(payload, false).await?,
            RequestType::Remove => self.send_lines(payload, true).await?,
            RequestType::Lock => {
                self.session.enter_config().await?;
                String::new()
            }
            RequestType::Unlock => {
                self.session.exit_config().await?;
                String::new()
            }
            RequestType::DiscardChanges => {
                self.session.force_exit().await?;
                String::new()
            }
            RequestType::Validate => match self.dialect().validate.clone() {
                Some(command) => match self.session.send_command(&command).await {
                    Ok(output) => output,
                    Err(DriverError::CommandFailed { output, .. }) => {
                        return Err(DriverError::validation(output))
                    }
                    Err(e) => return Err(e),
                },
                None => {
                    debug!(device = %self.device, "Dialect has no validate command");
                    String::new()
                }
            },
            RequestType::Commit => self.commit().await?,
            RequestType::ConfirmedCommit => self.confirmed_commit(payload).await?,
            RequestType::CancelCommit => self.rollback().await?,
        };
        Ok(Reply::Output(output))
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.connected = false;
        self.confirm_pending = false;
        self.session.close().await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
