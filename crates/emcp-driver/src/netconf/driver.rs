//! NETCONF protocol driver.

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{DriverError, DriverResult};
use crate::netconf::framing::{FrameDecoder, Framing};
use crate::netconf::rpc::{self, ServerHello};
use crate::protocol::{ProtocolDriver, Reply, RequestType};
use crate::retry::{connect_with_retry, DriverTimers};
use crate::transport::Transport;

/// Capabilities the client advertises.
const CLIENT_CAPABILITIES: &[&str] = &[rpc::CAP_BASE_10, rpc::CAP_BASE_11];

/// NETCONF session over a [`Transport`] opened in `netconf` subsystem mode.
pub struct NetconfDriver {
    device: String,
    transport: Box<dyn Transport>,
    timers: DriverTimers,
    required_capabilities: Vec<String>,
    decoder: FrameDecoder,
    next_message_id: u64,
    server: Option<ServerHello>,
    connected: bool,
}

impl NetconfDriver {
    pub fn new(
        device: impl Into<String>,
        transport: Box<dyn Transport>,
        timers: DriverTimers,
        required_capabilities: Vec<String>,
    ) -> Self {
        Self {
            device: device.into(),
            transport,
            timers,
            required_capabilities,
            decoder: FrameDecoder::new(Framing::EndOfMessage),
            next_message_id: 1,
            server: None,
            connected: false,
        }
    }

    /// Capabilities advertised by the server, once connected.
    pub fn server_hello(&self) -> Option<&ServerHello> {
        self.server.as_ref()
    }

    pub fn framing(&self) -> Framing {
        self.decoder.framing()
    }

    fn supports(&self, capability: &str) -> bool {
        self.server
            .as_ref()
            .is_some_and(|hello| hello.supports(capability))
    }

    /// Datastore edits go to: candidate when available, else running.
    fn target(&self) -> &'static str {
        if self.supports(rpc::CAP_CANDIDATE) {
            "candidate"
        } else {
            "running"
        }
    }

    fn check_capabilities(&self, hello: &ServerHello) -> DriverResult<()> {
        let mut required: Vec<&str> = vec![rpc::CAP_BASE_10];
        if self.timers.confirm_window.is_some() {
            required.push(rpc::CAP_CANDIDATE);
            required.push(rpc::CAP_CONFIRMED_COMMIT);
        }
        required.extend(self.required_capabilities.iter().map(String::as_str));

        match required.iter().find(|cap| !hello.supports(cap)) {
            Some(missing) => Err(DriverError::MissingCapability {
                capability: missing.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn read_message(&mut self, deadline: Instant, operation: &str) -> DriverResult<String> {
        loop {
            if let Some(message) = self.decoder.next_message()? {
                return Ok(message);
            }
            match tokio::time::timeout_at(deadline, self.transport.read()).await {
                Ok(chunk) => self.decoder.push(&chunk?),
                Err(_) => {
                    return Err(DriverError::timeout(
                        operation.to_string(),
                        self.timers.operation_timeout,
                    ))
                }
            }
        }
    }

    async fn exchange_hello(&mut self) -> DriverResult<ServerHello> {
        let deadline = Instant::now() + self.timers.operation_timeout;
        let hello_out = rpc::hello(CLIENT_CAPABILITIES);
        self.transport
            .write(&Framing::EndOfMessage.encode(&hello_out))
            .await?;
        let message = self.read_message(deadline, "server hello").await?;
        rpc::parse_hello(&message)
    }

    /// Closes the transport after a failed session setup.
    async fn abandon_transport(&mut self) {
        if let Err(e) = self.transport.close().await {
            debug!(device = %self.device, error = %e, "Closing after failed session setup");
        }
    }

    /// Sends one operation and waits for the reply carrying its message id.
    async fn rpc(&mut self, operation_name: &str, operation: String) -> DriverResult<rpc::RpcReply> {
        if !self.connected {
            return Err(DriverError::NotConnected);
        }
        let message_id = self.next_message_id;
        self.next_message_id += 1;
        let expected_id = message_id.to_string();

        let deadline = Instant::now() + self.timers.operation_timeout;
        let message = rpc::rpc(message_id, &operation);
        let framed = self.decoder.framing().encode(&message);
        match tokio::time::timeout_at(deadline, self.transport.write(&framed)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(DriverError::timeout(
                    operation_name.to_string(),
                    self.timers.operation_timeout,
                ))
            }
        }
        debug!(device = %self.device, message_id, operation = operation_name, "rpc sent");

        loop {
            let message = self.read_message(deadline, operation_name).await?;
            let Some(reply) = rpc::parse_reply(&message)? else {
                debug!(device = %self.device, "Skipping notification");
                continue;
            };
            match reply.message_id.as_deref() {
                Some(id) if id != expected_id => {
                    warn!(device = %self.device, expected = %expected_id, got = id, "Discarding reply to another rpc");
                }
                _ => return reply.into_result(operation_name),
            }
        }
    }
}

#[async_trait]
impl ProtocolDriver for NetconfDriver {
    #[instrument(skip(self), fields(device = %self.device))]
    async fn connect(&mut self) -> DriverResult<()> {
        if self.connected {
            return Ok(());
        }
        let timers = self.timers;
        let device = self.device.clone();
        connect_with_retry(&timers, &device, self.transport.as_mut(), |t| t.open()).await?;

        let hello = match self.exchange_hello().await {
            Ok(hello) => hello,
            Err(e) => {
                self.abandon_transport().await;
                return Err(e);
            }
        };
        if let Err(e) = self.check_capabilities(&hello) {
            self.abandon_transport().await;
            return Err(e);
        }

        if hello.supports(rpc::CAP_BASE_11) {
            self.decoder.set_framing(Framing::Chunked);
        }
        info!(
            device = %self.device,
            session_id = ?hello.session_id,
            framing = ?self.decoder.framing(),
            capabilities = hello.capabilities.len(),
            "NETCONF session established"
        );
        self.server = Some(hello);
        self.connected = true;
        Ok(())
    }

    async fn send(&mut self, request: RequestType, payload: &str) -> DriverResult<Reply> {
        let target = self.target();
        let has_candidate = target == "candidate";
        let operation = match request {
            RequestType::GetConfig => rpc::get_config("running", payload),
            RequestType::EditConfig => rpc::edit_config(target, payload),
            RequestType::Remove => rpc::edit_config(target, &rpc::mark_delete(payload)?),
            RequestType::Lock => rpc::lock(target),
            RequestType::Unlock => rpc::unlock(target),
            RequestType::Validate => {
                if !self.supports(rpc::CAP_VALIDATE) {
                    debug!(device = %self.device, "Device has no :validate, skipping");
                    return Ok(Reply::Ok);
                }
                rpc::validate(target)
            }
            RequestType::DiscardChanges | RequestType::Commit if !has_candidate => {
                debug!(device = %self.device, request = %request, "Edits went to running, nothing to do");
                return Ok(Reply::Ok);
            }
            RequestType::DiscardChanges => rpc::discard_changes(),
            RequestType::Commit => rpc::commit(),
            RequestType::ConfirmedCommit => {
                if !self.supports(rpc::CAP_CONFIRMED_COMMIT) || !has_candidate {
                    return Err(DriverError::MissingCapability {
                        capability: rpc::CAP_CONFIRMED_COMMIT.to_string(),
                    });
                }
                let secs = match payload.trim() {
                    "" => self
                        .timers
                        .confirm_window
                        .map(|w| w.as_secs())
                        .unwrap_or(600),
                    value => value
                        .parse()
                        .map_err(|_| DriverError::protocol(format!("bad confirm timeout '{}'", value)))?,
                };
                rpc::confirmed_commit(secs)
            }
            RequestType::CancelCommit => rpc::cancel_commit(),
        };

        let reply = self.rpc(request.as_str(), operation).await?;
        Ok(match reply.data {
            Some(data) => Reply::Data(data),
            None => Reply::Ok,
        })
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        if self.connected {
            if let Err(e) = self.rpc("close-session", rpc::close_session()).await {
                debug!(device = %self.device, error = %e, "close-session failed");
            }
            self.connected = false;
        }
        self.server = None;
        self.transport.close().await
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
