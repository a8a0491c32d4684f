//! Byte transports underneath the protocol drivers.
//!
//! [`SshTransport`] carries both protocols: an interactive PTY shell for CLI
//! devices and the `netconf` subsystem for NETCONF devices.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{Channel, ChannelMsg, Disconnect};
use tracing::{debug, info, warn};

use crate::error::{DriverError, DriverResult};

/// A bidirectional byte stream to one device.
#[async_trait]
pub trait Transport: Send {
    /// Establishes the connection. Authentication failure is
    /// [`DriverError::AuthRejected`]; anything below that is
    /// [`DriverError::Unreachable`].
    async fn open(&mut self) -> DriverResult<()>;

    async fn write(&mut self, data: &[u8]) -> DriverResult<()>;

    /// Waits for the next chunk of data. Returns [`DriverError::Closed`] once
    /// the peer has closed the channel.
    async fn read(&mut self) -> DriverResult<Vec<u8>>;

    /// Closes the connection. Calling it on a closed transport is a no-op.
    async fn close(&mut self) -> DriverResult<()>;

    fn is_open(&self) -> bool;
}

/// What to run on the SSH channel once it is open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshMode {
    /// PTY plus interactive shell
    Shell,
    /// Named subsystem, e.g. `netconf`
    Subsystem(String),
}

/// SSH login parameters.
#[derive(Debug, Clone)]
pub struct SshParams {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub mode: SshMode,
    /// Bound on TCP connect plus key exchange
    pub connect_timeout: Duration,
}

/// Host key policy: keys are accepted and logged, inventory does not carry
/// known host keys.
struct KnownHostsPolicy {
    host: String,
}

impl client::Handler for KnownHostsPolicy {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::ssh_key::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            host = %self.host,
            algorithm = ?server_public_key.algorithm(),
            "Accepting server host key"
        );
        Ok(true)
    }
}

/// [`Transport`] over an SSH session channel.
pub struct SshTransport {
    params: SshParams,
    session: Option<Handle<KnownHostsPolicy>>,
    channel: Option<Channel<Msg>>,
}

impl SshTransport {
    pub fn new(params: SshParams) -> Self {
        Self {
            params,
            session: None,
            channel: None,
        }
    }

    async fn handshake(&self) -> DriverResult<Handle<KnownHostsPolicy>> {
        let config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(3600)),
            ..Default::default()
        });
        let handler = KnownHostsPolicy {
            host: self.params.host.clone(),
        };
        let addr = (self.params.host.as_str(), self.params.port);

        match tokio::time::timeout(
            self.params.connect_timeout,
            client::connect(config, addr, handler),
        )
        .await
        {
            Ok(Ok(session)) => Ok(session),
            Ok(Err(e)) => Err(DriverError::unreachable(&self.params.host, e.to_string())),
            Err(_) => Err(DriverError::unreachable(
                &self.params.host,
                format!("no answer within {:?}", self.params.connect_timeout),
            )),
        }
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&mut self) -> DriverResult<()> {
        if self.channel.is_some() {
            return Ok(());
        }
        let params = &self.params;
        let mut session = self.handshake().await?;

        let auth = session
            .authenticate_password(params.username.clone(), params.password.clone())
            .await
            .map_err(|e| DriverError::unreachable(&params.host, e.to_string()))?;
        if !auth.success() {
            return Err(DriverError::AuthRejected {
                host: params.host.clone(),
                user: params.username.clone(),
            });
        }

        let channel = session.channel_open_session().await?;
        match &params.mode {
            SshMode::Shell => {
                channel
                    .request_pty(true, "vt100", 511, 24, 0, 0, &[])
                    .await?;
                channel.request_shell(true).await?;
            }
            SshMode::Subsystem(name) => {
                channel.request_subsystem(true, name.as_str()).await?;
            }
        }

        info!(
            host = %params.host,
            port = params.port,
            mode = ?params.mode,
            "SSH channel open"
        );
        self.session = Some(session);
        self.channel = Some(channel);
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> DriverResult<()> {
        let channel = self.channel.as_mut().ok_or(DriverError::NotConnected)?;
        channel.data(data).await?;
        Ok(())
    }

    async fn read(&mut self) -> DriverResult<Vec<u8>> {
        let channel = self.channel.as_mut().ok_or(DriverError::NotConnected)?;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => return Ok(data.to_vec()),
                Some(ChannelMsg::ExtendedData { data, .. }) => return Ok(data.to_vec()),
                Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => {
                    return Err(DriverError::Closed)
                }
                Some(other) => debug!(host = %self.params.host, msg = ?other, "Ignoring channel message"),
            }
        }
    }

    async fn close(&mut self) -> DriverResult<()> {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.eof().await {
                debug!(host = %self.params.host, error = %e, "EOF on close failed");
            }
        }
        if let Some(session) = self.session.take() {
            if let Err(e) = session
                .disconnect(Disconnect::ByApplication, "", "English")
                .await
            {
                warn!(host = %self.params.host, error = %e, "SSH disconnect failed");
            }
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.channel.is_some()
    }
}
