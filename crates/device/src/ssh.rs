//! SSH transport for NETCONF sessions.
//!
//! Each connection opens a TCP stream with a bounded connect timeout,
//! authenticates with the configured private key and starts the `netconf`
//! subsystem. Every later read and write is bounded by the same timeout,
//! so a stuck device surfaces as an error instead of hanging the cycle
//! forever.

use crate::client::DeviceConnector;
use crate::error::{DeviceError, DeviceResult};
use crate::netconf::{NetconfSession, NetconfTransport};
use keyserver_core::FleetConfig;
use ssh2::{Channel, Session};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::time::Duration;

/// Opens NETCONF-over-SSH sessions with public-key authentication.
#[derive(Debug, Clone)]
pub struct SshConnector {
    user: String,
    key: PathBuf,
    port: u16,
    timeout: Duration,
}

impl SshConnector {
    pub fn new(user: impl Into<String>, key: impl Into<PathBuf>, port: u16, timeout: Duration) -> Self {
        Self {
            user: user.into(),
            key: key.into(),
            port,
            timeout,
        }
    }

    pub fn from_config(config: &FleetConfig) -> Self {
        Self::new(
            config.user.clone(),
            config.key.clone(),
            config.port,
            config.connect_timeout(),
        )
    }

    fn open_tcp(&self, address: &str) -> DeviceResult<TcpStream> {
        let connect_error = |reason: String| DeviceError::Connect {
            address: address.to_string(),
            reason,
        };

        let candidates = (address, self.port)
            .to_socket_addrs()
            .map_err(|e| connect_error(format!("cannot resolve: {e}")))?;

        let mut last_error = "no addresses resolved".to_string();
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(e) => last_error = format!("{candidate}: {e}"),
            }
        }
        Err(connect_error(last_error))
    }
}

impl DeviceConnector for SshConnector {
    type Session = NetconfSession<SshTransport>;

    fn connect(&self, address: &str) -> DeviceResult<Self::Session> {
        let tcp = self.open_tcp(address)?;

        let mut session = Session::new()?;
        session.set_tcp_stream(tcp);
        session.set_timeout(u32::try_from(self.timeout.as_millis()).unwrap_or(u32::MAX));
        session.handshake()?;

        session
            .userauth_pubkey_file(&self.user, None, &self.key, None)
            .map_err(|e| DeviceError::Auth {
                address: address.to_string(),
                user: self.user.clone(),
                reason: e.to_string(),
            })?;
        if !session.authenticated() {
            return Err(DeviceError::Auth {
                address: address.to_string(),
                user: self.user.clone(),
                reason: "server did not accept the key".to_string(),
            });
        }

        let mut channel = session.channel_session()?;
        channel.subsystem("netconf")?;

        tracing::debug!(device = %address, port = self.port, "ssh netconf subsystem started");

        NetconfSession::establish(address, SshTransport { channel })
    }
}

/// SSH channel running the `netconf` subsystem.
pub struct SshTransport {
    // the channel holds its own handle on the libssh2 session
    channel: Channel,
}

impl Read for SshTransport {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.channel.read(buf)
    }
}

impl Write for SshTransport {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.channel.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.channel.flush()
    }
}

impl NetconfTransport for SshTransport {
    fn shutdown(&mut self) -> DeviceResult<()> {
        self.channel.send_eof()?;
        self.channel.close()?;
        self.channel.wait_close()?;
        Ok(())
    }
}
