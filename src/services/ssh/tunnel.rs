//! SSH tunnel session using an in-process SSH client.
//!
//! One authenticated session is opened per run. Every database connection
//! then gets its own direct-tcpip channel multiplexed over that session, so
//! there is no local port forwarding process to manage.

use super::keys::{PassphraseCache, load_private_key};
use super::types::{SshAuthMethod, SshTunnelConfig};
use crate::error::TunnelError;
use async_trait::async_trait;
use russh::client::{self, Handle, Msg};
use russh::{ChannelMsg, ChannelStream, Disconnect};
use russh_keys::key;
use std::sync::Arc;

/// Accepts whatever host key the server presents.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        tracing::debug!(
            fingerprint = %server_public_key.fingerprint(),
            "Accepting SSH host key without verification"
        );
        Ok(true)
    }
}

/// An authenticated SSH session that can open streams to remote addresses.
pub struct SshTunnel {
    config: SshTunnelConfig,
    handle: Handle<AcceptAnyHostKey>,
}

impl SshTunnel {
    /// Connect to the SSH server and authenticate with the first method that
    /// the server accepts.
    ///
    /// Must run on the multi-threaded runtime: loading an encrypted key may
    /// block on a passphrase prompt.
    pub async fn connect(
        config: SshTunnelConfig,
        passphrases: &PassphraseCache,
    ) -> Result<Self, TunnelError> {
        let addr = config.addr();
        tracing::info!("Connecting to SSH host {}", config.ssh_url());

        let client_config = Arc::new(client::Config::default());
        let mut handle = client::connect(
            client_config,
            (config.ssh_host.as_str(), config.ssh_port),
            AcceptAnyHostKey,
        )
        .await
        .map_err(|source| TunnelError::Unreachable {
            addr: addr.clone(),
            source,
        })?;

        for method in config.auth_methods() {
            tracing::debug!("Trying SSH auth method: {}", method.label());
            let accepted = match method {
                SshAuthMethod::Agent => {
                    authenticate_with_agent(&mut handle, &config.ssh_user).await
                }
                // May prompt on the terminal; keep that off the async workers.
                SshAuthMethod::PrivateKey(path) => match tokio::task::block_in_place(|| {
                    load_private_key(path, passphrases)
                })? {
                    Some(key) => handle
                        .authenticate_publickey(config.ssh_user.as_str(), Arc::new(key))
                        .await
                        .map_err(|source| TunnelError::Unreachable {
                            addr: addr.clone(),
                            source,
                        })?,
                    None => false,
                },
                SshAuthMethod::Password(password) => handle
                    .authenticate_password(config.ssh_user.as_str(), password.as_str())
                    .await
                    .map_err(|source| TunnelError::Unreachable {
                        addr: addr.clone(),
                        source,
                    })?,
            };

            if accepted {
                tracing::info!(
                    "SSH tunnel established to {} ({})",
                    config.ssh_url(),
                    method.label()
                );
                return Ok(Self { config, handle });
            }
        }

        Err(TunnelError::AuthenticationExhausted {
            user: config.ssh_user.clone(),
            addr,
        })
    }

    /// Open a byte stream to `addr` (host:port, as seen from the SSH server).
    ///
    /// Safe to call from many tasks at once; each call gets its own channel.
    pub async fn dial(&self, addr: &str) -> Result<ChannelStream<Msg>, TunnelError> {
        let (host, port) = split_host_port(addr)?;
        let channel = self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
            .map_err(|e| match e {
                russh::Error::Disconnect | russh::Error::SendError => {
                    TunnelError::SessionClosed {
                        addr: addr.to_string(),
                    }
                }
                other => TunnelError::Dial {
                    addr: addr.to_string(),
                    reason: other.to_string(),
                },
            })?;
        tracing::debug!("Opened tunnel channel to {}", addr);
        Ok(channel.into_stream())
    }

    /// Run a command on the SSH server and return what it wrote to stdout.
    pub async fn run_command(&self, command: &str) -> Result<Vec<u8>, TunnelError> {
        let command_error = |source| TunnelError::Command {
            command: command.to_string(),
            source,
        };

        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(command_error)?;
        channel.exec(true, command).await.map_err(command_error)?;

        let mut stdout = Vec::new();
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status } if exit_status != 0 => {
                    tracing::debug!("`{}` exited with status {}", command, exit_status);
                }
                _ => {}
            }
        }

        Ok(stdout)
    }

    pub fn config(&self) -> &SshTunnelConfig {
        &self.config
    }

    /// Close the session politely. Dropping the tunnel also closes it.
    pub async fn shutdown(&self) {
        tracing::debug!("Shutting down SSH tunnel to {}", self.config.ssh_url());
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "", "en")
            .await
        {
            tracing::debug!("SSH disconnect failed: {}", e);
        }
    }
}

#[cfg(unix)]
async fn authenticate_with_agent(handle: &mut Handle<AcceptAnyHostKey>, user: &str) -> bool {
    use russh_keys::agent::client::AgentClient;

    let mut agent = match AgentClient::connect_env().await {
        Ok(agent) => agent,
        Err(e) => {
            tracing::debug!("ssh-agent not reachable: {}", e);
            return false;
        }
    };

    let identities = match agent.request_identities().await {
        Ok(identities) => identities,
        Err(e) => {
            tracing::debug!("ssh-agent refused to list identities: {}", e);
            return false;
        }
    };

    for identity in identities {
        let (returned, result) = handle.authenticate_future(user, identity, agent).await;
        agent = returned;
        match result {
            Ok(true) => return true,
            Ok(false) => {}
            Err(e) => tracing::debug!("ssh-agent signing failed: {:?}", e),
        }
    }

    false
}

#[cfg(not(unix))]
async fn authenticate_with_agent(_handle: &mut Handle<AcceptAnyHostKey>, _user: &str) -> bool {
    tracing::debug!("ssh-agent authentication is only supported on Unix");
    false
}

/// Split `host:port`, accepting bracketed IPv6 hosts.
fn split_host_port(addr: &str) -> Result<(&str, u16), TunnelError> {
    let bad = || TunnelError::BadAddress(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(bad)?;
    let host = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if host.is_empty() {
        return Err(bad());
    }
    let port = port.parse().map_err(|_| bad())?;
    Ok((host, port))
}
