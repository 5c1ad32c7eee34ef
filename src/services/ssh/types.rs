//! SSH tunnel configuration types.

use std::path::PathBuf;

/// Authentication method for SSH connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SshAuthMethod {
    /// Identities offered by the local ssh-agent (`SSH_AUTH_SOCK`)
    Agent,
    /// Private key file, decrypted with a prompted passphrase when needed
    PrivateKey(PathBuf),
    /// Password authentication
    Password(String),
}

impl SshAuthMethod {
    /// Position in the order methods are attempted (lower goes first)
    pub fn precedence(&self) -> u8 {
        match self {
            SshAuthMethod::Agent => 0,
            SshAuthMethod::PrivateKey(_) => 1,
            SshAuthMethod::Password(_) => 2,
        }
    }

    /// Short name used in logs; never includes secrets
    pub fn label(&self) -> &'static str {
        match self {
            SshAuthMethod::Agent => "agent",
            SshAuthMethod::PrivateKey(_) => "publickey",
            SshAuthMethod::Password(_) => "password",
        }
    }
}

/// Configuration for an SSH tunnel session
#[derive(Debug, Clone)]
pub struct SshTunnelConfig {
    /// SSH server hostname
    pub ssh_host: String,
    /// SSH server port (default: 22)
    pub ssh_port: u16,
    /// SSH username
    pub ssh_user: String,
    /// Authentication methods, kept sorted by precedence
    auth_methods: Vec<SshAuthMethod>,
}

impl SshTunnelConfig {
    pub fn new(
        ssh_host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        auth_methods: Vec<SshAuthMethod>,
    ) -> Self {
        let mut auth_methods = auth_methods;
        auth_methods.sort_by_key(SshAuthMethod::precedence);
        Self {
            ssh_host: ssh_host.into(),
            ssh_port,
            ssh_user: ssh_user.into(),
            auth_methods,
        }
    }

    /// Agent first, then the key file, then the password if one is non-empty.
    pub fn with_default_methods(
        ssh_host: impl Into<String>,
        ssh_port: u16,
        ssh_user: impl Into<String>,
        private_key_path: impl Into<PathBuf>,
        password: Option<String>,
    ) -> Self {
        let mut methods = vec![
            SshAuthMethod::Agent,
            SshAuthMethod::PrivateKey(private_key_path.into()),
        ];
        if let Some(password) = password.filter(|p| !p.is_empty()) {
            methods.push(SshAuthMethod::Password(password));
        }
        Self::new(ssh_host, ssh_port, ssh_user, methods)
    }

    pub fn auth_methods(&self) -> &[SshAuthMethod] {
        &self.auth_methods
    }

    /// Address of the SSH server (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ssh_host, self.ssh_port)
    }

    /// Build the SSH URL (user@host)
    pub fn ssh_url(&self) -> String {
        if self.ssh_user.is_empty() {
            self.ssh_host.clone()
        } else {
            format!("{}@{}", self.ssh_user, self.ssh_host)
        }
    }
}
