//! Lookups in OpenSSH client config files (`~/.ssh/config`).
//!
//! Parsing and `Host` pattern matching are left to `ssh2-config`; only the
//! keys needed to open a tunnel are kept.

use ssh2_config::{HostParams, ParseRule, SshConfig};
use std::io::BufRead;
use std::path::Path;

/// Settings from the client config that apply to one host alias.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshHostEntry {
    pub host_name: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub identity_file: Option<String>,
}

impl SshHostEntry {
    /// Look up `alias` in the config file at `path`. A missing or unparsable
    /// file yields an empty entry.
    pub fn load(path: &Path, alias: &str) -> Self {
        match std::fs::File::open(path) {
            Ok(file) => Self::read(&mut std::io::BufReader::new(file), alias, path),
            Err(e) => {
                tracing::debug!("Skipping SSH config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn parse(contents: &str, alias: &str) -> Self {
        Self::read(&mut contents.as_bytes(), alias, Path::new("<memory>"))
    }

    fn read(reader: &mut impl BufRead, alias: &str, origin: &Path) -> Self {
        let rules = ParseRule::ALLOW_UNKNOWN_FIELDS | ParseRule::ALLOW_UNSUPPORTED_FIELDS;
        match SshConfig::default().parse(reader, rules) {
            Ok(config) => Self::from(config.query(alias)),
            Err(e) => {
                tracing::warn!("Ignoring unparsable SSH config {}: {}", origin.display(), e);
                Self::default()
            }
        }
    }
}

impl From<HostParams> for SshHostEntry {
    fn from(params: HostParams) -> Self {
        Self {
            host_name: params.host_name,
            port: params.port,
            user: params.user,
            identity_file: params
                .identity_file
                .and_then(|files| files.into_iter().next())
                .map(|path| path.to_string_lossy().into_owned()),
        }
    }
}
