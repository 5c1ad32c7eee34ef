//! SSH tunneling for database connections.
//!
//! This module provides:
//! - `SshTunnel` - One authenticated session with concurrent `dial`
//! - `PrivateKeySource` / `PassphraseCache` - Two-phase key loading
//! - `SshHostEntry` - Lookups in the user's `~/.ssh/config`

mod client_config;
mod keys;
mod tunnel;
mod types;

pub use client_config::SshHostEntry;
pub use keys::{PassphraseCache, PassphraseSource, PrivateKeySource, TerminalPrompt, load_private_key};
pub use tunnel::SshTunnel;
pub use types::{SshAuthMethod, SshTunnelConfig};
