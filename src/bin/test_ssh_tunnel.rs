//! SSH Tunnel Test Binary
//!
//! Runs the whole pipeline against a live SSH bastion and MySQL server:
//! tunnel authentication, channel dialing, enumeration and both dispatch
//! strategies.
//!
//! Prerequisites:
//!   docker compose -f docker-compose.ssh-test.yml up -d
//!
//! Run with:
//!   cargo run --bin test_ssh_tunnel

use anyhow::{Context, Result};
use multiquery::config::DatabaseSettings;
use multiquery::output::LineSink;
use multiquery::services::database::{
    DatabaseFilter, Dispatcher, MySqlConnector, Strategy, list_targets,
};
use multiquery::services::ssh::{
    PassphraseCache, SshAuthMethod, SshTunnel, SshTunnelConfig, TerminalPrompt,
};
use multiquery::services::transport::{
    DIRECT_TRANSPORT, DirectTransport, TUNNEL_TRANSPORT, TransportRegistry, TunnelTransport,
};
use std::io::Write;
use std::sync::{Arc, Mutex};
use tokio::io::AsyncReadExt;

// Test configuration
const SSH_HOST: &str = "127.0.0.1";
const SSH_PORT: u16 = 2222;
const SSH_USER: &str = "testuser";
const SSH_PASS: &str = "testpass";

const MYSQL_REMOTE_HOST: &str = "mysql";
const MYSQL_REMOTE_PORT: u16 = 3306;
const MYSQL_USER: &str = "mquser";
const MYSQL_PASS: &str = "mqpass";

/// Collects sink output so it can be checked after a dispatch.
#[derive(Clone, Default)]
struct Captured(Arc<Mutex<Vec<u8>>>);

impl Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0
            .lock()
            .map_err(|_| std::io::Error::other("capture lock poisoned"))?
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl Captured {
    fn text(&self) -> Result<String> {
        let bytes = self
            .0
            .lock()
            .map_err(|_| anyhow::anyhow!("capture lock poisoned"))?
            .clone();
        Ok(String::from_utf8(bytes)?)
    }
}

fn tunnel_config() -> SshTunnelConfig {
    SshTunnelConfig::new(
        SSH_HOST,
        SSH_PORT,
        SSH_USER,
        vec![SshAuthMethod::Password(SSH_PASS.to_string())],
    )
}

fn database_settings() -> DatabaseSettings {
    DatabaseSettings {
        host: MYSQL_REMOTE_HOST.to_string(),
        port: MYSQL_REMOTE_PORT,
        user: MYSQL_USER.to_string(),
        password: MYSQL_PASS.to_string(),
        database: None,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("test_ssh_tunnel=debug".parse()?)
                .add_directive("multiquery=debug".parse()?)
                .add_directive("warn".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    println!("╔════════════════════════════════════════════╗");
    println!("║   SSH Tunnel Test Suite (MySQL)            ║");
    println!("╚════════════════════════════════════════════╝\n");

    let passphrases = PassphraseCache::new(TerminalPrompt);

    println!("━━━ Test 1: SSH Connection Test ━━━");
    let tunnel = Arc::new(test_ssh_connection(&passphrases).await?);

    println!("\n━━━ Test 2: Remote Command ━━━");
    test_remote_command(&tunnel).await?;

    println!("\n━━━ Test 3: Raw Channel Dial ━━━");
    test_channel_dial(&tunnel).await?;

    println!("\n━━━ Test 4: Enumeration Through Tunnel ━━━");
    test_enumeration(&tunnel).await?;

    println!("\n━━━ Test 5: Sequential and Concurrent Dispatch ━━━");
    test_dispatch(&tunnel).await?;

    println!("\n━━━ Test 6: Transport Registry ━━━");
    test_registry(&tunnel)?;

    tunnel.shutdown().await;
    println!("\n  ✓ Tunnel closed cleanly");

    println!("\n╔════════════════════════════════════════════╗");
    println!("║       All tests passed! ✓                  ║");
    println!("╚════════════════════════════════════════════╝");

    Ok(())
}

async fn test_ssh_connection(passphrases: &PassphraseCache) -> Result<SshTunnel> {
    let tunnel = SshTunnel::connect(tunnel_config(), passphrases).await?;
    println!("  ✓ Connected to SSH server at {}:{}", SSH_HOST, SSH_PORT);
    println!("  ✓ Authenticated as user '{}'", SSH_USER);
    Ok(tunnel)
}

async fn test_remote_command(tunnel: &SshTunnel) -> Result<()> {
    let output = tunnel.run_command("echo tunnel-ok").await?;
    let text = String::from_utf8_lossy(&output);
    assert_eq!(text.trim(), "tunnel-ok", "echo should round-trip");
    println!("  ✓ Remote command output: {}", text.trim());
    Ok(())
}

async fn test_channel_dial(tunnel: &SshTunnel) -> Result<()> {
    let addr = format!("{}:{}", MYSQL_REMOTE_HOST, MYSQL_REMOTE_PORT);
    let mut stream = tunnel.dial(&addr).await?;

    // The server speaks first: a protocol v10 handshake packet.
    let mut header = [0u8; 5];
    stream
        .read_exact(&mut header)
        .await
        .context("reading MySQL handshake")?;
    assert_eq!(header[4], 10, "expected protocol version 10");
    println!("  ✓ MySQL handshake received over direct-tcpip channel");
    Ok(())
}

async fn test_enumeration(tunnel: &Arc<SshTunnel>) -> Result<()> {
    let connector = MySqlConnector::new(
        &database_settings(),
        Arc::new(TunnelTransport::new(tunnel.clone())),
    )
    .await?;

    let targets = list_targets(&connector, &DatabaseFilter::new("app_", "temp")).await?;
    assert_eq!(targets, ["app_1", "app_2"]);
    println!("  ✓ Matched databases: {:?}", targets);
    Ok(())
}

async fn test_dispatch(tunnel: &Arc<SshTunnel>) -> Result<()> {
    let connector = Arc::new(
        MySqlConnector::new(
            &database_settings(),
            Arc::new(TunnelTransport::new(tunnel.clone())),
        )
        .await?,
    );
    let targets = vec!["app_1".to_string(), "app_2".to_string()];

    for strategy in [Strategy::Sequential, Strategy::Concurrent] {
        let captured = Captured::default();
        let report = Dispatcher::new(connector.clone(), strategy)
            .dispatch(
                &targets,
                "SELECT id, name FROM users ORDER BY id",
                Arc::new(LineSink::new(captured.clone())),
            )
            .await?;
        assert_eq!(report.rows, 4, "{:?} should return every row", strategy);

        let output = captured.text()?;
        assert!(output.contains(r#"app_1: ["2", "\N"]"#), "NULL renders as \\N");
        assert!(output.contains(r#"app_2: ["1", ""]"#), "empty stays empty");
        assert!(output.contains(r#"app_2: ["2", "\\N"]"#), "text \\N is escaped");
        println!("  ✓ {:?}: {} rows from {:?}", strategy, report.rows, report.completed);
    }
    Ok(())
}

fn test_registry(tunnel: &Arc<SshTunnel>) -> Result<()> {
    let mut registry = TransportRegistry::new();
    registry.register(DIRECT_TRANSPORT, Arc::new(DirectTransport))?;
    registry.register(TUNNEL_TRANSPORT, Arc::new(TunnelTransport::new(tunnel.clone())))?;

    let duplicate = registry.register(DIRECT_TRANSPORT, Arc::new(DirectTransport));
    assert!(duplicate.is_err(), "duplicate names are rejected");
    assert!(registry.get("ssh").is_err(), "unknown names are rejected");
    println!("  ✓ Registry holds '{}' and '{}'", DIRECT_TRANSPORT, TUNNEL_TRANSPORT);
    Ok(())
}
