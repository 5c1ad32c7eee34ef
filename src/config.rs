//! Run configuration.
//!
//! Everything a run needs is resolved once into an immutable [`RunConfig`]:
//! command-line flags first, then the MySQL option file, then defaults. SSH
//! settings additionally consult the user's `~/.ssh/config`.

use crate::services::database::{DatabaseFilter, Strategy};
use crate::services::ssh::{SshHostEntry, SshTunnel, SshTunnelConfig};
use clap::Parser;
use std::path::{Path, PathBuf};

pub const DEFAULT_MYSQL_HOST: &str = "127.0.0.1";
pub const DEFAULT_MYSQL_PORT: u16 = 3306;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_SSH_USER: &str = "root";
pub const DEFAULT_SSH_KEY: &str = "~/.ssh/id_rsa";
pub const DEFAULT_OPTION_FILE: &str = "~/.my.cnf";

/// mq runs one MySQL query against every matching database on a server
#[derive(Parser, Debug, Clone)]
#[command(name = "mq", version)]
pub struct CliArgs {
    /// MySQL query to run on every matching database
    #[arg(short, long)]
    pub query: Option<String>,

    /// MySQL user
    #[arg(short, long)]
    pub user: Option<String>,

    /// MySQL password
    #[arg(short, long, env = "MYSQL_PWD", hide_env_values = true)]
    pub password: Option<String>,

    /// MySQL host
    #[arg(long)]
    pub host: Option<String>,

    /// MySQL port [default: 3306]
    #[arg(long)]
    pub port: Option<u16>,

    /// Database used for the initial connection
    #[arg(short, long)]
    pub database: Option<String>,

    /// Only query databases whose name starts with this
    #[arg(long, default_value = "")]
    pub dbprefix: String,

    /// Skip databases whose name contains this
    #[arg(long, default_value = "")]
    pub dbignore: String,

    /// MySQL option file; read on the SSH host when tunneling
    #[arg(short = 'c', long = "conf", default_value = DEFAULT_OPTION_FILE)]
    pub conf: String,

    /// SSH host (or ~/.ssh/config alias) to tunnel through
    #[arg(long)]
    pub sshhost: Option<String>,

    /// SSH port [default: 22]
    #[arg(long)]
    pub sshport: Option<u16>,

    /// SSH user [default: root]
    #[arg(long)]
    pub sshuser: Option<String>,

    /// SSH password
    #[arg(long)]
    pub sshpass: Option<String>,

    /// Path to your SSH private key [default: ~/.ssh/id_rsa]
    #[arg(long)]
    pub sshkey: Option<String>,

    /// Query the databases in parallel
    #[arg(long)]
    pub threaded: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG overrides it
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// Where and as whom to connect to MySQL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    /// Database for the initial connection, if any
    pub database: Option<String>,
}

impl DatabaseSettings {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Resolved SSH settings for the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: Option<String>,
    pub key_path: PathBuf,
}

impl TunnelSettings {
    /// Build tunnel settings when `--sshhost` was given. Flags win over the
    /// SSH client config entry, which wins over defaults.
    pub fn resolve(args: &CliArgs, entry: &SshHostEntry) -> Option<Self> {
        let alias = args.sshhost.as_deref().filter(|h| !h.is_empty())?;

        let key_path = args
            .sshkey
            .clone()
            .or_else(|| entry.identity_file.clone())
            .unwrap_or_else(|| DEFAULT_SSH_KEY.to_string());

        Some(Self {
            host: entry
                .host_name
                .clone()
                .unwrap_or_else(|| alias.to_string()),
            port: args.sshport.or(entry.port).unwrap_or(DEFAULT_SSH_PORT),
            user: args
                .sshuser
                .clone()
                .or_else(|| entry.user.clone())
                .unwrap_or_else(|| DEFAULT_SSH_USER.to_string()),
            password: args.sshpass.clone().filter(|p| !p.is_empty()),
            key_path: expand_home(&key_path),
        })
    }

    /// Resolve against the user's `~/.ssh/config`.
    pub fn from_args(args: &CliArgs) -> Option<Self> {
        let alias = args.sshhost.as_deref()?;
        let entry = SshHostEntry::load(&expand_home("~/.ssh/config"), alias);
        Self::resolve(args, &entry)
    }

    pub fn tunnel_config(&self) -> SshTunnelConfig {
        SshTunnelConfig::with_default_methods(
            self.host.clone(),
            self.port,
            self.user.clone(),
            self.key_path.clone(),
            self.password.clone(),
        )
    }
}

/// Connection settings found in a MySQL option file such as `~/.my.cnf`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionFile {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub dbname: Option<String>,
}

impl OptionFile {
    /// Parse option file contents. Every section is read; a non-empty value
    /// in a later section replaces one from an earlier section.
    pub fn parse(contents: &str) -> Result<Self, ini::ParseError> {
        let parsed = ini::Ini::load_from_str_noescape(contents)?;
        let mut options = Self::default();

        for (_section, properties) in parsed.iter() {
            let value = |key: &str| {
                properties
                    .get(key)
                    .map(|v| v.trim().trim_matches('"').to_string())
                    .filter(|v| !v.is_empty())
            };
            if let Some(host) = value("host") {
                options.host = Some(host);
            }
            if let Some(port) = value("port").and_then(|p| p.parse().ok()) {
                options.port = Some(port);
            }
            if let Some(user) = value("user") {
                options.user = Some(user);
            }
            if let Some(password) = value("password") {
                options.password = Some(password);
            }
            if let Some(dbname) = value("dbname") {
                options.dbname = Some(dbname);
            }
        }

        Ok(options)
    }

    /// Read a local option file. Missing or malformed files are ignored.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::parse_or_default(&contents, &path.display().to_string()),
            Err(e) => {
                tracing::debug!("Not using option file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Read the option file on the SSH host (`cat <path>` over the tunnel).
    pub async fn fetch_remote(tunnel: &SshTunnel, path: &str) -> Self {
        match tunnel.run_command(&remote_cat_command(path)).await {
            Ok(bytes) if bytes.is_empty() => Self::default(),
            Ok(bytes) => Self::parse_or_default(
                &String::from_utf8_lossy(&bytes),
                &format!("{}:{}", tunnel.config().ssh_host, path),
            ),
            Err(e) => {
                tracing::warn!("Could not read remote option file {}: {}", path, e);
                Self::default()
            }
        }
    }

    fn parse_or_default(contents: &str, origin: &str) -> Self {
        match Self::parse(contents) {
            Ok(options) => {
                tracing::debug!("Loaded MySQL options from {}", origin);
                options
            }
            Err(e) => {
                tracing::warn!("Ignoring unparsable option file {}: {}", origin, e);
                Self::default()
            }
        }
    }
}

/// Everything a run needs, resolved once and never mutated.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub database: DatabaseSettings,
    pub filter: DatabaseFilter,
    pub query: Option<String>,
    pub strategy: Strategy,
    pub tunnel: Option<TunnelSettings>,
}

impl RunConfig {
    pub fn resolve(args: &CliArgs, options: &OptionFile, tunnel: Option<TunnelSettings>) -> Self {
        let pick = |flag: &Option<String>, file: &Option<String>| {
            flag.clone()
                .filter(|v| !v.is_empty())
                .or_else(|| file.clone())
        };

        Self {
            database: DatabaseSettings {
                host: pick(&args.host, &options.host)
                    .unwrap_or_else(|| DEFAULT_MYSQL_HOST.to_string()),
                port: args.port.or(options.port).unwrap_or(DEFAULT_MYSQL_PORT),
                user: pick(&args.user, &options.user).unwrap_or_default(),
                password: pick(&args.password, &options.password).unwrap_or_default(),
                database: pick(&args.database, &options.dbname),
            },
            filter: DatabaseFilter::new(args.dbprefix.clone(), args.dbignore.clone()),
            query: args.query.clone().filter(|q| !q.trim().is_empty()),
            strategy: Strategy::from_threaded(args.threaded),
            tunnel,
        }
    }
}

/// `cat` command for `path` on the remote shell. The path is quoted; a leading
/// `~/` stays outside the quotes so the remote shell still expands it.
pub fn remote_cat_command(path: &str) -> String {
    match path.strip_prefix("~/") {
        Some(rest) => format!("cat ~/{}", shell_words::quote(rest)),
        None => format!("cat {}", shell_words::quote(path)),
    }
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest.trim_start_matches('/'),
        _ => return PathBuf::from(path),
    };
    match dirs::home_dir() {
        Some(home) if rest.is_empty() => home,
        Some(home) => home.join(rest),
        None => PathBuf::from(path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> CliArgs {
        let mut argv = vec!["mq"];
        argv.extend_from_slice(extra);
        CliArgs::parse_from(argv)
    }

    #[test]
    fn test_cli_defaults() {
        let args = args(&[]);
        assert_eq!(args.conf, DEFAULT_OPTION_FILE);
        assert!(!args.threaded);
        assert!(args.sshhost.is_none());
        assert_eq!(args.dbprefix, "");
    }

    #[test]
    fn test_option_file_later_sections_override() {
        let options = OptionFile::parse(
            "[client]\nuser = reporter\npassword = \"s3cret\"\nhost = db.internal\n\n[mysql]\nhost = replica.internal\nport = 3307\ndbname = app_1\n",
        )
        .unwrap();
        assert_eq!(
            options,
            OptionFile {
                host: Some("replica.internal".into()),
                port: Some(3307),
                user: Some("reporter".into()),
                password: Some("s3cret".into()),
                dbname: Some("app_1".into()),
            }
        );
    }

    #[test]
    fn test_flags_win_over_option_file() {
        let options = OptionFile {
            host: Some("db.internal".into()),
            port: Some(3307),
            user: Some("reporter".into()),
            password: Some("from-file".into()),
            dbname: None,
        };
        let config = RunConfig::resolve(
            &args(&["-u", "admin", "-q", "SELECT 1", "--dbprefix", "app_", "--threaded"]),
            &options,
            None,
        );

        assert_eq!(
            config.database,
            DatabaseSettings {
                host: "db.internal".into(),
                port: 3307,
                user: "admin".into(),
                password: "from-file".into(),
                database: None,
            }
        );
        assert_eq!(config.filter, DatabaseFilter::new("app_", ""));
        assert_eq!(config.query.as_deref(), Some("SELECT 1"));
        assert_eq!(config.strategy, Strategy::Concurrent);
    }

    #[test]
    fn test_defaults_without_option_file() {
        let config = RunConfig::resolve(&args(&["-q", "  "]), &OptionFile::default(), None);
        assert_eq!(config.database.addr(), "127.0.0.1:3306");
        assert!(config.query.is_none());
        assert_eq!(config.strategy, Strategy::Sequential);
    }

    #[test]
    fn test_load_missing_option_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(OptionFile::load(&dir.path().join("my.cnf")), OptionFile::default());
    }

    #[test]
    fn test_load_local_option_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("my.cnf");
        std::fs::write(&path, "[client]\nuser=ops\n").unwrap();
        assert_eq!(OptionFile::load(&path).user.as_deref(), Some("ops"));
    }

    #[test]
    fn test_no_tunnel_without_sshhost() {
        assert!(TunnelSettings::resolve(&args(&[]), &SshHostEntry::default()).is_none());
    }

    #[test]
    fn test_tunnel_settings_precedence() {
        let entry = SshHostEntry {
            host_name: Some("10.0.0.5".into()),
            port: Some(2222),
            user: Some("deploy".into()),
            identity_file: Some("/keys/prod".into()),
        };

        let from_entry = TunnelSettings::resolve(&args(&["--sshhost", "bastion"]), &entry).unwrap();
        assert_eq!(from_entry.host, "10.0.0.5");
        assert_eq!(from_entry.port, 2222);
        assert_eq!(from_entry.user, "deploy");
        assert_eq!(from_entry.key_path, PathBuf::from("/keys/prod"));
        assert_eq!(from_entry.password, None);

        let from_flags = TunnelSettings::resolve(
            &args(&[
                "--sshhost", "bastion", "--sshport", "22022", "--sshuser", "ops", "--sshkey",
                "/keys/mine", "--sshpass", "pw",
            ]),
            &entry,
        )
        .unwrap();
        assert_eq!(from_flags.port, 22022);
        assert_eq!(from_flags.user, "ops");
        assert_eq!(from_flags.key_path, PathBuf::from("/keys/mine"));
        assert_eq!(from_flags.password.as_deref(), Some("pw"));

        let defaults =
            TunnelSettings::resolve(&args(&["--sshhost", "bastion"]), &SshHostEntry::default())
                .unwrap();
        assert_eq!(defaults.host, "bastion");
        assert_eq!(defaults.port, DEFAULT_SSH_PORT);
        assert_eq!(defaults.user, DEFAULT_SSH_USER);
        assert!(defaults.key_path.ends_with(".ssh/id_rsa"));
    }

    #[test]
    fn test_tunnel_config_methods() {
        let settings = TunnelSettings {
            host: "bastion".into(),
            port: 22,
            user: "root".into(),
            password: Some("pw".into()),
            key_path: "/keys/id".into(),
        };
        let labels: Vec<_> = settings
            .tunnel_config()
            .auth_methods()
            .iter()
            .map(|m| m.label())
            .collect();
        assert_eq!(labels, ["agent", "publickey", "password"]);
    }

    #[test]
    fn test_remote_cat_command_quotes_path() {
        assert_eq!(remote_cat_command("~/.my.cnf"), "cat ~/.my.cnf");
        assert_eq!(remote_cat_command("/etc/mysql/my.cnf"), "cat /etc/mysql/my.cnf");
        assert_eq!(
            remote_cat_command("/etc/my cnf; rm -rf /"),
            "cat '/etc/my cnf; rm -rf /'"
        );
        assert_eq!(
            remote_cat_command("~/odd $(name).cnf"),
            "cat ~/'odd $(name).cnf'"
        );
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/etc/my.cnf"), PathBuf::from("/etc/my.cnf"));
        assert_eq!(expand_home("~user/x"), PathBuf::from("~user/x"));
        if let Some(home) = dirs::home_dir() {
            assert_eq!(expand_home("~/.my.cnf"), home.join(".my.cnf"));
            assert_eq!(expand_home("~"), home);
        }
    }
}
