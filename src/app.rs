//! Wiring of one run: tunnel, transports, enumeration and dispatch.

use crate::config::{CliArgs, OptionFile, RunConfig, TunnelSettings, expand_home};
use crate::error::RunError;
use crate::output::{LineSink, RowSink};
use crate::services::database::{
    Connector, DispatchReport, Dispatcher, MySqlConnector, list_targets,
};
use crate::services::ssh::{PassphraseCache, SshTunnel};
use crate::services::transport::{
    DIRECT_TRANSPORT, DirectTransport, TUNNEL_TRANSPORT, TransportRegistry, TunnelTransport,
};
use std::io::Write;
use std::sync::Arc;

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// No query was given; the matched databases were listed.
    Listed(Vec<String>),
    Dispatched(DispatchReport),
}

/// Resolve configuration, open the tunnel if one was asked for, and run the
/// query against every matching database, printing rows to stdout.
pub async fn run(args: &CliArgs, passphrases: &PassphraseCache) -> Result<RunOutcome, RunError> {
    let mut transports = TransportRegistry::new();
    transports.register(DIRECT_TRANSPORT, Arc::new(DirectTransport))?;

    let tunnel_settings = TunnelSettings::from_args(args);
    let (tunnel, options) = match &tunnel_settings {
        Some(settings) => {
            let tunnel = Arc::new(SshTunnel::connect(settings.tunnel_config(), passphrases).await?);
            let options = OptionFile::fetch_remote(&tunnel, &args.conf).await;
            transports.register(TUNNEL_TRANSPORT, Arc::new(TunnelTransport::new(tunnel.clone())))?;
            (Some(tunnel), options)
        }
        None => (None, OptionFile::load(&expand_home(&args.conf))),
    };

    let config = RunConfig::resolve(args, &options, tunnel_settings);
    let transport_name = transport_for(&config);
    tracing::debug!(
        "Using MySQL at {} as '{}' via {}",
        config.database.addr(),
        config.database.user,
        transport_name
    );

    let result = connect_and_execute(&config, &transports, transport_name).await;

    if let Some(tunnel) = tunnel {
        tunnel.shutdown().await;
    }
    result
}

/// Name of the transport database connections go through.
pub fn transport_for(config: &RunConfig) -> &'static str {
    match &config.tunnel {
        Some(_) => TUNNEL_TRANSPORT,
        None => DIRECT_TRANSPORT,
    }
}

async fn connect_and_execute(
    config: &RunConfig,
    transports: &TransportRegistry,
    transport_name: &str,
) -> Result<RunOutcome, RunError> {
    let connector = MySqlConnector::new(&config.database, transports.get(transport_name)?).await?;
    execute(config, Arc::new(connector), Arc::new(LineSink::stdout())).await
}

/// Enumerate targets through `connector` and either list them or dispatch the
/// configured query, writing output to `sink`.
pub async fn execute<C, W>(
    config: &RunConfig,
    connector: Arc<C>,
    sink: Arc<LineSink<W>>,
) -> Result<RunOutcome, RunError>
where
    C: Connector,
    W: Write + Send + 'static,
{
    let targets = list_targets(connector.as_ref(), &config.filter).await?;

    match &config.query {
        Some(query) => {
            let dispatcher = Dispatcher::new(connector, config.strategy);
            let sink: Arc<dyn RowSink> = sink;
            let report = dispatcher.dispatch(&targets, query, sink).await?;
            Ok(RunOutcome::Dispatched(report))
        }
        None => {
            sink.write_databases(&targets);
            Ok(RunOutcome::Listed(targets))
        }
    }
}
