use anyhow::{anyhow, Result};
use is_terminal::IsTerminal;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wildip::dns::BindConfig;
use wildip::error::Error::DNSError;
use wildip::{Config, RecordStore, SharedConfig, Zone};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_init();

    let mut first_args = std::env::args().take(2);
    let (program_name, config_file) = (
        first_args.next().unwrap_or("wildip".to_string()),
        first_args.next(),
    );

    let config = config_init(&program_name, config_file)?;
    let zone = Arc::new(Zone::try_from_config(&config)?);
    let store = Arc::new(RecordStore::new(&zone, &config.records)?);

    let dns_server = wildip::new_dns(
        zone.clone(),
        store.clone(),
        &BindConfig {
            host: config.dns_bind_host.clone(),
            port: config.dns_port,
            tcp_timeout: config.dns_tcp_timeout,
        },
    )
    .await?;
    tracing::info!("DNS listening on UDP and TCP {}", dns_server.local_addr());
    let dns_handle = tokio::spawn(dns_server.block_until_done());

    // Started after the DNS server: the CA validates challenges against it.
    let certs_handle = tokio::spawn(wildip::certs::run(config.clone(), zone, store));
    let http_handle = tokio::spawn(wildip::serve_http(config.clone()));

    let result = tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("quitting from signal");
            Ok(())
        },
        Ok(dns_res) = dns_handle => {
            dns_res.map_err(|err| DNSError(err).into())
        }
        Ok(certs_res) = certs_handle => {
            certs_res.map_err(Into::into)
        }
        Ok(http_res) = http_handle => {
            http_res
        }
    };
    if let Err(err) = &result {
        tracing::error!("stopping: {err:#}");
    }
    tracing::info!("goodbye");
    result
}

fn tracing_init() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_ansi(std::io::stdout().is_terminal()))
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wildip=info".into()),
        )
        .init();
}

fn config_init(program_name: &str, config_file: Option<String>) -> Result<SharedConfig> {
    match config_file {
        None => Err(anyhow!("usage: {program_name} /path/to/config.json")),
        Some(config_file) => {
            let config = Config::try_from_file(&config_file)?;
            tracing::debug!(
                "loaded config from {config_file}, {} static names",
                config.records.len()
            );
            Ok(Arc::new(config))
        }
    }
}
