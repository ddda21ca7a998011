use crate::certs::{CertificateStorage, ROOT_GROUP};
use crate::config::SharedConfig;
use crate::http::reloader::CertificateReloader;
use crate::http::routes::{self, AppState};
use anyhow::Context;
use axum::Router;
use hyper::server::conn::Http;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::rustls::crypto::ring::default_provider;
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

const CERTIFICATE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Serve the HTTP surface on [`Config::http_port`][`crate::config::Config::http_port`] until the
/// `root` certificate has been issued. From then on it is served over HTTPS on
/// [`Config::https_port`][`crate::config::Config::https_port`], and plain HTTP requests are
/// redirected there.
///
/// # Errors
///
/// Returns an error if a listener can't be bound or fails.
pub async fn serve(config: SharedConfig) -> anyhow::Result<()> {
    let storage = CertificateStorage::new(&config.storage_root);
    let router = routes::new(
        AppState {
            storage: storage.clone(),
        },
        config.http_timeout,
    );
    let key_path = storage.key_path(ROOT_GROUP);

    let http_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.http_port));
    tracing::info!("HTTP listening on {http_addr}");
    axum::Server::try_bind(&http_addr)
        .with_context(|| format!("binding HTTP on {http_addr}"))?
        .serve(router.clone().into_make_service())
        .with_graceful_shutdown(wait_for(&key_path))
        .await
        .context("HTTP server")?;
    tracing::debug!("HTTP server shut down");

    let https_addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.https_port));
    let https = serve_tls(https_addr, storage, router);

    let redirect = axum::Server::try_bind(&http_addr)
        .with_context(|| format!("binding HTTP on {http_addr}"))?
        .serve(routes::redirect(config.https_port, config.http_timeout).into_make_service());
    tracing::info!("redirecting HTTP traffic on {http_addr} to HTTPS");

    tokio::try_join!(async { redirect.await.context("HTTP redirect") }, https)?;
    Ok(())
}

async fn serve_tls(addr: SocketAddr, storage: CertificateStorage, router: Router) -> anyhow::Result<()> {
    let reloader = CertificateReloader::new(
        storage.certificate_path(ROOT_GROUP),
        storage.key_path(ROOT_GROUP),
    );
    let mut tls_config = ServerConfig::builder_with_provider(Arc::new(default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_cert_resolver(Arc::new(reloader));
    tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
    let acceptor = TlsAcceptor::from(Arc::new(tls_config));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding HTTPS on {addr}"))?;
    tracing::info!("HTTPS listening on {addr}");

    loop {
        let (stream, peer) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            // A failed handshake only concerns this connection.
            let stream = match acceptor.accept(stream).await {
                Ok(stream) => stream,
                Err(err) => {
                    tracing::debug!(%peer, ?err, "TLS handshake failed");
                    return;
                }
            };
            if let Err(err) = Http::new().serve_connection(stream, router).await {
                tracing::debug!(%peer, ?err, "HTTPS connection error");
            }
        });
    }
}

async fn wait_for(path: &Path) {
    tracing::info!(path = %path.display(), "HTTPS waiting for certificate");
    while !tokio::fs::try_exists(path).await.unwrap_or(false) {
        tokio::time::sleep(CERTIFICATE_POLL_INTERVAL).await;
    }
}
