use crate::dns::handlers::Handler;
use crate::record_store::SharedRecordStore;
use crate::zone::Zone;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{lookup_host, TcpListener, UdpSocket};
use trust_dns_server::proto::error::ProtoError;
use trust_dns_server::ServerFuture;

/// Where the DNS listeners bind.
#[derive(Debug, Clone)]
pub struct BindConfig {
    /// Host alias tried first. `None` binds all interfaces directly.
    pub host: Option<String>,
    pub port: u16,
    pub tcp_timeout: Duration,
}

/// A DNS server with its UDP and TCP listeners bound, answering queries once
/// [`DnsServer::block_until_done`] is polled.
pub struct DnsServer {
    server: ServerFuture<Handler>,
    local_addr: SocketAddr,
}

impl DnsServer {
    /// The address the listeners are bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn block_until_done(self) -> Result<(), ProtoError> {
        self.server.block_until_done().await
    }
}

pub async fn new(
    zone: Arc<Zone>,
    store: SharedRecordStore,
    bind: &BindConfig,
) -> anyhow::Result<DnsServer> {
    let addr = bind_addr(bind.host.as_deref(), bind.port).await?;
    let udp_socket = UdpSocket::bind(addr).await?;
    // With port 0 the UDP socket picks the port, TCP follows it.
    let local_addr = udp_socket.local_addr()?;
    let tcp_listener = TcpListener::bind(local_addr).await?;

    let dns_handler = Handler::new(zone, store);
    let mut dns_server = ServerFuture::new(dns_handler);
    dns_server.register_socket(udp_socket);
    dns_server.register_listener(tcp_listener, bind.tcp_timeout);
    Ok(DnsServer {
        server: dns_server,
        local_addr,
    })
}

/// Resolve the listener address. When the host alias doesn't exist (we're not running where it
/// is defined), fall back to all interfaces on the same port. There is exactly one fallback: the
/// wildcard address needs no resolution.
///
/// # Errors
///
/// Any other resolution failure, e.g. a resolver timing out, is returned: binding all
/// interfaces then would silently stop traffic from reaching the alias.
pub(crate) async fn bind_addr(host: Option<&str>, port: u16) -> io::Result<SocketAddr> {
    let any = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let Some(host) = host else {
        return Ok(any);
    };
    let resolved = match lookup_host((host, port)).await {
        Ok(mut addrs) => addrs.next(),
        Err(err) if is_host_not_found(&err) => None,
        Err(err) => return Err(err),
    };
    Ok(resolved.unwrap_or_else(|| {
        tracing::warn!("\"{host}\" doesn't resolve, binding {any} instead");
        any
    }))
}

// getaddrinfo failures only surface as messages: EAI_NONAME and EAI_NODATA in their glibc, musl
// and BSD wordings.
const HOST_NOT_FOUND_MESSAGES: [&str; 4] = [
    "not known",
    "no address associated",
    "no such host",
    "name does not resolve",
];

fn is_host_not_found(err: &io::Error) -> bool {
    if err.kind() == io::ErrorKind::NotFound {
        return true;
    }
    let message = err.to_string().to_lowercase();
    HOST_NOT_FOUND_MESSAGES
        .iter()
        .any(|pattern| message.contains(pattern))
}
