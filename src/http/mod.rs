//! HTTP and HTTPS endpoints.
//!
//! # Endpoints
//!
//! ## `/healthcheck` (GET)
//!
//!   Returns HTTP 200 (OK) and the JSON body `{"ok":"healthy"}` when the service is operational.
//!
//! ## `/server.pem` (GET)
//!
//!   Returns the `wildcard` certificate chain (`*.<domain>`), so that local services reached
//!   through wildcard IP names can use it. HTTP 503 (Service Unavailable) until it is issued.
//!
//! ## `/server.key` (GET)
//!
//!   Returns the private key of the `wildcard` certificate, with the same 503 behavior.
//!
//! # HTTPS
//!
//! The same endpoints are served over TLS with the `root` certificate once it exists on disk.
//! The certificate is looked up on every handshake and reloaded when its key file changes, so
//! renewals need no restart. See [`CertificateReloader`].

mod http_error;
pub mod reloader;
mod routes;
pub mod server;

pub use reloader::CertificateReloader;
pub use server::serve;
