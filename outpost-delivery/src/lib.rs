//! Outbound delivery for queued messages.
//!
//! A [`DeliveryService`] runs a fixed pool of workers. Each worker polls the
//! queue, resolves the mail exchangers of the first `To` recipient's domain
//! through an [`MxCache`] and hands the rendered message to a [`Transport`],
//! falling back through the exchangers in order.

mod cache;
mod config;
mod dns;
mod error;
pub mod render;
mod service;
mod transport;

pub use cache::{CacheStats, MxCache};
pub use config::DeliveryConfig;
pub use dns::{DnsConfig, DnsError, HickoryResolver, MailExchanger, MxResolver};
pub use error::{AttemptError, ServiceError, TransportError};
pub use service::{DeliveryService, ServiceState};
pub use transport::{SmtpTransport, Transport};
