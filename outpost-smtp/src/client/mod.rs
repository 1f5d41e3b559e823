//! Outbound SMTP client with opportunistic STARTTLS.

#[allow(clippy::module_inception)]
mod client;
mod error;
mod response;

pub use client::{SmtpClient, dot_stuff};
pub use error::{ClientError, Result};
pub use response::{Response, ResponseLine};
