//! SMTP for the relay: the [`client`] that hands messages to remote mail
//! exchangers and the [`server`] that accepts submissions.

pub mod client;
pub mod server;

pub use client::{ClientError, Response, SmtpClient};
pub use server::{SubmissionConfig, SubmissionServer};
