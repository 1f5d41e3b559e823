use serde::Deserialize;
use thiserror::Error;

use crate::{Message, address::parse_mailbox};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("invalid from address")]
    InvalidFrom,

    #[error("no recipients specified")]
    NoRecipients,

    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("too many recipients: {count} (maximum {max})")]
    TooManyRecipients { count: usize, max: usize },

    #[error("subject cannot be empty")]
    EmptySubject,

    /// A header name or value would not stay on its own line.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("email body cannot be empty")]
    EmptyBody,

    #[error("message too large: {size} bytes (maximum {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Acceptance limits applied at submission.
///
/// ```ron
/// limits: (
///     max_recipients: 100,
///     max_message_size: 26214400,
/// )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct Limits {
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

const fn default_max_recipients() -> usize {
    100
}

const fn default_max_message_size() -> usize {
    25 * 1024 * 1024
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_recipients: default_max_recipients(),
            max_message_size: default_max_message_size(),
        }
    }
}

impl Message {
    /// Checks addresses, content and size against `limits`.
    ///
    /// # Errors
    ///
    /// The first rule the message breaks, in declaration order of
    /// [`ValidationError`].
    pub fn validate(&self, limits: &Limits) -> Result<(), ValidationError> {
        if parse_mailbox(&self.from).is_none() {
            return Err(ValidationError::InvalidFrom);
        }

        if self.to.is_empty() {
            return Err(ValidationError::NoRecipients);
        }

        if let Some(bad) = self.recipients().find(|r| parse_mailbox(r).is_none()) {
            return Err(ValidationError::InvalidRecipient(bad.to_string()));
        }

        let count = self.recipient_count();
        if count > limits.max_recipients {
            return Err(ValidationError::TooManyRecipients {
                count,
                max: limits.max_recipients,
            });
        }

        if self.subject.trim().is_empty() {
            return Err(ValidationError::EmptySubject);
        }

        if has_line_break(&self.subject) {
            return Err(ValidationError::InvalidHeader("Subject".to_string()));
        }

        if let Some((name, _)) = self
            .headers
            .iter()
            .find(|(name, value)| !is_field_name(name) || has_line_break(value))
        {
            return Err(ValidationError::InvalidHeader(name.escape_default().to_string()));
        }

        if self.body.trim().is_empty() && self.html_body().is_none() {
            return Err(ValidationError::EmptyBody);
        }

        let size = self.size();
        if size > limits.max_message_size {
            return Err(ValidationError::MessageTooLarge {
                size,
                max: limits.max_message_size,
            });
        }

        Ok(())
    }
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// RFC 5322 field name: printable ASCII except `:`.
fn is_field_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_graphic() && b != b':')
}
