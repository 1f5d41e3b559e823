use core::fmt::{self, Display, Formatter};

use outpost_common::address::parse_mailbox;

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// `None` is the null reverse-path (`MAIL FROM:<>`).
    MailFrom(Option<String>),
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Vrfy,
    Quit,
    Invalid(String),
}

impl Display for Command {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(id) => write!(f, "HELO {id}"),
            Self::Ehlo(id) => write!(f, "EHLO {id}"),
            Self::MailFrom(from) => {
                write!(f, "MAIL FROM:<{}>", from.as_deref().unwrap_or_default())
            }
            Self::RcptTo(to) => write!(f, "RCPT TO:<{to}>"),
            Self::Data => f.write_str("DATA"),
            Self::Rset => f.write_str("RSET"),
            Self::Noop => f.write_str("NOOP"),
            Self::Vrfy => f.write_str("VRFY"),
            Self::Quit => f.write_str("QUIT"),
            Self::Invalid(s) => f.write_str(s),
        }
    }
}

/// Strips ESMTP parameters (`<a@b> SIZE=10`) and parses the path.
fn path(argument: &str) -> Option<String> {
    let path = argument.split_whitespace().next()?;
    parse_mailbox(path)
}

fn prefixed<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    line.get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .map(|_| line[prefix.len()..].trim())
}

impl From<&str> for Command {
    fn from(line: &str) -> Self {
        let trimmed = line.trim();

        if let Some(argument) = prefixed(trimmed, "MAIL FROM:") {
            if argument.split_whitespace().next() == Some("<>") {
                return Self::MailFrom(None);
            }
            return path(argument).map_or_else(
                || Self::Invalid(format!("Invalid sender: {argument}")),
                |from| Self::MailFrom(Some(from)),
            );
        }

        if let Some(argument) = prefixed(trimmed, "RCPT TO:") {
            return path(argument).map_or_else(
                || Self::Invalid(format!("Invalid recipient: {argument}")),
                Self::RcptTo,
            );
        }

        let (verb, argument) = trimmed
            .split_once(' ')
            .map_or((trimmed, ""), |(verb, rest)| (verb, rest.trim()));

        match verb.to_ascii_uppercase().as_str() {
            "HELO" | "EHLO" if argument.is_empty() => {
                Self::Invalid(format!("Expected hostname in {trimmed}"))
            }
            "HELO" => Self::Helo(argument.to_string()),
            "EHLO" => Self::Ehlo(argument.to_string()),
            "DATA" => Self::Data,
            "RSET" => Self::Rset,
            "NOOP" => Self::Noop,
            "VRFY" => Self::Vrfy,
            "QUIT" => Self::Quit,
            _ => Self::Invalid(trimmed.to_string()),
        }
    }
}
