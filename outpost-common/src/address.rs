//! Helpers for the plain `local@domain` strings carried in a [`Message`](crate::Message).

use mailparse::{MailAddr, addrparse};

/// Parses `input` as exactly one mailbox and returns its bare address.
///
/// Display names and angle brackets are accepted (`"Jo" <jo@example.com>`),
/// groups and lists are not.
#[must_use]
pub fn parse_mailbox(input: &str) -> Option<String> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }

    let parsed = addrparse(input).ok()?;
    match parsed.as_slice() {
        [MailAddr::Single(info)] => {
            let addr = info.addr.trim();
            split(addr).map(|_| addr.to_string())
        }
        _ => None,
    }
}

/// The domain part of `address`.
///
/// Requires exactly one `@` with a non-empty local part and domain;
/// surrounding angle brackets and whitespace are ignored.
#[must_use]
pub fn extract_domain(address: &str) -> Option<&str> {
    let address = address.trim();
    let address = address
        .strip_prefix('<')
        .and_then(|a| a.strip_suffix('>'))
        .unwrap_or(address);

    split(address).map(|(_, domain)| domain)
}

fn split(address: &str) -> Option<(&str, &str)> {
    let (local, domain) = address.split_once('@')?;
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return None;
    }

    Some((local, domain))
}
