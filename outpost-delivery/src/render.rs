//! Wire rendering of a queued message.

use std::borrow::Cow;

use chrono::{DateTime, Utc};
use outpost_common::Message;

/// Header names generated by [`render`]; custom headers with these names
/// (in any case) are dropped.
const RESERVED: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "subject",
    "date",
    "mime-version",
    "content-type",
];

/// RFC 1123 with a numeric zone, e.g. `Mon, 02 Jan 2006 15:04:05 +0000`.
const DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S %z";

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED.iter().any(|reserved| name.eq_ignore_ascii_case(reserved))
}

fn has_line_break(value: &str) -> bool {
    value.contains(['\r', '\n'])
}

/// `value` with every CR and LF replaced by a space.
fn single_line(value: &str) -> Cow<'_, str> {
    if has_line_break(value) {
        Cow::Owned(value.replace(['\r', '\n'], " "))
    } else {
        Cow::Borrowed(value)
    }
}

/// Renders `message` as an RFC 5322 message dated `date`.
///
/// Header lines are joined with CRLF. The body is the HTML part when one is
/// present, otherwise the plain body. `Bcc` recipients are never written.
/// Generated header values never span lines, and custom headers whose name
/// or value contains CR or LF are dropped.
#[must_use]
pub fn render(message: &Message, date: DateTime<Utc>) -> String {
    let mut out = String::with_capacity(message.size() + 512);
    let mut header = |name: &str, value: &str| {
        out.push_str(name);
        out.push_str(": ");
        out.push_str(&single_line(value));
        out.push_str("\r\n");
    };

    header("From", &message.from);
    header("To", &message.to.join(", "));
    header("Subject", &message.subject);
    header("Date", &date.format(DATE_FORMAT).to_string());
    header("MIME-Version", "1.0");

    if !message.cc.is_empty() {
        header("Cc", &message.cc.join(", "));
    }

    for (name, value) in &message.headers {
        if !is_reserved(name) && !has_line_break(name) && !has_line_break(value) {
            header(name, value);
        }
    }

    let (content_type, body) = message.html_body().map_or(
        ("text/plain; charset=utf-8", message.body.as_str()),
        |html| ("text/html; charset=utf-8", html),
    );
    header("Content-Type", content_type);

    out.push_str("\r\n");
    out.push_str(body);
    out
}
