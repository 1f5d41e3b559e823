use mailparse::{MailAddr, MailHeaderMap, ParsedMail, addrparse_header, parse_mail};
use outpost_common::{Attachment, Message};

/// Headers that describe the envelope or the MIME structure of the original
/// submission and are therefore regenerated at delivery.
const REGENERATED: &[&str] = &[
    "from",
    "to",
    "cc",
    "bcc",
    "subject",
    "date",
    "mime-version",
    "content-type",
    "content-transfer-encoding",
];

/// Builds a [`Message`] from a received `DATA` payload.
///
/// Envelope recipients that appear in the `Cc` or `Bcc` header are filed
/// there; every other envelope recipient becomes a `to` recipient. When that
/// leaves `to` empty the `Cc` (or else `Bcc`) recipients are moved to `to`.
/// Header addresses that were not part of the envelope are ignored.
///
/// # Errors
///
/// Returns an error when the payload is not a parseable RFC 5322 message.
pub fn build_message(
    sender: &str,
    recipients: &[String],
    raw: &[u8],
) -> Result<Message, mailparse::MailParseError> {
    let parsed = parse_mail(raw)?;

    let header_cc = header_addresses(&parsed, "Cc");
    let header_bcc = header_addresses(&parsed, "Bcc");
    let mut to = Vec::new();
    let mut cc = Vec::new();
    let mut bcc = Vec::new();
    for rcpt in recipients {
        if listed(&header_cc, rcpt) {
            cc.push(rcpt.clone());
        } else if listed(&header_bcc, rcpt) {
            bcc.push(rcpt.clone());
        } else {
            to.push(rcpt.clone());
        }
    }

    // Delivery is routed by the first `to` recipient.
    if to.is_empty() {
        to.append(&mut cc);
    }
    if to.is_empty() {
        to.append(&mut bcc);
    }

    let subject = parsed.headers.get_first_value("Subject").unwrap_or_default();
    let mut message = Message::new(sender, to, subject).with_cc(cc).with_bcc(bcc);

    for header in &parsed.headers {
        let key = header.get_key();
        if REGENERATED.iter().any(|name| key.eq_ignore_ascii_case(name))
            || message.headers.keys().any(|seen| seen.eq_ignore_ascii_case(&key))
        {
            continue;
        }
        message.headers.insert(key, header.get_value());
    }

    collect_parts(&parsed, &mut message)?;

    Ok(message)
}

fn listed(list: &[String], rcpt: &str) -> bool {
    list.iter().any(|addr| addr.eq_ignore_ascii_case(rcpt))
}

fn header_addresses(parsed: &ParsedMail<'_>, name: &str) -> Vec<String> {
    parsed
        .headers
        .get_first_header(name)
        .and_then(|header| addrparse_header(header).ok())
        .map(|list| {
            list.iter()
                .flat_map(|addr| match addr {
                    MailAddr::Single(info) => vec![info.addr.clone()],
                    MailAddr::Group(group) => {
                        group.addrs.iter().map(|info| info.addr.clone()).collect()
                    }
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Walks the MIME tree: the first `text/plain` leaf becomes the body, the
/// first `text/html` leaf the HTML part, and parts with a filename are kept
/// as attachments.
fn collect_parts(
    part: &ParsedMail<'_>,
    message: &mut Message,
) -> Result<(), mailparse::MailParseError> {
    if !part.subparts.is_empty() {
        for sub in &part.subparts {
            collect_parts(sub, message)?;
        }
        return Ok(());
    }

    let disposition = part.get_content_disposition();
    if let Some(filename) = disposition.params.get("filename") {
        message.attachments.push(Attachment {
            filename: filename.clone(),
            content_type: part.ctype.mimetype.clone(),
            data: part.get_body_raw()?,
        });
        return Ok(());
    }

    match part.ctype.mimetype.as_str() {
        "text/html" if message.html.is_none() => message.html = Some(part.get_body()?),
        "text/plain" if message.body.is_empty() => message.body = part.get_body()?,
        _ => {}
    }

    Ok(())
}
