//! TwiML documents returned from the incoming-call webhook.

use url::Url;

/// Path of the media stream WebSocket endpoint.
pub const MEDIA_STREAM_PATH: &str = "/media-stream";

/// Build the `<Connect><Stream>` document that points the call at the relay.
///
/// An optional greeting is spoken before the stream connects.
pub fn connect_stream_document(greeting: Option<&str>, stream_url: &str) -> String {
    let mut twiml = String::from(r#"<?xml version="1.0" encoding="UTF-8"?><Response>"#);
    if let Some(greeting) = greeting.map(str::trim).filter(|g| !g.is_empty()) {
        twiml.push_str("<Say>");
        twiml.push_str(&escape_xml(greeting));
        twiml.push_str("</Say>");
    }
    twiml.push_str(r#"<Connect><Stream url=""#);
    twiml.push_str(&escape_xml(stream_url));
    twiml.push_str(r#""/></Connect></Response>"#);
    twiml
}

/// Resolve the absolute `ws(s)://` URL of the media stream endpoint.
///
/// A configured public URL wins; otherwise the request's `Host` header is used
/// with `wss`. Returns `None` when neither is usable.
pub fn media_stream_url(public_url: Option<&str>, host: Option<&str>) -> Option<String> {
    if let Some(public_url) = public_url {
        return public_stream_url(public_url);
    }

    let host = host.map(str::trim).filter(|h| is_valid_host(h))?;
    Some(format!("wss://{host}{MEDIA_STREAM_PATH}"))
}

fn public_stream_url(public_url: &str) -> Option<String> {
    let mut url = Url::parse(public_url.trim()).ok()?;
    let scheme = match url.scheme() {
        "https" | "wss" => "wss",
        "http" | "ws" => "ws",
        _ => return None,
    };
    url.set_scheme(scheme).ok()?;
    let path = format!("{}{}", url.path().trim_end_matches('/'), MEDIA_STREAM_PATH);
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Some(url.to_string())
}

fn is_valid_host(host: &str) -> bool {
    !host.is_empty()
        && host
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | ':' | '[' | ']'))
}

/// Escape the five XML special characters.
pub fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
