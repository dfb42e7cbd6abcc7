/// Normalizes a human-readable title taken from untrusted input (feed XML,
/// OPML attributes, HTML).
///
/// Control characters are dropped, runs of whitespace (including newlines
/// and tabs) collapse to a single space, and the result is trimmed. Returns
/// `None` when nothing printable remains, so callers can fall back to a
/// derived title.
///
/// # Examples
///
/// ```
/// use feedintake::util::clean_title;
///
/// assert_eq!(clean_title("  Example\n\tBlog "), Some("Example Blog".to_owned()));
/// assert_eq!(clean_title("\x1b\x07  "), None);
/// ```
pub fn clean_title(raw: &str) -> Option<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for c in raw.chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
        } else if c.is_control() {
            continue;
        } else {
            if pending_space {
                out.push(' ');
                pending_space = false;
            }
            out.push(c);
        }
    }

    if out.is_empty() {
        None
    } else {
        Some(out)
    }
}

/// Title used when a feed advertises none: the URL's host without a leading
/// `www.`, or the full URL for host-less URLs.
pub fn host_title(url: &url::Url) -> String {
    match url.host_str() {
        Some(host) => host.strip_prefix("www.").unwrap_or(host).to_owned(),
        None => url.to_string(),
    }
}
