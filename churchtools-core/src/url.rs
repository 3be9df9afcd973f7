/// Normalise a user supplied installation URL.
///
/// `http://` URLs are kept as given. Anything else loses its scheme (if any)
/// and a trailing slash, and gets `https://` in front.
pub fn to_correct_url(url: &str) -> String {
    if url.starts_with("http:") {
        return url.to_string();
    }
    let without_scheme = match url.find("//") {
        Some(idx) if url[..idx].chars().all(|c| c.is_ascii_alphanumeric() || c == ':') => {
            &url[idx + 2..]
        }
        _ => url,
    };
    format!("https://{}", trim_trailing_slash(without_scheme))
}

pub fn trim_trailing_slash(url: &str) -> &str {
    url.strip_suffix('/').unwrap_or(url)
}
