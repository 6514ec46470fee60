//! Domain normalization and matching for autofill lookups.

use url::Url;

/// Reduce a URL or host to a bare, lowercase domain.
///
/// Input without a scheme is read as `https://<input>`. The host is
/// lowercased and loses a trailing dot and one leading `www.`. Returns an
/// empty string when no host can be parsed.
pub fn normalize_domain(input: &str) -> String {
    let input = input.trim();
    if input.is_empty() {
        return String::new();
    }

    let parsed = if has_scheme(input) {
        Url::parse(input)
    } else {
        Url::parse(&format!("https://{}", input))
    };
    let Some(host) = parsed.ok().and_then(|url| url.host_str().map(str::to_lowercase)) else {
        return String::new();
    };

    let host = host.trim_end_matches('.');
    host.strip_prefix("www.").unwrap_or(host).to_string()
}

/// True if `input` starts with `<scheme>://`.
///
/// The text before the first `://` must be a valid scheme name, so a URL
/// embedded in a path or query string is not mistaken for one.
fn has_scheme(input: &str) -> bool {
    let Some((scheme, _)) = input.split_once("://") else {
        return false;
    };
    let mut chars = scheme.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Whether a credential stored for `entry_domain` applies to `target`.
///
/// True when the normalized target equals the entry's domain or is a
/// subdomain of it on a dot boundary. A parent target never matches a
/// narrower entry.
pub fn domain_matches(entry_domain: &str, target: &str) -> bool {
    let entry = normalize_domain(entry_domain);
    let target = normalize_domain(target);
    if entry.is_empty() || target.is_empty() {
        return false;
    }

    if target == entry {
        return true;
    }
    target.len() > entry.len()
        && target.ends_with(entry.as_str())
        && target.as_bytes()[target.len() - entry.len() - 1] == b'.'
}
