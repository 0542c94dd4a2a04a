//! Image URL handling
//!
//! External platforms fetch images themselves, so every image reference
//! stored on a post is made absolute against the backend's public URL.

use std::net::IpAddr;
use url::Url;

/// Make an image reference absolute.
///
/// Absolute `http(s)` URLs pass through. `/uploads/x.png` and `uploads/x.png`
/// both resolve against `backend_url`.
pub fn normalize_image_url(raw: &str, backend_url: &str) -> String {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return raw.to_string();
    }

    let base = backend_url.trim_end_matches('/');
    if raw.starts_with('/') {
        format!("{}{}", base, raw)
    } else {
        format!("{}/{}", base, raw)
    }
}

pub fn is_https(url: &str) -> bool {
    Url::parse(url)
        .map(|u| u.scheme() == "https")
        .unwrap_or(false)
}

/// Whether a third party could plausibly fetch this URL.
///
/// Loopback, private, link-local and `.local` hosts are not reachable.
pub fn is_publicly_reachable(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }

    match parsed.host() {
        Some(url::Host::Domain(domain)) => {
            let domain = domain.to_ascii_lowercase();
            !(domain == "localhost" || domain.ends_with(".localhost") || domain.ends_with(".local"))
        }
        Some(url::Host::Ipv4(ip)) => is_public_ip(IpAddr::V4(ip)),
        Some(url::Host::Ipv6(ip)) => is_public_ip(IpAddr::V6(ip)),
        None => false,
    }
}

fn is_public_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            !(v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast())
        }
        IpAddr::V6(v6) => {
            let unique_local = (v6.segments()[0] & 0xfe00) == 0xfc00;
            let link_local = (v6.segments()[0] & 0xffc0) == 0xfe80;
            !(v6.is_loopback() || v6.is_unspecified() || unique_local || link_local)
        }
    }
}
