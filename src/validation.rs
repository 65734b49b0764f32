use std::net::IpAddr;

use crate::error::ApiError;

pub fn check_length(field: &str, value: &str, min: usize, max: usize) -> Result<(), ApiError> {
    let len = value.chars().count();
    if len < min || len > max {
        return Err(ApiError::BadRequest(format!(
            "{field} must be between {min} and {max} characters (got {len})"
        )));
    }
    Ok(())
}

pub fn parse_int(field: &str, value: &str) -> Result<i32, ApiError> {
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("{field} must be an integer")))
}

pub fn check_year(year: i32) -> Result<(), ApiError> {
    if !(1886..=2100).contains(&year) {
        return Err(ApiError::BadRequest(format!(
            "year must be between 1886 and 2100 (got {year})"
        )));
    }
    Ok(())
}

/// Prices are stored as `DECIMAL(10, 2)`.
pub fn parse_price(value: &str) -> Result<f64, ApiError> {
    let price: f64 = value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("price must be a number".into()))?;
    if !price.is_finite() || price < 0.0 || price >= 1e8 {
        return Err(ApiError::BadRequest(
            "price must be between 0 and 99999999.99".into(),
        ));
    }
    Ok(price)
}

/// Check whether an IPv6 address is in the unique-local range (`fc00::/7`).
fn is_ipv6_unique_local(v6: &std::net::Ipv6Addr) -> bool {
    (v6.segments()[0] & 0xfe00) == 0xfc00
}

/// Check whether an IP address is private/reserved (loopback, link-local, etc.).
pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()          // 127.0.0.0/8
                || v4.is_private()    // 10/8, 172.16/12, 192.168/16
                || v4.is_link_local() // 169.254/16
                || v4.is_broadcast()  // 255.255.255.255
                || v4.is_unspecified() // 0.0.0.0
        }
        IpAddr::V6(v6) => {
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_private_ip(IpAddr::V4(v4));
            }
            v6.is_loopback()
                || v6.is_unspecified()
                || is_ipv6_unique_local(&v6)
                || (v6.segments()[0] & 0xffc0) == 0xfe80 // fe80::/10 link-local
        }
    }
}

/// Validate a URL against SSRF attacks, accepting only the specified schemes.
/// Blocks private/loopback IPs, link-local, metadata endpoints, and disallowed schemes.
pub fn check_ssrf_url(url_str: &str, allowed_schemes: &[&str]) -> Result<(), ApiError> {
    let parsed =
        url::Url::parse(url_str).map_err(|_| ApiError::BadRequest("invalid URL".into()))?;

    if !allowed_schemes.contains(&parsed.scheme()) {
        return Err(ApiError::BadRequest(format!(
            "URL must use one of these schemes: {allowed_schemes:?}"
        )));
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| ApiError::BadRequest("URL must have a host".into()))?;

    let blocked_hosts = [
        "localhost",
        "169.254.169.254",
        "metadata.google.internal",
        "[::1]",
    ];
    let host_lower = host.to_lowercase();
    if blocked_hosts.iter().any(|b| host_lower == *b) {
        return Err(ApiError::BadRequest(
            "URL must not target internal/metadata endpoints".into(),
        ));
    }

    // Strip brackets for IPv6 literals like [::1]
    let bare_ip = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare_ip.parse::<IpAddr>()
        && is_private_ip(ip)
    {
        return Err(ApiError::BadRequest(
            "URL must not target private/reserved IP addresses".into(),
        ));
    }

    Ok(())
}

/// Validate a client-supplied image URL before the service or the image host fetches it.
pub fn check_image_url(url: &str, allow_private: bool) -> Result<(), ApiError> {
    check_length("image url", url, 1, 2048)?;
    if allow_private {
        let parsed = url::Url::parse(url).map_err(|_| ApiError::BadRequest("invalid URL".into()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ApiError::BadRequest(
                "URL must use one of these schemes: [\"http\", \"https\"]".into(),
            ));
        }
        return Ok(());
    }
    check_ssrf_url(url, &["http", "https"])
}
