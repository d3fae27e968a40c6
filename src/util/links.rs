use std::net::IpAddr;
use thiserror::Error;
use url::Url;

#[derive(Error, Debug, PartialEq)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(String),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Parse a URL the engine is about to request: http or https only.
///
/// API and media hosts come from configuration and the feed, so their
/// addresses are not restricted beyond the scheme.
pub fn parse_request_url(raw: &str) -> Result<Url, UrlValidationError> {
    let url = Url::parse(raw.trim())?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(UrlValidationError::UnsupportedScheme(scheme.to_owned())),
    }
}

/// Turn a story's swipe-up URL into something safe to hand to a browser.
///
/// Links without a scheme get `http://` prepended. Loopback and private
/// addresses are refused since the link came from a remote feed.
pub fn normalize_link(raw: &str) -> Result<Url, UrlValidationError> {
    let raw = raw.trim();
    let url = if raw.starts_with("http://") || raw.starts_with("https://") {
        Url::parse(raw)?
    } else {
        match Url::parse(raw) {
            // A bare "example.com" fails to parse; "mailto:x" parses with a foreign scheme
            Ok(url) if url.scheme() != "http" && url.scheme() != "https" && raw.contains("://") => {
                return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
            }
            _ => Url::parse(&format!("http://{raw}"))?,
        }
    };

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    reject_internal_host(&url)?;
    Ok(url)
}

fn reject_internal_host(url: &Url) -> Result<(), UrlValidationError> {
    let Some(host) = url.host_str() else {
        return Ok(());
    };
    if host == "localhost" {
        return Err(UrlValidationError::Localhost);
    }

    let bare = host
        .strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host);
    if let Ok(ip) = bare.parse::<IpAddr>() {
        if ip.is_loopback() {
            return Err(UrlValidationError::Localhost);
        }
        if is_private_ip(&ip) {
            return Err(UrlValidationError::PrivateIp(ip.to_string()));
        }
    }
    Ok(())
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4.is_private() || v4.is_link_local() || v4.is_unspecified(),
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            // fc00::/7 unique local, fe80::/10 link local
            v6.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_url_accepts_http_and_https() {
        assert!(parse_request_url("https://api.example.com/stories").is_ok());
        // Local endpoints are fine for requests
        assert!(parse_request_url("http://127.0.0.1:8080/stories").is_ok());
    }

    #[test]
    fn test_request_url_rejects_other_schemes() {
        assert_eq!(
            parse_request_url("file:///etc/passwd"),
            Err(UrlValidationError::UnsupportedScheme("file".into()))
        );
        assert!(matches!(
            parse_request_url("not a url"),
            Err(UrlValidationError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_normalize_link_keeps_full_urls() {
        let url = normalize_link("https://careers.example.com/jobs?id=4").unwrap();
        assert_eq!(url.as_str(), "https://careers.example.com/jobs?id=4");
    }

    #[test]
    fn test_normalize_link_adds_http_prefix() {
        let url = normalize_link("www.example.com/about").unwrap();
        assert_eq!(url.as_str(), "http://www.example.com/about");

        let url = normalize_link("  example.com ").unwrap();
        assert_eq!(url.host_str(), Some("example.com"));
    }

    #[test]
    fn test_normalize_link_rejects_foreign_schemes() {
        assert!(matches!(
            normalize_link("ftp://example.com/file"),
            Err(UrlValidationError::UnsupportedScheme(_))
        ));
    }

    #[test]
    fn test_normalize_link_rejects_internal_hosts() {
        assert_eq!(
            normalize_link("http://localhost/admin"),
            Err(UrlValidationError::Localhost)
        );
        assert_eq!(
            normalize_link("127.0.0.1/admin"),
            Err(UrlValidationError::Localhost)
        );
        assert!(matches!(
            normalize_link("http://192.168.1.1/"),
            Err(UrlValidationError::PrivateIp(_))
        ));
        assert!(matches!(
            normalize_link("http://[fe80::1]/"),
            Err(UrlValidationError::PrivateIp(_))
        ));
        assert!(normalize_link("http://[::1]/").is_err());
    }

    #[test]
    fn test_normalize_link_rejects_empty() {
        assert!(normalize_link("").is_err());
    }
}
