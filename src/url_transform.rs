//! Per-record URL rewriting: target host override and cache busting.

use thiserror::Error;
use url::Url;

/// Query parameter forced to `false` when cache busting is enabled.
pub const CACHE_PARAM: &str = "cache";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum UrlError {
    #[error("invalid URL '{url}': {source}")]
    Parse {
        url: String,
        #[source]
        source: url::ParseError,
    },

    #[error("invalid URL '{url}': not an absolute URL with a host")]
    NotAbsolute { url: String },

    #[error("invalid host override '{host}'")]
    InvalidHost { host: String },
}

/// Parses `raw` and applies the requested rewrites.
///
/// * `host_override` replaces only `host[:port]`; scheme, userinfo, path and
///   query are left as they were. An override without a port drops any port
///   present in the original URL.
/// * `add_cache_bust` sets `cache=false`, replacing an existing `cache`
///   parameter in place (duplicates collapse into the first occurrence) and
///   appending it otherwise.
///
/// Both rewrites are idempotent.
pub fn transform_url(
    raw: &str,
    host_override: Option<&str>,
    add_cache_bust: bool,
) -> Result<Url, UrlError> {
    let mut url = Url::parse(raw).map_err(|source| UrlError::Parse {
        url: raw.to_string(),
        source,
    })?;

    if !url.has_host() {
        return Err(UrlError::NotAbsolute {
            url: raw.to_string(),
        });
    }

    if let Some(host) = host_override {
        replace_authority(&mut url, host)?;
    }

    if add_cache_bust {
        set_cache_bust(&mut url);
    }

    Ok(url)
}

fn replace_authority(url: &mut Url, host: &str) -> Result<(), UrlError> {
    let invalid = || UrlError::InvalidHost {
        host: host.to_string(),
    };

    let host = host.trim();
    if host.is_empty() {
        return Err(invalid());
    }

    // Parse the override under the same scheme so default ports normalize the
    // same way they do in the original URL.
    let authority =
        Url::parse(&format!("{}://{}", url.scheme(), host)).map_err(|_| invalid())?;
    if authority.path() != "/"
        || authority.query().is_some()
        || authority.fragment().is_some()
        || !authority.username().is_empty()
    {
        return Err(invalid());
    }

    url.set_host(authority.host_str()).map_err(|_| invalid())?;
    url.set_port(authority.port()).map_err(|_| invalid())?;
    Ok(())
}

fn set_cache_bust(url: &mut Url) {
    let mut seen = false;
    let mut pairs: Vec<(String, String)> = Vec::new();

    for (key, value) in url.query_pairs() {
        if key == CACHE_PARAM {
            if !seen {
                pairs.push((CACHE_PARAM.to_string(), "false".to_string()));
                seen = true;
            }
        } else {
            pairs.push((key.into_owned(), value.into_owned()));
        }
    }

    if !seen {
        pairs.push((CACHE_PARAM.to_string(), "false".to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_rewrites_keeps_url() {
        let url = transform_url("http://example.com/a/b?x=1", None, false).unwrap();
        assert_eq!(url.as_str(), "http://example.com/a/b?x=1");
    }

    #[test]
    fn test_host_override_replaces_authority_only() {
        let url = transform_url(
            "https://prod.example.com:8443/api/items?id=7&sort=asc",
            Some("staging.internal:9000"),
            false,
        )
        .unwrap();

        assert_eq!(url.scheme(), "https");
        assert_eq!(url.host_str(), Some("staging.internal"));
        assert_eq!(url.port(), Some(9000));
        assert_eq!(url.path(), "/api/items");
        assert_eq!(url.query(), Some("id=7&sort=asc"));
    }

    #[test]
    fn test_host_override_without_port_drops_port() {
        let url = transform_url("http://a.com:8080/x", Some("b.com"), false).unwrap();
        assert_eq!(url.as_str(), "http://b.com/x");
    }

    #[test]
    fn test_host_override_is_idempotent() {
        let once = transform_url("http://a.com/x?q=1", Some("b.com:81"), false).unwrap();
        let twice = transform_url(once.as_str(), Some("b.com:81"), false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_invalid_host_override() {
        let err = transform_url("http://a.com/x", Some("b.com/path"), false).unwrap_err();
        assert!(matches!(err, UrlError::InvalidHost { .. }));

        let err = transform_url("http://a.com/x", Some(""), false).unwrap_err();
        assert!(matches!(err, UrlError::InvalidHost { .. }));
    }

    #[test]
    fn test_cache_bust_appends_parameter() {
        let url = transform_url("http://a.com/x", None, true).unwrap();
        assert_eq!(url.as_str(), "http://a.com/x?cache=false");

        let url = transform_url("http://a.com/x?a=1&b=2", None, true).unwrap();
        assert_eq!(url.query(), Some("a=1&b=2&cache=false"));
    }

    #[test]
    fn test_cache_bust_overwrites_in_place() {
        let url = transform_url("http://a.com/x?a=1&cache=true&b=2", None, true).unwrap();
        assert_eq!(url.query(), Some("a=1&cache=false&b=2"));
    }

    #[test]
    fn test_cache_bust_is_idempotent() {
        let once = transform_url("http://a.com/x?a=1", None, true).unwrap();
        let twice = transform_url(once.as_str(), None, true).unwrap();
        assert_eq!(once, twice);
        assert_eq!(twice.query(), Some("a=1&cache=false"));
    }

    #[test]
    fn test_relative_url_rejected() {
        let err = transform_url("/just/a/path", None, false).unwrap_err();
        assert!(matches!(err, UrlError::Parse { .. }));
    }

    #[test]
    fn test_url_without_host_rejected() {
        let err = transform_url("mailto:someone@example.com", None, false).unwrap_err();
        assert!(matches!(err, UrlError::NotAbsolute { .. }));
    }
}
