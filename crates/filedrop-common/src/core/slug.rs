//! Public download URLs for session slugs.
//!
//! Format: `<protocol>//<hostname>[:<port>]/download/<slug>`, with the port
//! segment left out for 80 and 443.

use url::Url;

/// Where the download page is served from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    /// Scheme including the trailing colon, e.g. `https:`
    pub protocol: String,
    pub hostname: String,
    pub port: Option<u16>,
}

impl Origin {
    pub fn new(protocol: &str, hostname: &str, port: Option<u16>) -> Self {
        let protocol = if protocol.ends_with(':') {
            protocol.to_string()
        } else {
            format!("{}:", protocol)
        };
        Self {
            protocol,
            hostname: hostname.to_string(),
            port,
        }
    }

    /// Parse an origin such as `https://example.com:8080`.
    ///
    /// Only the scheme, host and port are kept. An omitted port stays `None`.
    pub fn parse(input: &str) -> Result<Self, url::ParseError> {
        let url = Url::parse(input)?;
        let host = url.host_str().ok_or(url::ParseError::EmptyHost)?;
        Ok(Self::new(url.scheme(), host, url.port()))
    }

    fn host_prefix(&self) -> String {
        match self.port {
            None | Some(80) | Some(443) => format!("{}//{}", self.protocol, self.hostname),
            Some(port) => format!("{}//{}:{}", self.protocol, self.hostname, port),
        }
    }
}

/// Build the download URL for `slug`.
pub fn resolve_url(origin: &Origin, slug: &str) -> String {
    format!("{}/download/{}", origin.host_prefix(), slug)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ports_are_omitted() {
        for port in [80, 443] {
            let origin = Origin::new("https:", "example.com", Some(port));
            assert_eq!(
                resolve_url(&origin, "ab12"),
                "https://example.com/download/ab12"
            );
        }
    }

    #[test]
    fn test_other_ports_are_kept() {
        for port in [1, 3000, 8080, 8443, 65535] {
            let origin = Origin::new("http", "localhost", Some(port));
            assert_eq!(
                resolve_url(&origin, "abcdef123456"),
                format!("http://localhost:{}/download/abcdef123456", port)
            );
        }
    }

    #[test]
    fn test_port_omission_ignores_scheme() {
        // 443 on plain http is still treated as a default port
        let origin = Origin::new("http:", "example.com", Some(443));
        assert_eq!(resolve_url(&origin, "x"), "http://example.com/download/x");
    }

    #[test]
    fn test_parse_origin() {
        let origin = Origin::parse("https://example.com").unwrap();
        assert_eq!(origin, Origin::new("https:", "example.com", None));
        assert_eq!(
            resolve_url(&origin, "ab12"),
            "https://example.com/download/ab12"
        );

        let origin = Origin::parse("http://127.0.0.1:3000/ignored/path").unwrap();
        assert_eq!(origin.port, Some(3000));
        assert_eq!(
            resolve_url(&origin, "ab12"),
            "http://127.0.0.1:3000/download/ab12"
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Origin::parse("not a url").is_err());
    }
}
