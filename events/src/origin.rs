//! Pre-upgrade origin validation.
//!
//! Cross-origin rejection is the default: a connection whose `Origin` host
//! differs from the request `Host` is refused unless the allowlist (exact
//! entries or `*.domain` wildcards) or a custom predicate grants it.

use std::sync::Arc;

type Predicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

#[derive(Clone, Default)]
pub struct OriginPolicy {
    allowed: Vec<String>,
    predicate: Option<Predicate>,
}

impl OriginPolicy {
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed,
            predicate: None,
        }
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&str) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(Arc::new(predicate));
        self
    }

    /// `origin` is the raw Origin header, `host` the request Host header.
    /// A missing Origin (non-browser client) is always allowed.
    pub fn allows(&self, origin: Option<&str>, host: Option<&str>) -> bool {
        let Some(origin) = origin else {
            return true;
        };
        let origin_host = strip_scheme(origin);
        if let Some(host) = host
            && origin_host == host
        {
            return true;
        }
        for entry in &self.allowed {
            if let Some(domain) = entry.strip_prefix("*.") {
                let allowed_suffix = format!(".{}", strip_port(domain));
                if strip_port(origin_host).ends_with(&allowed_suffix) {
                    return true;
                }
            } else if strip_scheme(entry) == origin_host {
                return true;
            }
        }
        if let Some(predicate) = &self.predicate {
            return predicate(origin);
        }
        false
    }
}

fn strip_scheme(value: &str) -> &str {
    value
        .strip_prefix("https://")
        .or_else(|| value.strip_prefix("http://"))
        .unwrap_or(value)
}

fn strip_port(value: &str) -> &str {
    value.rsplit_once(':').map(|(h, _)| h).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_host_allowed_by_default() {
        let policy = OriginPolicy::default();
        assert!(policy.allows(Some("http://localhost:8080"), Some("localhost:8080")));
        assert!(!policy.allows(Some("http://evil.example"), Some("localhost:8080")));
    }

    #[test]
    fn test_missing_origin_allowed() {
        assert!(OriginPolicy::default().allows(None, Some("localhost:8080")));
    }

    #[test]
    fn test_exact_allowlist() {
        let policy = OriginPolicy::new(vec!["https://ui.example.com".into()]);
        assert!(policy.allows(Some("https://ui.example.com"), Some("api.example.com")));
        assert!(!policy.allows(Some("https://other.example.com"), Some("api.example.com")));
    }

    #[test]
    fn test_wildcard_allowlist() {
        let policy = OriginPolicy::new(vec!["*.example.com".into()]);
        assert!(policy.allows(Some("https://ui.example.com"), Some("somewhere.else")));
        assert!(policy.allows(Some("https://deep.ui.example.com"), Some("somewhere.else")));
        assert!(!policy.allows(Some("https://example.org"), Some("somewhere.else")));
        // The bare apex is not covered by the wildcard
        assert!(!policy.allows(Some("https://example.com"), Some("somewhere.else")));
    }

    #[test]
    fn test_custom_predicate() {
        let policy =
            OriginPolicy::default().with_predicate(|origin| origin.ends_with(".trusted.dev"));
        assert!(policy.allows(Some("https://app.trusted.dev"), Some("api")));
        assert!(!policy.allows(Some("https://app.untrusted.dev"), Some("api")));
    }
}
