//! Request classification

use axum::http::{request::Parts, Extensions, HeaderMap, Method};
use std::sync::Arc;

use crate::config::Config;
use crate::middleware::auth::{Authenticator, Identity, OperatorContext};

#[derive(Debug, Clone)]
pub enum Classification {
    /// Operator traffic, served real content
    Authenticated(OperatorContext),
    SimpleBaitCandidate,
    DeepCollectionSubmission,
    /// Path ends in `.ext` (lower-cased), or is the probe script
    StaticLookalike { extension: String },
}

pub trait RequestClassifier: Send + Sync {
    fn classify(&self, parts: &Parts) -> Classification;
}

pub struct Gatekeeper {
    authenticator: Arc<dyn Authenticator>,
    deep_collector_path: String,
    probe_script_path: String,
}

impl Gatekeeper {
    pub fn new(authenticator: Arc<dyn Authenticator>, config: &Config) -> Self {
        Self {
            authenticator,
            deep_collector_path: config.deep_collector_path.clone(),
            probe_script_path: config.probe_script_path.clone(),
        }
    }

    /// Capability check, reusing an earlier result stored in `extensions`
    pub fn identify(&self, extensions: &Extensions, headers: &HeaderMap) -> Option<OperatorContext> {
        match extensions.get::<Identity>() {
            Some(Identity(operator)) => operator.clone(),
            None => self.authenticator.authenticate(headers),
        }
    }
}

impl RequestClassifier for Gatekeeper {
    fn classify(&self, parts: &Parts) -> Classification {
        if let Some(operator) = self.identify(&parts.extensions, &parts.headers) {
            return Classification::Authenticated(operator);
        }

        let path = parts.uri.path();
        if parts.method == Method::POST && path == self.deep_collector_path {
            return Classification::DeepCollectionSubmission;
        }
        if path == self.probe_script_path {
            return Classification::StaticLookalike {
                extension: static_extension(path).unwrap_or_default(),
            };
        }
        match static_extension(path) {
            Some(extension) => Classification::StaticLookalike { extension },
            None => Classification::SimpleBaitCandidate,
        }
    }
}

/// Extension of the last path segment, if it is `[a-zA-Z0-9]+`
fn static_extension(path: &str) -> Option<String> {
    let segment = path.rsplit('/').next()?;
    let (_, extension) = segment.rsplit_once('.')?;
    if extension.is_empty() || !extension.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::middleware::auth::JwtAuthenticator;
    use axum::http::{header::AUTHORIZATION, Request};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Wraps the JWT check and counts how often a token is decoded
    pub(crate) struct CountingAuthenticator {
        inner: JwtAuthenticator,
        pub calls: Arc<AtomicUsize>,
    }

    impl CountingAuthenticator {
        pub(crate) fn new(config: &Config) -> Self {
            Self {
                inner: JwtAuthenticator::new(config),
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Authenticator for CountingAuthenticator {
        fn authenticate(&self, headers: &HeaderMap) -> Option<OperatorContext> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.authenticate(headers)
        }
    }

    fn gatekeeper(config: &Config) -> Gatekeeper {
        Gatekeeper::new(Arc::new(JwtAuthenticator::new(config)), config)
    }

    fn parts(method: Method, path: &str, bearer: Option<&str>) -> Parts {
        let mut builder = Request::builder().method(method).uri(path);
        if let Some(token) = bearer {
            builder = builder.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        builder.body(()).unwrap().into_parts().0
    }

    #[test]
    fn extensions_are_detected_on_the_last_segment() {
        assert_eq!(static_extension("/static/app.JS"), Some("js".to_string()));
        assert_eq!(static_extension("/.env"), Some("env".to_string()));
        assert_eq!(static_extension("/wp-login.php"), Some("php".to_string()));
        assert_eq!(static_extension("/v1.2/users"), None);
        assert_eq!(static_extension("/trailing."), None);
        assert_eq!(static_extension("/archive.tar-gz"), None);
        assert_eq!(static_extension("/"), None);
    }

    #[test]
    fn classification_order() {
        let config = Config::default();
        let gate = gatekeeper(&config);

        assert!(matches!(
            gate.classify(&parts(Method::POST, "/api/v2/collect", None)),
            Classification::DeepCollectionSubmission
        ));
        assert!(matches!(
            gate.classify(&parts(Method::GET, "/api/v2/collect", None)),
            Classification::SimpleBaitCandidate
        ));
        assert!(matches!(
            gate.classify(&parts(Method::GET, "/favicon.ico", None)),
            Classification::StaticLookalike { extension } if extension == "ico"
        ));
        assert!(matches!(
            gate.classify(&parts(Method::GET, "/phpmyadmin/", None)),
            Classification::SimpleBaitCandidate
        ));

        let token = crate::middleware::auth::tests::token(&config, "operator");
        assert!(matches!(
            gate.classify(&parts(Method::POST, "/api/v2/collect", Some(&token))),
            Classification::Authenticated(operator) if operator.subject == "analyst"
        ));
    }

    #[test]
    fn probe_script_without_extension_is_still_a_lookalike() {
        let config = Config {
            probe_script_path: "/loader".to_string(),
            ..Config::default()
        };
        let gate = gatekeeper(&config);

        assert!(matches!(
            gate.classify(&parts(Method::GET, "/loader", None)),
            Classification::StaticLookalike { extension } if extension.is_empty()
        ));
        assert!(matches!(
            gate.classify(&parts(Method::GET, "/loader/more", None)),
            Classification::SimpleBaitCandidate
        ));
    }

    #[test]
    fn cached_identity_skips_the_token_check() {
        let config = Config::default();
        let counting = CountingAuthenticator::new(&config);
        let calls = counting.calls.clone();
        let gate = Gatekeeper::new(Arc::new(counting), &config);

        let token = crate::middleware::auth::tests::token(&config, "operator");
        let mut request = parts(Method::GET, "/", Some(&token));
        assert!(gate.classify(&request).is_authenticated());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A cached negative result wins over the header
        request.extensions.insert(Identity(None));
        assert!(!gate.classify(&request).is_authenticated());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    impl Classification {
        fn is_authenticated(&self) -> bool {
            matches!(self, Classification::Authenticated(_))
        }
    }
}
