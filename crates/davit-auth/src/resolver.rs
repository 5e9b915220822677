//! Authorization header parsing and principal resolution.

use crate::result::AuthResult;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use davit_common::{Error, Result};
use davit_meta::MetaStore;
use std::sync::Arc;
use tracing::debug;

/// A parsed `Authorization` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    /// `Authorization: Bearer <token>`
    Bearer(String),
    /// `Authorization: ApiKey <key>`
    ApiKey(String),
    /// `Authorization: Basic <base64(user:pass)>`
    Basic { username: String, password: String },
}

impl Credentials {
    /// Parse an `Authorization` header value. Returns `None` for schemes
    /// this service does not speak.
    #[must_use]
    pub fn from_header(header: &str) -> Option<Self> {
        let (scheme, rest) = header.split_once(' ')?;
        let rest = rest.trim();
        if rest.is_empty() {
            return None;
        }
        match scheme.to_ascii_lowercase().as_str() {
            "bearer" => Some(Self::Bearer(rest.to_string())),
            "apikey" => Some(Self::ApiKey(rest.to_string())),
            "basic" => {
                let decoded = BASE64.decode(rest).ok()?;
                let decoded = String::from_utf8(decoded).ok()?;
                let (username, password) = decoded.split_once(':')?;
                Some(Self::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            _ => None,
        }
    }
}

/// Resolves parsed credentials into an [`AuthResult`].
pub struct AuthResolver {
    store: Arc<MetaStore>,
    admin_username: String,
    admin_token: String,
}

impl AuthResolver {
    #[must_use]
    pub fn new(store: Arc<MetaStore>, admin_username: &str, admin_token: &str) -> Self {
        Self {
            store,
            admin_username: admin_username.to_string(),
            admin_token: admin_token.to_string(),
        }
    }

    /// Resolve an optional `Authorization` header into a principal.
    ///
    /// Missing credentials yield an anonymous result rather than an error;
    /// each operation decides whether anonymous access is acceptable.
    /// Present-but-wrong credentials fail with `unauthorized`.
    pub fn resolve(&self, header: Option<&str>) -> Result<AuthResult> {
        let Some(header) = header else {
            return Ok(AuthResult::anonymous());
        };
        let credentials = Credentials::from_header(header).ok_or(Error::Unauthorized)?;
        match credentials {
            Credentials::Bearer(token) => {
                if self.is_admin_token(&token) {
                    Ok(AuthResult::admin(&self.admin_username))
                } else {
                    // WebDAV clients may send the API key as a bearer token
                    self.resolve_api_key(&token)
                }
            }
            Credentials::ApiKey(key) => self.resolve_api_key(&key),
            Credentials::Basic { username, password } => {
                if username == self.admin_username && self.is_admin_token(&password) {
                    return Ok(AuthResult::admin(&self.admin_username));
                }
                // API keys authenticate over Basic with the key as both
                // username and password.
                if username == password {
                    return self.resolve_api_key(&password);
                }
                Err(Error::Unauthorized)
            }
        }
    }

    fn is_admin_token(&self, token: &str) -> bool {
        !self.admin_token.is_empty() && token == self.admin_token
    }

    fn resolve_api_key(&self, key: &str) -> Result<AuthResult> {
        let now = chrono::Utc::now().timestamp();
        let record = self
            .store
            .lookup_api_key(key, now)?
            .ok_or(Error::Unauthorized)?;
        debug!(key_id = %record.id, "authenticated api key");
        self.store.touch_api_key(&record.id, now)?;
        Ok(AuthResult::api_key(record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::AuthType;
    use davit_common::VirtualPath;
    use davit_meta::{ApiKeyRecord, PermissionSet};

    fn basic(user: &str, pass: &str) -> String {
        format!("Basic {}", BASE64.encode(format!("{user}:{pass}")))
    }

    fn test_resolver() -> (AuthResolver, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MetaStore::open(&dir.path().join("meta.redb")).unwrap());
        (AuthResolver::new(store, "admin", "topsecret"), dir)
    }

    #[test]
    fn test_parse_header_schemes() {
        assert_eq!(
            Credentials::from_header("Bearer abc"),
            Some(Credentials::Bearer("abc".into()))
        );
        assert_eq!(
            Credentials::from_header("ApiKey dk_1"),
            Some(Credentials::ApiKey("dk_1".into()))
        );
        assert_eq!(
            Credentials::from_header(&basic("u", "p")),
            Some(Credentials::Basic {
                username: "u".into(),
                password: "p".into()
            })
        );
        assert!(Credentials::from_header("Digest whatever").is_none());
        assert!(Credentials::from_header("Bearer").is_none());
        assert!(Credentials::from_header("Basic !!!notb64").is_none());
    }

    #[test]
    fn test_missing_header_is_anonymous() {
        let (resolver, _dir) = test_resolver();
        let auth = resolver.resolve(None).unwrap();
        assert!(!auth.authenticated);
        assert_eq!(auth.auth_type, AuthType::None);
    }

    #[test]
    fn test_admin_bearer_and_basic() {
        let (resolver, _dir) = test_resolver();
        let auth = resolver.resolve(Some("Bearer topsecret")).unwrap();
        assert!(auth.is_admin());

        let auth = resolver.resolve(Some(&basic("admin", "topsecret"))).unwrap();
        assert!(auth.is_admin());

        assert!(resolver.resolve(Some("Bearer wrong")).is_err());
        assert!(resolver.resolve(Some(&basic("admin", "wrong"))).is_err());
    }

    #[test]
    fn test_api_key_over_every_scheme() {
        let (resolver, _dir) = test_resolver();
        let record = ApiKeyRecord::generate(
            "ci",
            PermissionSet::all(),
            VirtualPath::parse("/team-a/").unwrap(),
        );
        resolver.store.put_api_key(&record).unwrap();

        for header in [
            format!("ApiKey {}", record.key),
            format!("Bearer {}", record.key),
            basic(&record.key, &record.key),
        ] {
            let auth = resolver.resolve(Some(&header)).unwrap();
            assert_eq!(auth.auth_type, AuthType::ApiKey);
            assert_eq!(auth.allowed_prefix.as_str(), "/team-a/");
        }

        // Resolution touches last_used_at
        let touched = resolver.store.get_api_key(&record.id).unwrap().unwrap();
        assert!(touched.last_used_at.is_some());
    }

    #[test]
    fn test_expired_key_refused() {
        let (resolver, _dir) = test_resolver();
        let mut record =
            ApiKeyRecord::generate("ci", PermissionSet::all(), VirtualPath::root());
        record.expires_at = Some(1);
        resolver.store.put_api_key(&record).unwrap();
        assert!(matches!(
            resolver.resolve(Some(&format!("ApiKey {}", record.key))),
            Err(Error::Unauthorized)
        ));
    }

    #[test]
    fn test_mismatched_basic_refused() {
        let (resolver, _dir) = test_resolver();
        assert!(resolver.resolve(Some(&basic("someone", "dk_x"))).is_err());
    }
}
