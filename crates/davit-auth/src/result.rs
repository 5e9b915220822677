//! The per-request authentication result.

use davit_common::{Error, Result, VirtualPath};
use davit_meta::{ApiKeyRecord, PermissionSet};
use serde::Serialize;

/// The kind of principal a request resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthType {
    Admin,
    ApiKey,
    None,
}

/// The outcome of credential resolution, attached to every request.
#[derive(Debug, Clone)]
pub struct AuthResult {
    pub authenticated: bool,
    pub auth_type: AuthType,
    pub principal_id: String,
    pub permissions: PermissionSet,
    /// The virtual-path prefix this principal may operate under.
    pub allowed_prefix: VirtualPath,
    /// Present for API-key principals.
    pub key_info: Option<ApiKeyRecord>,
}

impl AuthResult {
    /// An unauthenticated request.
    #[must_use]
    pub fn anonymous() -> Self {
        Self {
            authenticated: false,
            auth_type: AuthType::None,
            principal_id: String::new(),
            permissions: PermissionSet::default(),
            allowed_prefix: VirtualPath::root(),
            key_info: None,
        }
    }

    /// The admin principal: every capability, unrestricted prefix.
    #[must_use]
    pub fn admin(principal_id: &str) -> Self {
        Self {
            authenticated: true,
            auth_type: AuthType::Admin,
            principal_id: principal_id.to_string(),
            permissions: PermissionSet::all(),
            allowed_prefix: VirtualPath::root(),
            key_info: None,
        }
    }

    /// An API-key principal bounded by its record.
    #[must_use]
    pub fn api_key(record: ApiKeyRecord) -> Self {
        Self {
            authenticated: true,
            auth_type: AuthType::ApiKey,
            principal_id: record.id.clone(),
            permissions: record.permissions,
            allowed_prefix: record.basic_path.clone(),
            key_info: Some(record),
        }
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.auth_type == AuthType::Admin
    }

    /// Require any authenticated principal.
    pub fn require_authenticated(&self) -> Result<()> {
        if self.authenticated {
            Ok(())
        } else {
            Err(Error::Unauthorized)
        }
    }

    /// Require the mount capability (the file-system and WebDAV surface).
    pub fn require_mount(&self) -> Result<()> {
        self.require_authenticated()?;
        if self.is_admin() || self.permissions.mount {
            Ok(())
        } else {
            Err(Error::PermissionDenied("mount capability required".into()))
        }
    }

    /// Require the admin principal.
    pub fn require_admin(&self) -> Result<()> {
        self.require_authenticated()?;
        if self.is_admin() {
            Ok(())
        } else {
            Err(Error::PermissionDenied("admin required".into()))
        }
    }

    /// Cache-partitioning class: listings cached for one principal class
    /// are never served to another.
    #[must_use]
    pub fn principal_class(&self) -> String {
        if self.is_admin() {
            "admin".to_string()
        } else {
            format!("apikey:{}", self.allowed_prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_is_refused() {
        let auth = AuthResult::anonymous();
        assert!(matches!(
            auth.require_authenticated(),
            Err(Error::Unauthorized)
        ));
        assert!(matches!(auth.require_mount(), Err(Error::Unauthorized)));
    }

    #[test]
    fn test_admin_has_every_capability() {
        let auth = AuthResult::admin("admin");
        assert!(auth.require_mount().is_ok());
        assert!(auth.require_admin().is_ok());
        assert_eq!(auth.principal_class(), "admin");
    }

    #[test]
    fn test_api_key_capability_gate() {
        let mut record = ApiKeyRecord::generate(
            "ci",
            PermissionSet::default(),
            VirtualPath::parse("/team-a/").unwrap(),
        );
        record.permissions.text = true;
        let auth = AuthResult::api_key(record);
        assert!(matches!(
            auth.require_mount(),
            Err(Error::PermissionDenied(_))
        ));
        assert!(matches!(
            auth.require_admin(),
            Err(Error::PermissionDenied(_))
        ));
        assert_eq!(auth.principal_class(), "apikey:/team-a/");
    }
}
