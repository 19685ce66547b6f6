//! Caller identity
//!
//! Authentication happens upstream. By the time a request reaches the engine the
//! proxy has validated the caller and stamped its identity into headers; this
//! module only reads them back into an [`Identity`].

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ROLE_HEADER: &str = "x-user-role";
pub const LOCATIONS_HEADER: &str = "x-allowed-locations";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Supervisor,
    Viewer,
}

impl FromStr for Role {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Role::Admin),
            "supervisor" => Ok(Role::Supervisor),
            "viewer" => Ok(Role::Viewer),
            other => Err(IdentityError::InvalidRole(other.to_string())),
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Role::Admin => "admin",
            Role::Supervisor => "supervisor",
            Role::Viewer => "viewer",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("missing header {0}")]
    Missing(&'static str),

    #[error("invalid role '{0}'")]
    InvalidRole(String),

    #[error("header {0} is not valid UTF-8")]
    Encoding(&'static str),
}

/// A validated caller
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub role: Role,
    /// Locations the caller may see; `None` means every location
    pub allowed_locations: Option<BTreeSet<String>>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, role: Role) -> Self {
        Self {
            user_id: user_id.into(),
            role,
            allowed_locations: None,
        }
    }

    pub fn with_locations<I, S>(mut self, locations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_locations = Some(locations.into_iter().map(Into::into).collect());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Sees everything without filtering
    pub fn is_unrestricted(&self) -> bool {
        self.is_admin() || self.allowed_locations.is_none()
    }

    pub fn can_see_location(&self, location: &str) -> bool {
        if self.is_admin() {
            return true;
        }
        match &self.allowed_locations {
            None => true,
            Some(allowed) => allowed.contains(location),
        }
    }
}

/// Resolves the caller of a request
pub trait IdentityProvider: Send + Sync {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError>;
}

/// Trusts the identity headers set by the auth proxy
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderIdentityProvider;

fn header<'a>(headers: &'a HeaderMap, name: &'static str) -> Result<Option<&'a str>, IdentityError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(|v| Some(v.trim()))
            .map_err(|_| IdentityError::Encoding(name)),
    }
}

impl IdentityProvider for HeaderIdentityProvider {
    fn resolve(&self, headers: &HeaderMap) -> Result<Identity, IdentityError> {
        let user_id = header(headers, USER_ID_HEADER)?
            .filter(|v| !v.is_empty())
            .ok_or(IdentityError::Missing(USER_ID_HEADER))?;
        let role: Role = header(headers, ROLE_HEADER)?
            .ok_or(IdentityError::Missing(ROLE_HEADER))?
            .parse()?;

        let identity = Identity::new(user_id, role);
        let locations: Vec<&str> = header(headers, LOCATIONS_HEADER)?
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        if locations.is_empty() {
            Ok(identity)
        } else {
            Ok(identity.with_locations(locations))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_resolves_scoped_supervisor() {
        let identity = HeaderIdentityProvider
            .resolve(&headers(&[
                (USER_ID_HEADER, "sup-1"),
                (ROLE_HEADER, "Supervisor"),
                (LOCATIONS_HEADER, "austin, denver ,"),
            ]))
            .unwrap();
        assert_eq!(identity.role, Role::Supervisor);
        assert!(identity.can_see_location("denver"));
        assert!(!identity.can_see_location("boston"));
        assert!(!identity.is_unrestricted());
    }

    #[test]
    fn test_admin_sees_all_locations() {
        let identity = HeaderIdentityProvider
            .resolve(&headers(&[
                (USER_ID_HEADER, "root"),
                (ROLE_HEADER, "admin"),
                (LOCATIONS_HEADER, "austin"),
            ]))
            .unwrap();
        assert!(identity.is_unrestricted());
        assert!(identity.can_see_location("boston"));
    }

    #[test]
    fn test_missing_or_bad_headers() {
        let err = HeaderIdentityProvider
            .resolve(&headers(&[(ROLE_HEADER, "viewer")]))
            .unwrap_err();
        assert_eq!(err, IdentityError::Missing(USER_ID_HEADER));

        let err = HeaderIdentityProvider
            .resolve(&headers(&[(USER_ID_HEADER, "u"), (ROLE_HEADER, "root")]))
            .unwrap_err();
        assert_eq!(err, IdentityError::InvalidRole("root".into()));
    }
}
