//! Backend credentials
//!
//! The relay never acquires tokens itself. An [`AuthProvider`] produces a
//! [`CredentialBundle`] once at startup and the bundle is shared read-only
//! for the lifetime of the process.

mod portal;

pub use portal::PortalAuthProvider;

use async_trait::async_trait;
use reqwest::header::{COOKIE, HeaderMap, HeaderValue};

use crate::error::{BridgeError, Result};

/// Cookies the chat API refuses to work without
pub const REQUIRED_COOKIES: [&str; 2] = ["dify_app_id", "dify_app_config"];

/// Source of backend credentials
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Produce a validated credential bundle
    async fn credentials(&self) -> Result<CredentialBundle>;
}

/// Everything needed to talk to the portal backend on behalf of one user
#[derive(Clone)]
pub struct CredentialBundle {
    /// Portal user token (`x-ai-portal-token`)
    pub token: String,
    /// Portal user id (`x-ai-portal-uid`)
    pub uid: String,
    /// Application cookies as (name, value) pairs, in the order received
    pub cookies: Vec<(String, String)>,
    /// Header template sent with every backend call
    pub headers: HeaderMap,
    /// Model name reported to callers
    pub model: String,
}

impl CredentialBundle {
    /// Check that every field was populated
    pub fn validate(&self) -> Result<()> {
        if self.token.is_empty() {
            return Err(BridgeError::Auth("user token is empty".to_string()));
        }
        if self.uid.is_empty() {
            return Err(BridgeError::Auth("uid is empty".to_string()));
        }
        if self.cookies.is_empty() {
            return Err(BridgeError::Auth(
                "no application cookies were issued".to_string(),
            ));
        }
        for name in REQUIRED_COOKIES {
            if self.cookie(name).is_none_or(str::is_empty) {
                return Err(BridgeError::Auth(format!(
                    "cookie {name} was not issued, the config URL may have expired"
                )));
            }
        }
        if self.headers.is_empty() {
            return Err(BridgeError::Auth("header template is empty".to_string()));
        }
        if self.model.is_empty() {
            return Err(BridgeError::Auth("model name is empty".to_string()));
        }
        Ok(())
    }

    /// Value for the `Cookie` request header
    pub fn cookie_header(&self) -> String {
        self.cookies
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect::<Vec<_>>()
            .join("; ")
    }

    /// Look up a cookie by name
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Header template plus the `Cookie` header
    pub fn request_headers(&self) -> HeaderMap {
        let mut headers = self.headers.clone();
        if let Ok(value) = HeaderValue::from_str(&self.cookie_header()) {
            headers.insert(COOKIE, value);
        }
        headers
    }

    /// Token with everything but the first and last four characters hidden
    pub fn masked_token(&self) -> String {
        let chars: Vec<char> = self.token.chars().collect();
        if chars.len() <= 8 {
            return "*".repeat(chars.len());
        }
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{head}…{tail}")
    }
}

impl std::fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let cookie_names: Vec<&str> = self.cookies.iter().map(|(n, _)| n.as_str()).collect();
        f.debug_struct("CredentialBundle")
            .field("token", &self.masked_token())
            .field("uid", &self.uid)
            .field("cookies", &cookie_names)
            .field("model", &self.model)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle() -> CredentialBundle {
        let mut headers = HeaderMap::new();
        headers.insert("x-ai-portal-token", HeaderValue::from_static("token-1234567890"));
        CredentialBundle {
            token: "token-1234567890".to_string(),
            uid: "u-1".to_string(),
            cookies: vec![
                ("dify_app_id".to_string(), "app-1".to_string()),
                ("dify_app_config".to_string(), "eyJhIjoxfQ==".to_string()),
            ],
            headers,
            model: "campus-assistant".to_string(),
        }
    }

    #[test]
    fn test_validate_complete_bundle() {
        assert!(bundle().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_fields() {
        let mut b = bundle();
        b.uid.clear();
        assert!(matches!(b.validate(), Err(BridgeError::Auth(_))));

        let mut b = bundle();
        b.cookies.clear();
        assert!(b.validate().unwrap_err().to_string().contains("cookies"));

        let mut b = bundle();
        b.cookies.retain(|(name, _)| name != "dify_app_config");
        assert!(b.validate().unwrap_err().to_string().contains("dify_app_config"));

        let mut b = bundle();
        b.cookies = vec![
            ("dify_app_id".to_string(), "app-1".to_string()),
            ("dify_app_config".to_string(), String::new()),
        ];
        assert!(b.validate().is_err());

        let mut b = bundle();
        b.model.clear();
        assert!(b.validate().unwrap_err().to_string().contains("model"));
    }

    #[test]
    fn test_cookie_header_keeps_embedded_equals() {
        let b = bundle();
        assert_eq!(
            b.cookie_header(),
            "dify_app_id=app-1; dify_app_config=eyJhIjoxfQ=="
        );
    }

    #[test]
    fn test_request_headers_include_cookie() {
        let headers = bundle().request_headers();
        assert_eq!(
            headers.get(COOKIE).unwrap().to_str().unwrap(),
            "dify_app_id=app-1; dify_app_config=eyJhIjoxfQ=="
        );
        assert!(headers.contains_key("x-ai-portal-token"));
    }

    #[test]
    fn test_cookie_lookup() {
        let b = bundle();
        assert_eq!(b.cookie("dify_app_id"), Some("app-1"));
        assert_eq!(b.cookie("missing"), None);
    }

    #[test]
    fn test_debug_masks_token() {
        let rendered = format!("{:?}", bundle());
        assert!(!rendered.contains("token-1234567890"));
        assert!(rendered.contains("toke…7890"));
        assert!(!rendered.contains("eyJhIjoxfQ=="));
    }

    #[test]
    fn test_masked_token_short() {
        let mut b = bundle();
        b.token = "abc".to_string();
        assert_eq!(b.masked_token(), "***");
    }
}
