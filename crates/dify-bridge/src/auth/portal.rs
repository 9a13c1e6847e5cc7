//! Credential bootstrap against the portal's REST endpoints
//!
//! The portal hands out a config URL of the form
//! `https://host/...?userToken=...&appId=...`. From it we resolve the user's
//! uid, collect the application cookies and learn the app name, which is
//! reported to callers as the model.

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, SET_COOKIE};
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::{AuthProvider, CredentialBundle};
use crate::config::BackendConfig;
use crate::error::{BridgeError, Result};

const TOKEN_HEADER: &str = "x-ai-portal-token";
const UID_HEADER: &str = "x-ai-portal-uid";
const JSON_ACCEPT: &str = "application/json, text/plain, */*";

/// Bootstraps credentials from a portal config URL
#[derive(Debug)]
pub struct PortalAuthProvider {
    client: Client,
    base_url: String,
    config_url: String,
    user_agent: String,
}

/// Query parameters carried by the config URL
#[derive(Debug, Clone, PartialEq)]
struct PortalApp {
    user_token: String,
    app_id: String,
}

impl PortalAuthProvider {
    pub fn new(config: &BackendConfig, config_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.idle_timeout_secs))
            .build()
            .map_err(|e| BridgeError::Auth(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            config_url: config_url.into(),
            user_agent: config.user_agent.clone(),
        })
    }

    fn parse_config_url(&self) -> Result<PortalApp> {
        let url = Url::parse(&self.config_url)
            .map_err(|e| BridgeError::Auth(format!("Invalid config URL: {e}")))?;

        let param = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
                .filter(|v| !v.is_empty())
        };

        match (param("userToken"), param("appId")) {
            (Some(user_token), Some(app_id)) => Ok(PortalApp { user_token, app_id }),
            _ => Err(BridgeError::Auth(
                "Invalid config URL - missing userToken or appId".to_string(),
            )),
        }
    }

    async fn fetch_uid(&self, user_token: &str) -> Result<String> {
        let url = format!("{}/chat/api/ai-portal/user-info", self.base_url);
        debug!("Fetching user info from: {}", url);

        let response = self
            .client
            .get(&url)
            .header("Accept", JSON_ACCEPT)
            .header("Referer", &self.config_url)
            .header("User-Agent", &self.user_agent)
            .header(TOKEN_HEADER, user_token)
            .send()
            .await
            .map_err(|e| BridgeError::Auth(format!("Failed to fetch user info: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Auth(format!(
                "Failed to fetch user info: {}",
                status.as_u16()
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| BridgeError::Auth(format!("Invalid user info response: {e}")))?;

        match body.get("uid") {
            Some(Value::String(uid)) if !uid.is_empty() => Ok(uid.clone()),
            Some(Value::Number(uid)) => Ok(uid.to_string()),
            _ => Err(BridgeError::Auth(
                "No UID found in user info response".to_string(),
            )),
        }
    }

    async fn fetch_app_info(
        &self,
        app: &PortalApp,
        uid: &str,
    ) -> Result<(Vec<(String, String)>, Option<String>)> {
        let url = format!("{}/chat/api/ai-portal/app-info", self.base_url);
        debug!("Fetching app info from: {}", url);

        let response = self
            .client
            .get(&url)
            .query(&[("appId", app.app_id.as_str())])
            .header("Accept", JSON_ACCEPT)
            .header("Referer", &self.config_url)
            .header("User-Agent", &self.user_agent)
            .header(TOKEN_HEADER, &app.user_token)
            .header(UID_HEADER, uid)
            .send()
            .await
            .map_err(|e| BridgeError::Auth(format!("Failed to fetch app config: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::Auth(format!(
                "Failed to fetch app config: {}",
                status.as_u16()
            )));
        }

        let cookies = parse_set_cookies(response.headers());

        let app_name = match response.json::<Value>().await {
            Ok(body) => body
                .get("appName")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            Err(e) => {
                debug!("App info body is not JSON: {e}");
                None
            }
        };

        Ok((cookies, app_name))
    }

    fn build_headers(&self, user_token: &str, uid: &str) -> Result<HeaderMap> {
        let pairs: [(&'static str, &str); 16] = [
            ("accept", "*/*"),
            (
                "accept-language",
                "zh-CN,zh;q=0.9,en;q=0.8,en-GB;q=0.7,en-US;q=0.6",
            ),
            ("cache-control", "no-cache"),
            ("dnt", "1"),
            ("origin", &self.base_url),
            ("pragma", "no-cache"),
            ("referer", &self.config_url),
            ("sec-fetch-dest", "empty"),
            ("sec-fetch-mode", "cors"),
            ("sec-fetch-site", "same-origin"),
            ("user-agent", &self.user_agent),
            (
                "sec-ch-ua",
                r#""Not)A;Brand";v="8", "Chromium";v="138", "Microsoft Edge";v="138""#,
            ),
            ("sec-ch-ua-mobile", "?0"),
            ("sec-ch-ua-platform", r#""Windows""#),
            (TOKEN_HEADER, user_token),
            (UID_HEADER, uid),
        ];

        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            let value = HeaderValue::from_str(value).map_err(|e| {
                BridgeError::Auth(format!("Invalid value for header {name}: {e}"))
            })?;
            headers.insert(HeaderName::from_static(name), value);
        }
        Ok(headers)
    }
}

#[async_trait]
impl AuthProvider for PortalAuthProvider {
    async fn credentials(&self) -> Result<CredentialBundle> {
        let app = self.parse_config_url()?;

        let uid = self.fetch_uid(&app.user_token).await?;
        info!("Resolved portal uid: {}", uid);

        let (cookies, app_name) = self.fetch_app_info(&app, &uid).await?;
        let model = app_name.unwrap_or_else(|| {
            warn!(
                "App info carried no appName, config URL may have expired; using app id {} as model",
                app.app_id
            );
            app.app_id.clone()
        });

        let headers = self.build_headers(&app.user_token, &uid)?;

        let bundle = CredentialBundle {
            token: app.user_token,
            uid,
            cookies,
            headers,
            model,
        };
        bundle.validate()?;
        Ok(bundle)
    }
}

/// Collect `name=value` pairs from every `Set-Cookie` header, ignoring
/// attributes. Values keep any embedded `=`.
fn parse_set_cookies(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .filter_map(|raw| {
            let pair = raw.split(';').next()?;
            let (name, value) = pair.split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().to_string()))
        })
        .collect()
}
