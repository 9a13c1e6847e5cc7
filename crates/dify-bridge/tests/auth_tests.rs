//! Integration tests for credential bootstrap against a mock portal

use wiremock::{Mock, MockServer, ResponseTemplate, matchers};

use dify_bridge::BridgeError;
use dify_bridge::auth::{AuthProvider, PortalAuthProvider};
use dify_bridge::config::BackendConfig;

fn provider(base_url: &str, config_url: &str) -> PortalAuthProvider {
    let config = BackendConfig {
        base_url: base_url.to_string(),
        ..BackendConfig::default()
    };
    PortalAuthProvider::new(&config, config_url).unwrap()
}

fn config_url(base_url: &str) -> String {
    format!("{base_url}/chat/app?userToken=tok-123456789&appId=app-42")
}

async fn mount_user_info(server: &MockServer, body: serde_json::Value) {
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/user-info"))
        .and(matchers::header("x-ai-portal-token", "tok-123456789"))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .expect(1)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_bootstrap_builds_complete_bundle() {
    let mock_server = MockServer::start().await;
    mount_user_info(&mock_server, serde_json::json!({"uid": "u-1"})).await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/app-info"))
        .and(matchers::query_param("appId", "app-42"))
        .and(matchers::header("x-ai-portal-token", "tok-123456789"))
        .and(matchers::header("x-ai-portal-uid", "u-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "dify_app_id=app-42; Path=/; HttpOnly")
                .append_header("set-cookie", "dify_app_config=a=b=c; Path=/")
                .set_body_json(serde_json::json!({"appName": "Campus Assistant"})),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let bundle = provider(&uri, &config_url(&uri)).credentials().await.unwrap();

    assert_eq!(bundle.token, "tok-123456789");
    assert_eq!(bundle.uid, "u-1");
    assert_eq!(bundle.model, "Campus Assistant");
    assert_eq!(bundle.cookie("dify_app_id"), Some("app-42"));
    assert_eq!(bundle.cookie("dify_app_config"), Some("a=b=c"));
    assert_eq!(bundle.cookie_header(), "dify_app_id=app-42; dify_app_config=a=b=c");
    assert_eq!(bundle.headers.get("x-ai-portal-uid").unwrap(), "u-1");
    assert_eq!(bundle.headers.get("referer").unwrap(), config_url(&uri).as_str());
    assert!(bundle.validate().is_ok());
}

#[tokio::test]
async fn test_numeric_uid_and_missing_app_name() {
    let mock_server = MockServer::start().await;
    mount_user_info(&mock_server, serde_json::json!({"uid": 1001})).await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/app-info"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "dify_app_id=app-42; Path=/")
                .append_header("set-cookie", "dify_app_config=cfg; Path=/")
                .set_body_json(serde_json::json!({})),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let bundle = provider(&uri, &config_url(&uri)).credentials().await.unwrap();

    assert_eq!(bundle.uid, "1001");
    assert_eq!(bundle.model, "app-42");
}

#[tokio::test]
async fn test_user_info_failure_is_fatal() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/user-info"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let err = provider(&uri, &config_url(&uri)).credentials().await.unwrap_err();
    assert!(matches!(err, BridgeError::Auth(ref m) if m.contains("403")));
}

#[tokio::test]
async fn test_missing_uid_is_fatal() {
    let mock_server = MockServer::start().await;
    mount_user_info(&mock_server, serde_json::json!({"name": "someone"})).await;

    let uri = mock_server.uri();
    let err = provider(&uri, &config_url(&uri)).credentials().await.unwrap_err();
    assert!(matches!(err, BridgeError::Auth(ref m) if m.contains("UID")));
}

#[tokio::test]
async fn test_no_cookies_fails_validation() {
    let mock_server = MockServer::start().await;
    mount_user_info(&mock_server, serde_json::json!({"uid": "u-1"})).await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/app-info"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({"appName": "X"})),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let err = provider(&uri, &config_url(&uri)).credentials().await.unwrap_err();
    assert!(matches!(err, BridgeError::Auth(_)));
}

#[tokio::test]
async fn test_missing_app_config_cookie_fails_at_startup() {
    let mock_server = MockServer::start().await;
    mount_user_info(&mock_server, serde_json::json!({"uid": "u-1"})).await;
    Mock::given(matchers::method("GET"))
        .and(matchers::path("/chat/api/ai-portal/app-info"))
        .respond_with(
            ResponseTemplate::new(200)
                .append_header("set-cookie", "dify_app_id=app-42; Path=/")
                .set_body_json(serde_json::json!({})),
        )
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let err = provider(&uri, &config_url(&uri)).credentials().await.unwrap_err();
    assert!(matches!(err, BridgeError::Auth(ref m) if m.contains("dify_app_config")));
}

#[tokio::test]
async fn test_config_url_without_app_id_makes_no_calls() {
    let mock_server = MockServer::start().await;
    Mock::given(matchers::any())
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let uri = mock_server.uri();
    let err = provider(&uri, &format!("{uri}/chat/app?userToken=t"))
        .credentials()
        .await
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Authentication error: Invalid config URL - missing userToken or appId"
    );
}
