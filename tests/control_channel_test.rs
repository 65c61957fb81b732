//! Signed requests as an Agent-Server would verify them.

use proptest::prelude::*;
use reqwest::Method;
use serde_json::json;

use fleetline::domain::models::AgentServerConfig;
use fleetline::infrastructure::agent_server::auth::{
    sign, signing_path, verify_request, AuthError, SIGNATURE_HEADER, TIMESTAMP_HEADER,
};
use fleetline::infrastructure::agent_server::AgentServerClient;

const SECRET: &str = "fleet-shared-secret";

fn client() -> AgentServerClient {
    AgentServerClient::new(&AgentServerConfig {
        shared_secret: Some(SECRET.to_string()),
        ..AgentServerConfig::default()
    })
    .unwrap()
}

fn verify_built(request: &reqwest::Request, now: i64) -> Result<(), AuthError> {
    let header = |name: &str| {
        request
            .headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string()
    };
    let body = request.body().and_then(reqwest::Body::as_bytes).unwrap_or_default();
    verify_request(
        SECRET.as_bytes(),
        request.method().as_str(),
        request.url().path(),
        &header(TIMESTAMP_HEADER),
        body,
        &header(SIGNATURE_HEADER),
        now,
        300,
    )
}

#[test]
fn test_get_signs_empty_body() {
    let request = client()
        .build_request(Method::GET, "http://as:8090", "/api/agents/7", None, 1_700_000_000)
        .unwrap();
    assert!(request.body().is_none());
    let expected = sign(SECRET.as_bytes(), "GET", "/api/agents/7", 1_700_000_000, b"").unwrap();
    assert_eq!(request.headers()[SIGNATURE_HEADER], expected.as_str());
    assert_eq!(verify_built(&request, 1_700_000_100), Ok(()));
}

#[test]
fn test_stale_request_is_rejected() {
    let request = client()
        .build_request(Method::POST, "as:8090", "/api/self/control", Some(&json!({"action": "stop"})), 1_000)
        .unwrap();
    assert_eq!(verify_built(&request, 1_301), Err(AuthError::Expired { skew: 301, window: 300 }));
}

proptest! {
    #[test]
    fn proptest_built_requests_verify(
        host_id in 1i64..100_000,
        query in "[a-z]{1,8}=[a-z0-9]{1,8}",
        reason in "[ -~]{0,64}",
        timestamp in 1_600_000_000i64..2_000_000_000,
    ) {
        let path = format!("/api/agents/{host_id}/control?{query}");
        let body = json!({"action": "restart", "reason": reason});
        let request = client()
            .build_request(Method::POST, "http://as:8090", &path, Some(&body), timestamp)
            .unwrap();

        prop_assert_eq!(signing_path(request.url().as_str()), format!("/api/agents/{host_id}/control"));
        prop_assert_eq!(verify_built(&request, timestamp), Ok(()));
    }
}
