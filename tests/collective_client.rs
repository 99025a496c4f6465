use serde_json::json;
use wiremock::matchers::{basic_auth, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use collective_graph::collective_client::CollectiveClient;
use collective_graph::config::CollectiveConfig;
use collective_graph::domain::types::ResourceType;
use collective_graph::{FetchError, FetchRequest, Fetcher};

fn client(server: &MockServer) -> CollectiveClient {
    let config = CollectiveConfig {
        base_url: server.uri(),
        api_prefix: "/ibm/api/collective/v1".to_string(),
        username: Some("admin".to_string()),
        password: Some("secret".to_string()),
        ..CollectiveConfig::default()
    };
    CollectiveClient::new(&config).unwrap()
}

fn host(id: &str) -> FetchRequest {
    FetchRequest::Resource {
        kind: ResourceType::Host,
        id: id.to_string(),
    }
}

#[tokio::test]
async fn fetches_payload_with_credentials() {
    let server = MockServer::start().await;
    let payload = json!({"id": "localhost", "servers": {"up": 0, "down": 0, "unknown": 0, "list": []}});
    Mock::given(method("GET"))
        .and(path("/ibm/api/collective/v1/hosts/localhost"))
        .and(basic_auth("admin", "secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(payload.clone()))
        .expect(1)
        .mount(&server)
        .await;

    let fetched = client(&server).fetch(&host("localhost")).await.unwrap();
    assert_eq!(fetched, Some(payload));
}

#[tokio::test]
async fn not_found_is_not_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let fetched = client(&server).fetch(&FetchRequest::StandaloneServer).await.unwrap();
    assert!(fetched.is_none());
}

#[tokio::test]
async fn server_errors_carry_the_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ibm/api/collective/v1/clusters"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let err = client(&server)
        .fetch(&FetchRequest::Collection(ResourceType::Clusters))
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status { status: 500, .. }), "{err}");
}

#[tokio::test]
async fn malformed_bodies_are_decode_errors() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client(&server).fetch(&host("localhost")).await.unwrap_err();
    assert!(matches!(err, FetchError::Decode { .. }), "{err}");
}
