use std::sync::Arc;
use std::time::Duration;

use content_loader::test_support::{RecordingInterceptor, RejectingInterceptor};
use content_loader::{
    Exchange, Interceptor, MimeType, Next, ResponseContent, ResponseSlot, RestClient, RestEntity,
    RestError,
};
use reqwest::header::HeaderValue;
use reqwest::{Request, Response};
use serde_json::{Value, json};
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Appends its tag to the `x-trail` header, so tests can see the order
/// interceptors ran in.
struct TrailInterceptor(&'static str);

#[async_trait::async_trait]
impl Interceptor for TrailInterceptor {
    async fn intercept(&self, mut request: Request, next: Next<'_>) -> Result<Response, RestError> {
        let trail = match request.headers().get("x-trail") {
            Some(existing) => format!("{}-{}", existing.to_str().unwrap(), self.0),
            None => self.0.to_owned(),
        };
        request
            .headers_mut()
            .insert("x-trail", HeaderValue::from_str(&trail).unwrap());
        next.run(request).await
    }
}

fn client_for(server: &MockServer) -> RestClient {
    RestClient::with_base_url(&server.uri()).unwrap()
}

#[tokio::test]
async fn get_json_resolves_path_and_query() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/things"))
        .and(query_param("page", "2"))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let body: Value = client
        .get_json("/api/things", &[("page", "2".to_owned())])
        .await
        .unwrap();

    assert_eq!(body, json!({"ok": true}));
}

#[tokio::test]
async fn json_body_is_encoded_with_content_type() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/things"))
        .and(header("content-type", "application/json"))
        .and(body_string(r#"{"name":"x"}"#))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    client
        .post_json("/api/things", &json!({"name": "x"}))
        .await
        .unwrap();
}

#[tokio::test]
async fn raw_bytes_are_sent_verbatim() {
    let server = MockServer::start().await;

    Mock::given(method("PUT"))
        .and(path("/raw"))
        .and(body_string("not { json"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let result = client
        .exchange(
            Exchange::new(reqwest::Method::PUT, "/raw")
                .body(RestEntity::bytes(Some(MimeType::Other("text/plain".into())), "not { json")),
        )
        .await
        .unwrap();

    assert!(result.is_none());
}

#[tokio::test]
async fn text_slot_returns_raw_body() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/plain"))
        .respond_with(ResponseTemplate::new(200).set_body_string("hello there"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let content = client
        .exchange(Exchange::get("/plain").response(ResponseSlot::text()))
        .await
        .unwrap();

    assert_eq!(content, Some(ResponseContent::Text("hello there".into())));
}

#[tokio::test]
async fn non_2xx_is_a_failed_response() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_raw("no such thing", "text/plain"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .exchange(Exchange::get("/missing").response(ResponseSlot::json()))
        .await
        .unwrap_err();

    match err {
        RestError::FailedResponse(failed) => {
            assert_eq!(failed.status_code, 404);
            assert_eq!(failed.status, "404 Not Found");
            assert_eq!(failed.content_type.as_deref(), Some("text/plain"));
            assert_eq!(failed.body, b"no such thing");
        }
        other => panic!("expected a failed response, got {other:?}"),
    }
}

#[tokio::test]
async fn redirects_are_failures_too() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/moved"))
        .respond_with(ResponseTemplate::new(304))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client.exchange(Exchange::get("/moved")).await.unwrap_err();

    assert_eq!(err.status_code(), Some(304));
}

#[tokio::test]
async fn undecodable_json_is_an_encoding_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/broken"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{ not json"))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let err = client
        .exchange(Exchange::get("/broken").response(ResponseSlot::json()))
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::Encoding(_)));
}

#[tokio::test]
async fn unsupported_body_never_reaches_the_server() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = client_for(&server);
    let entity = RestEntity {
        content_type: None,
        content: content_loader::rest::Content::Json(json!({"a": 1})),
    };
    let err = client
        .exchange(Exchange::post("/things").body(entity))
        .await
        .unwrap_err();

    assert!(matches!(err, RestError::UnsupportedBody));
}

#[tokio::test]
async fn interceptors_run_in_order() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/ordered"))
        .and(header("x-trail", "first-second"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut client = client_for(&server);
    client.add_interceptor(Arc::new(TrailInterceptor("first")));
    client.add_interceptor(Arc::new(TrailInterceptor("second")));

    client.exchange(Exchange::get("/ordered")).await.unwrap();
}

#[tokio::test]
async fn interceptor_can_short_circuit() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let recorder = Arc::new(RecordingInterceptor::new());
    let mut client = client_for(&server);
    client.add_interceptor(recorder.clone());
    client.add_interceptor(Arc::new(RejectingInterceptor::new(401)));

    let err = client.exchange(Exchange::get("/blocked")).await.unwrap_err();

    assert_eq!(err.status_code(), Some(401));
    assert_eq!(recorder.requests(), vec!["GET /blocked"]);
}

#[tokio::test]
async fn slow_server_times_out_as_transport_error() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let client = client_for(&server).with_timeout(Duration::from_secs(30));
    let err = client
        .exchange(Exchange::get("/slow").timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();

    match err {
        RestError::Transport(e) => assert!(e.is_timeout()),
        other => panic!("expected a transport error, got {other:?}"),
    }
}

#[tokio::test]
async fn connection_refused_is_a_transport_error() {
    let client = RestClient::with_base_url("http://127.0.0.1:1").unwrap();
    let err = client.exchange(Exchange::get("/x")).await.unwrap_err();

    assert!(matches!(err, RestError::Transport(_)));
}
