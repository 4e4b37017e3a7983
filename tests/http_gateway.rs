//! HTTP gateway integration tests
//!
//! Runs `HttpGateway` against a mock analysis service: wire format of
//! both analyze endpoints, image fetching, error mapping, and health.

use a3s_shield::config::GatewayConfig;
use a3s_shield::page::PLACEHOLDER_TAG;
use a3s_shield::{
    ClassificationRequest, ClassifierGateway, ContentKind, FilterLevel, HttpGateway, MemoryPage,
    NodeTree, Session, SessionPolicy, ShieldConfig, ShieldError,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn gateway_for(server: &MockServer) -> HttpGateway {
    HttpGateway::new(&GatewayConfig {
        base_url: server.uri(),
        timeout_secs: 5,
    })
    .unwrap()
}

fn text_request(text: &str) -> ClassificationRequest {
    ClassificationRequest {
        payload: text.to_string(),
        kind: ContentKind::Text,
        threshold: 0.7,
        age_group: FilterLevel::Moderate,
    }
}

fn image_request(src: &str) -> ClassificationRequest {
    ClassificationRequest {
        payload: src.to_string(),
        kind: ContentKind::Image,
        threshold: 0.6,
        age_group: FilterLevel::Strict,
    }
}

// ─── Analyze endpoints ───────────────────────────────────────────

#[tokio::test]
async fn test_text_analysis_wire_format() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/text"))
        .and(body_partial_json(json!({
            "text": "you people are awful",
            "threshold": 0.7,
            "age_group": "moderate"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_safe": false,
            "confidence": 0.92,
            "flagged_categories": ["hate", "insult"],
            "processing_time": 0.01
        })))
        .expect(1)
        .mount(&server)
        .await;

    let verdict = gateway_for(&server)
        .classify(&text_request("you people are awful"))
        .await
        .unwrap();
    assert!(!verdict.is_safe);
    assert_eq!(verdict.confidence, 0.92);
    assert_eq!(verdict.categories, vec!["hate", "insult"]);
}

#[tokio::test]
async fn test_image_data_url_passed_through() {
    let server = MockServer::start().await;
    let data_url = "data:image/png;base64,iVBORw0KGgo=";
    Mock::given(method("POST"))
        .and(path("/api/analyze/image"))
        .and(body_partial_json(json!({
            "image": data_url,
            "age_group": "strict"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_safe": true,
            "confidence": 0.1,
            "flagged_categories": []
        })))
        .expect(1)
        .mount(&server)
        .await;

    let verdict = gateway_for(&server)
        .classify(&image_request(data_url))
        .await
        .unwrap();
    assert!(verdict.is_safe);
}

#[tokio::test]
async fn test_remote_image_fetched_and_encoded() {
    let server = MockServer::start().await;
    let bytes = vec![0x89, b'P', b'N', b'G', 1, 2, 3, 4];
    let expected = format!("data:image/png;base64,{}", BASE64.encode(&bytes));

    Mock::given(method("GET"))
        .and(path("/images/cat.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(bytes),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/image"))
        .and(body_partial_json(json!({ "image": expected })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_safe": false,
            "confidence": 0.7,
            "flagged_categories": ["violence"]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let src = format!("{}/images/cat.png", server.uri());
    let verdict = gateway_for(&server)
        .classify(&image_request(&src))
        .await
        .unwrap();
    assert!(verdict.has_category("violence"));
}

#[tokio::test]
async fn test_batch_wire_format_and_result_mapping() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/batch"))
        .and(body_partial_json(json!({
            "items": [
                { "id": 0, "type": "text", "content": "a perfectly nice remark" },
                {
                    "id": 2,
                    "type": "text",
                    "content": "you people are awful",
                    "age_group": "moderate"
                },
                { "id": 3, "type": "text", "content": "analyzer hiccup text" }
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "results": [
                { "id": 0, "result": { "is_safe": true, "confidence": 0.05 } },
                {
                    "id": 2,
                    "result": {
                        "is_safe": false,
                        "confidence": 0.9,
                        "flagged_categories": ["hate"]
                    }
                },
                { "id": 3, "result": { "is_safe": true, "error": "Text analyzer not ready" } }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let results = gateway_for(&server)
        .classify_batch(&[
            text_request("a perfectly nice remark"),
            text_request("   "),
            text_request("you people are awful"),
            text_request("analyzer hiccup text"),
        ])
        .await;

    assert_eq!(results.len(), 4);
    assert!(results[0].as_ref().unwrap().is_safe);
    // Rejected locally, never sent
    assert!(matches!(results[1], Err(ShieldError::InvalidRequest(_))));
    assert!(results[2].as_ref().unwrap().has_category("hate"));
    assert!(results[3].as_ref().unwrap_err().is_gateway());
}

#[tokio::test]
async fn test_batch_server_error_fails_every_item() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/batch"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({ "error": "Invalid batch size (1-50 items)" })),
        )
        .mount(&server)
        .await;

    let results = gateway_for(&server)
        .classify_batch(&[text_request("first batch text"), text_request("second batch text")])
        .await;
    for result in results {
        match result {
            Err(ShieldError::Gateway(failure)) => {
                assert_eq!(failure.status, Some(400));
                assert!(failure.reason.contains("Invalid batch size"));
            }
            other => panic!("expected gateway failure, got {:?}", other),
        }
    }
}

// ─── Error mapping ───────────────────────────────────────────────

#[tokio::test]
async fn test_error_status_maps_to_gateway_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/text"))
        .respond_with(
            ResponseTemplate::new(500).set_body_json(json!({ "error": "Text analysis failed" })),
        )
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .classify(&text_request("anything at all"))
        .await
        .unwrap_err();
    match err {
        ShieldError::Gateway(failure) => {
            assert_eq!(failure.status, Some(500));
            assert_eq!(failure.reason, "Text analysis failed");
        }
        other => panic!("expected gateway error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_response_is_gateway_failure() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/text"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = gateway_for(&server)
        .classify(&text_request("anything at all"))
        .await
        .unwrap_err();
    assert!(err.is_gateway());
}

#[tokio::test]
async fn test_unreachable_backend_is_transport_failure() {
    let gateway = HttpGateway::new(&GatewayConfig {
        base_url: "http://127.0.0.1:1".into(),
        timeout_secs: 2,
    })
    .unwrap();

    match gateway.classify(&text_request("anything at all")).await {
        Err(ShieldError::Gateway(failure)) => assert_eq!(failure.status, None),
        other => panic!("expected transport failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_invalid_request_never_sent() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let mut request = text_request("fine text");
    request.threshold = 1.5;
    let err = gateway_for(&server).classify(&request).await.unwrap_err();
    assert!(matches!(err, ShieldError::InvalidRequest(_)));
}

// ─── Health ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_health_check() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "healthy",
            "models_loaded": true
        })))
        .mount(&server)
        .await;
    assert!(gateway_for(&server).health().await.unwrap());

    let degraded = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "starting" })))
        .mount(&degraded)
        .await;
    assert!(!gateway_for(&degraded).health().await.unwrap());
}

// ─── End to end ──────────────────────────────────────────────────

#[tokio::test]
async fn test_session_over_http_gateway() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/text"))
        .and(body_partial_json(json!({ "text": "I will find you and hurt you" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_safe": false,
            "confidence": 0.97,
            "flagged_categories": ["threat"]
        })))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/analyze/text"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "is_safe": true,
            "confidence": 0.02,
            "flagged_categories": []
        })))
        .mount(&server)
        .await;

    let page = Arc::new(MemoryPage::with_body(
        "https://social.example.com/post/1",
        vec![
            NodeTree::element("p").with_text("Lovely weather this weekend"),
            NodeTree::element("p").with_text("I will find you and hurt you"),
        ],
    ));
    let config = ShieldConfig {
        gateway: GatewayConfig {
            base_url: server.uri(),
            timeout_secs: 5,
        },
        ..ShieldConfig::default()
    };
    let gateway = Arc::new(HttpGateway::new(&config.gateway).unwrap());
    let session = Session::new(page.clone(), gateway, config).unwrap();
    session.start(SessionPolicy::default()).await.unwrap();

    let mut settled = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if session.stats().classified == 2 {
            settled = true;
            break;
        }
    }
    assert!(settled);
    // Blocking follows classification on the consumer task
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(page.find_all(PLACEHOLDER_TAG).len(), 1);
    assert_eq!(session.stats().blocked, 1);

    session.stop().await;
}
