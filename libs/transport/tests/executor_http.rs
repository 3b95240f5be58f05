//! Executor tests against a mock provider

use std::time::Duration;

use pharmaquery_query::dialect::{ClinicalTrials, Dialect, Entrez, OpenFda};
use pharmaquery_query::{Pagination, QueryBuilder, ShapeHints};
use pharmaquery_transport::{ApiKey, Executor, ExecutorConfig, RetryPolicy, TransportError};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openfda(server: &MockServer) -> OpenFda {
    OpenFda::new("drug/event.json").with_base_url(server.uri())
}

fn metformin() -> pharmaquery_query::Query {
    QueryBuilder::new()
        .equals("generic_name", Some("metformin"))
        .build()
        .unwrap()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_retries: 2,
        initial_backoff: Duration::from_millis(10),
        max_backoff: Duration::from_millis(20),
        multiplier: 2.0,
        budget: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_json_response_decoded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/drug/event.json"))
        .and(query_param("search", "generic_name:\"metformin\""))
        .and(query_param("limit", "100"))
        .and(header("user-agent", "pharma-researcher/1.0"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "meta": {"results": {"total": 1}},
            "results": [{"safetyreportid": "1001"}]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let executor = Executor::new(ExecutorConfig::default()).unwrap();
    let document = executor.execute(&request, &dialect, None).await.unwrap();

    assert_eq!(document["results"][0]["safetyreportid"], "1001");
}

#[tokio::test]
async fn test_xml_response_decoded() {
    let server = MockServer::start().await;
    let body = r#"<?xml version="1.0" encoding="UTF-8" ?>
<!DOCTYPE eSearchResult PUBLIC "-//NLM//DTD esearch 20060628//EN" "https://eutils.ncbi.nlm.nih.gov/eutils/dtd/20060628/esearch.dtd">
<eSearchResult><Count>2</Count><RetMax>2</RetMax><RetStart>0</RetStart>
<IdList><Id>38000001</Id><Id>38000002</Id></IdList></eSearchResult>"#;
    Mock::given(method("GET"))
        .and(path("/esearch.fcgi"))
        .and(query_param("db", "pubmed"))
        .and(query_param("api_key", "k3y"))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(&server)
        .await;

    let dialect = Entrez::new("pubmed").with_base_url(server.uri());
    let query = QueryBuilder::new()
        .text_all("Title", Some("metformin"))
        .build()
        .unwrap();
    let request = dialect.compile(&query, &Pagination::default(), &ShapeHints::default());
    let config = ExecutorConfig::default().with_api_key(Some(ApiKey::query("api_key", "k3y")));
    let document = Executor::new(config)
        .unwrap()
        .execute(&request, &dialect, None)
        .await
        .unwrap();

    assert_eq!(document["eSearchResult"]["Count"], "2");
    assert_eq!(
        document["eSearchResult"]["IdList"]["Id"],
        json!(["38000001", "38000002"])
    );
    assert!(!request.url().contains("k3y"));
}

#[tokio::test]
async fn test_header_key_is_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(header("X-Api-Key", "s3cr3t"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"results": []})))
        .expect(1)
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let config = ExecutorConfig::default().with_api_key(Some(ApiKey::header("X-Api-Key", "s3cr3t")));
    let result = Executor::new(config)
        .unwrap()
        .execute(&request, &dialect, None)
        .await;
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_rate_limit_reports_retry_after() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(429)
                .insert_header("Retry-After", "7")
                .set_body_string("slow down"),
        )
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let err = Executor::new(ExecutorConfig::default())
        .unwrap()
        .execute(&request, &dialect, None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        TransportError::RateLimited {
            retry_after: Some(Duration::from_secs(7))
        }
    );
}

#[tokio::test]
async fn test_upstream_error_carries_reason() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": {"code": "NOT_FOUND", "message": "No matches found!"}
        })))
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let err = Executor::new(ExecutorConfig::default())
        .unwrap()
        .execute(&request, &dialect, None)
        .await
        .unwrap_err();

    match err {
        TransportError::UpstreamHttp {
            status,
            reason,
            body,
        } => {
            assert_eq!(status, 404);
            assert_eq!(reason.as_deref(), Some("No matches found!"));
            assert!(body.contains("NOT_FOUND"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_retry_recovers_from_server_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"studies": []})))
        .expect(1)
        .mount(&server)
        .await;

    let dialect = ClinicalTrials::new().with_base_url(server.uri());
    let query = QueryBuilder::new()
        .equals("query.cond", Some("asthma"))
        .build()
        .unwrap();
    let request = dialect.compile(&query, &Pagination::default(), &ShapeHints::default());
    let executor = Executor::new(ExecutorConfig::default().with_retry(fast_retry())).unwrap();
    let document = executor.execute(&request, &dialect, None).await.unwrap();

    assert_eq!(document, json!({"studies": []}));
}

#[tokio::test]
async fn test_no_retry_without_policy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(502))
        .expect(1)
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let err = Executor::new(ExecutorConfig::default())
        .unwrap()
        .execute(&request, &dialect, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::UpstreamHttp { status: 502, .. }));
}

#[tokio::test]
async fn test_cancellation_aborts_in_flight_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"results": []}))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dialect = openfda(&server);
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let executor = Executor::new(ExecutorConfig::default()).unwrap();

    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let err = executor
        .execute(&request, &dialect, Some(&token))
        .await
        .unwrap_err();
    assert_eq!(err, TransportError::Canceled);
}

#[tokio::test]
async fn test_connection_failure_is_transport_error() {
    let dialect = OpenFda::new("drug/event.json").with_base_url("http://127.0.0.1:1");
    let request = dialect.compile(&metformin(), &Pagination::default(), &ShapeHints::default());
    let err = Executor::new(ExecutorConfig::default())
        .unwrap()
        .execute(&request, &dialect, None)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::TransportFailure { .. }));
}
