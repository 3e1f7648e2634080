// HTTP RPC transport and retrying client against a mock manager

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zslurm_common::errors::RpcError;
use zslurm_common::retry::FixedDelay;
use zslurm_common::rpc::{HttpRpcTransport, RpcClient, RpcTransport};

fn client_for(server: &MockServer, attempts: u32) -> RpcClient {
    let transport = HttpRpcTransport::new(
        format!("{}/abcdefgh", server.uri()),
        Duration::from_secs(5),
    )
    .unwrap();
    RpcClient::new(Arc::new(transport), Arc::new(FixedDelay::immediate(attempts)))
}

#[tokio::test]
async fn test_call_posts_json_rpc_envelope() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/abcdefgh"))
        .and(body_partial_json(json!({
            "jsonrpc": "2.0",
            "method": "submit_job",
            "params": ["align", 2]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": 42
        })))
        .expect(1)
        .mount(&server)
        .await;

    let transport =
        HttpRpcTransport::with_default_timeout(format!("{}/abcdefgh", server.uri())).unwrap();
    let result = transport
        .call("submit_job", vec![json!("align"), json!(2)])
        .await
        .unwrap();
    assert_eq!(result, json!(42));
}

#[tokio::test]
async fn test_remote_fault_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32601, "message": "no such method"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, 4)
        .call_with_retry("drain_node", Vec::new())
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RpcError::Remote {
            code: -32601,
            message: "no such method".to_string()
        }
    );
}

#[tokio::test]
async fn test_gateway_errors_are_retried_until_unreachable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    let client = client_for(&server, 3);
    let err = client.call_with_retry("list_jobs", Vec::new()).await.unwrap_err();
    match err {
        RpcError::Unreachable { url, attempts, .. } => {
            assert_eq!(url, client.url());
            assert_eq!(attempts, 3);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_other_http_errors_are_protocol_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(404).set_body_string("wrong path"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, 4)
        .call_with_retry("list_jobs", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Protocol(ref msg) if msg.contains("404")));
}

#[tokio::test]
async fn test_garbage_body_is_protocol_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<methodResponse/>"))
        .mount(&server)
        .await;

    let err = client_for(&server, 4)
        .call("list_jobs", Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::Protocol(_)));
}

#[tokio::test]
async fn test_xml_rpc_reply_is_an_envelope_mismatch() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "text/xml")
                .set_body_string(
                    "<?xml version='1.0'?>\n<methodResponse><params><param>\
                     <value><array><data/></array></value></param></params></methodResponse>",
                ),
        )
        .expect(1)
        .mount(&server)
        .await;

    let err = client_for(&server, 4)
        .call_with_retry("list_jobs", Vec::new())
        .await
        .unwrap_err();
    assert!(!err.is_retryable());
    assert!(
        matches!(err, RpcError::Protocol(ref msg) if msg.contains("JSON-RPC envelope")),
        "unexpected error {:?}",
        err
    );
}

#[tokio::test]
async fn test_missing_result_is_null() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "id": 1})))
        .mount(&server)
        .await;

    let value = client_for(&server, 1)
        .call("shutdown", Vec::new())
        .await
        .unwrap();
    assert_eq!(value, Value::Null);
}

#[tokio::test]
async fn test_closed_port_is_unreachable() {
    // Bind and drop a listener to get a port nothing listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let transport =
        HttpRpcTransport::new(format!("http://127.0.0.1:{}/abcdefgh", port), Duration::from_secs(2))
            .unwrap();
    let client = RpcClient::new(Arc::new(transport), Arc::new(FixedDelay::immediate(2)));

    let err = client.call_with_retry("list_jobs", Vec::new()).await.unwrap_err();
    assert!(matches!(err, RpcError::Unreachable { attempts: 2, .. }));
}
