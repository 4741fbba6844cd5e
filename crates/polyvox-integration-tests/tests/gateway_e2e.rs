//! End-to-end scenarios: registry → adapter → retry wrapper → mock server

use polyvox_core::error::ErrorKind;
use polyvox_core::provider::ChatProvider;
use polyvox_core::types::ProviderKind;
use polyvox_gateway::circuit_breaker::{BreakerConfig, CircuitState};
use polyvox_gateway::registry::ProviderRegistry;
use polyvox_gateway::retry::{RetryManager, RetryPolicy};
use polyvox_integration_tests::anthropic_against;
use polyvox_models::ModelCatalog;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn fast_policy(max_retries: u32) -> RetryPolicy {
    RetryPolicy {
        max_retries,
        base_delay: Duration::from_millis(10),
        max_delay: Duration::from_millis(100),
        ..RetryPolicy::default()
    }
}

#[tokio::test]
async fn test_chat_through_registry_with_cost_invariant() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": "Hi." }],
            "usage": { "input_tokens": 8, "output_tokens": 2 }
        })))
        .mount(&mock_server)
        .await;

    let registry = ProviderRegistry::new();
    registry.register(Arc::new(anthropic_against(&mock_server.uri())));

    let provider = registry.get(ProviderKind::Anthropic).await.unwrap();
    let reply = provider
        .chat("claude-sonnet-4.5", Some(""), "Hello")
        .await
        .unwrap();

    assert_eq!(reply.text, "Hi.");
    let catalog = ModelCatalog::with_fallback_models();
    assert_eq!(
        reply.usage.estimated_cost,
        catalog.estimate_cost("claude-sonnet-4.5", reply.usage.input_tokens, reply.usage.output_tokens)
    );

    // The registry hands back the identical initialized handle.
    let again = registry.get(ProviderKind::Anthropic).await.unwrap();
    assert!(Arc::ptr_eq(&provider, &again));
}

#[tokio::test]
async fn test_retry_on_rate_limit_recovers_and_counts() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(429).set_body_json(serde_json::json!({
            "error": { "type": "rate_limit_error", "message": "rate limited" }
        })))
        .up_to_n_times(2)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": "recovered" }],
            "usage": { "input_tokens": 5, "output_tokens": 1 }
        })))
        .mount(&mock_server)
        .await;

    let connector = anthropic_against(&mock_server.uri());
    connector.init().await.unwrap();

    let mut manager = RetryManager::new();
    manager.set_policy(ProviderKind::Anthropic, fast_policy(3));

    let reply = manager
        .execute(ProviderKind::Anthropic, || {
            connector.chat("claude-sonnet-4.5", None, "Hello")
        })
        .await
        .unwrap();
    assert_eq!(reply.text, "recovered");

    let stats = manager.stats(ProviderKind::Anthropic);
    assert_eq!(stats.total_requests, 1);
    assert_eq!(stats.retried_requests, 1);
    assert_eq!(stats.total_retries, 2);
    assert_eq!(stats.successful_requests, 1);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_breaker_opens_after_five_failures_and_recovers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(503).set_body_string("down"))
        .up_to_n_times(5)
        .mount(&mock_server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [{ "type": "text", "text": "back" }],
            "usage": { "input_tokens": 1, "output_tokens": 1 }
        })))
        .mount(&mock_server)
        .await;

    let connector = anthropic_against(&mock_server.uri());
    connector.init().await.unwrap();

    let mut manager = RetryManager::with_breaker_config(BreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        open_duration: Duration::from_millis(100),
    });
    manager.set_policy(ProviderKind::Anthropic, fast_policy(0));

    // Five final failures open the circuit.
    for _ in 0..5 {
        let err = manager
            .execute(ProviderKind::Anthropic, || {
                connector.chat("claude-sonnet-4.5", None, "Hello")
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Overloaded);
    }
    assert_eq!(
        manager.breaker_state(ProviderKind::Anthropic),
        CircuitState::Open
    );

    // Sixth call is rejected without touching the adapter or the wire.
    let err = manager
        .execute(ProviderKind::Anthropic, || {
            connector.chat("claude-sonnet-4.5", None, "Hello")
        })
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::RateLimit);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 5);
    assert_eq!(manager.stats(ProviderKind::Anthropic).circuit_rejections, 1);

    // After the open window a probe is allowed; two successes close it.
    tokio::time::sleep(Duration::from_millis(120)).await;
    for _ in 0..2 {
        manager
            .execute(ProviderKind::Anthropic, || {
                connector.chat("claude-sonnet-4.5", None, "Hello")
            })
            .await
            .unwrap();
    }
    assert_eq!(
        manager.breaker_state(ProviderKind::Anthropic),
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_auth_failure_surfaces_without_retries() {
    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
            "error": { "type": "authentication_error", "message": "bad key" }
        })))
        .mount(&mock_server)
        .await;

    let connector = anthropic_against(&mock_server.uri());
    connector.init().await.unwrap();

    let manager = RetryManager::new();
    let err = manager
        .execute(ProviderKind::Anthropic, || {
            connector.chat("claude-sonnet-4.5", None, "Hello")
        })
        .await
        .unwrap_err();

    assert_eq!(err.kind, ErrorKind::Auth);
    assert_eq!(mock_server.received_requests().await.unwrap().len(), 1);
    let stats = manager.stats(ProviderKind::Anthropic);
    assert_eq!(stats.failed_requests, 1);
    assert_eq!(stats.total_retries, 0);
}

#[tokio::test]
async fn test_tool_call_flow_through_registry() {
    use polyvox_core::tool::{ParameterType, ToolDefinition, ToolParameter};
    use polyvox_tools::ToolRegistry;

    let mock_server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/v1/messages"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "content": [
                { "type": "tool_use", "id": "toolu_7", "name": "add",
                  "input": { "a": 2, "b": 3 } }
            ],
            "usage": { "input_tokens": 20, "output_tokens": 10 }
        })))
        .mount(&mock_server)
        .await;

    let tools = ToolRegistry::new();
    tools.register(
        ToolDefinition::new("add", "Add two numbers")
            .with_parameter(ToolParameter::new("a", ParameterType::Number, true))
            .with_parameter(ToolParameter::new("b", ParameterType::Number, true))
            .with_handler(Arc::new(|args| {
                let sum = args["a"].as_f64().unwrap_or(0.0) + args["b"].as_f64().unwrap_or(0.0);
                Ok(serde_json::json!({ "sum": sum }))
            })),
    );

    let connector = anthropic_against(&mock_server.uri());
    connector.init().await.unwrap();

    let reply = connector
        .chat_with_tools("claude-sonnet-4.5", None, "2+3?", &tools.all())
        .await
        .unwrap();
    assert_eq!(reply.tool_calls.len(), 1);

    let call = &reply.tool_calls[0];
    let result = tools.execute(&call.tool_name, &call.arguments_json);
    let value: serde_json::Value = serde_json::from_str(&result).unwrap();
    assert_eq!(value["sum"], 5.0);

    // The request carried the Anthropic-shaped schema.
    let requests = mock_server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["tools"][0]["name"], "add");
    assert!(body["tools"][0]["input_schema"].is_object());
}
