//! End-to-end turns against scripted providers and scripted tool servers

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

use relay_core::mcp::McpToolAdapter;
use relay_core::{
    ChatResponse, Engine, McpServerConfig, Role, RpcTransport, ScriptedProvider, ThinkingStepType,
    ToolCall, ToolCatalogEntry, ToolDefinition, ToolRegistry, ToolSource, TurnRequest,
};

const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1"}}}"#;

const TOOLS: &str = r##"[
{"name":"calculator","description":"Evaluate arithmetic","inputSchema":{"type":"object","properties":{"input":{"$ref":"#/$defs/CalcInput"}},"required":["input"],"$defs":{"CalcInput":{"type":"object","properties":{"expression":{"type":"string"}},"required":["expression"]}}}},
{"name":"get_current_time","description":"Current time","inputSchema":{"type":"object","properties":{"input":{"type":"object","properties":{"timezone":{"type":"string"}}}}}}
]"##;

fn reply(json: &str) -> String {
    format!("printf '%s\\n' '{json}'")
}

fn call_reply(id: u64, text: &str) -> String {
    reply(&format!(
        r#"{{"jsonrpc":"2.0","id":{id},"result":{{"content":[{{"type":"text","text":"{text}"}}]}}}}"#
    ))
}

/// A shell tool server: handshake, then one handler per `tools/call` line.
/// Each handler sees the request line in `$line`.
fn fake_server(handlers: &[String]) -> McpServerConfig {
    let tools = TOOLS.replace('\n', "");
    let mut script = vec![
        "read -r line".to_string(),
        reply(INIT),
        "read -r line".to_string(),
        "read -r line".to_string(),
        reply(&format!(
            r#"{{"jsonrpc":"2.0","id":2,"result":{{"tools":{tools}}}}}"#
        )),
    ];
    for handler in handlers {
        script.push("read -r line".to_string());
        script.push(handler.clone());
    }
    script.push("read -r line".to_string());

    McpServerConfig::new("sh", vec!["-c".into(), script.join("; ")])
        .with_request_timeout(Duration::from_secs(5))
        .with_shutdown_grace(Duration::from_millis(500))
}

fn args(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

/// In-memory tool source
struct LocalTools(Vec<ToolDefinition>);

#[async_trait]
impl ToolSource for LocalTools {
    async fn tool_definitions(&self) -> relay_core::Result<Vec<ToolDefinition>> {
        Ok(self.0.clone())
    }

    async fn describe(&self) -> Vec<ToolCatalogEntry> {
        Vec::new()
    }
}

#[cfg(unix)]
#[tokio::test]
async fn calculator_and_time_in_one_response() {
    // The calculator handler only answers if the arguments arrived enveloped
    let calculator = format!(
        r#"case "$line" in *'"arguments":{{"input":{{"expression":"15+27"}}}}'*) {};; *) {};; esac"#,
        reply(r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"42"}],"structuredContent":{"result":42}}}"#),
        reply(r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"arguments were not enveloped"}],"isError":true}}"#),
    );
    let transport = Arc::new(RpcTransport::new(fake_server(&[
        calculator,
        call_reply(4, "2026-10-18T12:00:00Z"),
    ])));
    assert!(transport.connect().await);

    let provider = ScriptedProvider::new("test-model");
    let script = provider.handle();
    script.push_response(ChatResponse::tool_calls(
        None,
        vec![
            ToolCall::new("c1", "calculator", args(json!({"expression": "15+27"}))),
            ToolCall::new("c2", "get_current_time", Map::new()),
        ],
    ));
    script.push_response(ChatResponse::text("15+27 = 42, and it is noon UTC."));

    let mut engine = Engine::builder()
        .provider(Box::new(provider))
        .tool_source(Arc::new(McpToolAdapter::new(Arc::clone(&transport))))
        .build()
        .unwrap();

    let outcome = engine
        .run(TurnRequest::new("Compute 15+27 and report the current time"))
        .await;
    assert!(!outcome.is_error, "{}", outcome.text);
    assert_eq!(outcome.text, "15+27 = 42, and it is noon UTC.");

    let count = |kind| outcome.steps.iter().filter(|s| s.step_type == kind).count();
    assert_eq!(count(ThinkingStepType::UserInput), 1);
    assert_eq!(count(ThinkingStepType::ToolPlanning), 1);
    assert_eq!(count(ThinkingStepType::Reasoning), 1);
    assert_eq!(count(ThinkingStepType::ToolExecution), 2);
    assert_eq!(count(ThinkingStepType::ToolResult), 2);
    assert_eq!(count(ThinkingStepType::FinalResponse), 1);
    assert_eq!(outcome.steps.len(), 8);

    let tool_messages: Vec<_> = engine
        .conversation()
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert_eq!(tool_messages[0].tool_call_id.as_deref(), Some("c1"));
    assert_eq!(tool_messages[0].text(), "42");
    assert_eq!(tool_messages[1].tool_call_id.as_deref(), Some("c2"));
    assert_eq!(tool_messages[1].text(), "2026-10-18T12:00:00Z");

    let calls = script.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].offered_tools, vec!["calculator", "get_current_time"]);
    assert!(calls[1].offered_tools.is_empty());

    // The model sees the envelope's inner schema
    let specs = engine.provider().unwrap().list_tools();
    assert_eq!(specs[0].parameters["properties"]["expression"]["type"], "string");

    engine.shutdown().await;
    transport.disconnect().await;
}

#[cfg(unix)]
#[tokio::test]
async fn non_json_reply_fails_only_that_call() {
    let transport = Arc::new(RpcTransport::new(fake_server(&[
        "printf '%s\\n' 'Traceback (most recent call last):'".to_string(),
        call_reply(4, "2026-10-18T12:00:00Z"),
    ])));
    assert!(transport.connect().await);

    let provider = ScriptedProvider::new("test-model");
    let script = provider.handle();
    script.push_response(ChatResponse::tool_calls(
        None,
        vec![
            ToolCall::new("c1", "calculator", args(json!({"expression": "1/0"}))),
            ToolCall::new("c2", "get_current_time", Map::new()),
        ],
    ));
    script.push_response(ChatResponse::text("The calculator broke, but it is noon."));

    let mut engine = Engine::builder()
        .provider(Box::new(provider))
        .tool_source(Arc::new(McpToolAdapter::new(Arc::clone(&transport))))
        .build()
        .unwrap();

    let outcome = engine.run(TurnRequest::new("Divide and tell the time")).await;
    assert!(!outcome.is_error);

    let tool_messages: Vec<_> = engine
        .conversation()
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert!(tool_messages[0].text().starts_with("Error: "));
    assert!(tool_messages[0].text().contains("Framing error"));
    assert_eq!(tool_messages[1].text(), "2026-10-18T12:00:00Z");
    assert_eq!(script.calls().len(), 2);

    transport.disconnect().await;
}

#[cfg(unix)]
#[tokio::test]
async fn remote_result_is_returned_unchanged() {
    let transport = Arc::new(RpcTransport::new(fake_server(&[call_reply(3, "12:00")])));
    assert!(transport.connect().await);

    let adapter = McpToolAdapter::new(Arc::clone(&transport));
    let mut registry = ToolRegistry::new();
    assert_eq!(adapter.register_all(&mut registry).await, 2);
    assert_eq!(adapter.describe().await.len(), 2);

    let result = registry
        .execute(&ToolCall::new("c1", "get_current_time", Map::new()))
        .await;
    assert!(result.success);
    assert_eq!(result.output, "12:00");

    transport.disconnect().await;
}

#[tokio::test]
async fn every_call_gets_one_tool_message_in_order() {
    let provider = ScriptedProvider::new("test-model");
    let script = provider.handle();
    script.push_response(ChatResponse::tool_calls(
        Some("Let me check.".into()),
        vec![
            ToolCall::new("a", "upper", args(json!({"text": "x"}))),
            ToolCall::new("b", "missing_tool", Map::new()),
            ToolCall::new("c", "upper", args(json!({"text": "y"}))),
        ],
    ));
    script.push_response(ChatResponse::text("X and Y"));

    let upper = ToolDefinition::from_fn(
        "upper",
        "Uppercase text",
        json!({"type": "object", "properties": {"text": {"type": "string"}}}),
        |args| {
            let text = args.get("text").and_then(Value::as_str).unwrap_or_default();
            Ok(json!(text.to_uppercase()))
        },
    );

    let mut engine = Engine::builder()
        .provider(Box::new(provider))
        .tool_source(Arc::new(LocalTools(vec![upper])))
        .build()
        .unwrap();

    let outcome = engine.run(TurnRequest::new("Shout x and y")).await;
    assert_eq!(outcome.text, "X and Y");

    let messages = engine.conversation().messages();
    let roles: Vec<_> = messages.iter().map(|m| m.role).collect();
    assert_eq!(
        roles,
        vec![Role::User, Role::Assistant, Role::Tool, Role::Tool, Role::Tool, Role::Assistant]
    );
    assert_eq!(messages[1].tool_calls.len(), 3);

    let ids: Vec<_> = messages
        .iter()
        .filter_map(|m| m.tool_call_id.as_deref())
        .collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert_eq!(messages[2].text(), "X");
    assert!(messages[3].text().contains("not found"));
    assert_eq!(messages[4].text(), "Y");

    // Follow-up is always made without tools
    let calls = script.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[0].offered_tools, vec!["upper"]);
    assert!(calls[1].offered_tools.is_empty());
    assert!(!calls[1].options.tools_enabled);
}

#[tokio::test]
async fn failing_handler_does_not_abort_the_batch() {
    let provider = ScriptedProvider::new("test-model");
    let script = provider.handle();
    script.push_response(ChatResponse::tool_calls(
        None,
        vec![
            ToolCall::new("c1", "flaky", Map::new()),
            ToolCall::new("c2", "steady", Map::new()),
        ],
    ));
    script.push_response(ChatResponse::text("One of them worked."));

    let tools = vec![
        ToolDefinition::from_fn("flaky", "Always fails", json!({"type": "object"}), |_| {
            Err(anyhow::anyhow!("upstream unavailable"))
        }),
        ToolDefinition::from_fn("steady", "Always works", json!({"type": "object"}), |_| {
            Ok(json!("fine"))
        }),
    ];

    let mut engine = Engine::builder()
        .provider(Box::new(provider))
        .tool_source(Arc::new(LocalTools(tools)))
        .build()
        .unwrap();

    let outcome = engine.run(TurnRequest::new("Try both")).await;
    assert!(!outcome.is_error);
    assert_eq!(outcome.text, "One of them worked.");

    let tool_messages: Vec<_> = engine
        .conversation()
        .messages()
        .iter()
        .filter(|m| m.role == Role::Tool)
        .collect();
    assert_eq!(tool_messages.len(), 2);
    assert!(tool_messages[0].text().contains("upstream unavailable"));
    assert_eq!(tool_messages[1].text(), "fine");

    let failed = outcome
        .steps
        .iter()
        .find(|s| s.step_type == ThinkingStepType::ToolResult)
        .unwrap();
    assert_eq!(failed.title, "Tool flaky failed");
    assert_eq!(script.calls().len(), 2);
}

#[tokio::test]
async fn tools_disabled_skips_planning() {
    let provider = ScriptedProvider::new("test-model");
    let script = provider.handle();
    script.push_response(ChatResponse::text("No tools needed."));

    let mut engine = Engine::builder()
        .provider(Box::new(provider))
        .tool_source(Arc::new(LocalTools(Vec::new())))
        .build()
        .unwrap();

    let outcome = engine.run(TurnRequest::new("Hello").use_tools(false)).await;
    assert!(
        outcome
            .steps
            .iter()
            .all(|s| s.step_type != ThinkingStepType::ToolPlanning)
    );
    assert!(script.calls()[0].offered_tools.is_empty());
}
