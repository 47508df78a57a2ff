//! Stdio RPC Transport
//!
//! Owns one tool-server child process. Requests are strictly sequential: the
//! connection lock is held across write, flush and the read of the matching
//! response line, so at most one request is ever outstanding.

use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, RwLock};

use super::catalog::ToolCatalogEntry;
use super::protocol::{
    methods, ClientInfo, InitializeParams, JsonRpcRequest, JsonRpcResponse, ToolCallParams,
    ToolsListResult, DEFAULT_PROTOCOL_VERSION,
};
use crate::error::{AgentError, Result};
use crate::thinking::preview;

/// How to launch and talk to a tool server
#[derive(Clone, Debug)]
pub struct McpServerConfig {
    /// Program to spawn
    pub command: String,

    pub args: Vec<String>,

    /// Extra environment for the child, on top of the inherited one
    pub env: BTreeMap<String, String>,

    /// Bound on every response read
    pub request_timeout: Duration,

    /// How long `disconnect` waits for a voluntary exit before killing
    pub shutdown_grace: Duration,

    pub client_name: String,
    pub client_version: String,
    pub protocol_version: String,
}

impl McpServerConfig {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            env: BTreeMap::new(),
            request_timeout: Duration::from_secs(30),
            shutdown_grace: Duration::from_secs(5),
            client_name: "mcp-relay".into(),
            client_version: env!("CARGO_PKG_VERSION").into(),
            protocol_version: DEFAULT_PROTOCOL_VERSION.into(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// Live pipes of a spawned server
struct Connection {
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    /// Bytes of a partially read line survive a timed-out read here
    line_buf: Vec<u8>,
    next_id: u64,
}

impl Connection {
    async fn send(&mut self, message: &JsonRpcRequest) -> Result<()> {
        let line = message.to_line()?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| AgentError::TransportClosed("stdin already closed".into()))?;

        stdin.write_all(line.as_bytes()).await.map_err(write_error)?;
        stdin.flush().await.map_err(write_error)?;
        Ok(())
    }

    async fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        timeout: Duration,
    ) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        self.send(&JsonRpcRequest::new(id, method, params)).await?;

        let response = tokio::time::timeout(timeout, self.read_response(id))
            .await
            .map_err(|_| {
                AgentError::Timeout(format!("no response to '{method}' within {timeout:?}"))
            })??;

        response.into_result()
    }

    /// Read lines until the response to `id` arrives.
    ///
    /// Blank lines and server-initiated messages are skipped, as are late
    /// replies to earlier requests that timed out. Anything else that is not
    /// the expected response fails the request.
    async fn read_response(&mut self, id: u64) -> Result<JsonRpcResponse> {
        loop {
            let n = self
                .stdout
                .read_until(b'\n', &mut self.line_buf)
                .await
                .map_err(|e| AgentError::TransportClosed(format!("reading stdout: {e}")))?;
            if n == 0 {
                return Err(AgentError::TransportClosed(
                    "tool server closed stdout".into(),
                ));
            }

            let raw = std::mem::take(&mut self.line_buf);
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let value: Value = serde_json::from_str(line).map_err(|e| {
                AgentError::Framing(format!("{e} in line: {}", preview(line, 200)))
            })?;

            if value.get("method").is_some() {
                tracing::debug!(line = %preview(line, 200), "Skipping server-initiated message");
                continue;
            }

            let response: JsonRpcResponse = serde_json::from_value(value)
                .map_err(|e| AgentError::Protocol(format!("malformed response: {e}")))?;

            match response.numeric_id() {
                Some(got) if got == id => return Ok(response),
                Some(got) if got < id => {
                    tracing::warn!(expected = id, got, "Discarding late response");
                }
                _ => {
                    return Err(AgentError::Protocol(format!(
                        "response id {:?} does not match request id {id}",
                        response.id
                    )));
                }
            }
        }
    }
}

fn write_error(err: std::io::Error) -> AgentError {
    if err.kind() == std::io::ErrorKind::BrokenPipe {
        AgentError::TransportClosed("tool server closed stdin".into())
    } else {
        AgentError::Io(err)
    }
}

/// Client for one stdio tool server
pub struct RpcTransport {
    config: McpServerConfig,
    connection: Mutex<Option<Connection>>,
    catalog: RwLock<Vec<ToolCatalogEntry>>,
    initialized: AtomicBool,
}

impl RpcTransport {
    pub fn new(config: McpServerConfig) -> Self {
        Self {
            config,
            connection: Mutex::new(None),
            catalog: RwLock::new(Vec::new()),
            initialized: AtomicBool::new(false),
        }
    }

    pub const fn config(&self) -> &McpServerConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    /// Spawn and handshake; failures are logged and reported as `false`
    pub async fn connect(&self) -> bool {
        match self.try_connect().await {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(
                    command = %self.config.command,
                    error = %e,
                    "Tool server connection failed"
                );
                false
            }
        }
    }

    /// Spawn the server, run `initialize` and `tools/list`, fill the catalog.
    ///
    /// Connecting an already connected transport is a no-op.
    pub async fn try_connect(&self) -> Result<()> {
        let mut guard = self.connection.lock().await;
        if guard.is_some() && self.is_connected() {
            return Ok(());
        }
        if let Some(stale) = guard.take() {
            self.terminate(stale).await;
        }

        let mut connection = self.spawn()?;
        let entries = match self.handshake(&mut connection).await {
            Ok(entries) => entries,
            Err(e) => {
                let _ = connection.child.start_kill();
                let _ = connection.child.wait().await;
                return Err(e);
            }
        };

        tracing::info!(
            command = %self.config.command,
            tools = entries.len(),
            "Connected to tool server"
        );

        *self.catalog.write().await = entries;
        *guard = Some(connection);
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn spawn(&self) -> Result<Connection> {
        let mut command = Command::new(&self.config.command);
        command
            .args(&self.config.args)
            .envs(&self.config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| {
            AgentError::Connection(format!("failed to spawn '{}': {e}", self.config.command))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| AgentError::Connection("failed to capture stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| AgentError::Connection("failed to capture stdout".into()))?;

        if let Some(stderr) = child.stderr.take() {
            let command = self.config.command.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(server = %command, "{line}");
                }
            });
        }

        Ok(Connection {
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            line_buf: Vec::new(),
            next_id: 1,
        })
    }

    async fn handshake(&self, connection: &mut Connection) -> Result<Vec<ToolCatalogEntry>> {
        let timeout = self.config.request_timeout;
        let params = InitializeParams::new(
            &self.config.protocol_version,
            ClientInfo {
                name: self.config.client_name.clone(),
                version: self.config.client_version.clone(),
            },
        );

        let server = connection
            .request(methods::INITIALIZE, Some(serde_json::to_value(&params)?), timeout)
            .await?;
        tracing::debug!(server_info = %server, "Tool server initialized");

        connection
            .send(&JsonRpcRequest::notification(methods::INITIALIZED, None))
            .await?;

        let listed = connection.request(methods::TOOLS_LIST, None, timeout).await?;
        let listed: ToolsListResult = serde_json::from_value(listed)
            .map_err(|e| AgentError::Protocol(format!("failed to parse tools list: {e}")))?;

        Ok(listed.tools.into_iter().map(ToolCatalogEntry::from).collect())
    }

    /// Discovered tools, in server order
    pub async fn catalog(&self) -> Vec<ToolCatalogEntry> {
        self.catalog.read().await.clone()
    }

    pub async fn has_tool(&self, name: &str) -> bool {
        self.catalog.read().await.iter().any(|entry| entry.name == name)
    }

    /// Invoke a remote tool and return its `result` unchanged
    pub async fn call(&self, name: &str, arguments: Value) -> Result<Value> {
        if !self.is_connected() {
            return Err(AgentError::TransportClosed("transport is not connected".into()));
        }
        if !self.has_tool(name).await {
            return Err(AgentError::ToolNotFound(name.to_string()));
        }

        let params = serde_json::to_value(ToolCallParams {
            name: name.to_string(),
            arguments,
        })?;

        let mut guard = self.connection.lock().await;
        let connection = guard
            .as_mut()
            .ok_or_else(|| AgentError::TransportClosed("transport is not connected".into()))?;

        tracing::debug!(tool = %name, "Calling remote tool");
        let result = connection
            .request(methods::TOOLS_CALL, Some(params), self.config.request_timeout)
            .await;

        if let Err(AgentError::TransportClosed(reason)) = &result {
            tracing::warn!(tool = %name, reason = %reason, "Tool server went away");
            self.initialized.store(false, Ordering::Release);
        }
        result
    }

    /// Close stdin, wait out the grace period, then kill. Idempotent.
    pub async fn disconnect(&self) {
        self.initialized.store(false, Ordering::Release);
        let connection = self.connection.lock().await.take();
        if let Some(connection) = connection {
            self.terminate(connection).await;
        }
        self.catalog.write().await.clear();
    }

    async fn terminate(&self, mut connection: Connection) {
        drop(connection.stdin.take());
        match tokio::time::timeout(self.config.shutdown_grace, connection.child.wait()).await {
            Ok(Ok(status)) => tracing::debug!(%status, "Tool server exited"),
            Ok(Err(e)) => tracing::warn!(error = %e, "Waiting for tool server failed"),
            Err(_) => {
                tracing::warn!("Tool server ignored shutdown; killing");
                let _ = connection.child.kill().await;
            }
        }
    }
}

impl std::fmt::Debug for RpcTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcTransport")
            .field("command", &self.config.command)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use serde_json::json;

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"fake","version":"1"}}}"#;
    const LIST: &str = r#"{"jsonrpc":"2.0","id":2,"result":{"tools":[{"name":"echo","description":"Echo","inputSchema":{"type":"object"}}]}}"#;

    /// Server that answers each request line with the next canned reply.
    /// The `initialized` notification is consumed without a reply.
    fn scripted(replies: &[&str]) -> McpServerConfig {
        let mut script = String::from("read -r _; printf '%s\\n' '");
        script.push_str(INIT);
        script.push_str("'; read -r _; read -r _; printf '%s\\n' '");
        script.push_str(LIST);
        script.push('\'');
        for reply in replies {
            script.push_str("; read -r _; printf '%s\\n' '");
            script.push_str(reply);
            script.push('\'');
        }
        script.push_str("; read -r _");

        McpServerConfig::new("sh", vec!["-c".into(), script])
            .with_request_timeout(Duration::from_secs(5))
            .with_shutdown_grace(Duration::from_millis(500))
    }

    #[tokio::test]
    async fn test_connect_and_call() {
        let transport = RpcTransport::new(scripted(&[
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"hello"}]}}"#,
        ]));

        assert!(transport.connect().await);
        let catalog = transport.catalog().await;
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog[0].name, "echo");

        let result = transport.call("echo", json!({"text": "hello"})).await.unwrap();
        assert_eq!(result, json!({"content": [{"type": "text", "text": "hello"}]}));

        transport.disconnect().await;
        assert!(!transport.is_connected());
        assert!(transport.catalog().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_json_line_is_framing_error() {
        let transport = RpcTransport::new(scripted(&[
            "this is not json",
            r#"{"jsonrpc":"2.0","id":4,"result":{"content":[]}}"#,
        ]));
        assert!(transport.connect().await);

        let first = transport.call("echo", json!({})).await;
        assert!(matches!(first, Err(AgentError::Framing(_))));

        let second = transport.call("echo", json!({})).await;
        assert!(second.is_ok());

        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_error_response_is_protocol_error() {
        let transport = RpcTransport::new(scripted(&[
            r#"{"jsonrpc":"2.0","id":3,"error":{"code":-32000,"message":"boom"}}"#,
        ]));
        assert!(transport.connect().await);

        let result = transport.call("echo", json!({})).await;
        assert!(matches!(result, Err(AgentError::Protocol(_))));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_notifications_and_late_replies_are_skipped() {
        let transport = RpcTransport::new(scripted(&[concat!(
            r#"{"jsonrpc":"2.0","method":"notifications/progress","params":{}}"#,
            "' '",
            r#"{"jsonrpc":"2.0","id":2,"result":{}}"#,
            "' '",
            r#"{"jsonrpc":"2.0","id":3,"result":{"content":[]}}"#
        )]));
        assert!(transport.connect().await);

        let result = transport.call("echo", json!({})).await.unwrap();
        assert_eq!(result, json!({"content": []}));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_higher_reply_id_is_protocol_error() {
        let transport = RpcTransport::new(scripted(&[
            r#"{"jsonrpc":"2.0","id":9,"result":{"content":[]}}"#,
        ]));
        assert!(transport.connect().await);

        let result = transport.call("echo", json!({})).await;
        assert!(matches!(result, Err(AgentError::Protocol(_))));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_timeout_then_late_reply_is_skipped() {
        // First reply arrives after the 2s timeout; the next call reads past it.
        let script = format!(
            "read -r _; printf '%s\\n' '{INIT}'; read -r _; read -r _; \
             printf '%s\\n' '{LIST}'; read -r _; sleep 3; printf '%s\\n' '{late}'; \
             read -r _; printf '%s\\n' '{next}'; read -r _",
            late = r#"{"jsonrpc":"2.0","id":3,"result":{"content":[{"type":"text","text":"late"}]}}"#,
            next = r#"{"jsonrpc":"2.0","id":4,"result":{"ok":1}}"#,
        );
        let config = McpServerConfig::new("sh", vec!["-c".into(), script])
            .with_request_timeout(Duration::from_secs(2))
            .with_shutdown_grace(Duration::from_millis(500));
        let transport = RpcTransport::new(config);
        assert!(transport.connect().await);

        let first = transport.call("echo", json!({})).await;
        assert!(matches!(first, Err(AgentError::Timeout(_))));
        assert!(transport.is_connected());

        let second = transport.call("echo", json!({})).await.unwrap();
        assert_eq!(second, json!({"ok": 1}));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_unknown_tool_rejected_before_send() {
        let transport = RpcTransport::new(scripted(&[]));
        assert!(transport.connect().await);

        let result = transport.call("nope", json!({})).await;
        assert!(matches!(result, Err(AgentError::ToolNotFound(_))));
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_eof_is_transport_closed() {
        let config = McpServerConfig::new(
            "sh",
            vec![
                "-c".into(),
                format!(
                    "read -r _; printf '%s\\n' '{INIT}'; read -r _; read -r _; \
                     printf '%s\\n' '{LIST}'; read -r _"
                ),
            ],
        )
        .with_request_timeout(Duration::from_secs(5));
        let transport = RpcTransport::new(config);
        assert!(transport.connect().await);

        let result = transport.call("echo", json!({})).await;
        assert!(matches!(result, Err(AgentError::TransportClosed(_))));
        assert!(!transport.is_connected());
    }

    #[tokio::test]
    async fn test_spawn_failure_is_connection_error() {
        let transport = RpcTransport::new(McpServerConfig::new(
            "/definitely/not/a/real/binary",
            Vec::new(),
        ));
        assert!(matches!(
            transport.try_connect().await,
            Err(AgentError::Connection(_))
        ));
        assert!(!transport.connect().await);
    }

    #[tokio::test]
    async fn test_initialize_error_fails_connect() {
        let config = McpServerConfig::new(
            "sh",
            vec![
                "-c".into(),
                r#"read -r _; printf '%s\n' '{"jsonrpc":"2.0","id":1,"error":{"code":-1,"message":"no"}}'"#.into(),
            ],
        );
        let transport = RpcTransport::new(config);
        assert!(matches!(
            transport.try_connect().await,
            Err(AgentError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn test_call_after_disconnect_fails_fast() {
        let transport = RpcTransport::new(scripted(&[]));
        assert!(transport.connect().await);
        transport.disconnect().await;

        let result = transport.call("echo", json!({})).await;
        assert!(matches!(result, Err(AgentError::TransportClosed(_))));
    }
}
