//! Provider transports
//!
//! Three ways to reach a provider:
//! - HTTP: JSON-RPC over POST to the provider's `/mcp` endpoint
//! - SSE: JSON-RPC request over POST, response read from an event stream
//! - stdio: line-delimited JSON-RPC over a spawned child process
//!
//! Every call is bounded by the provider's timeout; an elapsed timeout is
//! reported as a connection-class error so the retry path treats it like a
//! dead connection.

use std::fmt::Debug;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{AuthConfig, Protocol, ProviderDescriptor};
use crate::error::{Error, Result};

/// One tool as advertised by a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "inputSchema")]
    pub input_schema: Option<Value>,
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: String,
    method: &'a str,
    params: Value,
}

impl<'a> JsonRpcRequest<'a> {
    fn new(method: &'a str, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id: Uuid::new_v4().to_string(),
            method,
            params,
        }
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

impl JsonRpcResponse {
    fn into_result(self) -> Result<Value> {
        if let Some(err) = self.error {
            return Err(Error::ProviderError(format!(
                "provider returned error {}: {}",
                err.code, err.message
            )));
        }
        self.result
            .ok_or_else(|| Error::ProviderError("response carried neither result nor error".to_string()))
    }
}

fn parse_tool_list(result: Value) -> Result<Vec<ToolDescriptor>> {
    let tools = result
        .get("tools")
        .cloned()
        .unwrap_or(result);
    serde_json::from_value(tools).map_err(Error::from)
}

/// Transport trait for provider communication
#[async_trait]
pub trait Transport: Send + Sync + Debug {
    /// Fetches the provider's tool catalog.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invokes one tool with JSON arguments.
    async fn call_tool(&self, tool: &str, args: Value) -> Result<Value>;

    /// Closes the transport. Closing twice is a no-op.
    async fn close(&self) -> Result<()>;
}

async fn bounded<T>(
    seconds: u64,
    fut: impl std::future::Future<Output = Result<T>> + Send,
) -> Result<T> {
    match tokio::time::timeout(Duration::from_secs(seconds), fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::TimeoutError(seconds)),
    }
}

fn build_http_client(auth: &AuthConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if let AuthConfig::Bearer { token } = auth {
        let mut headers = reqwest::header::HeaderMap::new();
        let value = format!("Bearer {token}")
            .parse()
            .map_err(|_| Error::ConfigError("bearer token is not a valid header value".to_string()))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
        builder = builder.default_headers(headers);
    }
    builder
        .build()
        .map_err(|e| Error::ConfigError(format!("failed to build HTTP client: {e}")))
}

/// HTTP transport: request/response JSON-RPC over POST
#[derive(Debug)]
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl HttpTransport {
    pub fn new(url: &str, auth: &AuthConfig, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: build_http_client(auth)?,
            timeout_seconds,
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params);
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ConnectionError(format!("HTTP request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ProviderError(format!("HTTP {status}: {body}")));
        }

        let parsed: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| Error::ConnectionError(format!("failed to read HTTP response: {e}")))?;
        parsed.into_result()
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = bounded(self.timeout_seconds, self.request("tools/list", json!({}))).await?;
        let tools = parse_tool_list(result)?;
        debug!(url = %self.url, count = tools.len(), "Listed tools via HTTP");
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<Value> {
        let params = json!({ "name": tool, "arguments": args });
        let result = bounded(self.timeout_seconds, self.request("tools/call", params)).await?;
        debug!(url = %self.url, tool, "Called tool via HTTP");
        Ok(result)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// SSE transport: JSON-RPC request over POST, response from an event stream
#[derive(Debug)]
pub struct SseTransport {
    url: String,
    client: reqwest::Client,
    timeout_seconds: u64,
}

impl SseTransport {
    pub fn new(url: &str, auth: &AuthConfig, timeout_seconds: u64) -> Result<Self> {
        Ok(Self {
            url: url.to_string(),
            client: build_http_client(auth)?,
            timeout_seconds,
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let request = JsonRpcRequest::new(method, params);
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::ACCEPT, "text/event-stream, application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::ConnectionError(format!("SSE request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::ProviderError(format!("HTTP {status}: {body}")));
        }

        let mut stream = response.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk) = stream.next().await {
            let chunk =
                chunk.map_err(|e| Error::ConnectionError(format!("SSE stream error: {e}")))?;
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            while let Some(event_end) = buffer.find("\n\n") {
                let event = buffer[..event_end].to_string();
                buffer.drain(..event_end + 2);

                if let Some(data_line) = event.lines().find(|l| l.starts_with("data:")) {
                    let data = data_line.trim_start_matches("data:").trim();
                    let parsed: JsonRpcResponse = serde_json::from_str(data)?;
                    return parsed.into_result();
                }
            }
        }

        Err(Error::ConnectionError(
            "SSE stream closed before a response event".to_string(),
        ))
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = bounded(self.timeout_seconds, self.request("tools/list", json!({}))).await?;
        let tools = parse_tool_list(result)?;
        debug!(url = %self.url, count = tools.len(), "Listed tools via SSE");
        Ok(tools)
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<Value> {
        let params = json!({ "name": tool, "arguments": args });
        bounded(self.timeout_seconds, self.request("tools/call", params)).await
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug)]
struct StdioState {
    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stdout: Option<BufReader<ChildStdout>>,
}

/// Stdio transport: line-delimited JSON-RPC over a spawned child process
#[derive(Debug)]
pub struct StdioTransport {
    state: Mutex<StdioState>,
    timeout_seconds: u64,
}

impl StdioTransport {
    pub fn spawn(
        command: &str,
        args: &[String],
        cwd: Option<&str>,
        timeout_seconds: u64,
    ) -> Result<Self> {
        info!(command, ?args, "Starting provider process");

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        if let Some(cwd) = cwd {
            cmd.current_dir(cwd);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::ConnectionError(format!("failed to spawn '{command}': {e}")))?;

        let stdin = child.stdin.take();
        let stdout = child.stdout.take().map(BufReader::new);

        Ok(Self {
            state: Mutex::new(StdioState {
                child: Some(child),
                stdin,
                stdout,
            }),
            timeout_seconds,
        })
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value> {
        let mut state = self.state.lock().await;

        let stdin = state
            .stdin
            .as_mut()
            .ok_or_else(|| Error::ConnectionError("provider stdin is closed".to_string()))?;

        let request = JsonRpcRequest::new(method, params);
        let mut framed = serde_json::to_string(&request)?;
        framed.push('\n');
        stdin
            .write_all(framed.as_bytes())
            .await
            .map_err(|e| Error::ConnectionError(format!("failed to write to provider: {e}")))?;
        stdin
            .flush()
            .await
            .map_err(|e| Error::ConnectionError(format!("failed to flush provider stdin: {e}")))?;

        let stdout = state
            .stdout
            .as_mut()
            .ok_or_else(|| Error::ConnectionError("provider stdout is closed".to_string()))?;

        let mut line = String::new();
        let bytes = stdout
            .read_line(&mut line)
            .await
            .map_err(|e| Error::ConnectionError(format!("failed to read from provider: {e}")))?;
        if bytes == 0 {
            return Err(Error::ConnectionError("provider closed its stdout (eof)".to_string()));
        }

        let parsed: JsonRpcResponse = serde_json::from_str(line.trim())?;
        parsed.into_result()
    }
}

#[async_trait]
impl Transport for StdioTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = bounded(self.timeout_seconds, self.request("tools/list", json!({}))).await?;
        parse_tool_list(result)
    }

    async fn call_tool(&self, tool: &str, args: Value) -> Result<Value> {
        let params = json!({ "name": tool, "arguments": args });
        bounded(self.timeout_seconds, self.request("tools/call", params)).await
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.stdin = None;
        state.stdout = None;
        if let Some(mut child) = state.child.take() {
            if let Err(e) = child.kill().await {
                warn!("Failed to kill provider process: {e}");
            }
            let _ = child.wait().await;
        }
        Ok(())
    }
}

/// Builds transports from provider descriptors
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn Transport>>;
}

/// Production factory covering the three wire protocols
#[derive(Debug, Default)]
pub struct DefaultTransportFactory {
    pub default_timeout_seconds: u64,
}

impl DefaultTransportFactory {
    pub fn new(default_timeout_seconds: u64) -> Self {
        Self {
            default_timeout_seconds,
        }
    }
}

#[async_trait]
impl TransportFactory for DefaultTransportFactory {
    async fn create(&self, descriptor: &ProviderDescriptor) -> Result<Arc<dyn Transport>> {
        descriptor.validate()?;
        let timeout = descriptor
            .timeout_seconds
            .unwrap_or(self.default_timeout_seconds);

        match descriptor.protocol {
            Protocol::Http => {
                let url = descriptor.normalized_url()?;
                Ok(Arc::new(HttpTransport::new(&url, &descriptor.auth, timeout)?))
            }
            Protocol::Sse => {
                let url = descriptor.normalized_url()?;
                Ok(Arc::new(SseTransport::new(&url, &descriptor.auth, timeout)?))
            }
            Protocol::Stdio => {
                let (command, args, cwd) = descriptor.command_line()?;
                Ok(Arc::new(StdioTransport::spawn(command, args, cwd, timeout)?))
            }
        }
    }
}
