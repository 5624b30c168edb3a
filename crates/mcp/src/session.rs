//! MCP session management (spawn, handshake, request correlation, lifecycle).

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{Mutex, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::protocol::{
    CallToolParams, CallToolResult, InitializeParams, InitializeResult, JsonRpcNotification,
    JsonRpcRequest, JsonRpcResponse, ListToolsParams, ListToolsResult, METHOD_NOT_FOUND,
    RequestId, ServerMessage, ServerRequest, Tool,
};

/// Default timeout for a single request inside the session.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default time a server gets to answer `initialize`.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum output size (1MB).
/// Sized for large tool outputs (file reads, search results).
pub const MAX_OUTPUT_SIZE: usize = 1024 * 1024;

/// Configuration for an MCP server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl ServerConfig {
    pub fn new(name: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            enabled: true,
        }
    }

    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Lifecycle of a session. `Broken` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Connecting = 0,
    Ready = 1,
    Broken = 2,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Connecting,
            1 => Self::Ready,
            _ => Self::Broken,
        }
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Broken => "broken",
        };
        write!(f, "{label}")
    }
}

type Pending = HashMap<RequestId, oneshot::Sender<Result<JsonRpcResponse>>>;

/// A live channel to one MCP server subprocess.
///
/// Must be driven from inside a tokio runtime: spawning registers the
/// child with the runtime's reactor and starts a reader task on it. The
/// subprocess lives as long as the session (`kill_on_drop`), and the session
/// offers no way to close it early.
pub struct Session {
    config: ServerConfig,
    state: AtomicU8,
    stdin: Mutex<ChildStdin>,
    pending: Mutex<Pending>,
    next_id: AtomicI64,
    startup_timeout: Duration,
    request_timeout: Duration,
    handshake: Mutex<()>,
    server_info: Mutex<Option<InitializeResult>>,
    _process: Mutex<Child>,
}

impl Session {
    /// Spawn the server process without performing the handshake.
    pub async fn spawn(config: ServerConfig, startup_timeout: Duration) -> Result<Arc<Self>> {
        let mut cmd = Command::new(&config.command);
        cmd.args(&config.args)
            .envs(&config.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut process = cmd.spawn().map_err(Error::Spawn)?;

        let stdin = process
            .stdin
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdin")))?;

        let stdout = process
            .stdout
            .take()
            .ok_or_else(|| Error::Spawn(std::io::Error::other("failed to capture stdout")))?;

        debug!(server = %config.name, command = %config.command, "spawned tool server");

        let session = Arc::new(Self {
            config,
            state: AtomicU8::new(SessionState::Connecting as u8),
            stdin: Mutex::new(stdin),
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicI64::new(1),
            startup_timeout,
            request_timeout: DEFAULT_TIMEOUT,
            handshake: Mutex::new(()),
            server_info: Mutex::new(None),
            _process: Mutex::new(process),
        });

        spawn_reader(Arc::downgrade(&session), stdout);

        Ok(session)
    }

    /// Spawn the server and complete the handshake.
    pub async fn connect(config: ServerConfig, startup_timeout: Duration) -> Result<Arc<Self>> {
        let session = Self::spawn(config, startup_timeout).await?;
        session.initialize().await?;
        Ok(session)
    }

    /// Get the server name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Get the configuration this session was spawned from.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Get server info (after initialization).
    pub async fn server_info(&self) -> Option<InitializeResult> {
        self.server_info.lock().await.clone()
    }

    /// Perform the `initialize` exchange. No-op once the session is ready.
    pub async fn initialize(&self) -> Result<()> {
        let _guard = self.handshake.lock().await;
        match self.state() {
            SessionState::Ready => return Ok(()),
            SessionState::Broken => return Err(Error::ServerExited),
            SessionState::Connecting => {}
        }

        let exchange =
            self.request::<_, InitializeResult>("initialize", Some(InitializeParams::default()));
        let result = match timeout(self.startup_timeout, exchange).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.mark_broken("handshake failed").await;
                return Err(Error::Handshake(e.to_string()));
            }
            Err(_) => {
                self.mark_broken("handshake timed out").await;
                return Err(Error::Handshake(format!(
                    "no response within {:?}",
                    self.startup_timeout
                )));
            }
        };

        self.notify("notifications/initialized", None).await?;

        info!(
            server = %self.name(),
            remote = %result.server_info.name,
            protocol = %result.protocol_version,
            "tool server ready"
        );
        *self.server_info.lock().await = Some(result);

        // Only a connecting session may become ready; a concurrent break wins.
        let _ = self.state.compare_exchange(
            SessionState::Connecting as u8,
            SessionState::Ready as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        match self.state() {
            SessionState::Ready => Ok(()),
            _ => Err(Error::ServerExited),
        }
    }

    /// Query the server's tool catalog, handshaking first if needed.
    pub async fn list_tools(&self) -> Result<Vec<Tool>> {
        if self.state() == SessionState::Connecting {
            self.initialize().await?;
        }

        let mut tools = Vec::new();
        let mut cursor = None;
        loop {
            let page: ListToolsResult = self
                .request("tools/list", Some(ListToolsParams { cursor }))
                .await?;
            tools.extend(page.tools);
            match page.next_cursor {
                Some(next) if !next.is_empty() => cursor = Some(next),
                _ => break,
            }
        }
        Ok(tools)
    }

    /// Call a tool by name.
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Option<Map<String, Value>>,
    ) -> Result<CallToolResult> {
        match self.state() {
            SessionState::Ready => {}
            SessionState::Connecting => return Err(Error::NotInitialized),
            SessionState::Broken => return Err(Error::ServerExited),
        }

        let params = CallToolParams {
            name: name.to_string(),
            arguments,
        };

        let result: CallToolResult = self.request("tools/call", Some(params)).await?;

        // Check for error flag
        if result.is_error {
            let error_text = result
                .content
                .iter()
                .filter_map(|c| c.as_text())
                .collect::<Vec<_>>()
                .join("\n");
            return Err(Error::ToolCallFailed(error_text));
        }

        Ok(result)
    }

    // --- Internal methods ---

    fn next_request_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    async fn request<P, R>(&self, method: &str, params: Option<P>) -> Result<R>
    where
        P: Serialize,
        R: serde::de::DeserializeOwned,
    {
        if self.state() == SessionState::Broken {
            return Err(Error::ServerExited);
        }

        let id = self.next_request_id();
        let mut request = JsonRpcRequest::new(id.clone(), method);
        if let Some(p) = params {
            request = request.with_params(p);
        }

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id.clone(), tx);

        // The reader marks the state before draining `pending`, so a request
        // registered after the drain is caught here.
        if self.state() == SessionState::Broken {
            self.pending.lock().await.remove(&id);
            return Err(Error::ServerExited);
        }

        if let Err(e) = self.write_line(&serde_json::to_string(&request)?).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        let response = match timeout(self.request_timeout, rx).await {
            Ok(Ok(response)) => response?,
            Ok(Err(_)) => return Err(Error::ServerExited),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                return Err(Error::Timeout);
            }
        };

        let result_value = response.into_result()?;
        serde_json::from_value(result_value)
            .map_err(|e| Error::Protocol(format!("malformed {method} result: {e}")))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let notification = JsonRpcNotification::new(method, params);
        self.write_line(&serde_json::to_string(&notification)?).await
    }

    async fn write_line(&self, line: &str) -> Result<()> {
        let written = {
            let mut stdin = self.stdin.lock().await;
            let mut result = stdin.write_all(line.as_bytes()).await;
            if result.is_ok() {
                result = stdin.write_all(b"\n").await;
            }
            if result.is_ok() {
                result = stdin.flush().await;
            }
            result
        };

        if let Err(e) = written {
            self.mark_broken("write to server failed").await;
            return Err(Error::Transport(e.to_string()));
        }
        Ok(())
    }

    /// Move to `Broken` and fail every in-flight request.
    async fn mark_broken(&self, reason: &str) {
        let previous = self.state.swap(SessionState::Broken as u8, Ordering::AcqRel);
        if SessionState::from_u8(previous) != SessionState::Broken {
            warn!(server = %self.name(), reason, "tool server session broken");
        }
        // Dropping the senders wakes the waiters with `ServerExited`.
        self.pending.lock().await.clear();
    }

    async fn dispatch(&self, line: &str) {
        match ServerMessage::parse(line) {
            Ok(ServerMessage::Response(response)) => {
                let waiter = self.pending.lock().await.remove(&response.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(Ok(response));
                    }
                    None => debug!(
                        server = %self.name(),
                        id = %response.id,
                        "dropping unmatched response"
                    ),
                }
            }
            Ok(ServerMessage::Request(request)) => self.answer(request).await,
            Ok(ServerMessage::Notification(notification)) => {
                debug!(server = %self.name(), method = %notification.method, "server notification");
            }
            Err(e) => {
                warn!(server = %self.name(), error = %e, "unparseable line from tool server");
            }
        }
    }

    async fn answer(&self, request: ServerRequest) {
        let response = match request.method.as_str() {
            "ping" => JsonRpcResponse::success(request.id, Value::Object(Map::new())),
            other => JsonRpcResponse::failure(
                request.id,
                METHOD_NOT_FOUND,
                format!("method not supported by client: {other}"),
            ),
        };
        match serde_json::to_string(&response) {
            Ok(line) => {
                let _ = self.write_line(&line).await;
            }
            Err(e) => warn!(server = %self.name(), error = %e, "failed to encode reply"),
        }
    }

    /// Fail the request an oversized frame answers. `prefix` holds the start
    /// of the frame, enough to recover its id.
    async fn reject_oversized(&self, prefix: &[u8], size: usize) {
        warn!(
            server = %self.name(),
            size,
            max = MAX_OUTPUT_SIZE,
            "oversized message from tool server"
        );
        let Some(id) = leading_id(prefix) else {
            return;
        };
        if let Some(tx) = self.pending.lock().await.remove(&id) {
            let _ = tx.send(Err(Error::OutputTooLarge {
                size,
                max: MAX_OUTPUT_SIZE,
            }));
        }
    }
}

/// One newline-delimited frame of server output.
#[derive(Debug, PartialEq, Eq)]
enum Frame {
    Line,
    /// Longer than `MAX_OUTPUT_SIZE`. Only the first bytes are buffered.
    Oversized(usize),
    Eof,
}

/// Read the next frame into `buf` without buffering more than the size limit.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Frame>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_OUTPUT_SIZE as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(Frame::Eof);
    }
    if buf.last() == Some(&b'\n') || (read as u64) < limit {
        return Ok(Frame::Line);
    }

    // Drain the rest of the line in bounded chunks.
    let mut size = read;
    let mut rest = Vec::new();
    loop {
        rest.clear();
        let n = (&mut *reader)
            .take(MAX_OUTPUT_SIZE as u64)
            .read_until(b'\n', &mut rest)
            .await?;
        size += n;
        if n == 0 || rest.last() == Some(&b'\n') {
            break;
        }
    }
    Ok(Frame::Oversized(size))
}

/// Id of a truncated response, read from its leading `"id":` member.
fn leading_id(prefix: &[u8]) -> Option<RequestId> {
    let head = String::from_utf8_lossy(&prefix[..prefix.len().min(256)]);
    let start = head.find("\"id\":")? + "\"id\":".len();
    let rest = head[start..].trim_start();

    if let Some(quoted) = rest.strip_prefix('"') {
        let end = quoted.find('"')?;
        return Some(RequestId::String(quoted[..end].to_string()));
    }
    let end = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '-'))
        .unwrap_or(rest.len());
    rest[..end].parse().ok().map(RequestId::Number)
}

/// Read server output until EOF, routing each message by request id.
fn spawn_reader(session: Weak<Session>, stdout: ChildStdout) {
    tokio::spawn(async move {
        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();

        loop {
            let read = read_frame(&mut reader, &mut buf).await;
            let Some(session) = session.upgrade() else {
                break;
            };

            match read {
                Ok(Frame::Eof) => {
                    session.mark_broken("server closed its output").await;
                    break;
                }
                Err(e) => {
                    session.mark_broken(&format!("read error: {e}")).await;
                    break;
                }
                Ok(Frame::Oversized(size)) => session.reject_oversized(&buf, size).await,
                Ok(Frame::Line) => {
                    let line = String::from_utf8_lossy(&buf);
                    let message = line.trim();
                    if !message.is_empty() {
                        session.dispatch(message).await;
                    }
                }
            }
        }
    });
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    /// Line-oriented MCP server in POSIX sh. Relies on requests being
    /// serialized as `{"jsonrpc":"2.0","id":N,...}`.
    const MOCK_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock","version":"1.0"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":@TOOLS@}}\n' "$id" ;;
    *'"name":"lookup"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"found"},{"type":"text","text":"twice"}]}}\n' "$id" ;;
    *'"name":"flaky"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"disk full"}],"isError":true}}\n' "$id" ;;
    *'"name":"big"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"' "$id"
      head -c 1100000 /dev/zero | tr '\0' a
      printf '"}]}}\n' ;;
    *'"name":"quit"'*)
      exit 0 ;;
    *)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32602,"message":"unknown tool"}}\n' "$id" ;;
  esac
done
"#;

    const STARTUP: Duration = Duration::from_secs(5);

    const LOOKUP_TOOLS: &str = concat!(
        r#"[{"name":"lookup","description":"Look up a term","#,
        r#""inputSchema":{"type":"object","properties":{"term":{"type":"string"}}}}]"#,
    );

    /// Mock server whose `tools/list` result carries `tools` verbatim.
    fn mock_listing(tools: &str) -> ServerConfig {
        let script = MOCK_SERVER.replace("@TOOLS@", tools);
        ServerConfig::new("mock", "sh").args(["-c", script.as_str()])
    }

    fn mock_config() -> ServerConfig {
        mock_listing(LOOKUP_TOOLS)
    }

    #[test]
    fn server_config_defaults() {
        let config: ServerConfig =
            serde_json::from_str(r#"{"name": "search", "command": "search-mcp"}"#).unwrap();
        assert!(config.enabled);
        assert!(config.args.is_empty());
        assert!(config.env.is_empty());
    }

    #[tokio::test]
    async fn handshake_and_discovery() {
        let session = Session::spawn(mock_config(), STARTUP).await.unwrap();
        assert_eq!(session.state(), SessionState::Connecting);

        // Listing performs the handshake on first use.
        let tools = session.list_tools().await.unwrap();
        assert_eq!(session.state(), SessionState::Ready);
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0].name, "lookup");

        let info = session.server_info().await.unwrap();
        assert_eq!(info.server_info.name, "mock");
    }

    #[tokio::test]
    async fn call_tool_renders_content() {
        let session = Session::connect(mock_config(), STARTUP).await.unwrap();
        let mut args = Map::new();
        args.insert("term".into(), Value::String("rust".into()));

        let result = session.call_tool("lookup", Some(args)).await.unwrap();
        assert_eq!(result.render(), "found\ntwice");
    }

    #[tokio::test]
    async fn concurrent_calls_are_correlated() {
        let session = Session::connect(mock_config(), STARTUP).await.unwrap();

        let (a, b) = tokio::join!(
            session.call_tool("lookup", None),
            session.call_tool("missing", None)
        );
        assert_eq!(a.unwrap().render(), "found\ntwice");
        assert!(matches!(b, Err(Error::JsonRpc(e)) if e.message == "unknown tool"));
    }

    #[tokio::test]
    async fn error_flagged_result_is_invocation_error() {
        let session = Session::connect(mock_config(), STARTUP).await.unwrap();
        let err = session.call_tool("flaky", None).await.unwrap_err();
        assert!(err.is_invocation());
        assert!(err.to_string().contains("disk full"));
    }

    #[tokio::test]
    async fn server_exit_breaks_session() {
        let session = Session::connect(mock_config(), STARTUP).await.unwrap();

        let err = session.call_tool("quit", None).await.unwrap_err();
        assert!(err.is_transport(), "unexpected error: {err}");
        assert_eq!(session.state(), SessionState::Broken);

        // Broken is terminal and fails fast.
        let err = session.call_tool("lookup", None).await.unwrap_err();
        assert!(matches!(err, Error::ServerExited));
        assert!(session.initialize().await.is_err());
    }

    #[tokio::test]
    async fn unspawnable_command_fails() {
        let config = ServerConfig::new("ghost", "/nonexistent/myngl-tool-server");
        let err = Session::connect(config, STARTUP).await.err().unwrap();
        assert!(matches!(err, Error::Spawn(_)));
    }

    #[tokio::test]
    async fn silent_server_fails_handshake() {
        let config = ServerConfig::new("silent", "sh").args(["-c", "sleep 5"]);
        let err = Session::connect(config, Duration::from_millis(200))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Handshake(_)));
    }

    #[tokio::test]
    async fn oversized_result_fails_only_its_call() {
        let session = Session::connect(mock_config(), STARTUP).await.unwrap();

        let err = session.call_tool("big", None).await.unwrap_err();
        match err {
            Error::OutputTooLarge { size, max } => {
                assert_eq!(max, MAX_OUTPUT_SIZE);
                assert!(size > MAX_OUTPUT_SIZE);
            }
            other => panic!("unexpected error: {other}"),
        }

        // The rest of the line is skipped and the session stays usable.
        assert_eq!(session.state(), SessionState::Ready);
        let result = session.call_tool("lookup", None).await.unwrap();
        assert_eq!(result.render(), "found\ntwice");
    }

    #[tokio::test]
    async fn malformed_tool_listing_is_protocol_error() {
        let session = Session::connect(mock_listing(r#""nope""#), STARTUP)
            .await
            .unwrap();
        let err = session.list_tools().await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)), "unexpected error: {err}");
    }

    #[tokio::test]
    async fn frames_are_bounded() {
        let mut input = br#"{"id":1}"#.to_vec();
        input.push(b'\n');
        input.extend(std::iter::repeat_n(b'a', MAX_OUTPUT_SIZE + 10));
        input.extend_from_slice(b"\nlast");

        let mut reader = input.as_slice();
        let mut buf = Vec::new();
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"{\"id\":1}\n");

        let frame = read_frame(&mut reader, &mut buf).await.unwrap();
        assert_eq!(frame, Frame::Oversized(MAX_OUTPUT_SIZE + 11));
        assert_eq!(buf.len(), MAX_OUTPUT_SIZE + 1);

        // An unterminated final line still counts.
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Line);
        assert_eq!(buf, b"last");
        assert_eq!(read_frame(&mut reader, &mut buf).await.unwrap(), Frame::Eof);
    }

    #[test]
    fn leading_id_of_truncated_frame() {
        assert_eq!(
            leading_id(br#"{"jsonrpc":"2.0","id":42,"result":{"content":[{"te"#),
            Some(RequestId::Number(42))
        );
        assert_eq!(
            leading_id(br#"{"jsonrpc":"2.0","id": "req-7","result""#),
            Some(RequestId::String("req-7".into()))
        );
        assert_eq!(leading_id(b"aaaaaaaa"), None);
    }
}
