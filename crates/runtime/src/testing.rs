//! Tool server fixtures shared by the unit tests.

use std::time::Duration;

use mcp::ServerConfig;

use crate::registry::ToolOptions;

/// POSIX sh tool server exposing `lookup`, `fail`, `hang` and `quit`.
pub(crate) const MOCK_SERVER: &str = r#"
while IFS= read -r line; do
  id=$(printf '%s\n' "$line" | sed -n 's/^{"jsonrpc":"2.0","id":\([0-9][0-9]*\),.*/\1/p')
  [ -z "$id" ] && continue
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"mock"}}}\n' "$id" ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":[{"name":"lookup","description":"Look up a term","inputSchema":{"type":"object","properties":{"term":{"type":"string"}},"required":["term"]}},{"name":"fail"},{"name":"hang"},{"name":"quit"}]}}\n' "$id" ;;
    *'"name":"lookup"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"found it"}]}}\n' "$id" ;;
    *'"name":"fail"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"database offline"}}\n' "$id" ;;
    *'"name":"hang"'*)
      ;;
    *'"name":"quit"'*)
      exit 0 ;;
  esac
done
"#;

pub(crate) fn mock(name: &str) -> ServerConfig {
    ServerConfig::new(name, "sh").args(["-c", MOCK_SERVER])
}

pub(crate) fn options() -> ToolOptions {
    ToolOptions {
        startup_timeout: Duration::from_secs(5),
        call_timeout: Duration::from_secs(5),
    }
}
