//! Requests the content script forwards to the extension's background side.
//!
//! Content scripts cannot query tabs or open new ones. They send a small
//! JSON message naming the procedure and its positional arguments, and the
//! background side answers with a JSON value.

use std::future::Future;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use smol_str::SmolStr;

use crate::error::LookupError;

pub const RPC_CURRENT_TAB_TITLE: &str = "getCurrentTabTitle";
pub const RPC_CREATE_TAB: &str = "createTab";

/// Wire form of one relayed call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayMessage {
    #[serde(rename = "rpcId")]
    pub rpc_id: SmolStr,
    #[serde(default)]
    pub args: Vec<Value>,
}

impl RelayMessage {
    pub fn current_tab_title() -> Self {
        Self {
            rpc_id: RPC_CURRENT_TAB_TITLE.into(),
            args: Vec::new(),
        }
    }

    pub fn create_tab(url: &str) -> Self {
        Self {
            rpc_id: RPC_CREATE_TAB.into(),
            args: vec![json!({ "url": url })],
        }
    }
}

/// Decode the answer to `getCurrentTabTitle`. Anything but a non-empty
/// string means the title is unknown.
pub fn decode_title(response: &Value) -> Option<String> {
    response
        .as_str()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Host-side services reachable from the page.
pub trait HostRelay: Clone + 'static {
    /// Title of the tab the page is shown in, if the host knows it.
    fn current_page_title(&self) -> impl Future<Output = Result<Option<String>, LookupError>>;

    /// Open `url` in a new tab.
    fn open_tab(&self, url: &str) -> impl Future<Output = Result<(), LookupError>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let message = RelayMessage::create_tab("https://example.com/?q=a%20b");
        insta::assert_snapshot!(
            serde_json::to_string(&message).unwrap(),
            @r#"{"rpcId":"createTab","args":[{"url":"https://example.com/?q=a%20b"}]}"#
        );
        assert_eq!(
            serde_json::to_value(RelayMessage::current_tab_title()).unwrap(),
            json!({ "rpcId": "getCurrentTabTitle", "args": [] })
        );
    }

    #[test]
    fn test_message_args_default_to_empty() {
        let message: RelayMessage = serde_json::from_str(r#"{"rpcId":"getCurrentTabTitle"}"#).unwrap();
        assert_eq!(message, RelayMessage::current_tab_title());
    }

    #[test]
    fn test_decode_title() {
        assert_eq!(decode_title(&json!("Docs ")), Some("Docs".to_string()));
        assert_eq!(decode_title(&json!("   ")), None);
        assert_eq!(decode_title(&Value::Null), None);
        assert_eq!(decode_title(&json!(3)), None);
    }
}
