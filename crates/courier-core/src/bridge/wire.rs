//! Line protocol spoken with the bridge process.
//!
//! One JSON object per line in each direction:
//!
//! ```text
//! -> {"id":1,"method":"sendMessage","params":{"jid":"...","content":{"text":"hi"}}}
//! <- {"id":1,"result":null}
//! <- {"id":2,"error":{"message":"not on network"}}
//! <- {"event":"connection.update","data":{"connection":"open"}}
//! ```

use crate::protocol::{ClientEvent, ProtocolError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const METHOD_CONNECT: &str = "connect";
pub const METHOD_REQUEST_PAIRING_CODE: &str = "requestPairingCode";
pub const METHOD_SEND_MESSAGE: &str = "sendMessage";

#[derive(Debug, Clone, Serialize)]
pub struct Request<'a> {
    pub id: u64,
    pub method: &'a str,
    pub params: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Response {
    pub id: u64,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorBody>,
}

impl Response {
    pub fn into_result(self) -> Result<Value, ProtocolError> {
        match self.error {
            Some(error) => Err(ProtocolError::Remote(error.message)),
            None => Ok(self.result.unwrap_or(Value::Null)),
        }
    }
}

/// Anything the bridge can print on stdout.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Message {
    Response(Response),
    Event(ClientEvent),
    /// Valid JSON we have no use for (future event kinds, debug output).
    Unknown(Value),
}

pub fn parse_line(line: &str) -> Result<Message, ProtocolError> {
    serde_json::from_str(line).map_err(|e| ProtocolError::Malformed(e.to_string()))
}

pub fn encode_request(id: u64, method: &str, params: Value) -> Result<String, ProtocolError> {
    serde_json::to_string(&Request { id, method, params })
        .map_err(|e| ProtocolError::Malformed(e.to_string()))
}
