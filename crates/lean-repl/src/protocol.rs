use serde::{Deserialize, Serialize};

use crate::types::CheckerError;

/// A command sent to the REPL.
///
/// The preamble is sent without `env` (a fresh environment). Every later
/// check references the base environment produced by the preamble.
#[derive(Debug, Clone, Serialize)]
pub struct ReplCommand {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env: Option<u64>,
}

impl ReplCommand {
    pub fn new(cmd: impl Into<String>, env: Option<u64>) -> Self {
        Self {
            cmd: cmd.into(),
            env,
        }
    }

    /// Serialize to one frame: the JSON object followed by a blank line.
    ///
    /// The REPL only starts processing once it sees the empty line.
    pub fn to_frame(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut frame = serde_json::to_vec(self)?;
        frame.extend_from_slice(b"\n\n");
        Ok(frame)
    }
}

// --- Response types ---

/// Line/column position in the submitted source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pos {
    pub line: u64,
    pub column: u64,
}

/// A diagnostic message reported by the REPL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplMessage {
    /// "error", "warning" or "info".
    pub severity: String,
    #[serde(default)]
    pub data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_pos: Option<Pos>,
}

impl ReplMessage {
    pub fn is_error(&self) -> bool {
        self.severity == "error"
    }
}

/// An unresolved goal (`sorry`) left in the checked program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sorry {
    #[serde(default)]
    pub goal: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<Pos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_pos: Option<Pos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proof_state: Option<u64>,
}

/// A response received from the REPL.
///
/// Success carries `env`; failures carry `messages`, `sorries`, or a
/// top-level `message`/`error`. Unknown fields are kept in `extra` so the
/// response can be relayed verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReplResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<u64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub messages: Vec<ReplMessage>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sorries: Vec<Sorry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ReplResponse {
    /// Top-level failure reported instead of a checked result, if any.
    pub fn failure_message(&self) -> Option<&str> {
        self.error.as_deref().or(self.message.as_deref())
    }

    /// Messages with error severity.
    pub fn errors(&self) -> impl Iterator<Item = &ReplMessage> {
        self.messages.iter().filter(|m| m.is_error())
    }

    fn from_value(value: serde_json::Value) -> Result<Self, CheckerError> {
        if !value.is_object() {
            return Err(CheckerError::Protocol(format!(
                "Expected a JSON object, got: {value}"
            )));
        }
        serde_json::from_value(value)
            .map_err(|e| CheckerError::Protocol(format!("Failed to parse REPL response: {e}")))
    }
}

/// Incremental framing for REPL output.
///
/// The REPL does not mark the end of a response, so bytes are accumulated
/// and the whole buffer is re-parsed after every chunk. The response is
/// complete the moment the buffer holds one well-formed JSON value.
#[derive(Debug, Default)]
pub struct ResponseAccumulator {
    buf: Vec<u8>,
}

impl ResponseAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether any non-whitespace output has been received.
    pub fn is_empty(&self) -> bool {
        self.buf.iter().all(|b| b.is_ascii_whitespace())
    }

    /// Append a chunk and try to complete the response.
    ///
    /// Returns `None` while the value is still incomplete.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Result<ReplResponse, CheckerError>> {
        self.buf.extend_from_slice(chunk);

        let mut stream =
            serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
        match stream.next() {
            None => None,
            Some(Ok(value)) => Some(ReplResponse::from_value(value)),
            Some(Err(e)) if e.is_eof() => None,
            Some(Err(e)) => {
                let preview: String = String::from_utf8_lossy(&self.buf).chars().take(200).collect();
                Some(Err(CheckerError::Protocol(format!(
                    "Invalid JSON: {e}. Raw: {preview}"
                ))))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(acc: &mut ResponseAccumulator, chunks: &[&str]) -> Option<Result<ReplResponse, CheckerError>> {
        let mut last = None;
        for chunk in chunks {
            last = acc.push(chunk.as_bytes());
            if last.is_some() {
                break;
            }
        }
        last
    }

    #[test]
    fn preamble_command_has_no_env() {
        let frame = ReplCommand::new("import Mathlib", None).to_frame().unwrap();
        let text = String::from_utf8(frame).unwrap();
        assert!(text.ends_with("}\n\n"));
        let parsed: serde_json::Value = serde_json::from_str(text.trim()).unwrap();
        assert_eq!(parsed["cmd"], "import Mathlib");
        assert!(parsed.get("env").is_none());
    }

    #[test]
    fn check_command_references_env() {
        let frame = ReplCommand::new("theorem t : True := trivial", Some(3))
            .to_frame()
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(parsed["env"], 3);
    }

    #[test]
    fn single_chunk_response() {
        let mut acc = ResponseAccumulator::new();
        let resp = acc.push(b"{\"env\": 0}\n\n").unwrap().unwrap();
        assert_eq!(resp.env, Some(0));
        assert!(resp.messages.is_empty());
    }

    #[test]
    fn response_split_across_chunks() {
        let mut acc = ResponseAccumulator::new();
        let result = feed(
            &mut acc,
            &["{\"messages\": [{\"severity\": \"error\",", " \"data\": \"unknown", " identifier\"}],\n", " \"env\": 1}\n"],
        );
        let resp = result.unwrap().unwrap();
        assert_eq!(resp.env, Some(1));
        assert_eq!(resp.errors().count(), 1);
        assert_eq!(resp.messages[0].data, "unknown identifier");
    }

    #[test]
    fn incomplete_response_waits() {
        let mut acc = ResponseAccumulator::new();
        assert!(acc.push(b"{\"env\":").is_none());
        assert!(acc.push(b"\n").is_none());
        assert!(!acc.is_empty());
    }

    #[test]
    fn whitespace_only_is_empty() {
        let mut acc = ResponseAccumulator::new();
        assert!(acc.push(b"\n\n").is_none());
        assert!(acc.is_empty());
    }

    #[test]
    fn multibyte_character_split_mid_chunk() {
        let full = "{\"messages\":[{\"severity\":\"info\",\"data\":\"⊢ True\"}],\"env\":2}".as_bytes();
        let split = full.iter().position(|&b| b == 0xe2).unwrap() + 1;
        let mut acc = ResponseAccumulator::new();
        assert!(acc.push(&full[..split]).is_none());
        let resp = acc.push(&full[split..]).unwrap().unwrap();
        assert_eq!(resp.messages[0].data, "⊢ True");
    }

    #[test]
    fn garbage_is_protocol_error() {
        let mut acc = ResponseAccumulator::new();
        let err = acc.push(b"not json at all\n").unwrap().unwrap_err();
        assert!(matches!(err, CheckerError::Protocol(_)));
    }

    #[test]
    fn non_object_is_protocol_error() {
        let mut acc = ResponseAccumulator::new();
        let err = acc.push(b"[1, 2]\n").unwrap().unwrap_err();
        assert!(matches!(err, CheckerError::Protocol(_)));
    }

    #[test]
    fn sorries_and_positions_deserialize() {
        let json = r#"{"sorries":[{"pos":{"line":3,"column":2},"endPos":{"line":3,"column":7},"goal":"⊢ 1 = 1","proofState":0}],"env":4}"#;
        let mut acc = ResponseAccumulator::new();
        let resp = acc.push(json.as_bytes()).unwrap().unwrap();
        assert_eq!(resp.sorries.len(), 1);
        assert_eq!(resp.sorries[0].proof_state, Some(0));
        assert_eq!(resp.sorries[0].end_pos, Some(Pos { line: 3, column: 7 }));
    }

    #[test]
    fn unknown_fields_are_preserved() {
        let json = r#"{"env":1,"time":0.25}"#;
        let resp: ReplResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.extra["time"], 0.25);
        let back = serde_json::to_value(&resp).unwrap();
        assert_eq!(back["time"], 0.25);
        assert_eq!(back["env"], 1);
    }

    #[test]
    fn top_level_message_is_failure() {
        let resp: ReplResponse = serde_json::from_str(r#"{"message":"unknown environment"}"#).unwrap();
        assert_eq!(resp.failure_message(), Some("unknown environment"));
    }
}
