//! Attempts and per-problem proof records.

use std::path::PathBuf;
use std::time::Duration;

use lean_repl::{CheckOutcome, Diagnostic};
use serde::{Deserialize, Serialize};

/// Errors from loading or persisting records.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("Benchmark problem '{problem}' is missing '{field}'")]
    MissingField {
        problem: String,
        field: &'static str,
    },

    #[error("Benchmark problem '{0}' is missing a non-empty 'header'")]
    EmptyHeader(String),

    /// A key is used both as a record and as a variant group.
    #[error("Record key '{0}' conflicts with a variant group of the same name")]
    KeyConflict(String),

    #[error("Invalid checkpoint: {0}")]
    InvalidCheckpoint(String),
}

impl RecordError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecordError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Durations are stored as fractional seconds.
mod seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom(format!("invalid duration: {secs}")));
        }
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

/// One sampled candidate and its verification outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attempt {
    pub success: bool,
    /// Model output before parsing.
    pub raw_output: String,
    /// Program actually sent to the checker.
    pub parsed_proof: String,
    #[serde(rename = "message")]
    pub diagnostic: Diagnostic,
    #[serde(with = "seconds")]
    pub generation_time: Duration,
    #[serde(with = "seconds")]
    pub verification_time: Duration,
}

impl Attempt {
    pub fn from_outcome(
        raw_output: impl Into<String>,
        parsed_proof: impl Into<String>,
        outcome: CheckOutcome,
        generation_time: Duration,
        verification_time: Duration,
    ) -> Self {
        Self {
            success: outcome.verified,
            raw_output: raw_output.into(),
            parsed_proof: parsed_proof.into(),
            diagnostic: outcome.diagnostic,
            generation_time,
            verification_time,
        }
    }
}

/// Everything known about one problem (or problem variant): its statement,
/// the header it is checked against, and every attempt in generation order.
///
/// `solution` is the parsed proof of the first successful attempt. It is
/// derived from the attempts and never replaced once set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "ProofRecordWire")]
pub struct ProofRecord {
    formal_statement: String,
    header: String,
    informal_statement: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    nl_proof: Option<String>,
    attempts: Vec<Attempt>,
    solution: Option<String>,
}

#[derive(Deserialize)]
struct ProofRecordWire {
    formal_statement: String,
    #[serde(default)]
    header: Option<String>,
    #[serde(default)]
    informal_statement: Option<String>,
    #[serde(default)]
    nl_proof: Option<String>,
    #[serde(default)]
    attempts: Vec<Attempt>,
    #[serde(default)]
    solution: Option<String>,
}

impl From<ProofRecordWire> for ProofRecord {
    fn from(wire: ProofRecordWire) -> Self {
        let mut record = ProofRecord::new(wire.formal_statement, wire.header.unwrap_or_default())
            .with_informal_statement(wire.informal_statement)
            .with_nl_proof(wire.nl_proof);
        for attempt in wire.attempts {
            record.add_attempt(attempt);
        }
        if let Some(stored) = wire.solution {
            if record.solution.as_deref() != Some(stored.as_str()) {
                tracing::warn!(
                    statement = %record.formal_statement.chars().take(60).collect::<String>(),
                    "Stored solution disagrees with attempts, using the first successful attempt"
                );
            }
        }
        record
    }
}

impl ProofRecord {
    pub fn new(formal_statement: impl Into<String>, header: impl Into<String>) -> Self {
        Self {
            formal_statement: formal_statement.into(),
            header: header.into(),
            informal_statement: None,
            nl_proof: None,
            attempts: Vec::new(),
            solution: None,
        }
    }

    pub fn with_informal_statement(mut self, informal: Option<String>) -> Self {
        self.informal_statement = informal;
        self
    }

    pub fn with_nl_proof(mut self, nl_proof: Option<String>) -> Self {
        self.nl_proof = nl_proof;
        self
    }

    pub fn formal_statement(&self) -> &str {
        &self.formal_statement
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn informal_statement(&self) -> Option<&str> {
        self.informal_statement.as_deref()
    }

    pub fn nl_proof(&self) -> Option<&str> {
        self.nl_proof.as_deref()
    }

    pub fn attempts(&self) -> &[Attempt] {
        &self.attempts
    }

    pub fn solution(&self) -> Option<&str> {
        self.solution.as_deref()
    }

    pub fn has_solution(&self) -> bool {
        self.solution.is_some()
    }

    pub fn count_attempts(&self) -> usize {
        self.attempts.len()
    }

    pub fn count_successes(&self) -> usize {
        self.attempts.iter().filter(|a| a.success).count()
    }

    /// Append an attempt. The first success becomes the solution.
    pub fn add_attempt(&mut self, attempt: Attempt) {
        if attempt.success && self.solution.is_none() {
            self.solution = Some(attempt.parsed_proof.clone());
        }
        self.attempts.push(attempt);
    }

    pub fn extend_attempts(&mut self, attempts: impl IntoIterator<Item = Attempt>) {
        for attempt in attempts {
            self.add_attempt(attempt);
        }
    }

    pub fn total_generation_time(&self) -> Duration {
        self.attempts.iter().map(|a| a.generation_time).sum()
    }

    pub fn total_verification_time(&self) -> Duration {
        self.attempts.iter().map(|a| a.verification_time).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attempt(success: bool, proof: &str) -> Attempt {
        let outcome = if success {
            CheckOutcome::verified()
        } else {
            CheckOutcome::rejected(Diagnostic::text("unsolved goals"))
        };
        Attempt::from_outcome(
            format!("```lean4\n{proof}\n```"),
            proof,
            outcome,
            Duration::from_millis(1500),
            Duration::from_millis(250),
        )
    }

    #[test]
    fn test_solution_is_first_success() {
        let mut record = ProofRecord::new("theorem t : True := by", "import Mathlib\n");
        record.add_attempt(attempt(false, "bad"));
        assert!(!record.has_solution());
        record.add_attempt(attempt(true, "first"));
        record.add_attempt(attempt(true, "second"));
        assert_eq!(record.solution(), Some("first"));
        assert_eq!(record.count_attempts(), 3);
        assert_eq!(record.count_successes(), 2);
    }

    #[test]
    fn test_attempt_wire_format() {
        let json = serde_json::to_value(attempt(true, "trivial")).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["parsed_proof"], "trivial");
        assert_eq!(json["message"], "Proof verified successfully");
        assert_eq!(json["generation_time"], 1.5);
        assert_eq!(json["verification_time"], 0.25);
        assert!(json.get("diagnostic").is_none());
    }

    #[test]
    fn test_attempt_accepts_message_list() {
        let json = r#"{
            "success": false,
            "raw_output": "x",
            "parsed_proof": "x",
            "message": [{"severity": "error", "data": "unknown identifier 'x'", "pos": {"line": 1, "column": 0}}],
            "generation_time": 2.0,
            "verification_time": 0.5
        }"#;
        let attempt: Attempt = serde_json::from_str(json).unwrap();
        match &attempt.diagnostic {
            Diagnostic::Messages(messages) => assert!(messages[0].is_error()),
            other => panic!("expected messages, got {other:?}"),
        }
        assert_eq!(attempt.verification_time, Duration::from_millis(500));
    }

    #[test]
    fn test_negative_duration_rejected() {
        let json = r#"{"success": false, "raw_output": "", "parsed_proof": "",
            "message": "", "generation_time": -1.0, "verification_time": 0.0}"#;
        assert!(serde_json::from_str::<Attempt>(json).is_err());
    }

    #[test]
    fn test_overflowing_duration_is_an_error() {
        let json = r#"{"formal_statement": "theorem t : True := by", "header": "import Mathlib\n",
            "attempts": [{"success": false, "raw_output": "", "parsed_proof": "",
                "message": "", "generation_time": 1e30, "verification_time": 0.0}]}"#;
        let err = serde_json::from_str::<ProofRecord>(json).unwrap_err();
        assert!(err.is_data(), "{err}");
    }

    #[test]
    fn test_record_roundtrip() {
        let mut record = ProofRecord::new("theorem t : True := by", "import Mathlib\n")
            .with_informal_statement(Some("Truth holds.".into()));
        record.add_attempt(attempt(false, "bad"));
        record.add_attempt(attempt(true, "trivial"));

        let json = serde_json::to_string(&record).unwrap();
        let back: ProofRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.solution(), Some("trivial"));
    }

    #[test]
    fn test_deserialize_recomputes_solution() {
        let mut record = ProofRecord::new("theorem t : True := by", "import Mathlib\n");
        record.add_attempt(attempt(true, "trivial"));
        let mut json = serde_json::to_value(&record).unwrap();

        json["solution"] = serde_json::Value::Null;
        let back: ProofRecord = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(back.solution(), Some("trivial"));

        json["solution"] = "something else".into();
        let back: ProofRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back.solution(), Some("trivial"));
    }

    #[test]
    fn test_serialized_fields() {
        let record = ProofRecord::new("theorem t : True := by", "import Mathlib\n");
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["informal_statement"].is_null());
        assert!(json["solution"].is_null());
        assert!(json.get("nl_proof").is_none());
        assert_eq!(json["attempts"].as_array().unwrap().len(), 0);
    }
}
