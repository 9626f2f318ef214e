//! Checkpoint files: every record with all of its attempts, as pretty JSON.
//!
//! Keys of the form `problem/variant` are nested one level:
//! `{"problem": {"variant": {...record...}}}`. Plain keys map directly to a
//! record. The file is replaced atomically (temp file + rename).

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::types::{ProofRecord, RecordError};

/// Build the checkpoint JSON document for `records`.
pub fn to_document(records: &[(String, ProofRecord)]) -> Result<Value, RecordError> {
    let mut root = Map::new();
    for (key, record) in records {
        let value = serde_json::to_value(record)?;
        match key.split_once('/') {
            Some((problem, variant)) => {
                let group = root
                    .entry(problem.to_string())
                    .or_insert_with(|| Value::Object(Map::new()));
                let Value::Object(group) = group else {
                    return Err(RecordError::KeyConflict(problem.to_string()));
                };
                if is_record_map(group) {
                    return Err(RecordError::KeyConflict(problem.to_string()));
                }
                group.insert(variant.to_string(), value);
            }
            None => {
                if root.contains_key(key) {
                    return Err(RecordError::KeyConflict(key.clone()));
                }
                root.insert(key.clone(), value);
            }
        }
    }
    Ok(Value::Object(root))
}

/// Write all records to `path`, creating parent directories.
pub fn write_checkpoint(path: &Path, records: &[(String, ProofRecord)]) -> Result<(), RecordError> {
    let document = to_document(records)?;
    let mut text = serde_json::to_string_pretty(&document)?;
    text.push('\n');

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| RecordError::io(parent, e))?;
    }

    let tmp = temp_path(path);
    std::fs::write(&tmp, text).map_err(|e| RecordError::io(&tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| RecordError::io(path, e))?;

    tracing::debug!(path = %path.display(), records = records.len(), "Checkpoint written");
    Ok(())
}

/// Read a checkpoint back into flat `problem/variant` keyed records.
pub fn read_checkpoint(path: &Path) -> Result<Vec<(String, ProofRecord)>, RecordError> {
    let text = std::fs::read_to_string(path).map_err(|e| RecordError::io(path, e))?;
    from_document(serde_json::from_str(&text)?)
}

/// Inverse of [`to_document`]. Keys come back in sorted order.
pub fn from_document(document: Value) -> Result<Vec<(String, ProofRecord)>, RecordError> {
    let Value::Object(root) = document else {
        return Err(RecordError::InvalidCheckpoint(
            "top level must be an object".into(),
        ));
    };

    let mut records = Vec::new();
    for (key, value) in root {
        if is_record(&value) {
            records.push((key, serde_json::from_value(value)?));
            continue;
        }
        let Value::Object(variants) = value else {
            return Err(RecordError::InvalidCheckpoint(format!(
                "entry '{key}' is neither a record nor a variant group"
            )));
        };
        for (variant, record) in variants {
            if !is_record(&record) {
                return Err(RecordError::InvalidCheckpoint(format!(
                    "entry '{key}/{variant}' is not a record"
                )));
            }
            records.push((format!("{key}/{variant}"), serde_json::from_value(record)?));
        }
    }
    Ok(records)
}

fn is_record(value: &Value) -> bool {
    value.as_object().is_some_and(is_record_map)
}

fn is_record_map(obj: &Map<String, Value>) -> bool {
    obj.get("formal_statement").is_some_and(Value::is_string)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "checkpoint.json".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}
