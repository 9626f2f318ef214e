//! Saving client-supplied JSON documents under an upload directory.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

/// Reduce a client-supplied filename to a safe single path component.
///
/// Path separators become spaces, whitespace runs become `_`, anything
/// outside `[A-Za-z0-9_.-]` is dropped, and leading/trailing `.`/`_` are
/// trimmed. An empty result means the name is unusable.
pub fn sanitize_filename(filename: &str) -> String {
    let spaced = filename.replace(['/', '\\'], " ");
    let joined = spaced.split_whitespace().collect::<Vec<_>>().join("_");
    let kept: String = joined
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
        .collect();
    kept.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Split `name.ext` into (`name`, `.ext`). A leading dot is not an extension.
fn split_extension(filename: &str) -> (&str, &str) {
    match filename.rfind('.') {
        Some(i) if i > 0 && filename[..i].chars().any(|c| c != '.') => {
            (&filename[..i], &filename[i..])
        }
        _ => (filename, ""),
    }
}

/// First free path for `filename` in `dir`: the name itself, then
/// `name(1).ext`, `name(2).ext`, ...
pub fn unique_destination(dir: &Path, filename: &str) -> PathBuf {
    let candidate = dir.join(filename);
    if !candidate.exists() {
        return candidate;
    }
    let (stem, ext) = split_extension(filename);
    (1u64..)
        .map(|n| dir.join(format!("{stem}({n}){ext}")))
        .find(|path| !path.exists())
        .unwrap_or(candidate)
}

/// Write `content` as 4-space indented JSON to a fresh file in `dir`.
///
/// Returns the final file name. `filename` must already be sanitized.
pub fn save_json(dir: &Path, filename: &str, content: &serde_json::Value) -> anyhow::Result<String> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create upload dir {}", dir.display()))?;
    let destination = unique_destination(dir, filename);

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    content.serialize(&mut ser)?;

    std::fs::write(&destination, buf)
        .with_context(|| format!("Failed to write {}", destination.display()))?;

    let saved = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    tracing::info!(path = %destination.display(), "Saved upload");
    Ok(saved)
}
