//! Candidate signatures from wordlist files.
//!
//! One Java method declaration per line. Blank lines and lines starting with
//! `#` are skipped.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::candidate::MethodCandidate;
use crate::error::RmgError;

pub fn parse(source: &str, text: &str) -> Vec<MethodCandidate> {
    let mut candidates = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match MethodCandidate::parse(line.trim_end_matches(';')) {
            Ok(candidate) => candidates.push(candidate),
            Err(err) => warn!(file = source, line = index + 1, error = %err, "skipping signature"),
        }
    }
    candidates
}

async fn files(path: &Path) -> Result<Vec<PathBuf>, RmgError> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|err| RmgError::invalid_input(format!("{}: {}", path.display(), err)))?;
    if !metadata.is_dir() {
        return Ok(vec![path.to_owned()]);
    }
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(path).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "txt") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Loads a wordlist file, or every `*.txt` file of a folder. Candidates are
/// deduplicated by method hash, first occurrence wins.
pub async fn load(path: &Path) -> Result<Vec<MethodCandidate>, RmgError> {
    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    for file in files(path).await? {
        let text = tokio::fs::read_to_string(&file).await?;
        let parsed = parse(&file.display().to_string(), &text);
        debug!(file = %file.display(), count = parsed.len(), "read wordlist");
        candidates.extend(parsed.into_iter().filter(|candidate| seen.insert(candidate.hash())));
    }
    Ok(candidates)
}
