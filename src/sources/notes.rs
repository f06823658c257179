//! Markdown notes in a vault directory.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Local};
use nucleo::{Config, Matcher, Utf32Str};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::FetchError;
use crate::fetch::DataSource;
use crate::types::{Details, ItemFields, ListItem, QueryParams, Tag};

const DEFAULT_MAX_BODY_BYTES: u64 = 16 * 1024;
const NOTE_EXTENSION: &str = "md";

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NoteRecord {
    pub relative_path: String,
    pub modified: SystemTime,
    pub body: Option<String>,
}

impl NoteRecord {
    pub fn name(&self) -> &str {
        let file = self
            .relative_path
            .rsplit('/')
            .next()
            .unwrap_or(&self.relative_path);
        file.strip_suffix(".md").unwrap_or(file)
    }

    pub fn folder(&self) -> &str {
        self.relative_path
            .rsplit_once('/')
            .map(|(folder, _)| folder)
            .unwrap_or("")
    }
}

/// Lists notes under a vault; the query text fuzzy-filters relative paths.
///
/// An empty query lists every note, newest first, so blank input never
/// clears this view.
#[derive(Debug, Clone)]
pub struct NotesSource {
    vault: PathBuf,
    max_body_bytes: u64,
}

impl NotesSource {
    pub fn new(vault: impl Into<PathBuf>) -> Self {
        Self {
            vault: vault.into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }

    pub fn with_max_body_bytes(mut self, max_body_bytes: u64) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    pub fn vault(&self) -> &Path {
        &self.vault
    }
}

impl DataSource for NotesSource {
    type Record = NoteRecord;

    async fn fetch(
        &self,
        params: &QueryParams,
        token: &CancellationToken,
    ) -> Result<Vec<NoteRecord>, FetchError> {
        let vault = self.vault.clone();
        let params = params.clone();
        let token = token.clone();
        let max_body_bytes = self.max_body_bytes;

        tokio::task::spawn_blocking(move || scan_vault(&vault, &params, &token, max_body_bytes))
            .await
            .map_err(|err| FetchError::transient("SCAN_TASK_FAILED", err.to_string()))?
    }

    fn to_entity(&self, record: NoteRecord) -> Result<Option<ListItem>, FetchError> {
        let modified = DateTime::<Local>::from(record.modified)
            .format("%Y-%m-%d %H:%M")
            .to_string();
        let folder = record.folder();
        let fields = ItemFields {
            title: record.name().to_string(),
            subtitle: if folder.is_empty() {
                String::new()
            } else {
                format!("{folder}/")
            },
            tags: vec![Tag::new(modified)],
            details: record.body.clone().map(|body| Details {
                title: Some(record.name().to_string()),
                body,
            }),
        };
        Ok(Some(ListItem::new(record.relative_path, fields)))
    }

    fn is_blank(&self, _params: &QueryParams) -> bool {
        false
    }

    fn name(&self) -> &str {
        "notes"
    }
}

fn scan_vault(
    vault: &Path,
    params: &QueryParams,
    token: &CancellationToken,
    max_body_bytes: u64,
) -> Result<Vec<NoteRecord>, FetchError> {
    if !vault.is_dir() {
        return Err(FetchError::transient(
            "VAULT_NOT_FOUND",
            format!("vault directory '{}' does not exist", vault.display()),
        ));
    }

    let mut notes = Vec::new();
    let mut pending = vec![vault.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in fs::read_dir(&dir)? {
            if token.is_cancelled() {
                return Err(FetchError::Cancelled);
            }

            let entry = entry?;
            let path = entry.path();
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            let file_type = entry.file_type()?;
            if file_type.is_dir() {
                if !hidden {
                    pending.push(path);
                }
                continue;
            }
            let is_note = path.extension().and_then(|ext| ext.to_str()) == Some(NOTE_EXTENSION);
            if !file_type.is_file() || !is_note {
                continue;
            }

            let Ok(relative) = path.strip_prefix(vault) else {
                continue;
            };
            let relative_path = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            let modified = entry
                .metadata()
                .and_then(|meta| meta.modified())
                .unwrap_or(SystemTime::UNIX_EPOCH);
            notes.push(NoteRecord {
                relative_path,
                modified,
                body: None,
            });
        }
    }

    let mut ranked = rank_notes(&params.text, notes);
    let mut page: Vec<NoteRecord> = ranked.drain(..).skip(params.offset).collect();
    if params.limit > 0 {
        page.truncate(params.limit);
    }

    for note in &mut page {
        if token.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        note.body = read_body(&vault.join(&note.relative_path), max_body_bytes);
    }

    debug!(
        vault = %vault.display(),
        query = %params.text,
        count = page.len(),
        "vault scan complete"
    );
    Ok(page)
}

/// Orders notes newest first, or by fuzzy score when `query` is not blank.
fn rank_notes(query: &str, notes: Vec<NoteRecord>) -> Vec<NoteRecord> {
    let needle = query.trim().to_lowercase();
    if needle.is_empty() {
        let mut notes = notes;
        notes.sort_by(|a, b| {
            b.modified
                .cmp(&a.modified)
                .then_with(|| a.relative_path.cmp(&b.relative_path))
        });
        return notes;
    }

    let mut matcher = Matcher::new(Config::DEFAULT.match_paths());
    let mut needle_buf = Vec::new();
    let needle = Utf32Str::new(needle.as_str(), &mut needle_buf);
    let mut haystack_buf = Vec::new();

    let mut scored: Vec<(u16, NoteRecord)> = notes
        .into_iter()
        .filter_map(|note| {
            let haystack = Utf32Str::new(note.relative_path.as_str(), &mut haystack_buf);
            matcher
                .fuzzy_match(haystack, needle)
                .map(|score| (score, note))
        })
        .collect();

    scored.sort_by(|(left_score, left), (right_score, right)| {
        right_score
            .cmp(left_score)
            .then_with(|| right.modified.cmp(&left.modified))
            .then_with(|| left.relative_path.cmp(&right.relative_path))
    });
    scored.into_iter().map(|(_, note)| note).collect()
}

fn read_body(path: &Path, max_body_bytes: u64) -> Option<String> {
    let file = fs::File::open(path).ok()?;
    let mut bytes = Vec::new();
    file.take(max_body_bytes).read_to_end(&mut bytes).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::fetch::{FetchOperation, FetchRequest};
    use crate::generation::{QuerySequencer, Submission};

    fn write_note(root: &Path, relative: &str, body: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().expect("note path should have parent"))
            .expect("failed to create note folder");
        fs::write(path, body).expect("failed to write note");
    }

    fn record(relative: &str, age_secs: u64) -> NoteRecord {
        NoteRecord {
            relative_path: relative.to_string(),
            modified: SystemTime::UNIX_EPOCH + Duration::from_secs(1_000_000 - age_secs),
            body: None,
        }
    }

    fn request(text: &str, limit: usize) -> FetchRequest {
        let sequencer = QuerySequencer::new();
        let Submission::Fetch { generation, params } =
            sequencer.submit(QueryParams::new(text, limit), false)
        else {
            panic!("expected fetch submission");
        };
        FetchRequest { params, generation }
    }

    #[test]
    fn record_name_and_folder() {
        let note = record("projects/rust/ideas.md", 0);
        assert_eq!(note.name(), "ideas");
        assert_eq!(note.folder(), "projects/rust");
        assert_eq!(record("inbox.md", 0).folder(), "");
    }

    #[test]
    fn blank_query_orders_newest_first() {
        let ranked = rank_notes(
            "  ",
            vec![record("old.md", 500), record("new.md", 1), record("mid.md", 100)],
        );
        let order: Vec<_> = ranked.iter().map(|n| n.relative_path.as_str()).collect();
        assert_eq!(order, vec!["new.md", "mid.md", "old.md"]);
    }

    #[test]
    fn fuzzy_query_filters_paths() {
        let ranked = rank_notes(
            "grocery",
            vec![record("lists/groceries.md", 10), record("work/standup.md", 1)],
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].relative_path, "lists/groceries.md");
    }

    #[tokio::test]
    async fn scans_vault_recursively_and_skips_hidden_dirs() {
        let vault = tempfile::tempdir().expect("failed to create vault");
        write_note(vault.path(), "inbox.md", "# Inbox");
        write_note(vault.path(), "projects/plan.md", "plan body");
        write_note(vault.path(), ".obsidian/workspace.md", "hidden");
        write_note(vault.path(), "projects/readme.txt", "not a note");

        let source = NotesSource::new(vault.path());
        let rows = FetchOperation::default()
            .run(&source, &request("", 0))
            .await
            .expect("scan should succeed");

        let mut keys: Vec<_> = rows.iter().map(|row| row.key().to_string()).collect();
        keys.sort();
        assert_eq!(keys, vec!["inbox.md", "projects/plan.md"]);

        let plan = rows
            .iter()
            .find(|row| row.key().as_str() == "projects/plan.md")
            .expect("plan note should be listed");
        let fields = plan.fields();
        assert_eq!(fields.title, "plan");
        assert_eq!(fields.subtitle, "projects/");
        assert_eq!(fields.details.map(|d| d.body), Some("plan body".to_string()));
    }

    #[tokio::test]
    async fn body_is_truncated_to_limit() {
        let vault = tempfile::tempdir().expect("failed to create vault");
        write_note(vault.path(), "long.md", "0123456789");

        let source = NotesSource::new(vault.path()).with_max_body_bytes(4);
        let rows = FetchOperation::default()
            .run(&source, &request("long", 0))
            .await
            .expect("scan should succeed");

        assert_eq!(
            rows[0].fields().details.map(|d| d.body),
            Some("0123".to_string())
        );
    }

    #[tokio::test]
    async fn missing_vault_is_transient_error() {
        let vault = tempfile::tempdir().expect("failed to create vault");
        let source = NotesSource::new(vault.path().join("missing"));

        let result = FetchOperation::default().run(&source, &request("", 0)).await;
        assert_eq!(result.err().map(|err| err.code()), Some("VAULT_NOT_FOUND"));
    }

    #[tokio::test]
    async fn cancelled_scan_reports_cancellation() {
        let vault = tempfile::tempdir().expect("failed to create vault");
        write_note(vault.path(), "a.md", "a");
        let token = CancellationToken::new();
        token.cancel();

        let result = scan_vault(vault.path(), &QueryParams::new("", 0), &token, 64);
        assert_eq!(result.err(), Some(FetchError::Cancelled));
    }
}
