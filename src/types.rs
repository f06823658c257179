use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Stable identity of a list row (package id, movie id, note path, ...).
#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ItemKey(String);

impl ItemKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ItemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ItemKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct Tag {
    pub text: String,
    pub icon: Option<String>,
}

impl Tag {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            icon: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct Details {
    pub title: Option<String>,
    pub body: String,
}

/// Mutable presentation fields of a row.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct ItemFields {
    pub title: String,
    pub subtitle: String,
    pub tags: Vec<Tag>,
    pub details: Option<Details>,
}

impl ItemFields {
    pub fn titled(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// One row of a live list.
///
/// Rows are shared as `Arc<ListItem>`; the reconciler keeps the same
/// allocation alive across refreshes and overwrites the fields in place, so
/// `Arc::ptr_eq` is the identity consumers can anchor to.
#[derive(Debug)]
pub struct ListItem {
    key: ItemKey,
    fields: Mutex<ItemFields>,
    revision: AtomicU64,
}

impl ListItem {
    pub fn new(key: impl Into<ItemKey>, fields: ItemFields) -> Self {
        Self {
            key: key.into(),
            fields: Mutex::new(fields),
            revision: AtomicU64::new(0),
        }
    }

    pub fn key(&self) -> &ItemKey {
        &self.key
    }

    /// Snapshot of the current fields.
    pub fn fields(&self) -> ItemFields {
        match self.fields.lock() {
            Ok(fields) => fields.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn title(&self) -> String {
        match self.fields.lock() {
            Ok(fields) => fields.title.clone(),
            Err(poisoned) => poisoned.into_inner().title.clone(),
        }
    }

    /// Number of in-place updates applied since construction.
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Overwrites the fields of this instance with `fields`.
    pub fn replace_fields(&self, fields: ItemFields) {
        match self.fields.lock() {
            Ok(mut current) => *current = fields,
            Err(poisoned) => *poisoned.into_inner() = fields,
        }
        self.revision.fetch_add(1, Ordering::AcqRel);
    }
}

/// Input of one query attempt.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq, Default)]
pub struct QueryParams {
    pub text: String,
    /// Restricts the search to a tag or category when set.
    pub scope: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

impl QueryParams {
    pub fn new(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            scope: None,
            limit,
            offset: 0,
        }
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        self.scope = (!scope.trim().is_empty()).then_some(scope);
        self
    }

    pub fn has_scope(&self) -> bool {
        self.scope.is_some()
    }

    /// Blank text with no scope means there is nothing to search for.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty() && !self.has_scope()
    }

    pub(crate) fn with_text(&self, text: &str) -> Self {
        Self {
            text: text.to_string(),
            offset: 0,
            ..self.clone()
        }
    }

    pub(crate) fn page_at(&self, offset: usize) -> Self {
        Self {
            offset,
            ..self.clone()
        }
    }

    /// Label used in log lines, `text+scope` when a scope is set.
    pub fn describe(&self) -> String {
        match self.scope.as_deref() {
            Some(scope) => format!("{}+{}", self.text, scope),
            None => self.text.clone(),
        }
    }
}

/// Hint for what a host should render when the list is empty.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum EmptyState {
    /// Nothing has been searched yet or the input was cleared.
    AwaitingInput,
    /// A query completed and matched nothing.
    NoResults,
}

impl EmptyState {
    pub fn message(self) -> &'static str {
        match self {
            EmptyState::AwaitingInput => "Start typing to search",
            EmptyState::NoResults => "No results found",
        }
    }
}
