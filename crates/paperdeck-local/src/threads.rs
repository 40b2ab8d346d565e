//! Chat-thread persistence.
//!
//! Layout under the store root, one directory per paper:
//!
//! ```text
//! <root>/<paper_id>/threads.json        index, newest-updated first
//! <root>/<paper_id>/<thread_id>.json    { "thread": ..., "messages": [...] }
//! ```
//!
//! Thread ids are `thread_<paper_id>_<millis>`; the paper id round-trips
//! through ids even when it contains underscores (old-style arXiv ids).

use crate::chat::ChatMessage;
use chrono::{DateTime, Utc};
use paperdeck_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatThread {
    pub id: String,
    pub paper_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Serialize, Deserialize)]
struct ThreadDocument {
    thread: ChatThread,
    messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize, Deserialize, Default)]
struct ThreadIndex {
    threads: Vec<ChatThread>,
}

fn paper_id_from_thread_id(thread_id: &str) -> Result<String> {
    let parts: Vec<&str> = thread_id.split('_').collect();
    if parts.len() < 3 || parts[0] != "thread" {
        return Err(Error::Storage(format!(
            "invalid thread id format: {thread_id}"
        )));
    }
    Ok(parts[1..parts.len() - 1].join("_"))
}

/// Filesystem-backed store for chat threads and their messages.
#[derive(Debug, Clone)]
pub struct ThreadStore {
    root: PathBuf,
}

impl ThreadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn paper_dir(&self, paper_id: &str) -> PathBuf {
        self.root.join(paper_id)
    }

    fn thread_file(&self, paper_id: &str, thread_id: &str) -> PathBuf {
        self.paper_dir(paper_id).join(format!("{thread_id}.json"))
    }

    fn index_file(&self, paper_id: &str) -> PathBuf {
        self.paper_dir(paper_id).join("threads.json")
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::Storage(e.to_string()))?;
        fs::write(path, bytes).map_err(|e| Error::Storage(e.to_string()))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(path).map_err(|e| Error::Storage(e.to_string()))?;
        let value = serde_json::from_slice(&bytes).map_err(|e| Error::Storage(e.to_string()))?;
        Ok(Some(value))
    }

    /// Create a new conversation thread for a paper.
    pub fn create_thread(&self, paper_id: &str, title: &str) -> Result<ChatThread> {
        let now = Utc::now();
        let thread = ChatThread {
            id: format!("thread_{}_{}", paper_id, now.timestamp_millis()),
            paper_id: paper_id.to_string(),
            title: title.to_string(),
            created_at: now,
            updated_at: now,
            message_count: 0,
            is_active: true,
        };
        Self::write_json(
            &self.thread_file(paper_id, &thread.id),
            &ThreadDocument {
                thread: thread.clone(),
                messages: Vec::new(),
            },
        )?;
        self.update_index(paper_id, &thread)?;
        Ok(thread)
    }

    /// Append a message to its thread (derived from `message.thread_id`).
    ///
    /// A missing thread file is recreated rather than rejected, so history
    /// written by older runs keeps working.
    pub fn save_message(&self, message: &ChatMessage) -> Result<()> {
        let paper_id = paper_id_from_thread_id(&message.thread_id)?;
        let path = self.thread_file(&paper_id, &message.thread_id);

        let now = Utc::now();
        let mut doc: ThreadDocument =
            Self::read_json(&path)?.unwrap_or_else(|| ThreadDocument {
                thread: ChatThread {
                    id: message.thread_id.clone(),
                    paper_id: paper_id.clone(),
                    title: "New Conversation".to_string(),
                    created_at: now,
                    updated_at: now,
                    message_count: 0,
                    is_active: true,
                },
                messages: Vec::new(),
            });

        doc.messages.push(message.clone());
        doc.thread.updated_at = now;
        doc.thread.message_count = doc.messages.len();

        Self::write_json(&path, &doc)?;
        self.update_index(&paper_id, &doc.thread)
    }

    /// All messages of one thread, oldest first.
    pub fn thread_history(&self, thread_id: &str) -> Result<Vec<ChatMessage>> {
        let paper_id = paper_id_from_thread_id(thread_id)?;
        let doc: Option<ThreadDocument> =
            Self::read_json(&self.thread_file(&paper_id, thread_id))?;
        Ok(doc.map(|d| d.messages).unwrap_or_default())
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<ChatThread>> {
        let paper_id = paper_id_from_thread_id(thread_id)?;
        let doc: Option<ThreadDocument> =
            Self::read_json(&self.thread_file(&paper_id, thread_id))?;
        Ok(doc.map(|d| d.thread))
    }

    /// Threads of one paper, most recently updated first.
    pub fn paper_threads(&self, paper_id: &str) -> Result<Vec<ChatThread>> {
        let index: Option<ThreadIndex> = Self::read_json(&self.index_file(paper_id))?;
        Ok(index.map(|i| i.threads).unwrap_or_default())
    }

    pub fn delete_thread(&self, thread_id: &str) -> Result<()> {
        let paper_id = paper_id_from_thread_id(thread_id)?;
        let path = self.thread_file(&paper_id, thread_id);
        if path.exists() {
            fs::remove_file(&path).map_err(|e| Error::Storage(e.to_string()))?;
        }
        let mut index: ThreadIndex =
            Self::read_json(&self.index_file(&paper_id))?.unwrap_or_default();
        index.threads.retain(|t| t.id != thread_id);
        Self::write_json(&self.index_file(&paper_id), &index)
    }

    pub fn rename_thread(&self, thread_id: &str, title: &str) -> Result<()> {
        let paper_id = paper_id_from_thread_id(thread_id)?;
        let path = self.thread_file(&paper_id, thread_id);
        let Some(mut doc) = Self::read_json::<ThreadDocument>(&path)? else {
            return Err(Error::NotFound(format!("thread {thread_id}")));
        };
        doc.thread.title = title.to_string();
        doc.thread.updated_at = Utc::now();
        Self::write_json(&path, &doc)?;
        self.update_index(&paper_id, &doc.thread)
    }

    fn update_index(&self, paper_id: &str, thread: &ChatThread) -> Result<()> {
        let mut index: ThreadIndex =
            Self::read_json(&self.index_file(paper_id))?.unwrap_or_default();
        match index.threads.iter_mut().find(|t| t.id == thread.id) {
            Some(existing) => *existing = thread.clone(),
            None => index.threads.push(thread.clone()),
        }
        index
            .threads
            .sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Self::write_json(&self.index_file(paper_id), &index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn store() -> (tempfile::TempDir, ThreadStore) {
        let tmp = tempfile::tempdir().unwrap();
        let store = ThreadStore::new(tmp.path());
        (tmp, store)
    }

    fn message(thread_id: &str, role: &str, content: &str) -> ChatMessage {
        ChatMessage {
            id: format!("msg_{}", content.len()),
            thread_id: thread_id.to_string(),
            role: role.to_string(),
            content: content.to_string(),
            timestamp: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn create_save_and_read_back_history() {
        let (_tmp, store) = store();
        let thread = store.create_thread("2401.00001", "First questions").unwrap();
        assert!(thread.id.starts_with("thread_2401.00001_"));

        store
            .save_message(&message(&thread.id, "user", "What is the main result?"))
            .unwrap();
        store
            .save_message(&message(&thread.id, "assistant", "A regret bound."))
            .unwrap();

        let history = store.thread_history(&thread.id).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].content, "A regret bound.");

        let reloaded = store.get_thread(&thread.id).unwrap().unwrap();
        assert_eq!(reloaded.message_count, 2);
        assert_eq!(reloaded.title, "First questions");
    }

    #[test]
    fn paper_id_round_trips_through_underscored_ids() {
        assert_eq!(
            paper_id_from_thread_id("thread_cond_mat_0001_1700000000000").unwrap(),
            "cond_mat_0001"
        );
        assert!(paper_id_from_thread_id("not-a-thread-id").is_err());
    }

    #[test]
    fn index_is_sorted_by_most_recent_update() {
        let (_tmp, store) = store();
        let a = store.create_thread("2401.00001", "a").unwrap();
        // Thread ids are millisecond-stamped; keep the two ids distinct.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_thread("2401.00001", "b").unwrap();
        // Touch the older thread so it moves to the front.
        store
            .save_message(&message(&a.id, "user", "bump this thread"))
            .unwrap();

        let threads = store.paper_threads("2401.00001").unwrap();
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].id, a.id);
        assert_eq!(threads[1].id, b.id);
    }

    #[test]
    fn delete_removes_file_and_index_entry() {
        let (_tmp, store) = store();
        let thread = store.create_thread("2401.00001", "gone soon").unwrap();
        store.delete_thread(&thread.id).unwrap();
        assert!(store.get_thread(&thread.id).unwrap().is_none());
        assert!(store.paper_threads("2401.00001").unwrap().is_empty());
    }

    #[test]
    fn rename_updates_document_and_index() {
        let (_tmp, store) = store();
        let thread = store.create_thread("2401.00001", "old name").unwrap();
        store.rename_thread(&thread.id, "new name").unwrap();
        assert_eq!(
            store.get_thread(&thread.id).unwrap().unwrap().title,
            "new name"
        );
        assert_eq!(store.paper_threads("2401.00001").unwrap()[0].title, "new name");
    }

    #[test]
    fn save_message_recreates_a_missing_thread() {
        let (_tmp, store) = store();
        store
            .save_message(&message("thread_2401.00002_123", "user", "hello?"))
            .unwrap();
        let thread = store.get_thread("thread_2401.00002_123").unwrap().unwrap();
        assert_eq!(thread.title, "New Conversation");
        assert_eq!(thread.message_count, 1);
    }
}
