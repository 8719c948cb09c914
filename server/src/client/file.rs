//! A list kept in a local JSON file.
//!
//! Lets the daemon run end to end against files that other tools (or a
//! human with an editor) maintain. The file holds the items and the last
//! id handed out:
//!
//! ```json
//! {"nextId": 3, "items": [{"remoteId": "a-1", "text": "Milk", "present": true}]}
//! ```
//!
//! A bare array of items is accepted too; the counter then starts past the
//! highest id in the file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use listsync_engine::{Item, RemoteId};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::{ClientResult, ListClient};
use crate::error::ClientError;
use crate::store::write_atomic;

/// On-disk contents of a list file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListFile {
    /// Suffix of the last minted id; never decreases
    #[serde(default)]
    next_id: u64,
    #[serde(default)]
    items: Vec<Item>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum Stored {
    File(ListFile),
    Items(Vec<Item>),
}

/// A [`ListClient`] over a JSON file.
#[derive(Debug)]
pub struct FileListClient {
    name: String,
    prefix: String,
    path: PathBuf,
    /// Serializes read-modify-write cycles on the file
    lock: Mutex<()>,
}

impl FileListClient {
    pub fn new(name: impl Into<String>, prefix: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read(&self) -> ClientResult<ListFile> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(ListFile::default()),
            Err(e) => {
                return Err(ClientError::Transient(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };
        if contents.trim().is_empty() {
            return Ok(ListFile::default());
        }

        let stored: Stored = serde_json::from_str(&contents).map_err(|e| {
            ClientError::Transient(format!("{} is not a valid list: {e}", self.path.display()))
        })?;
        let mut file = match stored {
            Stored::File(file) => file,
            Stored::Items(items) => ListFile { next_id: 0, items },
        };
        // Hand edits may add ids past the counter.
        file.next_id = file.next_id.max(self.highest_suffix(&file.items));
        Ok(file)
    }

    async fn write(&self, file: &ListFile) -> ClientResult<()> {
        let json =
            serde_json::to_string_pretty(file).map_err(|e| ClientError::Transient(e.to_string()))?;
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&path, json.as_bytes()))
            .await
            .map_err(|e| ClientError::Transient(e.to_string()))?
            .map_err(|e| {
                ClientError::Transient(format!("cannot write {}: {e}", self.path.display()))
            })
    }

    fn highest_suffix(&self, items: &[Item]) -> u64 {
        items
            .iter()
            .filter_map(|item| {
                item.remote_id
                    .strip_prefix(&self.prefix)?
                    .strip_prefix('-')?
                    .parse::<u64>()
                    .ok()
            })
            .max()
            .unwrap_or(0)
    }

    /// Next id from the file's counter. Ids of deleted items are never reissued.
    fn mint_id(&self, file: &mut ListFile) -> RemoteId {
        file.next_id += 1;
        format!("{}-{}", self.prefix, file.next_id)
    }
}

#[async_trait]
impl ListClient for FileListClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ClientResult<Vec<Item>> {
        let _guard = self.lock.lock().await;
        Ok(self.read().await?.items)
    }

    async fn create(&self, text: &str) -> ClientResult<RemoteId> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let remote_id = self.mint_id(&mut file);
        file.items.push(Item::new(remote_id.clone(), text));
        self.write(&file).await?;
        Ok(remote_id)
    }

    async fn delete(&self, remote_id: &str) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let before = file.items.len();
        file.items.retain(|item| item.remote_id != remote_id);
        if file.items.len() == before {
            return Err(ClientError::NotFound(remote_id.to_string()));
        }
        self.write(&file).await
    }

    fn supports_update(&self) -> bool {
        true
    }

    async fn update(&self, remote_id: &str, text: &str) -> ClientResult<()> {
        let _guard = self.lock.lock().await;
        let mut file = self.read().await?;
        let item = file
            .items
            .iter_mut()
            .find(|item| item.remote_id == remote_id)
            .ok_or_else(|| ClientError::NotFound(remote_id.to_string()))?;
        item.text = text.to_string();
        self.write(&file).await
    }
}
