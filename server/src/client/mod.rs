//! The capability boundary to a remote list.
//!
//! The daemon only ever talks to a list through [`ListClient`]. Adapters
//! are constructed at startup and injected into the sync loop.

mod file;
#[cfg(test)]
pub mod memory;

pub use file::FileListClient;
#[cfg(test)]
pub use memory::MemoryListClient;

use async_trait::async_trait;
use listsync_engine::{Item, RemoteId};

use crate::error::ClientError;

/// Result type alias for list clients.
pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// One remote list.
#[async_trait]
pub trait ListClient: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// The full current contents. Never partial: on any error nothing is
    /// returned.
    async fn fetch(&self) -> ClientResult<Vec<Item>>;

    /// Add an item and return the id the list assigned to it.
    async fn create(&self, text: &str) -> ClientResult<RemoteId>;

    /// Remove an item. A list that no longer knows the id answers
    /// [`ClientError::NotFound`].
    async fn delete(&self, remote_id: &str) -> ClientResult<()>;

    /// Whether [`update`](ListClient::update) is available.
    fn supports_update(&self) -> bool {
        false
    }

    /// Replace the text of an existing item.
    async fn update(&self, _remote_id: &str, _text: &str) -> ClientResult<()> {
        Err(ClientError::Unsupported("update"))
    }
}
