//! In-memory list, used as the test double for both sides.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use listsync_engine::{Item, RemoteId};

use super::{ClientResult, ListClient};
use crate::error::ClientError;

/// Which call a scripted failure applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Fetch,
    Create,
    Delete,
    Update,
}

/// A list held in a [`DashMap`], with scriptable failures and latency.
#[derive(Debug)]
pub struct MemoryListClient {
    name: String,
    prefix: String,
    items: DashMap<RemoteId, Item>,
    next_id: AtomicU64,
    supports_update: bool,
    /// Errors to return from the next calls, per call kind
    failures: DashMap<Call, VecDeque<ClientError>>,
    latency: Mutex<Option<Duration>>,
    calls: AtomicU64,
}

impl MemoryListClient {
    /// Create an empty list whose ids start with `prefix`.
    pub fn new(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            prefix: prefix.into(),
            items: DashMap::new(),
            next_id: AtomicU64::new(0),
            supports_update: false,
            failures: DashMap::new(),
            latency: Mutex::new(None),
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_update_support(mut self) -> Self {
        self.supports_update = true;
        self
    }

    /// Add an item directly, as a user would. Returns its id.
    pub fn insert(&self, text: &str) -> RemoteId {
        let remote_id = self.mint_id();
        self.items
            .insert(remote_id.clone(), Item::new(remote_id.clone(), text));
        remote_id
    }

    /// Remove an item directly, as a user would.
    pub fn remove(&self, remote_id: &str) -> bool {
        self.items.remove(remote_id).is_some()
    }

    /// Change an item's text directly, as a user would.
    pub fn edit(&self, remote_id: &str, text: &str) -> bool {
        match self.items.get_mut(remote_id) {
            Some(mut item) => {
                item.text = text.to_string();
                true
            }
            None => false,
        }
    }

    /// Check an item off without removing it.
    pub fn complete(&self, remote_id: &str) -> bool {
        match self.items.get_mut(remote_id) {
            Some(mut item) => {
                item.present = false;
                true
            }
            None => false,
        }
    }

    /// Texts of the items still on the list, sorted.
    pub fn texts(&self) -> Vec<String> {
        let mut texts: Vec<_> = self
            .items
            .iter()
            .filter(|item| item.present)
            .map(|item| item.text.clone())
            .collect();
        texts.sort();
        texts
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queue an error for the next call of kind `call`.
    pub fn fail_next(&self, call: Call, error: ClientError) {
        self.failures.entry(call).or_default().push_back(error);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        if let Ok(mut slot) = self.latency.lock() {
            *slot = latency;
        }
    }

    /// Number of calls made so far, failed ones included.
    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn mint_id(&self) -> RemoteId {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        format!("{}-{}", self.prefix, n)
    }

    async fn enter(&self, call: Call) -> ClientResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency.lock().ok().and_then(|slot| *slot);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match self.failures.get_mut(&call).and_then(|mut queue| queue.pop_front()) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ListClient for MemoryListClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> ClientResult<Vec<Item>> {
        self.enter(Call::Fetch).await?;
        let mut items: Vec<_> = self.items.iter().map(|item| item.clone()).collect();
        items.sort_by(|a, b| a.remote_id.cmp(&b.remote_id));
        Ok(items)
    }

    async fn create(&self, text: &str) -> ClientResult<RemoteId> {
        self.enter(Call::Create).await?;
        Ok(self.insert(text))
    }

    async fn delete(&self, remote_id: &str) -> ClientResult<()> {
        self.enter(Call::Delete).await?;
        if self.remove(remote_id) {
            Ok(())
        } else {
            Err(ClientError::NotFound(remote_id.to_string()))
        }
    }

    fn supports_update(&self) -> bool {
        self.supports_update
    }

    async fn update(&self, remote_id: &str, text: &str) -> ClientResult<()> {
        if !self.supports_update {
            return Err(ClientError::Unsupported("update"));
        }
        self.enter(Call::Update).await?;
        if self.edit(remote_id, text) {
            Ok(())
        } else {
            Err(ClientError::NotFound(remote_id.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_fetch_delete() {
        let list = MemoryListClient::new("alexa", "a");
        let id = list.create("Milk").await.unwrap();
        assert_eq!(id, "a-1");

        let items = list.fetch().await.unwrap();
        assert_eq!(items, vec![Item::new("a-1", "Milk")]);

        list.delete(&id).await.unwrap();
        assert!(list.is_empty());
        assert_eq!(
            list.delete(&id).await,
            Err(ClientError::NotFound("a-1".into()))
        );
    }

    #[tokio::test]
    async fn scripted_failures_are_consumed_in_order() {
        let list = MemoryListClient::new("todo", "t");
        list.fail_next(Call::Create, ClientError::Transient("503".into()));

        assert!(list.create("Eggs").await.is_err());
        assert!(list.create("Eggs").await.is_ok());
        assert_eq!(list.call_count(), 2);
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn update_requires_capability() {
        let list = MemoryListClient::new("alexa", "a");
        let id = list.insert("Butter");
        assert_eq!(
            list.update(&id, "Butter (salted)").await,
            Err(ClientError::Unsupported("update"))
        );

        let list = MemoryListClient::new("alexa", "a").with_update_support();
        let id = list.insert("Butter");
        list.update(&id, "Butter (salted)").await.unwrap();
        assert_eq!(list.texts(), vec!["Butter (salted)".to_string()]);
    }

    #[tokio::test]
    async fn completed_items_are_reported_not_present() {
        let list = MemoryListClient::new("alexa", "a");
        let id = list.insert("Salt");
        list.complete(&id);

        let items = list.fetch().await.unwrap();
        assert!(!items[0].present);
        assert!(list.texts().is_empty());
    }
}
