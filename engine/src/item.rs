//! Items as reported by the two remote lists.

use crate::RemoteId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two synchronized lists.
///
/// `A` is the voice-assistant shopping list (the origin in one-way mode),
/// `B` is the cloud to-do list (the destination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Side {
    A,
    B,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::A => f.write_str("A"),
            Side::B => f.write_str("B"),
        }
    }
}

/// One list entry as seen from a remote system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    /// Identifier assigned by the owning system, never reused after deletion
    pub remote_id: RemoteId,
    /// Display text
    pub text: String,
    /// False once the item is completed or checked off
    #[serde(default = "default_present")]
    pub present: bool,
}

fn default_present() -> bool {
    true
}

impl Item {
    /// Create an active item.
    pub fn new(remote_id: impl Into<RemoteId>, text: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            text: text.into(),
            present: true,
        }
    }

    /// Create a completed (absent) item.
    pub fn completed(remote_id: impl Into<RemoteId>, text: impl Into<String>) -> Self {
        Self {
            present: false,
            ..Self::new(remote_id, text)
        }
    }

    /// Key used to recognise the same entry added independently on both sides.
    pub fn match_key(&self) -> String {
        normalize_text(&self.text)
    }
}

/// Case-insensitive, whitespace-trimmed form of an item text.
pub fn normalize_text(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Whether two texts are the same entry for matching purposes.
pub fn same_text(a: &str, b: &str) -> bool {
    normalize_text(a) == normalize_text(b)
}

/// Upper-case the first character, leaving the rest untouched.
pub fn capitalize_first(text: &str) -> String {
    let trimmed = text.trim();
    let mut chars = trimmed.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn match_key_ignores_case_and_padding() {
        let a = Item::new("a-1", "  Milk ");
        let b = Item::new("t-1", "milk");
        assert_eq!(a.match_key(), b.match_key());
        assert!(same_text("Hafermilch", "HAFERMILCH "));
        assert!(!same_text("Milk", "Oat milk"));
    }

    #[test]
    fn capitalize() {
        assert_eq!(capitalize_first("bread"), "Bread");
        assert_eq!(capitalize_first(" äpfel"), "Äpfel");
        assert_eq!(capitalize_first("iPhone cable"), "IPhone cable");
        assert_eq!(capitalize_first(""), "");
    }

    #[test]
    fn present_defaults_to_true() {
        let item: Item = serde_json::from_str(r#"{"remoteId": "a-1", "text": "Eggs"}"#).unwrap();
        assert!(item.present);

        let done = Item::completed("a-2", "Flour");
        let json = serde_json::to_string(&done).unwrap();
        assert!(json.contains("\"present\":false"));
    }
}
