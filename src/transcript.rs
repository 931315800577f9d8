//! Transcript data model and the per-category transcript store.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::ChatError;

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

/// The three chat modes. Their numeric form (`0`, `1`, `2`) is the route
/// selector exposed on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Analysis,
    Simulation,
    Battle,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Analysis, Category::Simulation, Category::Battle];

    pub fn index(self) -> usize {
        match self {
            Category::Analysis => 0,
            Category::Simulation => 1,
            Category::Battle => 2,
        }
    }
}

impl TryFrom<u8> for Category {
    type Error = ChatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Category::Analysis),
            1 => Ok(Category::Simulation),
            2 => Ok(Category::Battle),
            other => Err(ChatError::ProtocolMismatch(format!("unknown category {other}"))),
        }
    }
}

impl FromStr for Category {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "0" | "analysis" => Ok(Category::Analysis),
            "1" | "simulation" => Ok(Category::Simulation),
            "2" | "battle" => Ok(Category::Battle),
            other => Err(ChatError::ProtocolMismatch(format!("unknown category '{other}'"))),
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Analysis => write!(f, "analysis"),
            Category::Simulation => write!(f, "simulation"),
            Category::Battle => write!(f, "battle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Entry
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SenderRole {
    User,
    Response,
    Poet1,
    Poet2,
    Judge,
}

impl std::fmt::Display for SenderRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SenderRole::User => write!(f, "user"),
            SenderRole::Response => write!(f, "response"),
            SenderRole::Poet1 => write!(f, "poet1"),
            SenderRole::Poet2 => write!(f, "poet2"),
            SenderRole::Judge => write!(f, "judge"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Success,
    Error,
}

/// The user request that produced a user/response pairing. Kept on the
/// entries so the pairing can be regenerated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendRequest {
    pub category: Category,
    /// Text shown in the user bubble and sent to the service.
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poet1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub poet2: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub topics: Vec<String>,
}

impl SendRequest {
    pub fn analysis(verse: impl Into<String>) -> Self {
        Self {
            category: Category::Analysis,
            text: verse.into(),
            poet1: None,
            poet2: None,
            topics: Vec::new(),
        }
    }

    /// Simulation of `poet` writing about `prompt`.
    pub fn simulation(prompt: &str, poet: &str) -> Self {
        let text = if prompt.trim().is_empty() || poet.trim().is_empty() {
            String::new()
        } else {
            format!("الموضوع:  {prompt}\nالشاعر:  {poet}")
        };
        Self {
            category: Category::Simulation,
            text,
            poet1: Some(poet.to_string()).filter(|p| !p.trim().is_empty()),
            poet2: None,
            topics: Vec::new(),
        }
    }

    pub fn battle(poet1: &str, poet2: &str, topics: Vec<String>) -> Self {
        let text = format!(
            "الشاعر الأول:  {poet1}\nالشاعر الثاني:  {poet2}\nالموضوع:  {}",
            topics.join(", ")
        );
        Self {
            category: Category::Battle,
            text,
            poet1: Some(poet1.to_string()).filter(|p| !p.trim().is_empty()),
            poet2: Some(poet2.to_string()).filter(|p| !p.trim().is_empty()),
            topics,
        }
    }

    /// Reject requests the input form would not let through.
    pub fn validate(&self) -> Result<(), ChatError> {
        let missing = |what: &str| {
            Err(ChatError::ProtocolMismatch(format!("{} request needs {what}", self.category)))
        };
        match self.category {
            Category::Analysis | Category::Simulation if self.text.trim().is_empty() => {
                missing("non-empty text")
            }
            Category::Simulation if self.poet1.is_none() => missing("a poet"),
            Category::Battle if self.poet1.is_none() || self.poet2.is_none() => missing("two poets"),
            Category::Battle if self.topics.iter().all(|t| t.trim().is_empty()) => {
                missing("at least one topic")
            }
            _ => Ok(()),
        }
    }
}

/// One transcript item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: String,
    pub sender: SenderRole,
    pub text: String,
    pub is_streaming: bool,
    pub round: u32,
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_input: Option<SendRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: u64,
}

impl Entry {
    /// The user's own message. Already final.
    pub fn user(id: String, request: SendRequest) -> Self {
        Self {
            id,
            sender: SenderRole::User,
            text: request.text.clone(),
            is_streaming: false,
            round: 1,
            status: EntryStatus::Success,
            original_input: Some(request),
            error: None,
            timestamp_ms: now_ms(),
        }
    }

    /// An empty entry waiting for streamed or fetched text.
    pub fn placeholder(id: String, sender: SenderRole, round: u32) -> Self {
        Self {
            id,
            sender,
            text: String::new(),
            is_streaming: true,
            round,
            status: EntryStatus::Pending,
            original_input: None,
            error: None,
            timestamp_ms: now_ms(),
        }
    }

    /// A complete, non-streaming entry.
    pub fn finalized(id: String, sender: SenderRole, round: u32, text: &str) -> Self {
        Self {
            text: text.to_string(),
            is_streaming: false,
            status: EntryStatus::Success,
            ..Self::placeholder(id, sender, round)
        }
    }

    pub fn with_input(mut self, request: &SendRequest) -> Self {
        self.original_input = Some(request.clone());
        self
    }

    /// Stop streaming and mark successful.
    pub fn finish(&mut self) {
        self.is_streaming = false;
        if self.status == EntryStatus::Pending {
            self.status = EntryStatus::Success;
        }
    }

    /// Stop streaming and record `message`, keeping any partial text.
    pub fn fail(&mut self, message: &str) {
        self.is_streaming = false;
        self.status = EntryStatus::Error;
        self.error = Some(message.to_string());
    }
}

// ---------------------------------------------------------------------------
// Ids
// ---------------------------------------------------------------------------

/// Current Unix epoch in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Creation stamp: epoch millis plus a short random base-36 suffix, so two
/// stamps minted in the same millisecond still differ.
pub fn new_stamp() -> String {
    use rand::Rng;
    const CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| CHARS[rng.gen_range(0..CHARS.len())] as char)
        .collect();
    format!("{}{}", now_ms(), suffix)
}

/// `{stamp}-{role}-{round}`.
pub fn entry_id(stamp: &str, role: SenderRole, round: u32) -> String {
    format!("{stamp}-{role}-{round}")
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Ordered entries for each category.
///
/// Every mutation takes `&mut self`, so a reader can never see a category
/// half-cleared.
#[derive(Debug, Clone, Default)]
pub struct TranscriptStore {
    categories: [Vec<Entry>; 3],
}

impl TranscriptStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, category: Category, entry: Entry) {
        self.categories[category.index()].push(entry);
    }

    /// Apply `mutator` to the entry with `id`. Returns false, doing nothing,
    /// when no such entry exists (e.g. it was cleared while a frame was in flight).
    pub fn update_entry<F>(&mut self, category: Category, id: &str, mutator: F) -> bool
    where
        F: FnOnce(&mut Entry),
    {
        match self.categories[category.index()].iter_mut().find(|e| e.id == id) {
            Some(entry) => {
                mutator(entry);
                true
            }
            None => false,
        }
    }

    pub fn clear(&mut self, category: Category) {
        self.categories[category.index()].clear();
    }

    pub fn snapshot(&self, category: Category) -> Vec<Entry> {
        self.categories[category.index()].clone()
    }

    pub fn entries(&self, category: Category) -> &[Entry] {
        &self.categories[category.index()]
    }

    pub fn get(&self, category: Category, id: &str) -> Option<&Entry> {
        self.categories[category.index()].iter().find(|e| e.id == id)
    }

    pub fn contains(&self, category: Category, id: &str) -> bool {
        self.get(category, id).is_some()
    }

    pub fn len(&self, category: Category) -> usize {
        self.categories[category.index()].len()
    }

    pub fn is_empty(&self, category: Category) -> bool {
        self.categories[category.index()].is_empty()
    }
}
