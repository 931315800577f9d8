//! Frame parser: turns one inbound channel payload into a [`Decoded`] frame.
//!
//! Parsing never fails. Anything that is not a JSON object of string fields
//! comes back as [`Decoded::Raw`] carrying the payload verbatim.

use serde::Deserialize;

use crate::transcript::SenderRole;

/// Recognised fields of a structured frame.
///
/// Empty strings are kept as received; the accessors treat them as absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FrameFields {
    #[serde(default)]
    pub poet1: Option<String>,
    #[serde(default)]
    pub poet2: Option<String>,
    /// Judge verdict as the battle service sends it.
    #[serde(default, rename = "Judge")]
    pub judge: Option<String>,
    /// Judge verdict as the mock server sends it. A frame may carry both.
    #[serde(default, rename = "judge")]
    pub judge_lower: Option<String>,
    /// Simulation text.
    #[serde(default)]
    pub bait: Option<String>,
}

fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().filter(|s| !s.is_empty())
}

impl FrameFields {
    pub fn poet1(&self) -> Option<&str> {
        non_empty(&self.poet1)
    }

    pub fn poet2(&self) -> Option<&str> {
        non_empty(&self.poet2)
    }

    /// `Judge`, falling back to `judge`.
    pub fn judge(&self) -> Option<&str> {
        non_empty(&self.judge).or_else(|| non_empty(&self.judge_lower))
    }

    pub fn bait(&self) -> Option<&str> {
        non_empty(&self.bait)
    }

    /// Populated battle fields in application order: poet1, poet2, judge.
    pub fn battle_lines(&self) -> Vec<(SenderRole, &str)> {
        let mut lines = Vec::with_capacity(3);
        if let Some(t) = self.poet1() {
            lines.push((SenderRole::Poet1, t));
        }
        if let Some(t) = self.poet2() {
            lines.push((SenderRole::Poet2, t));
        }
        if let Some(t) = self.judge() {
            lines.push((SenderRole::Judge, t));
        }
        lines
    }
}

/// One decoded channel payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    Structured(FrameFields),
    /// Payload that was not a structured frame, kept verbatim.
    Raw(String),
}

/// Decode `raw`. Never fails and never drops data.
pub fn parse(raw: &str) -> Decoded {
    match serde_json::from_str::<FrameFields>(raw) {
        Ok(fields) => Decoded::Structured(fields),
        Err(_) => Decoded::Raw(raw.to_string()),
    }
}

impl Decoded {
    /// Text a simulation stream appends: `bait`, or the raw payload.
    pub fn simulation_text(&self) -> Option<&str> {
        match self {
            Decoded::Structured(fields) => fields.bait(),
            Decoded::Raw(text) if !text.is_empty() => Some(text),
            Decoded::Raw(_) => None,
        }
    }

    /// Battle fields, if the frame was structured.
    pub fn battle_fields(&self) -> Option<&FrameFields> {
        match self {
            Decoded::Structured(fields) => Some(fields),
            Decoded::Raw(_) => None,
        }
    }
}
