//! Round reconciler: folds decoded frames into transcript entries.
//!
//! ## Battle rounds
//! A battle stream carries three logical senders on one channel. Each frame
//! may populate any of `poet1`, `poet2` and `Judge`. Frames are applied against
//! a [`RoundState`]:
//!
//! 1. If the previous frame closed a round (`AwaitingNextRound`), a new round
//!    opens with freshly minted ids.
//! 2. Poet text appends to that round's streaming entry for the role, or
//!    creates it.
//! 3. Judge text creates a final entry and closes the round. The closure only
//!    takes effect for the *next* frame, so poet text in the same frame as a
//!    verdict still lands in the round being closed.
//!
//! Rounds never time out. They close on a verdict and nothing else.

use tracing::{debug, warn};

use crate::frame::{Decoded, FrameFields};
use crate::transcript::{entry_id, Category, Entry, SenderRole, TranscriptStore};

/// Entry ids of one battle round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundIds {
    pub round: u32,
    pub poet1: String,
    pub poet2: String,
    pub judge: String,
}

impl RoundIds {
    pub fn new(round: u32, stamp: &str) -> Self {
        Self {
            round,
            poet1: entry_id(stamp, SenderRole::Poet1, round),
            poet2: entry_id(stamp, SenderRole::Poet2, round),
            judge: entry_id(stamp, SenderRole::Judge, round),
        }
    }

    pub fn for_role(&self, role: SenderRole) -> Option<&str> {
        match role {
            SenderRole::Poet1 => Some(&self.poet1),
            SenderRole::Poet2 => Some(&self.poet2),
            SenderRole::Judge => Some(&self.judge),
            SenderRole::User | SenderRole::Response => None,
        }
    }
}

/// Where a battle stream stands between frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundState {
    /// Frames land in this round.
    Open(RoundIds),
    /// A verdict closed round `closed`; the next frame opens `closed + 1`.
    AwaitingNextRound { closed: u32 },
}

impl RoundState {
    /// Round 1, open.
    pub fn first(stamp: &str) -> Self {
        RoundState::Open(RoundIds::new(1, stamp))
    }

    /// The round frames currently land in, or the one just closed.
    pub fn round(&self) -> u32 {
        match self {
            RoundState::Open(ids) => ids.round,
            RoundState::AwaitingNextRound { closed } => *closed,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, RoundState::Open(_))
    }

    pub fn ids(&self) -> Option<&RoundIds> {
        match self {
            RoundState::Open(ids) => Some(ids),
            RoundState::AwaitingNextRound { .. } => None,
        }
    }
}

/// What one frame did to the transcript.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Applied {
    /// Ids of entries the frame created.
    pub created: Vec<String>,
    /// Ids of entries the frame appended to.
    pub appended: Vec<String>,
    pub opened_round: Option<u32>,
    pub closed_round: Option<u32>,
}

impl Applied {
    pub fn is_noop(&self) -> bool {
        self.created.is_empty() && self.appended.is_empty()
    }
}

/// Apply one battle frame to `store` under `state`, returning the next state.
///
/// `stamp` is called only when a new round opens. Frames with no recognised
/// field leave both the store and the state untouched.
pub fn apply_battle_frame<S>(
    state: &RoundState,
    fields: &FrameFields,
    store: &mut TranscriptStore,
    category: Category,
    mut stamp: S,
) -> (RoundState, Applied)
where
    S: FnMut() -> String,
{
    let lines = fields.battle_lines();
    let mut applied = Applied::default();
    if lines.is_empty() {
        return (state.clone(), applied);
    }

    let ids = match state {
        RoundState::Open(ids) => ids.clone(),
        RoundState::AwaitingNextRound { closed } => {
            let next = RoundIds::new(closed + 1, &stamp());
            debug!(round = next.round, "battle round opened");
            applied.opened_round = Some(next.round);
            next
        }
    };

    let mut closes = false;
    for (role, text) in lines {
        match role {
            SenderRole::Poet1 | SenderRole::Poet2 => {
                let Some(id) = ids.for_role(role) else { continue };
                append_poet_text(store, category, id, role, ids.round, text, &mut applied);
            }
            SenderRole::Judge => {
                store.append(
                    category,
                    Entry::finalized(ids.judge.clone(), SenderRole::Judge, ids.round, text),
                );
                applied.created.push(ids.judge.clone());
                closes = true;
            }
            SenderRole::User | SenderRole::Response => {}
        }
    }

    if closes {
        for id in [&ids.poet1, &ids.poet2] {
            store.update_entry(category, id, |e| e.finish());
        }
        debug!(round = ids.round, "battle round closed by verdict");
        applied.closed_round = Some(ids.round);
        (RoundState::AwaitingNextRound { closed: ids.round }, applied)
    } else {
        (RoundState::Open(ids), applied)
    }
}

fn append_poet_text(
    store: &mut TranscriptStore,
    category: Category,
    id: &str,
    role: SenderRole,
    round: u32,
    text: &str,
    applied: &mut Applied,
) {
    match store.get(category, id).map(|e| e.is_streaming) {
        Some(true) => {
            store.update_entry(category, id, |e| e.text.push_str(text));
            applied.appended.push(id.to_string());
        }
        Some(false) => {
            // Only reachable if the entry was finalised behind the stream's back.
            warn!(entry = id, "dropping poet text for a finalised entry");
        }
        None => {
            let mut entry = Entry::placeholder(id.to_string(), role, round);
            entry.text.push_str(text);
            store.append(category, entry);
            applied.created.push(id.to_string());
        }
    }
}

/// Append a simulation frame's text to the streaming response `response_id`.
///
/// Returns false when the frame carries no text or the entry is gone or no
/// longer streaming.
pub fn apply_simulation_frame(
    frame: &Decoded,
    store: &mut TranscriptStore,
    category: Category,
    response_id: &str,
) -> bool {
    let Some(text) = frame.simulation_text() else {
        return false;
    };
    let streaming = store
        .get(category, response_id)
        .map(|e| e.is_streaming)
        .unwrap_or(false);
    if !streaming {
        return false;
    }
    store.update_entry(category, response_id, |e| e.text.push_str(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::parse;
    use crate::transcript::EntryStatus;

    fn stamper() -> impl FnMut() -> String {
        let mut n = 0;
        move || {
            n += 1;
            format!("s{n}")
        }
    }

    fn feed(frames: &[&str]) -> (TranscriptStore, RoundState) {
        let mut store = TranscriptStore::new();
        let mut state = RoundState::first("s0");
        let mut stamp = stamper();
        for raw in frames {
            if let Decoded::Structured(fields) = parse(raw) {
                state = apply_battle_frame(&state, &fields, &mut store, Category::Battle, &mut stamp).0;
            }
        }
        (store, state)
    }

    #[test]
    fn test_round_ids_share_stamp_and_round() {
        let ids = RoundIds::new(2, "abc");
        assert_eq!(ids.poet1, "abc-poet1-2");
        assert_eq!(ids.poet2, "abc-poet2-2");
        assert_eq!(ids.judge, "abc-judge-2");
        assert!(ids.for_role(SenderRole::User).is_none());
    }

    #[test]
    fn test_poet_text_accumulates_within_round() {
        let (store, state) = feed(&[r#"{"poet1":"أ"}"#, r#"{"poet1":"ن"}"#, r#"{"poet1":"ا"}"#]);
        let entries = store.entries(Category::Battle);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].text, "أنا");
        assert!(entries[0].is_streaming);
        assert_eq!(state.round(), 1);
        assert!(state.is_open());
    }

    #[test]
    fn test_judge_closes_round_and_next_poet_opens_new_one() {
        let (store, state) = feed(&[
            r#"{"poet1":"A"}"#,
            r#"{"poet2":"B"}"#,
            r#"{"Judge":"X"}"#,
            r#"{"poet1":"C"}"#,
        ]);
        let entries = store.entries(Category::Battle);
        assert_eq!(entries.len(), 4);
        let summary: Vec<(SenderRole, u32, &str)> =
            entries.iter().map(|e| (e.sender, e.round, e.text.as_str())).collect();
        assert_eq!(
            summary,
            vec![
                (SenderRole::Poet1, 1, "A"),
                (SenderRole::Poet2, 1, "B"),
                (SenderRole::Judge, 1, "X"),
                (SenderRole::Poet1, 2, "C"),
            ]
        );
        assert_eq!(state.round(), 2);
    }

    #[test]
    fn test_judge_is_never_streaming_and_finalises_poets() {
        let (store, state) = feed(&[r#"{"poet1":"A"}"#, r#"{"Judge":"X"}"#]);
        let entries = store.entries(Category::Battle);
        assert!(!entries[0].is_streaming);
        assert_eq!(entries[0].status, EntryStatus::Success);
        assert!(!entries[1].is_streaming);
        assert_eq!(entries[1].status, EntryStatus::Success);
        assert_eq!(state, RoundState::AwaitingNextRound { closed: 1 });
    }

    #[test]
    fn test_poet_text_in_verdict_frame_lands_in_closing_round() {
        let (store, state) = feed(&[r#"{"poet2":"B","Judge":"X"}"#, r#"{"poet2":"D"}"#]);
        let entries = store.entries(Category::Battle);
        assert_eq!(entries.len(), 3);
        assert_eq!((entries[0].round, entries[0].text.as_str()), (1, "B"));
        assert_eq!(entries[1].sender, SenderRole::Judge);
        assert_eq!((entries[2].round, entries[2].text.as_str()), (2, "D"));
        assert_eq!(state.round(), 2);
    }

    #[test]
    fn test_degenerate_judge_only_round() {
        let (store, _) = feed(&[r#"{"Judge":"opening remarks"}"#]);
        let entries = store.entries(Category::Battle);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sender, SenderRole::Judge);
        assert_eq!(entries[0].round, 1);
    }

    #[test]
    fn test_back_to_back_judges_open_consecutive_rounds() {
        let (store, state) = feed(&[r#"{"Judge":"X"}"#, r#"{"Judge":"Y"}"#]);
        let rounds: Vec<u32> = store.entries(Category::Battle).iter().map(|e| e.round).collect();
        assert_eq!(rounds, vec![1, 2]);
        assert_eq!(state, RoundState::AwaitingNextRound { closed: 2 });
    }

    #[test]
    fn test_unrecognised_frame_is_ignored() {
        let mut store = TranscriptStore::new();
        let state = RoundState::AwaitingNextRound { closed: 1 };
        let fields = FrameFields { bait: Some("stray".into()), ..FrameFields::default() };
        let (next, applied) =
            apply_battle_frame(&state, &fields, &mut store, Category::Battle, || unreachable!());
        assert!(applied.is_noop());
        assert_eq!(next, state);
        assert!(store.is_empty(Category::Battle));
    }

    #[test]
    fn test_applied_reports_round_transitions() {
        let mut store = TranscriptStore::new();
        let fields = FrameFields { judge: Some("X".into()), ..FrameFields::default() };
        let (state, applied) = apply_battle_frame(
            &RoundState::first("a"),
            &fields,
            &mut store,
            Category::Battle,
            || "b".to_string(),
        );
        assert_eq!(applied.closed_round, Some(1));
        assert_eq!(applied.opened_round, None);

        let fields = FrameFields { poet1: Some("C".into()), ..FrameFields::default() };
        let (_, applied) =
            apply_battle_frame(&state, &fields, &mut store, Category::Battle, || "b".to_string());
        assert_eq!(applied.opened_round, Some(2));
        assert_eq!(applied.created, vec!["b-poet1-2".to_string()]);
    }

    #[test]
    fn test_simulation_appends_without_separator() {
        let mut store = TranscriptStore::new();
        store.append(Category::Simulation, Entry::placeholder("r".into(), SenderRole::Response, 1));
        assert!(apply_simulation_frame(&parse(r#"{"bait":"سطر1"}"#), &mut store, Category::Simulation, "r"));
        assert!(apply_simulation_frame(&parse(r#"{"bait":"سطر2"}"#), &mut store, Category::Simulation, "r"));
        assert_eq!(store.entries(Category::Simulation)[0].text, "سطر1سطر2");
    }

    #[test]
    fn test_simulation_raw_passthrough_is_verbatim() {
        let mut store = TranscriptStore::new();
        store.append(Category::Simulation, Entry::placeholder("r".into(), SenderRole::Response, 1));
        apply_simulation_frame(&parse("not json"), &mut store, Category::Simulation, "r");
        assert_eq!(store.entries(Category::Simulation)[0].text, "not json");
    }

    #[test]
    fn test_simulation_ignores_finished_or_missing_entry() {
        let mut store = TranscriptStore::new();
        let mut done = Entry::placeholder("r".into(), SenderRole::Response, 1);
        done.finish();
        store.append(Category::Simulation, done);
        assert!(!apply_simulation_frame(&parse("late"), &mut store, Category::Simulation, "r"));
        assert!(!apply_simulation_frame(&parse("late"), &mut store, Category::Simulation, "gone"));
        assert_eq!(store.entries(Category::Simulation)[0].text, "");
    }
}
