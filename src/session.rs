//! Session controller: per-category request lifecycle over one shared channel.
//!
//! ## State machine (per category)
//! `Idle -> Sending -> Streaming -> Finalized`, with `Error` reachable from
//! `Sending` and `Streaming`. Analysis skips `Streaming`: its REST reply moves
//! it straight from `Sending` to `Finalized`.
//!
//! ## Ownership
//! At most one channel is open across the whole session. Opening a channel,
//! regenerating, clearing and [`SessionController::cleanup`] all close the
//! active one first, synchronously. Events from any channel other than the
//! active one are dropped on arrival.

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::analysis::AnalysisClient;
use crate::channel::{with_query, Channel, ChannelEvent, ChannelId, Connector, SessionEvent};
use crate::config::Endpoints;
use crate::error::ChatError;
use crate::frame::{self, Decoded};
use crate::protocol::{AnalysisResponse, BattleHandshake, SimulationHandshake};
use crate::reconciler::{apply_battle_frame, apply_simulation_frame, RoundState};
use crate::transcript::{
    entry_id, new_stamp, Category, Entry, EntryStatus, SendRequest, SenderRole, TranscriptStore,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatPhase {
    #[default]
    Idle,
    Sending,
    Streaming,
    Finalized,
    Error,
}

impl ChatPhase {
    /// True while a request is still expected to change the transcript.
    pub fn is_busy(self) -> bool {
        matches!(self, ChatPhase::Sending | ChatPhase::Streaming)
    }
}

#[derive(Debug, Clone, Default)]
struct CategoryState {
    phase: ChatPhase,
    error: Option<String>,
}

/// Entries a send or regenerate created, and the channel it opened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub category: Category,
    /// The user entry; `None` for a regenerate.
    pub user_id: Option<String>,
    /// Placeholder entries awaiting the reply.
    pub response_ids: Vec<String>,
    pub channel: Option<ChannelId>,
}

#[derive(Debug)]
enum StreamTarget {
    Simulation { response_id: String },
    Battle { rounds: RoundState },
}

/// The one open channel and the entries it may write to.
struct StreamSession {
    channel: Box<dyn Channel>,
    category: Category,
    target: StreamTarget,
    entries: Vec<String>,
    frames: usize,
}

pub struct SessionController<C: Connector, A: AnalysisClient> {
    endpoints: Endpoints,
    connector: C,
    analysis: A,
    store: TranscriptStore,
    states: [CategoryState; 3],
    active: Option<StreamSession>,
    pending_analysis: Vec<String>,
    /// Response entry of the most recent analysis dispatch. Only its result
    /// moves the analysis phase.
    latest_analysis: Option<String>,
    next_channel: u64,
}

impl<C: Connector, A: AnalysisClient> SessionController<C, A> {
    pub fn new(endpoints: Endpoints, connector: C, analysis: A) -> Self {
        Self {
            endpoints,
            connector,
            analysis,
            store: TranscriptStore::new(),
            states: Default::default(),
            active: None,
            pending_analysis: Vec::new(),
            latest_analysis: None,
            next_channel: 1,
        }
    }

    // -----------------------------------------------------------------------
    // Commands
    // -----------------------------------------------------------------------

    /// Append the user entry and its reply placeholder(s), then start the
    /// request: a REST call for analysis, a channel for simulation and battle.
    ///
    /// Incomplete requests are rejected before anything is appended. A
    /// transport failure after that leaves the entries in place, marks the
    /// category as errored and is also returned.
    pub fn send_message(&mut self, request: SendRequest) -> Result<Dispatched, ChatError> {
        request.validate()?;
        let category = request.category;
        let stamp = new_stamp();
        let user_id = entry_id(&stamp, SenderRole::User, 1);
        self.store.append(category, Entry::user(user_id.clone(), request.clone()));
        info!(%category, "message sent");

        let mut dispatched = self.dispatch(&request, &stamp)?;
        dispatched.user_id = Some(user_id);
        Ok(dispatched)
    }

    /// Re-issue the request stored on entry `message_id`.
    ///
    /// The active channel is closed first, whatever its category. Earlier
    /// entries stay; fresh placeholders are appended. Returns `Ok(None)` if
    /// the entry does not exist or carries no request.
    pub fn regenerate(
        &mut self,
        category: Category,
        message_id: &str,
    ) -> Result<Option<Dispatched>, ChatError> {
        let Some(request) = self
            .store
            .get(category, message_id)
            .and_then(|e| e.original_input.clone())
        else {
            debug!(%category, entry = message_id, "nothing to regenerate");
            return Ok(None);
        };
        if request.category != category {
            return Err(ChatError::ProtocolMismatch(format!(
                "entry {message_id} holds a {} request, not {category}",
                request.category
            )));
        }

        self.teardown_active();
        info!(%category, entry = message_id, "regenerating");
        let stamp = new_stamp();
        self.dispatch(&request, &stamp).map(Some)
    }

    /// Close the active channel and empty `category`. Other categories keep
    /// their entries. Safe with no channel open.
    pub fn clear_messages(&mut self, category: Category) {
        self.teardown_active();
        self.store.clear(category);
        if category == Category::Analysis {
            self.pending_analysis.clear();
            self.latest_analysis = None;
        }
        self.states[category.index()] = CategoryState::default();
        debug!(%category, "transcript cleared");
    }

    /// Close the active channel, leaving every transcript as it is.
    pub fn cleanup(&mut self) {
        self.teardown_active();
    }

    /// Dismiss the error banner of `category`.
    pub fn clear_error(&mut self, category: Category) {
        self.states[category.index()].error = None;
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    /// Apply one queued event. Returns true if the transcript or a phase
    /// changed.
    pub fn handle_event(&mut self, event: SessionEvent) -> bool {
        match event {
            SessionEvent::Channel { channel, event } => self.on_channel_event(channel, event),
            SessionEvent::Analysis { response_id, result } => {
                self.on_analysis_result(&response_id, result)
            }
        }
    }

    fn on_channel_event(&mut self, channel: ChannelId, event: ChannelEvent) -> bool {
        let Some(session) = self.active.as_mut() else {
            debug!(%channel, "event with no active channel dropped");
            return false;
        };
        if session.channel.id() != channel {
            debug!(%channel, active = %session.channel.id(), "event from stale channel dropped");
            return false;
        }
        let category = session.category;

        match event {
            ChannelEvent::Opened => {
                debug!(%channel, "channel open");
                false
            }
            ChannelEvent::Message(raw) => {
                let decoded = frame::parse(&raw);
                if let Decoded::Raw(_) = decoded {
                    debug!(%channel, "frame is not structured; passing through as text");
                }
                session.frames += 1;
                let changed = match &mut session.target {
                    StreamTarget::Simulation { response_id } => {
                        apply_simulation_frame(&decoded, &mut self.store, category, response_id)
                    }
                    StreamTarget::Battle { rounds } => match decoded.battle_fields() {
                        Some(fields) => {
                            let (next, applied) =
                                apply_battle_frame(rounds, fields, &mut self.store, category, new_stamp);
                            *rounds = next;
                            session.entries.extend(applied.created.iter().cloned());
                            !applied.is_noop()
                        }
                        None => false,
                    },
                };
                let state = &mut self.states[category.index()];
                if state.phase == ChatPhase::Sending {
                    state.phase = ChatPhase::Streaming;
                    return true;
                }
                changed
            }
            ChannelEvent::Closed => {
                if let Some(session) = self.active.take() {
                    info!(%channel, frames = session.frames, "stream finished");
                    self.finish_entries(&session);
                    self.states[category.index()].phase = ChatPhase::Finalized;
                }
                true
            }
            ChannelEvent::Error(message) => {
                if let Some(mut session) = self.active.take() {
                    warn!(%channel, error = %message, "channel error");
                    session.channel.close();
                    for id in &session.entries {
                        self.store.update_entry(category, id, |e| {
                            if e.is_streaming {
                                e.fail(&message);
                            }
                        });
                    }
                    let state = &mut self.states[category.index()];
                    state.phase = ChatPhase::Error;
                    state.error = Some(message);
                }
                true
            }
        }
    }

    fn on_analysis_result(
        &mut self,
        response_id: &str,
        result: Result<AnalysisResponse, ChatError>,
    ) -> bool {
        self.pending_analysis.retain(|id| id != response_id);
        let category = Category::Analysis;
        let current = self.latest_analysis.as_deref() == Some(response_id);
        match result {
            Ok(response) => {
                let text = response.to_display_text();
                let hit = self.store.update_entry(category, response_id, |e| {
                    e.text = text;
                    e.is_streaming = false;
                    e.status = EntryStatus::Success;
                });
                if !hit {
                    debug!(entry = response_id, "analysis result for a cleared entry dropped");
                } else if current {
                    self.states[category.index()].phase = ChatPhase::Finalized;
                } else {
                    debug!(entry = response_id, "superseded analysis result kept on its entry only");
                }
                hit
            }
            Err(err) => {
                let message = err.to_string();
                let hit = self.store.update_entry(category, response_id, |e| e.fail(&message));
                if hit && current {
                    let state = &mut self.states[category.index()];
                    state.phase = ChatPhase::Error;
                    state.error = Some(message);
                }
                hit
            }
        }
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    fn dispatch(&mut self, request: &SendRequest, stamp: &str) -> Result<Dispatched, ChatError> {
        let category = request.category;
        self.states[category.index()] = CategoryState {
            phase: ChatPhase::Sending,
            error: None,
        };

        match category {
            Category::Analysis => {
                let response_id = entry_id(stamp, SenderRole::Response, 1);
                self.store.append(
                    category,
                    Entry::placeholder(response_id.clone(), SenderRole::Response, 1).with_input(request),
                );
                self.pending_analysis.push(response_id.clone());
                self.latest_analysis = Some(response_id.clone());
                if let Err(err) = self.analysis.request(&response_id, &request.text) {
                    self.pending_analysis.retain(|id| id != &response_id);
                    self.fail_dispatch(category, &[response_id], &err);
                    return Err(err);
                }
                Ok(Dispatched {
                    category,
                    user_id: None,
                    response_ids: vec![response_id],
                    channel: None,
                })
            }
            Category::Simulation => {
                let response_id = entry_id(stamp, SenderRole::Response, 1);
                self.store.append(
                    category,
                    Entry::placeholder(response_id.clone(), SenderRole::Response, 1).with_input(request),
                );
                let ids = vec![response_id.clone()];
                let url = with_query(&self.endpoints.simulation_url, &[("prompt", request.text.as_str())]);
                let handshake = encode_handshake(&SimulationHandshake {
                    verse: request.text.clone(),
                });
                let channel = self.open_stream(
                    category,
                    url,
                    handshake,
                    StreamTarget::Simulation { response_id },
                    ids.clone(),
                )?;
                Ok(Dispatched {
                    category,
                    user_id: None,
                    response_ids: ids,
                    channel: Some(channel),
                })
            }
            Category::Battle => {
                let rounds = RoundState::first(stamp);
                let mut ids = Vec::with_capacity(2);
                if let Some(round) = rounds.ids() {
                    for (role, id) in [(SenderRole::Poet1, &round.poet1), (SenderRole::Poet2, &round.poet2)] {
                        self.store.append(
                            category,
                            Entry::placeholder(id.clone(), role, round.round).with_input(request),
                        );
                        ids.push(id.clone());
                    }
                }
                let poet1 = request.poet1.clone().unwrap_or_default();
                let poet2 = request.poet2.clone().unwrap_or_default();
                let topics = request.topics.join(",");
                let url = with_query(
                    &self.endpoints.battle_url,
                    &[
                        ("poet1", poet1.as_str()),
                        ("poet2", poet2.as_str()),
                        ("topics", topics.as_str()),
                    ],
                );
                let handshake = encode_handshake(&BattleHandshake {
                    verse: poet1,
                    verse2: poet2,
                    topics: request.topics.clone(),
                });
                let channel = self.open_stream(
                    category,
                    url,
                    handshake,
                    StreamTarget::Battle { rounds },
                    ids.clone(),
                )?;
                Ok(Dispatched {
                    category,
                    user_id: None,
                    response_ids: ids,
                    channel: Some(channel),
                })
            }
        }
    }

    /// Close whatever is open, then open `url` and queue `handshake` on it.
    fn open_stream(
        &mut self,
        category: Category,
        url: Result<String, ChatError>,
        handshake: Result<String, ChatError>,
        target: StreamTarget,
        entries: Vec<String>,
    ) -> Result<ChannelId, ChatError> {
        self.teardown_active();

        let id = ChannelId(self.next_channel);
        self.next_channel += 1;

        let opened = url.and_then(|url| {
            let handshake = handshake?;
            let mut channel = self.connector.open(id, &url)?;
            if let Err(err) = channel.send(handshake) {
                channel.close();
                return Err(err);
            }
            Ok(channel)
        });
        let channel = match opened {
            Ok(channel) => channel,
            Err(err) => {
                self.fail_dispatch(category, &entries, &err);
                return Err(err);
            }
        };

        info!(%category, channel = %id, "stream opened");
        self.active = Some(StreamSession {
            channel,
            category,
            target,
            entries,
            frames: 0,
        });
        Ok(id)
    }

    fn fail_dispatch(&mut self, category: Category, ids: &[String], err: &ChatError) {
        let message = err.to_string();
        warn!(%category, error = %message, "request could not be started");
        for id in ids {
            self.store.update_entry(category, id, |e| e.fail(&message));
        }
        let state = &mut self.states[category.index()];
        state.phase = ChatPhase::Error;
        state.error = Some(message);
    }

    /// Close the active channel. Its entries stop streaming with their text
    /// untouched, and its category is finalised if it was still busy.
    fn teardown_active(&mut self) {
        let Some(mut session) = self.active.take() else {
            return;
        };
        session.channel.close();
        debug!(channel = %session.channel.id(), category = %session.category, "channel torn down");
        self.finish_entries(&session);
        let state = &mut self.states[session.category.index()];
        if state.phase.is_busy() {
            state.phase = ChatPhase::Finalized;
        }
    }

    fn finish_entries(&mut self, session: &StreamSession) {
        for id in &session.entries {
            self.store.update_entry(session.category, id, |e| {
                if e.is_streaming {
                    e.finish();
                }
            });
        }
    }

    // -----------------------------------------------------------------------
    // Read model
    // -----------------------------------------------------------------------

    pub fn messages(&self, category: Category) -> &[Entry] {
        self.store.entries(category)
    }

    pub fn snapshot(&self, category: Category) -> Vec<Entry> {
        self.store.snapshot(category)
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    pub fn phase(&self, category: Category) -> ChatPhase {
        self.states[category.index()].phase
    }

    pub fn error(&self, category: Category) -> Option<&str> {
        self.states[category.index()].error.as_deref()
    }

    /// True while any analysis request is outstanding.
    pub fn is_loading(&self) -> bool {
        !self.pending_analysis.is_empty()
    }

    pub fn active_channel(&self) -> Option<ChannelId> {
        self.active.as_ref().map(|s| s.channel.id())
    }

    pub fn active_category(&self) -> Option<Category> {
        self.active.as_ref().map(|s| s.category)
    }

    /// Round the active battle stream is in, if one is open.
    pub fn current_round(&self) -> Option<u32> {
        match &self.active.as_ref()?.target {
            StreamTarget::Battle { rounds } => Some(rounds.round()),
            StreamTarget::Simulation { .. } => None,
        }
    }
}

fn encode_handshake<T: Serialize>(payload: &T) -> Result<String, ChatError> {
    serde_json::to_string(payload)
        .map_err(|e| ChatError::ProtocolMismatch(format!("malformed handshake: {e}")))
}
