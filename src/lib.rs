//! Client for an Arabic poetry service with three chat modes: verse
//! analysis (REST), poet-style simulation and two-poet battles (both streamed
//! over a WebSocket).
//!
//! The interesting part is turning interleaved, partial socket frames from
//! two poets and a judge into a stable transcript organised into rounds; see
//! [`reconciler`] and [`session`].

pub mod analysis;
pub mod catalog;
pub mod channel;
pub mod cli;
pub mod config;
pub mod error;
pub mod frame;
pub mod protocol;
pub mod reconciler;
pub mod render;
pub mod retry;
pub mod session;
pub mod transcript;

pub use channel::{ChannelEvent, ChannelId, SessionEvent};
pub use config::Endpoints;
pub use error::ChatError;
pub use frame::{parse, Decoded, FrameFields};
pub use reconciler::{apply_battle_frame, apply_simulation_frame, RoundIds, RoundState};
pub use session::{ChatPhase, Dispatched, SessionController};
pub use transcript::{Category, Entry, EntryStatus, SendRequest, SenderRole, TranscriptStore};
