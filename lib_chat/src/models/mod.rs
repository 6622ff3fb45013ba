//! # Models
//!
//! Wire and domain types. Field names follow the JSON the delivery endpoint and
//! the history API speak (camelCase); Rust code sees snake_case.

/// Outbound and inbound transport frames, event kinds, frame decoding.
pub mod frames;
/// Chat message records and their nested member/user summaries.
pub mod message;
/// Cache keys, pages and page requests.
pub mod page;
/// Typing and member status payloads.
pub mod typing;

pub use frames::{
    channel_name, decode_frame, ChatEvent, ClientFrame, DecodeError, EventKind, InboundEvent,
};
pub use message::{ChatMessage, MemberSummary, UserSummary};
pub use page::{CacheKey, Page, PageRequest, MESSAGES_BATCH};
pub use typing::{MemberStatus, TypingStart, TypingStop, TypingUser};
