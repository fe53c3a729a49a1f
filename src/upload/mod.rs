//! Chunked Upload Module
//!
//! Implements resumable, idempotent large-file uploads:
//! - A session per upload, advancing through a small state machine
//! - Chunk acceptance keyed by `(session_id, index)`, idempotent by
//!   construction
//! - Server-side chunk storage and reassembly
//! - Post-assembly digest and structural verification
//! - Fire-and-forget handoff to a downstream AI pipeline
//!
//! Protocol flow:
//! 1. Client calls `init` with file metadata; server allocates a session.
//! 2. Client uploads chunks in any order, possibly with retries.
//! 3. Client calls `complete`; server reassembles, verifies, and hands off.

pub mod ai_hook;
pub mod chunk_index;
pub mod chunk_service;
pub mod session_service;
pub mod types;
pub mod validator;

pub use ai_hook::{AiPipeline, NoopPipeline, WebhookPipeline};
pub use chunk_index::ChunkIndex;
pub use chunk_service::ChunkService;
pub use session_service::UploadService;
pub use types::*;
pub use validator::Validator;
