//! Messaging-platform abstraction.
//!
//! The real platform client is a third-party SDK; this crate pins down the
//! contract the orchestration layer relies on (login, liveness, event stream,
//! mark-read, send) plus an in-process implementation for tests and dev runs.

mod dev;
mod error;
mod traits;
mod types;

pub use dev::{DevConnector, DevSession, SentMessage};
pub use error::{PlatformError, Result};
pub use traits::{Credentials, PlatformConnector, PlatformSession};
pub use types::{ConversationId, InboundMessage, PlatformEvent, QuotedMessage};
