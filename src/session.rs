//! Assessment session core
//!
//! A session moves NOT_STARTED -> ACTIVE -> FINISHED. The controller records
//! turns for display, keeps the model-facing history in step with them, and
//! watches replies for the completion marker.

mod completion;
mod controller;
mod history;
mod state;
mod transcript;

#[cfg(test)]
mod proptests;

pub use completion::END_OF_ASSESSMENT;
pub use controller::{SessionController, SessionError};
pub use state::{SessionStatus, TransitionError};
pub use transcript::Turn;

#[allow(unused_imports)] // Public API re-exports
pub use completion::{preview, scan, Scan};
#[allow(unused_imports)] // Public API re-exports
pub use controller::{Export, PreviewSender};
#[allow(unused_imports)] // Public API re-exports
pub use history::HistoryAdapter;
#[allow(unused_imports)] // Public API re-exports
pub use state::{transition, SessionEvent, SessionState};
#[allow(unused_imports)] // Public API re-exports
pub use transcript::{export_file_name, Role, TranscriptStore};
