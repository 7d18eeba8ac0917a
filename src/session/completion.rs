//! Turn-completion detection
//!
//! The assessment script tells the model to append a sentinel marker to its
//! final message. The marker is never shown to the user nor fed back to the
//! model.

/// Sentinel the model emits when the assessment is complete
pub const END_OF_ASSESSMENT: &str = "[[END_OF_ASSESSMENT]]";

/// Outcome of scanning reply text for the marker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub clean_text: String,
    pub finished: bool,
}

/// Strip every marker occurrence and report whether any was present.
///
/// Removal repeats until no marker remains, so text like
/// `[[END_OF_[[END_OF_ASSESSMENT]]ASSESSMENT]]` cannot reassemble one and the
/// result is always marker-free.
pub fn scan(accumulated: &str) -> Scan {
    let finished = accumulated.contains(END_OF_ASSESSMENT);
    let mut clean_text = accumulated.replace(END_OF_ASSESSMENT, "");
    while clean_text.contains(END_OF_ASSESSMENT) {
        clean_text = clean_text.replace(END_OF_ASSESSMENT, "");
    }
    Scan {
        clean_text,
        finished,
    }
}

/// Text to show while a reply is still streaming in.
///
/// Like `scan`, but also holds back a trailing prefix of the marker, since the
/// rest of it may arrive in the next fragment.
pub fn preview(accumulated: &str) -> String {
    let mut text = scan(accumulated).clean_text;
    let held = (1..END_OF_ASSESSMENT.len())
        .rev()
        .find(|&n| END_OF_ASSESSMENT.get(..n).is_some_and(|prefix| text.ends_with(prefix)));
    if let Some(n) = held {
        text.truncate(text.len() - n);
    }
    text
}
