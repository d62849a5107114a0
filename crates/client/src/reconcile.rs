//! Optimistic view reconciliation
//!
//! A participant's view of a conversation mixes entries it created locally
//! (pending until the server confirms them) with authoritative messages
//! delivered over the live channel or fetched as history. Every incoming
//! authoritative message goes through [`reconcile`] so the view never holds
//! the same message twice, whatever order the echo and the ack arrive in.

use std::time::Duration;

use time::OffsetDateTime;
use tokio::time::Instant;
use uuid::Uuid;

use supportsync_shared::{AnalysisResult, Message, MessageId, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Sent, waiting for the authoritative copy
    Pending,
    /// Backed by a stored message
    Confirmed,
    /// Rejected, or no confirmation within the ack timeout
    Failed,
}

/// One row of the rendered conversation
#[derive(Debug, Clone, PartialEq)]
pub struct ViewEntry {
    /// Client-side identity, stable across confirmation
    pub local_id: Uuid,
    pub message_id: Option<MessageId>,
    pub sequence: Option<i64>,
    pub sender_role: Role,
    pub content: String,
    pub attachment_ref: Option<String>,
    pub derived_text: Option<String>,
    pub sent_at: OffsetDateTime,
    pub state: EntryState,
    pub analysis: Option<AnalysisResult>,
    queued_at: Instant,
}

impl ViewEntry {
    /// Local entry for a message that has not reached the server yet
    pub fn optimistic(
        sender_role: Role,
        content: impl Into<String>,
        attachment_ref: Option<String>,
    ) -> Self {
        Self {
            local_id: Uuid::new_v4(),
            message_id: None,
            sequence: None,
            sender_role,
            content: content.into(),
            attachment_ref,
            derived_text: None,
            sent_at: OffsetDateTime::now_utc(),
            state: EntryState::Pending,
            analysis: None,
            queued_at: Instant::now(),
        }
    }

    pub fn confirmed(message: &Message) -> Self {
        let mut entry = Self {
            local_id: Uuid::new_v4(),
            message_id: None,
            sequence: None,
            sender_role: message.sender_role,
            content: String::new(),
            attachment_ref: None,
            derived_text: None,
            sent_at: message.created_at,
            state: EntryState::Confirmed,
            analysis: None,
            queued_at: Instant::now(),
        };
        entry.confirm_with(message);
        entry
    }

    pub fn is_pending(&self) -> bool {
        self.state == EntryState::Pending
    }

    fn confirm_with(&mut self, message: &Message) {
        self.message_id = Some(message.id);
        self.sequence = Some(message.sequence);
        self.content.clone_from(&message.content);
        self.attachment_ref.clone_from(&message.attachment_ref);
        self.derived_text.clone_from(&message.derived_text);
        self.sent_at = message.created_at;
        self.state = EntryState::Confirmed;
        if message.analysis.is_some() {
            self.analysis.clone_from(&message.analysis);
        }
    }

    fn same_body(&self, message: &Message) -> bool {
        self.sender_role == message.sender_role && self.content == message.content
    }

    fn matches_pending(&self, message: &Message) -> bool {
        self.is_pending() && self.same_body(message)
    }
}

/// What [`apply`] did with an incoming message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// Already in the view
    Duplicate,
    /// Matched a pending entry, which is now confirmed
    Confirmed { local_id: Uuid },
    /// Added as a new entry
    Appended,
}

/// Merge one authoritative message into `view` in place
pub fn apply(view: &mut Vec<ViewEntry>, message: &Message) -> Applied {
    if view.iter().any(|e| e.message_id == Some(message.id)) {
        return Applied::Duplicate;
    }

    // Entries are kept in send order, so the first match is the oldest
    if let Some(entry) = view.iter_mut().find(|e| e.matches_pending(message)) {
        entry.confirm_with(message);
        return Applied::Confirmed {
            local_id: entry.local_id,
        };
    }

    view.push(ViewEntry::confirmed(message));
    Applied::Appended
}

/// Pure form of [`apply`]: returns the new view, leaving `current` untouched
pub fn reconcile(current: &[ViewEntry], incoming: &Message) -> Vec<ViewEntry> {
    let mut view = current.to_vec();
    apply(&mut view, incoming);
    view
}

/// Mark pending entries queued longer than `ack_timeout` as failed.
/// Returns how many entries changed.
pub fn expire_pending(view: &mut [ViewEntry], now: Instant, ack_timeout: Duration) -> usize {
    let mut expired = 0;
    for entry in view.iter_mut().filter(|e| e.is_pending()) {
        if now.saturating_duration_since(entry.queued_at) >= ack_timeout {
            entry.state = EntryState::Failed;
            expired += 1;
        }
    }
    expired
}

/// Attach a late analysis result to its message. False if the message is not in view.
pub fn attach_analysis(view: &mut [ViewEntry], analysis: &AnalysisResult) -> bool {
    match view
        .iter_mut()
        .find(|e| e.message_id == Some(analysis.message_id))
    {
        Some(entry) => {
            entry.analysis = Some(analysis.clone());
            true
        }
        None => false,
    }
}

/// Rebuild the view from authoritative history after a reconnect.
///
/// Confirmed entries are replaced by their stored copy, pending entries the
/// server has already stored are confirmed, and anything still unconfirmed
/// stays at the end in its original order. Confirmed entries missing from
/// history are dropped.
///
/// A failed entry is settled by a stored message with the same role and
/// content when no pending entry claims it: the send timed out but did reach
/// the server.
pub fn rebase(view: &[ViewEntry], history: &[Message]) -> Vec<ViewEntry> {
    let mut unconfirmed: Vec<ViewEntry> = view
        .iter()
        .filter(|e| e.state != EntryState::Confirmed)
        .cloned()
        .collect();

    let mut rebuilt = Vec::with_capacity(history.len() + unconfirmed.len());
    for message in history {
        if rebuilt
            .iter()
            .any(|e: &ViewEntry| e.message_id == Some(message.id))
        {
            continue;
        }

        if let Some(existing) = view.iter().find(|e| e.message_id == Some(message.id)) {
            let mut entry = existing.clone();
            entry.confirm_with(message);
            rebuilt.push(entry);
        } else if let Some(pos) = settled_by(&unconfirmed, message) {
            let mut entry = unconfirmed.remove(pos);
            entry.confirm_with(message);
            rebuilt.push(entry);
        } else {
            rebuilt.push(ViewEntry::confirmed(message));
        }
    }

    rebuilt.extend(unconfirmed);
    rebuilt
}

/// Oldest unconfirmed entry a stored message accounts for, pending ones first
fn settled_by(unconfirmed: &[ViewEntry], message: &Message) -> Option<usize> {
    unconfirmed
        .iter()
        .position(|e| e.matches_pending(message))
        .or_else(|| {
            unconfirmed
                .iter()
                .position(|e| e.state == EntryState::Failed && e.same_body(message))
        })
}
