//! # Frame Replication
//!
//! Captures view state into frames and applies received frames.
//!
//! A frame is a list of `(view id, serialized state)` pairs. Every view is
//! serialized at most once per frame; the captured set is then culled per
//! recipient:
//!
//! - the authority's full frame to player P omits views owned by P
//! - a client's partial frame only carries views it owns
//!
//! The authority applies a partial frame entry only if the sending player
//! owns the view. Entries for unknown views are skipped.

use replica_core::PlayerId;
use replica_protocol::{BinaryStream, ViewUpdate};
use replica_session::{Session, View};
use std::sync::Arc;

/// One view's state captured for the current frame
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedView {
    pub owner: PlayerId,
    pub update: ViewUpdate,
}

/// Serialize every view accepted by `filter`, once each.
///
/// Views whose serialization fails are logged and left out of the frame.
pub fn capture_views<F>(views: &[Arc<dyn View>], filter: F) -> Vec<CapturedView>
where
    F: Fn(&dyn View) -> bool,
{
    let mut captured = Vec::with_capacity(views.len());

    for view in views {
        if !filter(view.as_ref()) {
            continue;
        }

        let mut stream = BinaryStream::writer();
        if let Err(e) = view.serialize_state(&mut stream) {
            tracing::error!("Failed to capture view {}: {}", view.view_id(), e);
            continue;
        }

        captured.push(CapturedView {
            owner: view.owner(),
            update: ViewUpdate::new(view.view_id(), stream.get_bytes().to_vec()),
        });
    }

    captured
}

/// The part of a full frame destined to `recipient`
pub fn full_frame_for(captured: &[CapturedView], recipient: PlayerId) -> Vec<ViewUpdate> {
    captured
        .iter()
        .filter(|view| view.owner != recipient)
        .map(|view| view.update.clone())
        .collect()
}

/// Apply received frame entries to the session's views
///
/// # Arguments
/// * `session` - Session holding the views
/// * `updates` - Frame entries in wire order
/// * `sender` - On the authority, the player the partial frame came from;
///   entries for views it does not own are dropped. `None` applies
///   everything (client side).
///
/// # Returns
/// Number of entries applied
pub fn apply_updates(session: &dyn Session, updates: Vec<ViewUpdate>, sender: Option<PlayerId>) -> usize {
    let mut applied = 0;

    for update in updates {
        let Some(view) = session.find_view(update.view_id) else {
            tracing::debug!("Frame references unknown view {}", update.view_id);
            continue;
        };

        if let Some(sender) = sender {
            if view.owner() != sender {
                tracing::warn!(
                    "Player {} sent state for view {} owned by {}",
                    sender,
                    update.view_id,
                    view.owner()
                );
                continue;
            }
        }

        let mut stream = BinaryStream::reader(update.state);
        match view.serialize_state(&mut stream) {
            Ok(()) => applied += 1,
            Err(e) => tracing::warn!("Failed to apply state to view {}: {}", update.view_id, e),
        }
    }

    applied
}
