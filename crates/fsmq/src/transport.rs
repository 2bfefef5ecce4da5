//! Session-level transport container
//!
//! A [`Transport`] derives the jail tag once, mints [`ProcessingGroup`]s that
//! all share it, and aggregates their disposal. It touches no filesystem
//! state of its own.

use crate::error::TransportError;
use crate::group::{FailureHandler, ProcessingGroup, noop_failure_handler};
use crate::message::Destination;
use std::sync::{Arc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// How a transport derives its jail tag.
///
/// Every processing group created from one transport shares the derived tag,
/// so traffic under different tags never crosses even on the same nominal
/// destination.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JailStrategy {
    /// No jailing: destinations map straight to their directory.
    #[default]
    None,
    /// A caller-chosen tag, shared by every transport configured with it.
    Fixed(String),
    /// A fresh random tag per transport instance. Useful for tests and for
    /// running side-by-side sessions that must not see each other's traffic.
    Unique,
}

impl JailStrategy {
    fn create_tag(&self) -> Option<String> {
        match self {
            JailStrategy::None => None,
            JailStrategy::Fixed(tag) => Some(tag.clone()),
            JailStrategy::Unique => Some(Uuid::new_v4().to_string()),
        }
    }
}

/// Session container for the filesystem transport.
pub struct Transport {
    jail_tag: Option<String>,
    state: Mutex<TransportState>,
}

struct TransportState {
    groups: Vec<Arc<ProcessingGroup>>,
    // Reserved for transport-wide failures; nothing raises through it today.
    // Swapped for a no-op once disposal begins so late notifications are
    // never surfaced.
    on_failure: FailureHandler,
    disposed: bool,
}

impl Transport {
    /// Bind a jail-tag derivation strategy and a failure callback. The
    /// filesystem is not touched until a group sends or subscribes.
    pub fn new(
        jail_strategy: JailStrategy,
        on_failure: impl Fn(TransportError) + Send + Sync + 'static,
    ) -> Self {
        let jail_tag = jail_strategy.create_tag();
        debug!("Transport created with jail tag {jail_tag:?}");
        Self {
            jail_tag,
            state: Mutex::new(TransportState {
                groups: Vec::new(),
                on_failure: Arc::new(on_failure),
                disposed: false,
            }),
        }
    }

    /// Allocate a new processing group sharing this transport's jail tag and
    /// register it for disposal. `on_failure` receives watcher errors from
    /// the group's subscriptions.
    pub fn create_processing_group(
        &self,
        on_failure: impl Fn(TransportError) + Send + Sync + 'static,
    ) -> Result<Arc<ProcessingGroup>, TransportError> {
        let mut state = self.state.lock().expect("transport lock poisoned");
        if state.disposed {
            return Err(TransportError::Disposed);
        }
        let group = ProcessingGroup::new(self.jail_tag.clone(), Arc::new(on_failure));
        state.groups.push(Arc::clone(&group));
        Ok(group)
    }

    /// Destination verification is not supported by the filesystem transport.
    pub fn verify_destination(&self, _destination: &Destination) -> Result<(), TransportError> {
        Err(TransportError::Unsupported {
            operation: "destination verification",
        })
    }

    /// Dispose every processing group this transport created. Idempotent;
    /// the failure callback is neutralized before any group goes down, so
    /// in-flight notifications from dying watchers are never surfaced.
    pub fn dispose(&self) {
        let groups = {
            let mut state = self.state.lock().expect("transport lock poisoned");
            if state.disposed {
                return;
            }
            state.disposed = true;
            let _replaced = std::mem::replace(&mut state.on_failure, noop_failure_handler());
            std::mem::take(&mut state.groups)
        };
        for group in groups {
            group.dispose();
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.dispose();
    }
}
