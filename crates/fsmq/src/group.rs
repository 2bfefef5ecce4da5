//! Processing group: the directory-as-queue engine
//!
//! A processing group turns a logical destination into a physical (optionally
//! jail-tagged) directory and implements the two transport operations on it:
//! `send` writes a uniquely named message file, `subscribe` installs a
//! directory watch, replays the backlog already on disk, and consumes each
//! arriving file with read-then-delete semantics.
//!
//! ## The consume race
//!
//! Several subscribers (in this process or another) may watch one physical
//! directory. Each dispatch tries to lock, read, and finally delete the
//! message file; the atomic delete is the arbitration point, so exactly one
//! consumer delivers any given file. A losing consumer abandons the attempt
//! silently: no callback, no error. There is deliberately no in-process lock
//! spanning subscribers; the filesystem itself arbitrates.

use crate::error::TransportError;
use crate::message::{self, BinaryMessage, Destination};
use crate::watch::{self, MessageFilter};
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{RecvTimeoutError, Sender, channel};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::io::AsRawFd;

/// Callback invoked when the transport hits a failure it cannot surface
/// through a return value (watcher errors arriving on a background thread).
pub type FailureHandler = Arc<dyn Fn(TransportError) + Send + Sync>;

/// Wait before each open attempt, so a consumer does not read a file the
/// producer has not finished writing. A workaround inherited from the wire
/// format (plain `write` to the final name), kept as observable behavior.
/// TODO: write-to-temp-then-rename on the producer side would make this
/// delay unnecessary.
const PRE_READ_DELAY: Duration = Duration::from_millis(100);

/// Poll interval for the worker's cancellation check.
const WORKER_POLL: Duration = Duration::from_millis(100);

pub(crate) fn noop_failure_handler() -> FailureHandler {
    Arc::new(|_| {})
}

/// The engine instance executing send/subscribe for one jail tag.
///
/// Created via [`Transport::create_processing_group`]; owns every watch
/// subscription it hands out and releases them all on [`dispose`].
///
/// [`Transport::create_processing_group`]: crate::Transport::create_processing_group
/// [`dispose`]: ProcessingGroup::dispose
pub struct ProcessingGroup {
    jail_tag: Option<String>,
    // Slot, not a bare handler: dispose swaps in a no-op and watcher threads
    // pick the change up on their next notification.
    on_failure: Arc<Mutex<FailureHandler>>,
    state: Mutex<GroupState>,
}

#[derive(Default)]
struct GroupState {
    subscriptions: Vec<Subscription>,
    disposed: bool,
}

impl ProcessingGroup {
    pub(crate) fn new(jail_tag: Option<String>, on_failure: FailureHandler) -> Arc<Self> {
        Arc::new(Self {
            jail_tag,
            on_failure: Arc::new(Mutex::new(on_failure)),
            state: Mutex::new(GroupState::default()),
        })
    }

    /// Write `message` as a new uniquely named file in the destination
    /// directory, creating the directory if absent.
    ///
    /// `ttl` is accepted for interface compatibility but is NOT enforced:
    /// messages never expire on disk. A documented limitation of this
    /// transport.
    ///
    /// Write failures propagate to the caller; there is no retry.
    pub fn send(
        &self,
        destination: impl Into<Destination>,
        message: &BinaryMessage,
        ttl: Option<Duration>,
    ) -> Result<(), TransportError> {
        let _ = ttl; // not enforced
        if self.state.lock().expect("group state lock poisoned").disposed {
            return Err(TransportError::Disposed);
        }
        message::check_type_tag(&message.type_tag)?;

        let dir = destination.into().resolve(self.jail_tag.as_deref());
        fs::create_dir_all(&dir).map_err(|e| TransportError::io(&dir, e))?;

        let path = dir.join(message::message_file_name(&message.type_tag));
        fs::write(&path, &message.bytes).map_err(|e| TransportError::io(&path, e))?;
        debug!("Sent {} byte(s) to {}", message.bytes.len(), path.display());
        Ok(())
    }

    /// Watch the destination for message files matching `type_filter`
    /// (`*.{type}`, or `*.*` when `None`) and deliver each consumed message
    /// to `callback`.
    ///
    /// Files already present in the directory are replayed through the same
    /// consume path, so a backlog left by earlier producers is delivered
    /// without waiting for a filesystem event. Backlog and live files may
    /// arrive at the callback in either relative order, but each file is
    /// delivered at most once overall.
    ///
    /// `callback` runs on the subscription's own worker thread. The returned
    /// handle can be disposed individually; the group disposes any still-open
    /// subscriptions itself.
    pub fn subscribe(
        &self,
        destination: impl Into<Destination>,
        callback: impl FnMut(BinaryMessage) + Send + 'static,
        type_filter: Option<&str>,
    ) -> Result<Subscription, TransportError> {
        let mut state = self.state.lock().expect("group state lock poisoned");
        if state.disposed {
            return Err(TransportError::Disposed);
        }

        let dir = destination.into().resolve(self.jail_tag.as_deref());
        fs::create_dir_all(&dir).map_err(|e| TransportError::io(&dir, e))?;

        let filter = MessageFilter::from(type_filter);
        info!("Subscribing to {} with filter {}", dir.display(), filter.pattern());

        let (feed, dispatch) = channel::<PathBuf>();
        let cancelled = Arc::new(AtomicBool::new(false));

        let watch_handle = {
            let feed = feed.clone();
            let on_error = watch_failure_forwarder(Arc::clone(&self.on_failure), dir.clone());
            watch::watch(
                &dir,
                filter.clone(),
                move |path| {
                    // Worker may already be gone mid-dispose; dropped events
                    // are fine then.
                    let _ = feed.send(path);
                },
                on_error,
            )?
        };

        let worker = {
            let cancelled = Arc::clone(&cancelled);
            let mut callback = callback;
            thread::spawn(move || {
                loop {
                    if cancelled.load(Ordering::SeqCst) {
                        break;
                    }
                    match dispatch.recv_timeout(WORKER_POLL) {
                        Ok(path) => {
                            if cancelled.load(Ordering::SeqCst) {
                                break;
                            }
                            if let Some(msg) = consume(&path) {
                                callback(msg);
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
        };

        // Backlog replay: queue everything already on disk through the same
        // dispatch path the watch uses. Runs on the worker, not this call.
        replay_backlog(&dir, &filter, &feed);

        let subscription = Subscription {
            inner: Arc::new(SubscriptionInner {
                cancelled,
                resources: Mutex::new(Some(SubscriptionResources {
                    _watch: watch_handle,
                    _feed: feed,
                    worker,
                })),
            }),
        };
        state.subscriptions.push(subscription.clone());
        Ok(subscription)
    }

    /// Request-reply is not supported by the filesystem transport.
    pub fn send_request(
        &self,
        _destination: impl Into<Destination>,
        _message: &BinaryMessage,
    ) -> Result<BinaryMessage, TransportError> {
        Err(TransportError::Unsupported {
            operation: "request-reply",
        })
    }

    /// Request-reply is not supported by the filesystem transport.
    pub fn register_handler(
        &self,
        _destination: impl Into<Destination>,
        _handler: impl FnMut(BinaryMessage) -> BinaryMessage + Send + 'static,
        _type_filter: Option<&str>,
    ) -> Result<Subscription, TransportError> {
        Err(TransportError::Unsupported {
            operation: "request-reply",
        })
    }

    /// Temporary destinations are not supported by the filesystem transport.
    pub fn create_temporary_destination(&self) -> Result<Destination, TransportError> {
        Err(TransportError::Unsupported {
            operation: "temporary destinations",
        })
    }

    /// Release every watch subscription this group holds. Idempotent; no
    /// callbacks fire after this returns, and failure notifications raised
    /// while disposal runs are dropped.
    pub fn dispose(&self) {
        *self.on_failure.lock().expect("failure handler lock poisoned") =
            noop_failure_handler();

        let subscriptions = {
            let mut state = self.state.lock().expect("group state lock poisoned");
            if state.disposed {
                return;
            }
            state.disposed = true;
            std::mem::take(&mut state.subscriptions)
        };
        for subscription in subscriptions {
            subscription.dispose();
        }
    }
}

/// Handle to one active watch subscription.
///
/// Disposal is explicit and idempotent; the owning group also disposes the
/// subscription if the caller never does.
#[derive(Clone)]
pub struct Subscription {
    inner: Arc<SubscriptionInner>,
}

struct SubscriptionInner {
    cancelled: Arc<AtomicBool>,
    resources: Mutex<Option<SubscriptionResources>>,
}

struct SubscriptionResources {
    // Dropping the watch stops new events; dropping the feed sender lets the
    // worker's channel disconnect.
    _watch: watch::WatchHandle,
    _feed: Sender<PathBuf>,
    worker: JoinHandle<()>,
}

impl Subscription {
    /// Cancel the watch and stop the worker. Safe to call more than once and
    /// safe to call concurrently with in-flight delivery: when this returns,
    /// no further callbacks will fire.
    pub fn dispose(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let resources = self
            .inner
            .resources
            .lock()
            .expect("subscription lock poisoned")
            .take();
        if let Some(resources) = resources {
            let SubscriptionResources { _watch, _feed, worker } = resources;
            drop(_watch);
            drop(_feed);
            // Joining from the worker itself would deadlock; a dispose called
            // inside the delivery callback just skips the join.
            if worker.thread().id() != thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

/// Forward watcher errors to the group's current failure handler.
///
/// Reads the handler slot at call time, so the no-op swapped in by `dispose`
/// applies to any notification still in flight.
fn watch_failure_forwarder(
    slot: Arc<Mutex<FailureHandler>>,
    watched: PathBuf,
) -> impl Fn(notify::Error) + Send + 'static {
    move |e| {
        // Clone out of the slot so the handler runs unlocked.
        let handler = Arc::clone(&*slot.lock().expect("failure handler lock poisoned"));
        handler(TransportError::Watch {
            path: watched.clone(),
            source: e,
        });
    }
}

/// Queue all matching files already in `dir` for consumption.
fn replay_backlog(dir: &Path, filter: &MessageFilter, feed: &Sender<PathBuf>) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Backlog enumeration of {} failed: {e}", dir.display());
            return;
        }
    };
    for entry in entries.filter_map(|e| e.ok()) {
        let path = entry.path();
        if path.is_file() && filter.matches(&path) {
            debug!("Replaying backlog file {}", path.display());
            let _ = feed.send(path);
        }
    }
}

/// Try to claim and read one message file.
///
/// Returns `None` whenever the file cannot be claimed: already consumed,
/// locked by a competing reader, or gone by the time we delete. Losing the
/// race is the expected outcome for all but one consumer of a shared
/// destination, so every failure path here is silent.
fn consume(path: &Path) -> Option<BinaryMessage> {
    // The producer writes straight to the final name, so freshly created
    // files may still be mid-write. See PRE_READ_DELAY.
    thread::sleep(PRE_READ_DELAY);

    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) => {
            debug!("Skipping {}: {e}", path.display());
            return None;
        }
    };
    if !try_lock_exclusive(&file) {
        debug!("Skipping {}: locked by another reader", path.display());
        return None;
    }

    let mut bytes = Vec::new();
    if let Err(e) = file.read_to_end(&mut bytes) {
        debug!("Skipping {}: {e}", path.display());
        return None;
    }

    // The delete is the arbitration point: exactly one consumer (possibly in
    // another process) succeeds per file. Names are never reused, so a
    // failed delete always means somebody else won.
    if let Err(e) = fs::remove_file(path) {
        debug!("Lost consume race for {}: {e}", path.display());
        return None;
    }

    Some(BinaryMessage {
        bytes,
        type_tag: message::type_tag_of(path),
    })
}

/// Non-blocking exclusive lock on the open message file, released on drop.
#[cfg(unix)]
fn try_lock_exclusive(file: &File) -> bool {
    unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) == 0 }
}

/// Without flock the delete race alone arbitrates; Windows file sharing
/// already rejects concurrent deleters.
#[cfg(not(unix))]
fn try_lock_exclusive(_file: &File) -> bool {
    true
}
