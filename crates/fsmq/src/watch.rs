//! Directory watch service
//!
//! Thin abstraction over OS file-system notification: watch one directory,
//! non-recursively, for created or modified files matching a `*.{type}`
//! pattern. Backed by the `notify` crate; a polling backend kicks in on
//! platforms without native events, so callers never see the difference.

use crate::error::TransportError;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Subscription filter: `*.{type}` for a concrete tag, `*.*` for all messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFilter(Option<String>);

impl MessageFilter {
    pub fn of_type(type_tag: impl Into<String>) -> Self {
        Self(Some(type_tag.into()))
    }

    pub fn any() -> Self {
        Self(None)
    }

    pub fn matches(&self, path: &Path) -> bool {
        let ext = path.extension().and_then(|s| s.to_str());
        match (&self.0, ext) {
            // `*.*` still requires an extension, like the glob it names
            (None, Some(_)) => true,
            (Some(tag), Some(ext)) => tag == ext,
            (_, None) => false,
        }
    }

    /// Glob-style rendering, for logs.
    pub fn pattern(&self) -> String {
        match &self.0 {
            Some(tag) => format!("*.{tag}"),
            None => "*.*".to_string(),
        }
    }
}

impl From<Option<&str>> for MessageFilter {
    fn from(type_tag: Option<&str>) -> Self {
        Self(type_tag.map(str::to_string))
    }
}

/// Live watch on one directory. Dropping the handle cancels the watch; no
/// events are raised after the drop completes.
pub struct WatchHandle {
    // Held only to keep the OS watch registered.
    _watcher: RecommendedWatcher,
}

/// Watch `dir` (non-recursively) for created or modified files matching
/// `filter`.
///
/// `on_event` receives the full path of each matching file; it runs on the
/// notification backend's own thread, so it must be cheap and must not block.
/// `on_error` receives watcher errors (overflow, lost OS handles).
pub fn watch(
    dir: &Path,
    filter: MessageFilter,
    on_event: impl Fn(PathBuf) + Send + 'static,
    on_error: impl Fn(notify::Error) + Send + 'static,
) -> Result<WatchHandle, TransportError> {
    let mut watcher: RecommendedWatcher =
        notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                if !is_arrival(&event.kind) {
                    return;
                }
                for path in event.paths {
                    if filter.matches(&path) {
                        on_event(path);
                    } else {
                        debug!("Ignoring non-matching file: {}", path.display());
                    }
                }
            }
            Err(e) => {
                warn!("Watcher error: {e}");
                on_error(e);
            }
        })
        .map_err(|e| TransportError::Watch {
            path: dir.to_path_buf(),
            source: e,
        })?;

    watcher
        .watch(dir, RecursiveMode::NonRecursive)
        .map_err(|e| TransportError::Watch {
            path: dir.to_path_buf(),
            source: e,
        })?;

    Ok(WatchHandle { _watcher: watcher })
}

/// Creation and modification both signal a message file arriving; removal is
/// the consume path's own doing and everything else is noise.
fn is_arrival(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_) | EventKind::Modify(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::sync::mpsc::channel;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_filter_matches_concrete_type() {
        let filter = MessageFilter::of_type("evt");
        assert!(filter.matches(Path::new("/q/abc.evt")));
        assert!(!filter.matches(Path::new("/q/abc.cmd")));
        assert!(!filter.matches(Path::new("/q/noext")));
    }

    #[test]
    fn test_wildcard_filter_requires_extension() {
        let filter = MessageFilter::any();
        assert!(filter.matches(Path::new("/q/abc.evt")));
        assert!(filter.matches(Path::new("/q/abc.cmd")));
        assert!(!filter.matches(Path::new("/q/noext")));
    }

    #[test]
    fn test_filter_pattern_rendering() {
        assert_eq!(MessageFilter::of_type("evt").pattern(), "*.evt");
        assert_eq!(MessageFilter::any().pattern(), "*.*");
    }

    #[test]
    fn test_filter_from_optional_type() {
        assert_eq!(MessageFilter::from(Some("evt")), MessageFilter::of_type("evt"));
        assert_eq!(MessageFilter::from(None), MessageFilter::any());
    }

    #[test]
    fn test_watch_reports_created_file() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = channel();

        let handle = watch(
            temp_dir.path(),
            MessageFilter::of_type("evt"),
            move |path| {
                let _ = tx.send(path);
            },
            |_| {},
        )
        .unwrap();

        fs::write(temp_dir.path().join("a.evt"), b"payload").unwrap();
        fs::write(temp_dir.path().join("b.cmd"), b"filtered out").unwrap();

        let seen = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("watch event for a.evt");
        assert_eq!(seen.file_name().unwrap(), "a.evt");

        drop(handle);
    }

    #[test]
    fn test_watch_stops_after_drop() {
        let temp_dir = TempDir::new().unwrap();
        let (tx, rx) = channel();

        let handle = watch(
            temp_dir.path(),
            MessageFilter::any(),
            move |path| {
                let _ = tx.send(path);
            },
            |_| {},
        )
        .unwrap();
        drop(handle);

        fs::write(temp_dir.path().join("late.evt"), b"x").unwrap();
        assert!(rx.recv_timeout(Duration::from_millis(300)).is_err());
    }

    #[test]
    fn test_watch_missing_directory_fails() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("nope");
        let result = watch(&missing, MessageFilter::any(), |_| {}, |_| {});
        assert!(matches!(result, Err(TransportError::Watch { .. })));
    }
}
