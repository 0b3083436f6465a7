//! Shared-directory frame channel.
//!
//! Writes are lock-free: every frame has a distinct file name and each file
//! is placed with an atomic rename. All teardown paths are best-effort since
//! the engine (or a concurrent cleanup) may already have removed files.

use crate::stats::SharedBridgeStats;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Mount point of the shared directory inside the container.
pub const CONTAINER_FRAME_DIR: &str = "/frames";

/// Frame path pattern passed to the engine. The 16 zeros tell it the
/// timestamp width to expect.
pub const CONTAINER_FRAME_PATTERN: &str = "/frames/frame0000000000000000.jpg";

/// Zero-length sentinel signalling that no further frames will be written.
pub const END_OF_STREAM_FILE: &str = "end_of_stream";

/// File name for a frame captured at `timestamp_micros`.
///
/// Fixed-width zero padding makes lexicographic order equal capture order.
pub fn frame_file_name(timestamp_micros: u64) -> String {
    format!("frame{timestamp_micros:016}.jpg")
}

/// Errors raised while preparing the shared directory.
#[derive(Debug)]
pub enum FrameChannelError {
    CreateDir { path: PathBuf, source: std::io::Error },
    ClearDir { path: PathBuf, source: std::io::Error },
}

impl std::fmt::Display for FrameChannelError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameChannelError::CreateDir { path, source } => {
                write!(f, "Failed to create frame directory {path:?}: {source}")
            }
            FrameChannelError::ClearDir { path, source } => {
                write!(f, "Failed to clear frame directory {path:?}: {source}")
            }
        }
    }
}

impl std::error::Error for FrameChannelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameChannelError::CreateDir { source, .. } => Some(source),
            FrameChannelError::ClearDir { source, .. } => Some(source),
        }
    }
}

/// One-directional frame handoff through a shared directory.
#[derive(Debug)]
pub struct FrameChannel {
    dir: PathBuf,
    active: AtomicBool,
    frame_count: AtomicU64,
    stats: Option<SharedBridgeStats>,
}

impl FrameChannel {
    /// Create a channel over `dir`. Nothing touches the filesystem until
    /// [`FrameChannel::init`].
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            active: AtomicBool::new(false),
            frame_count: AtomicU64::new(0),
            stats: None,
        }
    }

    /// Attach shared counters for written and dropped frames.
    pub fn with_stats(mut self, stats: SharedBridgeStats) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Create the directory, clear leftovers from a crashed session and
    /// mark the channel active.
    pub fn init(&self) -> Result<(), FrameChannelError> {
        std::fs::create_dir_all(&self.dir).map_err(|source| FrameChannelError::CreateDir {
            path: self.dir.clone(),
            source,
        })?;

        let entries = std::fs::read_dir(&self.dir).map_err(|source| FrameChannelError::ClearDir {
            path: self.dir.clone(),
            source,
        })?;

        let mut removed = 0usize;
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            let result = if path.is_dir() {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_file(&path)
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!("Could not remove leftover {:?}: {}", path, e),
            }
        }
        if removed > 0 {
            tracing::info!("Removed {} leftover entries from {:?}", removed, self.dir);
        }

        self.frame_count.store(0, Ordering::SeqCst);
        self.active.store(true, Ordering::SeqCst);
        tracing::debug!("Frame channel ready at {:?}", self.dir);
        Ok(())
    }

    /// Write one frame. Dropped silently (with a debug log) when the channel
    /// is not active; I/O failures are logged and swallowed.
    pub fn write_frame(&self, timestamp_micros: u64, image: &[u8]) {
        if !self.is_active() {
            tracing::debug!("Dropping frame {} - channel inactive", timestamp_micros);
            if let Some(ref stats) = self.stats {
                stats.record_frame_dropped();
            }
            return;
        }

        let name = frame_file_name(timestamp_micros);
        let target = self.dir.join(&name);
        // Hidden temp name so a directory scan for `frame*` never sees a partial file.
        let staging = self.dir.join(format!(".{name}.tmp"));

        let result = std::fs::write(&staging, image).and_then(|_| std::fs::rename(&staging, &target));
        match result {
            Ok(()) => {
                self.frame_count.fetch_add(1, Ordering::SeqCst);
                if let Some(ref stats) = self.stats {
                    stats.record_frame_written();
                }
            }
            Err(e) => {
                tracing::warn!("Failed to write frame {:?}: {}", target, e);
                let _ = std::fs::remove_file(&staging);
                if let Some(ref stats) = self.stats {
                    stats.record_frame_dropped();
                }
            }
        }
    }

    /// Write the end-of-stream sentinel. Best-effort.
    pub fn write_end_of_stream(&self) {
        let path = self.dir.join(END_OF_STREAM_FILE);
        match std::fs::File::create(&path) {
            Ok(_) => tracing::debug!("Wrote end-of-stream marker {:?}", path),
            Err(e) => tracing::debug!("Could not write end-of-stream marker {:?}: {}", path, e),
        }
    }

    /// Deactivate the channel and remove the whole directory. Best-effort.
    pub fn cleanup(&self) {
        self.active.store(false, Ordering::SeqCst);
        match std::fs::remove_dir_all(&self.dir) {
            Ok(()) => tracing::debug!("Removed frame directory {:?}", self.dir),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!("Could not remove frame directory {:?}: {}", self.dir, e),
        }
    }

    /// Host-side directory path.
    pub fn host_dir(&self) -> &Path {
        &self.dir
    }

    /// Frame path pattern as seen from inside the container.
    pub fn container_pattern(&self) -> &'static str {
        CONTAINER_FRAME_PATTERN
    }

    /// Number of frames written since the last `init`.
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::create_shared_stats;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_frame_file_name_width() {
        assert_eq!(frame_file_name(0), "frame0000000000000000.jpg");
        assert_eq!(frame_file_name(1_700_000_000_123_456), "frame1700000000123456.jpg");
        assert!(CONTAINER_FRAME_PATTERN.ends_with(&frame_file_name(0)));
    }

    #[test]
    fn test_frame_names_sort_by_timestamp() {
        let timestamps = [0u64, 9, 10, 99, 100, 1_000, 999_999, 1_000_000, 1_700_000_000_000_000];
        for pair in timestamps.windows(2) {
            assert!(frame_file_name(pair[0]) < frame_file_name(pair[1]));
        }
    }

    #[test]
    fn test_out_of_order_writes_list_in_capture_order() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = FrameChannel::new(tmp.path().join("frames"));
        channel.init().unwrap();

        channel.write_frame(1000, b"b");
        channel.write_frame(500, b"a");
        channel.write_frame(1500, b"c");

        assert_eq!(
            listing(channel.host_dir()),
            vec![
                "frame0000000000000500.jpg",
                "frame0000000000001000.jpg",
                "frame0000000000001500.jpg",
            ]
        );
        assert_eq!(channel.frame_count(), 3);
        let first = std::fs::read(channel.host_dir().join("frame0000000000000500.jpg")).unwrap();
        assert_eq!(first, b"a");
    }

    #[test]
    fn test_init_clears_leftovers_and_resets_count() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("frames");
        std::fs::create_dir_all(dir.join("nested")).unwrap();
        std::fs::write(dir.join("frame0000000000000001.jpg"), b"old").unwrap();
        std::fs::write(dir.join(END_OF_STREAM_FILE), b"").unwrap();

        let channel = FrameChannel::new(&dir);
        channel.write_frame(1, b"ignored");
        channel.init().unwrap();
        assert!(listing(&dir).is_empty());
        assert_eq!(channel.frame_count(), 0);

        // Second init is harmless
        channel.write_frame(2, b"x");
        channel.init().unwrap();
        assert_eq!(channel.frame_count(), 0);
        assert!(channel.is_active());
    }

    #[test]
    fn test_end_of_stream_is_empty_file() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = FrameChannel::new(tmp.path().join("frames"));
        channel.init().unwrap();
        channel.write_end_of_stream();

        let meta = std::fs::metadata(channel.host_dir().join(END_OF_STREAM_FILE)).unwrap();
        assert_eq!(meta.len(), 0);
    }

    #[test]
    fn test_cleanup_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let channel = FrameChannel::new(tmp.path().join("frames"));
        channel.init().unwrap();
        channel.write_frame(1, b"x");
        channel.write_end_of_stream();

        channel.cleanup();
        assert!(!channel.host_dir().exists());
        assert!(!channel.is_active());

        // Repeated teardown calls must not fail
        channel.cleanup();
        channel.write_end_of_stream();
    }

    #[test]
    fn test_write_after_cleanup_is_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let stats = create_shared_stats();
        let channel = FrameChannel::new(tmp.path().join("frames")).with_stats(stats.clone());
        channel.init().unwrap();
        channel.write_frame(1, b"x");
        channel.cleanup();

        channel.write_frame(2, b"y");
        assert!(!channel.host_dir().exists());
        assert_eq!(channel.frame_count(), 1);

        let snapshot = stats.stats();
        assert_eq!(snapshot.frames_written, 1);
        assert_eq!(snapshot.frames_dropped, 1);
    }
}
