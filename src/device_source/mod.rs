//! DeviceSource - Simulated camera
//!
//! ## Responsibilities
//!
//! - Enumerate the source image directory on connect
//! - Hand out frames in lexicographic, cyclic order
//!
//! The file list is scanned only on `connect()`; the order is stable until
//! the next reconnect.

use crate::error::{Error, Result};
use crate::models::Frame;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

/// Recognised image extensions (compared case-insensitively)
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

/// A listed file: display name plus the path as read from the directory
#[derive(Debug, Clone)]
struct SourceFile {
    name: String,
    path: PathBuf,
}

#[derive(Debug, Default)]
struct SourceState {
    connected: bool,
    files: Vec<SourceFile>,
    cursor: usize,
    captures: u64,
}

/// DeviceSource instance
pub struct DeviceSource {
    device_id: u32,
    images_dir: PathBuf,
    state: Mutex<SourceState>,
}

impl DeviceSource {
    /// Create new DeviceSource rooted at `images_dir`
    pub fn new(device_id: u32, images_dir: impl Into<PathBuf>) -> Self {
        Self {
            device_id,
            images_dir: images_dir.into(),
            state: Mutex::new(SourceState::default()),
        }
    }

    /// Scan the directory and mark the source connected
    ///
    /// An empty directory still connects; captures then yield no frame.
    pub async fn connect(&self) -> Result<bool> {
        tracing::info!(
            device_id = self.device_id,
            images_dir = %self.images_dir.display(),
            "Connecting to camera"
        );

        fs::create_dir_all(&self.images_dir).await?;

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.images_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if is_image_file(&name) {
                files.push(SourceFile {
                    name,
                    path: entry.path(),
                });
            }
        }
        files.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));

        if files.is_empty() {
            tracing::warn!(images_dir = %self.images_dir.display(), "No image files found");
        } else {
            tracing::info!(
                count = files.len(),
                images_dir = %self.images_dir.display(),
                "Found images"
            );
        }

        let mut state = self.state.lock().await;
        *state = SourceState {
            connected: true,
            files,
            cursor: 0,
            captures: 0,
        };

        Ok(true)
    }

    /// Mark the source disconnected
    pub async fn disconnect(&self) {
        tracing::info!(device_id = self.device_id, "Disconnecting from camera");
        self.state.lock().await.connected = false;
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.connected
    }

    /// Number of images found by the last connect
    pub async fn image_count(&self) -> usize {
        self.state.lock().await.files.len()
    }

    /// Return the frame at the cursor and advance it modulo the file count
    ///
    /// `Ok(None)` means no images are available, which is not an error.
    pub async fn capture(&self) -> Result<Option<Frame>> {
        let mut state = self.state.lock().await;

        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.files.is_empty() {
            tracing::warn!("No images available for capture");
            return Ok(None);
        }

        let position = state.cursor;
        let SourceFile { name: filename, path } = state.files[position].clone();
        state.cursor = (position + 1) % state.files.len();
        let sequence_index = state.captures;
        state.captures += 1;

        tracing::info!(
            filename = %filename,
            index = position,
            sequence_index = sequence_index,
            "Captured frame"
        );

        Ok(Some(Frame {
            sequence_index,
            source_path: path,
            filename,
            captured_at: Utc::now(),
        }))
    }
}

fn is_image_file(name: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    async fn next_name(source: &DeviceSource) -> String {
        source.capture().await.unwrap().unwrap().filename
    }

    fn touch(dir: &Path, name: &str) {
        std::fs::write(dir.join(name), b"x").unwrap();
    }

    #[tokio::test]
    async fn test_capture_before_connect() {
        let dir = tempfile::tempdir().unwrap();
        let source = DeviceSource::new(0, dir.path());
        assert!(matches!(source.capture().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_empty_directory_connects() {
        let dir = tempfile::tempdir().unwrap();
        let source = DeviceSource::new(0, dir.path().join("missing"));
        assert!(source.connect().await.unwrap());
        assert!(source.is_connected().await);
        assert!(source.capture().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lexicographic_cyclic_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["c.png", "a.jpg", "b.JPEG", "notes.txt"] {
            touch(dir.path(), name);
        }
        std::fs::create_dir(dir.path().join("sub.jpg")).unwrap();

        let source = DeviceSource::new(0, dir.path());
        source.connect().await.unwrap();
        assert_eq!(source.image_count().await, 3);

        let mut seen = Vec::new();
        for _ in 0..7 {
            seen.push(next_name(&source).await);
        }
        assert_eq!(
            seen,
            vec!["a.jpg", "b.JPEG", "c.png", "a.jpg", "b.JPEG", "c.png", "a.jpg"]
        );
    }

    #[tokio::test]
    async fn test_visit_counts_are_floor_or_ceil() {
        let dir = tempfile::tempdir().unwrap();
        let names = ["1.jpg", "2.jpg", "3.jpg", "4.jpg"];
        for name in names {
            touch(dir.path(), name);
        }
        let source = DeviceSource::new(0, dir.path());
        source.connect().await.unwrap();

        let n = names.len();
        for k in 0..9 {
            source.connect().await.unwrap();
            let total = n + k;
            let mut counts: HashMap<String, usize> = HashMap::new();
            for _ in 0..total {
                *counts.entry(next_name(&source).await).or_default() += 1;
            }
            let floor = total / n;
            let ceil = (total + n - 1) / n;
            for name in names {
                let c = counts.get(name).copied().unwrap_or(0);
                assert!(c == floor || c == ceil, "{} visited {} times", name, c);
            }
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_name_keeps_real_path() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let raw = OsStr::from_bytes(b"part_\xff.png");
        std::fs::write(dir.path().join(raw), b"x").unwrap();

        let source = DeviceSource::new(0, dir.path());
        source.connect().await.unwrap();
        let frame = source.capture().await.unwrap().unwrap();

        assert_eq!(frame.filename, "part_\u{FFFD}.png");
        assert_eq!(frame.source_path, dir.path().join(raw));
        assert!(frame.source_path.exists());
    }

    #[tokio::test]
    async fn test_disconnect_and_reconnect_restarts() {
        let dir = tempfile::tempdir().unwrap();
        touch(dir.path(), "a.jpg");
        touch(dir.path(), "b.jpg");

        let source = DeviceSource::new(0, dir.path());
        source.connect().await.unwrap();
        assert_eq!(next_name(&source).await, "a.jpg");

        source.disconnect().await;
        assert!(matches!(source.capture().await, Err(Error::NotConnected)));

        touch(dir.path(), "0.jpg");
        source.connect().await.unwrap();
        let frame = source.capture().await.unwrap().unwrap();
        assert_eq!(frame.filename, "0.jpg");
        assert_eq!(frame.sequence_index, 0);
        assert_eq!(frame.source_path, dir.path().join("0.jpg"));
    }
}
