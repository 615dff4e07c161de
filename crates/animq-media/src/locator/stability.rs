//! File stability gate.
//!
//! The renderer may still be flushing an artifact when its path first
//! appears. A candidate is accepted only once its size has stopped changing.

use std::path::Path;
use std::time::Duration;

use tokio::time::Instant;

/// Source of file sizes. `None` means the file is absent or not a regular file.
pub trait SizeProbe: Send + Sync {
    fn size(&self, path: &Path) -> Option<u64>;
}

/// Reads sizes from the filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl SizeProbe for FsProbe {
    fn size(&self, path: &Path) -> Option<u64> {
        std::fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StabilityCheck {
    /// Delay between size reads
    pub interval: Duration,
    /// Consecutive unchanged reads required after the first
    pub required_polls: u32,
}

impl Default for StabilityCheck {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(200),
            required_polls: 3,
        }
    }
}

impl StabilityCheck {
    /// Poll `path` until its size holds steady for `required_polls`
    /// consecutive reads, or until `deadline`.
    ///
    /// Returns false if the file disappears, never stabilizes in time,
    /// or is empty.
    pub async fn wait_stable(&self, probe: &dyn SizeProbe, path: &Path, deadline: Instant) -> bool {
        let mut last: Option<u64> = None;
        let mut unchanged = 0u32;

        loop {
            let Some(size) = probe.size(path) else {
                return false;
            };

            if size > 0 && last == Some(size) {
                unchanged += 1;
                if unchanged >= self.required_polls {
                    return true;
                }
            } else {
                unchanged = 0;
                last = Some(size);
            }

            if Instant::now() + self.interval > deadline {
                return false;
            }
            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a fixed sequence of sizes, repeating the last one.
    struct Scripted {
        sizes: Vec<Option<u64>>,
        reads: AtomicUsize,
        seen: Mutex<Vec<Instant>>,
    }

    impl Scripted {
        fn new(sizes: Vec<Option<u64>>) -> Self {
            Self {
                sizes,
                reads: AtomicUsize::new(0),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl SizeProbe for Scripted {
        fn size(&self, _path: &Path) -> Option<u64> {
            let n = self.reads.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(Instant::now());
            let idx = n.min(self.sizes.len() - 1);
            self.sizes[idx]
        }
    }

    fn far() -> Instant {
        Instant::now() + Duration::from_secs(30)
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepts_after_required_unchanged_reads() {
        let probe = Scripted::new(vec![Some(10), Some(20), Some(30), Some(30), Some(30), Some(30)]);
        let check = StabilityCheck::default();

        assert!(check.wait_stable(&probe, Path::new("a.mp4"), far()).await);
        // 30 first seen on read 3, then three unchanged reads.
        assert_eq!(probe.reads.load(Ordering::SeqCst), 6);

        let seen = probe.seen.lock().unwrap();
        for pair in seen.windows(2) {
            assert!(pair[1] - pair[0] >= check.interval);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_growth_resets_the_count() {
        let probe = Scripted::new(vec![
            Some(5),
            Some(5),
            Some(5),
            Some(9),
            Some(9),
            Some(9),
            Some(9),
        ]);
        let check = StabilityCheck::default();

        assert!(check.wait_stable(&probe, Path::new("a.mp4"), far()).await);
        assert_eq!(probe.reads.load(Ordering::SeqCst), 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_stable_before_deadline() {
        let sizes = (1..=100).map(Some).collect();
        let probe = Scripted::new(sizes);
        let check = StabilityCheck::default();
        let deadline = Instant::now() + Duration::from_secs(2);

        assert!(!check.wait_stable(&probe, Path::new("a.mp4"), deadline).await);
        assert!(Instant::now() <= deadline);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_and_missing_files_rejected() {
        let check = StabilityCheck::default();
        let deadline = Instant::now() + Duration::from_secs(2);

        let empty = Scripted::new(vec![Some(0)]);
        assert!(!check.wait_stable(&empty, Path::new("a.mp4"), deadline).await);

        let vanishing = Scripted::new(vec![Some(10), None]);
        assert!(!check.wait_stable(&vanishing, Path::new("a.mp4"), far()).await);
    }

    #[tokio::test]
    async fn test_fs_probe() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("Demo.mp4");
        assert_eq!(FsProbe.size(&file), None);
        std::fs::write(&file, b"12345").unwrap();
        assert_eq!(FsProbe.size(&file), Some(5));
        assert_eq!(FsProbe.size(dir.path()), None);
    }
}
