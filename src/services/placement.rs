//! Placement of uploaded bytes under their content address.
//!
//! Bytes are written to an `upload-*` temp file inside the destination
//! directory, fingerprinted on the way, then either discarded (an object with
//! the same digest already exists) or renamed onto `<digest><ext>`. The
//! temp file shares the final directory so the rename never crosses a
//! filesystem boundary.

use crate::services::{
    file_service::FileError,
    fingerprint::{CopyError, Fingerprint, FingerprintWriter},
};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    time::{Duration, SystemTime},
};
use tokio::{
    fs::{self, DirBuilder, File, OpenOptions},
    io::AsyncRead,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name prefix of in-flight temp files.
pub const TEMP_PREFIX: &str = "upload-";

/// Mode applied to newly created date directories.
#[cfg(unix)]
const DIR_MODE: u32 = 0o755;

/// How a placement finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlacementOutcome {
    /// The temp file was renamed into place.
    Stored,
    /// A regular file with the same name already existed; nothing was renamed.
    Deduplicated { modified: SystemTime },
}

#[derive(Debug, Clone)]
pub struct Placement {
    /// `<digest><ext>`
    pub filename: String,
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub outcome: PlacementOutcome,
}

#[derive(Clone, Debug)]
pub struct PlacementEngine {
    upload_dir: PathBuf,
}

impl PlacementEngine {
    pub fn new(upload_dir: impl Into<PathBuf>) -> Self {
        Self {
            upload_dir: upload_dir.into(),
        }
    }

    /// Write `header` followed by `rest` under `<upload_dir>/<date_path>`.
    ///
    /// `limit` caps the total bytes written; `None` streams without a cap.
    /// Every failure after the temp file exists removes it before returning.
    pub async fn place<R>(
        &self,
        date_path: &str,
        extension: &str,
        header: &[u8],
        rest: &mut R,
        limit: Option<u64>,
    ) -> Result<Placement, FileError>
    where
        R: AsyncRead + Unpin,
    {
        let dir = self.upload_dir.join(date_path);
        create_dir(&dir).await.map_err(FileError::IoWrite)?;

        let (tmp_path, file) = create_temp(&dir).await?;

        let fingerprint = match write_temp(file, header, rest, limit).await {
            Ok(fingerprint) => fingerprint,
            Err(err) => {
                discard(&tmp_path).await;
                return Err(err);
            }
        };

        let filename = format!("{}{}", fingerprint.digest, extension);
        let final_path = dir.join(&filename);

        match fs::metadata(&final_path).await {
            Ok(meta) if meta.is_file() => {
                discard(&tmp_path).await;
                let modified = meta.modified().map_err(FileError::IoStat)?;
                debug!("{} already stored, dropped duplicate upload", final_path.display());
                return Ok(Placement {
                    filename,
                    path: final_path,
                    fingerprint,
                    outcome: PlacementOutcome::Deduplicated { modified },
                });
            }
            // Something other than a regular file; the rename reports it.
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                discard(&tmp_path).await;
                return Err(FileError::IoStat(err));
            }
        }

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            discard(&tmp_path).await;
            return Err(FileError::IoRename(err));
        }

        debug!(
            "stored {} ({} bytes)",
            final_path.display(),
            fingerprint.bytes_written
        );
        Ok(Placement {
            filename,
            path: final_path,
            fingerprint,
            outcome: PlacementOutcome::Stored,
        })
    }

    /// Write, sync and remove a small temp file at the upload root.
    pub async fn check_writable(&self) -> Result<(), FileError> {
        create_dir(&self.upload_dir).await.map_err(FileError::IoWrite)?;
        let (tmp_path, file) = create_temp(&self.upload_dir).await?;
        let mut empty: &[u8] = &[];
        let written = write_temp(file, b"ready", &mut empty, None).await;
        discard(&tmp_path).await;
        written.map(|_| ())
    }
}

async fn create_temp(dir: &Path) -> Result<(PathBuf, File), FileError> {
    let tmp_path = dir.join(format!("{TEMP_PREFIX}{}", Uuid::new_v4().simple()));
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .await
        .map_err(FileError::IoWrite)?;
    Ok((tmp_path, file))
}

async fn create_dir(dir: &Path) -> io::Result<()> {
    let mut builder = DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    builder.mode(DIR_MODE);
    builder.create(dir).await
}

async fn write_temp<R>(
    file: File,
    header: &[u8],
    rest: &mut R,
    limit: Option<u64>,
) -> Result<Fingerprint, FileError>
where
    R: AsyncRead + Unpin,
{
    if let Some(max) = limit {
        if header.len() as u64 > max {
            return Err(FileError::SizeExceeded { max });
        }
    }

    let mut writer = FingerprintWriter::new(file);
    writer.write_all(header).await.map_err(FileError::IoWrite)?;
    writer
        .copy_from(rest, limit)
        .await
        .map_err(|err| match err {
            CopyError::Read(err) => FileError::IoRead(err),
            CopyError::Write(err) => FileError::IoWrite(err),
            CopyError::LimitExceeded { limit } => FileError::SizeExceeded { max: limit },
        })?;

    let (fingerprint, file) = writer.finish().await.map_err(FileError::IoWrite)?;
    file.sync_all().await.map_err(FileError::IoWrite)?;
    Ok(fingerprint)
}

/// Best-effort temp removal.
async fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path).await {
        warn!("failed to remove temp file {}: {}", path.display(), err);
    }
}

/// Remove `upload-*` files under `root` whose mtime is older than `max_age`.
///
/// Such files only survive a crash mid-write. Returns how many were removed.
pub async fn sweep_orphans(root: &Path, max_age: Duration) -> io::Result<usize> {
    let cutoff = SystemTime::now()
        .checked_sub(max_age)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => continue,
            Err(err) => return Err(err),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            if file_type.is_dir() {
                pending.push(entry.path());
                continue;
            }
            if !file_type.is_file() || !entry.file_name().to_string_lossy().starts_with(TEMP_PREFIX) {
                continue;
            }
            let modified = entry.metadata().await?.modified()?;
            if modified > cutoff {
                continue;
            }
            match fs::remove_file(entry.path()).await {
                Ok(()) => {
                    info!("removed orphaned temp file {}", entry.path().display());
                    removed += 1;
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => return Err(err),
            }
        }
    }

    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use tempfile::TempDir;
    use tokio::io::ReadBuf;

    /// Yields one chunk, then fails.
    struct BrokenStream {
        served: bool,
    }

    impl AsyncRead for BrokenStream {
        fn poll_read(
            mut self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            if self.served {
                return Poll::Ready(Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")));
            }
            self.served = true;
            buf.put_slice(&[0xAB; 64]);
            Poll::Ready(Ok(()))
        }
    }

    fn names_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .map(|entries| {
                entries
                    .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }

    #[tokio::test]
    async fn writable_check_leaves_nothing_behind() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path().join("fresh"));

        engine.check_writable().await.unwrap();

        assert!(root.path().join("fresh").is_dir());
        assert!(names_in(&root.path().join("fresh")).is_empty());
    }

    #[tokio::test]
    async fn writable_check_reports_unwritable_root() {
        let root = TempDir::new().unwrap();
        let blocker = root.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();
        let engine = PlacementEngine::new(blocker.join("uploads"));

        let err = engine.check_writable().await.unwrap_err();

        assert!(matches!(err, FileError::IoWrite(_)));
    }

    #[tokio::test]
    async fn stores_under_digest_name() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());
        let mut rest: &[u8] = b" body";

        let placement = engine
            .place("2024/01", ".png", b"head", &mut rest, None)
            .await
            .unwrap();

        let digest = format!("{:x}", md5::compute(b"head body"));
        assert_eq!(placement.outcome, PlacementOutcome::Stored);
        assert_eq!(placement.filename, format!("{digest}.png"));
        assert_eq!(placement.path, root.path().join("2024/01").join(&placement.filename));
        assert_eq!(std::fs::read(&placement.path).unwrap(), b"head body");
        assert_eq!(names_in(&root.path().join("2024/01")), vec![placement.filename]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn date_directories_are_world_readable() {
        use std::os::unix::fs::PermissionsExt;

        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());
        let mut rest: &[u8] = b"";
        engine.place("2024/02", ".gif", b"GIF8", &mut rest, None).await.unwrap();

        let mode = std::fs::metadata(root.path().join("2024/02"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o022, 0);
        assert_eq!(mode & 0o700, 0o700);
    }

    #[tokio::test]
    async fn duplicate_keeps_original_file() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());

        let mut rest: &[u8] = b"";
        let first = engine.place("2024/01", ".png", b"same", &mut rest, None).await.unwrap();
        let original_mtime = std::fs::metadata(&first.path).unwrap().modified().unwrap();

        let mut rest: &[u8] = b"";
        let second = engine.place("2024/01", ".png", b"same", &mut rest, None).await.unwrap();

        assert_eq!(second.path, first.path);
        assert_eq!(
            second.outcome,
            PlacementOutcome::Deduplicated { modified: original_mtime }
        );
        assert_eq!(names_in(&root.path().join("2024/01")).len(), 1);
    }

    #[tokio::test]
    async fn read_failure_leaves_nothing_behind() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());
        let mut rest = BrokenStream { served: false };

        let err = engine
            .place("2024/01", ".png", b"\x89PNG", &mut rest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::IoRead(_)));
        assert!(names_in(&root.path().join("2024/01")).is_empty());
    }

    #[tokio::test]
    async fn limit_overrun_removes_temp_file() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());
        let payload = vec![7u8; 4096];
        let mut rest = payload.as_slice();

        let err = engine
            .place("2024/01", ".png", b"\x89PNG", &mut rest, Some(1024))
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::SizeExceeded { max: 1024 }));
        assert!(names_in(&root.path().join("2024/01")).is_empty());
    }

    #[tokio::test]
    async fn rename_failure_removes_temp_file() {
        let root = TempDir::new().unwrap();
        let engine = PlacementEngine::new(root.path());
        let digest = format!("{:x}", md5::compute(b"blocked"));
        let blocker = root.path().join("2024/01").join(format!("{digest}.png"));
        std::fs::create_dir_all(&blocker).unwrap();
        std::fs::write(blocker.join("keep"), b"x").unwrap();

        let mut rest: &[u8] = b"";
        let err = engine
            .place("2024/01", ".png", b"blocked", &mut rest, None)
            .await
            .unwrap_err();

        assert!(matches!(err, FileError::IoRename(_)));
        assert_eq!(names_in(&root.path().join("2024/01")), vec![format!("{digest}.png")]);
        assert!(blocker.is_dir());
    }

    #[tokio::test]
    async fn sweep_removes_only_stale_temp_files() {
        let root = TempDir::new().unwrap();
        let dir = root.path().join("2023/12");
        std::fs::create_dir_all(&dir).unwrap();

        let stale = dir.join("upload-stale");
        let fresh = dir.join("upload-fresh");
        let stored = dir.join("0123456789abcdef0123456789abcdef.png");
        for path in [&stale, &fresh, &stored] {
            std::fs::write(path, b"x").unwrap();
        }
        let two_hours_ago = SystemTime::now() - Duration::from_secs(7200);
        for path in [&stale, &stored] {
            std::fs::File::options()
                .write(true)
                .open(path)
                .unwrap()
                .set_modified(two_hours_ago)
                .unwrap();
        }

        let removed = sweep_orphans(root.path(), Duration::from_secs(3600)).await.unwrap();

        assert_eq!(removed, 1);
        assert!(!stale.exists());
        assert!(fresh.exists());
        assert!(stored.exists());
    }

    #[tokio::test]
    async fn sweep_tolerates_missing_root() {
        let root = TempDir::new().unwrap();
        let missing = root.path().join("never-created");
        assert_eq!(sweep_orphans(&missing, Duration::ZERO).await.unwrap(), 0);
    }
}
