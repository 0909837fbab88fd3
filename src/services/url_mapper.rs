//! Translation between stored file locations and their public URLs.
//!
//! A stored object lives at `<upload_dir>/YYYY/MM/<digest><ext>` and is
//! published as `<base_url>/YYYY/MM/<digest><ext>`. The mapper holds no
//! state beyond those two roots.

use std::path::{Path, PathBuf};

/// Pure value type mapping `(date_path, filename)` pairs to URLs and back.
#[derive(Clone, Debug)]
pub struct UrlMapper {
    upload_dir: PathBuf,
    base_url: String,
}

impl UrlMapper {
    /// `base_url` is expected without a trailing slash; one is stripped if present.
    pub fn new(upload_dir: impl Into<PathBuf>, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            upload_dir: upload_dir.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// `<base_url>/<date_path>/<filename>`
    pub fn to_url(&self, date_path: &str, filename: &str) -> String {
        format!("{}/{}/{}", self.base_url, date_path, filename)
    }

    /// Resolve a public URL back onto the upload directory.
    ///
    /// URLs outside `<base_url>/` are joined verbatim and simply fail the
    /// caller's existence check. No traversal filtering happens here; the
    /// deletion path validates containment itself.
    pub fn to_path(&self, url: &str) -> PathBuf {
        let prefix = format!("{}/", self.base_url);
        let relative = url.strip_prefix(&prefix).unwrap_or(url);
        self.upload_dir.join(relative)
    }
}
