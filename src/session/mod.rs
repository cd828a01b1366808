//! Resumable download session: checkpoint persistence, cache-directory
//! layout, and the accumulated cookie map.
//!
//! Each output file owns a cache directory (`<outfile>.download/`) holding
//! `session.json` plus one `<index>.seg` file per completed segment. A
//! `.seg` file's presence is trusted as proof of a complete download; all
//! writes into the cache are staged under a temporary name and atomically
//! renamed into place, so a crash never leaves a file that looks complete
//! but is not.

mod cookies;

pub use cookies::{capture_cookies, cookie_header};

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::playlist::Playlist;

/// Checkpoint file name inside the cache directory.
pub const SESSION_FILE: &str = "session.json";

/// Extension of completed segment cache files.
const SEGMENT_EXTENSION: &str = "seg";

/// Suffix appended to staged (incomplete) cache writes.
const STAGING_SUFFIX: &str = "part";

/// Errors produced by session persistence and cache management.
#[derive(Debug, Error)]
pub enum SessionError {
    /// I/O error touching the cache directory or checkpoint file.
    #[error("IO error at {path}: {source}")]
    Io {
        /// The path where the error occurred.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Checkpoint (de)serialization error.
    #[error("checkpoint serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl SessionError {
    /// Creates an IO error with path context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// How finished segments are turned into the output file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssemblyMode {
    /// Concatenate cache files once everything is downloaded.
    Direct,
    /// Append each segment to the output as soon as its turn comes, while
    /// downloading continues. Required for livestreams so the partial file
    /// stays playable.
    LiveIncremental,
    /// Stream the concatenated segments through an external transcoder.
    ExternalTranscode,
}

/// The persisted unit of resumable state.
///
/// Serialized verbatim as `session.json`; loading a checkpoint and resuming
/// must reproduce an identical playlist and header/cookie set, so field
/// names here are the external format.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DownloadSession {
    /// Request headers with lower-cased names.
    pub headers: BTreeMap<String, String>,

    /// The resolved media-playlist URL.
    pub m3u_url: String,

    /// True when the source is a still-running broadcast.
    #[serde(default)]
    pub livestream: bool,

    /// The resolved playlist; absent until resolution completes once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub playlist: Option<Playlist>,

    /// Cookies accumulated during resolution and tailing.
    #[serde(default)]
    pub cookies: BTreeMap<String, String>,

    /// Incremental assembly requested.
    #[serde(default)]
    pub live_assemble: bool,

    /// Pipe segments through the external transcoder.
    #[serde(default)]
    pub ffmpeg: bool,

    /// Keep the cache directory after a successful run.
    #[serde(default)]
    pub keep_cache: bool,
}

impl DownloadSession {
    /// The assembly mode implied by the session flags.
    ///
    /// The transcoder flag wins; otherwise livestreams always assemble
    /// incrementally so the partial output stays playable.
    #[must_use]
    pub fn assembly_mode(&self) -> AssemblyMode {
        if self.ffmpeg {
            AssemblyMode::ExternalTranscode
        } else if self.live_assemble || self.livestream {
            AssemblyMode::LiveIncremental
        } else {
            AssemblyMode::Direct
        }
    }

    /// Loads a checkpoint from the cache directory if one exists.
    ///
    /// Segment indices inside the restored playlist are renumbered to their
    /// positions.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on unreadable or malformed checkpoint files.
    /// A missing file is `Ok(None)`, not an error.
    #[instrument(skip(cache), fields(path = %cache.session_path().display()))]
    pub fn load(cache: &CacheDir) -> Result<Option<Self>, SessionError> {
        let path = cache.session_path();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SessionError::io(path, e)),
        };
        let mut session: Self = serde_json::from_str(&text)?;
        if let Some(playlist) = session.playlist.as_mut() {
            playlist.renumber();
        }
        debug!("loaded checkpoint");
        Ok(Some(session))
    }

    /// Persists the session to the cache directory.
    ///
    /// Written to a staged temporary name and renamed into place.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] on serialization or I/O failure.
    #[instrument(skip(self, cache), fields(path = %cache.session_path().display()))]
    pub fn save(&self, cache: &CacheDir) -> Result<(), SessionError> {
        let path = cache.session_path();
        let staging = path.with_extension("json.part");
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&staging, text).map_err(|e| SessionError::io(&staging, e))?;
        fs::rename(&staging, &path).map_err(|e| SessionError::io(&path, e))?;
        debug!("checkpoint written");
        Ok(())
    }
}

/// The cache directory owned by one download.
#[derive(Debug, Clone)]
pub struct CacheDir {
    root: PathBuf,
}

impl CacheDir {
    /// Derives the cache directory for an output file: `<outfile>.download/`.
    #[must_use]
    pub fn for_output(outfile: &Path) -> Self {
        let mut name = outfile.as_os_str().to_os_string();
        name.push(".download");
        Self {
            root: PathBuf::from(name),
        }
    }

    /// Creates a cache directory at an explicit path.
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The cache directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates the directory if it does not exist yet.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Io`] on failure.
    pub fn ensure(&self) -> Result<(), SessionError> {
        fs::create_dir_all(&self.root).map_err(|e| SessionError::io(&self.root, e))
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn session_path(&self) -> PathBuf {
        self.root.join(SESSION_FILE)
    }

    /// Final path of a completed segment: `<index>.seg`.
    #[must_use]
    pub fn segment_path(&self, index: usize) -> PathBuf {
        self.root.join(format!("{index}.{SEGMENT_EXTENSION}"))
    }

    /// Staging path for an in-progress segment write: `<index>.seg.part`.
    #[must_use]
    pub fn staging_path(&self, index: usize) -> PathBuf {
        self.root
            .join(format!("{index}.{SEGMENT_EXTENSION}.{STAGING_SUFFIX}"))
    }

    /// Whether a segment is already cached.
    ///
    /// A present file is trusted as a complete download, with one cheap
    /// guard: zero-byte files are treated as absent so a truncated cache
    /// entry gets re-fetched on resume.
    #[must_use]
    pub fn has_segment(&self, index: usize) -> bool {
        fs::metadata(self.segment_path(index)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    /// Deletes the cache directory and everything in it.
    ///
    /// Best-effort: failure is logged, not fatal, since the download itself
    /// already succeeded when this runs.
    pub fn remove(&self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != ErrorKind::NotFound {
                warn!(path = %self.root.display(), error = %e, "failed to remove cache directory");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::playlist::Segment;

    fn sample_session() -> DownloadSession {
        let mut playlist = Playlist::default();
        playlist
            .tags
            .insert("EXT-X-TARGETDURATION".to_string(), "6".to_string());
        playlist
            .segments
            .push(Segment::new("https://example.com/0.ts", 0));
        playlist
            .segments
            .push(Segment::new("https://example.com/1.ts", 1));

        let mut session = DownloadSession {
            m3u_url: "https://example.com/playlist.m3u8".to_string(),
            livestream: true,
            playlist: Some(playlist),
            ..DownloadSession::default()
        };
        session
            .headers
            .insert("user-agent".to_string(), "test".to_string());
        session
            .cookies
            .insert("auth".to_string(), "token".to_string());
        session
    }

    #[test]
    fn test_checkpoint_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        let session = sample_session();

        session.save(&cache).unwrap();
        let restored = DownloadSession::load(&cache).unwrap().unwrap();

        assert_eq!(restored, session);
        let playlist = restored.playlist.unwrap();
        assert_eq!(playlist.segments[1].index, 1);
    }

    #[test]
    fn test_checkpoint_uses_external_field_names() {
        let session = sample_session();
        let value: serde_json::Value = serde_json::to_value(&session).unwrap();
        assert!(value.get("m3u_url").is_some());
        assert!(value.get("headers").is_some());
        assert!(value.get("cookies").is_some());
        assert!(value.get("livestream").is_some());
        let playlist = value.get("playlist").unwrap();
        assert!(playlist.get("meta").is_some());
        let tracks = playlist.get("tracks").unwrap().as_array().unwrap();
        assert_eq!(tracks.len(), 2);
        assert!(tracks[0].get("url").is_some());
        assert!(tracks[0].get("meta").is_some());
    }

    #[test]
    fn test_load_missing_checkpoint_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        assert!(DownloadSession::load(&cache).unwrap().is_none());
    }

    #[test]
    fn test_load_malformed_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        fs::write(cache.session_path(), "{not json").unwrap();
        assert!(DownloadSession::load(&cache).is_err());
    }

    #[test]
    fn test_save_leaves_no_staging_file() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        sample_session().save(&cache).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".part"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_cache_dir_for_output_appends_download_suffix() {
        let cache = CacheDir::for_output(Path::new("/tmp/show.mp4"));
        assert_eq!(cache.path(), Path::new("/tmp/show.mp4.download"));
    }

    #[test]
    fn test_segment_paths() {
        let cache = CacheDir::at("/tmp/x.download");
        assert_eq!(cache.segment_path(7), PathBuf::from("/tmp/x.download/7.seg"));
        assert_eq!(
            cache.staging_path(7),
            PathBuf::from("/tmp/x.download/7.seg.part")
        );
    }

    #[test]
    fn test_has_segment_rejects_empty_files() {
        let dir = tempfile::tempdir().unwrap();
        let cache = CacheDir::at(dir.path());
        assert!(!cache.has_segment(0));
        fs::write(cache.segment_path(0), b"").unwrap();
        assert!(!cache.has_segment(0));
        fs::write(cache.segment_path(0), b"data").unwrap();
        assert!(cache.has_segment(0));
    }

    #[test]
    fn test_assembly_mode_selection() {
        let mut session = DownloadSession::default();
        assert_eq!(session.assembly_mode(), AssemblyMode::Direct);
        session.live_assemble = true;
        assert_eq!(session.assembly_mode(), AssemblyMode::LiveIncremental);
        session.live_assemble = false;
        session.livestream = true;
        assert_eq!(session.assembly_mode(), AssemblyMode::LiveIncremental);
        session.ffmpeg = true;
        assert_eq!(session.assembly_mode(), AssemblyMode::ExternalTranscode);
    }
}
