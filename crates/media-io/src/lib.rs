//! Media resolution and probing.
//!
//! Maps logical source identifiers (plain paths, `file:` URLs, remote URLs)
//! to playable local files, caches duration metadata, and probes stream
//! properties through ffprobe. Everything here degrades instead of failing:
//! a missing tool or unreadable source yields `None`, and the playback
//! engine treats "unknown" as a valid transient state.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaIoError {
    #[error("ffprobe not found on PATH")]
    ProbeToolMissing,
    #[error("probe failed for {path:?}: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaInfo {
    pub kind: MediaKind,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps_num: Option<u32>,
    pub fps_den: Option<u32>,
    pub duration_seconds: Option<f64>,
    pub audio_channels: Option<u32>,
    pub sample_rate: Option<u32>,
}

/// A playable local handle for a logical source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMedia {
    pub path: PathBuf,
}

impl ResolvedMedia {
    pub fn as_str(&self) -> std::borrow::Cow<'_, str> {
        self.path.to_string_lossy()
    }
}

cfg_if::cfg_if! {
    if #[cfg(windows)] {
        const FFPROBE: &str = "ffprobe.exe";
        const FFMPEG: &str = "ffmpeg.exe";
    } else {
        const FFPROBE: &str = "ffprobe";
        const FFMPEG: &str = "ffmpeg";
    }
}

pub fn ffprobe_path() -> Option<PathBuf> {
    which::which(FFPROBE).ok()
}

pub fn ffmpeg_path() -> Option<PathBuf> {
    which::which(FFMPEG).ok()
}

/// Per-origin cache directory for fetched bytes and proxies.
pub fn media_cache_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("driftcut").join("media-cache")
}

/// Turn a `file:` URL or plain path string into a filesystem path.
pub fn source_to_path(src: &str) -> Option<PathBuf> {
    if let Some(rest) = src.strip_prefix("file://") {
        let decoded = percent_decode_str(rest).decode_utf8().ok()?;
        return Some(PathBuf::from(decoded.as_ref()));
    }
    if src.starts_with("http://") || src.starts_with("https://") {
        return None;
    }
    Some(PathBuf::from(src))
}

fn is_remote(src: &str) -> bool {
    src.starts_with("http://") || src.starts_with("https://")
}

/// Stable cache file name for a remote source.
fn cache_file_for(src: &str) -> PathBuf {
    let mut hasher = DefaultHasher::new();
    src.hash(&mut hasher);
    let ext = Path::new(src)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("bin");
    media_cache_dir().join(format!("{:016x}.{ext}", hasher.finish()))
}

/// Local handle for `src`, or `None` while the source is unavailable
/// (remote and not yet fetched, or a path that does not exist).
pub fn resolve_source(src: &str) -> Option<ResolvedMedia> {
    if is_remote(src) {
        let cached = cache_file_for(src);
        return cached.is_file().then_some(ResolvedMedia { path: cached });
    }
    let path = source_to_path(src)?;
    path.is_file().then_some(ResolvedMedia { path })
}

/// Resolves logical sources to playable local files and caches duration
/// metadata. One instance per editor session.
pub struct SourceCache {
    durations: Mutex<HashMap<String, Option<f64>>>,
    warming: Mutex<HashSet<String>>,
}

impl Default for SourceCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SourceCache {
    pub fn new() -> Self {
        Self { durations: Mutex::new(HashMap::new()), warming: Mutex::new(HashSet::new()) }
    }

    pub fn resolve(&self, src: &str) -> Option<ResolvedMedia> {
        resolve_source(src)
    }

    /// Fire-and-forget readiness: fetch remote bytes into the cache dir and
    /// pre-probe the duration so the first tick that needs them doesn't
    /// stall. Repeat calls for a source already warmed are dropped.
    pub fn warm(&self, src: &str) {
        {
            let mut warming = self.warming.lock().unwrap_or_else(|e| e.into_inner());
            if !warming.insert(src.to_string()) {
                return;
            }
        }
        let src = src.to_string();
        std::thread::spawn(move || {
            if is_remote(&src) {
                fetch_remote(&src);
            }
            if let Some(resolved) = resolve_source(&src) {
                let _ = probe_duration(&resolved.path);
            }
        });
    }

    /// Cached duration probe. `None` means "unknown", which callers must
    /// tolerate (fallback durations, black frame until load).
    pub fn duration_sec(&self, src: &str, _kind_hint: MediaKind) -> Option<f64> {
        {
            let durations = self.durations.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(known) = durations.get(src) {
                return *known;
            }
        }
        let probed = self.resolve(src).and_then(|r| probe_duration(&r.path));
        self.durations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(src.to_string(), probed);
        probed
    }

    /// Drop memoized metadata (a restore loads sources that may have been
    /// re-transcoded since they were last probed).
    pub fn clear(&self) {
        self.durations.lock().unwrap_or_else(|e| e.into_inner()).clear();
        self.warming.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// Copy a remote source into the byte cache by letting ffmpeg do the I/O.
fn fetch_remote(src: &str) {
    let target = cache_file_for(src);
    if target.is_file() {
        return;
    }
    let Some(ffmpeg) = ffmpeg_path() else {
        tracing::warn!(src, "cannot fetch remote source: ffmpeg not found");
        return;
    };
    if let Some(dir) = target.parent() {
        let _ = std::fs::create_dir_all(dir);
    }
    let tmp = target.with_extension("part");
    let status = Command::new(ffmpeg)
        .arg("-y")
        .arg("-i")
        .arg(src)
        .arg("-c")
        .arg("copy")
        .arg(&tmp)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status();
    match status {
        Ok(st) if st.success() => {
            if let Err(e) = std::fs::rename(&tmp, &target) {
                tracing::warn!(src, error = %e, "fetched source could not be moved into cache");
            }
        }
        Ok(st) => {
            tracing::warn!(src, code = ?st.code(), "remote fetch failed");
            let _ = std::fs::remove_file(&tmp);
        }
        Err(e) => tracing::warn!(src, error = %e, "remote fetch could not start"),
    }
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    format: Option<FfprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    channels: Option<u32>,
    sample_rate: Option<String>,
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

fn run_ffprobe(path: &Path) -> Result<FfprobeOutput, MediaIoError> {
    let probe = ffprobe_path().ok_or(MediaIoError::ProbeToolMissing)?;
    let out = Command::new(probe)
        .arg("-v")
        .arg("quiet")
        .arg("-print_format")
        .arg("json")
        .arg("-show_streams")
        .arg("-show_format")
        .arg(path)
        .stdin(std::process::Stdio::null())
        .output()?;
    if !out.status.success() {
        return Err(MediaIoError::ProbeFailed {
            path: path.to_path_buf(),
            reason: format!("exit {:?}", out.status.code()),
        });
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

/// Probe stream properties. Errors only when the probe itself cannot run or
/// the file has no usable streams.
pub fn probe_media(path: &Path) -> Result<MediaInfo, MediaIoError> {
    let parsed = run_ffprobe(path)?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));
    let audio = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("audio"));
    if video.is_none() && audio.is_none() {
        return Err(MediaIoError::ProbeFailed {
            path: path.to_path_buf(),
            reason: "no audio or video streams".into(),
        });
    }

    let (fps_num, fps_den) = video
        .and_then(|s| s.r_frame_rate.as_deref())
        .and_then(parse_rate)
        .map_or((None, None), |(n, d)| (Some(n), Some(d)));
    let duration_seconds = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|s| s.duration.as_deref()))
        .or_else(|| audio.and_then(|s| s.duration.as_deref()))
        .and_then(|d| d.parse::<f64>().ok());

    Ok(MediaInfo {
        kind: if video.is_some() { MediaKind::Video } else { MediaKind::Audio },
        width: video.and_then(|s| s.width),
        height: video.and_then(|s| s.height),
        fps_num,
        fps_den,
        duration_seconds,
        audio_channels: audio.and_then(|s| s.channels),
        sample_rate: audio.and_then(|s| s.sample_rate.as_deref()).and_then(|r| r.parse().ok()),
    })
}

/// Duration only, quietly. `None` when the probe is unavailable or the
/// container does not report one.
pub fn probe_duration(path: &Path) -> Option<f64> {
    match probe_media(path) {
        Ok(info) => info.duration_seconds,
        Err(MediaIoError::ProbeToolMissing) => {
            tracing::warn!(?path, "duration unknown: ffprobe missing");
            None
        }
        Err(e) => {
            tracing::warn!(?path, error = %e, "duration probe failed");
            None
        }
    }
}

fn parse_rate(rate: &str) -> Option<(u32, u32)> {
    let (num, den) = rate.split_once('/')?;
    let num: u32 = num.parse().ok()?;
    let den: u32 = den.parse().ok()?;
    (num > 0 && den > 0).then_some((num, den))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_urls_decode_to_paths() {
        let p = source_to_path("file:///tmp/My%20Footage/take%201.mp4").unwrap();
        assert_eq!(p, PathBuf::from("/tmp/My Footage/take 1.mp4"));
    }

    #[test]
    fn plain_paths_pass_through() {
        let p = source_to_path("/data/clip.mov").unwrap();
        assert_eq!(p, PathBuf::from("/data/clip.mov"));
    }

    #[test]
    fn remote_sources_have_no_direct_path() {
        assert!(source_to_path("https://cdn.example.com/a.mp4").is_none());
    }

    #[test]
    fn cache_file_is_stable_per_source() {
        let a = cache_file_for("https://cdn.example.com/a.mp4");
        let b = cache_file_for("https://cdn.example.com/a.mp4");
        let c = cache_file_for("https://cdn.example.com/b.mp4");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("mp4"));
    }

    #[test]
    fn resolve_requires_an_existing_file() {
        let cache = SourceCache::new();
        assert!(cache.resolve("/definitely/not/here.mp4").is_none());

        let tmp = std::env::temp_dir().join("driftcut-resolve-test.bin");
        std::fs::write(&tmp, b"x").unwrap();
        let resolved = cache.resolve(tmp.to_str().unwrap()).unwrap();
        assert_eq!(resolved.path, tmp);
        let _ = std::fs::remove_file(&tmp);
    }

    #[test]
    fn parse_rate_rejects_degenerate_values() {
        assert_eq!(parse_rate("30000/1001"), Some((30000, 1001)));
        assert_eq!(parse_rate("0/0"), None);
        assert_eq!(parse_rate("nonsense"), None);
    }

    #[test]
    fn unknown_duration_is_cached_as_unknown() {
        let cache = SourceCache::new();
        // Missing file: the probe can't run, and the answer memoizes.
        assert_eq!(cache.duration_sec("/nope/missing.mp4", MediaKind::Video), None);
        assert_eq!(cache.duration_sec("/nope/missing.mp4", MediaKind::Video), None);
    }
}
