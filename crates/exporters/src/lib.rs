//! Timeline → single-file composition.
//!
//! Converts the track/action data into per-kind segment lists (video
//! clips concatenated with black fillers for gaps, audio clips time-delayed
//! and mixed) and assembles the ffmpeg invocation that renders them into
//! one output file. A source with no entry in the asset map fails that
//! export job with a distinct error so the caller can say "missing asset"
//! rather than a generic failure.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use timeline::{media_time, video_at, ActionKind, TimelineModel};

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("missing asset for source {src}")]
    MissingAsset { src: String },
    #[error("ffmpeg not found on PATH")]
    ToolMissing,
    #[error("ffmpeg failed with exit code {code:?}")]
    Failed { code: Option<i32> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// `src -> resolved object key / path` handed in by the caller.
pub type AssetMap = HashMap<String, String>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum VideoSegKind {
    Clip { path: String, start_sec: f64 },
    Black,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoSegment {
    pub kind: VideoSegKind,
    pub duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioClip {
    pub path: String,
    /// Delay from output start to where this clip begins.
    pub delay_sec: f64,
    /// In-point within the source.
    pub start_sec: f64,
    pub duration: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportPlan {
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    pub video_segments: Vec<VideoSegment>,
    pub audio_clips: Vec<AudioClip>,
}

impl ExportPlan {
    /// Build the segment lists from a timeline. Gaps between video clips
    /// become black fillers; where clips overlap, the topmost layer wins
    /// for the whole overlapping interval.
    pub fn build(
        model: &TimelineModel,
        assets: &AssetMap,
        width: u32,
        height: u32,
        fps: f64,
    ) -> Result<Self, ExportError> {
        let total = model.duration();

        // Breakpoints at every video edge; each window maps to exactly one
        // segment.
        let mut points: Vec<f64> = vec![0.0, total];
        for (_, action) in model.actions() {
            if action.kind.is_video() {
                points.push(action.start);
                points.push(action.end);
            }
        }
        points.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        points.dedup_by(|a, b| (*a - *b).abs() < 1e-9);

        let mut video_segments = Vec::new();
        for w in points.windows(2) {
            let (a, b) = (w[0], w[1]);
            if b <= a {
                continue;
            }
            let mid = a + (b - a) / 2.0;
            let kind = match video_at(model, mid) {
                Some(action) => {
                    let src = &action.kind.source().src;
                    let path = assets
                        .get(src)
                        .ok_or_else(|| ExportError::MissingAsset { src: src.clone() })?;
                    VideoSegKind::Clip { path: path.clone(), start_sec: media_time(action, a) }
                }
                None => VideoSegKind::Black,
            };
            video_segments.push(VideoSegment { kind, duration: b - a });
        }

        let mut audio_clips = Vec::new();
        for (_, action) in model.actions() {
            let is_audible = matches!(
                action.kind,
                ActionKind::AudioStandalone { .. } | ActionKind::VideoEmbeddedAudio { .. }
            );
            if !is_audible {
                continue;
            }
            let src = &action.kind.source().src;
            let path = assets
                .get(src)
                .ok_or_else(|| ExportError::MissingAsset { src: src.clone() })?;
            audio_clips.push(AudioClip {
                path: path.clone(),
                delay_sec: action.start,
                start_sec: action.kind.offset(),
                duration: action.duration(),
            });
        }
        audio_clips.sort_by(|a, b| {
            a.delay_sec.partial_cmp(&b.delay_sec).unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(Self { width, height, fps, video_segments, audio_clips })
    }

    pub fn total_duration(&self) -> f64 {
        self.video_segments.iter().map(|s| s.duration).sum()
    }

    /// Assemble the full ffmpeg argument list for this plan.
    pub fn ffmpeg_args(&self, out_path: &str) -> Vec<String> {
        let (w, h) = (self.width, self.height);
        let fps = self.fps.max(1.0) as i32;
        let mut args: Vec<String> = vec!["-y".into()];

        for seg in &self.video_segments {
            match &seg.kind {
                VideoSegKind::Clip { path, start_sec } => {
                    args.push("-ss".into());
                    args.push(format!("{:.3}", start_sec));
                    args.push("-t".into());
                    args.push(format!("{:.3}", seg.duration));
                    args.push("-i".into());
                    args.push(path.clone());
                }
                VideoSegKind::Black => {
                    args.push("-f".into());
                    args.push("lavfi".into());
                    args.push("-t".into());
                    args.push(format!("{:.3}", seg.duration));
                    args.push("-r".into());
                    args.push(format!("{fps}"));
                    args.push("-i".into());
                    args.push(format!("color=black:s={}x{}", w, h));
                }
            }
        }
        let audio_input_start = self.video_segments.len();
        for clip in &self.audio_clips {
            args.push("-ss".into());
            args.push(format!("{:.3}", clip.start_sec));
            args.push("-t".into());
            args.push(format!("{:.3}", clip.duration));
            args.push("-i".into());
            args.push(clip.path.clone());
        }

        let mut filters: Vec<String> = Vec::new();
        let mut vouts: Vec<String> = Vec::new();
        for (i, _) in self.video_segments.iter().enumerate() {
            let out = format!("v{}o", i);
            filters.push(format!(
                "[{}:v]scale={}x{}:flags=lanczos,fps={},format=yuv420p[{}]",
                i, w, h, fps, out
            ));
            vouts.push(format!("[{}]", out));
        }
        if !vouts.is_empty() {
            filters.push(format!("{}concat=n={}:v=1:a=0[vout]", vouts.join(""), vouts.len()));
        }

        let total_s = self.total_duration();
        let mut aouts: Vec<String> = Vec::new();
        for (j, clip) in self.audio_clips.iter().enumerate() {
            let in_idx = audio_input_start + j;
            let out = format!("a{}o", j);
            let delay_ms = (clip.delay_sec * 1000.0).round() as u64;
            filters.push(format!(
                "[{}:a]adelay={}|{},atrim=0:{:.3},aresample=async=1[{}]",
                in_idx, delay_ms, delay_ms, total_s, out
            ));
            aouts.push(format!("[{}]", out));
        }
        let has_audio = !aouts.is_empty();
        if has_audio {
            filters.push(format!(
                "{}amix=inputs={}:normalize=0:duration=longest[aout]",
                aouts.join(""),
                aouts.len()
            ));
        }

        if !filters.is_empty() {
            args.push("-filter_complex".into());
            args.push(filters.join(";"));
        }
        args.push("-map".into());
        args.push("[vout]".into());
        if has_audio {
            args.push("-map".into());
            args.push("[aout]".into());
        } else {
            args.push("-an".into());
        }
        args.push("-pix_fmt".into());
        args.push("yuv420p".into());
        args.push("-c:v".into());
        args.push("libx264".into());
        args.push("-preset".into());
        args.push("medium".into());
        args.push("-movflags".into());
        args.push("+faststart".into());
        args.push("-progress".into());
        args.push("pipe:2".into());
        args.push(out_path.to_string());
        args
    }
}

/// Run the composition, reporting progress in `[0, 1]` as ffmpeg emits it.
pub fn run_export(
    plan: &ExportPlan,
    out_path: &Path,
    mut progress: impl FnMut(f32),
) -> Result<(), ExportError> {
    let ffmpeg = media_io::ffmpeg_path().ok_or(ExportError::ToolMissing)?;
    let args = plan.ffmpeg_args(&out_path.to_string_lossy());
    tracing::info!(?out_path, inputs = plan.video_segments.len(), "starting export");

    let mut child = Command::new(ffmpeg)
        .args(args.iter().map(|s| s.as_str()))
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()?;

    let total_ms = (plan.total_duration() * 1000.0).max(1.0);
    if let Some(stderr) = child.stderr.take() {
        let mut reader = BufReader::new(stderr);
        let mut line = String::new();
        while let Ok(n) = reader.read_line(&mut line) {
            if n == 0 {
                break;
            }
            if let Some((k, v)) = line.trim().split_once('=') {
                if k == "out_time_ms" {
                    // ffmpeg reports microseconds despite the name
                    if let Ok(us) = v.parse::<u64>() {
                        progress(((us as f64 / 1000.0) / total_ms).min(1.0) as f32);
                    }
                }
            }
            line.clear();
        }
    }

    let status = child.wait()?;
    if !status.success() {
        return Err(ExportError::Failed { code: status.code() });
    }
    progress(1.0);
    Ok(())
}
