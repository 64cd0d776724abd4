use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Grid all timeline times are held on, in seconds (1 ms).
pub const TIME_QUANTUM: f64 = 0.001;

/// Shortest action the model accepts, in seconds.
pub const MIN_DURATION: f64 = 0.01;

/// Snap a time onto the quantization grid. Idempotent.
pub fn quantize(t: f64) -> f64 {
    (t / TIME_QUANTUM).round() * TIME_QUANTUM
}

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self { Self(Uuid::new_v4()) }
        }

        impl Default for $name {
            fn default() -> Self { Self::new() }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

id_newtype!(ActionId);
id_newtype!(TrackId);
id_newtype!(LinkId);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

/// Reference to playable media. `preview_src` is the transcoded proxy; the
/// playback engine prefers it when present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub src: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview_src: Option<String>,
}

impl SourceRef {
    pub fn new(src: impl Into<String>) -> Self {
        Self { src: src.into(), preview_src: None }
    }

    /// The identifier the playback engine should actually load.
    pub fn playable(&self) -> &str {
        self.preview_src.as_deref().unwrap_or(&self.src)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionKind {
    AudioStandalone {
        source: SourceRef,
        offset: f64,
    },
    Video {
        source: SourceRef,
        offset: f64,
        video_layer: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        link_id: Option<LinkId>,
    },
    /// The audio half of a video clip. Always linked to its video partner.
    VideoEmbeddedAudio {
        source: SourceRef,
        offset: f64,
        link_id: LinkId,
    },
}

impl ActionKind {
    pub fn source(&self) -> &SourceRef {
        match self {
            ActionKind::AudioStandalone { source, .. }
            | ActionKind::Video { source, .. }
            | ActionKind::VideoEmbeddedAudio { source, .. } => source,
        }
    }

    pub fn source_mut(&mut self) -> &mut SourceRef {
        match self {
            ActionKind::AudioStandalone { source, .. }
            | ActionKind::Video { source, .. }
            | ActionKind::VideoEmbeddedAudio { source, .. } => source,
        }
    }

    pub fn offset(&self) -> f64 {
        match self {
            ActionKind::AudioStandalone { offset, .. }
            | ActionKind::Video { offset, .. }
            | ActionKind::VideoEmbeddedAudio { offset, .. } => *offset,
        }
    }

    pub fn set_offset(&mut self, value: f64) {
        let v = value.max(0.0);
        match self {
            ActionKind::AudioStandalone { offset, .. }
            | ActionKind::Video { offset, .. }
            | ActionKind::VideoEmbeddedAudio { offset, .. } => *offset = v,
        }
    }

    pub fn link_id(&self) -> Option<LinkId> {
        match self {
            ActionKind::AudioStandalone { .. } => None,
            ActionKind::Video { link_id, .. } => *link_id,
            ActionKind::VideoEmbeddedAudio { link_id, .. } => Some(*link_id),
        }
    }

    pub fn set_link_id(&mut self, id: LinkId) {
        match self {
            ActionKind::AudioStandalone { .. } => {}
            ActionKind::Video { link_id, .. } => *link_id = Some(id),
            ActionKind::VideoEmbeddedAudio { link_id, .. } => *link_id = id,
        }
    }

    pub fn is_video(&self) -> bool {
        matches!(self, ActionKind::Video { .. })
    }

    pub fn is_audible(&self) -> bool {
        matches!(self, ActionKind::AudioStandalone { .. } | ActionKind::VideoEmbeddedAudio { .. })
    }

    /// Which lane kind this action belongs on.
    pub fn lane_kind(&self) -> TrackKind {
        if self.is_video() { TrackKind::Video } else { TrackKind::Audio }
    }
}

/// A clip placement on a track. `end` is exclusive and strictly greater
/// than `start`; both sit on the quantization grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: ActionId,
    pub start: f64,
    pub end: f64,
    #[serde(flatten)]
    pub kind: ActionKind,
}

impl Action {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }

    pub fn overlaps(&self, start: f64, end: f64) -> bool {
        self.start < end && start < self.end
    }

    pub fn quantized(mut self) -> Self {
        self.start = quantize(self.start);
        self.end = quantize(self.end);
        self
    }

    pub fn video_layer(&self) -> i32 {
        match &self.kind {
            ActionKind::Video { video_layer, .. } => *video_layer,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub kind: TrackKind,
    pub actions: Vec<Action>,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self { id: TrackId::new(), kind, actions: Vec::new() }
    }

    /// Latest `end` on this track, or 0 for an empty lane.
    pub fn tail(&self) -> f64 {
        self.actions.iter().map(|a| a.end).fold(0.0, f64::max)
    }

    /// True if `[start, end)` is free, ignoring the listed actions.
    pub fn is_free(&self, start: f64, end: f64, ignore: &[ActionId]) -> bool {
        self.actions
            .iter()
            .filter(|a| !ignore.contains(&a.id))
            .all(|a| !a.overlaps(start, end))
    }
}

/// The authoritative set of tracks. Read-mostly: the playback engine treats
/// it as a snapshot refreshed once per edit and once per clock tick.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TimelineModel {
    pub tracks: Vec<Track>,
}

impl TimelineModel {
    /// Standard layout: two video lanes on top of two audio lanes.
    /// The second video lane renders above the first.
    pub fn four_lane() -> Self {
        Self {
            tracks: vec![
                Track::new(TrackKind::Video),
                Track::new(TrackKind::Video),
                Track::new(TrackKind::Audio),
                Track::new(TrackKind::Audio),
            ],
        }
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.iter().find(|t| t.id == id)
    }

    pub fn actions(&self) -> impl Iterator<Item = (usize, &Action)> {
        self.tracks
            .iter()
            .enumerate()
            .flat_map(|(ti, t)| t.actions.iter().map(move |a| (ti, a)))
    }

    pub fn find_action(&self, id: ActionId) -> Option<(usize, &Action)> {
        self.actions().find(|(_, a)| a.id == id)
    }

    pub fn find_action_mut(&mut self, id: ActionId) -> Option<&mut Action> {
        self.tracks
            .iter_mut()
            .flat_map(|t| t.actions.iter_mut())
            .find(|a| a.id == id)
    }

    pub fn partner_of(&self, id: ActionId) -> Option<(usize, &Action)> {
        let (_, action) = self.find_action(id)?;
        let link = action.kind.link_id()?;
        self.actions()
            .find(|(_, a)| a.id != id && a.kind.link_id() == Some(link))
    }

    /// Lane index holding the action, if present.
    pub fn lane_of(&self, id: ActionId) -> Option<usize> {
        self.find_action(id).map(|(ti, _)| ti)
    }

    /// Indices of lanes of the given kind, in layout order.
    pub fn lanes_of_kind(&self, kind: TrackKind) -> Vec<usize> {
        self.tracks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.kind == kind)
            .map(|(i, _)| i)
            .collect()
    }

    /// The audio lane paired with a video lane (and vice versa): same
    /// ordinal within its kind group.
    pub fn paired_lane(&self, lane: usize) -> Option<usize> {
        let kind = self.tracks.get(lane)?.kind;
        let own = self.lanes_of_kind(kind);
        let ordinal = own.iter().position(|&i| i == lane)?;
        let other = match kind {
            TrackKind::Video => self.lanes_of_kind(TrackKind::Audio),
            TrackKind::Audio => self.lanes_of_kind(TrackKind::Video),
        };
        other.get(ordinal).or_else(|| other.last()).copied()
    }

    /// Largest `end` across all tracks.
    pub fn duration(&self) -> f64 {
        self.tracks.iter().map(|t| t.tail()).fold(0.0, f64::max)
    }

    /// Cheap change-detection fingerprint: hashes the serialized model.
    /// Gesture commits compare signatures to decide whether a history
    /// entry is due.
    pub fn signature(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        match serde_json::to_string(self) {
            Ok(s) => s.hash(&mut hasher),
            Err(_) => 0u8.hash(&mut hasher),
        }
        hasher.finish()
    }

    /// Debug-build structural check: overlap-free lanes, positive grid-
    /// aligned durations, paired links. Release builds skip it.
    pub fn debug_invariants(&self) {
        if cfg!(debug_assertions) {
            for track in &self.tracks {
                for (i, a) in track.actions.iter().enumerate() {
                    debug_assert!(a.end > a.start, "empty action {}", a.id);
                    debug_assert!(a.duration() + 1e-9 >= MIN_DURATION, "action below minimum {}", a.id);
                    debug_assert!(a.kind.offset() >= 0.0, "negative in-point {}", a.id);
                    debug_assert!((quantize(a.start) - a.start).abs() < 1e-9, "unquantized start {}", a.id);
                    debug_assert!((quantize(a.end) - a.end).abs() < 1e-9, "unquantized end {}", a.id);
                    for b in &track.actions[i + 1..] {
                        debug_assert!(
                            !a.overlaps(b.start, b.end),
                            "overlap between {} and {}",
                            a.id,
                            b.id
                        );
                    }
                }
            }
            for (_, a) in self.actions() {
                if a.kind.link_id().is_some() {
                    let partner = self.partner_of(a.id);
                    debug_assert!(partner.is_some(), "dangling link on {}", a.id);
                    if let Some((_, p)) = partner {
                        debug_assert!(
                            (p.start - a.start).abs() < 1e-9 && (p.end - a.end).abs() < 1e-9,
                            "linked pair out of step: {} vs {}",
                            a.id,
                            p.id
                        );
                    }
                }
            }
        }
    }
}
