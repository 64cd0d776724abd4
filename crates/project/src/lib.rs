//! Versioned editor snapshots.
//!
//! A snapshot is the whole persisted editing state: the track/action data,
//! the selection, and the timeline zoom. Loading is all-or-nothing: a
//! version mismatch or parse failure applies nothing. The caller is
//! required to reset its undo/redo history and rebuild playback voices
//! after a successful restore.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use timeline::{quantize, ActionId, TimelineModel};

pub const SNAPSHOT_VERSION: u32 = 1;

pub fn app_data_dir() -> PathBuf {
    let base = dirs::data_local_dir().unwrap_or_else(std::env::temp_dir);
    base.join("driftcut")
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot version {found} is not supported (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
    #[error("snapshot data is invalid: {0}")]
    Corrupt(#[from] timeline::TimelineError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub version: u32,
    pub editor_data: Vec<timeline::Track>,
    pub selected_action_id: Option<ActionId>,
    pub timeline_scale_width: f32,
}

impl Snapshot {
    pub fn capture(
        model: &TimelineModel,
        selected_action_id: Option<ActionId>,
        timeline_scale_width: f32,
    ) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            editor_data: model.tracks.clone(),
            selected_action_id,
            timeline_scale_width,
        }
    }
}

/// What a successful restore hands back to the session. The selection is
/// cleared if its action is not present in the restored data.
#[derive(Debug, Clone)]
pub struct RestoredState {
    pub model: TimelineModel,
    pub selected_action_id: Option<ActionId>,
    pub timeline_scale_width: f32,
}

pub fn save_snapshot_str(snapshot: &Snapshot) -> Result<String, SnapshotError> {
    Ok(serde_json::to_string_pretty(snapshot)?)
}

pub fn save_snapshot(snapshot: &Snapshot, path: &Path) -> Result<(), SnapshotError> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir)?;
    }
    fs::write(path, save_snapshot_str(snapshot)?)?;
    Ok(())
}

pub fn load_snapshot_str(json: &str) -> Result<RestoredState, SnapshotError> {
    // Peek at the version before deserializing the rest, so an unknown
    // future schema fails cleanly instead of half-parsing.
    #[derive(Deserialize)]
    struct VersionOnly {
        version: u32,
    }
    let v: VersionOnly = serde_json::from_str(json)?;
    if v.version != SNAPSHOT_VERSION {
        return Err(SnapshotError::VersionMismatch { found: v.version, expected: SNAPSHOT_VERSION });
    }

    let snapshot: Snapshot = serde_json::from_str(json)?;
    let mut model = TimelineModel { tracks: snapshot.editor_data };
    for track in &mut model.tracks {
        for action in &mut track.actions {
            action.start = quantize(action.start);
            action.end = quantize(action.end);
            action.kind.set_offset(quantize(action.kind.offset()));
        }
    }
    model.validate()?;
    let selected = snapshot
        .selected_action_id
        .filter(|id| model.find_action(*id).is_some());
    Ok(RestoredState {
        model,
        selected_action_id: selected,
        timeline_scale_width: snapshot.timeline_scale_width,
    })
}

pub fn load_snapshot(path: &Path) -> Result<RestoredState, SnapshotError> {
    load_snapshot_str(&fs::read_to_string(path)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline::{auto_place_audio, auto_place_video, SourceRef};

    fn sample_model() -> (TimelineModel, ActionId) {
        let mut model = TimelineModel::four_lane();
        let video = auto_place_video(&mut model, SourceRef::new("clip.mp4"), 8.0).unwrap();
        auto_place_audio(&mut model, SourceRef::new("music.wav"), 12.5).unwrap();
        (model, video)
    }

    #[test]
    fn round_trip_preserves_ranges_offsets_and_links() {
        let (model, selected) = sample_model();
        let snapshot = Snapshot::capture(&model, Some(selected), 512.0);
        let json = save_snapshot_str(&snapshot).unwrap();
        let restored = load_snapshot_str(&json).unwrap();

        assert_eq!(restored.model, model);
        assert_eq!(restored.selected_action_id, Some(selected));
        assert_eq!(restored.timeline_scale_width, 512.0);

        // The linked pair came back as a pair.
        let (_, partner) = restored.model.partner_of(selected).unwrap();
        let (_, video) = restored.model.find_action(selected).unwrap();
        assert_eq!(video.kind.link_id(), partner.kind.link_id());
        assert_eq!(video.start, partner.start);
        assert_eq!(video.end, partner.end);
    }

    #[test]
    fn version_mismatch_is_fatal_and_applies_nothing() {
        let (model, selected) = sample_model();
        let mut snapshot = Snapshot::capture(&model, Some(selected), 512.0);
        snapshot.version = 2;
        let json = save_snapshot_str(&snapshot).unwrap();
        match load_snapshot_str(&json) {
            Err(SnapshotError::VersionMismatch { found: 2, expected: 1 }) => {}
            other => panic!("expected version mismatch, got {other:?}"),
        }
    }

    #[test]
    fn restore_quantizes_drifting_times() {
        let (mut model, _) = sample_model();
        model.tracks[0].actions[0].start = 0.000_4; // sub-quantum noise
        let snapshot = Snapshot::capture(&model, None, 512.0);
        let restored = load_snapshot_str(&save_snapshot_str(&snapshot).unwrap()).unwrap();
        assert_eq!(restored.model.tracks[0].actions[0].start, 0.0);
    }

    #[test]
    fn overlapping_snapshot_data_is_rejected_whole() {
        let (mut model, _) = sample_model();
        // Corrupt the data behind the edit API's back.
        let clash = model.tracks[0].actions[0].clone();
        let mut dup = clash.clone();
        dup.id = ActionId::new();
        model.tracks[0].actions.push(dup);
        let json = save_snapshot_str(&Snapshot::capture(&model, None, 512.0)).unwrap();
        assert!(matches!(load_snapshot_str(&json), Err(SnapshotError::Corrupt(_))));
    }

    #[test]
    fn dangling_selection_is_dropped() {
        let (model, _) = sample_model();
        let snapshot = Snapshot::capture(&model, Some(ActionId::new()), 512.0);
        let restored = load_snapshot_str(&save_snapshot_str(&snapshot).unwrap()).unwrap();
        assert_eq!(restored.selected_action_id, None);
    }
}
