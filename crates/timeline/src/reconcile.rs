//! Post-edit lane and overlap reconciliation.
//!
//! Runs after every committed change: puts video actions on video lanes and
//! audio actions on audio lanes, re-pairs linked actions onto paired lanes,
//! recomputes layer priority from lane position, sorts each lane, and
//! collapses sub-frame gaps left behind by rounding.

use crate::model::{quantize, ActionId, ActionKind, TimelineModel, TrackKind};

/// Gaps at or below this are treated as rounding noise, not content.
pub const MICRO_GAP_COLLAPSE: f64 = 0.03;

pub fn reconcile(model: &mut TimelineModel) {
    rehome_mismatched_kinds(model);
    repair_linked_lanes(model);
    assign_video_layers(model);
    sort_lanes(model);
    collapse_micro_gaps(model);
    model.debug_invariants();
}

/// Move any action sitting on a lane of the wrong kind to the first lane of
/// its own kind with room; drop nothing.
fn rehome_mismatched_kinds(model: &mut TimelineModel) {
    let mut displaced = Vec::new();
    for track in &mut model.tracks {
        let kind = track.kind;
        let mut i = 0;
        while i < track.actions.len() {
            if track.actions[i].kind.lane_kind() != kind {
                displaced.push(track.actions.remove(i));
            } else {
                i += 1;
            }
        }
    }
    for action in displaced {
        let lanes = model.lanes_of_kind(action.kind.lane_kind());
        let home = lanes
            .iter()
            .copied()
            .find(|&l| model.tracks[l].is_free(action.start, action.end, &[action.id]))
            .or_else(|| lanes.first().copied());
        if let Some(lane) = home {
            model.tracks[lane].actions.push(action);
        }
    }
}

/// The audio half of a pair follows the video half's lane ordinal.
fn repair_linked_lanes(model: &mut TimelineModel) {
    let mut moves: Vec<(ActionId, usize)> = Vec::new();
    for (lane, action) in model.actions() {
        if !matches!(action.kind, ActionKind::VideoEmbeddedAudio { .. }) {
            continue;
        }
        let Some((video_lane, _)) = model.partner_of(action.id) else { continue };
        let Some(target) = model.paired_lane(video_lane) else { continue };
        if target != lane {
            moves.push((action.id, target));
        }
    }
    for (id, target) in moves {
        let Some(from) = model.lane_of(id) else { continue };
        let Some(pos) = model.tracks[from].actions.iter().position(|a| a.id == id) else { continue };
        let action = model.tracks[from].actions[pos].clone();
        if model.tracks[target].is_free(action.start, action.end, &[id]) {
            model.tracks[from].actions.remove(pos);
            model.tracks[target].actions.push(action);
        }
    }
}

/// Layer priority mirrors lane position: the second video lane occludes the
/// first wherever clips overlap in time.
fn assign_video_layers(model: &mut TimelineModel) {
    let video_lanes = model.lanes_of_kind(TrackKind::Video);
    for (ordinal, lane) in video_lanes.into_iter().enumerate() {
        for action in &mut model.tracks[lane].actions {
            if let ActionKind::Video { video_layer, .. } = &mut action.kind {
                *video_layer = ordinal as i32;
            }
        }
    }
}

fn sort_lanes(model: &mut TimelineModel) {
    for track in &mut model.tracks {
        track
            .actions
            .sort_by(|a, b| a.start.partial_cmp(&b.start).unwrap_or(std::cmp::Ordering::Equal));
    }
}

/// Nudge a clip's start back onto its predecessor's end when the gap is
/// rounding noise, pulling the in-point back by the same amount so content
/// stays aligned. Linked partners are kept in step.
fn collapse_micro_gaps(model: &mut TimelineModel) {
    let mut adjustments: Vec<(ActionId, f64)> = Vec::new();
    for track in &model.tracks {
        if track.kind != TrackKind::Video {
            continue;
        }
        for pair in track.actions.windows(2) {
            let gap = pair[1].start - pair[0].end;
            if gap > 0.0 && gap <= MICRO_GAP_COLLAPSE {
                adjustments.push((pair[1].id, pair[0].end));
            }
        }
    }
    for (id, new_start) in adjustments {
        let partner = model.partner_of(id).map(|(_, p)| p.id);
        for target in std::iter::once(id).chain(partner) {
            if let Some(action) = model.find_action_mut(target) {
                let shift = action.start - new_start;
                action.start = quantize(new_start);
                let offset = action.kind.offset();
                action.kind.set_offset(quantize((offset - shift).max(0.0)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionId, SourceRef};

    fn video(start: f64, end: f64) -> Action {
        Action {
            id: ActionId::new(),
            start,
            end,
            kind: ActionKind::Video {
                source: SourceRef::new("a.mp4"),
                offset: 0.5,
                video_layer: 0,
                link_id: None,
            },
        }
    }

    #[test]
    fn micro_gap_is_collapsed() {
        let mut model = TimelineModel::four_lane();
        model.tracks[0].actions.push(video(0.0, 4.0));
        let late = video(4.02, 8.0);
        let late_id = late.id;
        model.tracks[0].actions.push(late);
        reconcile(&mut model);

        let (_, a) = model.find_action(late_id).unwrap();
        assert_eq!(a.start, 4.0);
        assert_eq!(a.end, 8.0);
        // In-point pulled back with the start so the frame at 4.02 still
        // lands at 4.02.
        assert!((a.kind.offset() - 0.48).abs() < 1e-9);
    }

    #[test]
    fn real_gap_is_preserved() {
        let mut model = TimelineModel::four_lane();
        model.tracks[0].actions.push(video(0.0, 4.0));
        let late = video(4.5, 8.0);
        let late_id = late.id;
        model.tracks[0].actions.push(late);
        reconcile(&mut model);
        assert_eq!(model.find_action(late_id).unwrap().1.start, 4.5);
    }

    #[test]
    fn video_layer_follows_lane() {
        let mut model = TimelineModel::four_lane();
        model.tracks[0].actions.push(video(0.0, 4.0));
        model.tracks[1].actions.push(video(0.0, 4.0));
        reconcile(&mut model);
        assert_eq!(model.tracks[0].actions[0].video_layer(), 0);
        assert_eq!(model.tracks[1].actions[0].video_layer(), 1);
    }

    #[test]
    fn audio_on_video_lane_is_rehomed() {
        let mut model = TimelineModel::four_lane();
        let stray = Action {
            id: ActionId::new(),
            start: 0.0,
            end: 2.0,
            kind: ActionKind::AudioStandalone { source: SourceRef::new("a.wav"), offset: 0.0 },
        };
        let stray_id = stray.id;
        model.tracks[0].actions.push(stray);
        reconcile(&mut model);
        let lane = model.lane_of(stray_id).unwrap();
        assert_eq!(model.tracks[lane].kind, TrackKind::Audio);
    }
}
