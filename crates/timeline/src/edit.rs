//! Discrete edit commands: insertion, auto-placement, split, delete.
//!
//! Invalid commands are rejections, not errors: the model is left untouched
//! and the caller gets `Rejected` back. Nothing on this path panics.

use serde::{Deserialize, Serialize};

use crate::model::{
    quantize, Action, ActionId, ActionKind, LinkId, SourceRef, TimelineModel, TrackKind,
    MIN_DURATION,
};
use crate::reconcile::reconcile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOutcome {
    Applied,
    Rejected,
}

impl EditOutcome {
    pub fn applied(&self) -> bool {
        matches!(self, EditOutcome::Applied)
    }
}

/// Insert `action` into the lane at `lane`, rejecting overlap, bad ranges
/// and kind/lane mismatches.
pub fn insert_action(model: &mut TimelineModel, lane: usize, action: Action) -> EditOutcome {
    let action = action.quantized();
    if action.end - action.start < MIN_DURATION - 1e-9 || action.start < 0.0 {
        return EditOutcome::Rejected;
    }
    if action.kind.offset() < 0.0 {
        return EditOutcome::Rejected;
    }
    let Some(track) = model.tracks.get(lane) else { return EditOutcome::Rejected };
    if track.kind != action.kind.lane_kind() {
        return EditOutcome::Rejected;
    }
    if !track.is_free(action.start, action.end, &[]) {
        return EditOutcome::Rejected;
    }
    model.tracks[lane].actions.push(action);
    reconcile(model);
    EditOutcome::Applied
}

/// Append a video clip at the tail of the first video lane, with an
/// embedded-audio partner on the paired audio lane. Returns the video
/// action's id.
pub fn auto_place_video(
    model: &mut TimelineModel,
    source: SourceRef,
    duration: f64,
) -> Option<ActionId> {
    let duration = quantize(duration.max(MIN_DURATION));
    let video_lane = *model.lanes_of_kind(TrackKind::Video).first()?;
    let audio_lane = model.paired_lane(video_lane)?;
    let start = quantize(model.tracks[video_lane].tail());
    let end = quantize(start + duration);

    let link = LinkId::new();
    let video = Action {
        id: ActionId::new(),
        start,
        end,
        kind: ActionKind::Video {
            source: source.clone(),
            offset: 0.0,
            video_layer: 0,
            link_id: Some(link),
        },
    };
    let id = video.id;
    let audio = Action {
        id: ActionId::new(),
        start,
        end,
        kind: ActionKind::VideoEmbeddedAudio { source, offset: 0.0, link_id: link },
    };

    if !model.tracks[audio_lane].is_free(start, end, &[]) {
        return None;
    }
    model.tracks[video_lane].actions.push(video);
    model.tracks[audio_lane].actions.push(audio);
    reconcile(model);
    Some(id)
}

/// Append a standalone audio clip at the tail of the first audio lane.
pub fn auto_place_audio(
    model: &mut TimelineModel,
    source: SourceRef,
    duration: f64,
) -> Option<ActionId> {
    let duration = quantize(duration.max(MIN_DURATION));
    let lane = *model.lanes_of_kind(TrackKind::Audio).first()?;
    let start = quantize(model.tracks[lane].tail());
    let action = Action {
        id: ActionId::new(),
        start,
        end: quantize(start + duration),
        kind: ActionKind::AudioStandalone { source, offset: 0.0 },
    };
    let id = action.id;
    model.tracks[lane].actions.push(action);
    reconcile(model);
    Some(id)
}

/// Split the action (and its linked partner) at cursor time `t`.
///
/// The left piece keeps the original id and in-point; the right piece gets
/// a fresh id and `offset + (t - start)`. A linked pair is split into two
/// independent pairs with fresh link ids, so later edits to one side no
/// longer couple to the other. No-op unless `t` is strictly interior.
pub fn split_at(model: &mut TimelineModel, id: ActionId, t: f64) -> EditOutcome {
    let t = quantize(t);
    let Some((_, action)) = model.find_action(id) else { return EditOutcome::Rejected };
    if t <= action.start || t >= action.end {
        return EditOutcome::Rejected;
    }
    // Both halves of a pair must stay above minimum length.
    if t - action.start < MIN_DURATION - 1e-9 || action.end - t < MIN_DURATION - 1e-9 {
        return EditOutcome::Rejected;
    }

    let partner = model.partner_of(id).map(|(_, p)| p.id);
    let left_link = partner.map(|_| LinkId::new());
    let right_link = partner.map(|_| LinkId::new());

    split_one(model, id, t, left_link, right_link);
    if let Some(pid) = partner {
        split_one(model, pid, t, left_link, right_link);
    }
    reconcile(model);
    EditOutcome::Applied
}

fn split_one(
    model: &mut TimelineModel,
    id: ActionId,
    t: f64,
    left_link: Option<LinkId>,
    right_link: Option<LinkId>,
) {
    let Some(lane) = model.lane_of(id) else { return };
    let Some(pos) = model.tracks[lane].actions.iter().position(|a| a.id == id) else { return };
    let original = model.tracks[lane].actions[pos].clone();

    let mut left = original.clone();
    left.end = t;
    if let Some(link) = left_link {
        left.kind.set_link_id(link);
    }

    let mut right = original;
    right.id = ActionId::new();
    right.start = t;
    right.kind.set_offset(right.kind.offset() + (t - left.start));
    if let Some(link) = right_link {
        right.kind.set_link_id(link);
    }

    model.tracks[lane].actions[pos] = left;
    model.tracks[lane].actions.insert(pos + 1, right);
}

/// Remove the action and, if linked, its partner.
pub fn delete_action(model: &mut TimelineModel, id: ActionId) -> EditOutcome {
    let partner = model.partner_of(id).map(|(_, p)| p.id);
    let before: usize = model.tracks.iter().map(|t| t.actions.len()).sum();
    for track in &mut model.tracks {
        track.actions.retain(|a| a.id != id && Some(a.id) != partner);
    }
    let after: usize = model.tracks.iter().map(|t| t.actions.len()).sum();
    if after == before {
        return EditOutcome::Rejected;
    }
    reconcile(model);
    EditOutcome::Applied
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src() -> SourceRef {
        SourceRef::new("footage.mp4")
    }

    #[test]
    fn auto_place_abuts_previous_clip() {
        let mut model = TimelineModel::four_lane();
        let first = auto_place_video(&mut model, src(), 8.0).unwrap();
        let second = auto_place_video(&mut model, src(), 5.0).unwrap();

        let (_, a) = model.find_action(first).unwrap();
        let (_, b) = model.find_action(second).unwrap();
        assert_eq!(a.start, 0.0);
        assert_eq!(a.end, 8.0);
        assert_eq!(b.start, 8.0);
        assert_eq!(b.end, 13.0);

        // Embedded audio partner mirrors the video exactly.
        let (lane, partner) = model.partner_of(second).unwrap();
        assert_eq!(model.tracks[lane].kind, TrackKind::Audio);
        assert_eq!(partner.start, b.start);
        assert_eq!(partner.end, b.end);
        assert_eq!(partner.kind.link_id(), b.kind.link_id());
        model.debug_invariants();
    }

    #[test]
    fn split_produces_continuing_in_point() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, src(), 10.0).unwrap();
        assert!(split_at(&mut model, id, 4.0).applied());

        let (_, left) = model.find_action(id).unwrap();
        assert_eq!(left.start, 0.0);
        assert_eq!(left.end, 4.0);
        assert_eq!(left.kind.offset(), 0.0);

        let lane = model.lane_of(id).unwrap();
        let right = model.tracks[lane]
            .actions
            .iter()
            .find(|a| a.id != id)
            .unwrap();
        assert_eq!(right.start, 4.0);
        assert_eq!(right.end, 10.0);
        assert_eq!(right.kind.offset(), 4.0);
        model.debug_invariants();
    }

    #[test]
    fn split_at_bounds_is_a_no_op() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, src(), 10.0).unwrap();
        let before = model.clone();
        assert!(!split_at(&mut model, id, 0.0).applied());
        assert!(!split_at(&mut model, id, 10.0).applied());
        assert_eq!(model, before);
    }

    #[test]
    fn split_decouples_left_and_right_pairs() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, src(), 10.0).unwrap();
        let original_link = model.find_action(id).unwrap().1.kind.link_id();
        assert!(split_at(&mut model, id, 6.0).applied());

        let lane = model.lane_of(id).unwrap();
        let links: Vec<_> = model.tracks[lane]
            .actions
            .iter()
            .map(|a| a.kind.link_id().unwrap())
            .collect();
        assert_eq!(links.len(), 2);
        assert_ne!(links[0], links[1]);
        assert!(!links.contains(&original_link.unwrap()));
        // Every half still has exactly one partner.
        for a in model.tracks[lane].actions.clone() {
            assert!(model.partner_of(a.id).is_some());
        }
        model.debug_invariants();
    }

    #[test]
    fn delete_removes_linked_partner() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, src(), 5.0).unwrap();
        assert!(delete_action(&mut model, id).applied());
        assert_eq!(model.actions().count(), 0);
    }

    #[test]
    fn insert_rejects_overlap() {
        let mut model = TimelineModel::four_lane();
        auto_place_video(&mut model, src(), 5.0).unwrap();
        let clash = Action {
            id: ActionId::new(),
            start: 2.0,
            end: 4.0,
            kind: ActionKind::Video {
                source: src(),
                offset: 0.0,
                video_layer: 0,
                link_id: None,
            },
        };
        assert!(!insert_action(&mut model, 0, clash).applied());
        model.debug_invariants();
    }
}
