//! Clip selection queries the playback engine runs every tick.

use crate::model::{Action, TimelineModel};

/// The video action visible at `t`: among all video actions whose range
/// contains `t`, the one with the highest `video_layer`. Equal layers are
/// broken by the lowest `ActionId`, which keeps the choice stable across
/// ticks regardless of track iteration order.
pub fn video_at(model: &TimelineModel, t: f64) -> Option<&Action> {
    model
        .actions()
        .filter(|(_, a)| a.kind.is_video() && a.contains(t))
        .map(|(_, a)| a)
        .max_by(|a, b| {
            a.video_layer()
                .cmp(&b.video_layer())
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// The earliest video action starting strictly after `t`.
pub fn next_video_after(model: &TimelineModel, t: f64) -> Option<&Action> {
    model
        .actions()
        .filter(|(_, a)| a.kind.is_video() && a.start > t)
        .map(|(_, a)| a)
        .min_by(|a, b| {
            a.start
                .partial_cmp(&b.start)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        })
}

/// The video action that most recently ended at or before `t`, used to
/// decide whether a gap is boundary jitter or a real hole.
pub fn last_video_ended_before(model: &TimelineModel, t: f64) -> Option<&Action> {
    model
        .actions()
        .filter(|(_, a)| a.kind.is_video() && a.end <= t)
        .map(|(_, a)| a)
        .max_by(|a, b| {
            a.end
                .partial_cmp(&b.end)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        })
}

/// Every audible action active at `t`, in model order. The voice pool
/// starts/stops voices from this set each tick.
pub fn audible_at(model: &TimelineModel, t: f64) -> Vec<&Action> {
    model
        .actions()
        .filter(|(_, a)| a.kind.is_audible() && a.contains(t))
        .map(|(_, a)| a)
        .collect()
}

/// Media-time within `action`'s source for timeline time `t`.
pub fn media_time(action: &Action, t: f64) -> f64 {
    (t - action.start + action.kind.offset()).max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Action, ActionId, ActionKind, SourceRef, TimelineModel};

    fn video(start: f64, end: f64, layer: i32) -> Action {
        Action {
            id: ActionId::new(),
            start,
            end,
            kind: ActionKind::Video {
                source: SourceRef::new("clip.mp4"),
                offset: 0.0,
                video_layer: layer,
                link_id: None,
            },
        }
    }

    fn model_with(actions: Vec<Action>) -> TimelineModel {
        let mut model = TimelineModel::four_lane();
        for a in actions {
            let lane = if a.video_layer() > 0 { 1 } else { 0 };
            model.tracks[lane].actions.push(a);
        }
        model
    }

    #[test]
    fn higher_layer_wins_in_overlap() {
        let a = video(0.0, 5.0, 0);
        let b = video(2.0, 7.0, 1);
        let (a_id, b_id) = (a.id, b.id);
        let model = model_with(vec![a, b]);

        assert_eq!(video_at(&model, 3.0).map(|x| x.id), Some(b_id));
        assert_eq!(video_at(&model, 1.0).map(|x| x.id), Some(a_id));
        assert_eq!(video_at(&model, 6.0).map(|x| x.id), Some(b_id));
        assert!(video_at(&model, 8.0).is_none());
    }

    #[test]
    fn equal_layer_tie_breaks_on_lowest_id() {
        let a = video(0.0, 5.0, 0);
        let b = video(0.0, 5.0, 0);
        let lowest = a.id.min(b.id);
        let mut model = TimelineModel::four_lane();
        model.tracks[0].actions.push(a);
        model.tracks[1].actions.push(b);
        // Same answer no matter how many times we ask.
        for _ in 0..4 {
            assert_eq!(video_at(&model, 2.0).map(|x| x.id), Some(lowest));
        }
    }

    #[test]
    fn next_video_is_strictly_after() {
        let a = video(0.0, 5.0, 0);
        let b = video(5.0, 9.0, 0);
        let b_id = b.id;
        let model = model_with(vec![a, b]);
        assert_eq!(next_video_after(&model, 0.0).map(|x| x.id), Some(b_id));
        // An action starting exactly at t does not count as "after".
        assert!(next_video_after(&model, 5.0).is_none());
    }

    #[test]
    fn media_time_tracks_offset() {
        let mut a = video(2.0, 6.0, 0);
        a.kind.set_offset(1.5);
        assert!((media_time(&a, 3.0) - 2.5).abs() < 1e-9);
        assert!((media_time(&a, 2.0) - 1.5).abs() < 1e-9);
    }
}
