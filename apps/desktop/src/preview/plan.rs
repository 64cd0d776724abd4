//! Pure per-tick planning for the video scheduler.
//!
//! Everything here is a function of (model, clock time) so it can be tested
//! without decoders. The scheduler applies the resulting plan to its two
//! buffer slots.

use timeline::{
    last_video_ended_before, media_time, next_video_after, video_at, ActionId, TimelineModel,
};

/// How far ahead the standby slot preloads the next clip.
pub(crate) const LOOKAHEAD: f64 = 0.5;

/// Gap no wider than this, entered within this long of the previous clip's
/// end, is decoder boundary jitter: freeze the last frame instead of
/// flashing black.
pub(crate) const MICRO_GAP: f64 = 0.1;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ClipRef {
    pub(crate) id: ActionId,
    /// What the decoder should load (proxy preferred).
    pub(crate) playable: String,
    /// In-point within the source; where the standby slot pre-seeks.
    pub(crate) offset: f64,
    /// Media time within the source for the planning instant.
    pub(crate) media_now: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GapKind {
    /// A clip is visible; no gap.
    None,
    /// Boundary jitter: keep the previous frame up, paused.
    Micro,
    /// Real hole: render black.
    Macro,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct TickPlan {
    pub(crate) current: Option<ClipRef>,
    pub(crate) next: Option<ClipRef>,
    pub(crate) gap: GapKind,
}

fn clip_ref(model: &TimelineModel, id: ActionId, t: f64) -> Option<ClipRef> {
    let (_, action) = model.find_action(id)?;
    Some(ClipRef {
        id,
        playable: action.kind.source().playable().to_string(),
        offset: action.kind.offset(),
        media_now: media_time(action, t),
    })
}

pub(crate) fn plan_tick(model: &TimelineModel, t: f64) -> TickPlan {
    let current = video_at(model, t).map(|a| a.id).and_then(|id| clip_ref(model, id, t));

    // Prefer whatever is on screen at t + LOOKAHEAD if it's a different
    // clip; otherwise the next clip to start. Either way the standby slot
    // gets something useful to chew on.
    let next = {
        let ahead = video_at(model, t + LOOKAHEAD)
            .filter(|a| Some(a.id) != current.as_ref().map(|c| c.id))
            .map(|a| a.id);
        let upcoming = ahead.or_else(|| {
            next_video_after(model, t)
                .filter(|a| Some(a.id) != current.as_ref().map(|c| c.id))
                .map(|a| a.id)
        });
        upcoming.and_then(|id| clip_ref(model, id, t))
    };

    let gap = if current.is_some() { GapKind::None } else { classify_gap(model, t) };
    TickPlan { current, next, gap }
}

/// A gap counts as micro only while we are still within `MICRO_GAP` of the
/// previous clip's end AND the hole itself is no wider than `MICRO_GAP`.
pub(crate) fn classify_gap(model: &TimelineModel, t: f64) -> GapKind {
    let Some(prev) = last_video_ended_before(model, t) else { return GapKind::Macro };
    if t - prev.end > MICRO_GAP {
        return GapKind::Macro;
    }
    match next_video_after(model, prev.end - 1e-9) {
        Some(next) if next.start - prev.end <= MICRO_GAP => GapKind::Micro,
        _ => GapKind::Macro,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use timeline::{insert_action, Action, ActionKind, SourceRef, TimelineModel};

    fn add_video(model: &mut TimelineModel, lane: usize, start: f64, end: f64) -> ActionId {
        let a = Action {
            id: ActionId::new(),
            start,
            end,
            kind: ActionKind::Video {
                source: SourceRef::new(format!("clip-{start}.mp4")),
                offset: 0.0,
                video_layer: 0,
                link_id: None,
            },
        };
        let id = a.id;
        assert!(insert_action(model, lane, a).applied());
        id
    }

    #[test]
    fn current_and_next_are_planned_across_a_boundary() {
        let mut model = TimelineModel::four_lane();
        let a = add_video(&mut model, 0, 0.0, 4.0);
        let b = add_video(&mut model, 0, 4.0, 8.0);

        let plan = plan_tick(&model, 3.8);
        assert_eq!(plan.current.as_ref().map(|c| c.id), Some(a));
        // 3.8 + 0.5 lands inside b.
        assert_eq!(plan.next.as_ref().map(|c| c.id), Some(b));
        assert_eq!(plan.gap, GapKind::None);
    }

    #[test]
    fn next_falls_back_to_the_earliest_upcoming_clip() {
        let mut model = TimelineModel::four_lane();
        let a = add_video(&mut model, 0, 0.0, 4.0);
        let b = add_video(&mut model, 0, 20.0, 24.0);
        let plan = plan_tick(&model, 1.0);
        assert_eq!(plan.current.as_ref().map(|c| c.id), Some(a));
        assert_eq!(plan.next.as_ref().map(|c| c.id), Some(b));
    }

    #[test]
    fn tiny_gap_right_after_a_clip_is_micro() {
        let mut model = TimelineModel::four_lane();
        add_video(&mut model, 0, 0.0, 4.0);
        add_video(&mut model, 0, 4.08, 8.0);
        // Inside the hole, just past the first clip's end.
        let plan = plan_tick(&model, 4.04);
        assert!(plan.current.is_none());
        assert_eq!(plan.gap, GapKind::Micro);
    }

    #[test]
    fn wide_gap_is_macro() {
        let mut model = TimelineModel::four_lane();
        add_video(&mut model, 0, 0.0, 4.0);
        add_video(&mut model, 0, 7.0, 9.0);
        let plan = plan_tick(&model, 5.0);
        assert_eq!(plan.gap, GapKind::Macro);
    }

    #[test]
    fn lingering_in_a_micro_hole_turns_macro() {
        let mut model = TimelineModel::four_lane();
        add_video(&mut model, 0, 0.0, 4.0);
        // Trailing gap with no following clip at all.
        let plan = plan_tick(&model, 4.05);
        assert_eq!(plan.gap, GapKind::Macro);
    }

    #[test]
    fn media_now_accounts_for_offset() {
        let mut model = TimelineModel::four_lane();
        let id = add_video(&mut model, 0, 2.0, 6.0);
        model.find_action_mut(id).unwrap().kind.set_offset(1.0);
        let plan = plan_tick(&model, 3.0);
        let current = plan.current.unwrap();
        assert!((current.media_now - 2.0).abs() < 1e-9);
    }
}
