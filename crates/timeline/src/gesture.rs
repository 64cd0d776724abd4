//! Pointer gesture engine: move and resize with magnetic snapping,
//! linked-clip coupling and deferred lane switching.
//!
//! The widget layer only translates raw pointer events into `begin_*` /
//! `update` / `finish` calls; all edit policy lives here. Invalid pointer
//! positions never mutate the model; the action simply holds its last
//! valid placement, which is also what the user sees during the drag.

use crate::model::{quantize, ActionId, TimelineModel, MIN_DURATION};
use crate::reconcile::reconcile;

/// Snap tuning. Pixel values are converted to seconds through the zoom the
/// gesture started with, so snapping feels the same at any magnification.
#[derive(Debug, Clone, Copy)]
pub struct GestureConfig {
    /// Edge-to-point distance at which a snap engages.
    pub snap_px: f32,
    /// Distance the pointer must pull away before a held snap releases.
    /// Larger than `snap_px` so the boundary doesn't flicker.
    pub release_px: f32,
    /// Vertical displacement that counts as aiming at another lane.
    pub lane_switch_px: f32,
    /// How long the aim must persist before the switch is registered.
    pub lane_switch_hold: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self { snap_px: 20.0, release_px: 40.0, lane_switch_px: 28.0, lane_switch_hold: 0.16 }
    }
}

/// Per-update pointer sample, relative to the gesture start.
#[derive(Debug, Clone, Copy)]
pub struct PointerSample {
    pub dx_px: f32,
    pub dy_px: f32,
    /// Seconds since the gesture began (host-supplied, keeps this testable).
    pub elapsed: f64,
    /// Playhead time; part of the magnetic point set.
    pub cursor_time: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeEdge {
    Start,
    End,
}

/// Result of finishing a gesture. `changed` tells the host whether to
/// commit one history entry for the whole drag.
#[derive(Debug, Clone, Copy)]
pub struct GestureCommit {
    pub changed: bool,
}

#[derive(Debug, Clone, Copy, Default)]
struct SnapState {
    held: Option<f64>,
}

impl SnapState {
    /// Snap `raw` edges against `points` with hysteresis. Returns the time
    /// shift to add to the proposal, or 0 when unsnapped.
    fn resolve(&mut self, edges: &[f64], points: &[f64], snap_tol: f64, release_tol: f64) -> f64 {
        if let Some(p) = self.held {
            let best = edges
                .iter()
                .map(|e| (p - e, (p - e).abs()))
                .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
            if let Some((shift, dist)) = best {
                if dist <= release_tol {
                    return shift;
                }
            }
            self.held = None;
        }
        let mut best: Option<(f64, f64, f64)> = None; // (shift, dist, point)
        for &p in points {
            for &e in edges {
                let dist = (p - e).abs();
                if dist <= snap_tol && best.map_or(true, |(_, d, _)| dist < d) {
                    best = Some((p - e, dist, p));
                }
            }
        }
        match best {
            Some((shift, _, p)) => {
                self.held = Some(p);
                shift
            }
            None => 0.0,
        }
    }
}

#[derive(Debug, Clone)]
struct MoveGesture {
    id: ActionId,
    partner: Option<ActionId>,
    orig_start: f64,
    orig_end: f64,
    origin_lane: usize,
    px_per_sec: f32,
    lane_height_px: f32,
    snap: SnapState,
    aim: Option<(isize, f64)>, // (lane delta, first seen at)
    registered_lane_delta: Option<isize>,
    begin_signature: u64,
}

#[derive(Debug, Clone)]
struct ResizeGesture {
    id: ActionId,
    partner: Option<ActionId>,
    edge: ResizeEdge,
    orig_start: f64,
    orig_end: f64,
    orig_offset: f64,
    px_per_sec: f32,
    snap: SnapState,
    begin_signature: u64,
}

#[derive(Debug, Clone)]
enum ActiveGesture {
    Move(MoveGesture),
    Resize(ResizeGesture),
}

#[derive(Debug, Default)]
pub struct GestureEngine {
    cfg: GestureConfig,
    active: Option<ActiveGesture>,
}

impl GestureEngine {
    pub fn new(cfg: GestureConfig) -> Self {
        Self { cfg, active: None }
    }

    pub fn is_idle(&self) -> bool {
        self.active.is_none()
    }

    pub fn dragging(&self) -> Option<ActionId> {
        match &self.active {
            Some(ActiveGesture::Move(g)) => Some(g.id),
            Some(ActiveGesture::Resize(g)) => Some(g.id),
            None => None,
        }
    }

    pub fn begin_move(
        &mut self,
        model: &TimelineModel,
        id: ActionId,
        px_per_sec: f32,
        lane_height_px: f32,
    ) -> bool {
        if self.active.is_some() || px_per_sec <= 0.0 {
            return false;
        }
        let Some((lane, action)) = model.find_action(id) else { return false };
        self.active = Some(ActiveGesture::Move(MoveGesture {
            id,
            partner: model.partner_of(id).map(|(_, p)| p.id),
            orig_start: action.start,
            orig_end: action.end,
            origin_lane: lane,
            px_per_sec,
            lane_height_px: lane_height_px.max(1.0),
            snap: SnapState::default(),
            aim: None,
            registered_lane_delta: None,
            begin_signature: model.signature(),
        }));
        true
    }

    pub fn begin_resize(
        &mut self,
        model: &TimelineModel,
        id: ActionId,
        edge: ResizeEdge,
        px_per_sec: f32,
    ) -> bool {
        if self.active.is_some() || px_per_sec <= 0.0 {
            return false;
        }
        let Some((_, action)) = model.find_action(id) else { return false };
        self.active = Some(ActiveGesture::Resize(ResizeGesture {
            id,
            partner: model.partner_of(id).map(|(_, p)| p.id),
            edge,
            orig_start: action.start,
            orig_end: action.end,
            orig_offset: action.kind.offset(),
            px_per_sec,
            snap: SnapState::default(),
            begin_signature: model.signature(),
        }));
        true
    }

    pub fn update(&mut self, model: &mut TimelineModel, sample: PointerSample) {
        let Some(active) = self.active.take() else { return };
        let active = match active {
            ActiveGesture::Move(mut g) => {
                self.update_move(model, &mut g, sample);
                ActiveGesture::Move(g)
            }
            ActiveGesture::Resize(mut g) => {
                self.update_resize(model, &mut g, sample);
                ActiveGesture::Resize(g)
            }
        };
        self.active = Some(active);
    }

    /// Finish whatever gesture is active; no-op when idle.
    pub fn finish(&mut self, model: &mut TimelineModel) -> GestureCommit {
        match self.active.take() {
            Some(ActiveGesture::Move(g)) => {
                if let Some(delta) = g.registered_lane_delta {
                    try_lane_switch(model, &g, delta);
                }
                reconcile(model);
                GestureCommit { changed: model.signature() != g.begin_signature }
            }
            Some(ActiveGesture::Resize(g)) => {
                reconcile(model);
                GestureCommit { changed: model.signature() != g.begin_signature }
            }
            None => GestureCommit { changed: false },
        }
    }

    /// Abandon the gesture without committing. The host restores its own
    /// pre-gesture snapshot if it wants the drag visually undone.
    pub fn cancel(&mut self) {
        self.active = None;
    }

    fn update_move(&mut self, model: &mut TimelineModel, g: &mut MoveGesture, s: PointerSample) {
        let dur = g.orig_end - g.orig_start;
        let dt = (s.dx_px / g.px_per_sec) as f64;
        let mut start = g.orig_start + dt;

        let points = snap_points(model, s.cursor_time, g.id, g.partner);
        let snap_tol = (self.cfg.snap_px / g.px_per_sec) as f64;
        let release_tol = (self.cfg.release_px / g.px_per_sec) as f64;
        start += g.snap.resolve(&[start, start + dur], &points, snap_tol, release_tol);

        // Clamping to zero shifts the whole clip, never shortens it.
        if start < 0.0 {
            start = 0.0;
        }
        let start = quantize(start);
        let end = quantize(start + dur);

        if placement_is_free(model, g.id, g.partner, start, end) {
            apply_range(model, g.id, g.partner, start, end);
        }

        // Lane aim is only registered after it survives the hold time, and
        // only applied when the pointer lifts. Switching lanes mid-drag
        // flickers.
        let delta_lanes = if s.dy_px.abs() >= self.cfg.lane_switch_px {
            (s.dy_px / g.lane_height_px).round() as isize
        } else {
            0
        };
        match (delta_lanes, g.aim) {
            (0, _) => g.aim = None,
            (d, Some((held, since))) if held == d => {
                if s.elapsed - since >= self.cfg.lane_switch_hold {
                    g.registered_lane_delta = Some(d);
                }
            }
            (d, _) => g.aim = Some((d, s.elapsed)),
        }
    }

    fn update_resize(&mut self, model: &mut TimelineModel, g: &mut ResizeGesture, s: PointerSample) {
        let dt = (s.dx_px / g.px_per_sec) as f64;
        let points = snap_points(model, s.cursor_time, g.id, g.partner);
        let snap_tol = (self.cfg.snap_px / g.px_per_sec) as f64;
        let release_tol = (self.cfg.release_px / g.px_per_sec) as f64;

        let (start, end, offset) = match g.edge {
            ResizeEdge::Start => {
                let mut new_start = g.orig_start + dt;
                new_start += g.snap.resolve(&[new_start], &points, snap_tol, release_tol);
                // Keep the in-point non-negative and the clip above minimum.
                let lower = (g.orig_start - g.orig_offset).max(0.0);
                let upper = g.orig_end - MIN_DURATION;
                let new_start = quantize(new_start.clamp(lower, upper));
                let offset = quantize(g.orig_offset + (new_start - g.orig_start));
                (new_start, g.orig_end, Some(offset))
            }
            ResizeEdge::End => {
                let mut new_end = g.orig_end + dt;
                new_end += g.snap.resolve(&[new_end], &points, snap_tol, release_tol);
                let new_end = quantize(new_end.max(g.orig_start + MIN_DURATION));
                (g.orig_start, new_end, None)
            }
        };

        if placement_is_free(model, g.id, g.partner, start, end) {
            apply_range(model, g.id, g.partner, start, end);
            if let Some(offset) = offset {
                for target in std::iter::once(g.id).chain(g.partner) {
                    if let Some(a) = model.find_action_mut(target) {
                        a.kind.set_offset(offset);
                    }
                }
            }
        }
    }
}

/// Magnetic point set: the playhead plus every other action's edges.
fn snap_points(
    model: &TimelineModel,
    cursor_time: f64,
    id: ActionId,
    partner: Option<ActionId>,
) -> Vec<f64> {
    let mut points = vec![cursor_time];
    for (_, a) in model.actions() {
        if a.id == id || Some(a.id) == partner {
            continue;
        }
        points.push(a.start);
        points.push(a.end);
    }
    points
}

fn placement_is_free(
    model: &TimelineModel,
    id: ActionId,
    partner: Option<ActionId>,
    start: f64,
    end: f64,
) -> bool {
    let ignore: Vec<ActionId> = std::iter::once(id).chain(partner).collect();
    for target in &ignore {
        let Some(lane) = model.lane_of(*target) else { return false };
        if !model.tracks[lane].is_free(start, end, &ignore) {
            return false;
        }
    }
    true
}

fn apply_range(
    model: &mut TimelineModel,
    id: ActionId,
    partner: Option<ActionId>,
    start: f64,
    end: f64,
) {
    for target in std::iter::once(id).chain(partner) {
        if let Some(a) = model.find_action_mut(target) {
            a.start = start;
            a.end = end;
        }
    }
}

/// Apply a registered lane switch, silently skipping anything invalid.
/// Lane changes are computed from the row the gesture started on; the
/// action itself has not moved lanes mid-drag.
fn try_lane_switch(model: &mut TimelineModel, g: &MoveGesture, delta: isize) {
    let Some((_, action)) = model.find_action(g.id) else { return };
    let current_lane = g.origin_lane;
    let Some(kind) = model.tracks.get(current_lane).map(|t| t.kind) else { return };
    let own_lanes = model.lanes_of_kind(kind);
    let Some(ordinal) = own_lanes.iter().position(|&l| l == current_lane) else { return };
    let target_ordinal = ordinal as isize + delta;
    if target_ordinal < 0 || target_ordinal as usize >= own_lanes.len() {
        return;
    }
    let target = own_lanes[target_ordinal as usize];
    if target == current_lane {
        return;
    }
    let (start, end) = (action.start, action.end);

    let ignore: Vec<ActionId> = std::iter::once(g.id).chain(g.partner).collect();
    if !model.tracks[target].is_free(start, end, &ignore) {
        return;
    }
    // The partner follows onto the lane paired with the destination.
    let partner_target = g.partner.and_then(|_| model.paired_lane(target));
    if let (Some(pid), Some(pt)) = (g.partner, partner_target) {
        if !model.tracks[pt].is_free(start, end, &ignore) {
            return;
        }
        relocate(model, pid, pt);
    }
    relocate(model, g.id, target);
}

fn relocate(model: &mut TimelineModel, id: ActionId, target: usize) {
    let Some(from) = model.lane_of(id) else { return };
    if from == target {
        return;
    }
    let Some(pos) = model.tracks[from].actions.iter().position(|a| a.id == id) else { return };
    let action = model.tracks[from].actions.remove(pos);
    model.tracks[target].actions.push(action);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::edit::{auto_place_audio, auto_place_video};
    use crate::model::{SourceRef, TrackKind};

    const PPS: f32 = 100.0; // px per second in these tests
    const LANE_H: f32 = 48.0;

    fn sample(dx: f32, dy: f32, elapsed: f64) -> PointerSample {
        PointerSample { dx_px: dx, dy_px: dy, elapsed, cursor_time: 0.0 }
    }

    fn engine() -> GestureEngine {
        GestureEngine::new(GestureConfig::default())
    }

    #[test]
    fn move_applies_delta_and_couples_partner() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let mut eng = engine();
        assert!(eng.begin_move(&model, id, PPS, LANE_H));
        eng.update(&mut model, sample(250.0, 0.0, 0.05));
        let commit = eng.finish(&mut model);

        let (_, a) = model.find_action(id).unwrap();
        assert_eq!(a.start, 2.5);
        assert_eq!(a.end, 6.5);
        let (_, p) = model.partner_of(id).unwrap();
        assert_eq!(p.start, 2.5);
        assert_eq!(p.end, 6.5);
        assert!(commit.changed);
        model.debug_invariants();
    }

    #[test]
    fn move_clamps_at_zero_without_shortening() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(-500.0, 0.0, 0.05));
        eng.finish(&mut model);
        let (_, a) = model.find_action(id).unwrap();
        assert_eq!(a.start, 0.0);
        assert_eq!(a.end, 4.0);
    }

    #[test]
    fn move_snaps_to_neighbor_edge() {
        use crate::edit::insert_action;
        use crate::model::{Action, ActionId, ActionKind};
        let mut model = TimelineModel::four_lane();
        auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let second = Action {
            id: ActionId::new(),
            start: 6.0,
            end: 8.0,
            kind: ActionKind::Video {
                source: SourceRef::new("b.mp4"),
                offset: 0.0,
                video_layer: 0,
                link_id: None,
            },
        };
        let second_id = second.id;
        assert!(insert_action(&mut model, 0, second).applied());

        let mut eng = engine();
        eng.begin_move(&model, second_id, PPS, LANE_H);
        // 6.0 - 1.9 = 4.1s proposed; the neighbor's end at 4.0 is 0.1s
        // (10 px) away, inside the 20 px snap window.
        eng.update(&mut model, sample(-190.0, 0.0, 0.05));
        eng.finish(&mut model);
        let (_, a) = model.find_action(second_id).unwrap();
        assert_eq!(a.start, 4.0);
        assert_eq!(a.end, 6.0);
    }

    #[test]
    fn snap_holds_until_release_threshold() {
        let mut model = TimelineModel::four_lane();
        auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let id = auto_place_video(&mut model, SourceRef::new("b.mp4"), 2.0).unwrap();
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(10.0, 0.0, 0.02));
        assert_eq!(model.find_action(id).unwrap().1.start, 4.0); // snapped back

        // 30 px past the snap point: inside the 40 px release window,
        // still held.
        eng.update(&mut model, sample(30.0, 0.0, 0.04));
        assert_eq!(model.find_action(id).unwrap().1.start, 4.0);

        // 50 px: past release, the snap lets go.
        eng.update(&mut model, sample(50.0, 0.0, 0.06));
        assert_eq!(model.find_action(id).unwrap().1.start, 4.5);
        eng.finish(&mut model);
    }

    #[test]
    fn overlapping_proposal_keeps_last_valid_placement() {
        let mut model = TimelineModel::four_lane();
        auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let id = auto_place_video(&mut model, SourceRef::new("b.mp4"), 2.0).unwrap();
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        // Straight into the middle of the first clip: rejected, stays put.
        eng.update(&mut model, sample(-200.0, 0.0, 0.05));
        assert_eq!(model.find_action(id).unwrap().1.start, 4.0);
        eng.finish(&mut model);
        model.debug_invariants();
    }

    #[test]
    fn lane_switch_needs_hold_and_applies_at_finish() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_audio(&mut model, SourceRef::new("a.wav"), 3.0).unwrap();
        let origin = model.lane_of(id).unwrap();

        // A flick that never survives the hold window does not switch.
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(0.0, 50.0, 0.05));
        eng.finish(&mut model);
        assert_eq!(model.lane_of(id).unwrap(), origin);

        // Held past the threshold: applied at finish, not mid-drag.
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(0.0, 50.0, 0.05));
        eng.update(&mut model, sample(0.0, 50.0, 0.30));
        assert_eq!(model.lane_of(id).unwrap(), origin);
        eng.finish(&mut model);
        let landed = model.lane_of(id).unwrap();
        assert_ne!(landed, origin);
        assert_eq!(model.tracks[landed].kind, TrackKind::Audio);
    }

    #[test]
    fn left_resize_shifts_in_point() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, SourceRef::new("a.mp4"), 6.0).unwrap();
        // Give the clip a nonzero in-point so there is room to trim into.
        for target in [id, model.partner_of(id).unwrap().1.id] {
            model.find_action_mut(target).unwrap().kind.set_offset(2.0);
        }
        let mut eng = engine();
        assert!(eng.begin_resize(&model, id, ResizeEdge::Start, PPS));
        eng.update(&mut model, sample(100.0, 0.0, 0.05));
        let commit = eng.finish(&mut model);

        let (_, a) = model.find_action(id).unwrap();
        assert_eq!(a.start, 1.0);
        assert_eq!(a.end, 6.0);
        assert!((a.kind.offset() - 3.0).abs() < 1e-9);
        let (_, p) = model.partner_of(id).unwrap();
        assert_eq!(p.start, 1.0);
        assert!((p.kind.offset() - 3.0).abs() < 1e-9);
        assert!(commit.changed);
    }

    #[test]
    fn left_resize_cannot_push_in_point_negative() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, SourceRef::new("a.mp4"), 6.0).unwrap();
        // Move the pair right so there is room to trim leftwards.
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(300.0, 0.0, 0.05));
        eng.finish(&mut model);

        // offset is 0: the start handle must refuse to extend left.
        let mut eng = engine();
        eng.begin_resize(&model, id, ResizeEdge::Start, PPS);
        eng.update(&mut model, sample(-200.0, 0.0, 0.05));
        eng.finish(&mut model);
        let (_, a) = model.find_action(id).unwrap();
        assert_eq!(a.start, 3.0);
        assert_eq!(a.kind.offset(), 0.0);
    }

    #[test]
    fn unchanged_drag_reports_no_commit() {
        let mut model = TimelineModel::four_lane();
        let id = auto_place_video(&mut model, SourceRef::new("a.mp4"), 4.0).unwrap();
        let mut eng = engine();
        eng.begin_move(&model, id, PPS, LANE_H);
        eng.update(&mut model, sample(0.0, 0.0, 0.05));
        let commit = eng.finish(&mut model);
        assert!(!commit.changed);
    }
}
