use std::path::Path;
use std::time::Instant;

use eframe::egui::{self, Color32};
use timeline::{media_time, split_at, ActionKind, PointerSample, ResizeEdge};

use crate::{App, DragAnchor};

const TRACK_H: f32 = 48.0;
const EDGE_GRAB_PX: f32 = 6.0;

fn action_color(kind: &ActionKind, layer: i32) -> Color32 {
    match kind {
        ActionKind::Video { .. } => {
            if layer > 0 {
                Color32::from_rgb(60, 110, 180)
            } else {
                Color32::from_rgb(40, 90, 160)
            }
        }
        ActionKind::VideoEmbeddedAudio { .. } => Color32::from_rgb(40, 120, 40),
        ActionKind::AudioStandalone { .. } => Color32::from_rgb(30, 140, 90),
    }
}

fn action_label(kind: &ActionKind) -> String {
    Path::new(&kind.source().src)
        .file_name()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| kind.source().src.clone())
}

impl App {
    pub(crate) fn timeline_ui(&mut self, ui: &mut egui::Ui) {
        ui.horizontal(|ui| {
            ui.label("Zoom");
            ui.add(egui::Slider::new(&mut self.px_per_sec, 5.0..=400.0).logarithmic(true));
            if ui.button("Fit").clicked() {
                let width = ui.available_width().max(1.0);
                self.px_per_sec = (width / self.model.duration().max(1.0) as f32).max(1.0);
            }
        });

        let pps = self.px_per_sec;
        let content_w = (self.model.duration() as f32 * pps).max(1000.0);
        let track_count = self.model.tracks.len().max(1);
        let content_h = (track_count as f32 * TRACK_H).max(200.0);

        egui::ScrollArea::both().drag_to_scroll(false).show(ui, |ui| {
            let (rect, response) =
                ui.allocate_exact_size(egui::vec2(content_w, content_h), egui::Sense::click_and_drag());
            let painter = ui.painter_at(rect);
            painter.rect_filled(rect, 0.0, Color32::from_rgb(18, 18, 20));

            // Second grid
            let mut x = rect.left();
            while x < rect.right() {
                painter.line_segment(
                    [egui::pos2(x, rect.top()), egui::pos2(x, rect.bottom())],
                    egui::Stroke::new(1.0, Color32::from_gray(50)),
                );
                x += pps;
            }

            let mut clicked_action = None;
            let mut drag_begin: Option<(timeline::ActionId, egui::Pos2, Option<ResizeEdge>)> = None;

            for (ti, track) in self.model.tracks.iter().enumerate() {
                let y = rect.top() + ti as f32 * TRACK_H;
                painter.line_segment(
                    [egui::pos2(rect.left(), y), egui::pos2(rect.right(), y)],
                    egui::Stroke::new(1.0, Color32::from_gray(60)),
                );
                for action in &track.actions {
                    let x0 = rect.left() + action.start as f32 * pps;
                    let x1 = rect.left() + action.end as f32 * pps;
                    let r = egui::Rect::from_min_max(
                        egui::pos2(x0, y + 4.0),
                        egui::pos2(x1, y + TRACK_H - 4.0),
                    );
                    let mut border = egui::Stroke::new(1.0, Color32::BLACK);
                    if self.selected == Some(action.id) {
                        border = egui::Stroke::new(2.0, Color32::WHITE);
                    }
                    painter.rect_filled(r, 4.0, action_color(&action.kind, action.video_layer()));
                    painter.rect_stroke(r, 4.0, border);
                    painter.text(
                        r.center_top() + egui::vec2(0.0, 12.0),
                        egui::Align2::CENTER_TOP,
                        action_label(&action.kind),
                        egui::FontId::monospace(12.0),
                        Color32::WHITE,
                    );

                    // Clip rects are their own drag targets so the scroll
                    // area doesn't pan under them.
                    let resp = ui.interact(
                        r,
                        egui::Id::new(("action", action.id)),
                        egui::Sense::click_and_drag(),
                    );
                    if resp.clicked() {
                        clicked_action = Some(action.id);
                    }
                    if resp.drag_started() {
                        let pos = resp.interact_pointer_pos().unwrap_or(r.center());
                        let edge = if (pos.x - r.left()).abs() <= EDGE_GRAB_PX {
                            Some(ResizeEdge::Start)
                        } else if (pos.x - r.right()).abs() <= EDGE_GRAB_PX {
                            Some(ResizeEdge::End)
                        } else {
                            None
                        };
                        drag_begin = Some((action.id, pos, edge));
                    }
                }
            }

            if let Some(id) = clicked_action {
                self.selected = Some(id);
            }
            if let Some((id, pos, edge)) = drag_begin {
                self.selected = Some(id);
                let began = match edge {
                    Some(edge) => self.gesture.begin_resize(&self.model, id, edge, pps),
                    None => self.gesture.begin_move(&self.model, id, pps, TRACK_H),
                };
                if began {
                    self.drag_anchor = Some(DragAnchor {
                        start_pos: pos,
                        started_at: Instant::now(),
                        pre_model: self.model.clone(),
                    });
                }
            }

            // Drive the active gesture from raw pointer state; commit on
            // release.
            let pointer_down = ui.input(|i| i.pointer.primary_down());
            if !pointer_down {
                if let Some(anchor) = self.drag_anchor.take() {
                    let commit = self.gesture.finish(&mut self.model);
                    if commit.changed {
                        self.push_undo(anchor.pre_model);
                    }
                }
            } else if let Some(anchor) = &self.drag_anchor {
                if let Some(pos) = ui.input(|i| i.pointer.interact_pos()) {
                    let sample = PointerSample {
                        dx_px: pos.x - anchor.start_pos.x,
                        dy_px: pos.y - anchor.start_pos.y,
                        elapsed: anchor.started_at.elapsed().as_secs_f64(),
                        cursor_time: self.clock.now(),
                    };
                    self.gesture.update(&mut self.model, sample);
                }
            }

            // Playhead
            let phx = rect.left() + self.clock.now() as f32 * pps;
            painter.line_segment(
                [egui::pos2(phx, rect.top()), egui::pos2(phx, rect.bottom())],
                egui::Stroke::new(2.0, Color32::from_rgb(220, 60, 60)),
            );

            // Background click/drag scrubs, when no clip drag is active.
            if self.gesture.is_idle() {
                let scrub_to = |pos: egui::Pos2| {
                    ((pos.x - rect.left()).max(0.0) / pps) as f64
                };
                if response.clicked() {
                    if let Some(pos) = response.interact_pointer_pos() {
                        self.clock.set_time(scrub_to(pos), false);
                        if let Some(audio) = &self.audio {
                            audio.unlock();
                        }
                    }
                }
                if response.dragged() && ui.input(|i| i.pointer.primary_down()) {
                    if let Some(pos) = ui.input(|i| i.pointer.interact_pos()) {
                        self.clock.set_time(scrub_to(pos), false);
                    }
                }
            }

            // Split / delete hotkeys act on the selection.
            let pressed_split = ui.input(|i| i.key_pressed(egui::Key::K));
            let pressed_delete = ui
                .input(|i| i.key_pressed(egui::Key::Delete) || i.key_pressed(egui::Key::Backspace));
            if pressed_split {
                if let Some(id) = self.selected {
                    let pre = self.model.clone();
                    if split_at(&mut self.model, id, self.clock.now()).applied() {
                        self.push_undo(pre);
                        // Left piece keeps the id and stays selected.
                    }
                }
            }
            if pressed_delete {
                if let Some(id) = self.selected.take() {
                    let pre = self.model.clone();
                    if timeline::delete_action(&mut self.model, id).applied() {
                        self.push_undo(pre);
                    }
                }
            }
        });
    }

    /// Media time of the topmost video under the playhead, for the status
    /// line.
    pub(crate) fn active_video_media_time(&self) -> Option<(String, f64)> {
        let t = self.clock.now();
        timeline::video_at(&self.model, t)
            .map(|a| (a.kind.source().src.clone(), media_time(a, t)))
    }
}
