use eframe::egui;

use crate::decode::VideoFrameOut;
use crate::App;

impl App {
    pub(crate) fn preview_ui(&mut self, ui: &mut egui::Ui) {
        // 16:9 box fitted into the available area.
        let avail = ui.available_size();
        let mut w = avail.x.max(320.0);
        let mut h = (w * 9.0 / 16.0).round();
        if h > avail.y {
            h = avail.y.max(180.0);
            w = (h * 16.0 / 9.0).round();
        }

        let (rect, _resp) = ui.allocate_exact_size(egui::vec2(w, h), egui::Sense::hover());
        let painter = ui.painter_at(rect);
        painter.rect_filled(rect, 4.0, egui::Color32::from_rgb(12, 12, 12));

        match self.scheduler.visible_frame() {
            Some(frame) => {
                self.upload_preview_frame(ui.ctx(), &frame);
                if let Some(texture) = &self.preview_texture {
                    painter.image(
                        texture.id(),
                        rect,
                        egui::Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                        egui::Color32::WHITE,
                    );
                }
            }
            None => {
                // Gap or failed load: black, with a hint when the timeline
                // is empty.
                if self.model.actions().count() == 0 {
                    painter.text(
                        rect.center(),
                        egui::Align2::CENTER_CENTER,
                        "No Preview",
                        egui::FontId::proportional(16.0),
                        egui::Color32::GRAY,
                    );
                }
            }
        }
    }

    /// Upload only when the frame actually changed; redundant uploads chew
    /// GPU bandwidth for nothing at 60 ticks/sec.
    fn upload_preview_frame(&mut self, ctx: &egui::Context, frame: &VideoFrameOut) {
        let key = frame.pts.to_bits();
        if self.last_presented_pts == Some(key) && self.preview_texture.is_some() {
            return;
        }
        self.last_presented_pts = Some(key);
        let image = egui::ColorImage::from_rgba_unmultiplied(
            [frame.width as usize, frame.height as usize],
            &frame.rgba,
        );
        match &mut self.preview_texture {
            Some(texture) => texture.set(image, egui::TextureOptions::LINEAR),
            None => {
                self.preview_texture =
                    Some(ctx.load_texture("preview", image, egui::TextureOptions::LINEAR));
            }
        }
    }
}
