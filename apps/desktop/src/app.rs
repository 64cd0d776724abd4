use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use eframe::egui;
use media_io::{MediaKind, SourceCache};
use timeline::{
    auto_place_audio, auto_place_video, ActionId, GestureConfig, GestureEngine, SourceRef,
    TimelineModel,
};

use crate::audio_engine::AudioEngine;
use crate::clock::PlaybackClock;
use crate::preview::VideoScheduler;

/// Captured at drag start; consumed when the gesture commits.
pub(crate) struct DragAnchor {
    pub(crate) start_pos: egui::Pos2,
    pub(crate) started_at: Instant,
    pub(crate) pre_model: TimelineModel,
}

#[derive(Clone)]
pub(crate) struct AssetEntry {
    pub(crate) src: String,
    pub(crate) kind: MediaKind,
    pub(crate) duration: Option<f64>,
    pub(crate) width: Option<u32>,
    pub(crate) height: Option<u32>,
}

#[derive(Default, Clone)]
struct ExportProgress {
    progress: f32,
    done: bool,
    error: Option<String>,
}

#[derive(Default)]
pub(crate) struct ExportUiState {
    open: bool,
    output_path: String,
    running: bool,
    progress: f32,
    status: String,
    progress_shared: Option<Arc<Mutex<ExportProgress>>>,
    worker: Option<std::thread::JoinHandle<()>>,
}

/// The editor session. Owns every engine explicitly (clock, scheduler,
/// voice pool, caches) so tearing one session down cannot leave another
/// pointing at stale controllers.
pub(crate) struct App {
    pub(crate) model: TimelineModel,
    pub(crate) selected: Option<ActionId>,
    pub(crate) gesture: GestureEngine,
    pub(crate) drag_anchor: Option<DragAnchor>,
    undo: Vec<TimelineModel>,
    redo: Vec<TimelineModel>,

    pub(crate) clock: PlaybackClock,
    pub(crate) scheduler: VideoScheduler,
    pub(crate) audio: Option<AudioEngine>,
    pub(crate) cache: SourceCache,
    jobs: Option<jobs::JobsHandle>,

    assets: Vec<AssetEntry>,
    import_path: String,
    pub(crate) px_per_sec: f32,
    pub(crate) preview_texture: Option<egui::TextureHandle>,
    pub(crate) last_presented_pts: Option<u64>,
    export: ExportUiState,
    status: String,
}

impl App {
    pub(crate) fn new() -> Self {
        let audio = match AudioEngine::new() {
            Ok(engine) => Some(engine),
            Err(e) => {
                tracing::warn!(error = %e, "audio output unavailable; previewing silently");
                None
            }
        };
        Self {
            model: TimelineModel::four_lane(),
            selected: None,
            gesture: GestureEngine::new(GestureConfig::default()),
            drag_anchor: None,
            undo: Vec::new(),
            redo: Vec::new(),
            clock: PlaybackClock::default(),
            scheduler: VideoScheduler::new(),
            audio,
            cache: SourceCache::new(),
            jobs: Some(jobs::JobsRuntime::start(2)),
            assets: Vec::new(),
            import_path: String::new(),
            px_per_sec: 60.0,
            preview_texture: None,
            last_presented_pts: None,
            export: ExportUiState::default(),
            status: String::new(),
        }
    }

    pub(crate) fn push_undo(&mut self, pre: TimelineModel) {
        self.undo.push(pre);
        self.redo.clear();
    }

    fn undo_once(&mut self) {
        if let Some(prev) = self.undo.pop() {
            self.redo.push(std::mem::replace(&mut self.model, prev));
            self.selected = None;
        }
    }

    fn redo_once(&mut self) {
        if let Some(next) = self.redo.pop() {
            self.undo.push(std::mem::replace(&mut self.model, next));
            self.selected = None;
        }
    }

    fn toggle_playback(&mut self) {
        if self.clock.is_playing() {
            self.clock.pause();
        } else {
            if let Some(audio) = &self.audio {
                // Inside a user-gesture handler, where platforms that gate
                // audio output accept the resume.
                audio.unlock();
            }
            self.clock.play();
        }
    }

    /// Engine tick: one clock read per consumer per frame, both against the
    /// same model snapshot.
    fn engine_tick(&mut self) {
        self.scheduler.tick(&self.model, &self.clock, &self.cache);
        self.audio_tick();
    }

    fn audio_tick(&mut self) {
        let t = self.clock.now();
        let playing = self.clock.is_playing();
        let Some(audio) = self.audio.as_mut() else { return };
        audio.set_running(playing);
        audio.set_master_rate(self.clock.rate());

        let active = timeline::audible_at(&self.model, t);
        let keep: HashSet<ActionId> = active.iter().map(|a| a.id).collect();
        audio.retain(&keep);
        for action in active {
            let playable = action.kind.source().playable();
            let Some(resolved) = self.cache.resolve(playable) else {
                self.cache.warm(playable);
                continue;
            };
            audio.start(action.id, &resolved.path, action.start, action.kind.offset(), t);
            audio.resync(action.id, timeline::media_time(action, t), playing);
        }
    }

    /// Apply finished proxy renders: matching actions pick up the proxy as
    /// their preferred playback source.
    fn poll_jobs(&mut self) {
        let mut updates = Vec::new();
        if let Some(jobs) = &self.jobs {
            while let Ok(ev) = jobs.rx_events.try_recv() {
                match ev.status {
                    jobs::JobStatus::Done { output } => updates.push((ev.src, ev.kind, output)),
                    jobs::JobStatus::Failed(reason) => {
                        tracing::warn!(src = %ev.src, %reason, "proxy job failed");
                    }
                    _ => {}
                }
            }
        }
        for (src, kind, output) in updates {
            let proxy = output.to_string_lossy().into_owned();
            for track in &mut self.model.tracks {
                for action in &mut track.actions {
                    if action.kind.source().src != src {
                        continue;
                    }
                    let applies = match kind {
                        jobs::JobKind::ProxyVideo => action.kind.is_video(),
                        jobs::JobKind::ProxyAudio => action.kind.is_audible(),
                    };
                    if applies {
                        action.kind.source_mut().preview_src = Some(proxy.clone());
                    }
                }
            }
        }
    }

    fn import_files(&mut self, files: &[PathBuf]) {
        for f in files {
            let src = f.to_string_lossy().into_owned();
            let info = match media_io::probe_media(f) {
                Ok(info) => info,
                Err(e) => {
                    tracing::warn!(path = %src, error = %e, "import probe failed");
                    self.status = format!("import failed: {e}");
                    continue;
                }
            };
            let duration = info.duration_seconds.unwrap_or(5.0);
            let pre = self.model.clone();
            let placed = match info.kind {
                MediaKind::Video => {
                    auto_place_video(&mut self.model, SourceRef::new(&src), duration)
                }
                MediaKind::Audio => {
                    auto_place_audio(&mut self.model, SourceRef::new(&src), duration)
                }
            };
            let Some(id) = placed else {
                self.status = format!("no room on the timeline for {src}");
                continue;
            };
            self.push_undo(pre);
            self.selected = Some(id);
            self.cache.warm(&src);
            if let Some(jobs) = &self.jobs {
                if info.kind == MediaKind::Video {
                    jobs.enqueue(jobs::JobSpec {
                        src: src.clone(),
                        input: f.clone(),
                        kind: jobs::JobKind::ProxyVideo,
                        priority: 0,
                    });
                }
                jobs.enqueue(jobs::JobSpec {
                    src: src.clone(),
                    input: f.clone(),
                    kind: jobs::JobKind::ProxyAudio,
                    priority: 0,
                });
            }
            self.assets.push(AssetEntry {
                src,
                kind: info.kind,
                duration: info.duration_seconds,
                width: info.width,
                height: info.height,
            });
        }
    }

    fn add_asset_to_timeline(&mut self, entry: &AssetEntry) {
        let pre = self.model.clone();
        // Duration may have been unknown at import; re-probe through the
        // cache, then fall back to a default slot length.
        let duration = entry
            .duration
            .or_else(|| self.cache.duration_sec(&entry.src, entry.kind))
            .unwrap_or(5.0);
        let placed = match entry.kind {
            MediaKind::Video => {
                auto_place_video(&mut self.model, SourceRef::new(&entry.src), duration)
            }
            MediaKind::Audio => {
                auto_place_audio(&mut self.model, SourceRef::new(&entry.src), duration)
            }
        };
        if let Some(id) = placed {
            self.push_undo(pre);
            self.selected = Some(id);
        }
    }

    fn save_snapshot_dialog(&mut self) {
        let Some(path) = rfd::FileDialog::new().set_file_name("timeline.json").save_file() else {
            return;
        };
        let snapshot = project::Snapshot::capture(&self.model, self.selected, self.px_per_sec);
        match project::save_snapshot(&snapshot, &path) {
            Ok(()) => self.status = format!("saved {}", path.display()),
            Err(e) => self.status = format!("save failed: {e}"),
        }
    }

    fn load_snapshot_dialog(&mut self) {
        let Some(path) = rfd::FileDialog::new().pick_file() else { return };
        match project::load_snapshot(&path) {
            Ok(restored) => self.apply_restored(restored),
            // Version mismatch and parse errors land here: nothing was
            // applied, the session keeps its current state.
            Err(e) => self.status = format!("restore failed: {e}"),
        }
    }

    fn apply_restored(&mut self, restored: project::RestoredState) {
        self.model = restored.model;
        self.selected = restored.selected_action_id;
        self.px_per_sec = restored.timeline_scale_width.max(1.0);
        // History never crosses a restore.
        self.undo.clear();
        self.redo.clear();
        self.gesture.cancel();
        self.drag_anchor = None;
        // Action ids changed wholesale: a full playback reset is the only
        // rebind that cannot leave a stale voice behind.
        if let Some(audio) = self.audio.as_mut() {
            audio.reset_voices();
        }
        self.scheduler.reset();
        self.cache.clear();
        self.clock.pause();
        self.clock.set_time(0.0, false);
        self.status = "snapshot restored".into();
    }

    fn export_dialog_ui(&mut self, ctx: &egui::Context) {
        if !self.export.open {
            return;
        }
        let mut keep_open = true;
        let model = self.model.clone();
        let cache = &self.cache;
        let export = &mut self.export;
        egui::Window::new("Export").open(&mut keep_open).resizable(true).show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.label("Output:");
                ui.text_edit_singleline(&mut export.output_path);
                if ui.button("Browse").clicked() {
                    if let Some(path) =
                        rfd::FileDialog::new().set_file_name("export.mp4").save_file()
                    {
                        export.output_path = path.display().to_string();
                    }
                }
            });

            if export.running {
                if let Some(shared) = &export.progress_shared {
                    if let Ok(p) = shared.lock() {
                        export.progress = p.progress;
                        if p.done {
                            export.running = false;
                            export.status = p.error.clone().unwrap_or_else(|| "Done".to_string());
                        }
                    }
                }
                ui.add(egui::ProgressBar::new(export.progress).show_percentage());
                ui.label(&export.status);
                return;
            }

            let can_start = !export.output_path.trim().is_empty();
            if ui.add_enabled(can_start, egui::Button::new("Start Export")).clicked() {
                // Resolve every source up front; a hole is a missing-asset
                // failure for this job, not a generic one.
                let mut assets = exporters::AssetMap::new();
                let mut missing: Option<String> = None;
                for (_, action) in model.actions() {
                    let src = &action.kind.source().src;
                    match cache.resolve(src) {
                        Some(r) => {
                            assets.insert(src.clone(), r.path.to_string_lossy().into_owned());
                        }
                        None => {
                            missing = Some(src.clone());
                            break;
                        }
                    }
                }
                if let Some(src) = missing {
                    export.status = format!("missing asset: {src}");
                    return;
                }
                match exporters::ExportPlan::build(&model, &assets, 1920, 1080, 30.0) {
                    Ok(plan) => {
                        let out = PathBuf::from(export.output_path.clone());
                        let progress = Arc::new(Mutex::new(ExportProgress::default()));
                        export.progress_shared = Some(progress.clone());
                        export.running = true;
                        export.status.clear();
                        export.worker = Some(std::thread::spawn(move || {
                            let result = exporters::run_export(&plan, &out, |p| {
                                if let Ok(mut shared) = progress.lock() {
                                    shared.progress = p;
                                }
                            });
                            if let Ok(mut shared) = progress.lock() {
                                shared.done = true;
                                if let Err(e) = result {
                                    shared.error = Some(e.to_string());
                                }
                            }
                        }));
                    }
                    Err(e) => export.status = format!("export failed: {e}"),
                }
            }
            if !export.status.is_empty() {
                ui.label(&export.status);
            }
        });
        if !keep_open {
            self.export.open = false;
        }
    }

    /// Release every underlying media resource: decode workers, audio
    /// device, voices, and any in-flight export.
    pub(crate) fn dispose(&mut self) {
        self.scheduler.reset();
        if let Some(audio) = self.audio.as_mut() {
            audio.dispose();
        }
        if let Some(worker) = self.export.worker.take() {
            let _ = worker.join();
        }
        self.jobs = None;
    }
}

impl eframe::App for App {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        // The scheduler polls the clock even while paused or in a gap;
        // decoder callbacks stop firing then, the loop must not.
        ctx.request_repaint_after(Duration::from_millis(16));

        if ctx.input(|i| i.key_pressed(egui::Key::Space)) {
            self.toggle_playback();
        }
        let (undo_pressed, redo_pressed) = ctx.input(|i| {
            (
                i.modifiers.command && !i.modifiers.shift && i.key_pressed(egui::Key::Z),
                i.modifiers.command && i.modifiers.shift && i.key_pressed(egui::Key::Z),
            )
        });
        if undo_pressed {
            self.undo_once();
        }
        if redo_pressed {
            self.redo_once();
        }

        self.poll_jobs();
        self.engine_tick();

        egui::TopBottomPanel::top("transport").show(ctx, |ui| {
            ui.horizontal(|ui| {
                let label = if self.clock.is_playing() { "Pause (Space)" } else { "Play (Space)" };
                if ui.button(label).clicked() {
                    self.toggle_playback();
                }
                ui.label(format!("{:8.2}s", self.clock.now()));

                ui.label("Rate");
                let mut rate = self.clock.rate();
                if ui
                    .add(egui::DragValue::new(&mut rate).clamp_range(0.25..=4.0).speed(0.05))
                    .changed()
                {
                    self.clock.set_rate(rate);
                }

                ui.separator();
                if ui.button("Save").clicked() {
                    self.save_snapshot_dialog();
                }
                if ui.button("Load").clicked() {
                    self.load_snapshot_dialog();
                }
                if ui.button("Export...").clicked() {
                    self.export.open = true;
                }
                if !self.status.is_empty() {
                    ui.separator();
                    ui.label(&self.status);
                }
            });
        });

        egui::SidePanel::left("assets").default_width(320.0).show(ctx, |ui| {
            ui.heading("Footage");
            ui.horizontal(|ui| {
                ui.text_edit_singleline(&mut self.import_path);
                if ui.button("Add").clicked() {
                    let p = std::mem::take(&mut self.import_path);
                    if !p.trim().is_empty() {
                        self.import_files(&[PathBuf::from(p)]);
                    }
                }
                if ui.button("Import...").clicked() {
                    if let Some(files) = rfd::FileDialog::new().pick_files() {
                        self.import_files(&files);
                    }
                }
            });
            ui.separator();

            let assets = self.assets.clone();
            egui_extras::TableBuilder::new(ui)
                .striped(true)
                .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
                .column(egui_extras::Column::remainder())
                .column(egui_extras::Column::auto())
                .column(egui_extras::Column::auto())
                .header(20.0, |mut header| {
                    header.col(|ui| {
                        ui.strong("Name");
                    });
                    header.col(|ui| {
                        ui.strong("Kind");
                    });
                    header.col(|ui| {
                        ui.strong("");
                    });
                })
                .body(|mut body| {
                    for entry in &assets {
                        body.row(22.0, |mut row| {
                            row.col(|ui| {
                                let name = std::path::Path::new(&entry.src)
                                    .file_name()
                                    .map(|s| s.to_string_lossy().into_owned())
                                    .unwrap_or_else(|| entry.src.clone());
                                let label = match (entry.width, entry.height) {
                                    (Some(w), Some(h)) => format!("{name} ({w}x{h})"),
                                    _ => name,
                                };
                                ui.label(label);
                            });
                            row.col(|ui| {
                                ui.label(match entry.kind {
                                    MediaKind::Video => "video",
                                    MediaKind::Audio => "audio",
                                });
                            });
                            row.col(|ui| {
                                if ui.button("Add").clicked() {
                                    self.add_asset_to_timeline(entry);
                                }
                            });
                        });
                    }
                });
        });

        egui::CentralPanel::default().show(ctx, |ui| {
            egui::Resize::default()
                .id_salt("preview_resize")
                .default_size(egui::vec2(ui.available_width(), 360.0))
                .show(ui, |ui| {
                    self.preview_ui(ui);
                });
            ui.add_space(4.0);
            ui.separator();
            ui.horizontal(|ui| {
                ui.heading("Timeline");
                if let Some((src, media_t)) = self.active_video_media_time() {
                    ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                        let name = std::path::Path::new(&src)
                            .file_name()
                            .map(|s| s.to_string_lossy().into_owned())
                            .unwrap_or(src);
                        ui.small(format!("{name} @ {media_t:.2}s"));
                    });
                }
            });
            self.timeline_ui(ui);
        });

        self.export_dialog_ui(ctx);
    }

    fn on_exit(&mut self) {
        self.dispose();
    }
}
