//! Per-source video decode worker.
//!
//! One background thread per loaded source drives an ffmpeg rawvideo pipe
//! into a latest-frame slot. The worker free-runs against its own anchor
//! while playing; the scheduler reconciles its reported position against
//! the timeline clock and commands it over a channel. Everything that can
//! go wrong flips the `failed` flag instead of surfacing an error; a slot
//! that can't decode just renders black upstream.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Instant;

use crossbeam_channel as channel;

/// Decode resolution for preview frames. Proxy-grade on purpose: the
/// preview panel upscales, and the full-resolution pass happens at export.
pub(crate) const DECODE_W: u32 = 640;
pub(crate) const DECODE_H: u32 = 360;
/// Fixed output cadence; frame pts = seek base + n / DECODE_FPS.
pub(crate) const DECODE_FPS: f64 = 30.0;

const FRAME_BYTES: usize = (DECODE_W as usize) * (DECODE_H as usize) * 4;

#[derive(Clone)]
pub(crate) struct VideoFrameOut {
    pub(crate) pts: f64,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) rgba: Arc<[u8]>,
}

pub(crate) enum DecodeCmd {
    Play { start_pts: f64, rate: f32 },
    Seek { target_pts: f64 },
    Pause,
    Stop,
}

pub(crate) struct DecodeWorker {
    #[allow(dead_code)]
    handle: thread::JoinHandle<()>,
    cmd_tx: channel::Sender<DecodeCmd>,
    slot: Arc<Mutex<Option<VideoFrameOut>>>,
    position_bits: Arc<AtomicU64>,
    ready: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
}

impl DecodeWorker {
    pub(crate) fn send(&self, cmd: DecodeCmd) {
        // Readiness drops the moment a seek is requested, not when the
        // worker gets around to it, so callers never trust a stale frame.
        if matches!(cmd, DecodeCmd::Seek { .. }) {
            self.ready.store(false, Ordering::Release);
        }
        let _ = self.cmd_tx.send(cmd);
    }

    pub(crate) fn latest_frame(&self) -> Option<VideoFrameOut> {
        self.slot.lock().ok().and_then(|g| g.clone())
    }

    /// Media time of the most recently decoded frame.
    pub(crate) fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Acquire))
    }

    /// True once at least one frame has landed since the last seek.
    pub(crate) fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    pub(crate) fn has_failed(&self) -> bool {
        self.failed.load(Ordering::Acquire)
    }

    pub(crate) fn stop(&self) {
        let _ = self.cmd_tx.send(DecodeCmd::Stop);
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PipeStream {
    child: Child,
    stdout: std::process::ChildStdout,
    base_pts: f64,
    frames_read: u64,
}

impl PipeStream {
    fn open(path: &str, start: f64) -> Option<Self> {
        let ffmpeg = media_io::ffmpeg_path()?;
        let mut child = Command::new(ffmpeg)
            .arg("-ss")
            .arg(format!("{:.3}", start.max(0.0)))
            .arg("-i")
            .arg(path)
            .arg("-an")
            .arg("-vf")
            .arg(format!("scale={}:{},fps={}", DECODE_W, DECODE_H, DECODE_FPS))
            .arg("-f")
            .arg("rawvideo")
            .arg("-pix_fmt")
            .arg("rgba")
            .arg("-")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .ok()?;
        let stdout = child.stdout.take()?;
        Some(Self { child, stdout, base_pts: start.max(0.0), frames_read: 0 })
    }

    /// Blocking read of the next full frame; `None` on EOF or pipe error.
    fn next_frame(&mut self) -> Option<VideoFrameOut> {
        let mut buf = vec![0u8; FRAME_BYTES];
        let mut filled = 0;
        while filled < FRAME_BYTES {
            match self.stdout.read(&mut buf[filled..]) {
                Ok(0) => return None,
                Ok(n) => filled += n,
                Err(_) => return None,
            }
        }
        let pts = self.base_pts + self.frames_read as f64 / DECODE_FPS;
        self.frames_read += 1;
        Some(VideoFrameOut {
            pts,
            width: DECODE_W,
            height: DECODE_H,
            rgba: Arc::from(buf.into_boxed_slice()),
        })
    }

    fn pts_of_next(&self) -> f64 {
        self.base_pts + self.frames_read as f64 / DECODE_FPS
    }
}

impl Drop for PipeStream {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Paused,
    Playing,
}

pub(crate) fn spawn_worker(path: &str) -> DecodeWorker {
    let (cmd_tx, cmd_rx) = channel::unbounded::<DecodeCmd>();
    let slot: Arc<Mutex<Option<VideoFrameOut>>> = Arc::new(Mutex::new(None));
    let position_bits = Arc::new(AtomicU64::new(0f64.to_bits()));
    let ready = Arc::new(AtomicBool::new(false));
    let failed = Arc::new(AtomicBool::new(false));

    let slot_w = slot.clone();
    let position_w = position_bits.clone();
    let ready_w = ready.clone();
    let failed_w = failed.clone();
    let path = path.to_string();

    let handle = thread::spawn(move || {
        let mut stream: Option<PipeStream> = None;
        let mut mode = Mode::Paused;
        let mut rate: f64 = 1.0;
        let mut anchor_pts: f64 = 0.0;
        let mut anchor_t = Instant::now();

        let publish = |frame: VideoFrameOut| {
            position_w.store(frame.pts.to_bits(), Ordering::Release);
            ready_w.store(true, Ordering::Release);
            if let Ok(mut g) = slot_w.lock() {
                *g = Some(frame);
            }
        };

        let reopen = |target: f64, failed_w: &AtomicBool| -> Option<PipeStream> {
            match PipeStream::open(&path, target) {
                Some(s) => {
                    failed_w.store(false, Ordering::Release);
                    Some(s)
                }
                None => {
                    tracing::warn!(path = %path, "decode pipe failed to open");
                    failed_w.store(true, Ordering::Release);
                    None
                }
            }
        };

        loop {
            // Drain commands first; the newest seek wins.
            let mut pending_seek: Option<f64> = None;
            while let Ok(cmd) = cmd_rx.try_recv() {
                match cmd {
                    DecodeCmd::Play { start_pts, rate: r } => {
                        if mode != Mode::Playing {
                            mode = Mode::Playing;
                            anchor_pts = start_pts;
                            anchor_t = Instant::now();
                        } else if (r as f64 - rate).abs() > f64::EPSILON {
                            // Rate change re-anchors so progression stays smooth.
                            anchor_pts = anchor_pts + anchor_t.elapsed().as_secs_f64() * rate;
                            anchor_t = Instant::now();
                        }
                        rate = r as f64;
                    }
                    DecodeCmd::Seek { target_pts } => pending_seek = Some(target_pts),
                    DecodeCmd::Pause => {
                        if mode == Mode::Playing {
                            anchor_pts += anchor_t.elapsed().as_secs_f64() * rate;
                        }
                        mode = Mode::Paused;
                    }
                    DecodeCmd::Stop => return,
                }
            }

            if let Some(target) = pending_seek {
                ready_w.store(false, Ordering::Release);
                stream = reopen(target, &failed_w);
                anchor_pts = target;
                anchor_t = Instant::now();
                // Publish the first frame immediately so scrubbing shows
                // the target frame even while paused.
                if let Some(s) = stream.as_mut() {
                    match s.next_frame() {
                        Some(f) => publish(f),
                        None => failed_w.store(true, Ordering::Release),
                    }
                }
                continue;
            }

            match mode {
                Mode::Playing => {
                    let target = anchor_pts + anchor_t.elapsed().as_secs_f64() * rate;
                    if stream.is_none() {
                        stream = reopen(target, &failed_w);
                    }
                    let mut published = false;
                    let mut eof = false;
                    if let Some(s) = stream.as_mut() {
                        // Skip frames we are already past, publish the one
                        // that covers `target`.
                        while s.pts_of_next() <= target {
                            match s.next_frame() {
                                Some(f) => {
                                    if s.pts_of_next() > target {
                                        publish(f);
                                        published = true;
                                        break;
                                    }
                                }
                                None => {
                                    eof = true;
                                    break;
                                }
                            }
                        }
                    }
                    if eof {
                        // EOF: hold the last frame.
                        stream = None;
                        mode = Mode::Paused;
                    }
                    if !published {
                        thread::sleep(std::time::Duration::from_millis(4));
                    }
                }
                Mode::Paused => {
                    thread::sleep(std::time::Duration::from_millis(6));
                }
            }
        }
    });

    DecodeWorker { handle, cmd_tx, slot, position_bits, ready, failed }
}
