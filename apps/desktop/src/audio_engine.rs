//! Audio voice pool.
//!
//! Zero or more voices, one per active audible action, mix into a single
//! cpal output stream. Voices read from whole-file decoded buffers, so a
//! "seek" is a cursor assignment and never glitches the device. Drift
//! against the timeline clock is corrected by nudging a voice's rate a few
//! percent ("soft sync"); hard seeks are the failsafe, plus the normal case
//! while paused or scrubbing where there is no continuous audio to protect.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use timeline::ActionId;

use crate::audio_decode::decode_to_buffer;

/// Past this the voice is considered lost and is hard-seeked.
const HARD_SEEK_DRIFT: f64 = 0.30;
/// Between this and the hard-seek bound, playback rate is nudged instead.
const NUDGE_DRIFT: f64 = 0.04;
/// Size of the rate nudge.
const NUDGE_FACTOR: f64 = 0.05;

pub struct AudioBuffer {
    /// Interleaved f32 samples.
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
    pub duration_sec: f64,
}

impl AudioBuffer {
    fn sample(&self, frame: usize, channel: usize) -> f32 {
        let ch = channel % self.channels as usize;
        self.samples
            .get(frame * self.channels as usize + ch)
            .copied()
            .unwrap_or(0.0)
    }
}

/// What one resync step should do, as a pure decision so the thresholds are
/// testable without a device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SyncCorrection {
    /// In tolerance: run at exactly nominal rate.
    Nominal,
    /// Converge smoothly by scaling the voice rate by this factor.
    Nudge(f64),
    /// Jump the cursor; audible, but the voice is too far gone.
    HardSeek,
}

impl SyncCorrection {
    pub fn decide(drift: f64, playing: bool) -> Self {
        if !playing {
            // No continuous audio to protect while paused/scrubbing:
            // resync unconditionally on every clock update.
            return SyncCorrection::HardSeek;
        }
        let mag = drift.abs();
        if mag > HARD_SEEK_DRIFT {
            SyncCorrection::HardSeek
        } else if mag > NUDGE_DRIFT {
            // Ahead of the clock: slow down. Behind: speed up.
            let factor = if drift > 0.0 { 1.0 - NUDGE_FACTOR } else { 1.0 + NUDGE_FACTOR };
            SyncCorrection::Nudge(factor)
        } else {
            SyncCorrection::Nominal
        }
    }
}

struct Voice {
    buffer: Arc<AudioBuffer>,
    /// Seconds into the source. Wraps modulo the buffer duration so a
    /// short source loops under a longer slot.
    cursor: f64,
    rate_adjust: f64,
}

struct MixerState {
    voices: HashMap<ActionId, Voice>,
    master_rate: f64,
    running: bool,
}

impl MixerState {
    fn new() -> Self {
        Self { voices: HashMap::new(), master_rate: 1.0, running: false }
    }
}

/// Mix `out` (interleaved, `out_channels` wide, at `device_rate`) from all
/// voices, advancing cursors. Silence without advancing when not running.
fn mix_frames(state: &mut MixerState, out: &mut [f32], out_channels: u16, device_rate: u32) {
    out.fill(0.0);
    if !state.running || device_rate == 0 {
        return;
    }
    let channels = out_channels.max(1) as usize;
    let frames = out.len() / channels;
    let dt = state.master_rate / device_rate as f64;
    for voice in state.voices.values_mut() {
        let step = dt * voice.rate_adjust;
        let mut cursor = voice.cursor;
        for f in 0..frames {
            let src_frame = (cursor * voice.buffer.sample_rate as f64) as usize;
            for c in 0..channels {
                out[f * channels + c] += voice.buffer.sample(src_frame, c);
            }
            cursor += step;
            if cursor >= voice.buffer.duration_sec {
                cursor %= voice.buffer.duration_sec;
            }
        }
        voice.cursor = cursor;
    }
    for s in out.iter_mut() {
        *s = s.clamp(-1.0, 1.0);
    }
}

pub struct AudioEngine {
    stream: Option<cpal::Stream>,
    mixer: Arc<Mutex<MixerState>>,
    buffers: HashMap<PathBuf, Arc<AudioBuffer>>,
    failed: HashSet<PathBuf>,
}

impl AudioEngine {
    pub fn new() -> anyhow::Result<Self> {
        let mixer = Arc::new(Mutex::new(MixerState::new()));

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| anyhow::anyhow!("no audio output device"))?;
        let supported = device.default_output_config()?;
        let device_rate = supported.sample_rate().0;
        let channels = supported.channels();

        let err_fn = |e| tracing::warn!("audio stream error: {e}");
        let mix = mixer.clone();
        let stream = match supported.sample_format() {
            cpal::SampleFormat::F32 => device.build_output_stream(
                &supported.config(),
                move |out: &mut [f32], _| {
                    if let Ok(mut state) = mix.lock() {
                        mix_frames(&mut state, out, channels, device_rate);
                    }
                },
                err_fn,
                None,
            )?,
            cpal::SampleFormat::I16 => device.build_output_stream(
                &supported.config(),
                move |out: &mut [i16], _| {
                    let mut scratch = vec![0f32; out.len()];
                    if let Ok(mut state) = mix.lock() {
                        mix_frames(&mut state, &mut scratch, channels, device_rate);
                    }
                    for (dst, src) in out.iter_mut().zip(&scratch) {
                        *dst = (src * 32767.0) as i16;
                    }
                },
                err_fn,
                None,
            )?,
            cpal::SampleFormat::U16 => device.build_output_stream(
                &supported.config(),
                move |out: &mut [u16], _| {
                    let mut scratch = vec![0f32; out.len()];
                    if let Ok(mut state) = mix.lock() {
                        mix_frames(&mut state, &mut scratch, channels, device_rate);
                    }
                    for (dst, src) in out.iter_mut().zip(&scratch) {
                        *dst = ((src * 32767.0) as i32 + 32768) as u16;
                    }
                },
                err_fn,
                None,
            )?,
            other => anyhow::bail!("unsupported output sample format {other:?}"),
        };
        // Output may start suspended on some platforms; unlock() retries
        // from user-gesture handlers.
        let _ = stream.play();

        Ok(Self { stream: Some(stream), mixer, buffers: HashMap::new(), failed: HashSet::new() })
    }

    /// Resume a suspended output stream. Call synchronously from a user
    /// input handler; platforms that gate audio on a gesture accept it
    /// there and nowhere else.
    pub fn unlock(&self) {
        if let Some(stream) = &self.stream {
            let _ = stream.play();
        }
    }

    fn buffer_for(&mut self, path: &Path) -> Option<Arc<AudioBuffer>> {
        if let Some(buf) = self.buffers.get(path) {
            return Some(buf.clone());
        }
        if self.failed.contains(path) {
            return None;
        }
        match decode_to_buffer(path) {
            Ok(buf) => {
                let arc = Arc::new(buf);
                self.buffers.insert(path.to_path_buf(), arc.clone());
                Some(arc)
            }
            Err(e) => {
                // Silent clip, once; never propagated to the playback loop.
                tracing::warn!(?path, error = %e, "audio decode failed");
                self.failed.insert(path.to_path_buf());
                None
            }
        }
    }

    /// Begin (or keep) a voice for an action. An already-active action is
    /// left to the per-tick resync; restarting it would click.
    pub fn start(
        &mut self,
        action: ActionId,
        path: &Path,
        action_start: f64,
        offset: f64,
        clock_time: f64,
    ) {
        {
            let state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
            if state.voices.contains_key(&action) {
                return;
            }
        }
        let Some(buffer) = self.buffer_for(path) else { return };
        let mut cursor = (clock_time - action_start + offset).max(0.0);
        if buffer.duration_sec > 0.0 {
            cursor %= buffer.duration_sec;
        }
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.voices.insert(action, Voice { buffer, cursor, rate_adjust: 1.0 });
    }

    pub fn stop(&mut self, action: ActionId) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.voices.remove(&action);
    }

    /// Stop every voice whose action is not in `keep`.
    pub fn retain(&mut self, keep: &HashSet<ActionId>) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.voices.retain(|id, _| keep.contains(id));
    }

    /// One resync step for an action against its clock-expected position.
    pub fn resync(&mut self, action: ActionId, expected: f64, playing: bool) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        let Some(voice) = state.voices.get_mut(&action) else { return };
        let expected = if voice.buffer.duration_sec > 0.0 {
            expected.max(0.0) % voice.buffer.duration_sec
        } else {
            0.0
        };
        let drift = voice.cursor - expected;
        match SyncCorrection::decide(drift, playing) {
            SyncCorrection::HardSeek => {
                voice.cursor = expected;
                voice.rate_adjust = 1.0;
            }
            SyncCorrection::Nudge(factor) => voice.rate_adjust = factor,
            SyncCorrection::Nominal => voice.rate_adjust = 1.0,
        }
    }

    /// Propagates immediately: the next device callback mixes at the new
    /// rate for every voice.
    pub fn set_master_rate(&mut self, rate: f64) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.master_rate = if rate.is_finite() && rate > 0.0 { rate } else { 1.0 };
    }

    pub fn set_running(&mut self, running: bool) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.running = running;
    }

    /// Full pool reset: drop every voice and decoded buffer. Used on
    /// snapshot restore, where action ids change wholesale and stale voice
    /// bindings are exactly the failure being avoided.
    pub fn reset_voices(&mut self) {
        let mut state = self.mixer.lock().unwrap_or_else(|e| e.into_inner());
        state.voices.clear();
        drop(state);
        self.buffers.clear();
        self.failed.clear();
    }

    /// Release the device and every voice.
    pub fn dispose(&mut self) {
        self.reset_voices();
        self.stream = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone_buffer(duration_sec: f64, sample_rate: u32) -> Arc<AudioBuffer> {
        let frames = (duration_sec * sample_rate as f64) as usize;
        // Ramp so positions are distinguishable.
        let samples: Vec<f32> = (0..frames).map(|i| i as f32 / frames as f32).collect();
        Arc::new(AudioBuffer { samples, channels: 1, sample_rate, duration_sec })
    }

    #[test]
    fn large_drift_hard_seeks_while_playing() {
        assert_eq!(SyncCorrection::decide(0.5, true), SyncCorrection::HardSeek);
        assert_eq!(SyncCorrection::decide(-0.5, true), SyncCorrection::HardSeek);
    }

    #[test]
    fn moderate_drift_nudges_never_seeks() {
        match SyncCorrection::decide(0.08, true) {
            SyncCorrection::Nudge(f) => assert!(f < 1.0, "ahead of clock should slow down"),
            other => panic!("expected nudge, got {other:?}"),
        }
        match SyncCorrection::decide(-0.08, true) {
            SyncCorrection::Nudge(f) => assert!(f > 1.0, "behind the clock should speed up"),
            other => panic!("expected nudge, got {other:?}"),
        }
    }

    #[test]
    fn small_drift_runs_nominal() {
        assert_eq!(SyncCorrection::decide(0.02, true), SyncCorrection::Nominal);
        assert_eq!(SyncCorrection::decide(-0.039, true), SyncCorrection::Nominal);
    }

    #[test]
    fn paused_resync_is_always_a_hard_seek() {
        assert_eq!(SyncCorrection::decide(0.001, false), SyncCorrection::HardSeek);
        assert_eq!(SyncCorrection::decide(0.2, false), SyncCorrection::HardSeek);
    }

    #[test]
    fn mixing_advances_cursors_at_master_rate() {
        let mut state = MixerState::new();
        state.running = true;
        state.master_rate = 2.0;
        let id = ActionId::new();
        state
            .voices
            .insert(id, Voice { buffer: tone_buffer(10.0, 48_000), cursor: 1.0, rate_adjust: 1.0 });

        let mut out = vec![0f32; 2 * 4800]; // 4800 stereo frames = 0.1s device time
        mix_frames(&mut state, &mut out, 2, 48_000);
        let cursor = state.voices[&id].cursor;
        assert!((cursor - 1.2).abs() < 1e-6, "0.1s at 2x should advance 0.2s, got {cursor}");
        assert!(out.iter().any(|s| *s != 0.0));
    }

    #[test]
    fn short_sources_loop_modulo_duration() {
        let mut state = MixerState::new();
        state.running = true;
        let id = ActionId::new();
        state
            .voices
            .insert(id, Voice { buffer: tone_buffer(0.05, 48_000), cursor: 0.04, rate_adjust: 1.0 });

        let mut out = vec![0f32; 4800]; // 0.1s mono
        mix_frames(&mut state, &mut out, 1, 48_000);
        let cursor = state.voices[&id].cursor;
        assert!(cursor < 0.05, "cursor must wrap inside the source, got {cursor}");
    }

    #[test]
    fn stopped_mixer_emits_silence_and_holds_position() {
        let mut state = MixerState::new();
        state.running = false;
        let id = ActionId::new();
        state
            .voices
            .insert(id, Voice { buffer: tone_buffer(1.0, 48_000), cursor: 0.5, rate_adjust: 1.0 });
        let mut out = vec![1f32; 512];
        mix_frames(&mut state, &mut out, 1, 48_000);
        assert!(out.iter().all(|s| *s == 0.0));
        assert_eq!(state.voices[&id].cursor, 0.5);
    }
}
