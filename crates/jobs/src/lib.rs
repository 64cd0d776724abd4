//! Background proxy-media pipeline.
//!
//! Imported footage gets a lower-resolution proxy video and a separated
//! proxy audio stream rendered into the media cache directory, so editing
//! playback can prefer cheap streams over original footage. Work runs on a
//! small worker pool; the editor only ever consumes the event stream.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::{sync::Arc, thread, time::Duration};

use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum JobError {
    #[error("ffmpeg not found on PATH")]
    ToolMissing,
    #[error("proxy render failed with exit code {code:?}")]
    Failed { code: Option<i32> },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum JobKind {
    ProxyVideo,
    ProxyAudio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Logical source id the proxy belongs to (the action's `src`).
    pub src: String,
    /// Resolved local input file to transcode from.
    pub input: PathBuf,
    pub kind: JobKind,
    pub priority: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobStatus {
    Pending,
    Running,
    Progress(f32),
    Done { output: PathBuf },
    Failed(String),
    Canceled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEvent {
    pub id: String,
    pub src: String,
    pub kind: JobKind,
    pub status: JobStatus,
}

#[derive(Clone)]
pub struct JobsHandle {
    tx_submit: Sender<(String, JobSpec)>,
    tx_cancel: Sender<String>,
    pub rx_events: Receiver<JobEvent>,
}

pub struct JobsRuntime {
    rx_submit: Receiver<(String, JobSpec)>,
    rx_cancel: Receiver<String>,
    tx_events: Sender<JobEvent>,
    canceled: Arc<Mutex<HashSet<String>>>,
}

impl JobsRuntime {
    pub fn start(num_workers: usize) -> JobsHandle {
        let (tx_submit, rx_submit) = unbounded::<(String, JobSpec)>();
        let (tx_cancel, rx_cancel) = unbounded::<String>();
        let (tx_events, rx_events) = unbounded::<JobEvent>();
        let queue: Arc<Mutex<VecDeque<(String, JobSpec)>>> = Arc::new(Mutex::new(VecDeque::new()));
        let canceled = Arc::new(Mutex::new(HashSet::new()));

        let runtime = JobsRuntime {
            rx_submit,
            rx_cancel,
            tx_events: tx_events.clone(),
            canceled: canceled.clone(),
        };
        runtime.spawn_workers(num_workers.max(1), queue.clone());

        // Feeder thread: serializes submissions and cancellations into the
        // shared queue.
        {
            let q = queue;
            let rx_s = runtime.rx_submit.clone();
            let rx_c = runtime.rx_cancel.clone();
            let tx_e = runtime.tx_events.clone();
            thread::spawn(move || {
                loop {
                    crossbeam_channel::select! {
                        recv(rx_s) -> msg => {
                            if let Ok((id, spec)) = msg {
                                if canceled.lock().contains(&id) { continue; }
                                q.lock().push_back((id.clone(), spec.clone()));
                                let _ = tx_e.send(JobEvent { id, src: spec.src.clone(), kind: spec.kind, status: JobStatus::Pending });
                            }
                            else { break; }
                        }
                        recv(rx_c) -> msg => {
                            if let Ok(id) = msg { canceled.lock().insert(id); }
                            else { break; }
                        }
                        default(Duration::from_millis(10)) => {}
                    }
                }
            });
        }

        JobsHandle { tx_submit, tx_cancel, rx_events }
    }

    fn spawn_workers(&self, n: usize, queue: Arc<Mutex<VecDeque<(String, JobSpec)>>>) {
        for _ in 0..n {
            let q = queue.clone();
            let tx_e = self.tx_events.clone();
            let canceled = self.canceled.clone();
            thread::spawn(move || loop {
                let job_opt = {
                    let mut ql = q.lock();
                    let mut found: Option<(String, JobSpec)> = None;
                    while let Some((id, spec)) = ql.pop_front() {
                        if !canceled.lock().contains(&id) {
                            found = Some((id, spec));
                            break;
                        }
                    }
                    found
                };
                let Some((id, spec)) = job_opt else {
                    thread::sleep(Duration::from_millis(10));
                    continue;
                };
                if canceled.lock().contains(&id) {
                    let _ = tx_e.send(JobEvent {
                        id,
                        src: spec.src.clone(),
                        kind: spec.kind,
                        status: JobStatus::Canceled,
                    });
                    continue;
                }
                let _ = tx_e.send(JobEvent {
                    id: id.clone(),
                    src: spec.src.clone(),
                    kind: spec.kind,
                    status: JobStatus::Running,
                });
                let status = match render_proxy(&spec) {
                    Ok(output) => JobStatus::Done { output },
                    Err(e) => {
                        tracing::warn!(src = %spec.src, error = %e, "proxy job failed");
                        JobStatus::Failed(e.to_string())
                    }
                };
                let _ = tx_e.send(JobEvent { id, src: spec.src, kind: spec.kind, status });
            });
        }
    }
}

impl JobsHandle {
    pub fn enqueue(&self, spec: JobSpec) -> String {
        let id = Uuid::new_v4().to_string();
        let _ = self.tx_submit.send((id.clone(), spec));
        id
    }

    pub fn cancel_job(&self, job_id: &str) {
        let _ = self.tx_cancel.send(job_id.to_string());
    }
}

/// Where a proxy for `src` lands, whether or not it exists yet.
pub fn proxy_output_path(src: &str, kind: JobKind) -> PathBuf {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let mut hasher = DefaultHasher::new();
    src.hash(&mut hasher);
    let (prefix, ext) = match kind {
        JobKind::ProxyVideo => ("proxy", "mp4"),
        JobKind::ProxyAudio => ("proxy-audio", "wav"),
    };
    media_io::media_cache_dir().join(format!("{prefix}-{:016x}.{ext}", hasher.finish()))
}

fn render_proxy(spec: &JobSpec) -> Result<PathBuf, JobError> {
    let ffmpeg = media_io::ffmpeg_path().ok_or(JobError::ToolMissing)?;
    let output = proxy_output_path(&spec.src, spec.kind);
    if output.is_file() {
        return Ok(output);
    }
    if let Some(dir) = output.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = output.with_extension("part");

    let mut cmd = std::process::Command::new(ffmpeg);
    cmd.arg("-y").arg("-i").arg(&spec.input);
    match spec.kind {
        JobKind::ProxyVideo => {
            cmd.arg("-vf")
                .arg("scale=-2:540")
                .arg("-c:v")
                .arg("libx264")
                .arg("-preset")
                .arg("veryfast")
                .arg("-crf")
                .arg("28")
                .arg("-an");
        }
        JobKind::ProxyAudio => {
            cmd.arg("-vn").arg("-ac").arg("2").arg("-ar").arg("48000").arg("-c:a").arg("pcm_s16le");
        }
    }
    // The temp file has a .part name, so pin the muxer explicitly.
    cmd.arg("-f").arg(match spec.kind {
        JobKind::ProxyVideo => "mp4",
        JobKind::ProxyAudio => "wav",
    });
    cmd.arg(&tmp)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());

    let status = cmd.status()?;
    if !status.success() {
        let _ = std::fs::remove_file(&tmp);
        return Err(JobError::Failed { code: status.code() });
    }
    std::fs::rename(&tmp, &output)?;
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proxy_paths_are_stable_and_kind_specific() {
        let v1 = proxy_output_path("footage/a.mp4", JobKind::ProxyVideo);
        let v2 = proxy_output_path("footage/a.mp4", JobKind::ProxyVideo);
        let a = proxy_output_path("footage/a.mp4", JobKind::ProxyAudio);
        assert_eq!(v1, v2);
        assert_ne!(v1, a);
        assert_eq!(v1.extension().and_then(|e| e.to_str()), Some("mp4"));
        assert_eq!(a.extension().and_then(|e| e.to_str()), Some("wav"));
    }

    #[test]
    fn jobs_without_inputs_fail_without_panicking() {
        let handle = JobsRuntime::start(1);
        let id = handle.enqueue(JobSpec {
            src: "missing-input.mp4".into(),
            input: PathBuf::from("/nope/missing-input.mp4"),
            kind: JobKind::ProxyVideo,
            priority: 0,
        });
        // Drain until this job terminates one way or the other.
        let deadline = std::time::Instant::now() + Duration::from_secs(10);
        let mut terminal = None;
        while std::time::Instant::now() < deadline {
            match handle.rx_events.recv_timeout(Duration::from_millis(200)) {
                Ok(ev) if ev.id == id => match ev.status {
                    JobStatus::Failed(_) | JobStatus::Done { .. } | JobStatus::Canceled => {
                        terminal = Some(ev.status);
                        break;
                    }
                    _ => {}
                },
                Ok(_) => {}
                Err(_) => {}
            }
        }
        assert!(matches!(terminal, Some(JobStatus::Failed(_))));
    }
}
