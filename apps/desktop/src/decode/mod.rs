pub mod worker;

pub(crate) use worker::{spawn_worker, DecodeCmd, DecodeWorker, VideoFrameOut};
