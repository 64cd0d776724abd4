use eframe::NativeOptions;
use tracing_subscriber::EnvFilter;

mod app;
mod audio_decode;
mod audio_engine;
mod clock;
mod decode;
mod preview;
mod timeline;

pub(crate) use app::{App, DragAnchor};

fn main() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let options = NativeOptions::default();
    let _ = eframe::run_native(
        "Driftcut",
        options,
        Box::new(move |_cc| Ok(Box::new(App::new()))),
    );
}
