use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use allsky_observer::artifact::FileSink;
use allsky_observer::config::{build_config, read_file_config, Args};
use allsky_observer::source::RecordedFileSource;
use allsky_observer::Engine;
use clap::Parser;

fn main() -> ExitCode {
    let args = Args::parse();

    let file_config = match args.config.as_deref() {
        Some(path) => match read_file_config(path) {
            Ok(cfg) => Some(cfg),
            Err(e) => {
                eprintln!("failed to read config file {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => None,
    };

    let config = match build_config(&args, file_config.as_ref()) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&config.log_level)).init();
    log::info!(
        "starting observer: {}x{} @ {} fps, camera_label={}",
        config.plane.width(),
        config.plane.height(),
        config.frame_rate,
        config.camera_label
    );

    let dims = config.plane;
    let mut engine = match Engine::new(config) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("failed to build engine: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Wiring point for a real camera/file decoder (spec §1's external
    // collaborator); `RecordedFileSource` always reports end-of-stream until
    // one is wired in behind `FrameProvider`.
    let mut provider = RecordedFileSource::new(dims);
    let mut sink = FileSink::new();
    let cancel = AtomicBool::new(false);

    match engine.run(&mut provider, &mut sink, &cancel) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("engine exited with error: {e}");
            ExitCode::FAILURE
        }
    }
}
