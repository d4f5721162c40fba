use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// Initialise the global logger.
///
/// `RUST_LOG` wins over `default_filter`. Calling this twice is harmless,
/// the second call is ignored.
pub fn init_logger(default_filter: &str) {
    let env = Env::default().filter_or("RUST_LOG", default_filter);

    let mut builder = Builder::from_env(env);

    // HTTP plumbing is noisy at debug level
    builder
        .filter_module("hyper", LevelFilter::Warn)
        .filter_module("mio", LevelFilter::Error)
        .filter_module("symphonia_core", LevelFilter::Warn)
        .filter_module("symphonia_bundle_mp3", LevelFilter::Warn)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .target(env_logger::Target::Stderr);

    let _ = builder.try_init();
}
