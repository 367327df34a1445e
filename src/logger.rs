use indicatif::MultiProgress;
use indicatif_log_bridge::LogWrapper;
use log::{Level, LevelFilter, Metadata, Record};

static LOGGER: PeerLogger = PeerLogger;

/// `LEVEL - message` on stdout. Other crates only get through at warn and above.
#[derive(Clone, Copy)]
struct PeerLogger;

impl log::Log for PeerLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= Level::Warn || metadata.target().starts_with(env!("CARGO_CRATE_NAME"))
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            println!("{} - {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

pub fn init(level: LevelFilter) -> Result<(), log::SetLoggerError> {
    log::set_logger(&LOGGER).map(|()| log::set_max_level(level))
}

/// Like `init`, but routes log lines through `MultiProgress` so progress bars
/// drawn on it are not torn by concurrent logging.
pub fn init_with_progress(level: LevelFilter) -> Result<MultiProgress, log::SetLoggerError> {
    let multi = MultiProgress::new();
    LogWrapper::new(multi.clone(), PeerLogger).try_init()?;
    log::set_max_level(level);
    Ok(multi)
}
