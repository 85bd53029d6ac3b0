use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

use crate::error::{CalcError, CalcResult};

/// Send log messages at `level` and above to stderr.
///
/// Fails if the configuration is invalid or a logger was already installed.
pub fn init_logging(level: log::LevelFilter) -> CalcResult<()> {
    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{h({d(%Y-%m-%d %H:%M:%S)} [{l}] from line {L} in {M})} - {m}{n}",
        )))
        .target(Target::Stderr)
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|e| CalcError::context(format!("failed to configure logger: {e}")))?;

    log4rs::init_config(config).map_err(|e| CalcError::context(format!("failed to initialize logger: {e}")))?;
    Ok(())
}

/// Log `stage` at `level`, then run `f` and return its result.
pub fn traced_stage<T, F: FnOnce() -> T>(level: log::Level, stage: &str, f: F) -> T {
    log::log!(level, "{stage}");
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_traced_stage_runs_once() {
        let calls = RefCell::new(0);
        let out = traced_stage(log::Level::Info, "Adding", || {
            *calls.borrow_mut() += 1;
            2 + 2
        });
        assert_eq!(out, 4);
        assert_eq!(*calls.borrow(), 1);
    }

    #[test]
    fn test_init_logging_twice_errors() {
        // Another test may have already installed the logger, so only the second call is checked.
        let _ = init_logging(log::LevelFilter::Debug);
        assert!(init_logging(log::LevelFilter::Debug).is_err());
    }
}
