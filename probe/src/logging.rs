use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::error::Error;

/// Initialise log4rs with a stderr console appender. `level` is one of
/// error, warning, info, debug.
pub fn init(level: &str) -> Result<(), Error> {
    let level = match level {
        "error" => LevelFilter::Error,
        "warning" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        other => {
            return Err(Error::Config(format!("unknown log level \"{}\"", other)));
        }
    };

    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S%.3f)} {h({l})} {m}{n}")))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .map_err(|err| Error::Config(err.to_string()))?;

    log4rs::init_config(config).map_err(|err| Error::Config(err.to_string()))?;
    Ok(())
}
