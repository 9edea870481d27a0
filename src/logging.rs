use std::path::PathBuf;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::file::FileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use log4rs::filter::threshold::ThresholdFilter;
use log4rs::Handle;

pub fn init_logging(log_fp: Option<&PathBuf>) -> Option<Handle> {
    let level = LevelFilter::Info;
    let file_level = LevelFilter::Debug;

    let stderr = ConsoleAppender::builder()
        .encoder(Box::new(PatternEncoder::new("> {m}{n}")))
        .target(Target::Stderr)
        .build();

    let config = if let Some(fp) = log_fp {
        let logfile = match FileAppender::builder()
            .encoder(Box::new(PatternEncoder::new(
                "[{f}::{L}][{d(%Y-%m-%d %H:%M:%S)}][{l}] {m}{n}",
            )))
            .build(fp)
        {
            Ok(appender) => appender,
            Err(e) => {
                eprintln!(
                    "> failed to make file logger at {fp:?}, {}",
                    e.to_string()
                );
                return None;
            }
        };
        Config::builder()
            .appender(Appender::builder().build("logfile", Box::new(logfile)))
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(level)))
                    .build("stderr", Box::new(stderr)),
            )
            .build(
                Root::builder()
                    .appender("logfile")
                    .appender("stderr")
                    .build(file_level),
            )
    } else {
        Config::builder()
            .appender(
                Appender::builder()
                    .filter(Box::new(ThresholdFilter::new(level)))
                    .build("stderr", Box::new(stderr)),
            )
            .build(Root::builder().appender("stderr").build(level))
    };

    match config {
        Ok(config) => match log4rs::init_config(config) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("> failed to init logging, {}", e.to_string());
                None
            }
        },
        Err(e) => {
            eprintln!("> failed to build log config, {}", e.to_string());
            None
        }
    }
}
