use log::LevelFilter;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::append::rolling_file::policy::compound::{
    CompoundPolicy, roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger,
};
use log4rs::config::{Appender, Config, Logger, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::{Path, PathBuf};

const ENCODER_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} - {m}{n}";
const ROLL_SIZE: u64 = 10 * 1024 * 1024;

/// Initializes the logging system from a log4rs YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read or a logger is already installed.
pub fn init_path(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    log4rs::init_file(path, log4rs::config::Deserializers::default())?;
    Ok(())
}

fn parse_level(level: Option<&str>) -> LevelFilter {
    match level.unwrap_or("info").to_ascii_lowercase().as_str() {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        "off" => LevelFilter::Off,
        _ => LevelFilter::Info,
    }
}

fn rolling(
    base: &Path,
    stem: &str,
    keep: u32,
) -> Result<RollingFileAppender, Box<dyn std::error::Error>> {
    let roller = FixedWindowRoller::builder()
        .build(&format!("{}", base.join(format!("{stem}.{{}}.log")).display()), keep)?;
    let policy = CompoundPolicy::new(Box::new(SizeTrigger::new(ROLL_SIZE)), Box::new(roller));
    let appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(ENCODER_PATTERN)))
        .build(base.join(format!("{stem}.log")), Box::new(policy))?;
    Ok(appender)
}

/// Configure logging globally for the process. If log4rs is already initialized, the
/// existing logger is kept.
/// - dir: base directory for logs; if None, current directory.
/// - level: off|error|warn|info|debug|trace
/// - retention: number of rolled files to keep (default 7)
///
/// # Errors
/// Returns an error if the log directory or appenders cannot be created.
pub fn configure_logging(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    configure_logging_with_dev(dir, level, retention, false)
}

/// Like [`configure_logging`], optionally persisting `dev6!` output to `dev6.log`.
///
/// # Errors
/// Returns an error if the log directory or appenders cannot be created.
pub fn configure_logging_with_dev(
    dir: Option<&Path>,
    level: Option<&str>,
    retention: Option<usize>,
    enable_dev6: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let base = dir
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    std::fs::create_dir_all(&base)?;
    let keep = u32::try_from(retention.unwrap_or(7)).unwrap_or(u32::MAX);
    let lvl = parse_level(level);

    let mut builder = Config::builder()
        .appender(Appender::builder().build("app", Box::new(rolling(&base, "app", keep)?)))
        .appender(Appender::builder().build("metrics", Box::new(rolling(&base, "metrics", keep)?)))
        .logger(
            Logger::builder().appender("metrics").additive(false).build("docscan::metrics", lvl),
        );

    if enable_dev6 {
        builder = builder
            .appender(Appender::builder().build("dev6", Box::new(rolling(&base, "dev6", keep)?)))
            .logger(
                Logger::builder()
                    .appender("dev6")
                    .additive(false)
                    .build("docscan::dev6", LevelFilter::Trace),
            );
    } else {
        builder = builder
            .logger(Logger::builder().additive(false).build("docscan::dev6", LevelFilter::Off));
    }

    let config = builder.build(Root::builder().appender("app").build(lvl))?;
    // A second init in the same process keeps the first logger.
    let _ = log4rs::init_config(config);
    Ok(())
}

/// Configure logging from environment variables if present:
/// - DOCSCAN_LOG_DIR
/// - DOCSCAN_LOG_LEVEL
/// - DOCSCAN_LOG_RETENTION
/// - DOCSCAN_DEV6
///
/// # Errors
/// Returns an error if the log directory or appenders cannot be created.
pub fn configure_from_env() -> Result<(), Box<dyn std::error::Error>> {
    let dir = std::env::var("DOCSCAN_LOG_DIR").ok().map(PathBuf::from);
    let level = std::env::var("DOCSCAN_LOG_LEVEL").ok();
    let retention =
        std::env::var("DOCSCAN_LOG_RETENTION").ok().and_then(|s| s.parse::<usize>().ok());
    let dev6_enabled = std::env::var("DOCSCAN_DEV6")
        .map(|s| matches!(s.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false);
    configure_logging_with_dev(dir.as_deref(), level.as_deref(), retention, dev6_enabled)
}
