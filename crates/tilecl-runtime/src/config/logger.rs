use super::GlobalConfig;
use crate::config::{compilation::CompilationLogLevel, execution::ExecutionLogLevel};
use core::fmt::Display;
use hashbrown::HashMap;
use std::{
    fs::{File, OpenOptions},
    io::{BufWriter, Write},
    path::PathBuf,
    sync::Arc,
};

/// Configuration for logging in TileCL, parameterized by a log level type.
///
/// Note that you can use multiple loggers at the same time.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
#[serde(bound = "")]
pub struct LoggerConfig<L: LogLevel> {
    /// Path to the log file, if file logging is enabled.
    #[serde(default)]
    pub file: Option<PathBuf>,

    /// Whether to append to the log file (true) or overwrite it (false). Defaults to true.
    ///
    /// ## Notes
    ///
    /// This parameter might get ignored based on other loggers config.
    #[serde(default = "append_default")]
    pub append: bool,

    /// Whether to log to standard output.
    #[serde(default)]
    pub stdout: bool,

    /// Whether to log to standard error.
    #[serde(default)]
    pub stderr: bool,

    /// Optional crate-level logging configuration (e.g., info, debug, trace).
    #[serde(default)]
    pub log: Option<LogCrateLevel>,

    /// The log level for this logger, determining verbosity.
    #[serde(default)]
    pub level: L,
}

impl<L: LogLevel> Default for LoggerConfig<L> {
    fn default() -> Self {
        Self {
            file: None,
            append: true,
            stdout: false,
            stderr: false,
            log: None,
            level: L::default(),
        }
    }
}

/// Log levels using the `log` crate.
///
/// This enum defines verbosity levels for crate-level logging.
#[derive(
    Clone, Copy, Debug, Default, serde::Serialize, serde::Deserialize, Hash, PartialEq, Eq,
)]
pub enum LogCrateLevel {
    /// Logs informational messages.
    #[default]
    #[serde(rename = "info")]
    Info,

    /// Logs debugging messages.
    #[serde(rename = "debug")]
    Debug,

    /// Logs trace-level messages.
    #[serde(rename = "trace")]
    Trace,
}

fn append_default() -> bool {
    true
}

/// Trait for types that can be used as log levels in `LoggerConfig`.
pub trait LogLevel:
    serde::de::DeserializeOwned + serde::Serialize + Clone + Copy + core::fmt::Debug + Default
{
}

/// Central logging utility for TileCL, managing multiple log outputs.
#[derive(Debug)]
pub struct Logger {
    /// Collection of logger instances (file, stdout, stderr, or crate-level).
    loggers: Vec<LoggerKind>,

    /// Indices of loggers used for compilation logging.
    compilation_index: Vec<usize>,

    /// Indices of loggers used for execution logging.
    execution_index: Vec<usize>,

    /// Global configuration for logging settings.
    pub config: Arc<GlobalConfig>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger {
    /// Creates a new `Logger` instance based on the global configuration.
    ///
    /// Note that creating a logger is quite expensive.
    pub fn new() -> Self {
        Self::from_config(GlobalConfig::get())
    }

    /// Creates a new `Logger` instance from the provided configuration.
    pub fn from_config(config: Arc<GlobalConfig>) -> Self {
        let mut loggers = Vec::new();
        let mut compilation_index = Vec::new();
        let mut execution_index = Vec::new();

        #[derive(Hash, PartialEq, Eq)]
        enum LoggerId {
            File(PathBuf),
            Stdout,
            Stderr,
            LogCrate(LogCrateLevel),
        }

        let mut logger2index = HashMap::<LoggerId, usize>::new();

        fn new_logger<S: Clone, ID: Fn(S) -> LoggerId, LG: Fn(S) -> Option<LoggerKind>>(
            setting_index: &mut Vec<usize>,
            loggers: &mut Vec<LoggerKind>,
            logger2index: &mut HashMap<LoggerId, usize>,
            state: S,
            func_id: ID,
            func_logger: LG,
        ) {
            let id = func_id(state.clone());

            if let Some(index) = logger2index.get(&id) {
                setting_index.push(*index);
            } else if let Some(logger) = func_logger(state) {
                let index = loggers.len();
                logger2index.insert(id, index);
                loggers.push(logger);
                setting_index.push(index);
            }
        }

        fn register_logger<L: LogLevel>(
            kind: &LoggerConfig<L>,
            setting_index: &mut Vec<usize>,
            loggers: &mut Vec<LoggerKind>,
            logger2index: &mut HashMap<LoggerId, usize>,
        ) {
            if let Some(file) = &kind.file {
                new_logger(
                    setting_index,
                    loggers,
                    logger2index,
                    (file, kind.append),
                    |(file, _append)| LoggerId::File(file.clone()),
                    |(file, append)| FileLogger::new(file, append).map(LoggerKind::File),
                );
            }

            if kind.stdout {
                new_logger(
                    setting_index,
                    loggers,
                    logger2index,
                    (),
                    |_| LoggerId::Stdout,
                    |_| Some(LoggerKind::Stdout),
                );
            }

            if kind.stderr {
                new_logger(
                    setting_index,
                    loggers,
                    logger2index,
                    (),
                    |_| LoggerId::Stderr,
                    |_| Some(LoggerKind::Stderr),
                );
            }

            if let Some(level) = kind.log {
                new_logger(
                    setting_index,
                    loggers,
                    logger2index,
                    level,
                    LoggerId::LogCrate,
                    |level| Some(LoggerKind::Log(level)),
                );
            }
        }

        if let CompilationLogLevel::Full = config.compilation.logger.level {
            register_logger(
                &config.compilation.logger,
                &mut compilation_index,
                &mut loggers,
                &mut logger2index,
            )
        }

        if let ExecutionLogLevel::Full = config.execution.logger.level {
            register_logger(
                &config.execution.logger,
                &mut execution_index,
                &mut loggers,
                &mut logger2index,
            )
        }

        Self {
            loggers,
            compilation_index,
            execution_index,
            config,
        }
    }

    /// Logs a message for compilation, directing it to all configured compilation loggers.
    pub fn log_compilation<S: Display>(&mut self, msg: &S) {
        let indices = core::mem::take(&mut self.compilation_index);
        self.log_all(&indices, msg);
        self.compilation_index = indices;
    }

    /// Logs a message for execution, directing it to all configured execution loggers.
    pub fn log_execution<S: Display>(&mut self, msg: &S) {
        let indices = core::mem::take(&mut self.execution_index);
        self.log_all(&indices, msg);
        self.execution_index = indices;
    }

    /// Returns the current compilation log level from the global configuration.
    pub fn log_level_compilation(&self) -> CompilationLogLevel {
        self.config.compilation.logger.level
    }

    /// Returns the current execution log level from the global configuration.
    pub fn log_level_execution(&self) -> ExecutionLogLevel {
        self.config.execution.logger.level
    }

    /// Whether at least one compilation logger is active.
    pub fn compilation_enabled(&self) -> bool {
        !self.compilation_index.is_empty()
    }

    /// Whether at least one execution logger is active.
    pub fn execution_enabled(&self) -> bool {
        !self.execution_index.is_empty()
    }

    fn log_all<S: Display>(&mut self, indices: &[usize], msg: &S) {
        match indices {
            [] => {}
            [index] => self.loggers[*index].log(msg),
            indices => {
                let msg = msg.to_string();
                for index in indices {
                    self.loggers[*index].log(&msg);
                }
            }
        }
    }
}

/// Binary log level for enabling or disabling logging.
///
/// This enum provides a simple on/off toggle for logging.
#[derive(Default, Copy, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum BinaryLogLevel {
    /// Logging is disabled.
    #[default]
    #[serde(rename = "disabled")]
    Disabled,

    /// Logging is fully enabled.
    #[serde(rename = "full")]
    Full,
}

impl LogLevel for BinaryLogLevel {}

/// Represents different types of loggers.
#[derive(Debug)]
enum LoggerKind {
    /// Logs to a file.
    File(FileLogger),

    /// Logs to standard output.
    Stdout,

    /// Logs to standard error.
    Stderr,

    /// Logs using the `log` crate with a specified level.
    Log(LogCrateLevel),
}

impl LoggerKind {
    fn log<S: Display>(&mut self, msg: &S) {
        match self {
            LoggerKind::File(file_logger) => file_logger.log(msg),
            LoggerKind::Stdout => println!("{msg}"),
            LoggerKind::Stderr => eprintln!("{msg}"),
            LoggerKind::Log(level) => match level {
                LogCrateLevel::Info => log::info!("{msg}"),
                LogCrateLevel::Debug => log::debug!("{msg}"),
                LogCrateLevel::Trace => log::trace!("{msg}"),
            },
        }
    }
}

/// Logger that writes messages to a file.
#[derive(Debug)]
struct FileLogger {
    writer: BufWriter<File>,
}

impl FileLogger {
    // Opens the log file, `None` when it can't be opened.
    fn new(path: &PathBuf, append: bool) -> Option<Self> {
        let file = OpenOptions::new()
            .write(true)
            .append(append)
            .truncate(!append)
            .create(true)
            .open(path);

        match file {
            Ok(file) => Some(Self {
                writer: BufWriter::new(file),
            }),
            Err(err) => {
                log::warn!("Can't open log file {}: {err}", path.display());
                None
            }
        }
    }

    // Logs a message to the file, flushing the buffer to ensure immediate write.
    fn log<S: Display>(&mut self, msg: &S) {
        let result = writeln!(self.writer, "{msg}").and_then(|_| self.writer.flush());

        if let Err(err) = result {
            log::warn!("Can't write to log file: {err}");
        }
    }
}
