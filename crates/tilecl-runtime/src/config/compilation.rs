use super::logger::{BinaryLogLevel, LoggerConfig};

/// Logging of generated kernels and of the configurations they were generated from.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct CompilationConfig {
    /// Logger used for compilation messages.
    #[serde(default)]
    pub logger: LoggerConfig<CompilationLogLevel>,
}

/// Compilation log level.
pub type CompilationLogLevel = BinaryLogLevel;
