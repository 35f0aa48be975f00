use super::logger::{BinaryLogLevel, LoggerConfig};

/// Logging of kernel executions on the reference executor.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ExecutionConfig {
    /// Logger used for execution messages.
    #[serde(default)]
    pub logger: LoggerConfig<ExecutionLogLevel>,
}

/// Execution log level.
pub type ExecutionLogLevel = BinaryLogLevel;
