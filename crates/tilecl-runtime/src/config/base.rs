use super::{
    compilation::{CompilationConfig, CompilationLogLevel},
    execution::{ExecutionConfig, ExecutionLogLevel},
    hardware::HardwareConfig,
};
use std::sync::Arc;

/// Static mutex holding the global configuration, initialized as `None`.
static TILECL_GLOBAL_CONFIG: spin::Mutex<Option<Arc<GlobalConfig>>> = spin::Mutex::new(None);

/// Represents the global configuration for TileCL, combining compilation, execution and hardware
/// settings.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalConfig {
    /// Configuration for kernel generation.
    #[serde(default)]
    pub compilation: CompilationConfig,

    /// Configuration for kernel execution.
    #[serde(default)]
    pub execution: ExecutionConfig,

    /// Overrides of the detected hardware properties.
    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl GlobalConfig {
    /// Retrieves the current global configuration, loading it from the current directory if not set.
    ///
    /// If no configuration is set, it attempts to load one from `tilecl.toml` or `TileCL.toml` in the
    /// current directory or its parents, then applies the environment overrides. If no file is
    /// found, a default configuration is used.
    ///
    /// # Notes
    ///
    /// Calling this function takes a global lock. Read the values you need once, when building a
    /// long-lived object such as a [HardwareContext](crate::HardwareContext) or a
    /// [Logger](super::Logger).
    pub fn get() -> Arc<Self> {
        let mut state = TILECL_GLOBAL_CONFIG.lock();

        match state.as_ref() {
            Some(config) => config.clone(),
            None => {
                let config = Arc::new(Self::from_current_dir().override_from_env());
                *state = Some(config.clone());
                config
            }
        }
    }

    /// Save the current configuration to the provided file path.
    pub fn save_default<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<()> {
        let config = Self::get();
        let content = toml::to_string_pretty(config.as_ref())
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))?;
        std::fs::write(path, content)
    }

    /// Sets the global configuration to the provided value.
    ///
    /// # Panics
    /// Panics if the configuration has already been set or read, as it cannot be overridden.
    ///
    /// # Warning
    /// This method must be called at the start of the program, before any calls to `get`. Attempting
    /// to set the configuration after it has been initialized will cause a panic.
    pub fn set(config: Self) {
        let mut state = TILECL_GLOBAL_CONFIG.lock();
        if state.is_some() {
            panic!("Cannot set the global configuration multiple times.");
        }
        *state = Some(Arc::new(config));
    }

    /// Overrides configuration fields based on environment variables.
    pub fn override_from_env(mut self) -> Self {
        if let Ok(val) = std::env::var("TILECL_DEBUG_LOG") {
            self.compilation.logger.level = CompilationLogLevel::Full;
            self.execution.logger.level = ExecutionLogLevel::Full;

            match val.as_str() {
                "stdout" => {
                    self.compilation.logger.stdout = true;
                    self.execution.logger.stdout = true;
                }
                "stderr" => {
                    self.compilation.logger.stderr = true;
                    self.execution.logger.stderr = true;
                }
                "1" | "true" => {
                    let file_path = "/tmp/tilecl.log";
                    self.compilation.logger.file = Some(file_path.into());
                    self.execution.logger.file = Some(file_path.into());
                }
                "0" | "false" => {
                    self.compilation.logger.level = CompilationLogLevel::Disabled;
                    self.execution.logger.level = ExecutionLogLevel::Disabled;
                }
                file_path => {
                    self.compilation.logger.file = Some(file_path.into());
                    self.execution.logger.file = Some(file_path.into());
                }
            }
        };

        if let Some(num_threads) = env_usize("TILECL_NUM_THREADS") {
            self.hardware.num_threads = Some(num_threads);
        }

        if let Some(l2_cache_size) = env_usize("TILECL_L2_CACHE_SIZE") {
            self.hardware.l2_cache_size = Some(l2_cache_size);
        }

        self
    }

    /// Parse a configuration from its TOML representation.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    // Loads configuration from `tilecl.toml` or `TileCL.toml` in the current directory or its parents.
    //
    // Traverses up the directory tree until a valid configuration file is found or the root is reached.
    // Returns a default configuration if no file is found.
    fn from_current_dir() -> Self {
        let Ok(mut dir) = std::env::current_dir() else {
            return Self::default();
        };

        loop {
            for name in ["tilecl.toml", "TileCL.toml"] {
                if let Ok(config) = Self::from_file_path(dir.join(name)) {
                    return config;
                }
            }

            if !dir.pop() {
                break;
            }
        }

        Self::default()
    }

    // Loads configuration from a specified file path.
    fn from_file_path<P: AsRef<std::path::Path>>(path: P) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;

        Self::from_toml(&content).map_err(|err| {
            log::warn!(
                "Ignoring configuration file {}: {err}",
                path.as_ref().display()
            );
            std::io::Error::new(std::io::ErrorKind::InvalidData, err)
        })
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let val = std::env::var(name).ok()?;

    match val.trim().parse::<usize>() {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!("Ignoring {name}={val}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_parse_hardware_section() {
        let config = GlobalConfig::from_toml(
            r#"
            [hardware]
            num_threads = 8
            l2_cache_size = 2097152

            [compilation.logger]
            level = "full"
            stdout = true
            "#,
        )
        .unwrap();

        assert_eq!(config.hardware.num_threads, Some(8));
        assert_eq!(config.hardware.l2_cache_size, Some(2097152));
        assert!(config.compilation.logger.stdout);
        assert!(matches!(
            config.compilation.logger.level,
            CompilationLogLevel::Full
        ));
        assert!(matches!(
            config.execution.logger.level,
            ExecutionLogLevel::Disabled
        ));
    }

    #[test]
    fn test_empty_config_is_default() {
        let config = GlobalConfig::from_toml("").unwrap();

        assert_eq!(config.hardware.num_threads, None);
        assert!(config.compilation.logger.file.is_none());
    }
}
