/// Overrides of the detected hardware properties.
///
/// Unset fields fall back to what the platform reports.
#[derive(Default, Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct HardwareConfig {
    /// Number of worker threads kernels are generated for.
    #[serde(default)]
    pub num_threads: Option<usize>,

    /// Capacity of the per-core L2 cache, in bytes.
    #[serde(default)]
    pub l2_cache_size: Option<usize>,
}
