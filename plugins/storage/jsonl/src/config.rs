// ════════════════════════════════════════════════════════════════
//  Configuration
// ════════════════════════════════════════════════════════════════

/// File name of the log inside `data_dir`.
pub(crate) const LOG_FILE: &str = "messages.jsonl";

#[derive(Debug, Clone, serde::Deserialize)]
pub struct JsonlLogConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// fsync after every append. Off by default: a crash may lose the
    /// last few appends, recovery truncates any torn line.
    #[serde(default)]
    pub sync_writes: bool,
}

impl Default for JsonlLogConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            sync_writes: false,
        }
    }
}

fn default_data_dir() -> String {
    "./data".to_string()
}
