use std::path::PathBuf;

pub const ENV_LIB_DIR: &str = "EYELOGIC_LIB_DIR";
pub const ENV_LIB_NAME: &str = "EYELOGIC_LIB_NAME";
pub const ENV_EVENT_CAPACITY: &str = "EYELOGIC_EVENT_CAPACITY";
pub const ENV_SIMULATE: &str = "EYELOGIC_SIMULATE";

pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Where to find the native module and how to size event queues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Directory holding the native module. `None` means next to the
    /// running executable.
    pub library_dir: Option<PathBuf>,
    /// Base name without platform prefix/suffix. `None` picks `ELCApi` or
    /// `ELCApi32` by pointer width.
    pub library_name: Option<String>,
    /// Capacity of queues created by [`crate::events::channel`] via
    /// [`ClientConfig::event_channel`].
    pub event_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            library_dir: None,
            library_name: None,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl ClientConfig {
    /// Read `EYELOGIC_*` variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            library_dir: read_env_string(ENV_LIB_DIR).map(PathBuf::from),
            library_name: read_env_string(ENV_LIB_NAME),
            event_capacity: read_env_usize(ENV_EVENT_CAPACITY, DEFAULT_EVENT_CAPACITY).max(1),
        }
    }

    pub fn with_library_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.library_dir = Some(dir.into());
        self
    }

    pub fn with_library_name(mut self, name: impl Into<String>) -> Self {
        self.library_name = Some(name.into());
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity.max(1);
        self
    }

    pub fn event_channel(&self) -> (crate::events::EventSender, crate::events::EventStream) {
        crate::events::channel(self.event_capacity)
    }
}

/// Whether `EYELOGIC_SIMULATE` asks for the in-process simulator.
pub fn simulate_requested() -> bool {
    read_env_bool(ENV_SIMULATE, false)
}

pub(crate) fn read_env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .ok()
        .and_then(|v| parse_bool(&v))
        .unwrap_or(default)
}

fn parse_bool(v: &str) -> Option<bool> {
    match v.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn read_env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
        .unwrap_or(default)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
