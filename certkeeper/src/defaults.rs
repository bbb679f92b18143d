use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/certkeeper/certkeeper.toml";
pub const DEFAULT_BACKEND_TIMEOUT: Duration = Duration::from_secs(30);

pub const RELOAD_SHELL: &str = "/bin/sh";
pub const RELOAD_OUTPUT_PREVIEW_CHARS: usize = 400;

pub const RAW_ARTIFACT_DIR_MODE: u32 = 0o755;
pub const PUBLIC_ARTIFACT_MODE: u32 = 0o644;
pub const PRIVATE_KEY_MODE: u32 = 0o600;
