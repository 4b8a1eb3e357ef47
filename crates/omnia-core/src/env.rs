//! The environment-variable contract consumed by worker processes.

/// Job name.
pub const ARENA_JOB_NAME: &str = "ARENA_JOB_NAME";
/// Job namespace.
pub const ARENA_JOB_NAMESPACE: &str = "ARENA_JOB_NAMESPACE";
/// Referenced source name.
pub const ARENA_SOURCE_NAME: &str = "ARENA_SOURCE_NAME";
/// Arena file path inside the source content.
pub const ARENA_FILE: &str = "ARENA_FILE";
/// Job type string (`evaluation` or `load-test`).
pub const ARENA_JOB_TYPE: &str = "ARENA_JOB_TYPE";
/// Mount point of the workspace content volume.
pub const ARENA_CONTENT_PATH: &str = "ARENA_CONTENT_PATH";
/// Basename of the arena config file.
pub const ARENA_CONFIG_FILE: &str = "ARENA_CONFIG_FILE";
/// Source artefact version.
pub const ARENA_CONTENT_VERSION: &str = "ARENA_CONTENT_VERSION";
/// Path of the mounted override config.
pub const ARENA_OVERRIDES_PATH: &str = "ARENA_OVERRIDES_PATH";
/// Verbose worker logging flag.
pub const ARENA_VERBOSE: &str = "ARENA_VERBOSE";
/// Execution mode (`direct` or `fleet`).
pub const ARENA_EXECUTION_MODE: &str = "ARENA_EXECUTION_MODE";
/// WebSocket URL of the fleet target runtime.
pub const ARENA_FLEET_WS_URL: &str = "ARENA_FLEET_WS_URL";
/// Work queue address.
pub const REDIS_ADDR: &str = "REDIS_ADDR";
/// Work queue password.
pub const REDIS_PASSWORD: &str = "REDIS_PASSWORD";

/// Fixed mount point of workspace content inside worker pods.
pub const CONTENT_MOUNT_POINT: &str = "/workspace-content";
/// Fixed path of the override config inside worker pods.
pub const OVERRIDES_MOUNT_PATH: &str = "/etc/arena/overrides.json";

/// Environment variable name carrying the credential for a provider type.
///
/// `openai` → `OPENAI_API_KEY`; non-alphanumeric characters in the type are
/// mapped to underscores.
pub fn credential_env_name(provider_type: &str) -> String {
    let mut upper: String = provider_type
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    upper.push_str("_API_KEY");
    upper
}
