//! Service configuration – reads `~/.locoslam/config.toml`.
//!
//! Every field has a default, so a missing file or a partial file is fine.
//! Environment variables are applied on top of whatever the file says.

use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use locoslam_mapping::snapshot::ChannelOrder;
use locoslam_types::MapConfig;
use serde::{Deserialize, Serialize};

/// Persisted configuration for the `locoslam` binary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Host running the robot and the name registry.
    pub locobot_ip: IpAddr,
    /// Address the mapping service binds to.
    pub local_ip: IpAddr,
    /// Service port; `0` picks a free one.
    pub port: u16,
    pub registry_port: u16,
    /// Name the robot is registered under.
    pub robot_name: String,

    pub map_size_cm: u32,
    pub resolution_cm: u32,
    pub robot_radius_cm: f32,
    pub agent_min_z_cm: f32,
    pub agent_max_z_cm: f32,

    /// Semantic snapshot written after each map update.  Empty disables it.
    pub snapshot_path: PathBuf,
    pub snapshot_order: ChannelOrder,
    /// Longest wait for a pending call before the map is refreshed anyway.
    pub poll_interval_ms: u64,
    /// Consecutive failed refreshes before they are reported as errors.
    pub escalate_after: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let map = MapConfig::default();
        Self {
            locobot_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            local_ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: 0,
            registry_port: 9090,
            robot_name: "remotelocobot".to_string(),
            map_size_cm: map.map_size_cm,
            resolution_cm: map.resolution_cm,
            robot_radius_cm: map.robot_radius_cm,
            agent_min_z_cm: map.agent_min_z_cm,
            agent_max_z_cm: map.agent_max_z_cm,
            snapshot_path: PathBuf::from("sem_map.png"),
            snapshot_order: ChannelOrder::Rgb,
            poll_interval_ms: 2000,
            escalate_after: 5,
        }
    }
}

impl ServiceConfig {
    pub fn map_config(&self) -> MapConfig {
        MapConfig {
            map_size_cm: self.map_size_cm,
            resolution_cm: self.resolution_cm,
            robot_radius_cm: self.robot_radius_cm,
            agent_min_z_cm: self.agent_min_z_cm,
            agent_max_z_cm: self.agent_max_z_cm,
        }
    }

    pub fn registry_url(&self) -> String {
        format!("ws://{}:{}", self.locobot_ip, self.registry_port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn snapshot_path(&self) -> Option<PathBuf> {
        (!self.snapshot_path.as_os_str().is_empty()).then(|| self.snapshot_path.clone())
    }
}

/// `LOCOSLAM_CONFIG` if set, `~/.locoslam/config.toml` otherwise.
pub fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("LOCOSLAM_CONFIG") {
        return PathBuf::from(path);
    }
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".locoslam").join("config.toml")
}

/// Load the config file (defaults when it does not exist) and apply
/// environment overrides.
pub fn load() -> Result<ServiceConfig, String> {
    let mut cfg = load_from(&config_path())?.unwrap_or_default();
    apply_env_overrides(&mut cfg);
    Ok(cfg)
}

/// Parse the file at `path`.  Returns `None` if it does not exist.
pub(crate) fn load_from(path: &Path) -> Result<Option<ServiceConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

fn override_parsed<T: std::str::FromStr>(var: &str, slot: &mut T) {
    if let Ok(v) = std::env::var(var)
        && let Ok(parsed) = v.trim().parse::<T>()
    {
        *slot = parsed;
    }
}

/// Apply environment variable overrides to `cfg`.  Values that do not parse
/// are ignored.
///
/// | Variable | Config field |
/// |---|---|
/// | `LOCOBOT_IP` | `locobot_ip` |
/// | `LOCAL_IP` | `local_ip` |
/// | `LOCOSLAM_PORT` | `port` |
/// | `LOCOSLAM_REGISTRY_PORT` | `registry_port` |
/// | `LOCOSLAM_MAP_SIZE_CM` | `map_size_cm` |
/// | `LOCOSLAM_RESOLUTION_CM` | `resolution_cm` |
/// | `LOCOSLAM_ROBOT_RADIUS_CM` | `robot_radius_cm` |
/// | `LOCOSLAM_MIN_Z_CM` | `agent_min_z_cm` |
/// | `LOCOSLAM_MAX_Z_CM` | `agent_max_z_cm` |
/// | `LOCOSLAM_SNAPSHOT_PATH` | `snapshot_path` |
/// | `LOCOSLAM_POLL_INTERVAL_MS` | `poll_interval_ms` |
pub fn apply_env_overrides(cfg: &mut ServiceConfig) {
    override_parsed("LOCOBOT_IP", &mut cfg.locobot_ip);
    override_parsed("LOCAL_IP", &mut cfg.local_ip);
    override_parsed("LOCOSLAM_PORT", &mut cfg.port);
    override_parsed("LOCOSLAM_REGISTRY_PORT", &mut cfg.registry_port);
    override_parsed("LOCOSLAM_MAP_SIZE_CM", &mut cfg.map_size_cm);
    override_parsed("LOCOSLAM_RESOLUTION_CM", &mut cfg.resolution_cm);
    override_parsed("LOCOSLAM_ROBOT_RADIUS_CM", &mut cfg.robot_radius_cm);
    override_parsed("LOCOSLAM_MIN_Z_CM", &mut cfg.agent_min_z_cm);
    override_parsed("LOCOSLAM_MAX_Z_CM", &mut cfg.agent_max_z_cm);
    override_parsed("LOCOSLAM_POLL_INTERVAL_MS", &mut cfg.poll_interval_ms);
    if let Ok(v) = std::env::var("LOCOSLAM_SNAPSHOT_PATH") {
        cfg.snapshot_path = PathBuf::from(v);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_config(body: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        fs::create_dir_all(path.parent().unwrap()).expect("config dir");
        fs::write(&path, body).expect("write config");
        (dir, path)
    }

    #[test]
    fn defaults_match_the_stock_deployment() {
        let cfg = ServiceConfig::default();
        assert_eq!(cfg.registry_port, 9090);
        assert_eq!(cfg.robot_name, "remotelocobot");
        assert_eq!(cfg.map_config(), MapConfig::default());
        assert_eq!(cfg.poll_interval(), Duration::from_millis(2000));
        assert_eq!(cfg.snapshot_path(), Some(PathBuf::from("sem_map.png")));
        assert_eq!(cfg.registry_url(), "ws://127.0.0.1:9090");
    }

    #[test]
    fn config_path_points_to_locoslam_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".locoslam"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let (_dir, path) = write_config(
            r#"
            local_ip = "0.0.0.0"
            map_size_cm = 2000
            snapshot_order = "bgr"
            "#,
        );
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.local_ip, IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        assert_eq!(cfg.map_size_cm, 2000);
        assert_eq!(cfg.snapshot_order, ChannelOrder::Bgr);
        assert_eq!(cfg.poll_interval_ms, 2000);
        assert_eq!(cfg.port, 0);
    }

    #[test]
    fn empty_snapshot_path_disables_snapshots() {
        let (_dir, path) = write_config(r#"snapshot_path = """#);
        let cfg = load_from(&path).expect("load ok").expect("some");
        assert_eq!(cfg.snapshot_path(), None);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let (_dir, path) = write_config("map_size_cm = \"big\"");
        let err = load_from(&path).unwrap_err();
        assert!(err.contains("Failed to parse config"));
    }

    #[test]
    fn apply_env_overrides_changes_locobot_ip() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("LOCOBOT_IP", "10.0.0.7") };
        let mut cfg = ServiceConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.locobot_ip, "10.0.0.7".parse::<IpAddr>().unwrap());
        assert_eq!(cfg.registry_url(), "ws://10.0.0.7:9090");
        unsafe { std::env::remove_var("LOCOBOT_IP") };
    }

    #[test]
    fn apply_env_overrides_changes_registry_port() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("LOCOSLAM_REGISTRY_PORT", "9100") };
        let mut cfg = ServiceConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.registry_port, 9100);
        unsafe { std::env::remove_var("LOCOSLAM_REGISTRY_PORT") };
    }

    #[test]
    fn apply_env_overrides_parses_fractional_heights() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("LOCOSLAM_MAX_Z_CM", "82.5") };
        let mut cfg = ServiceConfig::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.agent_max_z_cm, 82.5);
        unsafe { std::env::remove_var("LOCOSLAM_MAX_Z_CM") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_resolution() {
        // SAFETY: single-threaded test; no other test touches this variable.
        unsafe { std::env::set_var("LOCOSLAM_RESOLUTION_CM", "fine") };
        let mut cfg = ServiceConfig::default();
        let original = cfg.resolution_cm;
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.resolution_cm, original);
        unsafe { std::env::remove_var("LOCOSLAM_RESOLUTION_CM") };
    }
}
