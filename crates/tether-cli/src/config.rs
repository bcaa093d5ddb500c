//! Configuration vault – reads/writes `~/.tether/config.toml`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use tether_capture::CaptureConfig;
use tether_types::DeviceSelector;

/// Persisted CLI configuration.
///
/// ```toml
/// device = "Canon EOS 80D"      # or an index, e.g. 0
/// output_dir = "/home/me/Pictures/tether"
///
/// [capture]
/// ring_capacity = 1
/// poll_interval_ms = 5
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Camera to connect to; the first detected camera when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device: Option<DeviceSelector>,

    /// Directory saved photos are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Capture pipeline tunables.
    #[serde(default)]
    pub capture: CaptureConfig,
}

fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device: None,
            output_dir: default_output_dir(),
            capture: CaptureConfig::default(),
        }
    }
}

impl Config {
    pub fn device(&self) -> DeviceSelector {
        self.device.clone().unwrap_or_default()
    }
}

/// Return the path to `~/.tether/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(
        &std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string()),
    )
}

pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".tether").join("config.toml")
}

/// Where the effective configuration came from.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    File(PathBuf),
    /// No config file.
    Defaults,
    /// The file exists but could not be read; defaults were used instead.
    Fallback(String),
}

/// Load `~/.tether/config.toml`, falling back to defaults when it is missing
/// or broken.  Environment overrides apply in every case.
pub fn load() -> (Config, Source) {
    load_effective(&config_path())
}

pub(crate) fn load_effective(path: &Path) -> (Config, Source) {
    let (mut cfg, source) = match load_from(path) {
        Ok(Some(cfg)) => (cfg, Source::File(path.to_path_buf())),
        Ok(None) => (Config::default(), Source::Defaults),
        Err(e) => (Config::default(), Source::Fallback(e)),
    };
    apply_env_overrides(&mut cfg);
    (cfg, source)
}

pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config at {}: {}", path.display(), e))?;
    toml::from_str(&raw)
        .map(Some)
        .map_err(|e| format!("Failed to parse config: {}", e))
}

/// Apply `TETHER_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `TETHER_DEVICE` | `device` (an integer selects by index, anything else by name) |
/// | `TETHER_OUTPUT_DIR` | `output_dir` |
/// | `TETHER_RING_CAPACITY` | `capture.ring_capacity` |
/// | `TETHER_POLL_INTERVAL_MS` | `capture.poll_interval_ms` |
///
/// Unparseable numbers are ignored.
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("TETHER_DEVICE") {
        cfg.device = Some(parse_device(&v));
    }
    if let Ok(v) = std::env::var("TETHER_OUTPUT_DIR") {
        cfg.output_dir = PathBuf::from(v);
    }
    if let Ok(v) = std::env::var("TETHER_RING_CAPACITY")
        && let Ok(n) = v.parse::<usize>()
    {
        cfg.capture.ring_capacity = n;
    }
    if let Ok(v) = std::env::var("TETHER_POLL_INTERVAL_MS")
        && let Ok(ms) = v.parse::<u64>()
    {
        cfg.capture.poll_interval_ms = ms;
    }
}

/// `"2"` selects by index, `"Nikon DSC D750"` by name.
pub fn parse_device(raw: &str) -> DeviceSelector {
    let raw = raw.trim();
    match raw.parse::<usize>() {
        Ok(index) => DeviceSelector::Index(index),
        Err(_) => DeviceSelector::Name(raw.to_string()),
    }
}

/// Save the config, creating `~/.tether/` if necessary.
pub fn save(cfg: &Config) -> Result<(), String> {
    save_to(cfg, &config_path())
}

pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), String> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| format!("Failed to create config directory: {}", e))?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(parent, fs::Permissions::from_mode(0o700))
                .map_err(|e| format!("Failed to set config directory permissions: {}", e))?;
        }
    }
    let raw = toml::to_string_pretty(cfg)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw)
        .map_err(|e| format!("Failed to write config at {}: {}", path.display(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn config_file_has_restrictive_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        save_to(&Config::default(), &path).expect("save");

        let file_mode = fs::metadata(&path).expect("file metadata").permissions().mode() & 0o777;
        assert_eq!(file_mode, 0o600);
        let parent = path.parent().expect("config dir");
        let dir_mode = fs::metadata(parent).expect("dir metadata").permissions().mode() & 0o777;
        assert_eq!(dir_mode, 0o700);
    }

    #[test]
    fn roundtrip_with_device_and_capture_table() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());

        let mut cfg = Config::default();
        cfg.device = Some(DeviceSelector::Name("Canon EOS 80D".to_string()));
        cfg.output_dir = PathBuf::from("/tmp/shots");
        cfg.capture.ring_capacity = 3;
        save_to(&cfg, &path).expect("save");

        let raw = fs::read_to_string(&path).expect("read back");
        assert!(raw.contains("[capture]"));

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.device, cfg.device);
        assert_eq!(loaded.output_dir, cfg.output_dir);
        assert_eq!(loaded.capture.ring_capacity, 3);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "device = 1\n\n[capture]\npoll_interval_ms = 20\n").expect("write");

        let loaded = load_from(&path).expect("load ok").expect("some");
        assert_eq!(loaded.device, Some(DeviceSelector::Index(1)));
        assert_eq!(loaded.output_dir, PathBuf::from("."));
        assert_eq!(loaded.capture.poll_interval_ms, 20);
        assert_eq!(loaded.capture.ring_capacity, 1);
    }

    #[test]
    fn load_from_returns_none_when_missing() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = config_path_for_home(&dir.path().to_string_lossy());
        assert!(load_from(&path).expect("no error").is_none());
    }

    #[test]
    fn config_path_points_to_tether_dir() {
        let p = config_path_for_home("/home/testuser");
        assert!(p.to_string_lossy().contains(".tether"));
        assert!(p.to_string_lossy().ends_with("config.toml"));
    }

    #[test]
    fn parse_device_by_index_or_name() {
        assert_eq!(parse_device("2"), DeviceSelector::Index(2));
        assert_eq!(
            parse_device(" Nikon DSC D750 "),
            DeviceSelector::Name("Nikon DSC D750".to_string())
        );
    }

    #[test]
    fn default_device_is_first_camera() {
        assert_eq!(Config::default().device(), DeviceSelector::Index(0));
    }

    #[test]
    fn broken_file_falls_back_to_defaults_with_env_overrides() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "device = [not toml").expect("write");

        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("TETHER_DEVICE", "Fallback Cam") };
        let (cfg, source) = load_effective(&path);
        unsafe { std::env::remove_var("TETHER_DEVICE") };

        assert!(matches!(source, Source::Fallback(_)));
        assert_eq!(cfg.device, Some(DeviceSelector::Name("Fallback Cam".to_string())));
        assert_eq!(cfg.capture.orientation, 0);
    }

    #[test]
    fn valid_file_reports_its_path() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("config.toml");
        fs::write(&path, "[capture]\norientation = 2\n").expect("write");

        let (cfg, source) = load_effective(&path);
        assert_eq!(source, Source::File(path.clone()));
        assert_eq!(cfg.capture.orientation, 2);
    }

    #[test]
    fn apply_env_overrides_changes_output_dir() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("TETHER_OUTPUT_DIR", "/srv/photos") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.output_dir, PathBuf::from("/srv/photos"));
        unsafe { std::env::remove_var("TETHER_OUTPUT_DIR") };
    }

    #[test]
    fn apply_env_overrides_ignores_invalid_capacity() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("TETHER_RING_CAPACITY", "lots") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.capture.ring_capacity, 1);
        unsafe { std::env::remove_var("TETHER_RING_CAPACITY") };
    }

    #[test]
    fn apply_env_overrides_changes_poll_interval() {
        // SAFETY: no other test reads or writes this variable.
        unsafe { std::env::set_var("TETHER_POLL_INTERVAL_MS", "12") };
        let mut cfg = Config::default();
        apply_env_overrides(&mut cfg);
        assert_eq!(cfg.capture.poll_interval_ms, 12);
        unsafe { std::env::remove_var("TETHER_POLL_INTERVAL_MS") };
    }
}
