//! Renderer settings, loaded from TOML. Every field has a default, and a missing or broken file
//! falls back to defaults rather than failing startup.

use crate::font::atlas::AtlasConfig;
use crate::frame::FrameConfig;

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: std::path::PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Enable the Vulkan validation layers, if installed, and route their messages to the log.
    pub validation: bool,
    /// Straight sRGB color every frame is cleared to.
    pub clear_color: [f32; 4],
    pub frame: FrameConfig,
    pub atlas: AtlasConfig,
}
impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            clear_color: [0.1, 0.1, 0.12, 1.0],
            frame: FrameConfig::default(),
            atlas: AtlasConfig::default(),
        }
    }
}
impl RendererConfig {
    pub fn from_toml_str(toml: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(toml)?;
        Ok(config.sanitized())
    }
    /// Read `path`, falling back to defaults (with a warning) if it can't be read or parsed.
    #[must_use]
    pub fn load_or_default(path: &std::path::Path) -> Self {
        let loaded = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Io {
                path: path.to_owned(),
                source,
            })
            .and_then(|string| Self::from_toml_str(&string));
        match loaded {
            Ok(config) => config,
            Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No renderer config at {}, using defaults", path.display());
                Self::default()
            }
            Err(err) => {
                log::warn!("Renderer config unusable, using defaults: {err}");
                Self::default()
            }
        }
    }
    pub fn save(&self, path: &std::path::Path) -> Result<(), ConfigError> {
        let string = toml::ser::to_string_pretty(self)?;
        std::fs::write(path, string).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })
    }
    /// Clamp values that would otherwise stall the frame loop.
    fn sanitized(mut self) -> Self {
        if self.frame.frames_in_flight == 0 {
            log::warn!("frames_in_flight = 0 is invalid, using 1");
            self.frame.frames_in_flight = 1;
        }
        self
    }
}

#[cfg(test)]
mod test {
    use super::{ConfigError, RendererConfig};
    use crate::frame::FrameConfig;

    #[test]
    fn empty_is_default() {
        assert_eq!(
            RendererConfig::from_toml_str("").unwrap(),
            RendererConfig::default()
        );
    }
    #[test]
    fn partial_tables() {
        let config = RendererConfig::from_toml_str(
            r#"
            validation = false
            [frame]
            frames_in_flight = 3
            prefer_low_latency = false
            [atlas]
            point_size = 48.0
            extra_chars = "°±"
            "#,
        )
        .unwrap();
        assert_eq!(config.frame.frames_in_flight, 3);
        assert!(!config.frame.prefer_low_latency);
        assert_eq!(
            config.frame.fence_timeout_ms,
            FrameConfig::default().fence_timeout_ms
        );
        assert_eq!(config.atlas.point_size, 48.0);
        assert_eq!(config.atlas.distance_range, 4.0);
        assert!(config.atlas.charset().contains(&'°'));
    }
    #[test]
    fn zero_slots_clamped() {
        let config = RendererConfig::from_toml_str("[frame]\nframes_in_flight = 0").unwrap();
        assert_eq!(config.frame.frames_in_flight, 1);
    }
    #[test]
    fn malformed_is_error() {
        assert!(matches!(
            RendererConfig::from_toml_str("[frame]\nframes_in_flight = \"two\""),
            Err(ConfigError::Parse(_))
        ));
    }
    #[test]
    fn load_falls_back() {
        let missing = std::path::Path::new("/definitely/not/a/config.toml");
        assert_eq!(
            RendererConfig::load_or_default(missing),
            RendererConfig::default()
        );
    }
    #[test]
    fn save_then_load() {
        let path = std::env::temp_dir().join(format!("primwalk-config-{}.toml", std::process::id()));
        let mut config = RendererConfig::default();
        config.frame.frames_in_flight = 3;
        config.atlas.extra_chars = "é".into();
        config.save(&path).unwrap();
        assert_eq!(RendererConfig::load_or_default(&path), config);
        let _ = std::fs::remove_file(path);
    }
}
