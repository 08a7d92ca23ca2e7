use std::str::FromStr;
use color_eyre::eyre::{bail, eyre, WrapErr};
use color_eyre::Result;
use crate::renderer::core::config::RenderConfig;

pub const DEFAULT_WINDOW_SIZE: (u32, u32) = (1280, 720);

/// Host settings, read once at startup
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub window_title: String,
    pub window_size: (u32, u32),
    pub render: RenderConfig,
    pub log_filter: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window_title: "vkchain".into(),
            window_size: DEFAULT_WINDOW_SIZE,
            render: RenderConfig::default(),
            log_filter: None,
        }
    }
}

impl AppConfig {
    pub fn from_process_env() -> Result<Self> {
        Self::from_env(|key| std::env::var(key).ok())
    }

    /// Applies `VKCHAIN_*` overrides on top of the defaults
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup("VKCHAIN_VALIDATION") {
            config.render.enable_validation = parse_flag(&value)
                .wrap_err("VKCHAIN_VALIDATION")?;
        }
        if let Some(value) = lookup("VKCHAIN_LOG") {
            config.log_filter = Some(value);
        }
        if let Some(value) = lookup("VKCHAIN_WIDTH") {
            config.window_size.0 = parse_dimension(&value).wrap_err("VKCHAIN_WIDTH")?;
        }
        if let Some(value) = lookup("VKCHAIN_HEIGHT") {
            config.window_size.1 = parse_dimension(&value).wrap_err("VKCHAIN_HEIGHT")?;
        }
        if let Some(value) = lookup("VKCHAIN_CLEAR") {
            config.render.clear_color = parse_color(&value).wrap_err("VKCHAIN_CLEAR")?;
        }

        Ok(config)
    }
}

fn parse_flag(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Ok(true),
        "0" | "false" | "off" | "no" => Ok(false),
        other => bail!("expected a boolean, got {other:?}"),
    }
}

fn parse_dimension(value: &str) -> Result<u32> {
    let parsed = u32::from_str(value.trim())
        .map_err(|err| eyre!("expected a positive integer, got {value:?}: {err}"))?;
    if parsed == 0 {
        bail!("window dimension must be non-zero");
    }
    Ok(parsed)
}

fn parse_color(value: &str) -> Result<[f32; 4]> {
    let channels = value
        .split(',')
        .map(|part| {
            f32::from_str(part.trim())
                .map_err(|err| eyre!("bad colour channel {part:?}: {err}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let color: [f32; 4] = channels
        .try_into()
        .map_err(|channels: Vec<f32>| eyre!("expected 4 channels, got {}", channels.len()))?;
    if color.iter().any(|c| !(0.0..=1.0).contains(c)) {
        bail!("colour channels must lie in 0..=1");
    }
    Ok(color)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let vars = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<HashMap<_, _>>();
        AppConfig::from_env(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_without_overrides() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config.window_size, DEFAULT_WINDOW_SIZE);
        assert_eq!(config.render.enable_validation, cfg!(debug_assertions));
        assert!(config.log_filter.is_none());
    }

    #[test]
    fn overrides_are_applied() {
        let config = config_from(&[
            ("VKCHAIN_VALIDATION", "off"),
            ("VKCHAIN_LOG", "vkchain=trace"),
            ("VKCHAIN_WIDTH", "640"),
            ("VKCHAIN_HEIGHT", " 480 "),
            ("VKCHAIN_CLEAR", "0.1, 0.2, 0.3, 1"),
        ])
        .unwrap();
        assert!(!config.render.enable_validation);
        assert_eq!(config.log_filter.as_deref(), Some("vkchain=trace"));
        assert_eq!(config.window_size, (640, 480));
        assert_eq!(config.render.clear_color, [0.1, 0.2, 0.3, 1.0]);
    }

    #[test]
    fn malformed_values_name_the_variable() {
        let err = config_from(&[("VKCHAIN_WIDTH", "wide")]).unwrap_err();
        assert_eq!(err.to_string(), "VKCHAIN_WIDTH");

        assert!(config_from(&[("VKCHAIN_HEIGHT", "0")]).is_err());
        assert!(config_from(&[("VKCHAIN_VALIDATION", "maybe")]).is_err());
        assert!(config_from(&[("VKCHAIN_CLEAR", "1,1,1")]).is_err());
        assert!(config_from(&[("VKCHAIN_CLEAR", "2,0,0,1")]).is_err());
    }
}
