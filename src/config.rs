use std::time::Duration;

use crate::env_config::{env_var_positive_u64, env_var_string, env_var_u32};
use crate::exports::{PlatformGroup, SOFT_BACKEND};

pub const DEFAULT_CAPTURE_POLL_INTERVAL: Duration = Duration::from_millis(8);
pub const DEFAULT_DUPLICATOR_TIMEOUT: Duration = Duration::ZERO;

/// Process-level graphics settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphicsConfig {
    pub backend: String,
    pub adapter: u32,
    /// Overrides [`PlatformGroup::native`] when set.
    pub platform_group: Option<PlatformGroup>,
    /// Sleep between capture thread sweeps when no session produced a frame.
    pub capture_poll_interval: Duration,
    /// How long `duplicator_update_frame` waits for a new desktop image.
    pub duplicator_timeout: Duration,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            backend: SOFT_BACKEND.to_string(),
            adapter: 0,
            platform_group: None,
            capture_poll_interval: DEFAULT_CAPTURE_POLL_INTERVAL,
            duplicator_timeout: DEFAULT_DUPLICATOR_TIMEOUT,
        }
    }
}

impl GraphicsConfig {
    /// Reads `SNOW_GS_*` variables; unset or malformed values keep their
    /// defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let platform_group = env_var_string("SNOW_GS_PLATFORM_GROUP").and_then(|raw| {
            let group = PlatformGroup::parse(&raw);
            if group.is_none() {
                log::warn!("ignoring unknown SNOW_GS_PLATFORM_GROUP '{raw}'");
            }
            group
        });
        Self {
            backend: env_var_string("SNOW_GS_BACKEND").unwrap_or(defaults.backend),
            adapter: env_var_u32("SNOW_GS_ADAPTER").unwrap_or(defaults.adapter),
            platform_group,
            capture_poll_interval: env_var_positive_u64("SNOW_GS_CAPTURE_POLL_MS")
                .map(Duration::from_millis)
                .unwrap_or(defaults.capture_poll_interval),
            duplicator_timeout: env_var_u32("SNOW_GS_DUPLICATOR_TIMEOUT_MS")
                .map(|ms| Duration::from_millis(u64::from(ms)))
                .unwrap_or(defaults.duplicator_timeout),
        }
    }

    pub fn platform_group(&self) -> PlatformGroup {
        self.platform_group.unwrap_or_else(PlatformGroup::native)
    }

    /// Resolves the configured backend into an export table.
    pub fn load_exports(&self) -> crate::exports::GraphicsExports {
        crate::exports::load_graphics_imports_for(&self.backend, self.platform_group())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_select_soft_backend_on_native_group() {
        let config = GraphicsConfig::default();
        assert_eq!(config.backend, "soft");
        assert_eq!(config.platform_group(), PlatformGroup::native());
        assert!(config.load_exports().is_loaded());
    }

    #[test]
    fn explicit_group_overrides_native() {
        let config = GraphicsConfig {
            platform_group: Some(PlatformGroup::IoSurface),
            ..GraphicsConfig::default()
        };
        assert_eq!(
            config.load_exports().platform_group(),
            Some(PlatformGroup::IoSurface)
        );
    }
}
