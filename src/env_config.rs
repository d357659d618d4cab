//! Environment-variable parsing shared by [`GraphicsConfig`](crate::config::GraphicsConfig)
//! and the cached feature flags declared with `define_env_flag!`.

/// Truthy means `1`, `true`, `yes` or `on` (case-insensitive, trimmed).
#[inline]
pub(crate) fn env_var_truthy(var_name: &str) -> bool {
    std::env::var(var_name)
        .map(|raw| parse_truthy(&raw))
        .unwrap_or(false)
}

fn parse_truthy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

/// Returns the trimmed value when the variable is set and non-empty.
pub(crate) fn env_var_string(var_name: &str) -> Option<String> {
    std::env::var(var_name)
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Parses the variable as a `u32`; zero is accepted.
pub(crate) fn env_var_u32(var_name: &str) -> Option<u32> {
    env_var_string(var_name).and_then(|raw| raw.parse::<u32>().ok())
}

/// Parses the variable as a `u64`, accepting only values greater than zero.
#[inline]
pub(crate) fn env_var_positive_u64(var_name: &str) -> Option<u64> {
    env_var_string(var_name)
        .and_then(|raw| raw.parse::<u64>().ok())
        .filter(|value| *value > 0)
}

/// Declares a cached boolean feature flag backed by a `OnceLock<bool>`.
///
/// `enabled_unless(fn_name, "ENV_VAR")` is on by default and turned off by
/// a truthy variable. `enabled_when(fn_name, "ENV_VAR")` is off by default
/// and turned on by a truthy variable.
macro_rules! define_env_flag {
    (enabled_unless($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| !$crate::env_config::env_var_truthy($var))
        }
    };
    (enabled_when($fn_name:ident, $var:expr)) => {
        #[inline]
        pub(crate) fn $fn_name() -> bool {
            static VALUE: ::std::sync::OnceLock<bool> = ::std::sync::OnceLock::new();
            *VALUE.get_or_init(|| $crate::env_config::env_var_truthy($var))
        }
    };
}

pub(crate) use define_env_flag;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values_are_case_insensitive() {
        for raw in ["1", "TRUE", " yes ", "On"] {
            assert!(parse_truthy(raw), "{raw}");
        }
        for raw in ["0", "false", "", "enable"] {
            assert!(!parse_truthy(raw), "{raw}");
        }
    }

    #[test]
    fn unset_variables_parse_to_none() {
        let name = "SNOW_GS_TEST_VARIABLE_THAT_IS_NEVER_SET";
        assert_eq!(env_var_string(name), None);
        assert_eq!(env_var_u32(name), None);
        assert_eq!(env_var_positive_u64(name), None);
        assert!(!env_var_truthy(name));
    }
}
