use std::{fmt, str::FromStr, time::Duration};

use super::{ConfigError, ValidationConfig};

/// Named starting points for a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Preset {
    /// Offline checks only: syntax, typos and disposable domains.
    Fast,
    /// Every validator, stopping at the first failure.
    Balanced,
    /// Every validator without early exit, with an extra SMTP attempt.
    Thorough,
}

impl Preset {
    pub fn apply(self, config: &mut ValidationConfig) {
        *config = ValidationConfig::default();

        match self {
            Self::Fast => {
                config.mx.enabled = false;
                config.smtp.enabled = false;
                config.timeout = Duration::from_secs(5);
            }
            Self::Balanced => {}
            Self::Thorough => {
                config.early_exit = false;
                config.mx.retries = 3;
                config.smtp.retries = 2;
            }
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Balanced => "balanced",
            Self::Thorough => "thorough",
        }
    }
}

impl FromStr for Preset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "balanced" => Ok(Self::Balanced),
            "thorough" => Ok(Self::Thorough),
            _ => Err(ConfigError::UnknownPreset(s.to_string())),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use verimail_common::ValidatorName;

    use super::*;

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("Fast".parse::<Preset>().unwrap(), Preset::Fast);
        assert_eq!(" thorough ".parse::<Preset>().unwrap(), Preset::Thorough);
        assert!("strict".parse::<Preset>().is_err());
    }

    #[test]
    fn test_fast_skips_network_validators() {
        let config = ValidationConfig::preset("fast").unwrap();

        let enabled: Vec<_> = ValidatorName::ALL
            .into_iter()
            .filter(|name| config.is_enabled(*name))
            .collect();
        assert_eq!(
            enabled,
            [
                ValidatorName::Regex,
                ValidatorName::Typo,
                ValidatorName::Disposable
            ]
        );
    }

    #[test]
    fn test_thorough_runs_everything() {
        let config = ValidationConfig::preset("thorough").unwrap();

        assert!(ValidatorName::ALL.iter().all(|name| config.is_enabled(*name)));
        assert!(!config.early_exit);
        assert_eq!(config.smtp.retries, 2);
    }
}
