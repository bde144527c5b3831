use anyhow::Context;
use gammacore::config::{StrategyKind, SurveyConfig};
use gammacore::localization::LocalizationRequest;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::generator::flight::GeneratorConfig;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub survey: SurveyConfig,
    pub generator: GeneratorConfig,
    pub request: LocalizationRequest,
    /// Isotope whose line drives the per-flight recalibration.
    pub calibration_isotope: String,
    /// Wall-clock limit for the localization search.
    pub deadline_secs: Option<u64>,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            survey: SurveyConfig::default(),
            generator: GeneratorConfig::default(),
            request: LocalizationRequest::default(),
            calibration_isotope: "Cs-137".into(),
            deadline_secs: None,
        }
    }
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        config
            .survey
            .validate()
            .with_context(|| format!("validating survey settings in {}", path_ref.display()))?;
        Ok(config)
    }

    /// Applies command-line overrides on top of the loaded settings.
    pub fn with_overrides(
        mut self,
        seed: Option<u64>,
        strategy: Option<StrategyKind>,
        deadline_secs: Option<u64>,
    ) -> Self {
        if let Some(seed) = seed {
            self.generator.seed = seed;
        }
        if strategy.is_some() {
            self.request.strategy = strategy;
        }
        if deadline_secs.is_some() {
            self.deadline_secs = deadline_secs;
        }
        self
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn overrides_replace_loaded_values() {
        let cfg = WorkflowConfig::default().with_overrides(
            Some(7),
            Some(StrategyKind::Interpolation),
            Some(30),
        );
        assert_eq!(cfg.generator.seed, 7);
        assert_eq!(cfg.request.strategy, Some(StrategyKind::Interpolation));
        assert_eq!(cfg.deadline(), Some(Duration::from_secs(30)));

        let untouched = WorkflowConfig::default().with_overrides(None, None, None);
        assert_eq!(untouched.request.strategy, None);
        assert_eq!(untouched.deadline(), None);
    }

    #[test]
    fn config_load_reads_yaml() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(
            b"calibration_isotope: K-40\n\
              generator:\n  seed: 3\n  lines: 2\n\
              survey:\n  localization:\n    strategy: interpolation\n    grid_size: 11\n",
        )
        .unwrap();
        let path = temp.into_temp_path();
        let cfg = WorkflowConfig::load(&path).unwrap();
        assert_eq!(cfg.calibration_isotope, "K-40");
        assert_eq!(cfg.generator.seed, 3);
        assert_eq!(cfg.generator.lines, 2);
        assert_eq!(cfg.generator.samples_per_line, 60);
        assert_eq!(cfg.survey.localization.strategy, StrategyKind::Interpolation);
        assert_eq!(cfg.survey.localization.grid_size, 11);
        assert_eq!(cfg.survey.localization.min_samples, 10);
    }

    #[test]
    fn invalid_survey_settings_are_rejected() {
        let mut temp = NamedTempFile::new().unwrap();
        temp.write_all(b"survey:\n  localization:\n    grid_size: 1\n").unwrap();
        let path = temp.into_temp_path();
        assert!(WorkflowConfig::load(&path).is_err());
    }
}
