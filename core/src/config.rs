use serde::{Deserialize, Serialize};

use crate::prelude::{CoreError, CoreResult};

/// Immutable settings passed explicitly into every computation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SurveyConfig {
    pub dose: DoseConfig,
    pub peak: PeakConfig,
    pub detector: DetectorConfig,
    pub localization: LocalizationConfig,
    pub isotopes: Vec<Isotope>,
}

impl Default for SurveyConfig {
    fn default() -> Self {
        Self {
            dose: DoseConfig::default(),
            peak: PeakConfig::default(),
            detector: DetectorConfig::default(),
            localization: LocalizationConfig::default(),
            isotopes: Isotope::default_table(),
        }
    }
}

impl SurveyConfig {
    pub fn from_json_str(text: &str) -> CoreResult<Self> {
        let config: SurveyConfig = serde_json::from_str(text)
            .map_err(|err| CoreError::InvalidInput(format!("survey config: {}", err)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> CoreResult<()> {
        if self.localization.grid_size < 2 {
            return Err(CoreError::InvalidInput(
                "localization grid needs at least 2 cells per side".into(),
            ));
        }
        if self.detector.efficiency <= 0.0 || self.detector.active_area <= 0.0 {
            return Err(CoreError::InvalidInput(
                "detector efficiency and area must be positive".into(),
            ));
        }
        if self.peak.reference_kev <= 0.0 || self.peak.resolution_at_reference <= 0.0 {
            return Err(CoreError::InvalidInput(
                "peak reference energy and resolution must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn isotope(&self, name: &str) -> CoreResult<&Isotope> {
        self.isotopes
            .iter()
            .find(|iso| iso.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| CoreError::InvalidInput(format!("unknown isotope {}", name)))
    }
}

/// Inclusive channel range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyWindow {
    pub start: isize,
    pub end: isize,
}

/// Dose conversion settings: spectral polynomials and counter sensitivities.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DoseConfig {
    /// Sv per count for `E <= break_kev`, ascending powers of keV.
    pub low_polynomial: [f64; 5],
    /// Sv per count for `E > break_kev`.
    pub high_polynomial: [f64; 5],
    pub break_kev: f64,
    /// µSv/h per cps of the sensitive counter.
    pub gm1_coeff: f64,
    /// µSv/h per cps of the coarse counter.
    pub gm2_coeff: f64,
    /// µSv/h per cps inside `window`.
    pub window_coeff: f64,
    /// Sensitive counter rate above which it replaces the spectrum.
    pub low_threshold: f64,
    /// Coarse counter rate above which it replaces everything else.
    pub high_threshold: f64,
    pub window: EnergyWindow,
}

impl Default for DoseConfig {
    fn default() -> Self {
        Self {
            low_polynomial: [1.2e-14, -4.1e-17, 6.8e-19, -1.1e-21, 6.0e-25],
            high_polynomial: [-2.0e-14, 1.45e-16, -2.1e-20, 2.5e-24, -1.2e-28],
            break_kev: 550.0,
            gm1_coeff: 0.0065,
            gm2_coeff: 0.45,
            window_coeff: 0.0009,
            low_threshold: 30.0,
            high_threshold: 2.0,
            window: EnergyWindow { start: 10, end: 237 },
        }
    }
}

/// Photopeak search and recalibration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakConfig {
    /// Energy at which `resolution_at_reference` was measured (Cs-137 line).
    pub reference_kev: f64,
    /// Relative FWHM at the reference energy (0.075 = 7.5 %).
    pub resolution_at_reference: f64,
    /// Move the peak centre to the smoothed maximum before integrating.
    pub refine: bool,
    /// Fraction of the observed energy offset applied per recalibration.
    pub damping: f64,
}

impl Default for PeakConfig {
    fn default() -> Self {
        Self {
            reference_kev: 661.7,
            resolution_at_reference: 0.075,
            refine: true,
            damping: 0.5,
        }
    }
}

/// Detector geometry and air attenuation fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Intrinsic full-energy peak efficiency.
    pub efficiency: f64,
    /// Active cross-section in m².
    pub active_area: f64,
    /// Linear attenuation of air in 1/m, ascending powers of MeV.
    pub attenuation_polynomial: [f64; 5],
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            efficiency: 0.35,
            active_area: 0.0058,
            attenuation_polynomial: [0.019777, -0.028693, 0.025010, -0.010004, 0.0014277],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    GridSearch,
    Interpolation,
}

/// Where the per-sample intensity driving the localizer comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntensitySource {
    Window {
        start: isize,
        end: isize,
        isotope: String,
    },
    Peak {
        isotope: String,
    },
}

impl IntensitySource {
    pub fn isotope(&self) -> &str {
        match self {
            IntensitySource::Window { isotope, .. } | IntensitySource::Peak { isotope } => isotope,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalizationConfig {
    pub strategy: StrategyKind,
    pub intensity: IntensitySource,
    /// Cells per side of the grid-search lattice.
    pub grid_size: usize,
    pub min_samples: usize,
    pub quadrature_tolerance: f64,
    /// Report the refined candidate instead of the coarse one.
    pub apply_refinement: bool,
    /// Cells per side of the interpolation lattice.
    pub interpolation_grid: usize,
    /// Fractional bounding-box expansion per side for interpolation.
    pub interpolation_margin: f64,
    pub nearest_samples: usize,
    pub idw_power: f64,
}

impl Default for LocalizationConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::GridSearch,
            intensity: IntensitySource::Peak {
                isotope: "Cs-137".into(),
            },
            grid_size: 21,
            min_samples: 10,
            quadrature_tolerance: 1e-8,
            apply_refinement: false,
            interpolation_grid: 101,
            interpolation_margin: 0.1,
            nearest_samples: 10,
            idw_power: 2.0,
        }
    }
}

/// Reference photopeak of a radionuclide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Isotope {
    pub name: String,
    pub energy_kev: f64,
    /// Gamma emission probability of the line.
    #[serde(rename = "yield")]
    pub yield_fraction: f64,
}

impl Isotope {
    pub fn new(name: &str, energy_kev: f64, yield_fraction: f64) -> Self {
        Self {
            name: name.into(),
            energy_kev,
            yield_fraction,
        }
    }

    pub fn default_table() -> Vec<Isotope> {
        vec![
            Isotope::new("Am-241", 59.5, 0.359),
            Isotope::new("I-131", 364.5, 0.815),
            Isotope::new("Cs-137", 661.7, 0.851),
            Isotope::new("Co-60", 1332.5, 0.9998),
            Isotope::new("K-40", 1460.8, 0.1067),
            Isotope::new("Tl-208", 2614.5, 0.359),
        ]
    }
}
