use crate::config::EnergyWindow;
use crate::prelude::{CoreError, CoreResult};
use crate::survey::Spectrum;

/// Channel-range arithmetic over a fixed-length histogram.
pub struct SpectrumProcessor;

impl SpectrumProcessor {
    /// Sums channels `start..=end`, clamped to the histogram.
    ///
    /// An empty or inverted range yields zero. With `normalized` the sum is
    /// divided by the live time.
    pub fn value_in_channels(
        spectrum: &Spectrum,
        start: isize,
        end: isize,
        normalized: bool,
    ) -> f64 {
        if spectrum.is_empty() {
            return 0.0;
        }
        let last = spectrum.len() as isize - 1;
        let start = start.max(0);
        let end = end.min(last);
        if start > end {
            return 0.0;
        }
        let sum: f64 = spectrum.counts[start as usize..=end as usize]
            .iter()
            .map(|&c| c as f64)
            .sum();
        if normalized {
            sum * spectrum.rate_scale()
        } else {
            sum
        }
    }

    pub fn window_intensity(spectrum: &Spectrum, window: EnergyWindow) -> f64 {
        Self::value_in_channels(spectrum, window.start, window.end, true)
    }

    pub fn normalize(spectrum: &Spectrum) -> Vec<f64> {
        spectrum.count_rates()
    }

    /// Channel-wise sum with accumulated live time.
    pub fn sum_spectra(spectra: &[&Spectrum]) -> CoreResult<Spectrum> {
        let first = spectra
            .first()
            .ok_or_else(|| CoreError::InvalidInput("no spectra to aggregate".into()))?;
        let mut counts = vec![0u32; first.len()];
        let mut live_time = 0.0;
        for spectrum in spectra {
            if spectrum.len() != counts.len() {
                return Err(CoreError::InvalidInput(format!(
                    "spectrum length {} differs from {}",
                    spectrum.len(),
                    counts.len()
                )));
            }
            for (total, &c) in counts.iter_mut().zip(&spectrum.counts) {
                *total = total.saturating_add(c);
            }
            live_time += spectrum.live_time.max(0.0);
        }
        Ok(Spectrum::new(counts, live_time))
    }
}
