use log::warn;
use ndarray::Array2;
use rayon::prelude::*;

use crate::config::StrategyKind;
use crate::localization::samples::{GeoCoordinate, LocalPoint};
use crate::localization::{
    LocalizationInput, LocalizationReport, LocalizationResult, LocalizationStrategy, SignalStatus,
};
use crate::math::stats::StatsHelper;
use crate::prelude::{CancelToken, CoreError, CoreResult};

/// Horizontal distance (m) below which a node takes the sample value as is.
const COINCIDENT_M: f64 = 1e-6;

/// Arg-max of an inverse-distance-weighted intensity surface.
pub struct InterpolationLocalizer;

impl LocalizationStrategy for InterpolationLocalizer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Interpolation
    }

    fn localize(
        &self,
        input: &LocalizationInput,
        cancel: &CancelToken,
    ) -> CoreResult<LocalizationReport> {
        let config = &input.config;
        let size = config.interpolation_grid.max(2);
        let area = input.bounds.expanded(config.interpolation_margin);
        let step_lat = (area.north - area.south) / (size - 1) as f64;
        let step_lon = (area.east - area.west) / (size - 1) as f64;
        let points = input.local_points();
        let intensities = input.intensities();

        let values: Vec<f64> = (0..size * size)
            .into_par_iter()
            .map(|index| {
                cancel.check()?;
                let node = GeoCoordinate::new(
                    area.south + (index / size) as f64 * step_lat,
                    area.west + (index % size) as f64 * step_lon,
                );
                let at = input.projection.to_local(node, 0.0);
                Ok(idw(at, &points, &intensities, config.idw_power))
            })
            .collect::<CoreResult<_>>()?;
        let surface = Array2::from_shape_vec((size, size), values)
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        let ((row, col), _) = surface
            .indexed_iter()
            .fold(None, |best: Option<((usize, usize), f64)>, (idx, &v)| match best {
                Some((_, top)) if v <= top => best,
                _ => Some((idx, v)),
            })
            .ok_or_else(|| CoreError::Internal("empty interpolation surface".into()))?;
        let coordinate = GeoCoordinate::new(
            area.south + row as f64 * step_lat,
            area.west + col as f64 * step_lon,
        );
        let source = input.projection.to_local(coordinate, 0.0);

        let mut by_range: Vec<(f64, f64)> = points
            .iter()
            .zip(&intensities)
            .map(|(p, &i)| (p.distance(source), i))
            .collect();
        by_range.sort_by(|a, b| a.0.total_cmp(&b.0));
        let activities: Vec<f64> = by_range
            .iter()
            .take(config.nearest_samples.max(1))
            .map(|&(range, intensity)| input.model.point_activity(intensity, range))
            .collect();

        let (result, signal) = if activities.iter().all(|&a| a == 0.0) {
            warn!(
                "interpolated maximum at ({:.6}, {:.6}) carries no signal",
                coordinate.lat, coordinate.lon
            );
            (
                LocalizationResult {
                    coordinate,
                    activity: 0.0,
                    deviation: 0.0,
                },
                SignalStatus::NoSignal,
            )
        } else {
            (
                LocalizationResult {
                    coordinate,
                    activity: StatsHelper::mean(&activities),
                    deviation: StatsHelper::std_dev(&activities),
                },
                SignalStatus::Detected,
            )
        };

        Ok(LocalizationReport {
            strategy: StrategyKind::Interpolation,
            result,
            signal,
            samples_used: input.samples.len(),
            bounds: area,
            coarse: None,
            refined: None,
        })
    }
}

/// Inverse-distance weighting over horizontal distance.
fn idw(at: LocalPoint, points: &[LocalPoint], values: &[f64], power: f64) -> f64 {
    let mut weighted = 0.0;
    let mut total = 0.0;
    for (p, &v) in points.iter().zip(values) {
        let d = at.horizontal_distance(*p);
        if d < COINCIDENT_M {
            return v;
        }
        let w = d.powf(-power);
        weighted += w * v;
        total += w;
    }
    if total > 0.0 {
        weighted / total
    } else {
        0.0
    }
}
