use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::localization::model::AttenuationModel;
use crate::localization::samples::{GeoBounds, GeoCoordinate, LocalPoint, Projection};
use crate::math::stats::StatsHelper;
use crate::prelude::{CancelToken, CoreError, CoreResult};

/// Index of a lattice node: `row` runs south to north, `col` west to east.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridCell {
    pub row: usize,
    pub col: usize,
}

/// Accumulators of one localization pass, owned by the call that built them.
///
/// Nodes include both corners of the spanned rectangle.
#[derive(Debug, Clone)]
pub struct SearchGrid {
    pub origin: GeoCoordinate,
    pub step_lat: f64,
    pub step_lon: f64,
    /// Sample variance of the implied activities; `INFINITY` below two samples.
    pub deviation: Array2<f64>,
    pub mean_activity: Array2<f64>,
    pub contributions: Array2<usize>,
}

/// Per-cell statistics of one pass.
struct CellStats {
    deviation: f64,
    mean: f64,
    count: usize,
}

/// Flight track in the metric frame, first and last fixes included.
pub struct Track<'a> {
    pub points: &'a [LocalPoint],
    pub intensities: &'a [f64],
}

impl SearchGrid {
    /// Evaluates a `size × size` lattice spanning `bounds`.
    pub fn over_bounds(
        bounds: &GeoBounds,
        size: usize,
        track: &Track<'_>,
        projection: &Projection,
        model: &AttenuationModel,
        tolerance: f64,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        let segments = size.saturating_sub(1).max(1) as f64;
        Self::evaluate(
            GeoCoordinate::new(bounds.south, bounds.west),
            (bounds.north - bounds.south) / segments,
            (bounds.east - bounds.west) / segments,
            size,
            track,
            projection,
            model,
            tolerance,
            cancel,
        )
    }

    /// Evaluates a `size × size` lattice centred on `center`.
    #[allow(clippy::too_many_arguments)]
    pub fn around(
        center: GeoCoordinate,
        step_lat: f64,
        step_lon: f64,
        size: usize,
        track: &Track<'_>,
        projection: &Projection,
        model: &AttenuationModel,
        tolerance: f64,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        let half = (size.saturating_sub(1) / 2) as f64;
        Self::evaluate(
            GeoCoordinate::new(center.lat - half * step_lat, center.lon - half * step_lon),
            step_lat,
            step_lon,
            size,
            track,
            projection,
            model,
            tolerance,
            cancel,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn evaluate(
        origin: GeoCoordinate,
        step_lat: f64,
        step_lon: f64,
        size: usize,
        track: &Track<'_>,
        projection: &Projection,
        model: &AttenuationModel,
        tolerance: f64,
        cancel: &CancelToken,
    ) -> CoreResult<Self> {
        if track.points.len() != track.intensities.len() {
            return Err(CoreError::Internal(format!(
                "{} track points for {} intensities",
                track.points.len(),
                track.intensities.len()
            )));
        }
        let stats: Vec<CellStats> = (0..size * size)
            .into_par_iter()
            .map(|index| {
                cancel.check()?;
                let node = node_at(origin, step_lat, step_lon, index / size, index % size);
                let source = projection.to_local(node, 0.0);
                let implied = implied_activities(track, source, model, tolerance);
                Ok(CellStats::from_activities(&implied))
            })
            .collect::<CoreResult<_>>()?;

        let shape = (size, size);
        let to_grid = |values: Vec<f64>| {
            Array2::from_shape_vec(shape, values).map_err(|e| CoreError::Internal(e.to_string()))
        };
        let deviation = to_grid(stats.iter().map(|s| s.deviation).collect())?;
        let mean_activity = to_grid(stats.iter().map(|s| s.mean).collect())?;
        let contributions = Array2::from_shape_vec(shape, stats.iter().map(|s| s.count).collect())
            .map_err(|e| CoreError::Internal(e.to_string()))?;

        Ok(Self {
            origin,
            step_lat,
            step_lon,
            deviation,
            mean_activity,
            contributions,
        })
    }

    pub fn size(&self) -> usize {
        self.deviation.nrows()
    }

    pub fn node(&self, cell: GridCell) -> GeoCoordinate {
        node_at(self.origin, self.step_lat, self.step_lon, cell.row, cell.col)
    }

    /// First cell holding the strictly smallest finite deviation.
    pub fn best_cell(&self) -> Option<GridCell> {
        let mut best: Option<(GridCell, f64)> = None;
        for ((row, col), &d) in self.deviation.indexed_iter() {
            if !d.is_finite() {
                continue;
            }
            if best.map_or(true, |(_, current)| d < current) {
                best = Some((GridCell { row, col }, d));
            }
        }
        best.map(|(cell, _)| cell)
    }
}

impl CellStats {
    fn from_activities(implied: &[Option<f64>]) -> Self {
        let values: Vec<f64> = implied.iter().flatten().copied().collect();
        let deviation = if values.len() < 2 {
            f64::INFINITY
        } else {
            StatsHelper::std_dev(&values).powi(2)
        };
        Self {
            deviation,
            mean: StatsHelper::mean(&values),
            count: values.len(),
        }
    }
}

fn node_at(
    origin: GeoCoordinate,
    step_lat: f64,
    step_lon: f64,
    row: usize,
    col: usize,
) -> GeoCoordinate {
    GeoCoordinate::new(
        origin.lat + row as f64 * step_lat,
        origin.lon + col as f64 * step_lon,
    )
}

/// Activity each interior sample implies for a source at `source`, aligned
/// with the track; `None` where the geometry factor vanishes and for the two
/// end fixes.
pub fn implied_activities(
    track: &Track<'_>,
    source: LocalPoint,
    model: &AttenuationModel,
    tolerance: f64,
) -> Vec<Option<f64>> {
    let n = track.points.len();
    let mut implied = vec![None; n];
    for i in 1..n.saturating_sub(1) {
        let g = model.geometry_factor(
            track.points[i - 1],
            track.points[i],
            track.points[i + 1],
            source,
            tolerance,
        );
        if g > 0.0 && g.is_finite() {
            implied[i] = Some(model.c * track.intensities[i] / g);
        }
    }
    implied
}
