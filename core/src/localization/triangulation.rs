use log::warn;

use crate::config::StrategyKind;
use crate::localization::grid::{implied_activities, GridCell, SearchGrid, Track};
use crate::localization::{
    LocalizationInput, LocalizationReport, LocalizationResult, LocalizationStrategy, SignalStatus,
};
use crate::prelude::{CancelToken, CoreError, CoreResult};
use crate::telemetry::log::LogManager;

/// Two-sided 95 % normal quantile.
const CONFIDENCE_Z: f64 = 1.96;

/// Two-pass grid search minimising the spread of per-sample implied activity.
///
/// A coarse lattice covers the search bounds; a second lattice of the same
/// size and half the step is centred on the coarse winner.
pub struct GridSearchLocalizer;

impl LocalizationStrategy for GridSearchLocalizer {
    fn kind(&self) -> StrategyKind {
        StrategyKind::GridSearch
    }

    fn localize(
        &self,
        input: &LocalizationInput,
        cancel: &CancelToken,
    ) -> CoreResult<LocalizationReport> {
        let config = &input.config;
        let points = input.local_points();
        let intensities = input.intensities();
        let track = Track {
            points: &points,
            intensities: &intensities,
        };
        let tolerance = config.quadrature_tolerance;
        let log = LogManager::new();

        let coarse = SearchGrid::over_bounds(
            &input.bounds,
            config.grid_size,
            &track,
            &input.projection,
            &input.model,
            tolerance,
            cancel,
        )?;
        let coarse_cell = best_of(&coarse, "coarse")?;
        log.trace(&format!(
            "coarse pass: best cell {:?}, variance {:.4e}",
            coarse_cell,
            coarse.deviation[(coarse_cell.row, coarse_cell.col)]
        ));

        let refined = SearchGrid::around(
            coarse.node(coarse_cell),
            coarse.step_lat / 2.0,
            coarse.step_lon / 2.0,
            config.grid_size,
            &track,
            &input.projection,
            &input.model,
            tolerance,
            cancel,
        )?;
        let refined_cell = best_of(&refined, "refinement")?;
        log.trace(&format!(
            "refinement pass: best cell {:?}, variance {:.4e}",
            refined_cell,
            refined.deviation[(refined_cell.row, refined_cell.col)]
        ));

        let (grid, cell) = if config.apply_refinement {
            (&refined, refined_cell)
        } else {
            (&coarse, coarse_cell)
        };
        let coordinate = grid.node(cell);
        let source = input.projection.to_local(coordinate, 0.0);

        // activity is read off the interior sample closest to the chosen node
        let implied = implied_activities(&track, source, &input.model, tolerance);
        let nearest = points
            .iter()
            .zip(&implied)
            .filter_map(|(p, a)| a.filter(|&a| a != 0.0).map(|a| (p.distance(source), a)))
            .min_by(|a, b| a.0.total_cmp(&b.0));

        let (result, signal) = match nearest {
            Some((_, activity)) => {
                let variance = grid.deviation[(cell.row, cell.col)];
                let n = grid.contributions[(cell.row, cell.col)] as f64;
                let deviation = CONFIDENCE_Z * 2.0 * (variance / n).sqrt();
                (
                    LocalizationResult {
                        coordinate,
                        activity,
                        deviation,
                    },
                    SignalStatus::Detected,
                )
            }
            None => {
                warn!(
                    "no sample implies a non-zero activity at ({:.6}, {:.6})",
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
            }
        };

        Ok(LocalizationReport {
            strategy: StrategyKind::GridSearch,
            result,
            signal,
            samples_used: input.samples.len(),
            bounds: input.bounds,
            coarse: Some(coarse.node(coarse_cell)),
            refined: Some(refined.node(refined_cell)),
        })
    }
}

fn best_of(grid: &SearchGrid, pass: &str) -> CoreResult<GridCell> {
    grid.best_cell().ok_or_else(|| {
        CoreError::InvalidInput(format!(
            "{} pass: no cell gathered two usable samples",
            pass
        ))
    })
}
