//! Per-glacier statistics for one gridded time slice.

use crate::mask::MaskIndex;
use chrono::NaiveDateTime;
use gda_core::{FieldSlice, GdaError, Result, Variable};
use log::debug;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Mean and sum of a field over a glacier's cells.
///
/// Both are `None` when the glacier has no assigned cell with a finite
/// value; missing coverage is never reported as zero.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct DepositionStats {
    pub mean: Option<f64>,
    pub sum: Option<f64>,
    /// Cells that contributed a finite value
    pub cells: usize,
}

impl DepositionStats {
    pub fn missing() -> Self {
        DepositionStats::default()
    }

    fn over(field: &[f64], cells: &[usize]) -> Self {
        let (sum, count) = cells
            .iter()
            .map(|&c| field[c])
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
        if count == 0 {
            return DepositionStats::missing();
        }
        DepositionStats {
            mean: Some(sum / count as f64),
            sum: Some(sum),
            cells: count,
        }
    }

    pub fn is_missing(&self) -> bool {
        self.sum.is_none()
    }
}

/// Everything one worker produced for one time slice.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationBatch {
    pub timestamp: NaiveDateTime,
    /// glacier id -> variable -> stats
    pub observations: BTreeMap<String, BTreeMap<Variable, DepositionStats>>,
}

/// Aggregate the requested variables of `slice` over every glacier of `mask`.
///
/// Variables absent from the slice are skipped for all glaciers. Glaciers
/// with no assigned cells get missing stats for each present variable.
/// Fails only when the slice is not on the mask's grid.
pub fn extract(slice: &FieldSlice, mask: &MaskIndex, variables: &[Variable]) -> Result<ObservationBatch> {
    if slice.grid() != mask.grid() {
        return Err(GdaError::Configuration(format!(
            "slice {} grid {:016x} does not match mask grid {:016x}",
            slice.timestamp,
            slice.grid().fingerprint(),
            mask.grid().fingerprint()
        )));
    }

    let present: Vec<(Variable, &[f64])> = variables
        .iter()
        .filter_map(|&v| match slice.field(v) {
            Some(field) => Some((v, field)),
            None => {
                debug!("{} absent from slice {}, skipped", v, slice.timestamp);
                None
            }
        })
        .collect();

    let observations = mask
        .glacier_ids()
        .par_iter()
        .enumerate()
        .map(|(position, id)| {
            let cells = mask.cells_of(position);
            let stats = present
                .iter()
                .map(|&(variable, field)| (variable, DepositionStats::over(field, cells)))
                .collect::<BTreeMap<_, _>>();
            (id.clone(), stats)
        })
        .collect::<BTreeMap<_, _>>();

    Ok(ObservationBatch {
        timestamp: slice.timestamp,
        observations,
    })
}
