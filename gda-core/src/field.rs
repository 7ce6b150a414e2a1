use crate::error::{GdaError, Result};
use crate::grid::GridDescriptor;
use crate::variable::Variable;
use chrono::NaiveDateTime;
use std::collections::BTreeMap;

/// One time slice of gridded deposition fields.
///
/// Each field is a row-major array aligned to `grid`. Non-finite cell values
/// are treated as missing by the extractor.
#[derive(Debug, Clone)]
pub struct FieldSlice {
    pub timestamp: NaiveDateTime,
    grid: GridDescriptor,
    fields: BTreeMap<Variable, Vec<f64>>,
}

impl FieldSlice {
    pub fn new(timestamp: NaiveDateTime, grid: GridDescriptor) -> Self {
        FieldSlice {
            timestamp,
            grid,
            fields: BTreeMap::new(),
        }
    }

    /// Add a field, checking its length against the grid.
    pub fn with_field(mut self, variable: Variable, values: Vec<f64>) -> Result<Self> {
        self.insert(variable, values)?;
        Ok(self)
    }

    pub fn insert(&mut self, variable: Variable, values: Vec<f64>) -> Result<()> {
        if values.len() != self.grid.len() {
            return Err(GdaError::ShapeMismatch {
                variable: variable.to_string(),
                expected: self.grid.len(),
                found: values.len(),
            });
        }
        self.fields.insert(variable, values);
        Ok(())
    }

    pub fn grid(&self) -> &GridDescriptor {
        &self.grid
    }

    pub fn field(&self, variable: Variable) -> Option<&[f64]> {
        self.fields.get(&variable).map(Vec::as_slice)
    }

    pub fn variables(&self) -> impl Iterator<Item = Variable> + '_ {
        self.fields.keys().copied()
    }
}
