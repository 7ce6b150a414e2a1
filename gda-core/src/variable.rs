use crate::error::GdaError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Deposition variables the analysis knows how to track.
///
/// Names are matched exactly against the atmospheric model's field names;
/// anything else is rejected where it enters the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Variable {
    /// Black carbon deposition
    #[serde(rename = "BC_dep")]
    BcDep,
    /// Fine particulate (PM2.5) deposition
    #[serde(rename = "PM2.5_dep")]
    Pm25Dep,
    /// Coarse particulate (PM10) deposition
    #[serde(rename = "PM10_dep")]
    Pm10Dep,
}

impl Variable {
    pub const ALL: [Variable; 3] = [Variable::BcDep, Variable::Pm25Dep, Variable::Pm10Dep];

    /// Field name as written by the atmospheric model.
    pub fn name(&self) -> &'static str {
        match self {
            Variable::BcDep => "BC_dep",
            Variable::Pm25Dep => "PM2.5_dep",
            Variable::Pm10Dep => "PM10_dep",
        }
    }

    /// Short lowercase prefix for tabular column names.
    pub fn column_prefix(&self) -> &'static str {
        match self {
            Variable::BcDep => "bc",
            Variable::Pm25Dep => "pm25",
            Variable::Pm10Dep => "pm10",
        }
    }
}

impl fmt::Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Variable {
    type Err = GdaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "BC_dep" => Ok(Variable::BcDep),
            "PM2.5_dep" => Ok(Variable::Pm25Dep),
            "PM10_dep" => Ok(Variable::Pm10Dep),
            other => Err(GdaError::UnknownVariable(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Variable;

    #[test]
    fn test_variable_names_round_trip() {
        for variable in Variable::ALL {
            assert_eq!(variable.name().parse::<Variable>().unwrap(), variable);
        }
    }

    #[test]
    fn test_unknown_variable_rejected() {
        assert!("SO4_dep".parse::<Variable>().is_err());
        assert!("bc_dep".parse::<Variable>().is_err());
    }
}
