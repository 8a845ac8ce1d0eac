use crate::numerics::solver::FieldSolverSettings;
use crate::physics::schemes::{ConvectionScheme, DdtScheme};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse solution controls: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read solution controls: {0}")]
    Io(#[from] std::io::Error),
    #[error("no solver settings for field '{0}'")]
    MissingSolver(String),
    #[error("invalid value for '{key}': {reason}")]
    Invalid { key: String, reason: String },
}

fn one() -> usize {
    1
}

fn default_true() -> bool {
    true
}

/// Outer/inner loop counts and convergence control.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PimpleSettings {
    #[serde(default = "one")]
    pub n_outer_correctors: usize,
    #[serde(default = "one")]
    pub n_correctors: usize,
    #[serde(default)]
    pub n_non_orthogonal_correctors: usize,
    #[serde(default = "default_true")]
    pub momentum_predictor: bool,
    /// Only read on the master rank.
    #[serde(default)]
    pub p_ref_cell: Option<usize>,
    #[serde(default)]
    pub p_ref_value: f64,
    /// Initial-residual tolerance per field name.
    #[serde(default)]
    pub residual_control: HashMap<String, f64>,
}

impl Default for PimpleSettings {
    fn default() -> Self {
        Self {
            n_outer_correctors: 1,
            n_correctors: 1,
            n_non_orthogonal_correctors: 0,
            momentum_predictor: true,
            p_ref_cell: None,
            p_ref_value: 0.0,
            residual_control: HashMap::new(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemeSettings {
    #[serde(default)]
    pub ddt: DdtScheme,
    /// Momentum convection.
    #[serde(default, rename = "divU")]
    pub div_u: ConvectionScheme,
    /// Enthalpy convection.
    #[serde(default, rename = "divH")]
    pub div_h: ConvectionScheme,
    #[serde(default)]
    pub non_orthogonal_correction: bool,
}

/// Everything the coupling loop reads from the case setup.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SolutionControls {
    #[serde(default)]
    pub solvers: HashMap<String, FieldSolverSettings>,
    #[serde(default, rename = "PIMPLE")]
    pub pimple: PimpleSettings,
    #[serde(default)]
    pub schemes: SchemeSettings,
}

impl SolutionControls {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let controls: Self = serde_json::from_str(text)?;
        controls.validate()?;
        Ok(controls)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |key: &str, reason: &str| ConfigError::Invalid {
            key: key.to_string(),
            reason: reason.to_string(),
        };
        if self.pimple.n_outer_correctors == 0 {
            return Err(invalid("nOuterCorrectors", "must be at least 1"));
        }
        if self.pimple.n_correctors == 0 {
            return Err(invalid("nCorrectors", "must be at least 1"));
        }
        if let ConvectionScheme::Blended(g) = self.schemes.div_u {
            if !(0.0..=1.0).contains(&g) {
                return Err(invalid("divU", "blending factor must lie in [0, 1]"));
            }
        }
        for (name, s) in &self.solvers {
            if !(s.relaxation > 0.0 && s.relaxation <= 1.0) {
                return Err(invalid(name, "relaxation must lie in (0, 1]"));
            }
            if s.tolerance < 0.0 || s.rel_tol < 0.0 {
                return Err(invalid(name, "tolerances must be non-negative"));
            }
        }
        for (name, &tol) in &self.pimple.residual_control {
            if tol < 0.0 {
                return Err(invalid(name, "residual control must be non-negative"));
            }
        }
        Ok(())
    }

    /// Settings for `field`; on final iterations `<field>Final` is preferred,
    /// otherwise the plain entry without relative tolerance or relaxation.
    pub fn solver_settings(&self, field: &str, final_iter: bool) -> Result<FieldSolverSettings, ConfigError> {
        if final_iter {
            if let Some(s) = self.solvers.get(&format!("{field}Final")) {
                return Ok(s.clone());
            }
        }
        let settings = self
            .solvers
            .get(field)
            .cloned()
            .ok_or_else(|| ConfigError::MissingSolver(field.to_string()))?;
        Ok(if final_iter {
            FieldSolverSettings {
                rel_tol: 0.0,
                relaxation: 1.0,
                ..settings
            }
        } else {
            settings
        })
    }
}
