use serde::{Deserialize, Serialize};

/// Face interpolation for convected quantities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConvectionScheme {
    Upwind,
    #[default]
    Linear,
    /// `gamma` parts linear, the rest upwind.
    Blended(f64),
}

impl ConvectionScheme {
    /// Owner weight for a face with flux `phi` and geometric weight `w`.
    pub fn weight(&self, phi: f64, w: f64) -> f64 {
        let upwind = if phi >= 0.0 { 1.0 } else { 0.0 };
        match *self {
            ConvectionScheme::Upwind => upwind,
            ConvectionScheme::Linear => w,
            ConvectionScheme::Blended(gamma) => gamma * w + (1.0 - gamma) * upwind,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DdtScheme {
    #[default]
    Euler,
    SteadyState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upwind_follows_flux_direction() {
        assert_eq!(ConvectionScheme::Upwind.weight(2.0, 0.3), 1.0);
        assert_eq!(ConvectionScheme::Upwind.weight(-2.0, 0.3), 0.0);
        assert_eq!(ConvectionScheme::Linear.weight(-2.0, 0.3), 0.3);
        assert!((ConvectionScheme::Blended(0.5).weight(1.0, 0.5) - 0.75).abs() < 1e-15);
    }

    #[test]
    fn schemes_read_from_json() {
        let s: ConvectionScheme = serde_json::from_str(r#"{ "blended": 0.8 }"#).unwrap();
        assert_eq!(s, ConvectionScheme::Blended(0.8));
        let d: DdtScheme = serde_json::from_str(r#""steadyState""#).unwrap();
        assert_eq!(d, DdtScheme::SteadyState);
    }
}
