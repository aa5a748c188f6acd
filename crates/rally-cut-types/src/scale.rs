use serde::{Deserialize, Serialize};

/// Frame height every pixel threshold is expressed at.
pub const REFERENCE_HEIGHT: f64 = 720.0;

/// A threshold tuned at 720p whose effective value is
/// `reference * scale^exponent`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResolutionDependent {
    pub reference: f64,
    pub exponent: f64,
}

impl ResolutionDependent {
    pub const fn new(reference: f64, exponent: f64) -> Self {
        Self {
            reference,
            exponent,
        }
    }

    /// Linear pixel distance.
    pub const fn length(reference: f64) -> Self {
        Self::new(reference, 1.0)
    }

    /// Pixel area or squared distance.
    pub const fn area(reference: f64) -> Self {
        Self::new(reference, 2.0)
    }

    pub fn at(&self, scale: &ScaleContext) -> f64 {
        self.reference * scale.factor().powf(self.exponent)
    }
}

/// Ratio between the analysis height and [`REFERENCE_HEIGHT`], fixed for a run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScaleContext {
    factor: f64,
}

impl Default for ScaleContext {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl ScaleContext {
    pub fn for_height(target_height: u32) -> Self {
        Self {
            factor: target_height as f64 / REFERENCE_HEIGHT,
        }
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn resolve(&self, parameter: ResolutionDependent) -> f64 {
        parameter.at(self)
    }

    /// Resolves an iteration or pixel count, rounding half away from zero.
    pub fn resolve_count(&self, parameter: ResolutionDependent) -> usize {
        self.resolve(parameter).round().max(0.0) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_scale_with_height() {
        let half = ScaleContext::for_height(360);
        assert_eq!(half.factor(), 0.5);
        assert_eq!(half.resolve(ResolutionDependent::length(10.0)), 5.0);
        assert_eq!(half.resolve(ResolutionDependent::area(100.0)), 25.0);
        assert_eq!(half.resolve(ResolutionDependent::new(7.0, 0.0)), 7.0);
        assert_eq!(half.resolve_count(ResolutionDependent::length(1.0)), 1);
        assert_eq!(ScaleContext::for_height(180).resolve_count(ResolutionDependent::length(1.0)), 0);
    }
}
