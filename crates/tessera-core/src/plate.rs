//! Initial condition for the heat-diffusion problem.

use ndarray::Array2;

use crate::error::CoreError;
use crate::types::TemperatureField;

pub const DEFAULT_HOT: f64 = 100.0;
pub const DEFAULT_COOL: f64 = 20.0;

/// A rectangular plate held at `cool` on every edge except the middle third
/// of the top edge, which is held at `hot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeatPlate {
    pub width: usize,
    pub height: usize,
    pub hot: f64,
    pub cool: f64,
}

impl HeatPlate {
    pub fn new(width: usize, height: usize) -> Result<Self, CoreError> {
        if width == 0 || height == 0 {
            return Err(CoreError::EmptyGrid { width, height });
        }
        Ok(Self {
            width,
            height,
            hot: DEFAULT_HOT,
            cool: DEFAULT_COOL,
        })
    }

    pub fn with_temperatures(mut self, hot: f64, cool: f64) -> Self {
        self.hot = hot;
        self.cool = cool;
        self
    }

    /// Columns of row 0 pinned to the hot value: `[w/3, 2w/3)`.
    pub fn hot_columns(&self) -> std::ops::Range<usize> {
        self.width / 3..2 * self.width / 3
    }

    /// The starting field: `cool` everywhere except the hot stretch of row 0.
    pub fn initial_field(&self) -> TemperatureField {
        let hot = self.hot_columns();
        Array2::from_shape_fn((self.height, self.width), |(r, c)| {
            if r == 0 && hot.contains(&c) {
                self.hot
            } else {
                self.cool
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hot_stretch_is_middle_third_of_top_row() {
        let field = HeatPlate::new(9, 4).unwrap().initial_field();
        let top: Vec<f64> = field.row(0).to_vec();
        assert_eq!(
            top,
            vec![20.0, 20.0, 20.0, 100.0, 100.0, 100.0, 20.0, 20.0, 20.0]
        );
        assert!(field.rows().into_iter().skip(1).all(|r| r.iter().all(|&t| t == 20.0)));
    }

    #[test]
    fn test_custom_temperatures_and_tiny_plates() {
        let plate = HeatPlate::new(2, 2).unwrap().with_temperatures(50.0, 0.0);
        // w/3 == 0 and 2w/3 == 1: only column 0 is hot.
        assert_eq!(plate.hot_columns(), 0..1);
        assert_eq!(plate.initial_field()[[0, 0]], 50.0);
        assert!(matches!(HeatPlate::new(0, 3), Err(CoreError::EmptyGrid { .. })));
    }
}
