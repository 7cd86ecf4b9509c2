/// Descriptive statistics and Student-t confidence intervals.
use statrs::distribution::{ContinuousCDF, StudentsT};

/// Count, extremes, mean and sample variance of a series.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Description {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Sample variance (n - 1 denominator). NaN for a single value.
    pub variance: f64,
}

impl Description {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }

    /// Half-width of the two-sided Student-t interval for the mean at the
    /// given confidence level, with `count - 1` degrees of freedom.
    ///
    /// NaN when fewer than two values were described.
    pub fn confidence_half_width(&self, confidence: f64) -> f64 {
        if self.count < 2 {
            return f64::NAN;
        }
        let freedom = (self.count - 1) as f64;
        let t = match StudentsT::new(0.0, 1.0, freedom) {
            Ok(dist) => dist.inverse_cdf(0.5 + confidence / 2.0),
            Err(_) => return f64::NAN,
        };
        t * (self.variance / self.count as f64).sqrt()
    }
}

/// Describe a series. Returns `None` for an empty one.
pub fn describe(values: &[f64]) -> Option<Description> {
    if values.is_empty() {
        return None;
    }
    let count = values.len();
    let mean = values.iter().sum::<f64>() / count as f64;
    let min = values.iter().copied().fold(f64::INFINITY, f64::min);
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let variance = if count < 2 {
        f64::NAN
    } else {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (count - 1) as f64
    };

    Some(Description {
        count,
        min,
        max,
        mean,
        variance,
    })
}

/// Arithmetic mean; NaN for an empty series.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}
