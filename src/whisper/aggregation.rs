use crate::error::{Result, WhisperError};

/// The closed set of functions usable to consolidate fine-resolution values
/// into one coarse-resolution value. Numeric codes match the on-disk
/// encoding (1..8) used in the metadata block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregationMethod {
    Average = 1,
    Sum = 2,
    Last = 3,
    Max = 4,
    Min = 5,
    AvgZero = 6,
    AbsMax = 7,
    AbsMin = 8,
}

impl AggregationMethod {
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    pub fn from_u32(code: u32) -> Result<AggregationMethod> {
        Ok(match code {
            1 => AggregationMethod::Average,
            2 => AggregationMethod::Sum,
            3 => AggregationMethod::Last,
            4 => AggregationMethod::Max,
            5 => AggregationMethod::Min,
            6 => AggregationMethod::AvgZero,
            7 => AggregationMethod::AbsMax,
            8 => AggregationMethod::AbsMin,
            other => {
                return Err(WhisperError::InvalidAggregationMethod(format!(
                    "unrecognized aggregation type code {other}"
                )))
            }
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            AggregationMethod::Average => "average",
            AggregationMethod::Sum => "sum",
            AggregationMethod::Last => "last",
            AggregationMethod::Max => "max",
            AggregationMethod::Min => "min",
            AggregationMethod::AvgZero => "avg_zero",
            AggregationMethod::AbsMax => "absmax",
            AggregationMethod::AbsMin => "absmin",
        }
    }

    pub fn from_name(name: &str) -> Result<AggregationMethod> {
        Ok(match name {
            "average" => AggregationMethod::Average,
            "sum" => AggregationMethod::Sum,
            "last" => AggregationMethod::Last,
            "max" => AggregationMethod::Max,
            "min" => AggregationMethod::Min,
            "avg_zero" => AggregationMethod::AvgZero,
            "absmax" => AggregationMethod::AbsMax,
            "absmin" => AggregationMethod::AbsMin,
            other => {
                return Err(WhisperError::InvalidAggregationMethod(format!(
                    "unrecognized aggregation method '{other}'"
                )))
            }
        })
    }

    /// Combines `known` (non-null values, in caller order) into a single
    /// scalar. `neighbors` (the dense vector including nulls) is required
    /// only for `avg_zero`.
    pub fn aggregate(self, known: &[f64], neighbors: Option<&[Option<f64>]>) -> Result<f64> {
        match self {
            AggregationMethod::Average => Ok(known.iter().sum::<f64>() / known.len() as f64),
            AggregationMethod::Sum => Ok(known.iter().sum()),
            AggregationMethod::Last => Ok(*known.last().expect("known is non-empty")),
            AggregationMethod::Max => Ok(known.iter().cloned().fold(f64::MIN, f64::max)),
            AggregationMethod::Min => Ok(known.iter().cloned().fold(f64::MAX, f64::min)),
            AggregationMethod::AvgZero => {
                let neighbors = neighbors.ok_or_else(|| {
                    WhisperError::InvalidAggregationMethod(
                        "avg_zero requires a neighbors vector".to_string(),
                    )
                })?;
                let sum: f64 = neighbors.iter().map(|v| v.unwrap_or(0.0)).sum();
                Ok(sum / neighbors.len() as f64)
            }
            AggregationMethod::AbsMax => {
                let mut best = known[0];
                for &v in &known[1..] {
                    if v.abs() > best.abs() {
                        best = v;
                    }
                }
                Ok(best)
            }
            AggregationMethod::AbsMin => Ok(*known
                .iter()
                .min_by(|a, b| a.abs().partial_cmp(&b.abs()).unwrap())
                .expect("known is non-empty")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn average_and_sum() {
        assert_eq!(
            AggregationMethod::Average.aggregate(&[1.0, 2.0, 3.0], None).unwrap(),
            2.0
        );
        assert_eq!(
            AggregationMethod::Sum.aggregate(&[1.0, 2.0, 3.0], None).unwrap(),
            6.0
        );
    }

    #[test]
    fn absmax_and_absmin_break_ties_by_first() {
        assert_eq!(
            AggregationMethod::AbsMax.aggregate(&[-3.0, -2.0, 1.0, 2.0], None).unwrap(),
            -3.0
        );
        assert_eq!(
            AggregationMethod::AbsMin.aggregate(&[-2.0, -1.0, 2.0, 3.0], None).unwrap(),
            -1.0
        );
        // equal absolute values: the first occurrence wins, not the last.
        assert_eq!(AggregationMethod::AbsMax.aggregate(&[3.0, -3.0], None).unwrap(), 3.0);
        assert_eq!(AggregationMethod::AbsMin.aggregate(&[-2.0, 2.0], None).unwrap(), -2.0);
    }

    #[test]
    fn avg_zero_needs_neighbors() {
        let neighbors = vec![Some(1.0), Some(2.0), Some(3.0), Some(4.0), None, None, None, None];
        let known = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(
            AggregationMethod::AvgZero.aggregate(&known, Some(&neighbors)).unwrap(),
            1.25
        );
        assert!(AggregationMethod::AvgZero.aggregate(&known, None).is_err());
    }

    #[test]
    fn round_trips_through_code_and_name() {
        for code in 1u32..=8 {
            let method = AggregationMethod::from_u32(code).unwrap();
            assert_eq!(method.to_u32(), code);
            assert_eq!(AggregationMethod::from_name(method.name()).unwrap(), method);
        }
        assert!(AggregationMethod::from_u32(9).is_err());
        assert!(AggregationMethod::from_name("bogus").is_err());
    }
}
