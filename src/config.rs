//! Resolving `IntOrString` rolling-update envelope parameters against a target count, the
//! same way Kubernetes resolves `RollingUpdateDeployment.maxUnavailable`/`maxSurge`.

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use snafu::Snafu;

#[derive(Debug, Snafu, PartialEq, Eq)]
pub enum IntOrPercentError {
    #[snafu(display("percentage value {value:?} is not a valid integer percentage"))]
    InvalidPercentage { value: String },
}

/// Which way to round when a percentage doesn't divide the target evenly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    Up,
    Down,
}

/// Resolves an `IntOrString` against `target`, the conventional Kubernetes rounding:
/// ceiling for surge-like budgets, floor for unavailable-like budgets. Negative results are
/// clamped to zero (`maxUnavailable`/`maxSurge` have a minimum of 0).
pub fn resolve_int_or_percent(
    value: &IntOrString,
    target: u32,
    rounding: Rounding,
) -> Result<u32, IntOrPercentError> {
    match value {
        IntOrString::Int(i) => Ok((*i).max(0) as u32),
        IntOrString::String(s) => {
            let pct_str = s.strip_suffix('%').ok_or_else(|| {
                InvalidPercentageSnafu {
                    value: s.to_string(),
                }
                .build()
            })?;
            let pct: i64 = pct_str.parse().map_err(|_| {
                InvalidPercentageSnafu {
                    value: s.to_string(),
                }
                .build()
            })?;
            let pct = pct.max(0) as u64;
            let numerator = u64::from(target) * pct;
            let resolved = match rounding {
                Rounding::Up => numerator.div_ceil(100),
                Rounding::Down => numerator / 100,
            };
            Ok(resolved as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::int_passthrough(IntOrString::Int(2), 10, Rounding::Up, 2)]
    #[case::percent_rounds_up(IntOrString::String("25%".into()), 10, Rounding::Up, 3)]
    #[case::percent_rounds_down(IntOrString::String("25%".into()), 10, Rounding::Down, 2)]
    #[case::zero_percent(IntOrString::String("0%".into()), 10, Rounding::Up, 0)]
    fn resolves(
        #[case] value: IntOrString,
        #[case] target: u32,
        #[case] rounding: Rounding,
        #[case] expected: u32,
    ) {
        assert_eq!(resolve_int_or_percent(&value, target, rounding).unwrap(), expected);
    }

    #[test]
    fn rejects_non_percentage_string() {
        let err = resolve_int_or_percent(&IntOrString::String("abc".into()), 10, Rounding::Up)
            .unwrap_err();
        assert_eq!(
            err,
            IntOrPercentError::InvalidPercentage {
                value: "abc".into()
            }
        );
    }
}
