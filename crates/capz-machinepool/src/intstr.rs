//! Scaling of int-or-percent values against a total

use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;

use capz_common::{Error, Result};

/// Resolve `value` against `total`
///
/// Integers are returned unchanged. Percent strings (`"25%"`) are applied
/// to `total`, rounding up or down as requested. Any other string is a
/// validation error.
pub fn scaled_value_from_int_or_percent(
    value: &IntOrString,
    total: i32,
    round_up: bool,
) -> Result<i32> {
    match value {
        IntOrString::Int(i) => Ok(*i),
        IntOrString::String(s) => {
            let percent = s
                .strip_suffix('%')
                .ok_or_else(|| {
                    Error::validation(format!("invalid value for IntOrString: {s:?} is not a percentage"))
                })?
                .parse::<i64>()
                .map_err(|e| Error::validation(format!("invalid value {s:?}: {e}")))?;
            let scaled = percent * i64::from(total);
            let value = if round_up {
                (scaled + 99).div_euclid(100)
            } else {
                scaled.div_euclid(100)
            };
            i32::try_from(value)
                .map_err(|_| Error::validation(format!("scaled value of {s:?} overflows")))
        }
    }
}
