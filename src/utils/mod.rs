pub mod parallelism;

/// Numerically stable `ln(sum(exp(values)))`. Returns negative infinity for
/// an empty slice or when every value is negative infinity.
pub fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    if max == f64::NEG_INFINITY {
        return max;
    }

    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}
