/// One graded evaluation of a subject, as grouped from import rows.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationEntry {
    pub name: String,
    pub grade: f64,
    /// Integer percentage.
    pub weight: i64,
}

pub fn round_2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Percentage-weighted final grade of a subject.
///
/// Each evaluation contributes `grade * weight / 100`. When the weights sum to
/// a positive total other than 100 the sum is rescaled onto a 100-point basis,
/// so a single evaluation at 50% with grade 10 yields 10.0, not 5.0. Weights
/// summing to zero or less leave the raw sum untouched. The result is rounded
/// to two decimals. `None` when there is nothing to grade.
pub fn weighted_final_grade(entries: &[EvaluationEntry]) -> Option<f64> {
    if entries.is_empty() {
        return None;
    }
    let mut sum = 0.0;
    let mut total_weight = 0.0;
    for e in entries {
        let weight = e.weight as f64;
        sum += e.grade * (weight / 100.0);
        total_weight += weight;
    }
    if total_weight > 0.0 && total_weight != 100.0 {
        sum = sum / total_weight * 100.0;
    }
    Some(round_2(sum))
}
