use chrono::NaiveDateTime;

use crate::limits::FINE_ROUND_MINUTES;

/// Result of an overstay fine computation. Recomputed on demand; only
/// persisted (as a `FineRecord`) once payment is acknowledged.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FineAssessment {
    pub overdue_minutes: i64,
    pub rounds: u32,
    pub amount: f64,
}

/// Escalating overstay penalty.
///
/// Overdue time is counted in whole minutes and converted to rounds at one
/// round per 15 minutes, rounded to the nearest whole round (16 min → 1
/// round, 40 min → 3 rounds). The fine doubles with every round:
/// `price * 2^rounds`, zero when there are no rounds. Rounds grow without
/// cap.
///
/// The amount is rounded to 2 decimal places only when it is non-integral;
/// integral results are kept exact. Pure: same inputs, same result.
pub fn compute_fine(exit: NaiveDateTime, now: NaiveDateTime, original_price: f64) -> FineAssessment {
    let overdue_minutes = (now - exit).num_minutes().max(0);
    // round(m / 15) in integer arithmetic, half away from zero
    let rounds = ((overdue_minutes * 2 + FINE_ROUND_MINUTES) / (FINE_ROUND_MINUTES * 2)) as u32;
    let amount = if rounds == 0 {
        0.0
    } else {
        round_if_fractional(original_price * 2f64.powi(rounds as i32))
    };
    FineAssessment {
        overdue_minutes,
        rounds,
        amount,
    }
}

fn round_if_fractional(x: f64) -> f64 {
    if x.fract() == 0.0 {
        x
    } else {
        (x * 100.0).round() / 100.0
    }
}
