//! Jittered interval helper shared by the grouper flush loop, the HTTP/OTel exporter
//! flush loop, and the pipeline reload loop (spec §4.6.3, §4.6.4, §4.7).

use std::time::Duration;

use rand::Rng;

/// Returns `interval` perturbed by up to ±10%, so that many identically configured nodes
/// started at the same instant don't all wake on the same tick.
pub fn jittered(interval: Duration) -> Duration {
    let base = interval.as_secs_f64();
    if base <= 0.0 {
        return Duration::ZERO;
    }
    let factor = rand::thread_rng().gen_range(0.9..1.1);
    Duration::from_secs_f64(base * factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stays_within_ten_percent() {
        let base = Duration::from_secs(100);
        for _ in 0..100 {
            let j = jittered(base);
            assert!(j.as_secs_f64() >= 89.9 && j.as_secs_f64() <= 110.1);
        }
    }

    #[test]
    fn zero_interval_stays_zero() {
        assert_eq!(jittered(Duration::ZERO), Duration::ZERO);
    }
}
