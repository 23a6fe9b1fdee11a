//! Monte-Carlo scenario generation and aggregation.

use crate::domain::{
    Distribution, Percentiles, Sensitivity, Signal, SolveResult, VariableKey, VariableKind,
    VariableSnapshot,
};
use crate::frame::GroupFrame;
use rand::Rng;

/// Perturbed scenarios plus the keys that were actually varied.
#[derive(Debug, Clone)]
pub struct ScenarioSet {
    pub scenarios: Vec<VariableSnapshot>,
    pub varied: Vec<VariableKey>,
}

/// Draw `n` scenarios jittered uniformly within ±jitter of `base`.
///
/// Flags and variables without a jitter entry are held fixed. Jittered
/// values are clamped to the variable's registry bounds.
pub fn perturb<R: Rng + ?Sized>(
    base: &VariableSnapshot,
    frame: &GroupFrame,
    n: usize,
    rng: &mut R,
) -> ScenarioSet {
    let varied: Vec<(VariableKey, f64)> = frame
        .jitter
        .iter()
        .filter(|(key, half_width)| {
            **half_width > 0.0
                && base.get(key).is_some()
                && frame
                    .variables
                    .get(key)
                    .map_or(true, |meta| meta.kind == VariableKind::Number)
        })
        .map(|(k, w)| (k.clone(), *w))
        .collect();

    let scenarios = (0..n)
        .map(|_| {
            varied.iter().fold(base.clone(), |snap, (key, half_width)| {
                let centre = base.get_f64(key).unwrap_or(0.0);
                let drawn = centre + rng.gen_range(-*half_width..=*half_width);
                let bounded = frame
                    .variables
                    .get(key)
                    .map_or(drawn, |meta| meta.clamp(drawn));
                snap.with_value(key, bounded)
            })
        })
        .collect();

    ScenarioSet {
        scenarios,
        varied: varied.into_iter().map(|(k, _)| k).collect(),
    }
}

/// Aggregate per-scenario results into a distribution.
///
/// `results[i]` must be the solve of `set.scenarios[i]`. Only feasible
/// results contribute to percentiles, mean and sensitivity.
pub fn aggregate(set: &ScenarioSet, results: &[SolveResult], top_k: usize) -> Distribution {
    let feasible: Vec<usize> = results
        .iter()
        .enumerate()
        .filter(|(_, r)| r.is_feasible())
        .map(|(i, _)| i)
        .collect();
    let n_scenarios = results.len();
    let n_feasible = feasible.len();

    let profits: Vec<f64> = feasible.iter().map(|&i| results[i].profit).collect();
    let mut sorted = profits.clone();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let percentiles = Percentiles {
        p5: percentile(&sorted, 0.05),
        p25: percentile(&sorted, 0.25),
        p50: percentile(&sorted, 0.50),
        p75: percentile(&sorted, 0.75),
        p95: percentile(&sorted, 0.95),
    };
    let mean = if profits.is_empty() {
        0.0
    } else {
        profits.iter().sum::<f64>() / profits.len() as f64
    };

    let mut sensitivity: Vec<Sensitivity> = set
        .varied
        .iter()
        .filter_map(|key| {
            let xs: Vec<f64> = feasible
                .iter()
                .filter_map(|&i| set.scenarios.get(i).and_then(|s| s.get_f64(key)))
                .collect();
            if xs.len() != profits.len() {
                return None;
            }
            pearson(&xs, &profits).map(|correlation| Sensitivity {
                variable: key.clone(),
                correlation,
            })
        })
        .collect();
    sensitivity.sort_by(|a, b| {
        b.correlation
            .abs()
            .partial_cmp(&a.correlation.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.variable.cmp(&b.variable))
    });
    sensitivity.truncate(top_k);

    Distribution {
        n_scenarios,
        n_feasible,
        signal: classify_signal(n_scenarios, n_feasible, &percentiles, mean),
        percentiles,
        mean,
        sensitivity,
    }
}

/// Percentile by linear interpolation between closest ranks. `sorted` must
/// be ascending; an empty slice yields 0.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Pearson correlation; `None` when either side has zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> Option<f64> {
    let n = xs.len();
    if n < 2 || n != ys.len() {
        return None;
    }
    let mean_x = xs.iter().sum::<f64>() / n as f64;
    let mean_y = ys.iter().sum::<f64>() / n as f64;
    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= f64::EPSILON || var_y <= f64::EPSILON {
        return None;
    }
    Some(cov / (var_x.sqrt() * var_y.sqrt()))
}

pub fn classify_signal(n_scenarios: usize, n_feasible: usize, p: &Percentiles, mean: f64) -> Signal {
    if n_scenarios == 0 || n_feasible * 2 < n_scenarios {
        return Signal::NoGo;
    }
    if p.p5 > 0.0 {
        Signal::StrongGo
    } else if p.p25 > 0.0 {
        Signal::Go
    } else if p.p50 > 0.0 && mean > 0.0 {
        Signal::Cautious
    } else if p.p50 > 0.0 {
        Signal::Weak
    } else {
        Signal::NoGo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ProductGroup, SolveStatus};
    use crate::frame::FrameRegistry;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn result(profit: f64) -> SolveResult {
        SolveResult {
            status: SolveStatus::Optimal,
            profit,
            tons: 0.0,
            roi: 0.0,
            cost: 0.0,
            route_tons: vec![],
            route_margins: vec![],
            route_profits: vec![],
        }
    }

    #[test]
    fn test_percentile_interpolates() {
        let sorted = [0.0, 10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&sorted, 0.5), 20.0);
        assert_eq!(percentile(&sorted, 0.25), 10.0);
        assert!((percentile(&sorted, 0.05) - 2.0).abs() < 1e-9);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_pearson_perfect_and_degenerate() {
        let xs = [1.0, 2.0, 3.0, 4.0];
        let ys = [10.0, 20.0, 30.0, 40.0];
        assert!((pearson(&xs, &ys).unwrap() - 1.0).abs() < 1e-12);
        let inv = [40.0, 30.0, 20.0, 10.0];
        assert!((pearson(&xs, &inv).unwrap() + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_none());
    }

    #[test]
    fn test_signal_ladder() {
        let p = |p5, p25, p50| Percentiles { p5, p25, p50, p75: 0.0, p95: 0.0 };
        assert_eq!(classify_signal(10, 10, &p(1.0, 2.0, 3.0), 3.0), Signal::StrongGo);
        assert_eq!(classify_signal(10, 10, &p(-1.0, 2.0, 3.0), 3.0), Signal::Go);
        assert_eq!(classify_signal(10, 10, &p(-5.0, -1.0, 3.0), 1.0), Signal::Cautious);
        assert_eq!(classify_signal(10, 10, &p(-5.0, -1.0, 3.0), -2.0), Signal::Weak);
        assert_eq!(classify_signal(10, 10, &p(-5.0, -3.0, -1.0), -2.0), Signal::NoGo);
        assert_eq!(classify_signal(10, 4, &p(1.0, 2.0, 3.0), 3.0), Signal::NoGo);
    }

    #[test]
    fn test_perturb_respects_bounds_and_flags() {
        let frames = FrameRegistry::default_frames();
        let frame = frames.get(ProductGroup::AmmoniaDomestic).unwrap();
        let base = frame.default_snapshot().with_value(&VariableKey::new("river_stage"), 0.5);
        let mut rng = StdRng::seed_from_u64(7);
        let set = perturb(&base, frame, 200, &mut rng);
        assert_eq!(set.scenarios.len(), 200);
        assert!(!set.varied.contains(&VariableKey::new("stl_outage")));
        for s in &set.scenarios {
            let stage = s.get_f64(&VariableKey::new("river_stage")).unwrap();
            assert!((0.0..=2.5).contains(&stage));
            assert_eq!(s.get_f64(&VariableKey::new("stl_outage")), Some(0.0));
        }
    }

    #[test]
    fn test_aggregate_sensitivity_sorted_by_abs_correlation() {
        let snaps: Vec<VariableSnapshot> = (0..20)
            .map(|i| {
                let x = i as f64;
                VariableSnapshot::from_pairs(
                    [("a", x), ("b", (i % 3) as f64), ("c", -x)],
                    crate::domain::TimeMs::new(0),
                )
            })
            .collect();
        let results: Vec<SolveResult> = (0..20).map(|i| result(100.0 + 5.0 * i as f64)).collect();
        let set = ScenarioSet {
            scenarios: snaps,
            varied: vec![VariableKey::new("b"), VariableKey::new("c"), VariableKey::new("a")],
        };
        let dist = aggregate(&set, &results, 2);
        assert_eq!(dist.n_feasible, 20);
        assert_eq!(dist.signal, Signal::StrongGo);
        assert_eq!(dist.sensitivity.len(), 2);
        assert!(dist.sensitivity[0].correlation.abs() >= dist.sensitivity[1].correlation.abs());
        assert!(dist.sensitivity.iter().all(|s| s.variable.as_str() != "b"));
    }

    #[test]
    fn test_aggregate_ignores_infeasible() {
        let set = ScenarioSet {
            scenarios: vec![VariableSnapshot::default(); 4],
            varied: vec![],
        };
        let results = vec![result(10.0), SolveResult::infeasible(), result(30.0), SolveResult::infeasible()];
        let dist = aggregate(&set, &results, 5);
        assert_eq!(dist.n_scenarios, 4);
        assert_eq!(dist.n_feasible, 2);
        assert_eq!(dist.mean, 20.0);
        assert_eq!(dist.signal, Signal::StrongGo);
    }
}
