//! Derivative-free minimization for model coefficients.

use std::cmp::Ordering;

#[derive(Debug, Clone)]
pub struct NelderMeadConfig {
    /// Hard cap on simplex iterations.
    pub max_iter: usize,
    pub tolerance: f64,
    pub alpha: f64,
    pub gamma: f64,
    pub rho: f64,
    pub sigma: f64,
    pub initial_step: f64,
}

impl Default for NelderMeadConfig {
    fn default() -> Self {
        Self {
            max_iter: 50,
            tolerance: 1e-8,
            alpha: 1.0,
            gamma: 2.0,
            rho: 0.5,
            sigma: 0.5,
            initial_step: 0.1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NelderMeadResult {
    pub point: Vec<f64>,
    pub value: f64,
    pub iterations: usize,
    pub converged: bool,
}

pub fn nelder_mead<F>(objective: F, initial: &[f64], config: &NelderMeadConfig) -> NelderMeadResult
where
    F: Fn(&[f64]) -> f64,
{
    let n = initial.len();
    if n == 0 {
        return NelderMeadResult {
            point: Vec::new(),
            value: objective(initial),
            iterations: 0,
            converged: true,
        };
    }

    let mut simplex: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    simplex.push(initial.to_vec());
    for i in 0..n {
        let mut vertex = initial.to_vec();
        vertex[i] += if initial[i].abs() > 1e-10 {
            config.initial_step * initial[i].abs()
        } else {
            config.initial_step
        };
        simplex.push(vertex);
    }
    let mut values: Vec<f64> = simplex.iter().map(|vertex| objective(vertex)).collect();

    let mut iterations = 0;
    let mut converged = false;

    while iterations < config.max_iter {
        iterations += 1;

        let mut order: Vec<usize> = (0..=n).collect();
        order.sort_by(|&a, &b| values[a].partial_cmp(&values[b]).unwrap_or(Ordering::Equal));
        let best = order[0];
        let worst = order[n];
        let second_worst = order[n - 1];

        if (values[worst] - values[best]).abs() < config.tolerance {
            converged = true;
            break;
        }

        let centroid = centroid(&simplex, worst);
        let reflected = along(&centroid, &simplex[worst], -config.alpha);
        let reflected_value = objective(&reflected);

        if reflected_value < values[best] {
            let expanded = along(&centroid, &reflected, config.gamma);
            let expanded_value = objective(&expanded);
            if expanded_value < reflected_value {
                simplex[worst] = expanded;
                values[worst] = expanded_value;
            } else {
                simplex[worst] = reflected;
                values[worst] = reflected_value;
            }
            continue;
        }

        if reflected_value < values[second_worst] {
            simplex[worst] = reflected;
            values[worst] = reflected_value;
            continue;
        }

        let (contracted, contracted_value) = if reflected_value < values[worst] {
            let point = along(&centroid, &reflected, config.rho);
            let value = objective(&point);
            (point, value)
        } else {
            let point = along(&centroid, &simplex[worst], config.rho);
            let value = objective(&point);
            (point, value)
        };

        if contracted_value < values[worst].min(reflected_value) {
            simplex[worst] = contracted;
            values[worst] = contracted_value;
            continue;
        }

        // shrink toward the best vertex
        let anchor = simplex[best].clone();
        for i in 0..=n {
            if i == best {
                continue;
            }
            simplex[i] = along(&anchor, &simplex[i], config.sigma);
            values[i] = objective(&simplex[i]);
        }
    }

    let best = values
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0);

    NelderMeadResult {
        point: simplex[best].clone(),
        value: values[best],
        iterations,
        converged,
    }
}

fn centroid(simplex: &[Vec<f64>], exclude: usize) -> Vec<f64> {
    let dims = simplex[0].len();
    let count = (simplex.len() - 1) as f64;
    let mut center = vec![0.0; dims];

    for (i, vertex) in simplex.iter().enumerate() {
        if i == exclude {
            continue;
        }
        for (c, v) in center.iter_mut().zip(vertex) {
            *c += v;
        }
    }

    center.iter_mut().for_each(|c| *c /= count);
    center
}

fn along(origin: &[f64], point: &[f64], scale: f64) -> Vec<f64> {
    origin
        .iter()
        .zip(point)
        .map(|(o, p)| o + scale * (p - o))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn finds_quadratic_minimum() {
        let config = NelderMeadConfig {
            max_iter: 500,
            ..Default::default()
        };
        let result = nelder_mead(
            |x| (x[0] - 2.0).powi(2) + (x[1] + 1.0).powi(2),
            &[0.0, 0.0],
            &config,
        );

        assert!(result.converged);
        assert_relative_eq!(result.point[0], 2.0, epsilon = 1e-3);
        assert_relative_eq!(result.point[1], -1.0, epsilon = 1e-3);
    }

    #[test]
    fn stops_at_iteration_cap() {
        let config = NelderMeadConfig {
            max_iter: 5,
            tolerance: 0.0,
            ..Default::default()
        };
        let result = nelder_mead(
            |x| (1.0 - x[0]).powi(2) + 100.0 * (x[1] - x[0].powi(2)).powi(2),
            &[-1.2, 1.0],
            &config,
        );

        assert_eq!(result.iterations, 5);
        assert!(!result.converged);
    }

    #[test]
    fn never_worse_than_start() {
        let objective = |x: &[f64]| (x[0] - 0.3).abs() + (x[1] * x[2] - 0.5).powi(2);
        let start = [0.1, 0.1, 0.1];
        let result = nelder_mead(objective, &start, &NelderMeadConfig::default());

        assert!(result.value <= objective(&start));
    }

    #[test]
    fn empty_point_evaluates_once() {
        let result = nelder_mead(|_| 4.0, &[], &NelderMeadConfig::default());
        assert!(result.point.is_empty());
        assert_eq!(result.value, 4.0);
    }
}
