//! Runtime-sized Nelder–Mead (downhill simplex) minimization over a box.
//!
//! The hyperparameter search runs this over 1 to 4 dimensions depending on
//! which parameter flags are enabled, so the simplex dimension is a runtime
//! value. The whole optimizer state serializes, which is what makes
//! `.amoeba` resume dumps possible: a reloaded optimizer continues exactly
//! where the previous process stopped.

use serde::{Deserialize, Serialize};

use crate::error::TrainError;

const REFLECTION: f64 = 1.0;
const EXPANSION: f64 = 2.0;
const CONTRACTION: f64 = 0.5;
const SHRINK: f64 = 0.5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NelderMead {
    dimension: usize,
    lower: Vec<f64>,
    upper: Vec<f64>,
    min_simplex_size: f64,
    simplex: Vec<Vec<f64>>,
    values: Vec<f64>,
    evaluations: u32,
    rounds: u32,
}

impl NelderMead {
    pub fn new(lower: Vec<f64>, upper: Vec<f64>, min_simplex_size: f64) -> Result<Self, TrainError> {
        if lower.is_empty() || lower.len() != upper.len() {
            return Err(TrainError::AgentMisconfigured(
                "optimizer bounds must be non-empty and of equal length".into(),
            ));
        }
        if lower.iter().zip(&upper).any(|(lo, up)| lo >= up) {
            return Err(TrainError::AgentMisconfigured(
                "every lower bound must lie below its upper bound".into(),
            ));
        }
        if min_simplex_size <= 0.0 {
            return Err(TrainError::AgentMisconfigured(
                "minimal simplex size must be positive".into(),
            ));
        }
        Ok(Self {
            dimension: lower.len(),
            lower,
            upper,
            min_simplex_size,
            simplex: Vec::new(),
            values: Vec::new(),
            evaluations: 0,
            rounds: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn rounds(&self) -> u32 {
        self.rounds
    }

    pub fn evaluations(&self) -> u32 {
        self.evaluations
    }

    /// Whether a previous run already built (and evaluated) the simplex.
    pub fn is_initialized(&self) -> bool {
        self.simplex.len() == self.dimension + 1
    }

    pub fn min_value(&self) -> f64 {
        self.values.iter().copied().fold(f64::INFINITY, f64::min)
    }

    /// Vertex with the smallest cost seen so far.
    pub fn min_vertex(&self) -> &[f64] {
        let mut best = 0;
        for id in 1..self.values.len() {
            if self.values[id] < self.values[best] {
                best = id;
            }
        }
        &self.simplex[best]
    }

    /// Longest edge of the current simplex.
    pub fn simplex_size(&self) -> f64 {
        let mut size = 0.0f64;
        for a in 0..self.simplex.len() {
            for b in a + 1..self.simplex.len() {
                let dist = self.simplex[a]
                    .iter()
                    .zip(&self.simplex[b])
                    .map(|(x, y)| (x - y) * (x - y))
                    .sum::<f64>()
                    .sqrt();
                size = size.max(dist);
            }
        }
        size
    }

    fn clamp(&self, mut point: Vec<f64>) -> Vec<f64> {
        for (id, value) in point.iter_mut().enumerate() {
            *value = value.clamp(self.lower[id], self.upper[id]);
        }
        point
    }

    fn initialize<F>(&mut self, init_point: &[f64], step: f64, cost: &mut F) -> Result<(), TrainError>
    where
        F: FnMut(&[f64]) -> Result<f64, TrainError>,
    {
        if init_point.len() != self.dimension {
            return Err(TrainError::AgentMisconfigured(format!(
                "initial point has {} entries, optimizer dimension is {}",
                init_point.len(),
                self.dimension
            )));
        }

        let origin = self.clamp(init_point.to_vec());
        self.simplex.clear();
        self.values.clear();
        self.simplex.push(origin.clone());

        for axis in 0..self.dimension {
            let mut vertex = origin.clone();
            // Step away from the nearer bound so the vertex stays distinct.
            if vertex[axis] + step <= self.upper[axis] {
                vertex[axis] += step;
            } else {
                vertex[axis] -= step;
            }
            self.simplex.push(vertex);
        }

        for vertex in self.simplex.clone() {
            let value = cost(&vertex)?;
            self.evaluations += 1;
            self.values.push(value);
        }
        Ok(())
    }

    /// Minimizes `cost` until the simplex shrinks below the configured size.
    ///
    /// `on_round` fires after every completed iteration; this is where the
    /// caller dumps the optimizer and logs progress. Pass
    /// `skip_init = true` together with a loaded optimizer to continue a
    /// previous search instead of rebuilding the simplex.
    pub fn optimize<F, R>(
        &mut self,
        mut cost: F,
        init_step: f64,
        init_point: &[f64],
        skip_init: bool,
        mut on_round: R,
    ) -> Result<(), TrainError>
    where
        F: FnMut(&[f64]) -> Result<f64, TrainError>,
        R: FnMut(&NelderMead) -> Result<(), TrainError>,
    {
        if !(skip_init && self.is_initialized()) {
            self.initialize(init_point, init_step, &mut cost)?;
        }

        while self.simplex_size() > self.min_simplex_size {
            self.iterate(&mut cost)?;
            self.rounds += 1;
            on_round(self)?;
        }
        Ok(())
    }

    fn iterate<F>(&mut self, cost: &mut F) -> Result<(), TrainError>
    where
        F: FnMut(&[f64]) -> Result<f64, TrainError>,
    {
        let mut order: Vec<usize> = (0..self.values.len()).collect();
        order.sort_by(|&a, &b| self.values[a].total_cmp(&self.values[b]));
        let best = order[0];
        let worst = order[order.len() - 1];
        let second_worst = order[order.len() - 2];

        let centroid: Vec<f64> = (0..self.dimension)
            .map(|axis| {
                order[..order.len() - 1]
                    .iter()
                    .map(|&vertex| self.simplex[vertex][axis])
                    .sum::<f64>()
                    / self.dimension as f64
            })
            .collect();

        let towards = |from: &[f64], scale: f64| -> Vec<f64> {
            centroid
                .iter()
                .zip(from)
                .map(|(c, w)| c + scale * (c - w))
                .collect()
        };

        let reflected = self.clamp(towards(&self.simplex[worst], REFLECTION));
        let reflected_value = cost(&reflected)?;
        self.evaluations += 1;

        if reflected_value < self.values[best] {
            let expanded = self.clamp(towards(&self.simplex[worst], EXPANSION));
            let expanded_value = cost(&expanded)?;
            self.evaluations += 1;
            if expanded_value < reflected_value {
                self.simplex[worst] = expanded;
                self.values[worst] = expanded_value;
            } else {
                self.simplex[worst] = reflected;
                self.values[worst] = reflected_value;
            }
            return Ok(());
        }

        if reflected_value < self.values[second_worst] {
            self.simplex[worst] = reflected;
            self.values[worst] = reflected_value;
            return Ok(());
        }

        // Contract toward the better of the reflected and worst points.
        let contracted = if reflected_value < self.values[worst] {
            self.clamp(towards(&self.simplex[worst], CONTRACTION))
        } else {
            let worst_vertex = &self.simplex[worst];
            self.clamp(
                centroid
                    .iter()
                    .zip(worst_vertex)
                    .map(|(c, w)| c + CONTRACTION * (w - c))
                    .collect(),
            )
        };
        let contracted_value = cost(&contracted)?;
        self.evaluations += 1;

        if contracted_value < self.values[worst].min(reflected_value) {
            self.simplex[worst] = contracted;
            self.values[worst] = contracted_value;
            return Ok(());
        }

        // Shrink everything toward the best vertex.
        let best_vertex = self.simplex[best].clone();
        for vertex in 0..self.simplex.len() {
            if vertex == best {
                continue;
            }
            let shrunk: Vec<f64> = best_vertex
                .iter()
                .zip(&self.simplex[vertex])
                .map(|(b, v)| b + SHRINK * (v - b))
                .collect();
            self.values[vertex] = cost(&shrunk)?;
            self.evaluations += 1;
            self.simplex[vertex] = shrunk;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quadratic(point: &[f64]) -> Result<f64, TrainError> {
        Ok((point[0] - 0.3).powi(2) + (point[1] + 0.2).powi(2))
    }

    #[test]
    fn test_converges_on_a_quadratic() {
        let mut optimizer =
            NelderMead::new(vec![-1.0, -1.0], vec![1.0, 1.0], 1e-6).unwrap();
        optimizer
            .optimize(quadratic, 0.1, &[0.0, 0.0], false, |_| Ok(()))
            .unwrap();

        let best = optimizer.min_vertex();
        assert!((best[0] - 0.3).abs() < 1e-3);
        assert!((best[1] + 0.2).abs() < 1e-3);
        assert!(optimizer.min_value() < 1e-6);
    }

    #[test]
    fn test_respects_bounds() {
        // Minimum of (x - 2)^2 over [0, 1] sits on the upper bound.
        let mut optimizer = NelderMead::new(vec![0.0], vec![1.0], 1e-6).unwrap();
        optimizer
            .optimize(|p| Ok((p[0] - 2.0).powi(2)), 0.1, &[0.5], false, |_| Ok(()))
            .unwrap();
        assert!((optimizer.min_vertex()[0] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_resume_continues_where_it_stopped() {
        let mut optimizer =
            NelderMead::new(vec![-1.0, -1.0], vec![1.0, 1.0], 1e-8).unwrap();

        // Stop after three rounds, as if the process had been killed.
        let paused = optimizer.optimize(quadratic, 0.1, &[0.9, 0.9], false, |me| {
            if me.rounds() >= 3 {
                Err(TrainError::Cancelled)
            } else {
                Ok(())
            }
        });
        assert!(matches!(paused, Err(TrainError::Cancelled)));

        let snapshot = bincode::serialize(&optimizer).unwrap();
        let mut resumed: NelderMead = bincode::deserialize(&snapshot).unwrap();
        resumed
            .optimize(quadratic, 0.1, &[0.9, 0.9], true, |_| Ok(()))
            .unwrap();

        let best = resumed.min_vertex();
        assert!((best[0] - 0.3).abs() < 1e-3);
        assert!((best[1] + 0.2).abs() < 1e-3);
        assert!(resumed.rounds() > 3);
    }

    #[test]
    fn test_rejects_bad_configuration() {
        assert!(NelderMead::new(vec![], vec![], 0.1).is_err());
        assert!(NelderMead::new(vec![0.0], vec![0.0], 0.1).is_err());
        assert!(NelderMead::new(vec![0.0], vec![1.0], 0.0).is_err());
    }
}
