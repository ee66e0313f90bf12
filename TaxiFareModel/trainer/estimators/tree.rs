use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::{rngs::SmallRng, seq::index::sample, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// CART regression tree minimising squared error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    /// Depth limit; unbounded when `None`.
    pub max_depth: Option<usize>,
    /// Smallest node that may still be split.
    pub min_samples_split: usize,
    /// Smallest allowed leaf.
    pub min_samples_leaf: usize,
    /// Features examined per split; all when `None`.
    pub max_features: Option<usize>,
    pub(crate) nodes: Vec<Node>,
    pub(crate) n_features: usize,
}

impl Default for RegressionTree {
    fn default() -> Self {
        Self {
            max_depth: None,
            min_samples_split: 2,
            min_samples_leaf: 1,
            max_features: None,
            nodes: Vec::new(),
            n_features: 0,
        }
    }
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    position: usize,
    score: f64,
}

struct Builder<'x, 'y, 'r> {
    x: ArrayView2<'x, f64>,
    y: ArrayView1<'y, f64>,
    rng: &'r mut SmallRng,
}

impl RegressionTree {
    /// Tree limited to `max_depth` levels.
    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth: Some(max_depth),
            ..Self::default()
        }
    }

    /// Fits on every row of `x`.
    pub fn fit(&mut self, x: ArrayView2<'_, f64>, y: ArrayView1<'_, f64>, seed: u64) -> Result<()> {
        let rows: Vec<usize> = (0..x.nrows()).collect();
        let mut rng = SmallRng::seed_from_u64(seed);
        self.fit_rows(x, y, &rows, &mut rng)
    }

    /// Fits on the listed rows; repeated indices act as sample weights.
    pub fn fit_rows(
        &mut self,
        x: ArrayView2<'_, f64>,
        y: ArrayView1<'_, f64>,
        rows: &[usize],
        rng: &mut SmallRng,
    ) -> Result<()> {
        super::check_xy(x, y)?;
        if rows.is_empty() {
            return Err(TrainerError::EmptyInput("regression tree"));
        }
        self.nodes.clear();
        self.n_features = x.ncols();
        let mut builder = Builder { x, y, rng };
        let mut indices = rows.to_vec();
        self.grow(&mut builder, &mut indices, 0);
        Ok(())
    }

    fn push(&mut self, node: Node) -> usize {
        self.nodes.push(node);
        self.nodes.len() - 1
    }

    fn grow(&mut self, builder: &mut Builder<'_, '_, '_>, rows: &mut [usize], depth: usize) -> usize {
        let n = rows.len();
        let mean = rows.iter().map(|&row| builder.y[row]).sum::<f64>() / n as f64;
        let depth_reached = self.max_depth.is_some_and(|limit| depth >= limit);
        if depth_reached || n < self.min_samples_split.max(2) || n < 2 * self.min_samples_leaf {
            return self.push(Node::Leaf { value: mean });
        }
        let Some(best) = self.best_split(builder, rows) else {
            return self.push(Node::Leaf { value: mean });
        };

        let x = builder.x;
        rows.sort_unstable_by(|a, b| x[[*a, best.feature]].total_cmp(&x[[*b, best.feature]]));
        let slot = self.push(Node::Leaf { value: mean });
        let (left_rows, right_rows) = rows.split_at_mut(best.position);
        let left = self.grow(builder, left_rows, depth + 1);
        let right = self.grow(builder, right_rows, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        slot
    }

    fn best_split(&self, builder: &mut Builder<'_, '_, '_>, rows: &[usize]) -> Option<BestSplit> {
        let n_features = self.n_features;
        let wanted = self.max_features.unwrap_or(n_features).clamp(1, n_features.max(1));
        let features: Vec<usize> = if wanted < n_features {
            sample(&mut *builder.rng, n_features, wanted).into_vec()
        } else {
            (0..n_features).collect()
        };

        let n = rows.len();
        let total: f64 = rows.iter().map(|&row| builder.y[row]).sum();
        let total_sq: f64 = rows.iter().map(|&row| builder.y[row].powi(2)).sum();
        let parent_sse = total_sq - total * total / n as f64;
        let min_leaf = self.min_samples_leaf.max(1);

        let mut best: Option<BestSplit> = None;
        let mut order = rows.to_vec();
        for feature in features {
            let column = builder.x.column(feature);
            order.sort_unstable_by(|a, b| column[*a].total_cmp(&column[*b]));
            let mut left_sum = 0.0;
            let mut left_sq = 0.0;
            for position in 1..n {
                let value = builder.y[order[position - 1]];
                left_sum += value;
                left_sq += value * value;
                let (lo, hi) = (column[order[position - 1]], column[order[position]]);
                if position < min_leaf || n - position < min_leaf || hi <= lo {
                    continue;
                }
                let left_n = position as f64;
                let right_n = (n - position) as f64;
                let right_sum = total - left_sum;
                let right_sq = total_sq - left_sq;
                let sse = (left_sq - left_sum * left_sum / left_n)
                    + (right_sq - right_sum * right_sum / right_n);
                if best.as_ref().map_or(true, |current| sse < current.score) {
                    best = Some(BestSplit {
                        feature,
                        threshold: lo + (hi - lo) / 2.0,
                        position,
                        score: sse,
                    });
                }
            }
        }
        best.filter(|split| split.score < parent_sse - 1e-12 * parent_sse.abs().max(1.0))
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut node = 0;
        loop {
            match &self.nodes[node] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if row[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Predicts targets.
    pub fn predict(&self, x: ArrayView2<'_, f64>) -> Result<Array1<f64>> {
        if self.nodes.is_empty() {
            return Err(TrainerError::NotFitted("RegressionTree"));
        }
        if x.ncols() != self.n_features {
            return Err(TrainerError::shape(
                format!("{} features", self.n_features),
                format!("{} features", x.ncols()),
            ));
        }
        Ok(x.rows().into_iter().map(|row| self.predict_row(row)).collect())
    }

    /// Node count.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
