use ndarray::{Array2, ArrayView1, ArrayView2, Axis};
use rand::{SeedableRng, rngs::StdRng};

/// Seeded K-Means clustering over the rows of a dense matrix.
#[derive(Debug, Clone)]
pub struct KMeans {
    pub centroids: Array2<f64>,
    pub assignments: Vec<usize>,
    pub iterations: usize,
}

impl KMeans {
    /// Runs K-Means clustering.
    ///
    /// # Arguments
    /// * `data` - Points as rows.
    /// * `k` - Number of clusters, capped at the number of points.
    /// * `max_iterations` - Maximum number of iterations.
    /// * `seed` - Seed for the initial centroid draw; the same seed gives the same result.
    #[must_use]
    pub fn fit(data: ArrayView2<'_, f64>, k: usize, max_iterations: usize, seed: u64) -> Self {
        let n = data.nrows();
        if n == 0 || k == 0 {
            return Self {
                centroids: Array2::zeros((0, data.ncols())),
                assignments: vec![],
                iterations: 0,
            };
        }

        let k = k.min(n);
        let mut rng = StdRng::seed_from_u64(seed);

        // Initialize centroids from distinct random points
        let mut initial = rand::seq::index::sample(&mut rng, n, k).into_vec();
        initial.sort_unstable();
        let mut centroids = data.select(Axis(0), &initial);

        let mut assignments = vec![usize::MAX; n];
        let mut iterations = 0;

        while iterations < max_iterations {
            iterations += 1;

            // E-step: Assign points to nearest centroid
            let mut changed = false;
            let mut distances = vec![0.0; n];
            for (i, point) in data.axis_iter(Axis(0)).enumerate() {
                let (best_cluster, best_dist) = nearest(point, centroids.view());
                distances[i] = best_dist;
                if assignments[i] != best_cluster {
                    assignments[i] = best_cluster;
                    changed = true;
                }
            }
            if !changed {
                break;
            }

            // M-step: Update centroids
            let mut sums = Array2::<f64>::zeros(centroids.raw_dim());
            let mut counts = vec![0usize; k];
            for (i, &cluster) in assignments.iter().enumerate() {
                let mut row = sums.row_mut(cluster);
                row += &data.row(i);
                counts[cluster] += 1;
            }

            for j in 0..k {
                if counts[j] > 0 {
                    let mean = &sums.row(j) / counts[j] as f64;
                    centroids.row_mut(j).assign(&mean);
                } else if let Some(far) = farthest_point(&distances) {
                    // Re-seed an empty cluster with the worst-fitting point
                    centroids.row_mut(j).assign(&data.row(far));
                    distances[far] = 0.0;
                }
            }
        }

        Self {
            centroids,
            assignments,
            iterations,
        }
    }
}

fn nearest(point: ArrayView1<'_, f64>, centroids: ArrayView2<'_, f64>) -> (usize, f64) {
    let mut min_dist_sq = f64::MAX;
    let mut best_cluster = 0;
    for (j, centroid) in centroids.axis_iter(Axis(0)).enumerate() {
        let dist_sq = distance_sq(point, centroid);
        if dist_sq < min_dist_sq {
            min_dist_sq = dist_sq;
            best_cluster = j;
        }
    }
    (best_cluster, min_dist_sq)
}

fn farthest_point(distances: &[f64]) -> Option<usize> {
    distances
        .iter()
        .enumerate()
        .filter(|(_, d)| **d > 0.0)
        .max_by(|a, b| a.1.total_cmp(b.1).then(b.0.cmp(&a.0)))
        .map(|(i, _)| i)
}

fn distance_sq(a: ArrayView1<'_, f64>, b: ArrayView1<'_, f64>) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}
