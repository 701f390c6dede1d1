//! A deterministic regression backend for the oracle traits.
//!
//! [`RegressionBackend`] represents genotype probabilities by their expected
//! dosage (observed calls shrunk by the genotyping error probability, missing
//! calls and off-marker probes filled by linear interpolation in map
//! distance), scores positions with single-predictor regression on dosage,
//! and re-estimates maps by counting recombinant calls between adjacent
//! markers. It is exact for two-class (backcross-style) calls and a serviceable
//! approximation otherwise; heavier model-based backends plug in through the
//! same traits.

use ndarray::Array2;

use crate::genotype::{GenotypeMatrix, Population};
use crate::map::{LinkageGroup, MapPos};
use crate::numeric::{interp1d, MapFunction};
use crate::oracle::{
    ChromGrid, GenoprobOracle, GenotypeProbs, GridSpec, MapEstimate, MapEstimator, OracleError,
    ScanOracle, ScanPoint, ScanResult,
};

/// Two probe positions closer than this collapse into one.
const PROBE_TOL: MapPos = 1e-6;

/// Guard for zero residual variance in the regression.
const VAR_EPS: f64 = 1e-12;

#[derive(Debug, Clone)]
pub struct RegressionBackend {
    pub map_function: MapFunction,
    pub error_prob: f64,
}

impl RegressionBackend {
    pub fn new(map_function: MapFunction, error_prob: f64) -> Self {
        Self {
            map_function,
            error_prob,
        }
    }
}

impl Default for RegressionBackend {
    fn default() -> Self {
        Self::new(MapFunction::default(), 1e-4)
    }
}

/// Build the probe grid for one chromosome: every marker, plus interpolation
/// probes every `step` centiMorgans (when `step > 0`), extended `off_end`
/// past the terminal markers.
fn build_grid(
    chrom: &str,
    group: &LinkageGroup,
    step: MapPos,
    off_end: MapPos,
) -> (Vec<MapPos>, Vec<String>) {
    let mut positions: Vec<MapPos> = group.positions();
    let mut labels: Vec<String> = group.names().map(|n| n.to_string()).collect();

    if step > 0.0 && !positions.is_empty() {
        let first = positions[0] - off_end;
        let last = positions[positions.len() - 1] + off_end;
        let mut probe = first;
        while probe <= last + PROBE_TOL {
            let occupied = positions.iter().any(|&p| (p - probe).abs() < PROBE_TOL);
            if !occupied {
                positions.push(probe);
                labels.push(format!("{}.loc{}", chrom, probe));
            }
            probe += step;
        }
        // markers first, probes appended: restore scan order
        let mut order: Vec<usize> = (0..positions.len()).collect();
        order.sort_by(|&a, &b| positions[a].partial_cmp(&positions[b]).unwrap());
        positions = order.iter().map(|&i| positions[i]).collect();
        labels = order.iter().map(|&i| labels[i].clone()).collect();
    }

    (positions, labels)
}

impl GenoprobOracle for RegressionBackend {
    fn genoprob(
        &self,
        population: &Population,
        grid: &GridSpec,
    ) -> Result<GenotypeProbs, OracleError> {
        let genotypes = population.genotypes();
        let n_ind = genotypes.n_individuals();
        let mut out = genomap::GenomeMap::new();

        for (chrom, group) in population.map().iter() {
            let marker_positions = group.positions();
            let names: Vec<&str> = group.names().collect();

            // smoothed per-marker dosage columns; the column mean stands in
            // for missing calls when an individual has no data at all
            let mut columns: Vec<Vec<Option<f64>>> = Vec::with_capacity(names.len());
            let mut means: Vec<f64> = Vec::with_capacity(names.len());
            for name in &names {
                let calls = genotypes
                    .column(name)
                    .map_err(|_| OracleError::MissingColumn(name.to_string()))?;
                let observed: Vec<f64> = calls.iter().flatten().map(|&c| c as f64).collect();
                let mean = if observed.is_empty() {
                    0.5
                } else {
                    observed.iter().sum::<f64>() / observed.len() as f64
                };
                let column: Vec<Option<f64>> = calls
                    .iter()
                    .map(|call| {
                        call.map(|c| (1.0 - grid.error_prob) * c as f64 + grid.error_prob * mean)
                    })
                    .collect();
                means.push(mean);
                columns.push(column);
            }

            let (positions, labels) = build_grid(chrom, group, grid.step, grid.off_end);
            let mut dosage = Array2::<f64>::zeros((n_ind, positions.len()));

            for ind in 0..n_ind {
                let mut known_x: Vec<MapPos> = Vec::new();
                let mut known_y: Vec<f64> = Vec::new();
                for (j, column) in columns.iter().enumerate() {
                    if let Some(value) = column[ind] {
                        known_x.push(marker_positions[j]);
                        known_y.push(value);
                    }
                }
                for (k, &probe) in positions.iter().enumerate() {
                    let value = if known_x.is_empty() {
                        interp1d(&marker_positions, &means, probe).unwrap_or(0.5)
                    } else {
                        interp1d(&known_x, &known_y, probe)
                            .unwrap_or_else(|| known_y[known_y.len() - 1])
                    };
                    dosage[[ind, k]] = value;
                }
            }

            out.insert(
                chrom,
                ChromGrid {
                    positions,
                    labels,
                    dosage,
                },
            )
            .map_err(|err| OracleError::Grid(err.to_string()))?;
        }

        Ok(GenotypeProbs {
            grid: out,
            step: grid.step,
        })
    }
}

impl ScanOracle for RegressionBackend {
    fn scan(
        &self,
        population: &Population,
        phenotypes: &Array2<f64>,
    ) -> Result<ScanResult, OracleError> {
        let probs = population
            .genoprobs()
            .ok_or(OracleError::GenoprobsMissing)?;
        let n_ind = population.individuals().len();
        if phenotypes.nrows() != n_ind {
            return Err(OracleError::PhenotypeShape(phenotypes.nrows(), n_ind));
        }
        let n = n_ind as f64;
        let n_pheno = phenotypes.ncols();

        // null-model sums of squares, one per phenotype column
        let means: Vec<f64> = (0..n_pheno)
            .map(|k| phenotypes.column(k).sum() / n)
            .collect();
        let rss0: Vec<f64> = (0..n_pheno)
            .map(|k| {
                phenotypes
                    .column(k)
                    .iter()
                    .map(|y| (y - means[k]).powi(2))
                    .sum()
            })
            .collect();

        let mut points = Vec::new();
        for (chrom, grid) in probs.grid.iter() {
            for (j, &pos) in grid.positions.iter().enumerate() {
                let g = grid.dosage.column(j);
                let g_mean = g.sum() / n;
                let sxx: f64 = g.iter().map(|x| (x - g_mean).powi(2)).sum();

                let mut stats = Vec::with_capacity(n_pheno);
                for k in 0..n_pheno {
                    if sxx < VAR_EPS || rss0[k] < VAR_EPS {
                        stats.push(0.0);
                        continue;
                    }
                    let sxy: f64 = g
                        .iter()
                        .zip(phenotypes.column(k).iter())
                        .map(|(x, y)| (x - g_mean) * (y - means[k]))
                        .sum();
                    let rss1 = rss0[k] - sxy * sxy / sxx;
                    if rss1 < VAR_EPS {
                        // perfect fit: the likelihood ratio is unbounded
                        stats.push(f64::INFINITY);
                    } else {
                        stats.push(n / 2.0 * (rss0[k] / rss1).log10());
                    }
                }
                points.push(ScanPoint {
                    chrom: chrom.clone(),
                    pos,
                    stats,
                });
            }
        }

        Ok(ScanResult { points })
    }
}

impl MapEstimator for RegressionBackend {
    fn estimate(
        &self,
        genotypes: &GenotypeMatrix,
        order: &[String],
    ) -> Result<MapEstimate, OracleError> {
        let mut rf = Vec::with_capacity(order.len().saturating_sub(1));
        let mut distances = Vec::with_capacity(order.len().saturating_sub(1));
        let mut total_len = 0.0;

        for pair in order.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            let mismatch = genotypes
                .rec_frac(a, b)
                .map_err(|_| OracleError::NotEstimable(a.clone(), b.clone()))?
                .ok_or_else(|| OracleError::NotEstimable(a.clone(), b.clone()))?;
            // a genotyping error on either call also produces a mismatch;
            // correct the observed rate before converting to distance
            let frac =
                ((mismatch - 2.0 * self.error_prob) / (1.0 - 4.0 * self.error_prob)).max(0.0);
            if frac >= 0.5 {
                return Err(OracleError::NonConverged(format!(
                    "recombination fraction {:.3} between '{}' and '{}' is at or above 0.5",
                    frac, a, b
                )));
            }
            let dist = self.map_function.to_dist(frac);
            if !dist.is_finite() {
                return Err(OracleError::NonConverged(format!(
                    "non-finite distance between '{}' and '{}'",
                    a, b
                )));
            }
            rf.push(frac);
            distances.push(dist);
            total_len += dist;
        }

        Ok(MapEstimate {
            rf,
            distances,
            total_len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::sim;
    use crate::map::tests::grid_map;
    use crate::numeric::assert_float_eq;
    use ndarray::Array2;

    fn prepared_population(n_ind: usize, seed: u64, grid: &GridSpec) -> Population {
        let map = grid_map(&["1", "2"], 11, 10.0);
        let geno = sim::backcross(&map, n_ind, seed);
        let mut pop = Population::new(map, geno).unwrap();
        pop.compute_genoprobs(&RegressionBackend::default(), grid)
            .unwrap();
        pop
    }

    #[test]
    fn test_grid_markers_only() {
        let pop = prepared_population(20, 1, &GridSpec::markers_only());
        let probs = pop.genoprobs().unwrap();
        let grid = probs.grid.get("1").unwrap();
        assert_eq!(grid.positions.len(), 11);
        assert_eq!(grid.labels[0], "1_0");
        assert_eq!(grid.positions, pop.map().group("1").unwrap().positions());
    }

    #[test]
    fn test_grid_with_step_keeps_markers() {
        let spec = GridSpec::markers_only().with_step(2.5);
        let pop = prepared_population(20, 1, &spec);
        let probs = pop.genoprobs().unwrap();
        let grid = probs.grid.get("1").unwrap();
        // probes between markers, markers retained
        assert!(grid.positions.len() > 11);
        for pos in pop.map().group("1").unwrap().positions() {
            assert!(grid.positions.iter().any(|&p| (p - pos).abs() < 1e-9));
        }
        for pair in grid.positions.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(grid.labels.iter().any(|l| l.starts_with("1.loc")));
    }

    #[test]
    fn test_dosage_interpolates_missing() {
        let map = grid_map(&["1"], 3, 10.0);
        let mut geno = sim::backcross(&map, 4, 9);
        // individual 0: flanking calls 0 and 1, middle missing
        geno.set_call(0, "1_0", Some(0)).unwrap();
        geno.set_call(0, "1_1", None).unwrap();
        geno.set_call(0, "1_2", Some(1)).unwrap();
        let mut pop = Population::new(map, geno).unwrap();
        let backend = RegressionBackend::new(MapFunction::Haldane, 0.0);
        let grid = GridSpec {
            error_prob: 0.0,
            ..GridSpec::markers_only()
        };
        pop.compute_genoprobs(&backend, &grid).unwrap();
        let grid = pop.genoprobs().unwrap().grid.get("1").unwrap();
        assert_float_eq(grid.dosage[[0, 0]], 0.0, 1e-9);
        assert_float_eq(grid.dosage[[0, 1]], 0.5, 1e-9);
        assert_float_eq(grid.dosage[[0, 2]], 1.0, 1e-9);
    }

    #[test]
    fn test_scan_finds_planted_marker() {
        let pop = prepared_population(60, 3, &GridSpec::markers_only());
        // phenotype = the calls at marker 1_5 (position 50 on chromosome 1)
        let calls = pop.genotypes().column("1_5").unwrap().to_vec();
        let phenos = Array2::from_shape_fn((pop.individuals().len(), 1), |(i, _)| {
            calls[i].map(|c| c as f64).unwrap_or(0.5)
        });
        let backend = RegressionBackend::default();
        let scan = backend.scan(&pop, &phenos).unwrap();
        let (_, point) = scan.argmax(0).unwrap();
        assert_eq!(point.chrom, "1");
        assert_float_eq(point.pos, 50.0, 1e-9);
        assert!(point.stats[0].is_infinite());
    }

    #[test]
    fn test_scan_requires_genoprobs() {
        let map = grid_map(&["1"], 3, 10.0);
        let geno = sim::backcross(&map, 10, 4);
        let pop = Population::new(map, geno).unwrap();
        let phenos = Array2::zeros((10, 1));
        let result = RegressionBackend::default().scan(&pop, &phenos);
        assert!(matches!(result, Err(OracleError::GenoprobsMissing)));
    }

    #[test]
    fn test_estimate_prefers_true_order() {
        let map = grid_map(&["1"], 6, 10.0);
        let geno = sim::backcross(&map, 200, 11);
        let backend = RegressionBackend::default();

        let true_order: Vec<String> = map.group("1").unwrap().names().map(String::from).collect();
        let mut scrambled = true_order.clone();
        scrambled.swap(1, 4);

        let est_true = backend.estimate(&geno, &true_order).unwrap();
        let est_scrambled = backend.estimate(&geno, &scrambled).unwrap();
        assert_eq!(est_true.distances.len(), 5);
        assert!(est_true.total_len < est_scrambled.total_len);
    }

    #[test]
    fn test_estimate_not_estimable() {
        let map = grid_map(&["1"], 3, 10.0);
        let mut geno = sim::backcross(&map, 5, 2);
        for ind in 0..5 {
            geno.set_call(ind, "1_1", None).unwrap();
        }
        let order: Vec<String> = map.group("1").unwrap().names().map(String::from).collect();
        let result = RegressionBackend::default().estimate(&geno, &order);
        assert!(matches!(result, Err(OracleError::NotEstimable(_, _))));
    }
}
