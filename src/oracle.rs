//! The statistical seams of the pipeline.
//!
//! The refinement and placement stages never fit models themselves; they call
//! through the three traits defined here. Any statistical backend that can
//! compute genotype probabilities, run a regression scan, and re-estimate a
//! map from genotypes can drive the pipeline. The crate ships one such
//! backend, [`crate::backend::RegressionBackend`].

use genomap::GenomeMap;
use ndarray::Array2;
use thiserror::Error;

use crate::genotype::{GenotypeMatrix, Population};
use crate::map::MapPos;
use crate::numeric::MapFunction;

#[derive(Error, Debug)]
pub enum OracleError {
    #[error("map estimate did not converge: {0}")]
    NonConverged(String),
    #[error("recombination fraction between '{0}' and '{1}' is not estimable")]
    NotEstimable(String, String),
    #[error("genotype probabilities have not been computed for this population")]
    GenoprobsMissing,
    #[error("marker '{0}' is missing from the genotype matrix")]
    MissingColumn(String),
    #[error("internal probe-grid error: {0}")]
    Grid(String),
    #[error("phenotype matrix has {0} rows but the population has {1} individuals")]
    PhenotypeShape(usize, usize),
}

/// Density and smoothing parameters for genotype-probability calculation.
#[derive(Debug, Clone)]
pub struct GridSpec {
    /// Probe spacing in centiMorgans; `0` means marker positions only.
    pub step: MapPos,
    /// Genotyping error probability used to shrink observed calls.
    pub error_prob: f64,
    /// Mapping function relating distances and recombination fractions.
    pub map_function: MapFunction,
    /// How far past the terminal markers the probe grid extends.
    pub off_end: MapPos,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            step: 0.0,
            error_prob: 1e-4,
            map_function: MapFunction::default(),
            off_end: 0.0,
        }
    }
}

impl GridSpec {
    /// A grid at marker positions only (no interpolated probes).
    pub fn markers_only() -> Self {
        Self::default()
    }

    /// The same grid with a different probe spacing.
    pub fn with_step(&self, step: MapPos) -> Self {
        Self {
            step,
            ..self.clone()
        }
    }
}

/// The probe grid and expected genotype dosages for one chromosome.
#[derive(Debug, Clone)]
pub struct ChromGrid {
    /// Probe positions in centiMorgans, non-decreasing.
    pub positions: Vec<MapPos>,
    /// Marker name at marker probes, a `<chrom>.loc<pos>` label otherwise.
    pub labels: Vec<String>,
    /// Expected genotype dosage, individuals × positions.
    pub dosage: Array2<f64>,
}

/// Per-individual expected genotype dosages over a genome-wide probe grid.
///
/// Produced by a [`GenoprobOracle`] and stored on the population; every scan
/// reads from this.
pub struct GenotypeProbs {
    pub grid: GenomeMap<ChromGrid>,
    pub step: MapPos,
}

impl GenotypeProbs {
    /// Total number of probe positions across all chromosomes.
    pub fn n_positions(&self) -> usize {
        self.grid.iter().map(|(_, g)| g.positions.len()).sum()
    }
}

/// The association statistics at one scanned position, one entry in `stats`
/// per phenotype column.
#[derive(Debug, Clone)]
pub struct ScanPoint {
    pub chrom: String,
    pub pos: MapPos,
    pub stats: Vec<f64>,
}

/// An ordered sequence of scanned positions with their statistics.
///
/// Produced fresh by each scan call; read-only once returned.
#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub points: Vec<ScanPoint>,
}

impl ScanResult {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Index and point of the maximum statistic for one phenotype column.
    ///
    /// `NaN` statistics are ignored; ties resolve to the leftmost position.
    pub fn argmax(&self, column: usize) -> Option<(usize, &ScanPoint)> {
        let mut best: Option<(usize, &ScanPoint, f64)> = None;
        for (i, point) in self.points.iter().enumerate() {
            let stat = point.stats.get(column).copied().unwrap_or(f64::NAN);
            if stat.is_nan() {
                continue;
            }
            match best {
                Some((_, _, best_stat)) if stat <= best_stat => {}
                _ => best = Some((i, point, stat)),
            }
        }
        best.map(|(i, point, _)| (i, point))
    }
}

/// An estimated map for one candidate marker order.
#[derive(Debug, Clone)]
pub struct MapEstimate {
    /// Adjacent-pair recombination fractions, `order.len() - 1` entries.
    pub rf: Vec<f64>,
    /// Adjacent-pair distances in centiMorgans.
    pub distances: Vec<MapPos>,
    /// Total map length in centiMorgans.
    pub total_len: MapPos,
}

/// Computes per-individual genotype probabilities over a probe grid.
///
/// Must be invoked (via [`Population::compute_genoprobs`]) before any scan.
pub trait GenoprobOracle {
    fn genoprob(
        &self,
        population: &Population,
        grid: &GridSpec,
    ) -> Result<GenotypeProbs, OracleError>;
}

/// Runs a regression-based association scan of phenotype columns against
/// every probe position of a population's genotype probabilities.
pub trait ScanOracle {
    /// `phenotypes` is individuals × columns, row order matching the
    /// population's individuals.
    fn scan(
        &self,
        population: &Population,
        phenotypes: &Array2<f64>,
    ) -> Result<ScanResult, OracleError>;
}

/// Re-estimates inter-marker distances for a candidate marker order.
pub trait MapEstimator {
    fn estimate(
        &self,
        genotypes: &GenotypeMatrix,
        order: &[String],
    ) -> Result<MapEstimate, OracleError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan_of(stats: &[(f64, f64)]) -> ScanResult {
        ScanResult {
            points: stats
                .iter()
                .enumerate()
                .map(|(i, &(a, b))| ScanPoint {
                    chrom: "1".to_string(),
                    pos: i as f64,
                    stats: vec![a, b],
                })
                .collect(),
        }
    }

    #[test]
    fn test_argmax_per_column() {
        let scan = scan_of(&[(1.0, 9.0), (5.0, 2.0), (3.0, 9.0)]);
        let (i, point) = scan.argmax(0).unwrap();
        assert_eq!(i, 1);
        assert_eq!(point.pos, 1.0);
        // ties resolve leftmost
        let (i, _) = scan.argmax(1).unwrap();
        assert_eq!(i, 0);
    }

    #[test]
    fn test_argmax_skips_nan_and_handles_inf() {
        let scan = scan_of(&[(f64::NAN, 1.0), (2.0, f64::INFINITY), (4.0, 0.0)]);
        let (i, _) = scan.argmax(0).unwrap();
        assert_eq!(i, 2);
        let (i, _) = scan.argmax(1).unwrap();
        assert_eq!(i, 1);
    }

    #[test]
    fn test_argmax_empty() {
        let scan = ScanResult::default();
        assert!(scan.argmax(0).is_none());
    }

    #[test]
    fn test_grid_spec_with_step() {
        let grid = GridSpec::markers_only();
        assert_eq!(grid.step, 0.0);
        let fine = grid.with_step(0.1);
        assert_eq!(fine.step, 0.1);
        assert_eq!(fine.error_prob, grid.error_prob);
    }
}
