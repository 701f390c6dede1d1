//! Coarse-to-fine placement of unmapped markers.
//!
//! A query marker's genotype calls are treated as a phenotype and scanned
//! against the map: first genome-wide over a thinned marker subset to find
//! the right chromosome, then at fine resolution on that chromosome alone to
//! refine the position. All queries share one coarse scan, and queries that
//! coarse-localize to the same chromosome share one fine scan.

use indexmap::IndexMap;
use log::warn;
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;

use crate::genotype::{GenotypeMatrix, IdCheck, Population};
use crate::map::{LinkMapError, MapPos};
use crate::numeric::MapFunction;
use crate::oracle::{GenoprobOracle, GridSpec, ScanOracle, ScanResult};
use crate::sampler::{pick_subset, SubsetConfig};

/// The conventional LOD-drop threshold for support intervals.
pub const DEFAULT_LOD_DROP: f64 = 1.5;

/// Tolerance when checking that the fine peak dominates the coarse one.
const STAT_TOL: f64 = 1e-9;

/// Parameters for [`infer_positions`].
#[derive(Debug, Clone)]
pub struct InferConfig {
    /// Thinning applied to the map for the coarse genome-wide phase.
    pub subset: SubsetConfig,
    /// Genotyping error probability passed to the genotype-probability
    /// oracle in both phases.
    pub error_prob: f64,
    pub map_function: MapFunction,
    /// How far the fine-phase probe grid extends past terminal markers.
    pub off_end: MapPos,
    /// Probe spacing of the fine phase, in centiMorgans.
    pub fine_step: MapPos,
    /// Compute a LOD-drop support interval with this threshold.
    pub lod_drop: Option<f64>,
    /// Widen interval bounds outward to the nearest marker positions.
    pub ci_at_markers: bool,
    /// Perturb query calls uniformly by up to this much, keeping statistics
    /// finite for perfectly separable markers. A precision trade-off, not a
    /// correctness fix.
    pub jitter: Option<f64>,
    pub seed: u64,
}

impl Default for InferConfig {
    fn default() -> Self {
        Self {
            subset: SubsetConfig::default(),
            error_prob: 1e-4,
            map_function: MapFunction::default(),
            off_end: 0.0,
            fine_step: 0.1,
            lod_drop: None,
            ci_at_markers: false,
            jitter: None,
            seed: 0,
        }
    }
}

/// A LOD-drop support interval around an inferred position.
#[derive(Debug, Clone, Serialize)]
pub struct ConfidenceInterval {
    pub low: MapPos,
    pub high: MapPos,
}

/// The placement of one query marker; the terminal output artifact.
#[derive(Debug, Clone, Serialize)]
pub struct InferredPosition {
    pub marker: String,
    pub chrom: String,
    pub pos: MapPos,
    pub stat: f64,
    pub ci: Option<ConfidenceInterval>,
}

/// Encode query calls as phenotype columns: calls as floats, missing calls
/// imputed with the column mean, optional seeded jitter on every value.
fn encode_phenotypes(
    queries: &GenotypeMatrix,
    jitter: Option<f64>,
    seed: u64,
) -> Array2<f64> {
    let n_ind = queries.n_individuals();
    let n_q = queries.n_markers();
    let mut phenos = Array2::<f64>::zeros((n_ind, n_q));
    for (k, name) in queries.markers().iter().enumerate() {
        let column = queries.column(name).expect("marker names come from queries");
        let observed: Vec<f64> = column.iter().flatten().map(|&c| c as f64).collect();
        let mean = if observed.is_empty() {
            0.5
        } else {
            observed.iter().sum::<f64>() / observed.len() as f64
        };
        for (i, call) in column.iter().enumerate() {
            phenos[[i, k]] = call.map(|c| c as f64).unwrap_or(mean);
        }
    }
    if let Some(amount) = jitter {
        let mut rng = StdRng::seed_from_u64(seed);
        for value in phenos.iter_mut() {
            *value += rng.gen_range(-amount..=amount);
        }
    }
    phenos
}

/// The LOD-drop interval around `peak_idx` in a single-chromosome scan:
/// the closest scanned positions on either side where the statistic has
/// dropped `drop` below the peak, clamped to the scan ends.
fn lod_drop_interval(
    scan: &ScanResult,
    column: usize,
    peak_idx: usize,
    drop: f64,
    marker_positions: Option<&[MapPos]>,
) -> ConfidenceInterval {
    let peak_stat = scan.points[peak_idx].stats[column];
    let threshold = peak_stat - drop;

    let mut low = scan.points[0].pos;
    for i in (0..peak_idx).rev() {
        if scan.points[i].stats[column] < threshold {
            low = scan.points[i].pos;
            break;
        }
    }
    let mut high = scan.points[scan.points.len() - 1].pos;
    for point in &scan.points[peak_idx + 1..] {
        if point.stats[column] < threshold {
            high = point.pos;
            break;
        }
    }

    if let Some(positions) = marker_positions {
        // widen outward to flanking marker positions
        low = positions
            .iter()
            .copied()
            .filter(|&p| p <= low + STAT_TOL)
            .last()
            .unwrap_or_else(|| positions.first().copied().unwrap_or(low));
        high = positions
            .iter()
            .copied()
            .find(|&p| p >= high - STAT_TOL)
            .unwrap_or_else(|| positions.last().copied().unwrap_or(high));
    }

    // a peak off the marker grid must still be bracketed
    let peak_pos = scan.points[peak_idx].pos;
    ConfidenceInterval {
        low: low.min(peak_pos),
        high: high.max(peak_pos),
    }
}

/// Place query markers on a population's map.
///
/// The population must already have genotype probabilities computed (see
/// [`Population::compute_genoprobs`]); query individual IDs must match the
/// population's — a different order is tolerated with a warning, different
/// membership is fatal. Queries are scanned together: one coarse genome-wide
/// scan for the whole batch, then one fine scan per distinct coarse
/// chromosome. Results come back in query order.
pub fn infer_positions<G, S>(
    population: &Population,
    queries: &GenotypeMatrix,
    genoprob_oracle: &G,
    scan_oracle: &S,
    config: &InferConfig,
) -> Result<Vec<InferredPosition>, LinkMapError>
where
    G: GenoprobOracle,
    S: ScanOracle,
{
    if population.genoprobs().is_none() {
        return Err(LinkMapError::GenoprobsNotComputed);
    }

    let reordered;
    let queries = match queries.check_ids(population.individuals()) {
        IdCheck::Identical => queries,
        IdCheck::Reordered => {
            warn!("query individuals are ordered differently from the population; reordering");
            reordered = queries.reorder_individuals(population.individuals())?;
            &reordered
        }
        IdCheck::Mismatched => return Err(LinkMapError::IdMismatch),
    };

    // coarse phase: thinned map, probes at markers only
    let subset = pick_subset(population.map(), population.genotypes(), &config.subset)?;
    let coarse_map = population.map().retain_markers(&subset.all_names())?;
    let mut coarse_pop = Population::new(coarse_map, population.genotypes().clone())?;
    let coarse_grid = GridSpec {
        step: 0.0,
        error_prob: config.error_prob,
        map_function: config.map_function,
        off_end: 0.0,
    };
    coarse_pop.compute_genoprobs(genoprob_oracle, &coarse_grid)?;

    let phenos = encode_phenotypes(queries, config.jitter, config.seed);
    let coarse_scan = scan_oracle.scan(&coarse_pop, &phenos)?;

    let n_q = queries.n_markers();
    let mut coarse_chrom: Vec<String> = Vec::with_capacity(n_q);
    let mut coarse_stat: Vec<f64> = Vec::with_capacity(n_q);
    for k in 0..n_q {
        let (_, point) = coarse_scan.argmax(k).ok_or(LinkMapError::EmptyMap)?;
        coarse_chrom.push(point.chrom.clone());
        coarse_stat.push(point.stats[k]);
    }

    // group queries by coarse chromosome so each chromosome is scanned once
    let mut by_chrom: IndexMap<String, Vec<usize>> = IndexMap::new();
    for (k, chrom) in coarse_chrom.iter().enumerate() {
        by_chrom.entry(chrom.clone()).or_default().push(k);
    }

    let mut results: Vec<Option<InferredPosition>> = vec![None; n_q];
    for (chrom, members) in by_chrom {
        let fine_map = population.map().only_chrom(&chrom)?;
        let marker_positions = fine_map.group(&chrom)?.positions();
        let mut fine_pop = Population::new(fine_map, population.genotypes().clone())?;
        let fine_grid = GridSpec {
            step: config.fine_step,
            error_prob: config.error_prob,
            map_function: config.map_function,
            off_end: config.off_end,
        };
        fine_pop.compute_genoprobs(genoprob_oracle, &fine_grid)?;

        let columns = Array2::from_shape_fn((phenos.nrows(), members.len()), |(i, j)| {
            phenos[[i, members[j]]]
        });
        let fine_scan = scan_oracle.scan(&fine_pop, &columns)?;

        for (local, &k) in members.iter().enumerate() {
            let (peak_idx, point) = fine_scan.argmax(local).ok_or(LinkMapError::EmptyMap)?;
            let stat = point.stats[local];
            if stat + STAT_TOL < coarse_stat[k] {
                warn!(
                    "fine-phase statistic {:.3} for '{}' on {} fell below the coarse-phase \
                     statistic {:.3}; the fine placement is reported anyway",
                    stat,
                    queries.markers()[k],
                    chrom,
                    coarse_stat[k]
                );
            }
            let ci = config.lod_drop.map(|drop| {
                lod_drop_interval(
                    &fine_scan,
                    local,
                    peak_idx,
                    drop,
                    config.ci_at_markers.then_some(marker_positions.as_slice()),
                )
            });
            results[k] = Some(InferredPosition {
                marker: queries.markers()[k].clone(),
                chrom: chrom.clone(),
                pos: point.pos,
                stat,
                ci,
            });
        }
    }

    Ok(results
        .into_iter()
        .map(|r| r.expect("every query was assigned a chromosome"))
        .collect())
}
