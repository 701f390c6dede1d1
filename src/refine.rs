//! Map refinement: similarity pruning and windowed reordering.
//!
//! Both operations return a new [`GeneticMap`] and leave the input untouched.
//! [`drop_similar_markers`] removes near-duplicate markers; [`ripple`] is a
//! local search over window permutations scored by a [`MapEstimator`]. Ripple
//! is hill climbing: it converges to a local optimum that depends on the
//! window size and pass count, not necessarily the global one.

use itertools::Itertools;
use log::{debug, warn};
use rand::{rngs::StdRng, seq::SliceRandom, SeedableRng};

use crate::genotype::{GenotypeMatrix, RecFracMatrix};
use crate::map::{GeneticMap, LinkMapError, LinkageGroup, MapPos, Marker};
use crate::oracle::{MapEstimate, MapEstimator};

/// Improvements smaller than this are treated as noise and not committed.
const IMPROVE_EPS: f64 = 1e-9;

/// Collapse runs of near-identical markers, keeping one representative each.
///
/// Markers are walked in map order per chromosome; a marker whose
/// recombination fraction with the current cluster representative falls
/// below `rf_threshold` joins the cluster, and the member with the least
/// missing data represents it (ties keep the earlier marker). Pairs with no
/// informative individuals are treated as distinct. Returns the pruned map
/// and the names of the dropped markers.
pub fn drop_similar_markers(
    map: &GeneticMap,
    genotypes: &GenotypeMatrix,
    rf_threshold: f64,
) -> Result<(GeneticMap, Vec<String>), LinkMapError> {
    if !(rf_threshold > 0.0 && rf_threshold <= 0.5) {
        return Err(LinkMapError::InvalidThreshold(rf_threshold));
    }

    let mut pruned = GeneticMap::new();
    let mut dropped: Vec<String> = Vec::new();

    for (chrom, group) in map.iter() {
        let markers = group.markers();
        if markers.len() < 2 {
            pruned.groups.insert(chrom, group.clone())?;
            continue;
        }

        let names: Vec<String> = group.names().map(String::from).collect();
        let rfm = RecFracMatrix::from_genotypes(genotypes, &names)?;

        let mut retained: Vec<usize> = Vec::new();
        let mut rep = 0usize;
        for j in 1..markers.len() {
            let rf = rfm.get(rep, j);
            if rf.is_nan() {
                debug!(
                    "rf not estimable between '{}' and '{}' on {}; keeping both",
                    names[rep], names[j], chrom
                );
                retained.push(rep);
                rep = j;
            } else if rf < rf_threshold {
                // same cluster: the more complete marker represents it
                let miss_rep = genotypes.missingness(&names[rep])?;
                let miss_j = genotypes.missingness(&names[j])?;
                if miss_j < miss_rep {
                    dropped.push(names[rep].clone());
                    rep = j;
                } else {
                    dropped.push(names[j].clone());
                }
            } else {
                retained.push(rep);
                rep = j;
            }
        }
        retained.push(rep);

        let kept: Vec<Marker> = retained.iter().map(|&i| markers[i].clone()).collect();
        pruned.groups.insert(chrom, LinkageGroup::new(kept)?)?;
    }

    Ok((pruned, dropped))
}

/// Window size, sweep count, and candidate budget for [`ripple`].
#[derive(Debug, Clone)]
pub struct RippleConfig {
    /// Number of adjacent markers permuted together. Candidate count grows
    /// as `window!`, so thoroughness is paid for combinatorially.
    pub window: usize,
    /// Maximum full sweeps per chromosome.
    pub max_passes: usize,
    /// Cap on candidate orders per window; above it a seeded random sample
    /// of permutations is used instead of full enumeration.
    pub max_candidates: usize,
    pub seed: u64,
}

impl Default for RippleConfig {
    fn default() -> Self {
        Self {
            window: 3,
            max_passes: 8,
            max_candidates: 720,
            seed: 0,
        }
    }
}

/// Per-chromosome diagnostics from one [`ripple`] run.
#[derive(Debug, Clone)]
pub struct ChromRipple {
    pub chrom: String,
    /// Sweeps performed, including the final no-improvement sweep.
    pub passes: usize,
    /// Window commits (order changes).
    pub improvements: usize,
    /// Candidate orders rejected because the estimator did not converge.
    pub rejected: usize,
    /// Set when the current order itself could not be scored and the
    /// chromosome was left untouched.
    pub skipped: bool,
    pub initial_len: MapPos,
    pub final_len: MapPos,
}

#[derive(Debug, Clone, Default)]
pub struct RippleReport {
    pub chroms: Vec<ChromRipple>,
}

impl RippleReport {
    pub fn total_improvements(&self) -> usize {
        self.chroms.iter().map(|c| c.improvements).sum()
    }

    pub fn total_rejected(&self) -> usize {
        self.chroms.iter().map(|c| c.rejected).sum()
    }
}

fn factorial(n: usize) -> usize {
    (1..=n).fold(1usize, |acc, k| acc.saturating_mul(k))
}

/// The candidate window orders to try: full enumeration when `window!` fits
/// the budget, otherwise a seeded random sample. The identity order is
/// excluded.
fn window_candidates(
    indices: &[usize],
    max_candidates: usize,
    rng: &mut StdRng,
) -> Vec<Vec<usize>> {
    let w = indices.len();
    if factorial(w) <= max_candidates {
        indices
            .iter()
            .copied()
            .permutations(w)
            .filter(|perm| perm.as_slice() != indices)
            .collect()
    } else {
        let mut candidates = Vec::with_capacity(max_candidates);
        let mut perm: Vec<usize> = indices.to_vec();
        for _ in 0..max_candidates {
            perm.shuffle(rng);
            if perm.as_slice() != indices {
                candidates.push(perm.clone());
            }
        }
        candidates
    }
}

/// Iteratively reorder markers within each chromosome to shorten the map.
///
/// Every contiguous window of `config.window` markers is permuted and each
/// candidate order re-scored by `estimator`; the best strict improvement in
/// total map length is committed and sweeping continues until a full pass
/// changes nothing or `config.max_passes` is reached. A candidate the
/// estimator cannot score is rejected and counted, never fatal; a chromosome
/// whose *current* order cannot be scored is left untouched with a warning.
///
/// Positions of reordered chromosomes are rebuilt from the estimator's
/// distances, anchored at zero. Chromosomes whose order did not change keep
/// their input positions, so a second run on a converged map is a no-op.
pub fn ripple<E: MapEstimator>(
    map: &GeneticMap,
    genotypes: &GenotypeMatrix,
    estimator: &E,
    config: &RippleConfig,
) -> Result<(GeneticMap, RippleReport), LinkMapError> {
    if config.window < 2 {
        return Err(LinkMapError::WindowTooSmall(config.window));
    }

    let mut refined = GeneticMap::new();
    let mut report = RippleReport::default();
    let mut rng = StdRng::seed_from_u64(config.seed);

    for (chrom, group) in map.iter() {
        let n = group.len();
        if n < 2 {
            refined.groups.insert(chrom, group.clone())?;
            continue;
        }
        let window = config.window.min(n);

        let original: Vec<String> = group.names().map(String::from).collect();
        let mut entry = ChromRipple {
            chrom: chrom.clone(),
            passes: 0,
            improvements: 0,
            rejected: 0,
            skipped: false,
            initial_len: 0.0,
            final_len: 0.0,
        };

        // the accumulator: current best order and its estimate
        let mut current = original.clone();
        let mut current_est: MapEstimate = match estimator.estimate(genotypes, &current) {
            Ok(est) => est,
            Err(err) => {
                warn!(
                    "cannot score current order of {}; leaving it untouched: {}",
                    chrom, err
                );
                entry.skipped = true;
                report.chroms.push(entry);
                refined.groups.insert(chrom, group.clone())?;
                continue;
            }
        };
        entry.initial_len = current_est.total_len;

        for _pass in 0..config.max_passes {
            entry.passes += 1;
            let mut improved = false;

            for start in 0..=(n - window) {
                let indices: Vec<usize> = (start..start + window).collect();
                let mut best: Option<(Vec<String>, MapEstimate)> = None;
                let mut best_len = current_est.total_len;

                for perm in window_candidates(&indices, config.max_candidates, &mut rng) {
                    let mut candidate = current.clone();
                    for (slot, &from) in indices.iter().zip(perm.iter()) {
                        candidate[*slot] = current[from].clone();
                    }
                    match estimator.estimate(genotypes, &candidate) {
                        Ok(est) => {
                            if est.total_len < best_len - IMPROVE_EPS {
                                best_len = est.total_len;
                                best = Some((candidate, est));
                            }
                        }
                        Err(err) => {
                            entry.rejected += 1;
                            debug!("candidate order rejected on {}: {}", chrom, err);
                        }
                    }
                }

                if let Some((order, est)) = best {
                    current = order;
                    current_est = est;
                    entry.improvements += 1;
                    improved = true;
                }
            }

            if !improved {
                break;
            }
        }
        entry.final_len = current_est.total_len;

        if current == original {
            refined.groups.insert(chrom, group.clone())?;
        } else {
            // rebuild positions from the committed order's estimated distances
            let mut pos: MapPos = 0.0;
            let mut markers = Vec::with_capacity(n);
            for (i, name) in current.iter().enumerate() {
                if i > 0 {
                    pos += current_est.distances[i - 1];
                }
                let mut marker = group
                    .get(name)
                    .expect("reordered name came from this group")
                    .clone();
                marker.pos = pos;
                markers.push(marker);
            }
            refined.groups.insert(chrom, LinkageGroup::new(markers)?)?;
        }
        report.chroms.push(entry);
    }

    Ok((refined, report))
}
