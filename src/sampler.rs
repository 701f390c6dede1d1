//! Marker-subset sampling.
//!
//! Dense maps slow every downstream scan without adding much information;
//! [`pick_subset`] thins a map to a well-spaced subset, preferring complete
//! and well-balanced markers so the retained set carries the most signal.

use genomap::GenomeMap;
use std::collections::HashSet;

use crate::genotype::GenotypeMatrix;
use crate::map::{GeneticMap, LinkMapError, MapPos};

/// Spacing and scoring weights for [`pick_subset`].
#[derive(Debug, Clone)]
pub struct SubsetConfig {
    /// Minimum distance between retained markers on a chromosome, in
    /// centiMorgans.
    pub spacing: MapPos,
    /// Weight on call completeness (`1 - missingness`).
    pub miss_weight: f64,
    /// Weight on genotype-frequency balance.
    pub balance_weight: f64,
}

impl Default for SubsetConfig {
    fn default() -> Self {
        Self {
            spacing: 10.0,
            miss_weight: 1.0,
            balance_weight: 1.0,
        }
    }
}

/// A thinned selection of markers, tagged with the spacing that produced it.
///
/// Disposable: derived from a map, never mutated, discarded after use.
pub struct MarkerSubset {
    pub spacing: MapPos,
    pub names: GenomeMap<Vec<String>>,
}

impl MarkerSubset {
    /// Marker names per chromosome, in map order.
    pub fn names_for(&self, chrom: &str) -> Option<&Vec<String>> {
        self.names.get(chrom)
    }

    /// All retained marker names, chromosome order flattened.
    pub fn all_names(&self) -> HashSet<String> {
        self.names
            .iter()
            .flat_map(|(_, names)| names.iter().cloned())
            .collect()
    }

    pub fn n_markers(&self) -> usize {
        self.names.iter().map(|(_, names)| names.len()).sum()
    }
}

/// Select a well-spaced marker subset from a map.
///
/// Markers are retained greedily, highest score first, where score is
/// `miss_weight·(1 − missingness) + balance_weight·balance`; a marker is
/// kept only if it lies at least `spacing` centiMorgans from every marker
/// already retained on its chromosome. Score ties resolve to map order.
/// Chromosomes with fewer than two markers pass through unmodified.
pub fn pick_subset(
    map: &GeneticMap,
    genotypes: &GenotypeMatrix,
    config: &SubsetConfig,
) -> Result<MarkerSubset, LinkMapError> {
    if !(config.spacing > 0.0) {
        return Err(LinkMapError::InvalidSpacing(config.spacing));
    }
    if map.n_markers() == 0 {
        return Err(LinkMapError::EmptyMap);
    }

    let mut names: GenomeMap<Vec<String>> = GenomeMap::new();
    for (chrom, group) in map.iter() {
        let markers = group.markers();
        if markers.len() < 2 {
            names.insert(chrom, group.names().map(String::from).collect())?;
            continue;
        }

        let mut scored: Vec<(usize, f64)> = Vec::with_capacity(markers.len());
        for (idx, marker) in markers.iter().enumerate() {
            let completeness = 1.0 - genotypes.missingness(&marker.name)?;
            let balance = genotypes.balance(&marker.name)?;
            let score = config.miss_weight * completeness + config.balance_weight * balance;
            scored.push((idx, score));
        }
        scored.sort_by(|(ia, sa), (ib, sb)| {
            sb.partial_cmp(sa)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(ia.cmp(ib))
        });

        let mut retained: Vec<usize> = Vec::new();
        for &(idx, _) in &scored {
            let pos = markers[idx].pos;
            let far_enough = retained
                .iter()
                .all(|&r| (markers[r].pos - pos).abs() >= config.spacing);
            if far_enough {
                retained.push(idx);
            }
        }
        retained.sort_unstable();

        names.insert(
            chrom,
            retained.iter().map(|&i| markers[i].name.clone()).collect(),
        )?;
    }

    Ok(MarkerSubset {
        spacing: config.spacing,
        names,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genotype::sim;
    use crate::map::tests::grid_map;
    use crate::map::{GeneticMap, LinkageGroup, Marker};

    #[test]
    fn test_spacing_bound_two_chromosomes() {
        // 25 markers per chromosome spanning 100 cM; spacing 20 admits at
        // most 6 markers per chromosome
        let map = grid_map(&["1", "2"], 25, 100.0 / 24.0);
        let geno = sim::backcross(&map, 30, 5);
        let config = SubsetConfig {
            spacing: 20.0,
            ..SubsetConfig::default()
        };
        let subset = pick_subset(&map, &geno, &config).unwrap();

        for (chrom, group) in map.iter() {
            let names = subset.names_for(chrom).unwrap();
            assert!(names.len() <= 6, "{} markers retained", names.len());
            let positions: Vec<f64> = names
                .iter()
                .map(|n| group.get(n).unwrap().pos)
                .collect();
            for pair in positions.windows(2) {
                assert!(pair[1] - pair[0] >= 20.0);
            }
        }
    }

    #[test]
    fn test_singleton_chromosome_passthrough() {
        let mut map = grid_map(&["1"], 10, 5.0);
        map.groups
            .insert(
                "2",
                LinkageGroup::new(vec![Marker::new("lonely", 0.0)]).unwrap(),
            )
            .unwrap();
        let geno = sim::backcross(&map, 20, 1);
        let subset = pick_subset(&map, &geno, &SubsetConfig::default()).unwrap();
        assert_eq!(subset.names_for("2").unwrap(), &vec!["lonely".to_string()]);
    }

    #[test]
    fn test_prefers_complete_markers() {
        // two markers 1 cM apart: only one can survive spacing 10, and it
        // should be the one without missing data
        let mut map = GeneticMap::new();
        map.groups
            .insert(
                "1",
                LinkageGroup::new(vec![Marker::new("gappy", 0.0), Marker::new("clean", 1.0)])
                    .unwrap(),
            )
            .unwrap();
        let mut geno = sim::backcross(&map, 20, 3);
        for ind in 0..10 {
            geno.set_call(ind, "gappy", None).unwrap();
        }
        let subset = pick_subset(&map, &geno, &SubsetConfig::default()).unwrap();
        assert_eq!(subset.names_for("1").unwrap(), &vec!["clean".to_string()]);
    }

    #[test]
    fn test_score_tie_breaks_to_map_order() {
        let map = grid_map(&["1"], 2, 1.0);
        let geno = sim::backcross(&map, 20, 3);
        // zero weights make every score equal; the earlier marker wins
        let config = SubsetConfig {
            spacing: 10.0,
            miss_weight: 0.0,
            balance_weight: 0.0,
        };
        let subset = pick_subset(&map, &geno, &config).unwrap();
        assert_eq!(subset.names_for("1").unwrap(), &vec!["1_0".to_string()]);
    }

    #[test]
    fn test_invalid_spacing() {
        let map = grid_map(&["1"], 5, 10.0);
        let geno = sim::backcross(&map, 10, 1);
        let config = SubsetConfig {
            spacing: 0.0,
            ..SubsetConfig::default()
        };
        assert!(matches!(
            pick_subset(&map, &geno, &config),
            Err(LinkMapError::InvalidSpacing(_))
        ));
    }

    #[test]
    fn test_empty_map() {
        let map = GeneticMap::new();
        let other = grid_map(&["1"], 5, 10.0);
        let geno = sim::backcross(&other, 10, 1);
        assert!(matches!(
            pick_subset(&map, &geno, &SubsetConfig::default()),
            Err(LinkMapError::EmptyMap)
        ));
    }
}
