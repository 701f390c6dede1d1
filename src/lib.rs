//! Functionality for refining genetic linkage maps and placing markers.
//!
//! A [`GeneticMap`] can be read from a tab-delimited marker table and a
//! [`GenotypeMatrix`] from an individuals × markers CSV; together they form a
//! [`Population`]. Three composable stages operate on a population: marker
//! thinning ([`pick_subset`]), map refinement ([`drop_similar_markers`] and
//! [`ripple`]), and placement of unmapped markers ([`infer_positions`]).
//! The statistical machinery sits behind the oracle traits in [`oracle`];
//! [`RegressionBackend`] is a self-contained implementation of all three.
//!
//! Here is an example which cleans up a map and re-orders markers within
//! each chromosome:
//!
//! ```no_run
//! use linkmap::prelude::*;
//!
//! let map = GeneticMap::from_marker_table("maize_markers.tsv")
//!               .expect("cannot read marker table");
//! let geno = GenotypeMatrix::from_geno_csv("maize_geno.csv")
//!               .expect("cannot read genotypes");
//!
//! let backend = RegressionBackend::default();
//! let (pruned, dropped) = drop_similar_markers(&map, &geno, 0.01)
//!               .expect("pruning failed");
//! println!("dropped {} redundant markers", dropped.len());
//!
//! let (refined, report) = ripple(&pruned, &geno, &backend, &RippleConfig::default())
//!               .expect("ripple failed");
//! println!("{} windows improved", report.total_improvements());
//! refined.write_tsv(Some("maize_markers_refined.tsv")).unwrap();
//! ```
//!
//! And one which places new markers on an existing map:
//!
//! ```no_run
//! use linkmap::prelude::*;
//!
//! let map = GeneticMap::from_marker_table("maize_markers.tsv").unwrap();
//! let geno = GenotypeMatrix::from_geno_csv("maize_geno.csv").unwrap();
//! let queries = GenotypeMatrix::from_geno_csv("new_markers.csv").unwrap();
//!
//! let backend = RegressionBackend::default();
//! let mut pop = Population::new(map, geno).unwrap();
//! pop.compute_genoprobs(&backend, &GridSpec::markers_only()).unwrap();
//!
//! let config = InferConfig {
//!     lod_drop: Some(DEFAULT_LOD_DROP),
//!     ..InferConfig::default()
//! };
//! for hit in infer_positions(&pop, &queries, &backend, &backend, &config).unwrap() {
//!     println!("{}\t{}\t{}\t{}", hit.marker, hit.chrom, hit.pos, hit.stat);
//! }
//! ```

pub mod backend;
pub mod file;
pub mod genotype;
pub mod infer;
pub mod map;
pub mod numeric;
pub mod oracle;
pub mod refine;
pub mod sampler;

pub use backend::RegressionBackend;
pub use genotype::{GenotypeMatrix, Population};
pub use infer::{infer_positions, InferConfig, InferredPosition, DEFAULT_LOD_DROP};
pub use map::{GeneticMap, LinkMapError};
pub use refine::{drop_similar_markers, ripple, RippleConfig};
pub use sampler::{pick_subset, SubsetConfig};

pub mod prelude {
    pub use crate::backend::RegressionBackend;
    pub use crate::genotype::{GenotypeMatrix, Population};
    pub use crate::infer::{
        infer_positions, ConfidenceInterval, InferConfig, InferredPosition, DEFAULT_LOD_DROP,
    };
    pub use crate::map::{GeneticMap, LinkMapError, LinkageGroup, Marker};
    pub use crate::numeric::MapFunction;
    pub use crate::oracle::{
        GenoprobOracle, GridSpec, MapEstimator, ScanOracle, ScanResult,
    };
    pub use crate::refine::{drop_similar_markers, ripple, RippleConfig, RippleReport};
    pub use crate::sampler::{pick_subset, MarkerSubset, SubsetConfig};
}

#[cfg(test)]
mod tests {}
