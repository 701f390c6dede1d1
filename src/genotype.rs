//! Genotype matrices and the population object the pipeline stages operate on.
//!
//! A [`GenotypeMatrix`] holds categorical genotype calls (possibly missing)
//! for a set of individuals at a set of markers. A [`Population`] ties a
//! matrix to a [`GeneticMap`] and carries the genotype probabilities computed
//! for it, which every scan requires.

use csv::ReaderBuilder;
use indexmap::IndexMap;
use ndarray::Array2;

use crate::file::InputFile;
use crate::map::{GeneticMap, LinkMapError};
use crate::oracle::{GenoprobOracle, GenotypeProbs, GridSpec};

/// A single genotype call; `None` is missing.
pub type Call = Option<u8>;

/// Tokens treated as missing calls in genotype tables.
const MISSING_TOKENS: [&str; 3] = ["", "NA", "-"];

/// How two individual-ID lists relate, from [`GenotypeMatrix::check_ids`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdCheck {
    /// Same IDs in the same order.
    Identical,
    /// Same ID membership, different order.
    Reordered,
    /// Different ID membership.
    Mismatched,
}

/// Categorical genotype calls for individuals × markers.
///
/// Calls are stored column-major (one contiguous run per marker) since
/// every consumer in the crate walks whole marker columns.
#[derive(Debug, Clone)]
pub struct GenotypeMatrix {
    individuals: Vec<String>,
    markers: Vec<String>,
    marker_index: IndexMap<String, usize>,
    calls: Vec<Call>,
}

impl GenotypeMatrix {
    /// Create a matrix from column-major calls (`calls[marker][individual]`).
    pub fn new(
        individuals: Vec<String>,
        markers: Vec<String>,
        columns: Vec<Vec<Call>>,
    ) -> Result<Self, LinkMapError> {
        if columns.len() != markers.len() {
            return Err(LinkMapError::GenotypeTableError(format!(
                "{} marker names but {} call columns",
                markers.len(),
                columns.len()
            )));
        }
        let mut marker_index = IndexMap::new();
        for (i, name) in markers.iter().enumerate() {
            if marker_index.insert(name.clone(), i).is_some() {
                return Err(LinkMapError::DuplicateMarker(name.clone()));
            }
        }
        let n_ind = individuals.len();
        let mut calls = Vec::with_capacity(n_ind * markers.len());
        for (name, column) in markers.iter().zip(columns) {
            if column.len() != n_ind {
                return Err(LinkMapError::GenotypeTableError(format!(
                    "marker '{}' has {} calls for {} individuals",
                    name,
                    column.len(),
                    n_ind
                )));
            }
            calls.extend(column);
        }
        Ok(Self {
            individuals,
            markers,
            marker_index,
            calls,
        })
    }

    /// Read a genotype table from a CSV file.
    ///
    /// The expected layout is one row per individual: the first column is the
    /// individual ID and the header row names the markers. Empty fields,
    /// `NA`, and `-` are read as missing calls. Gzip input is handled
    /// transparently and `#`-prefixed lines are skipped.
    pub fn from_geno_csv(filepath: &str) -> Result<Self, LinkMapError> {
        let input_file = InputFile::new(filepath);
        let buf_reader = input_file.reader()?;
        let mut rdr = ReaderBuilder::new()
            .delimiter(b',')
            .has_headers(true)
            .comment(Some(b'#'))
            .from_reader(buf_reader);

        let headers = rdr.headers()?.clone();
        if headers.len() < 2 {
            return Err(LinkMapError::GenotypeTableError(
                "genotype table needs an ID column and at least one marker".to_string(),
            ));
        }
        let markers: Vec<String> = headers.iter().skip(1).map(|s| s.trim().to_string()).collect();

        let mut individuals = Vec::new();
        let mut rows: Vec<Vec<Call>> = Vec::new();
        for result in rdr.records() {
            let record = result?;
            let id = record.get(0).ok_or(LinkMapError::MissingField)?.to_string();
            let mut row = Vec::with_capacity(markers.len());
            for field in record.iter().skip(1) {
                let field = field.trim();
                if MISSING_TOKENS.contains(&field) {
                    row.push(None);
                } else {
                    let call = field.parse::<u8>().map_err(|_| {
                        LinkMapError::GenotypeTableError(format!(
                            "bad genotype call '{}' for individual '{}'",
                            field, id
                        ))
                    })?;
                    row.push(Some(call));
                }
            }
            if row.len() != markers.len() {
                return Err(LinkMapError::GenotypeTableError(format!(
                    "individual '{}' has {} calls for {} markers",
                    id,
                    row.len(),
                    markers.len()
                )));
            }
            individuals.push(id);
            rows.push(row);
        }

        let columns: Vec<Vec<Call>> = (0..markers.len())
            .map(|j| rows.iter().map(|row| row[j]).collect())
            .collect();
        Self::new(individuals, markers, columns)
    }

    pub fn individuals(&self) -> &[String] {
        &self.individuals
    }

    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    pub fn n_individuals(&self) -> usize {
        self.individuals.len()
    }

    pub fn n_markers(&self) -> usize {
        self.markers.len()
    }

    pub fn has_marker(&self, name: &str) -> bool {
        self.marker_index.contains_key(name)
    }

    /// The calls for one marker, one entry per individual.
    pub fn column(&self, name: &str) -> Result<&[Call], LinkMapError> {
        let idx = self
            .marker_index
            .get(name)
            .ok_or_else(|| LinkMapError::MissingGenotypeColumn(name.to_string()))?;
        let n = self.n_individuals();
        Ok(&self.calls[idx * n..(idx + 1) * n])
    }

    /// Overwrite one call. The marker must exist; the individual is
    /// addressed by row index.
    pub fn set_call(&mut self, ind: usize, name: &str, call: Call) -> Result<(), LinkMapError> {
        let idx = self
            .marker_index
            .get(name)
            .copied()
            .ok_or_else(|| LinkMapError::MissingGenotypeColumn(name.to_string()))?;
        let n = self.n_individuals();
        self.calls[idx * n + ind] = call;
        Ok(())
    }

    /// The fraction of missing calls for a marker.
    pub fn missingness(&self, name: &str) -> Result<f64, LinkMapError> {
        let column = self.column(name)?;
        if column.is_empty() {
            return Ok(1.0);
        }
        let missing = column.iter().filter(|c| c.is_none()).count();
        Ok(missing as f64 / column.len() as f64)
    }

    /// Genotype-frequency balance for a marker: `1 - Σ pᵢ²` over the observed
    /// call frequencies (the Gini diversity of the genotype classes).
    ///
    /// Zero for monomorphic or fully missing markers; higher is more
    /// informative.
    pub fn balance(&self, name: &str) -> Result<f64, LinkMapError> {
        let column = self.column(name)?;
        let mut counts: IndexMap<u8, usize> = IndexMap::new();
        let mut n = 0usize;
        for call in column.iter().flatten() {
            *counts.entry(*call).or_insert(0) += 1;
            n += 1;
        }
        if n == 0 {
            return Ok(0.0);
        }
        let sum_sq: f64 = counts
            .values()
            .map(|&c| {
                let p = c as f64 / n as f64;
                p * p
            })
            .sum();
        Ok(1.0 - sum_sq)
    }

    /// Estimated recombination fraction between two markers: the fraction of
    /// individuals with calls at both whose calls differ.
    ///
    /// Returns `None` when no individual is informative for the pair.
    pub fn rec_frac(&self, a: &str, b: &str) -> Result<Option<f64>, LinkMapError> {
        let col_a = self.column(a)?;
        let col_b = self.column(b)?;
        let mut informative = 0usize;
        let mut recombinant = 0usize;
        for (ca, cb) in col_a.iter().zip(col_b.iter()) {
            if let (Some(ca), Some(cb)) = (ca, cb) {
                informative += 1;
                if ca != cb {
                    recombinant += 1;
                }
            }
        }
        if informative == 0 {
            Ok(None)
        } else {
            Ok(Some(recombinant as f64 / informative as f64))
        }
    }

    /// Build a new matrix with only the named marker columns, in the
    /// supplied order.
    pub fn select(&self, names: &[String]) -> Result<GenotypeMatrix, LinkMapError> {
        let columns: Vec<Vec<Call>> = names
            .iter()
            .map(|name| self.column(name).map(|c| c.to_vec()))
            .collect::<Result<_, _>>()?;
        GenotypeMatrix::new(self.individuals.clone(), names.to_vec(), columns)
    }

    /// Compare this matrix's individual IDs against another ID list.
    pub fn check_ids(&self, other: &[String]) -> IdCheck {
        if self.individuals == other {
            return IdCheck::Identical;
        }
        let mut ours: Vec<&String> = self.individuals.iter().collect();
        let mut theirs: Vec<&String> = other.iter().collect();
        ours.sort();
        theirs.sort();
        if ours == theirs {
            IdCheck::Reordered
        } else {
            IdCheck::Mismatched
        }
    }

    /// Build a new matrix with rows rearranged to the supplied ID order.
    ///
    /// Fails unless the ID membership matches exactly.
    pub fn reorder_individuals(&self, order: &[String]) -> Result<GenotypeMatrix, LinkMapError> {
        if self.check_ids(order) == IdCheck::Mismatched {
            return Err(LinkMapError::IdMismatch);
        }
        let row_of: IndexMap<&str, usize> = self
            .individuals
            .iter()
            .enumerate()
            .map(|(i, id)| (id.as_str(), i))
            .collect();
        let rows: Vec<usize> = order.iter().map(|id| row_of[id.as_str()]).collect();
        let n = self.n_individuals();
        let columns: Vec<Vec<Call>> = (0..self.n_markers())
            .map(|j| {
                let column = &self.calls[j * n..(j + 1) * n];
                rows.iter().map(|&r| column[r]).collect()
            })
            .collect();
        GenotypeMatrix::new(order.to_vec(), self.markers.clone(), columns)
    }
}

/// A symmetric pairwise recombination-fraction matrix over a marker list.
///
/// Derived from genotype calls on demand; pairs with no informative
/// individuals are `NaN`.
#[derive(Debug, Clone)]
pub struct RecFracMatrix {
    pub names: Vec<String>,
    pub rf: Array2<f64>,
}

impl RecFracMatrix {
    /// Estimate all pairwise recombination fractions among `names` from
    /// genotype calls.
    pub fn from_genotypes(
        genotypes: &GenotypeMatrix,
        names: &[String],
    ) -> Result<Self, LinkMapError> {
        let n = names.len();
        let mut rf = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in (i + 1)..n {
                let est = genotypes
                    .rec_frac(&names[i], &names[j])?
                    .unwrap_or(f64::NAN);
                rf[[i, j]] = est;
                rf[[j, i]] = est;
            }
        }
        Ok(Self {
            names: names.to_vec(),
            rf,
        })
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.rf[[i, j]]
    }
}

/// A mapping population: a genetic map, the genotype calls at its markers,
/// and (once computed) the genotype probabilities scans run against.
pub struct Population {
    map: GeneticMap,
    genotypes: GenotypeMatrix,
    genoprobs: Option<GenotypeProbs>,
}

impl Population {
    /// Tie a map and genotype matrix together.
    ///
    /// Every marker on the map must have a genotype column; the matrix may
    /// carry extra columns (markers not yet on the map).
    pub fn new(map: GeneticMap, genotypes: GenotypeMatrix) -> Result<Self, LinkMapError> {
        for (_, group) in map.iter() {
            for name in group.names() {
                if !genotypes.has_marker(name) {
                    return Err(LinkMapError::MissingGenotypeColumn(name.to_string()));
                }
            }
        }
        Ok(Self {
            map,
            genotypes,
            genoprobs: None,
        })
    }

    pub fn map(&self) -> &GeneticMap {
        &self.map
    }

    pub fn genotypes(&self) -> &GenotypeMatrix {
        &self.genotypes
    }

    pub fn individuals(&self) -> &[String] {
        self.genotypes.individuals()
    }

    /// Compute and store genotype probabilities for the population's map.
    ///
    /// Scans require this step; see [`Population::genoprobs`].
    pub fn compute_genoprobs<O: GenoprobOracle>(
        &mut self,
        oracle: &O,
        grid: &GridSpec,
    ) -> Result<(), LinkMapError> {
        let probs = oracle.genoprob(self, grid)?;
        self.genoprobs = Some(probs);
        Ok(())
    }

    pub fn genoprobs(&self) -> Option<&GenotypeProbs> {
        self.genoprobs.as_ref()
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::tests::grid_map;
    use crate::numeric::assert_float_eq;
    use std::io::Write;
    use tempfile::tempdir;

    fn small_matrix() -> GenotypeMatrix {
        // m1: balanced, complete; m2: one missing; m3: monomorphic
        GenotypeMatrix::new(
            vec!["a".into(), "b".into(), "c".into(), "d".into()],
            vec!["m1".into(), "m2".into(), "m3".into()],
            vec![
                vec![Some(0), Some(1), Some(0), Some(1)],
                vec![Some(0), Some(1), None, Some(1)],
                vec![Some(0), Some(0), Some(0), Some(0)],
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_from_geno_csv() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("geno.csv");
        let path = path.to_str().unwrap();

        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "# simulated genotypes").unwrap();
        writeln!(f, "id,m1,m2").unwrap();
        writeln!(f, "a,0,1").unwrap();
        writeln!(f, "b,NA,0").unwrap();
        writeln!(f, "c,1,-").unwrap();
        drop(f);

        let geno = GenotypeMatrix::from_geno_csv(path).unwrap();
        assert_eq!(geno.n_individuals(), 3);
        assert_eq!(geno.markers(), &["m1".to_string(), "m2".to_string()]);
        assert_eq!(geno.column("m1").unwrap(), &[Some(0), None, Some(1)]);
        assert_eq!(geno.column("m2").unwrap(), &[Some(1), Some(0), None]);
    }

    #[test]
    fn test_missingness_and_balance() {
        let geno = small_matrix();
        assert_float_eq(geno.missingness("m1").unwrap(), 0.0, 1e-12);
        assert_float_eq(geno.missingness("m2").unwrap(), 0.25, 1e-12);
        assert_float_eq(geno.balance("m1").unwrap(), 0.5, 1e-12);
        assert_float_eq(geno.balance("m3").unwrap(), 0.0, 1e-12);
        assert!(matches!(
            geno.balance("m9"),
            Err(LinkMapError::MissingGenotypeColumn(_))
        ));
    }

    #[test]
    fn test_rec_frac() {
        let geno = small_matrix();
        // m1 vs m2: informative rows a, b, d; no mismatches
        assert_float_eq(geno.rec_frac("m1", "m2").unwrap().unwrap(), 0.0, 1e-12);
        // m1 vs m3: mismatch for b and d
        assert_float_eq(geno.rec_frac("m1", "m3").unwrap().unwrap(), 0.5, 1e-12);
    }

    #[test]
    fn test_rec_frac_matrix() {
        let geno = small_matrix();
        let names: Vec<String> = vec!["m1".into(), "m2".into(), "m3".into()];
        let rfm = RecFracMatrix::from_genotypes(&geno, &names).unwrap();
        assert_eq!(rfm.get(0, 0), 0.0);
        assert_float_eq(rfm.get(0, 2), 0.5, 1e-12);
        assert_float_eq(rfm.get(2, 0), 0.5, 1e-12);
    }

    #[test]
    fn test_check_ids_and_reorder() {
        let geno = small_matrix();
        let same: Vec<String> = vec!["a".into(), "b".into(), "c".into(), "d".into()];
        let shuffled: Vec<String> = vec!["d".into(), "c".into(), "b".into(), "a".into()];
        let different: Vec<String> = vec!["a".into(), "b".into(), "c".into(), "z".into()];
        assert_eq!(geno.check_ids(&same), IdCheck::Identical);
        assert_eq!(geno.check_ids(&shuffled), IdCheck::Reordered);
        assert_eq!(geno.check_ids(&different), IdCheck::Mismatched);

        let reordered = geno.reorder_individuals(&shuffled).unwrap();
        assert_eq!(reordered.column("m1").unwrap(), &[Some(1), Some(0), Some(1), Some(0)]);
        assert!(matches!(
            geno.reorder_individuals(&different),
            Err(LinkMapError::IdMismatch)
        ));
    }

    #[test]
    fn test_population_requires_columns() {
        let map = grid_map(&["1"], 3, 10.0);
        let geno = small_matrix();
        // map markers are named 1_0, 1_1, 1_2; matrix has m1..m3
        assert!(matches!(
            Population::new(map, geno),
            Err(LinkMapError::MissingGenotypeColumn(_))
        ));
    }

    #[test]
    fn test_simulated_backcross_shape() {
        let map = grid_map(&["1", "2"], 10, 5.0);
        let geno = sim::backcross(&map, 50, 7);
        assert_eq!(geno.n_individuals(), 50);
        assert_eq!(geno.n_markers(), 20);
        // adjacent markers 5 cM apart should be tightly linked
        let rf = geno.rec_frac("1_0", "1_1").unwrap().unwrap();
        assert!(rf < 0.25, "adjacent rf too large: {}", rf);
        // the population must be constructible over the simulated calls
        let map = grid_map(&["1", "2"], 10, 5.0);
        assert!(Population::new(map, geno).is_ok());
    }
}
