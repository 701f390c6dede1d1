use csv::ReaderBuilder;
use genomap::{GenomeMap, GenomeMapError};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::io;
use std::io::Write;
use thiserror::Error;

use crate::file::OutputFile;
use crate::oracle::OracleError;

use super::file::{FileError, InputFile};

/// The float type for map positions, in centiMorgans.
pub type MapPos = f64;

/// The integer type for physical genomic positions, in basepairs.
pub type Bp = u64;

#[derive(Error, Debug)]
pub enum LinkMapError {
    #[error("marker table parsing error: {0}")]
    TableParsingError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IOError(#[from] io::Error),
    #[error("file reading error: {0}")]
    FileError(#[from] FileError),
    #[error("GenomeMap error: error updating GenomeMap")]
    GenomeMapError(#[from] GenomeMapError),
    #[error("oracle error: {0}")]
    OracleError(#[from] OracleError),
    #[error("missing field")]
    MissingField,
    #[error("failed to parse a column of a marker table: {0}")]
    ParseError(String),
    #[error("markers out of order at '{0}'; map positions must be non-decreasing")]
    MarkersNotSorted(String),
    #[error("duplicate marker name '{0}'")]
    DuplicateMarker(String),
    #[error("chromosome key '{0}' does not exist")]
    NoChrom(String),
    #[error("map contains no markers")]
    EmptyMap,
    #[error("marker spacing must be positive (got {0})")]
    InvalidSpacing(f64),
    #[error("similarity threshold must be in (0, 0.5] (got {0})")]
    InvalidThreshold(f64),
    #[error("ripple window must span at least two markers (got {0})")]
    WindowTooSmall(usize),
    #[error("marker '{0}' has no genotype column")]
    MissingGenotypeColumn(String),
    #[error("individual IDs of the genotype matrix do not match the population")]
    IdMismatch,
    #[error("genotype probabilities have not been computed for this population")]
    GenoprobsNotComputed,
    #[error("genotype table error: {0}")]
    GenotypeTableError(String),
}

/// A mapped marker: a name, a linkage position in centiMorgans, and an
/// optional physical position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Marker {
    pub name: String,
    pub pos: MapPos,
    pub bp: Option<Bp>,
}

impl Marker {
    pub fn new(name: &str, pos: MapPos) -> Self {
        Self {
            name: name.to_string(),
            pos,
            bp: None,
        }
    }
}

/// An ordered run of markers on one chromosome.
///
/// The ordering invariant is checked on construction: map positions must be
/// non-decreasing. Every operation that rebuilds a group goes back through
/// [`LinkageGroup::new`], so a group can always be assumed sorted.
#[derive(Debug, Clone, Default)]
pub struct LinkageGroup {
    markers: Vec<Marker>,
}

impl LinkageGroup {
    /// Create a new linkage group, checking the position ordering invariant.
    pub fn new(markers: Vec<Marker>) -> Result<Self, LinkMapError> {
        for pair in markers.windows(2) {
            if pair[1].pos < pair[0].pos {
                return Err(LinkMapError::MarkersNotSorted(pair[1].name.clone()));
            }
        }
        Ok(Self { markers })
    }

    /// Return the number of markers in this group.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    /// Return if the group has no markers.
    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }

    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Iterate over marker names, in map order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.markers.iter().map(|m| m.name.as_str())
    }

    /// The map positions of all markers, in map order.
    pub fn positions(&self) -> Vec<MapPos> {
        self.markers.iter().map(|m| m.pos).collect()
    }

    /// The map length spanned by this group, in centiMorgans.
    pub fn span(&self) -> MapPos {
        match (self.markers.first(), self.markers.last()) {
            (Some(first), Some(last)) => last.pos - first.pos,
            _ => 0.0,
        }
    }

    /// Look up a marker by name.
    pub fn get(&self, name: &str) -> Option<&Marker> {
        self.markers.iter().find(|m| m.name == name)
    }
}

/// Per-chromosome marker counts and extents, as produced by
/// [`GeneticMap::summary`].
#[derive(Debug, Clone, Serialize)]
pub struct GroupSummary {
    pub chrom: String,
    pub n_markers: usize,
    pub start: MapPos,
    pub end: MapPos,
    pub span: MapPos,
}

/// An ordered collection of linkage groups keyed by chromosome name.
pub struct GeneticMap {
    pub groups: GenomeMap<LinkageGroup>,
}

impl GeneticMap {
    pub fn new() -> Self {
        Self {
            groups: GenomeMap::new(),
        }
    }

    /// Create a [`GeneticMap`] from a marker-table file.
    ///
    /// The table is tab-delimited with columns `marker`, `chrom`, `pos`
    /// (centiMorgans) and an optional fourth `bp` column; `#`-prefixed lines
    /// are skipped and a header row is detected rather than required. Gzip
    /// input is handled transparently. A table like:
    ///
    /// ```text
    /// marker  chrom   pos     bp
    /// S1_1000 1       0.0     1000
    /// S1_8000 1       4.3     8000
    /// S2_500  2       0.0     500
    /// ```
    ///
    /// Markers may not repeat across the table, and positions within each
    /// chromosome must be non-decreasing.
    pub fn from_marker_table(filepath: &str) -> Result<GeneticMap, LinkMapError> {
        let input_file = InputFile::new(filepath);
        let has_header = input_file.has_header("marker")?;
        let buf_reader = input_file.reader()?;

        let mut rdr = ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(has_header)
            .comment(Some(b'#'))
            .flexible(true)
            .from_reader(buf_reader);

        let mut seen: HashSet<String> = HashSet::new();
        // accumulate per chromosome first so interleaved tables still work
        let mut pending: indexmap::IndexMap<String, Vec<Marker>> = indexmap::IndexMap::new();

        for result in rdr.records() {
            let record = result.map_err(LinkMapError::TableParsingError)?;

            let name = record.get(0).ok_or(LinkMapError::MissingField)?.to_string();
            let chrom = record.get(1).ok_or(LinkMapError::MissingField)?.to_string();
            let pos_str = record.get(2).ok_or(LinkMapError::MissingField)?;
            let pos: MapPos = pos_str.parse().map_err(|_| {
                LinkMapError::ParseError(format!("failed to parse position from '{}'", pos_str))
            })?;

            let bp = match record.get(3) {
                None | Some("") | Some("NA") | Some("-") => None,
                Some(bp_str) => Some(bp_str.parse::<Bp>().map_err(|_| {
                    LinkMapError::ParseError(format!("failed to parse bp from '{}'", bp_str))
                })?),
            };

            if !seen.insert(name.clone()) {
                return Err(LinkMapError::DuplicateMarker(name));
            }

            pending
                .entry(chrom)
                .or_default()
                .push(Marker { name, pos, bp });
        }

        let mut map = GeneticMap::new();
        for (chrom, markers) in pending {
            map.groups.insert(&chrom, LinkageGroup::new(markers)?)?;
        }
        Ok(map)
    }

    /// Return the number of chromosomes in the map.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Return if the map has no chromosomes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the total number of markers across all chromosomes.
    pub fn n_markers(&self) -> usize {
        self.groups.iter().map(|(_, g)| g.len()).sum()
    }

    /// Iterate over chromosome name and [`LinkageGroup`] tuples.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &LinkageGroup)> {
        self.groups.iter()
    }

    /// Look up a linkage group by chromosome name.
    pub fn group(&self, chrom: &str) -> Result<&LinkageGroup, LinkMapError> {
        self.groups
            .get(chrom)
            .ok_or(LinkMapError::NoChrom(chrom.to_string()))
    }

    /// The chromosome and map position of a marker, if it is on the map.
    pub fn position_of(&self, name: &str) -> Option<(String, MapPos)> {
        for (chrom, group) in self.groups.iter() {
            if let Some(marker) = group.get(name) {
                return Some((chrom.clone(), marker.pos));
            }
        }
        None
    }

    /// Build a new map retaining only the named markers.
    ///
    /// Chromosome order and within-chromosome marker order are preserved;
    /// chromosomes left with no markers are dropped.
    pub fn retain_markers(&self, keep: &HashSet<String>) -> Result<GeneticMap, LinkMapError> {
        let mut map = GeneticMap::new();
        for (chrom, group) in self.groups.iter() {
            let markers: Vec<Marker> = group
                .markers()
                .iter()
                .filter(|m| keep.contains(&m.name))
                .cloned()
                .collect();
            if !markers.is_empty() {
                map.groups.insert(chrom, LinkageGroup::new(markers)?)?;
            }
        }
        Ok(map)
    }

    /// Build a new map containing a single chromosome.
    pub fn only_chrom(&self, chrom: &str) -> Result<GeneticMap, LinkMapError> {
        let group = self.group(chrom)?;
        let mut map = GeneticMap::new();
        map.groups.insert(chrom, group.clone())?;
        Ok(map)
    }

    /// Per-chromosome marker counts and map extents.
    pub fn summary(&self) -> Vec<GroupSummary> {
        self.groups
            .iter()
            .map(|(chrom, group)| {
                let positions = group.positions();
                let start = positions.first().copied().unwrap_or(0.0);
                let end = positions.last().copied().unwrap_or(0.0);
                GroupSummary {
                    chrom: chrom.clone(),
                    n_markers: group.len(),
                    start,
                    end,
                    span: end - start,
                }
            })
            .collect()
    }

    /// The summed map length of all chromosomes, in centiMorgans.
    pub fn total_len(&self) -> MapPos {
        self.groups.iter().map(|(_, g)| g.span()).sum()
    }

    /// Write the map as a marker table.
    ///
    /// # Arguments
    ///  * `filepath`: The filepath to write the marker table to. If the
    ///    filepath has a `.gz` extension, the output will be gzip compressed.
    ///    If `filepath` is `None`, uncompressed output will be written to
    ///    standard out.
    pub fn write_tsv(&self, filepath: Option<&str>) -> Result<(), LinkMapError> {
        let mut writer: Box<dyn Write> = match filepath {
            Some(path) => {
                let file = OutputFile::new(path, None);
                file.writer()?
            }
            None => Box::new(std::io::stdout()),
        };

        writeln!(writer, "marker\tchrom\tpos\tbp")?;
        for (chrom, group) in self.groups.iter() {
            for marker in group.markers() {
                let bp = marker
                    .bp
                    .map(|v| v.to_string())
                    .unwrap_or_else(|| "NA".to_string());
                writeln!(writer, "{}\t{}\t{}\t{}", marker.name, chrom, marker.pos, bp)?;
            }
        }
        Ok(())
    }
}

impl Default for GeneticMap {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for GeneticMap {
    fn clone(&self) -> Self {
        let mut groups = GenomeMap::new();
        for (chrom, group) in self.groups.iter() {
            // names are unique, insert cannot fail
            groups
                .insert(chrom, group.clone())
                .expect("cloning cannot duplicate chromosome names");
        }
        Self { groups }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write as IoWrite;
    use tempfile::tempdir;

    /// An evenly spaced test map: `n` markers per chromosome, `step` cM apart.
    pub(crate) fn grid_map(chroms: &[&str], n: usize, step: MapPos) -> GeneticMap {
        let mut map = GeneticMap::new();
        for chrom in chroms {
            let markers: Vec<Marker> = (0..n)
                .map(|i| Marker::new(&format!("{}_{}", chrom, i), i as MapPos * step))
                .collect();
            map.groups
                .insert(chrom, LinkageGroup::new(markers).unwrap())
                .unwrap();
        }
        map
    }

    #[test]
    fn test_from_marker_table() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.tsv");
        let path = path.to_str().unwrap();

        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "# test marker table").unwrap();
        writeln!(f, "marker\tchrom\tpos\tbp").unwrap();
        writeln!(f, "m1\t1\t0.0\t1000").unwrap();
        writeln!(f, "m2\t1\t4.5\tNA").unwrap();
        writeln!(f, "m3\t2\t0.0\t500").unwrap();
        drop(f);

        let map = GeneticMap::from_marker_table(path).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map.n_markers(), 3);
        assert_eq!(map.group("1").unwrap().len(), 2);
        assert_eq!(map.group("1").unwrap().get("m1").unwrap().bp, Some(1000));
        assert!(map.group("1").unwrap().get("m2").unwrap().bp.is_none());
        let (chrom, pos) = map.position_of("m2").unwrap();
        assert_eq!(chrom, "1");
        assert_eq!(pos, 4.5);
    }

    #[test]
    fn test_from_marker_table_unsorted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.tsv");
        let path = path.to_str().unwrap();

        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "m1\t1\t10.0").unwrap();
        writeln!(f, "m2\t1\t4.5").unwrap();
        drop(f);

        let result = GeneticMap::from_marker_table(path);
        assert!(matches!(result, Err(LinkMapError::MarkersNotSorted(_))));
    }

    #[test]
    fn test_from_marker_table_duplicate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("markers.tsv");
        let path = path.to_str().unwrap();

        let mut f = std::fs::File::create(path).unwrap();
        writeln!(f, "m1\t1\t0.0").unwrap();
        writeln!(f, "m1\t2\t4.5").unwrap();
        drop(f);

        let result = GeneticMap::from_marker_table(path);
        assert!(matches!(result, Err(LinkMapError::DuplicateMarker(_))));
    }

    #[test]
    fn test_retain_markers() {
        let map = grid_map(&["1", "2"], 5, 10.0);
        let keep: HashSet<String> = ["1_0", "1_3", "2_1"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let sub = map.retain_markers(&keep).unwrap();
        assert_eq!(sub.n_markers(), 3);
        assert_eq!(sub.group("1").unwrap().positions(), vec![0.0, 30.0]);
        assert_eq!(sub.group("2").unwrap().positions(), vec![10.0]);
    }

    #[test]
    fn test_only_chrom() {
        let map = grid_map(&["1", "2", "3"], 4, 5.0);
        let sub = map.only_chrom("2").unwrap();
        assert_eq!(sub.len(), 1);
        assert_eq!(sub.n_markers(), 4);
        assert!(matches!(
            map.only_chrom("9"),
            Err(LinkMapError::NoChrom(_))
        ));
    }

    #[test]
    fn test_summary_and_spans() {
        let map = grid_map(&["1", "2"], 25, 100.0 / 24.0);
        let summaries = map.summary();
        assert_eq!(summaries.len(), 2);
        for s in &summaries {
            assert_eq!(s.n_markers, 25);
            crate::numeric::assert_float_eq(s.span, 100.0, 1e-9);
        }
        crate::numeric::assert_float_eq(map.total_len(), 200.0, 1e-9);
    }

    #[test]
    fn test_write_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.tsv");
        let path = path.to_str().unwrap();

        let map = grid_map(&["1", "2"], 3, 7.5);
        map.write_tsv(Some(path)).unwrap();

        let again = GeneticMap::from_marker_table(path).unwrap();
        assert_eq!(again.len(), 2);
        assert_eq!(again.n_markers(), 6);
        assert_eq!(again.group("1").unwrap().positions(), vec![0.0, 7.5, 15.0]);
    }
}
