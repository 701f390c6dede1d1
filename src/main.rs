use clap::{Parser, Subcommand};
use linkmap::file::OutputFile;
use linkmap::infer::{infer_positions, InferConfig, DEFAULT_LOD_DROP};
use linkmap::map::LinkMapError;
use linkmap::numeric::MapFunction;
use linkmap::oracle::GridSpec;
use linkmap::refine::{drop_similar_markers, ripple, RippleConfig};
use linkmap::sampler::{pick_subset, SubsetConfig};
use linkmap::{GenotypeMatrix, GeneticMap, Population, RegressionBackend};
use std::io;
use std::io::Write;

const INFO: &str = "\
linkmap: refine genetic linkage maps and place markers
usage: linkmap [--help] <subcommand>

Subcommands:

  thin:   select a well-spaced marker subset.
  prune:  drop near-duplicate markers.
  ripple: reorder markers within each chromosome.
  place:  infer map positions for unmapped markers.

";

#[derive(Parser)]
#[clap(name = "linkmap")]
#[clap(about = INFO)]
struct Cli {
    #[arg(short, long, action = clap::ArgAction::Count)]
    debug: u8,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Select a well-spaced subset of markers from a marker table.
    ///
    /// Markers are scored by call completeness and genotype balance; the
    /// highest-scoring markers are retained subject to the minimum spacing.
    /// The output is a marker table restricted to the subset.
    Thin {
        /// the input marker table (TSV: marker, chrom, pos[, bp])
        #[arg(long, required = true)]
        map: String,
        /// the genotype table (CSV: individuals × markers)
        #[arg(long, required = true)]
        geno: String,
        /// minimum spacing between retained markers, in centiMorgans
        #[arg(long, default_value_t = 10.0)]
        spacing: f64,
        /// weight on call completeness
        #[arg(long, default_value_t = 1.0)]
        miss_weight: f64,
        /// weight on genotype-frequency balance
        #[arg(long, default_value_t = 1.0)]
        balance_weight: f64,
        /// the output file path (if not set, uses standard out)
        #[arg(long)]
        output: Option<String>,
    },
    /// Drop markers nearly identical to a retained neighbor.
    ///
    /// Adjacent markers whose recombination fraction falls below the
    /// threshold collapse to the member with the least missing data.
    Prune {
        /// the input marker table (TSV: marker, chrom, pos[, bp])
        #[arg(long, required = true)]
        map: String,
        /// the genotype table (CSV: individuals × markers)
        #[arg(long, required = true)]
        geno: String,
        /// recombination-fraction threshold below which markers collapse
        #[arg(long, default_value_t = 0.01)]
        rf_threshold: f64,
        /// the output file path (if not set, uses standard out)
        #[arg(long)]
        output: Option<String>,
    },
    /// Reorder markers within each chromosome by windowed local search.
    ///
    /// Each window of adjacent markers is permuted and re-scored by map
    /// re-estimation; improvements are committed until a full sweep changes
    /// nothing. Larger windows are more thorough and combinatorially more
    /// expensive.
    Ripple {
        /// the input marker table (TSV: marker, chrom, pos[, bp])
        #[arg(long, required = true)]
        map: String,
        /// the genotype table (CSV: individuals × markers)
        #[arg(long, required = true)]
        geno: String,
        /// number of adjacent markers permuted together
        #[arg(long, default_value_t = 3)]
        window: usize,
        /// maximum sweeps per chromosome
        #[arg(long, default_value_t = 8)]
        passes: usize,
        /// candidate orders per window before switching to random sampling
        #[arg(long, default_value_t = 720)]
        max_candidates: usize,
        /// seed for randomized candidate sampling
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// mapping function: haldane or kosambi
        #[arg(long, default_value = "haldane")]
        map_function: String,
        /// the output file path (if not set, uses standard out)
        #[arg(long)]
        output: Option<String>,
    },
    /// Infer map positions for unmapped markers.
    ///
    /// Each query marker's calls are scanned genome-wide against a thinned
    /// marker subset to find its chromosome, then at fine resolution on that
    /// chromosome. The output is a TSV of marker, chromosome, position,
    /// statistic, and (with --lod-drop) interval bounds.
    Place {
        /// the input marker table (TSV: marker, chrom, pos[, bp])
        #[arg(long, required = true)]
        map: String,
        /// the genotype table for mapped markers (CSV: individuals × markers)
        #[arg(long, required = true)]
        geno: String,
        /// the genotype table for markers to place
        #[arg(long, required = true)]
        queries: String,
        /// spacing of the coarse-phase marker subset, in centiMorgans
        #[arg(long, default_value_t = 10.0)]
        spacing: f64,
        /// probe spacing of the fine phase, in centiMorgans
        #[arg(long, default_value_t = 0.1)]
        fine_step: f64,
        /// report a LOD-drop support interval with this threshold
        #[arg(long)]
        lod_drop: Option<f64>,
        /// widen interval bounds outward to marker positions
        #[arg(long, default_value_t = false)]
        ci_at_markers: bool,
        /// perturb query calls by up to this much to keep statistics finite
        #[arg(long)]
        jitter: Option<f64>,
        /// seed for jitter
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// genotyping error probability
        #[arg(long, default_value_t = 1e-4)]
        error_prob: f64,
        /// mapping function: haldane or kosambi
        #[arg(long, default_value = "haldane")]
        map_function: String,
        /// the output file path (if not set, uses standard out)
        #[arg(long)]
        output: Option<String>,
    },
}

fn open_writer(output: Option<&str>) -> Result<Box<dyn Write>, LinkMapError> {
    match output {
        Some(path) => Ok(OutputFile::new(path, None).writer()?),
        None => Ok(Box::new(io::stdout())),
    }
}

fn parse_map_function(name: &str) -> Result<MapFunction, LinkMapError> {
    name.parse::<MapFunction>()
        .map_err(LinkMapError::ParseError)
}

fn thin(
    map: &str,
    geno: &str,
    spacing: f64,
    miss_weight: f64,
    balance_weight: f64,
    output: Option<&str>,
) -> Result<(), LinkMapError> {
    let map = GeneticMap::from_marker_table(map)?;
    let geno = GenotypeMatrix::from_geno_csv(geno)?;
    let config = SubsetConfig {
        spacing,
        miss_weight,
        balance_weight,
    };
    let subset = pick_subset(&map, &geno, &config)?;
    let thinned = map.retain_markers(&subset.all_names())?;
    log::info!(
        "retained {} of {} markers",
        thinned.n_markers(),
        map.n_markers()
    );
    thinned.write_tsv(output)
}

fn prune(
    map: &str,
    geno: &str,
    rf_threshold: f64,
    output: Option<&str>,
) -> Result<(), LinkMapError> {
    let map = GeneticMap::from_marker_table(map)?;
    let geno = GenotypeMatrix::from_geno_csv(geno)?;
    let (pruned, dropped) = drop_similar_markers(&map, &geno, rf_threshold)?;
    log::info!("dropped {} near-duplicate markers", dropped.len());
    pruned.write_tsv(output)
}

#[allow(clippy::too_many_arguments)]
fn run_ripple(
    map: &str,
    geno: &str,
    window: usize,
    passes: usize,
    max_candidates: usize,
    seed: u64,
    map_function: &str,
    output: Option<&str>,
) -> Result<(), LinkMapError> {
    let map = GeneticMap::from_marker_table(map)?;
    let geno = GenotypeMatrix::from_geno_csv(geno)?;
    let backend = RegressionBackend::new(parse_map_function(map_function)?, 1e-4);
    let config = RippleConfig {
        window,
        max_passes: passes,
        max_candidates,
        seed,
    };
    let (refined, report) = ripple(&map, &geno, &backend, &config)?;
    for entry in &report.chroms {
        log::info!(
            "{}: {} passes, {} improvements, {} rejected, {:.2} -> {:.2} cM",
            entry.chrom,
            entry.passes,
            entry.improvements,
            entry.rejected,
            entry.initial_len,
            entry.final_len
        );
    }
    refined.write_tsv(output)
}

#[allow(clippy::too_many_arguments)]
fn place(
    map: &str,
    geno: &str,
    queries: &str,
    spacing: f64,
    fine_step: f64,
    lod_drop: Option<f64>,
    ci_at_markers: bool,
    jitter: Option<f64>,
    seed: u64,
    error_prob: f64,
    map_function: &str,
    output: Option<&str>,
) -> Result<(), LinkMapError> {
    let map = GeneticMap::from_marker_table(map)?;
    let geno = GenotypeMatrix::from_geno_csv(geno)?;
    let queries = GenotypeMatrix::from_geno_csv(queries)?;
    let backend = RegressionBackend::new(parse_map_function(map_function)?, error_prob);

    let mut pop = Population::new(map, geno)?;
    pop.compute_genoprobs(&backend, &GridSpec::markers_only())?;

    let lod_drop = lod_drop.or(ci_at_markers.then_some(DEFAULT_LOD_DROP));
    let config = InferConfig {
        subset: SubsetConfig {
            spacing,
            ..SubsetConfig::default()
        },
        error_prob,
        map_function: backend.map_function,
        fine_step,
        lod_drop,
        ci_at_markers,
        jitter,
        seed,
        ..InferConfig::default()
    };
    let results = infer_positions(&pop, &queries, &backend, &backend, &config)?;

    let mut writer = open_writer(output)?;
    if lod_drop.is_some() {
        writeln!(writer, "marker\tchrom\tpos\tstat\tci_low\tci_high")?;
    } else {
        writeln!(writer, "marker\tchrom\tpos\tstat")?;
    }
    for hit in &results {
        match &hit.ci {
            Some(ci) => writeln!(
                writer,
                "{}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.4}",
                hit.marker, hit.chrom, hit.pos, hit.stat, ci.low, ci.high
            )?,
            None => writeln!(
                writer,
                "{}\t{}\t{:.4}\t{:.4}",
                hit.marker, hit.chrom, hit.pos, hit.stat
            )?,
        }
    }
    Ok(())
}

fn run() -> Result<(), LinkMapError> {
    let cli = Cli::parse();

    let level = match cli.debug {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    env_logger::Builder::from_default_env()
        .filter_level(level)
        .init();

    match &cli.command {
        Some(Commands::Thin {
            map,
            geno,
            spacing,
            miss_weight,
            balance_weight,
            output,
        }) => thin(
            map,
            geno,
            *spacing,
            *miss_weight,
            *balance_weight,
            output.as_deref(),
        ),
        Some(Commands::Prune {
            map,
            geno,
            rf_threshold,
            output,
        }) => prune(map, geno, *rf_threshold, output.as_deref()),
        Some(Commands::Ripple {
            map,
            geno,
            window,
            passes,
            max_candidates,
            seed,
            map_function,
            output,
        }) => run_ripple(
            map,
            geno,
            *window,
            *passes,
            *max_candidates,
            *seed,
            map_function,
            output.as_deref(),
        ),
        Some(Commands::Place {
            map,
            geno,
            queries,
            spacing,
            fine_step,
            lod_drop,
            ci_at_markers,
            jitter,
            seed,
            error_prob,
            map_function,
            output,
        }) => place(
            map,
            geno,
            queries,
            *spacing,
            *fine_step,
            *lod_drop,
            *ci_at_markers,
            *jitter,
            *seed,
            *error_prob,
            map_function,
            output.as_deref(),
        ),
        None => {
            println!("{}\n", INFO);
            std::process::exit(1);
        }
    }
}

fn main() {
    match run() {
        Ok(_) => {}
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
