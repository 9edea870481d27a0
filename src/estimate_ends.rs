use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context};
use clap::Args;
use gzp::deflate::Bgzf;
use gzp::par::compress::{ParCompress, ParCompressBuilder};
use log::{info, warn};
use rayon::ThreadPoolBuilder;

use crate::genetic_map::GeneticMap;
use crate::ibs::counts::{IbsCounts, MAX_LOCAL_HAPS};
use crate::ibs::global::{GlobalIbsParams, GlobalIbsProbs};
use crate::ibs::IbsLengthProbs;
use crate::logging::init_logging;
use crate::markers::Orientation;
use crate::model::ends::{IbdEnds, RefineParams};
use crate::model::quantiles::{ModelParams, QuantileEstimator};
use crate::pipeline::{output_header, run_pipeline, PipelineOpts};
use crate::segments::SegmentParser;
use crate::util::{create_out_directory, open_text_reader};
use crate::vcf::read_phased_vcf;

#[derive(Args)]
pub struct EstimateEnds {
    /// IBD segment file with records sample1 hap1 sample2 hap2 chrom start
    /// end, plain or gzipped.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'i', long)]
    ibd: PathBuf,
    /// Phased VCF holding the haplotype panel the segments were called on,
    /// plain or gzipped.
    #[clap(help_heading = "Input Options")]
    #[arg(long)]
    vcf: PathBuf,
    /// PLINK-format genetic map (chrom id cM bp), plain or gzipped.
    #[clap(help_heading = "Input Options")]
    #[arg(short = 'm', long)]
    map: PathBuf,
    /// Use only VCF records from this chromosome; required when the VCF
    /// contains more than one.
    #[clap(help_heading = "Input Options")]
    #[arg(long)]
    chrom: Option<String>,
    /// Path to the output table, block-gzipped when it ends in .gz.
    #[clap(help_heading = "Output Options")]
    #[arg(short = 'o', long)]
    out: PathBuf,
    /// Force overwrite of the output file.
    #[clap(help_heading = "Output Options")]
    #[arg(long, default_value_t = false)]
    force: bool,

    /// Endpoint quantiles to report, each strictly between 0 and 1.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, value_delimiter = ',', default_values_t = vec![0.5])]
    quantiles: Vec<f64>,
    /// Number of additional sampled endpoint draws per segment.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 0)]
    nsamples: usize,
    /// Baseline per-site allele discordance probability inside an IBD
    /// segment.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 1e-3)]
    err: f64,
    /// Report the aggregate allele discordance rate over the refined
    /// segment interiors.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = false)]
    estimate_err: bool,
    /// Per-site discordance rate within a gene-conversion tract.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 0.05)]
    gc_err: f64,
    /// Maximum gene-conversion tract length in base pairs.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 1000)]
    gc_bp: i64,
    /// Minimum minor allele frequency for retaining a marker.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 0.0)]
    min_maf: f64,
    /// Constant effective population size of the coalescent length prior.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 10_000.0)]
    ne: f64,
    /// Per-side cap on endpoint refinement iterations.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 12)]
    max_its: usize,
    /// Keep the focus at the initial segment midpoint between iterations.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = false)]
    fix_focus: bool,
    /// Probability used for the internal convergence endpoint.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 0.05, hide_short_help = true)]
    length_quantile: f64,
    /// Relative Morgan change below which an endpoint counts as converged.
    #[clap(help_heading = "Estimation Options")]
    #[arg(long, default_value_t = 0.01, hide_short_help = true)]
    max_diff: f64,

    /// Cap on the haplotypes sampled for the local IBS count table.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 5000, hide_short_help = true)]
    local_haps: usize,
    /// Fraction of local IBS probability mass covered before a count row is
    /// truncated.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 0.999, hide_short_help = true)]
    max_local_cdf: f64,
    /// Number of random foci sampled for the pooled IBS length
    /// distribution.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 1000, hide_short_help = true)]
    global_pos: usize,
    /// Haplotype pair draws per sampled focus.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 200, hide_short_help = true)]
    global_segments: usize,
    /// Quantile probed per focus by the outlier filter.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 0.9, hide_short_help = true)]
    global_quantile: f64,
    /// A focus is dropped when its probed length exceeds this multiple of
    /// the median.
    #[clap(help_heading = "IBS Model Options")]
    #[arg(long, default_value_t = 3.0, hide_short_help = true)]
    global_factor: f64,

    /// Number of worker threads.
    #[clap(help_heading = "Compute Options")]
    #[arg(short = 't', long, default_value_t = 4)]
    threads: usize,
    /// Seed for all randomised sampling.
    #[clap(help_heading = "Compute Options")]
    #[arg(long, default_value_t = 1)]
    seed: u64,
    /// Path to file to write run log.
    #[clap(help_heading = "Logging Options")]
    #[arg(long, alias = "log")]
    log_filepath: Option<PathBuf>,
    /// Disable the progress counters.
    #[clap(help_heading = "Logging Options")]
    #[arg(long, default_value_t = false)]
    suppress_progress: bool,
}

impl EstimateEnds {
    pub fn run(&self) -> anyhow::Result<()> {
        let _handle = init_logging(self.log_filepath.as_ref());
        self.validate()?;

        let panel = read_phased_vcf(
            &self.vcf,
            self.chrom.as_deref(),
            self.min_maf,
        )?;
        let samples = panel.samples.clone();
        let map = Arc::new(GeneticMap::from_plink_file(
            &self.map,
            &panel.chrom,
        )?);
        info!("read {} genetic map anchors", map.n_anchors());
        let frame = Arc::new(panel.into_frame(&map).map_err(|e| anyhow!("{e}"))?);

        let local_haps = if self.local_haps > MAX_LOCAL_HAPS {
            warn!("capping local-haps at {MAX_LOCAL_HAPS}");
            MAX_LOCAL_HAPS
        } else {
            self.local_haps
        };
        let pool = ThreadPoolBuilder::new()
            .num_threads(self.threads)
            .build()
            .context("failed to build precompute thread pool")?;
        let (fwd_probs, rev_probs) =
            pool.install(|| {
                info!("building local ibs count tables");
                let counts = IbsCounts::from_frame(
                    &frame,
                    local_haps,
                    self.max_local_cdf,
                    self.seed,
                )
                .map_err(|e| anyhow!("{e}"))?;
                let rev_counts = counts.reversed();
                info!("sampling pooled one-sided ibs lengths");
                let global = Arc::new(GlobalIbsProbs::from_frame(
                    &frame,
                    &GlobalIbsParams {
                        n_positions: self.global_pos,
                        n_segments: self.global_segments,
                        trim_quantile: self.global_quantile,
                        trim_factor: self.global_factor,
                    },
                    self.seed,
                )?);
                let fwd_probs = Arc::new(IbsLengthProbs::new(
                    &frame,
                    Orientation::Forward,
                    &counts,
                    global.clone(),
                ));
                let rev_probs = Arc::new(IbsLengthProbs::new(
                    &frame,
                    Orientation::Reverse,
                    &rev_counts,
                    global,
                ));
                Ok::<_, anyhow::Error>((fwd_probs, rev_probs))
            })?;

        let parser = SegmentParser::new(
            &samples,
            frame.chrom(),
            frame.first_base(),
            frame.last_base(),
        );
        let model_params = ModelParams {
            err: self.err,
            gc_err: self.gc_err,
            gc_bp: self.gc_bp,
            ne: self.ne,
        };
        let refine_params = RefineParams {
            max_its: self.max_its,
            fix_focus: self.fix_focus,
            max_diff: self.max_diff,
        };
        let make_ends = || {
            let estimator = QuantileEstimator::new(
                frame.clone(),
                fwd_probs.clone(),
                rev_probs.clone(),
                model_params,
            );
            IbdEnds::new(map.clone(), estimator, refine_params)
        };

        let reader = open_text_reader(&self.ibd)?;
        let sink = self.create_sink()?;
        let opts = PipelineOpts {
            n_threads: self.threads,
            seed: self.seed,
            quantiles: self.quantiles.clone(),
            n_samples: self.nsamples,
            length_quantile: self.length_quantile,
            estimate_err: self.estimate_err,
            suppress_progress: self.suppress_progress,
        };
        let stats =
            run_pipeline(reader, sink, &parser, &frame, make_ends, &opts)?;

        info!(
            "finished: {} markers, {} samples, {} segments estimated, {} \
             skipped",
            frame.n_markers(),
            samples.len(),
            stats.n_segments(),
            stats.n_skipped()
        );
        if self.estimate_err {
            match stats.error_rate() {
                Some(rate) => {
                    info!("estimated allele discordance rate: {rate:.3e}")
                }
                None => info!(
                    "no segment interiors were long enough to estimate the \
                     discordance rate"
                ),
            }
        }
        Ok(())
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.quantiles.is_empty() {
            bail!("at least one quantile is required");
        }
        for &q in &self.quantiles {
            if !(q > 0.0 && q < 1.0) {
                bail!("quantile {q} is not strictly between 0 and 1");
            }
        }
        if self.threads < 1 {
            bail!("threads must be at least 1");
        }
        for (name, p) in [
            ("err", self.err),
            ("gc-err", self.gc_err),
            ("length-quantile", self.length_quantile),
            ("max-local-cdf", self.max_local_cdf),
            ("global-quantile", self.global_quantile),
        ] {
            if !(p > 0.0 && p < 1.0) {
                bail!("{name} ({p}) is not strictly between 0 and 1");
            }
        }
        if self.gc_bp < 0 {
            bail!("gc-bp must be non-negative");
        }
        if !(0.0..=0.5).contains(&self.min_maf) {
            bail!("min-maf ({}) must be in [0, 0.5]", self.min_maf);
        }
        if !(self.ne.is_finite() && self.ne > 0.0) {
            bail!("ne ({}) must be finite and positive", self.ne);
        }
        if self.local_haps < 2 {
            bail!("local-haps must be at least 2");
        }
        if self.global_pos < 1 || self.global_segments < 1 {
            bail!("global-pos and global-segments must be at least 1");
        }
        if self.global_factor <= 1.0 {
            bail!("global-factor must exceed 1");
        }
        if self.max_its < 1 {
            bail!("max-its must be at least 1");
        }
        if !(self.max_diff > 0.0) {
            bail!("max-diff must be positive");
        }
        for input in [&self.ibd, &self.vcf, &self.map] {
            if input == &self.out {
                bail!(
                    "output file {:?} collides with an input file",
                    self.out
                );
            }
        }
        Ok(())
    }

    fn create_sink(&self) -> anyhow::Result<Box<dyn Write + Send>> {
        create_out_directory(&self.out)?;
        if self.out.exists() && !self.force {
            bail!(
                "refusing to write over existing file {:?}, use --force",
                self.out
            );
        }
        let fh = File::create(&self.out).context(format!(
            "failed to create output file {:?}",
            self.out
        ))?;
        let header = output_header(&self.quantiles, self.nsamples);
        let gzip = self
            .out
            .extension()
            .map(|ext| ext == "gz" || ext == "bgz")
            .unwrap_or(false);
        let mut sink: Box<dyn Write + Send> = if gzip {
            let writer: ParCompress<Bgzf> = ParCompressBuilder::new()
                .num_threads(self.threads)
                .map_err(|e| anyhow!("{e}"))?
                .from_writer(fh);
            Box::new(writer)
        } else {
            Box::new(BufWriter::new(fh))
        };
        sink.write_all(header.as_bytes())?;
        Ok(sink)
    }
}
