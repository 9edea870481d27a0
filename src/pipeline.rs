use std::io::{BufRead, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::{anyhow, Context};
use crossbeam_channel::bounded;
use indicatif::ProgressBar;
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::errs::EndsError;
use crate::markers::MarkerFrame;
use crate::model::ends::{EndpointEstimate, IbdEnds};
use crate::segments::{segment_hash, SegmentParser, SharedSegment};
use crate::util::{get_ticker, TAB};

/// Lines handed from the reader to a worker in one batch.
pub(crate) const BLOCK_SIZE: usize = 10_000;
/// A worker hands its serialised output to the shared sink once the buffer
/// reaches this many bytes.
pub(crate) const FLUSH_THRESHOLD: usize = 1 << 18;
/// Segments shorter than this (in Morgans, between the two convergence
/// endpoints) are left out of the discordance-rate estimate.
const MIN_ERR_MORGANS: f64 = 0.02;

/// Commutative run counters, safe under concurrent increment.
#[derive(Default)]
pub struct RunStats {
    n_segments: AtomicU64,
    n_skipped: AtomicU64,
    n_discord: AtomicU64,
    n_examined: AtomicU64,
}

impl RunStats {
    pub fn n_segments(&self) -> u64 {
        self.n_segments.load(Ordering::Relaxed)
    }

    pub fn n_skipped(&self) -> u64 {
        self.n_skipped.load(Ordering::Relaxed)
    }

    /// Aggregate discordance rate over the examined segment interiors.
    pub fn error_rate(&self) -> Option<f64> {
        let examined = self.n_examined.load(Ordering::Relaxed);
        if examined == 0 {
            None
        } else {
            Some(self.n_discord.load(Ordering::Relaxed) as f64
                / examined as f64)
        }
    }
}

/// Per-run settings for the segment pipeline.
pub struct PipelineOpts {
    pub n_threads: usize,
    pub seed: u64,
    pub quantiles: Vec<f64>,
    pub n_samples: usize,
    pub length_quantile: f64,
    pub estimate_err: bool,
    pub suppress_progress: bool,
}

/// Drives per-segment endpoint estimation: one reader thread fills a bounded
/// queue with line blocks, `n_threads` workers each run their own [`IbdEnds`]
/// and flush serialised blocks atomically through the shared sink.
pub fn run_pipeline<F>(
    reader: Box<dyn BufRead + Send>,
    sink: Box<dyn Write + Send>,
    parser: &SegmentParser,
    frame: &MarkerFrame,
    make_ends: F,
    opts: &PipelineOpts,
) -> anyhow::Result<Arc<RunStats>>
where
    F: Fn() -> IbdEnds,
{
    let stats = Arc::new(RunStats::default());
    let sink: Arc<Mutex<Box<dyn Write + Send>>> = Arc::new(Mutex::new(sink));
    let (snd, rcv) = bounded::<Vec<String>>(2 * opts.n_threads);

    let ticker = get_ticker();
    if opts.suppress_progress {
        ticker.set_draw_target(indicatif::ProgressDrawTarget::hidden());
    }
    ticker.set_message("segments processed");

    thread::scope(|scope| -> anyhow::Result<()> {
        let reader_handle = scope.spawn(move || -> anyhow::Result<u64> {
            let mut n_lines = 0u64;
            let mut block = Vec::with_capacity(BLOCK_SIZE);
            for line in reader.lines() {
                let line = line.context("failed to read segment stream")?;
                if line.trim().is_empty() {
                    continue;
                }
                n_lines += 1;
                block.push(line);
                if block.len() == BLOCK_SIZE {
                    let full =
                        std::mem::replace(&mut block, Vec::with_capacity(BLOCK_SIZE));
                    snd.send(full).map_err(|_| {
                        anyhow!("all segment workers hung up early")
                    })?;
                }
            }
            if !block.is_empty() {
                snd.send(block)
                    .map_err(|_| anyhow!("all segment workers hung up early"))?;
            }
            Ok(n_lines)
        });

        let mut worker_handles = Vec::with_capacity(opts.n_threads);
        for _ in 0..opts.n_threads {
            let rcv = rcv.clone();
            let sink = sink.clone();
            let stats = stats.clone();
            let ends = make_ends();
            let ticker = ticker.clone();
            worker_handles.push(scope.spawn(move || {
                worker_loop(
                    rcv, sink, stats, parser, frame, ends, opts, ticker,
                )
            }));
        }
        drop(rcv);

        // workers are joined first so a fatal record error wins over the
        // reader noticing its receivers are gone
        for handle in worker_handles {
            handle
                .join()
                .map_err(|_| anyhow!("segment worker panicked"))??;
        }
        let n_lines = reader_handle
            .join()
            .map_err(|_| anyhow!("segment reader panicked"))??;
        debug!("segment reader finished after {n_lines} records");
        Ok(())
    })?;

    ticker.finish_and_clear();
    sink.lock()
        .map_err(|_| anyhow!("output sink poisoned"))?
        .flush()
        .context("failed to flush output")?;
    info!(
        "processed {} segments, skipped {}",
        stats.n_segments(),
        stats.n_skipped()
    );
    Ok(stats)
}

#[allow(clippy::too_many_arguments)]
fn worker_loop(
    rcv: crossbeam_channel::Receiver<Vec<String>>,
    sink: Arc<Mutex<Box<dyn Write + Send>>>,
    stats: Arc<RunStats>,
    parser: &SegmentParser,
    frame: &MarkerFrame,
    mut ends: IbdEnds,
    opts: &PipelineOpts,
    ticker: ProgressBar,
) -> anyhow::Result<()> {
    let n_quantiles = opts.quantiles.len();
    let mut probs = vec![0f64; 1 + n_quantiles + opts.n_samples];
    probs[0] = opts.length_quantile;
    probs[1..=n_quantiles].copy_from_slice(&opts.quantiles);

    let mut buf: Vec<u8> = Vec::with_capacity(FLUSH_THRESHOLD + 8192);
    for block in rcv {
        for line in &block {
            match parser.parse(line) {
                Ok(seg) => {
                    // reseeding from the segment keeps results independent
                    // of which worker picks the block up
                    let mut rng = StdRng::seed_from_u64(
                        opts.seed ^ segment_hash(&seg),
                    );
                    for slot in probs[1 + n_quantiles..].iter_mut() {
                        *slot = loop {
                            let draw: f64 = rng.gen();
                            if draw > 0.0 {
                                break draw;
                            }
                        };
                    }
                    let est = ends.estimate(&seg, &probs)?;
                    if opts.estimate_err {
                        tally_discordance(&stats, frame, &seg, &est);
                    }
                    write_record(&mut buf, line, &est)?;
                    stats.n_segments.fetch_add(1, Ordering::Relaxed);
                    ticker.inc(1);
                }
                Err(
                    EndsError::SampleMissing(_) | EndsError::ChromMissing(_),
                ) => {
                    serialize_fields(&mut buf, line);
                    buf.extend_from_slice(b"\tNIL\n");
                    stats.n_skipped.fetch_add(1, Ordering::Relaxed);
                    ticker.inc(1);
                }
                Err(e) => {
                    return Err(anyhow!("{e}")
                        .context(format!("failed to parse segment {line}")))
                }
            }
        }
        // flush only on block boundaries so a block's lines stay
        // consecutive in the output stream
        if buf.len() >= FLUSH_THRESHOLD {
            flush_block(&sink, &mut buf)?;
        }
    }
    if !buf.is_empty() {
        flush_block(&sink, &mut buf)?;
    }
    Ok(())
}

/// Writes a whole serialised block under the sink lock so its lines stay
/// consecutive in the output stream.
fn flush_block(
    sink: &Mutex<Box<dyn Write + Send>>,
    buf: &mut Vec<u8>,
) -> anyhow::Result<()> {
    let mut guard =
        sink.lock().map_err(|_| anyhow!("output sink poisoned"))?;
    guard.write_all(buf).context("failed to write output block")?;
    buf.clear();
    Ok(())
}

fn serialize_fields(buf: &mut Vec<u8>, line: &str) {
    for (i, field) in line.split_ascii_whitespace().take(7).enumerate() {
        if i > 0 {
            buf.push(TAB as u8);
        }
        buf.extend_from_slice(field.as_bytes());
    }
}

fn write_record(
    buf: &mut Vec<u8>,
    line: &str,
    est: &EndpointEstimate,
) -> anyhow::Result<()> {
    serialize_fields(buf, line);
    write!(buf, "{TAB}{}", est.focus)?;
    for (bwd, fwd) in est.bwd.iter().zip(est.fwd.iter()).skip(1) {
        let cm = 100.0 * (fwd.morgan - bwd.morgan);
        write!(buf, "{TAB}{}{TAB}{}{TAB}{cm:.4}", bwd.base, fwd.base)?;
    }
    buf.push(b'\n');
    Ok(())
}

/// Counts allele discordances between the segment's haplotypes across the
/// converged interior, feeding the aggregate error-rate estimate.
fn tally_discordance(
    stats: &RunStats,
    frame: &MarkerFrame,
    seg: &SharedSegment,
    est: &EndpointEstimate,
) {
    let lo_m = est.bwd[0].morgan;
    let hi_m = est.fwd[0].morgan;
    if hi_m - lo_m < MIN_ERR_MORGANS {
        return;
    }
    let positions = frame.fwd_base();
    let lo = positions.partition_point(|&b| b < est.bwd[0].base);
    let hi = positions.partition_point(|&b| b <= est.fwd[0].base);
    if lo >= hi {
        return;
    }
    let mut discord = 0u64;
    for m in lo..hi {
        if frame.allele(m, seg.hap1) != frame.allele(m, seg.hap2) {
            discord += 1;
        }
    }
    stats.n_discord.fetch_add(discord, Ordering::Relaxed);
    stats.n_examined.fetch_add((hi - lo) as u64, Ordering::Relaxed);
}

/// Column header for the output table.
pub fn output_header(quantiles: &[f64], n_samples: usize) -> String {
    let mut fields = vec![
        "SAMPLE1".to_string(),
        "HAP1".to_string(),
        "SAMPLE2".to_string(),
        "HAP2".to_string(),
        "CHROM".to_string(),
        "IN_START".to_string(),
        "IN_END".to_string(),
        "FOCUS".to_string(),
    ];
    for q in quantiles {
        fields.push(format!("START_{q}"));
        fields.push(format!("END_{q}"));
        fields.push(format!("CM_{q}"));
    }
    for s in 0..n_samples {
        fields.push(format!("START_SAMPLE_{}", s + 1));
        fields.push(format!("END_SAMPLE_{}", s + 1));
        fields.push(format!("CM_SAMPLE_{}", s + 1));
    }
    let mut header = fields.join("\t");
    header.push('\n');
    header
}
