use std::io::BufRead;
use std::path::Path;

use anyhow::{bail, Context};
use log::info;

use crate::util::open_text_reader;

/// Minimum genetic distance between consecutive map anchors, in cM. Anchors
/// closer than this are lifted so interpolation never yields a flat or
/// decreasing segment.
const MIN_CM_DIST: f64 = 1e-6;

/// Base-pair to centiMorgan interpolation built from a PLINK-format genetic
/// map (`chrom id cM bp` records). Positions outside the anchor range are
/// extrapolated with the terminal interval slope.
#[derive(Debug, Clone)]
pub struct GeneticMap {
    base: Vec<i64>,
    cm: Vec<f64>,
}

impl GeneticMap {
    pub fn from_plink_file(
        path: &Path,
        chrom: &str,
    ) -> anyhow::Result<GeneticMap> {
        let reader = open_text_reader(path)?;
        let mut base = Vec::new();
        let mut cm = Vec::new();
        for (i, line) in reader.lines().enumerate() {
            let line = line.context("failed to read genetic map")?;
            if line.trim().is_empty() {
                continue;
            }
            let fields = line.split_ascii_whitespace().collect::<Vec<&str>>();
            if fields.len() < 4 {
                bail!(
                    "genetic map line {} has {} fields, expected 4",
                    i + 1,
                    fields.len()
                );
            }
            if fields[0] != chrom {
                continue;
            }
            let gen_pos = fields[2].parse::<f64>().context(format!(
                "failed to parse genetic position {}",
                fields[2]
            ))?;
            let bp = fields[3].parse::<i64>().context(format!(
                "failed to parse base position {}",
                fields[3]
            ))?;
            base.push(bp);
            cm.push(gen_pos);
        }
        Self::new(base, cm).context(format!(
            "invalid genetic map for chromosome {chrom} in {}",
            path.to_string_lossy()
        ))
    }

    pub fn new(base: Vec<i64>, mut cm: Vec<f64>) -> anyhow::Result<GeneticMap> {
        if base.len() != cm.len() {
            bail!(
                "map arrays disagree, {} base positions and {} genetic \
                 positions",
                base.len(),
                cm.len()
            );
        }
        if base.len() < 2 {
            bail!("map has {} anchors, at least 2 are required", base.len());
        }
        for w in base.windows(2) {
            if w[1] <= w[0] {
                bail!("map base positions not strictly increasing at {}", w[1]);
            }
        }
        if cm.iter().any(|g| !g.is_finite()) {
            bail!("map contains a non-finite genetic position");
        }
        let mut lifted = 0usize;
        for i in 1..cm.len() {
            let floor = cm[i - 1] + MIN_CM_DIST;
            if cm[i] < floor {
                cm[i] = floor;
                lifted += 1;
            }
        }
        if lifted > 0 {
            info!("lifted {lifted} map anchors to enforce minimum spacing");
        }
        Ok(GeneticMap { base, cm })
    }

    /// Genetic position in cM at a base-pair coordinate.
    pub fn gen_pos(&self, bp: i64) -> f64 {
        let n = self.base.len();
        let i = self.base.partition_point(|&b| b < bp);
        let (lo, hi) = if i == 0 {
            (0, 1)
        } else if i == n {
            (n - 2, n - 1)
        } else {
            (i - 1, i)
        };
        let slope = (self.cm[hi] - self.cm[lo])
            / (self.base[hi] - self.base[lo]) as f64;
        self.cm[lo] + (bp - self.base[lo]) as f64 * slope
    }

    /// Genetic position in Morgans at a base-pair coordinate.
    pub fn morgans(&self, bp: i64) -> f64 {
        self.gen_pos(bp) / 100.0
    }

    pub fn n_anchors(&self) -> usize {
        self.base.len()
    }
}
