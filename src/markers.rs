use crate::errs::{EndsError, EndsResult};
use crate::genetic_map::GeneticMap;

/// Minimum genetic distance between consecutive markers, in Morgans.
pub(crate) const MIN_MORGAN_DIST: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Forward,
    Reverse,
}

/// Phased haplotype alleles and positions for the markers of one chromosome.
///
/// Allele storage is marker-major. Base-pair and Morgan positions are kept in
/// both orientations: the reverse arrays satisfy
/// `rev_base[i] == -fwd_base[m - 1 - i]` (and likewise for Morgans) so that
/// both are strictly increasing and backward scans reuse the forward
/// machinery unchanged.
#[derive(Debug)]
pub struct MarkerFrame {
    chrom: String,
    n_alleles: Vec<u8>,
    alleles: Vec<Vec<u8>>,
    fwd_base: Vec<i64>,
    fwd_morgan: Vec<f64>,
    rev_base: Vec<i64>,
    rev_morgan: Vec<f64>,
    monomorphic: Vec<bool>,
    n_haps: usize,
}

impl MarkerFrame {
    pub fn new(
        chrom: String,
        positions: Vec<i64>,
        n_alleles: Vec<u8>,
        alleles: Vec<Vec<u8>>,
        map: &GeneticMap,
    ) -> EndsResult<MarkerFrame> {
        let n_markers = positions.len();
        if n_markers == 0 {
            return Err(EndsError::InconsistentMarkerData(
                "no markers".to_string(),
            ));
        }
        if n_alleles.len() != n_markers || alleles.len() != n_markers {
            return Err(EndsError::InconsistentMarkerData(format!(
                "{} positions, {} allele counts, {} allele rows",
                n_markers,
                n_alleles.len(),
                alleles.len()
            )));
        }
        let n_haps = alleles[0].len();
        if n_haps < 2 {
            return Err(EndsError::TooFewHaplotypes(n_haps));
        }
        for w in positions.windows(2) {
            if w[1] <= w[0] {
                return Err(EndsError::InconsistentMarkerData(format!(
                    "base positions not strictly increasing at {}",
                    w[1]
                )));
            }
        }
        let mut monomorphic = Vec::with_capacity(n_markers);
        for (m, row) in alleles.iter().enumerate() {
            if row.len() != n_haps {
                return Err(EndsError::InconsistentMarkerData(format!(
                    "marker {m} carries {} alleles, expected {n_haps}",
                    row.len()
                )));
            }
            if row.iter().any(|&a| a >= n_alleles[m].max(1)) {
                return Err(EndsError::InconsistentMarkerData(format!(
                    "allele out of range at marker {m}"
                )));
            }
            monomorphic.push(row.iter().all(|&a| a == row[0]));
        }

        let mut fwd_morgan = Vec::with_capacity(n_markers);
        for (i, &bp) in positions.iter().enumerate() {
            let mut g = map.morgans(bp);
            if i > 0 {
                let floor: f64 = fwd_morgan[i - 1] + MIN_MORGAN_DIST;
                if g < floor {
                    g = floor;
                }
            }
            fwd_morgan.push(g);
        }
        let rev_base =
            positions.iter().rev().map(|&b| -b).collect::<Vec<i64>>();
        let rev_morgan =
            fwd_morgan.iter().rev().map(|&g| -g).collect::<Vec<f64>>();

        Ok(MarkerFrame {
            chrom,
            n_alleles,
            alleles,
            fwd_base: positions,
            fwd_morgan,
            rev_base,
            rev_morgan,
            monomorphic,
            n_haps,
        })
    }

    pub fn chrom(&self) -> &str {
        &self.chrom
    }

    pub fn n_markers(&self) -> usize {
        self.fwd_base.len()
    }

    pub fn n_haps(&self) -> usize {
        self.n_haps
    }

    pub fn max_alleles(&self) -> u8 {
        self.n_alleles.iter().copied().max().unwrap_or(1)
    }

    pub fn first_base(&self) -> i64 {
        self.fwd_base[0]
    }

    pub fn last_base(&self) -> i64 {
        *self.fwd_base.last().unwrap_or(&0)
    }

    pub fn fwd_base(&self) -> &[i64] {
        &self.fwd_base
    }

    pub fn fwd_morgan(&self) -> &[f64] {
        &self.fwd_morgan
    }

    #[inline]
    pub fn allele(&self, marker: usize, hap: usize) -> u8 {
        self.alleles[marker][hap]
    }

    #[inline]
    pub fn n_alleles(&self, marker: usize) -> u8 {
        self.n_alleles[marker]
    }

    #[inline]
    pub fn is_monomorphic(&self, marker: usize) -> bool {
        self.monomorphic[marker]
    }

    pub fn oriented(&self, orientation: Orientation) -> OrientedFrame<'_> {
        OrientedFrame { frame: self, orientation }
    }
}

/// Read-time index-remapping view over a [`MarkerFrame`]: in reverse
/// orientation index `i` reads marker `m - 1 - i` and positions come from the
/// negated mirrors, so callers can treat both directions as a forward scan
/// over increasing coordinates.
#[derive(Clone, Copy)]
pub struct OrientedFrame<'a> {
    frame: &'a MarkerFrame,
    orientation: Orientation,
}

impl<'a> OrientedFrame<'a> {
    #[inline]
    fn map(&self, i: usize) -> usize {
        match self.orientation {
            Orientation::Forward => i,
            Orientation::Reverse => self.frame.n_markers() - 1 - i,
        }
    }

    pub fn n_markers(&self) -> usize {
        self.frame.n_markers()
    }

    pub fn n_haps(&self) -> usize {
        self.frame.n_haps
    }

    #[inline]
    pub fn allele(&self, marker: usize, hap: usize) -> u8 {
        self.frame.alleles[self.map(marker)][hap]
    }

    #[inline]
    pub fn n_alleles(&self, marker: usize) -> u8 {
        self.frame.n_alleles[self.map(marker)]
    }

    #[inline]
    pub fn is_monomorphic(&self, marker: usize) -> bool {
        self.frame.monomorphic[self.map(marker)]
    }

    #[inline]
    pub fn base(&self, marker: usize) -> i64 {
        match self.orientation {
            Orientation::Forward => self.frame.fwd_base[marker],
            Orientation::Reverse => self.frame.rev_base[marker],
        }
    }

    #[inline]
    pub fn morgan(&self, marker: usize) -> f64 {
        match self.orientation {
            Orientation::Forward => self.frame.fwd_morgan[marker],
            Orientation::Reverse => self.frame.rev_morgan[marker],
        }
    }

    fn base_positions(&self) -> &[i64] {
        match self.orientation {
            Orientation::Forward => &self.frame.fwd_base,
            Orientation::Reverse => &self.frame.rev_base,
        }
    }

    /// Index of the first marker strictly past `base_pos`, `n_markers()` if
    /// every marker is at or before it.
    pub fn first_past(&self, base_pos: i64) -> usize {
        self.base_positions().partition_point(|&b| b <= base_pos)
    }

    /// First marker at or after `from` where the two haplotypes disagree,
    /// `n_markers()` if they agree through the end of the chromosome.
    pub fn next_discord(&self, h1: usize, h2: usize, from: usize) -> usize {
        let n = self.n_markers();
        let mut m = from;
        while m < n {
            if self.allele(m, h1) != self.allele(m, h2) {
                return m;
            }
            m += 1;
        }
        n
    }
}

#[cfg(test)]
pub(crate) mod test_frames {
    use super::MarkerFrame;
    use crate::genetic_map::GeneticMap;

    /// Five markers at 100..=500 bp, 1 cM apart, with the given biallelic
    /// haplotype columns (one inner vec per marker).
    pub(crate) fn five_marker_frame(alleles: Vec<Vec<u8>>) -> MarkerFrame {
        let map = GeneticMap::new(
            vec![100, 200, 300, 400, 500],
            vec![0.0, 1.0, 2.0, 3.0, 4.0],
        )
        .unwrap();
        MarkerFrame::new(
            "1".to_string(),
            vec![100, 200, 300, 400, 500],
            vec![2; 5],
            alleles,
            &map,
        )
        .unwrap()
    }
}

#[cfg(test)]
mod marker_frame_tests {
    use assert_approx_eq::assert_approx_eq;

    use super::test_frames::five_marker_frame;
    use super::{MarkerFrame, Orientation};
    use crate::errs::EndsError;
    use crate::genetic_map::GeneticMap;

    #[test]
    fn test_reverse_mirrors() {
        let frame = five_marker_frame(vec![vec![0, 0, 1, 1]; 5]);
        let m = frame.n_markers();
        let fwd = frame.oriented(Orientation::Forward);
        let rev = frame.oriented(Orientation::Reverse);
        for i in 0..m {
            assert_eq!(rev.base(i), -fwd.base(m - 1 - i));
            assert_approx_eq!(rev.morgan(i), -fwd.morgan(m - 1 - i));
        }
        // both orientations strictly increasing
        for i in 1..m {
            assert!(fwd.base(i) > fwd.base(i - 1));
            assert!(rev.base(i) > rev.base(i - 1));
            assert!(rev.morgan(i) > rev.morgan(i - 1));
        }
    }

    #[test]
    fn test_next_discord_both_orientations() {
        let mut alleles = vec![vec![0u8, 0, 0, 0]; 5];
        alleles[3] = vec![0, 1, 0, 0];
        let frame = five_marker_frame(alleles);
        let fwd = frame.oriented(Orientation::Forward);
        assert_eq!(fwd.next_discord(0, 1, 0), 3);
        assert_eq!(fwd.next_discord(0, 1, 4), 5);
        assert_eq!(fwd.next_discord(2, 3, 0), 5);
        let rev = frame.oriented(Orientation::Reverse);
        // marker 3 forward is index 1 reversed
        assert_eq!(rev.next_discord(0, 1, 0), 1);
        assert_eq!(rev.next_discord(0, 1, 2), 5);
    }

    #[test]
    fn test_first_past() {
        let frame = five_marker_frame(vec![vec![0, 0, 1, 1]; 5]);
        let fwd = frame.oriented(Orientation::Forward);
        assert_eq!(fwd.first_past(99), 0);
        assert_eq!(fwd.first_past(100), 1);
        assert_eq!(fwd.first_past(300), 3);
        assert_eq!(fwd.first_past(500), 5);
        let rev = frame.oriented(Orientation::Reverse);
        assert_eq!(rev.first_past(-300), 3);
    }

    #[test]
    fn test_morgan_floor_enforced() {
        let map = GeneticMap::new(vec![100, 500], vec![0.0, 1.0]).unwrap();
        let frame = MarkerFrame::new(
            "1".to_string(),
            vec![100, 101, 102],
            vec![2; 3],
            vec![vec![0, 1]; 3],
            &map,
        )
        .unwrap();
        let fwd = frame.oriented(Orientation::Forward);
        assert!(fwd.morgan(1) - fwd.morgan(0) >= super::MIN_MORGAN_DIST);
        assert!(fwd.morgan(2) - fwd.morgan(1) >= super::MIN_MORGAN_DIST);
    }

    #[test]
    fn test_rejects_single_haplotype() {
        let map = GeneticMap::new(vec![100, 500], vec![0.0, 1.0]).unwrap();
        let err = MarkerFrame::new(
            "1".to_string(),
            vec![100],
            vec![2],
            vec![vec![0]],
            &map,
        )
        .unwrap_err();
        assert_eq!(err, EndsError::TooFewHaplotypes(1));
    }

    #[test]
    fn test_monomorphic_flag() {
        let mut alleles = vec![vec![0u8, 0, 0, 0]; 5];
        alleles[2] = vec![0, 1, 0, 1];
        let frame = five_marker_frame(alleles);
        let fwd = frame.oriented(Orientation::Forward);
        assert!(fwd.is_monomorphic(0));
        assert!(!fwd.is_monomorphic(2));
    }
}
