use thiserror::Error;

pub type EndsResult<T> = Result<T, EndsError>;

#[derive(Error, Debug, PartialEq)]
pub enum EndsError {
    #[error("unknown sample {0}")]
    SampleMissing(String),
    #[error("unknown chromosome {0}")]
    ChromMissing(String),
    #[error("haplotype designator {0} must be 1 or 2")]
    InvalidHaplotype(String),
    #[error("segment start {start} is past inclusive end {end}")]
    InvalidSegmentInterval { start: i64, end: i64 },
    #[error("segment record has {0} fields, expected at least 7")]
    TruncatedSegmentRecord(usize),
    #[error("failed to parse {0} as an integer")]
    InvalidIntegerField(String),
    #[error("fewer than two haplotypes ({0})")]
    TooFewHaplotypes(usize),
    #[error("inconsistent marker data, {0}")]
    InconsistentMarkerData(String),
    #[error("ordered pair count for {0} haplotypes overflows the count table")]
    PairCountOverflow(usize),
    #[error("invalid probability {0}")]
    InvalidProbability(f64),
    #[error("effective population size {0} must be finite and positive")]
    InvalidNe(f64),
    #[error("endpoint cdf accumulated no probability mass")]
    EmptyCdf,
}
