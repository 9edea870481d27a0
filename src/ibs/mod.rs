pub mod counts;
pub mod global;
pub mod length;

pub use counts::IbsCounts;
pub use global::GlobalIbsProbs;
pub use length::IbsLengthProbs;
