//! Relative-time feature construction: bins anchored on a per-subject date,
//! aggregation of scored events into those bins, and pivoting into one
//! feature vector per subject.

pub mod aggregate;
pub mod bins;
pub mod pivot;
