//! Pure functions extracting severity and timestamp from a raw text line.
//! Neither function holds state; both take the field names to probe from
//! `Config` so there is no ambient/global flag table (spec.md §9).

pub mod severity;
pub mod timestamp;

pub use severity::extract_severity;
pub use timestamp::extract_timestamp;
