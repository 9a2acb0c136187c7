pub mod body_scan;
pub mod completed_scan;

pub use body_scan::BodyScanRecord;
pub use completed_scan::CompletedScanRecord;
