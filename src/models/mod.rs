pub mod scan_step;
pub mod session;
pub mod weight;

pub use scan_step::ScanStep;
pub use session::SessionStatus;
pub use weight::{Weight, WeightUnit};
