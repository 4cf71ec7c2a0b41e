pub mod analysis;
pub mod paper;
pub mod settings;
pub mod stats;
pub mod tag;
pub mod user;

pub use analysis::*;
pub use paper::*;
pub use settings::*;
pub use stats::*;
pub use tag::*;
pub use user::*;
