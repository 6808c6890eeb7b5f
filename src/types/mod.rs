mod analysis;
mod models;

pub use analysis::*;
pub use models::*;
