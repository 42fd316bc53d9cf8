pub mod bounds;
pub mod config;
pub mod errors;
pub mod run;
pub mod samples;
pub mod summary;

pub use bounds::*;
pub use config::*;
pub use errors::*;
pub use run::*;
pub use samples::*;
pub use summary::*;
