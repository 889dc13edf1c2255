pub mod service;
pub mod types;

pub use service::{parse_porcelain_status, GitService};
pub use types::*;
