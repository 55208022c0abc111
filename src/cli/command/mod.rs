pub mod coords;
pub mod hsp;
pub mod status;

pub use coords::coords;
pub use hsp::hsp;
pub use status::status;
