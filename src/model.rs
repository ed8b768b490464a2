pub mod db_model;
pub mod sequence;

pub use db_model::*;
pub use sequence::*;
