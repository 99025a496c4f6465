pub mod daemon;
pub mod query;
pub mod replay;
