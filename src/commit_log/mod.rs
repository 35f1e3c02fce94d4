#[allow(clippy::module_inception)]
pub(crate) mod commit_log;
pub mod dump;
pub mod read_range;
pub mod stat;
