pub(crate) const MAX_CALL_DEPTH: usize = 256;
pub(crate) const MAX_INSERT_DEPTH: usize = 64;

// `insert` given a directory loads this file from it.
pub const INDEX_FILE: &str = "index.tag";
