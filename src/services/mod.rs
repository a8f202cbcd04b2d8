pub mod assembler;
pub mod fields;
pub mod normalizer;
pub mod nrv;
pub mod nutrition;
pub mod span_index;
