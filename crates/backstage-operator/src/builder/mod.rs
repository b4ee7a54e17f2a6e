pub mod meta;
pub mod pod;
