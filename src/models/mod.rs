pub mod lens;
pub mod prometheus;
