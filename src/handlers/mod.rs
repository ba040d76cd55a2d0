pub mod annotations;
pub mod explain;
pub mod format;
pub mod health;
pub mod page_config;
pub mod parse;
