pub mod graphite;
pub mod stdout;
