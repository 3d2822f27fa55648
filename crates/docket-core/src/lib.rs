pub mod error;
pub mod generate;
pub mod group;
pub mod http;
pub mod ingest;
pub mod model;
pub mod report;
pub mod types;

pub use error::*;
pub use types::*;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_is_set() {
        assert!(!version().is_empty());
    }
}
