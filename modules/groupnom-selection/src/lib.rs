pub mod catalog;
pub mod chain_cache;
pub mod diversify;
pub mod geo_index;
pub mod pg_catalog;
pub mod scoring;
pub mod selector;
pub mod traits;

pub use catalog::{read_json_file, Catalog, CatalogQuery, MemoryCatalog};
pub use chain_cache::{chain_key, ChainCache};
pub use geo_index::{CellCover, CellId, Resolution, RingSpan};
pub use pg_catalog::PgCatalog;
pub use scoring::{ScoreBreakdown, ScoredCandidate};
pub use selector::{CandidateSelector, SelectionRequest, SharedChainCache};
pub use traits::{
    CandidateOutcome, ChainNameSource, ExposureCounter, NoopEnricher, NoopExposureCounter,
    NoopOutcomeRecorder, OutcomeRecorder, PhotoEnricher,
};
