//! Study level model: instance discovery from metadata, page ordering, anonymization and the
//! fetch orchestration that turns a study into an ordered list of frames.

mod anonymize;
pub mod attributes;
mod fetch;
mod instance;
mod metadata;

pub use fetch::{FetchError, FetchOptions, StudyFetch, StudyFetcher};
pub use instance::{InstanceDescriptor, OrderingKey};
pub use metadata::{SeriesSummary, StudyMetadata, StudySummary};
