//! Contributor ranking and identity mapping.
//!
//! Ranking feeds mapping: the most active human contributors of a source
//! repository are bound, in order, to the synthetic identities configured for
//! a target repository. Both results are memoized per source for the whole
//! run.

pub mod cache;
pub mod mapper;
pub mod ranker;

pub use cache::MappingCache;
pub use mapper::{AuthorMapping, IdentityMapper, MappedAuthor};
pub use ranker::ContributorRanker;
