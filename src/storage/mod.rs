//! Storage abstractions.
//!
//! Five trait-shaped seams (metadata, OLAP, cache, blob, bus), each enforcing
//! tenant scoping inside the adapter rather than at call sites. Mock
//! implementations back the test suite so nothing here requires a live
//! database to exercise.

pub mod blob;
pub mod bus;
pub mod cache;
pub mod metadata;
pub mod olap;

pub use blob::{BlobRef, BlobStore, S3BlobStore};
pub use bus::{
    complete_subject, progress_subject, submit_subject, tail_subject, CompleteEvent, MessageBus,
    ProgressEvent, RedisBus, SubmitDelivery, SubmitEvent,
};
pub use cache::{Cache, RateDecision, RedisCache, TenantKey};
pub use metadata::{MetadataStore, NewAiInteraction, PgMetadataStore};
pub use olap::{ClickHouseStore, OlapStore, SearchRequest, SearchResults, TypeCount};
