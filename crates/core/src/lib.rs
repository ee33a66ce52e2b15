//! Domain layer for repository activity ingestion.
//!
//! Webhook deliveries flow through [`pipeline::IngestionPipeline`]:
//! the body is authenticated by [`signature::SignatureVerifier`], mapped onto
//! an [`types::ActivityRecord`] by [`classifier::EventClassifier`] (with
//! [`timestamp::TimestampNormalizer`] handling time zones) and handed to an
//! [`store::ActivityStore`].

pub mod classifier;
pub mod pipeline;
pub mod signature;
pub mod store;
pub mod timestamp;
pub mod types;
