//! Background enrichment of list items with per-item detail
//!
//! See [`Enhancer`].

mod enhancer;

pub use enhancer::{DEFAULT_ENHANCE_WORKERS, EnhancementJob, Enhancer, EnhancerConfig, detail_key};
