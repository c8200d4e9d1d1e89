//! ABOUTME: Extraction, transformation, and verification task handlers plus their HTTP collaborators
//! ABOUTME: Each module pairs an opaque collaborator trait set with the TaskHandler that drives it

pub mod collaborators;
pub mod extraction;
pub mod transformation;
pub mod verification;

pub use collaborators::{
    ArticleDescriptor, DocStore, Enrichment, HttpDocStore, HttpLlmClient, HttpScraper, HttpVectorIndex,
    HttpWebSearch, LlmClient, Scraper, Verdict, VectorIndex, WebSearch,
};
pub use extraction::ExtractionHandler;
pub use transformation::TransformationHandler;
pub use verification::VerificationHandler;
