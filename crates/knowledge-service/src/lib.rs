pub mod chunk;
pub mod embedding;
pub mod ingestion;
pub mod retrieval;
pub mod service;

pub use chunk::{chunk_text, ChunkParams, TextChunk};
pub use embedding::{build_deterministic_embedding, cosine_similarity};
pub use ingestion::{ingest_document, IngestionOutcome};
pub use retrieval::{BruteForceIndex, ScoredChunk, VectorIndex};
pub use service::{CreateCorpusRequest, KnowledgeService, QueryRequest};
