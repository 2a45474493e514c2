pub mod gateway;
pub mod memory;
pub mod postgres;

pub use gateway::{CorpusFilter, PersistenceGateway};
pub use memory::InMemoryGateway;
pub use postgres::PgGateway;
