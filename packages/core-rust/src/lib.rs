//! `Surge` Core: write records, batch outcomes, the store error taxonomy and
//! the backing-store contract shared by the pipeline and store implementations.

pub mod error;
pub mod traits;
pub mod types;

pub use error::StoreError;
pub use traits::BackingStore;
pub use types::{BatchWriteResult, Document, RecordId, WriteRecord};
