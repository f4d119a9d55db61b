//! PDF writing: object serialization and incremental updates.
//!
//! Signature workflows never rewrite a document. Every mutation (field
//! values, widget annotations, the signature dictionary itself, the DSS)
//! is appended as an incremental revision so that the bytes covered by
//! previously written signatures stay untouched.

mod incremental;
mod serializer;

pub use incremental::IncrementalUpdate;
pub use serializer::ObjectSerializer;
