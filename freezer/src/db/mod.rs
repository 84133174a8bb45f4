//! Database access: connection pool, revision table and blob encoding.

pub mod codec;
pub mod connection;
pub mod revisions;

pub use codec::{BincodeCodec, BlobCodec, Payload};
pub use connection::{close_pool, create_pool, DbPool};
pub use revisions::{Revision, RevisionStore, RevisionWrite, SqliteRevisionStore};
