//! Object Store Adapter
//!
//! A narrow, content-agnostic key -> bytes store. Two backends share the
//! same `ObjectStore` contract: `S3ObjectStore` for production (MinIO,
//! Cloudflare R2, Backblaze B2, AWS S3) and `FsObjectStore` for local
//! development. The backend is picked once at boot from configuration,
//! never by probing at request time.

mod fs_store;
mod object_store;
mod s3_store;

pub use fs_store::FsObjectStore;
pub use object_store::{ByteChunkStream, ObjectStore};
pub use s3_store::S3ObjectStore;
