//! Byte-range I/O.
//!
//! Everything above this layer reads COGs through [`RangeReader`]: S3 objects
//! via ranged GETs, local files via seek + read, or bytes already in memory.
//! [`BlockCache`] sits in front of any of them.

mod block_cache;
mod local_reader;
mod range_reader;
mod s3_reader;

pub use block_cache::{BlockCache, DEFAULT_BLOCK_CACHE_CAPACITY, DEFAULT_BLOCK_SIZE};
pub use local_reader::LocalRangeReader;
pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le,
    MemoryRangeReader, RangeReader,
};
pub use s3_reader::{create_s3_client, S3RangeReader};
