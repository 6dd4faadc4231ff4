//! Storage-engine substrate of an educational relational database: a
//! buffer pool manager with an LRU-K replacer, an asynchronous disk
//! scheduler, scoped page guards, and a persistent copy-on-write trie for
//! the key/value plane.

pub mod buffer;
pub mod common;
pub mod error;
pub mod storage;
pub mod trie;
