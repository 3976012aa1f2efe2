#![doc = include_str!("../README.md")]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]
#![deny(missing_docs)]

#[cfg(not(feature = "std"))]
compile_error!("`arenaskl` requires the 'std' feature to be enabled");

pub use arenaskl_allocator::{Align, Arena, ArenaOptions, Error as ArenaError};

mod error;
pub use error::Error;

mod list;
pub use list::{Cursor, Entry, Iter, SkipList};

mod node;
pub use node::{decode_meta, decode_value, encode_value, MAX_HEIGHT};
