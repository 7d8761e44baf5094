//! Tools for working with classic Mac OS files in Rust.
//!
//! At the moment this crate knows how to take apart BinHex 4.0 archives; see the [`binhex`]
//! module.

pub mod binhex;
