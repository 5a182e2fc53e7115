#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, allow(unused_attributes))]

//! # kestrel-rpc-codec
//!
//! This crate provides the built-in `Serializer` and `Compressor` extensions for `kestrel-rpc`:
//!
//! | name | kind | wire id |
//! |---|---|---|
//! | `msgpack` | serializer | 1 |
//! | `json` | serializer | 2 |
//! | `none` | compressor | 0 |
//! | `gzip` | compressor | 1 |

use kestrel_rpc_core::codec::Compressor;
use kestrel_rpc_core::extension::ExtensionsBuilder;
use std::io;
use std::sync::Arc;

mod json;
pub use json::*;
#[cfg(feature = "msgpack")]
mod msgpack;
#[cfg(feature = "msgpack")]
pub use msgpack::*;
#[cfg(feature = "gzip")]
mod gzip;
#[cfg(feature = "gzip")]
pub use gzip::*;

/// Pass the body through untouched
#[derive(Default)]
pub struct NoneCompressor();

impl NoneCompressor {
    pub const NAME: &'static str = "none";
    pub const ID: u8 = 0;
}

impl Compressor for NoneCompressor {
    #[inline]
    fn compress(&self, buf: &[u8]) -> io::Result<Vec<u8>> {
        Ok(buf.to_vec())
    }

    #[inline]
    fn decompress(&self, buf: &[u8]) -> io::Result<Vec<u8>> {
        Ok(buf.to_vec())
    }
}

/// Register every serializer and compressor enabled by crate features
pub fn register_codecs(builder: &mut ExtensionsBuilder) {
    builder.serializer(JsonSerializer::NAME, JsonSerializer::ID, || Arc::new(JsonSerializer::default()));
    #[cfg(feature = "msgpack")]
    builder.serializer(MsgpSerializer::NAME, MsgpSerializer::ID, || Arc::new(MsgpSerializer::default()));
    builder.compressor(NoneCompressor::NAME, NoneCompressor::ID, || Arc::new(NoneCompressor::default()));
    #[cfg(feature = "gzip")]
    builder.compressor(GzipCompressor::NAME, GzipCompressor::ID, || Arc::new(GzipCompressor::default()));
}
