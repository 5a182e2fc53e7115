use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use kestrel_rpc_core::codec::Compressor;
use std::io::{self, Read, Write};

#[derive(Default)]
pub struct GzipCompressor();

impl GzipCompressor {
    pub const NAME: &'static str = "gzip";
    pub const ID: u8 = 1;
}

impl Compressor for GzipCompressor {
    fn compress(&self, buf: &[u8]) -> io::Result<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::with_capacity(buf.len() / 2 + 32), Compression::default());
        encoder.write_all(buf)?;
        encoder.finish()
    }

    fn decompress(&self, buf: &[u8]) -> io::Result<Vec<u8>> {
        let mut decoder = GzDecoder::new(buf);
        let mut out = Vec::with_capacity(buf.len() * 2);
        decoder.read_to_end(&mut out)?;
        Ok(out)
    }
}
