//! Content-Encoding decompression.

use crate::http::HeaderList;
use crate::http::HttpMethod;
use brotli::Decompressor;
use df_core::FetchError;
use df_core::FetchResult;
use flate2::read::DeflateDecoder;
use flate2::read::GzDecoder;
use flate2::read::ZlibDecoder;
use std::io::Cursor;
use std::io::Read;

/// Decompression codecs selected by the `Content-Encoding` response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentCoding {
    Identity,
    Gzip,
    Deflate,
    Brotli,
}

impl ContentCoding {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_lowercase().as_str() {
            "identity" => Some(Self::Identity),
            "gzip" | "x-gzip" => Some(Self::Gzip),
            "deflate" | "x-deflate" => Some(Self::Deflate),
            "br" => Some(Self::Brotli),
            _ => None,
        }
    }

    pub fn decode(self, body: &[u8]) -> FetchResult<Vec<u8>> {
        match self {
            Self::Identity => Ok(body.to_vec()),
            Self::Gzip => decode_gzip(body),
            Self::Deflate => decode_deflate(body),
            Self::Brotli => decode_brotli(body),
        }
    }
}

/// HEAD responses and 204/304 statuses carry no body semantics.
pub fn has_no_body(method: HttpMethod, status: u16) -> bool {
    method == HttpMethod::Head || status == 204 || status == 304
}

/// Decodes `body` per the response's `Content-Encoding`.
///
/// Bodyless exchanges and unrecognized (or absent) codings pass through
/// unchanged; a codec failure is an encoding error.
pub fn decode_body(
    method: HttpMethod,
    status: u16,
    headers: &HeaderList,
    body: Vec<u8>,
) -> FetchResult<Vec<u8>> {
    if has_no_body(method, status) || body.is_empty() {
        return Ok(body);
    }

    let Some(codings) = content_codings(headers) else {
        return Ok(body);
    };

    let mut decoded = body;
    for coding in codings.iter().rev() {
        decoded = coding.decode(&decoded)?;
    }

    Ok(decoded)
}

/// Parsed coding chain, or `None` when absent or any token is unknown.
fn content_codings(headers: &HeaderList) -> Option<Vec<ContentCoding>> {
    let mut codings = Vec::new();
    for value in headers.get_all("content-encoding") {
        for token in value.split(',') {
            if token.trim().is_empty() {
                continue;
            }
            match ContentCoding::from_token(token) {
                Some(coding) => codings.push(coding),
                None => {
                    log::debug!("passing through body with unknown content coding `{token}`");
                    return None;
                }
            }
        }
    }

    if codings.is_empty() {
        None
    } else {
        Some(codings)
    }
}

fn decode_gzip(body: &[u8]) -> FetchResult<Vec<u8>> {
    let mut decoder = GzDecoder::new(Cursor::new(body));
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        FetchError::encoding(
            "net.codec.gzip_failed",
            format!("gzip decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}

fn decode_deflate(body: &[u8]) -> FetchResult<Vec<u8>> {
    let mut zlib_decoder = ZlibDecoder::new(Cursor::new(body));
    let mut zlib_decoded = Vec::new();
    if zlib_decoder.read_to_end(&mut zlib_decoded).is_ok() {
        return Ok(zlib_decoded);
    }

    // Some servers send raw deflate streams without the zlib wrapper.
    let mut raw_decoder = DeflateDecoder::new(Cursor::new(body));
    let mut raw_decoded = Vec::new();
    raw_decoder.read_to_end(&mut raw_decoded).map_err(|error| {
        FetchError::encoding(
            "net.codec.deflate_failed",
            format!("deflate decode failed: {error}"),
        )
    })?;
    Ok(raw_decoded)
}

fn decode_brotli(body: &[u8]) -> FetchResult<Vec<u8>> {
    let mut decoder = Decompressor::new(Cursor::new(body), 4096);
    let mut decoded = Vec::new();
    decoder.read_to_end(&mut decoded).map_err(|error| {
        FetchError::encoding(
            "net.codec.brotli_failed",
            format!("brotli decode failed: {error}"),
        )
    })?;
    Ok(decoded)
}
