//! `data:` URL decoding.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use df_core::FetchError;
use df_core::FetchResult;
use url::Url;

pub const DEFAULT_MEDIA_TYPE: &str = "text/plain;charset=US-ASCII";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUrl {
    pub media_type: String,
    pub body: Vec<u8>,
}

pub trait DataUrlDecoder: Send + Sync {
    fn decode(&self, url: &Url) -> FetchResult<DataUrl>;
}

/// RFC 2397 decoder: `data:[<mediatype>][;base64],<data>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rfc2397Decoder;

impl DataUrlDecoder for Rfc2397Decoder {
    fn decode(&self, url: &Url) -> FetchResult<DataUrl> {
        if url.scheme() != "data" {
            return Err(FetchError::network(
                "fetch.data_url.scheme",
                format!("`{url}` is not a data URL"),
            ));
        }

        // The fragment is not part of the payload.
        let serialized = url.as_str();
        let serialized = match serialized.find('#') {
            Some(index) => &serialized[..index],
            None => serialized,
        };
        let Some((header, payload)) = serialized["data:".len()..].split_once(',') else {
            return Err(FetchError::network(
                "fetch.data_url.malformed",
                "data URL has no `,` separating metadata from payload",
            ));
        };

        let (media_type, is_base64) = split_header(header);
        let decoded = percent_decode(payload.as_bytes());
        let body = if is_base64 {
            let compact: Vec<u8> = decoded
                .into_iter()
                .filter(|byte| !byte.is_ascii_whitespace())
                .collect();
            STANDARD.decode(&compact).map_err(|error| {
                FetchError::network(
                    "fetch.data_url.base64_invalid",
                    format!("invalid base64 in data URL: {error}"),
                )
            })?
        } else {
            decoded
        };

        Ok(DataUrl { media_type, body })
    }
}

fn split_header(header: &str) -> (String, bool) {
    let header = header.trim();
    let (media, is_base64) = match header.rsplit_once(';') {
        Some((media, flag)) if flag.trim().eq_ignore_ascii_case("base64") => (media, true),
        _ => (header, false),
    };

    let media = String::from_utf8_lossy(&percent_decode(media.trim().as_bytes())).into_owned();
    let media_type = if media.is_empty() {
        DEFAULT_MEDIA_TYPE.to_owned()
    } else if media.starts_with(';') {
        // Parameters without a type, e.g. `data:;charset=utf-8,`.
        format!("text/plain{media}")
    } else {
        media
    };
    (media_type, is_base64)
}

pub(crate) fn percent_decode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut index = 0;
    while index < input.len() {
        if input[index] == b'%' && index + 2 < input.len() {
            if let (Some(high), Some(low)) = (hex(input[index + 1]), hex(input[index + 2])) {
                out.push(high << 4 | low);
                index += 3;
                continue;
            }
        }
        out.push(input[index]);
        index += 1;
    }
    out
}

fn hex(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}
