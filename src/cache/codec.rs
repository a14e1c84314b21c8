//! Storage-safe body encoding for cross-origin responses.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{eyre::eyre, Result};

use super::traits::{BodyEncoding, StoredResponse};
use crate::http::{Request, Response};

/// Decides how a response body is stored and restores it on the way out.
///
/// Cross-origin responses outside the static prefix are base64 encoded.
/// Everything else is stored byte for byte.
#[derive(Debug, Clone)]
pub struct ResponseCodec {
  static_prefix: String,
}

impl ResponseCodec {
  pub fn new(static_prefix: impl Into<String>) -> Self {
    Self {
      static_prefix: static_prefix.into(),
    }
  }

  pub fn encoding_for(&self, request: &Request) -> BodyEncoding {
    if request.is_cross_origin() && !request.is_under(&self.static_prefix) {
      BodyEncoding::Base64
    } else {
      BodyEncoding::Raw
    }
  }

  pub fn encode(&self, request: &Request, response: &Response) -> StoredResponse {
    let encoding = self.encoding_for(request);
    let body = match encoding {
      BodyEncoding::Raw => response.body.clone(),
      BodyEncoding::Base64 => STANDARD.encode(&response.body).into_bytes(),
    };

    StoredResponse {
      status: response.status,
      headers: response.headers.clone(),
      body,
      encoding,
    }
  }

  /// Rebuild the response a stored entry was made from.
  ///
  /// Decoding follows the entry's own marker, so a raw entry is returned as is.
  pub fn decode(&self, stored: StoredResponse) -> Result<Response> {
    let body = decode_body(stored.encoding, stored.body)?;
    Ok(Response {
      status: stored.status,
      headers: stored.headers,
      body,
    })
  }
}

pub(crate) fn decode_body(encoding: BodyEncoding, body: Vec<u8>) -> Result<Vec<u8>> {
  match encoding {
    BodyEncoding::Raw => Ok(body),
    BodyEncoding::Base64 => STANDARD
      .decode(&body)
      .map_err(|e| eyre!("Failed to decode cached body: {}", e)),
  }
}
