// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

use std::sync::Arc;

use futures::Stream;
use http::header;
use http::header::HeaderName;
use http::request::Parts;
use log::debug;
use streamsign_core::hash::{hex_sha256, EMPTY_STRING_SHA256};
use streamsign_core::time::{format_date, format_http_date, format_iso8601, now, DateTime};
use streamsign_core::{Consumer, Error, Result, SigningRequest};

use crate::canonical::CanonicalRequest;
use crate::chunk::{compute_content_length, ChunkSigner};
use crate::constants::*;
use crate::encoder::{Completion, StreamingChunkEncoder};
use crate::key::SigningKey;
use crate::stream::SignedChunkStream;
use crate::{Config, Credential};

/// Body of the request being signed.
#[derive(Debug, Clone, Copy)]
pub enum Payload<'a> {
    /// No body, signed as the hash of the empty string.
    Empty,
    /// A fully buffered body, hashed while signing.
    Bytes(&'a [u8]),
    /// Hex encoded SHA256 of the body, computed by the caller.
    Precomputed(&'a str),
    /// A body streamed as signed `aws-chunked` frames.
    ///
    /// `decoded_length` is the raw body length, which must be known upfront
    /// because the encoded `Content-Length` is derived from it.
    Streaming {
        /// Raw body length in bytes.
        decoded_length: u64,
    },
}

/// RequestSigner that implement AWS SigV4.
///
/// - [Signature Version 4 signing process](https://docs.aws.amazon.com/general/latest/gr/signature-version-4.html)
/// - [Transferring payload in multiple chunks](https://docs.aws.amazon.com/AmazonS3/latest/API/sigv4-streaming.html)
///
/// The signer itself holds no per-request state and can be shared across
/// threads. Each call to [`RequestSigner::sign`] captures a fresh timestamp
/// and returns a new [`SigningContext`].
#[derive(Debug, Clone)]
pub struct RequestSigner {
    credential: Arc<Credential>,
    chunk_size: usize,

    time: Option<DateTime>,
}

impl RequestSigner {
    /// Create a new signer for the given credential.
    pub fn new(credential: Arc<Credential>) -> Self {
        Self {
            credential,
            chunk_size: DEFAULT_CHUNK_SIZE,

            time: None,
        }
    }

    /// Create a new signer from config, failing fast on invalid values.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(Arc::new(config.credential()?)).with_chunk_size(config.chunk_size()?)
    }

    /// Set the chunk size used by streaming bodies.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::config_invalid("chunk size must be greater than 0"));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    /// Specify the signing time.
    ///
    /// # Note
    ///
    /// We should always take current time to sign requests.
    /// Only use this function for testing.
    pub fn with_time(mut self, time: DateTime) -> Self {
        self.time = Some(time);
        self
    }

    /// The credential used by this signer.
    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Sign the request in place.
    ///
    /// Injects `Date`, `x-amz-content-sha256`, `Host` when missing, the
    /// session token if any, the streaming headers for streaming payloads,
    /// and finally `Authorization`.
    pub fn sign(&self, req: &mut Parts, payload: Payload<'_>) -> Result<SigningContext> {
        let now = self.time.unwrap_or_else(now);
        let mut signed_req = SigningRequest::build(req)?;

        let ctx = self.sign_inner(&mut signed_req, payload, now);

        // Apply to the request, headers go back even if signing failed.
        signed_req.apply(req)?;
        ctx
    }

    fn sign_inner(
        &self,
        signed_req: &mut SigningRequest,
        payload: Payload<'_>,
        now: DateTime,
    ) -> Result<SigningContext> {
        let cred = &self.credential;

        let payload_hash = match payload {
            Payload::Empty => EMPTY_STRING_SHA256.to_string(),
            Payload::Bytes(body) => hex_sha256(body),
            Payload::Precomputed(hash) => {
                if hash.len() != SIGNATURE_HEX_LEN
                    || !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
                {
                    return Err(Error::request_invalid(format!(
                        "payload hash {hash:?} is not a lower-case hex sha256"
                    )));
                }
                hash.to_string()
            }
            Payload::Streaming { .. } => STREAMING_AWS4_HMAC_SHA256_PAYLOAD.to_string(),
        };

        // canonicalize context
        canonicalize_header(signed_req, cred, now, &payload_hash)?;
        let streaming = match payload {
            Payload::Streaming { decoded_length } => {
                let content_length = compute_content_length(decoded_length, self.chunk_size)?;
                canonicalize_streaming_header(signed_req, decoded_length, content_length)?;
                Some((decoded_length, content_length))
            }
            _ => None,
        };

        // build canonical request and string to sign.
        let creq = CanonicalRequest::from_signing_request(signed_req, &payload_hash)?;

        // Scope: "20220313/<region>/<service>/aws4_request"
        let scope = format!(
            "{}/{}/{}/aws4_request",
            format_date(now),
            cred.region(),
            cred.service()
        );
        debug!("calculated scope: {scope}");

        let timestamp = format_iso8601(now);
        let string_to_sign = string_to_sign(&timestamp, &scope, &creq);
        debug!("calculated string to sign: {string_to_sign}");

        let signing_key = SigningKey::derive(
            cred.secret_access_key(),
            &format_date(now),
            cred.region(),
            cred.service(),
        );
        let signature = signing_key.sign(&string_to_sign);

        signed_req.header_insert_sensitive(
            header::AUTHORIZATION,
            &format!(
                "{AWS4_HMAC_SHA256} Credential={}/{},SignedHeaders={},Signature={}",
                cred.access_key_id(),
                scope,
                creq.signed_headers(),
                signature
            ),
        )?;

        Ok(SigningContext {
            time: now,
            timestamp,
            scope,
            signing_key,
            signature,
            chunk_size: self.chunk_size,
            streaming,
        })
    }
}

/// Build the string to sign for the request headers.
///
/// ```text
/// AWS4-HMAC-SHA256
/// 20220313T072004Z
/// 20220313/<region>/<service>/aws4_request
/// <hashed canonical request>
/// ```
pub fn string_to_sign(timestamp: &str, scope: &str, creq: &CanonicalRequest) -> String {
    format!(
        "{AWS4_HMAC_SHA256}\n{timestamp}\n{scope}\n{}",
        hex_sha256(creq.to_string().as_bytes())
    )
}

fn canonicalize_header(
    req: &mut SigningRequest,
    cred: &Credential,
    now: DateTime,
    payload_hash: &str,
) -> Result<()> {
    // A previous signature must not be signed over.
    req.headers.remove(header::AUTHORIZATION);

    // Insert HOST header if not present.
    match req.authority.as_ref().map(|v| v.to_string()) {
        Some(authority) => req.header_insert_if_absent(header::HOST, &authority)?,
        None if req.headers.contains_key(header::HOST) => {}
        None => {
            return Err(Error::request_invalid(
                "request without authority is invalid for signing",
            ))
        }
    }

    req.header_insert(header::DATE, &format_http_date(now))?;
    req.header_insert(HeaderName::from_static(X_AMZ_CONTENT_SHA_256), payload_hash)?;

    // Insert X_AMZ_SECURITY_TOKEN header if security token exists.
    if let Some(token) = cred.session_token() {
        req.header_insert_sensitive(HeaderName::from_static(X_AMZ_SECURITY_TOKEN), token)?;
    }

    Ok(())
}

fn canonicalize_streaming_header(
    req: &mut SigningRequest,
    decoded_length: u64,
    content_length: u64,
) -> Result<()> {
    req.header_insert(header::CONTENT_LENGTH, &content_length.to_string())?;
    req.header_insert(
        HeaderName::from_static(X_AMZ_DECODED_CONTENT_LENGTH),
        &decoded_length.to_string(),
    )?;

    // aws-chunked must be the first encoding applied by the receiver.
    let encoding = match req.header_get(&header::CONTENT_ENCODING)? {
        Some(v) if !v.split(',').any(|e| e.trim() == AWS_CHUNKED) => {
            format!("{AWS_CHUNKED},{v}")
        }
        Some(v) => v.to_string(),
        None => AWS_CHUNKED.to_string(),
    };
    req.header_insert(header::CONTENT_ENCODING, &encoding)?;
    req.headers.remove(header::TRANSFER_ENCODING);

    Ok(())
}

/// Per-request signing state returned by [`RequestSigner::sign`].
///
/// It carries the timestamp captured for the request and the seed of the
/// chunk signature chain. A context belongs to exactly one request: turning
/// it into a chunk signer or encoder consumes it, and a retry must sign
/// again to get a fresh one.
#[derive(Debug)]
pub struct SigningContext {
    time: DateTime,
    timestamp: String,
    scope: String,
    signing_key: SigningKey,
    signature: String,
    chunk_size: usize,
    /// `(decoded_length, content_length)` for streaming payloads.
    streaming: Option<(u64, u64)>,
}

impl SigningContext {
    /// Time the request was signed at.
    pub fn time(&self) -> DateTime {
        self.time
    }

    /// Credential scope: `date/region/service/aws4_request`.
    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Signature of the request headers, the seed of the chunk chain.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Chunk size used for streaming bodies.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Raw body length for streaming payloads.
    pub fn decoded_content_length(&self) -> Option<u64> {
        self.streaming.map(|(decoded, _)| decoded)
    }

    /// Encoded `Content-Length` for streaming payloads.
    pub fn content_length(&self) -> Option<u64> {
        self.streaming.map(|(_, encoded)| encoded)
    }

    /// Turn this context into the signer that continues the chunk chain.
    pub fn into_chunk_signer(self) -> ChunkSigner {
        ChunkSigner::new(
            self.signing_key,
            &self.timestamp,
            &self.scope,
            &self.signature,
        )
    }

    /// Build the streaming encoder writing signed frames to `consumer`.
    ///
    /// Fails with `RequestInvalid` if the request was not signed with a
    /// streaming payload.
    pub fn into_encoder<C: Consumer>(
        self,
        consumer: C,
    ) -> Result<(StreamingChunkEncoder<C>, Completion)> {
        let Some((decoded_length, content_length)) = self.streaming else {
            return Err(Error::request_invalid(
                "request was not signed with a streaming payload",
            ));
        };
        let chunk_size = self.chunk_size;

        Ok(StreamingChunkEncoder::new(
            self.into_chunk_signer(),
            chunk_size,
            decoded_length,
            content_length,
            consumer,
        ))
    }

    /// Wrap `body` into a stream of signed frames.
    ///
    /// Fails with `RequestInvalid` if the request was not signed with a
    /// streaming payload.
    pub fn into_stream<S>(self, body: S) -> Result<SignedChunkStream<S>>
    where
        S: Stream<Item = std::io::Result<bytes::Bytes>>,
    {
        SignedChunkStream::new(self, body)
    }
}
