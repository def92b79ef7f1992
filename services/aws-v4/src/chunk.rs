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

//! Chunk signatures and `aws-chunked` framing.

use bytes::{BufMut, BytesMut};
use log::trace;
use streamsign_core::hash::{hex_sha256, EMPTY_STRING_SHA256};
use streamsign_core::{Error, Result};

use crate::constants::{
    AWS4_HMAC_SHA256_PAYLOAD, CHUNK_SIGNATURE_EXT_LEN, FRAME_CRLF_LEN, SIGNATURE_HEX_LEN,
};
use crate::key::SigningKey;

/// ChunkSigner signs body chunks one after another.
///
/// Every signature covers the previous one, so the signer must see chunks in
/// the exact order they are sent. The chain starts from the seed signature of
/// the request headers.
#[derive(Debug, Clone)]
pub struct ChunkSigner {
    key: SigningKey,
    timestamp: String,
    scope: String,
    previous_signature: String,
}

impl ChunkSigner {
    /// Create a chunk signer that continues the chain from `seed_signature`.
    ///
    /// `timestamp` is the ISO8601 form of the request time and `scope` the
    /// `date/region/service/aws4_request` string used to sign the headers.
    pub fn new(key: SigningKey, timestamp: &str, scope: &str, seed_signature: &str) -> Self {
        Self {
            key,
            timestamp: timestamp.to_string(),
            scope: scope.to_string(),
            previous_signature: seed_signature.to_string(),
        }
    }

    /// Signature of the last signed chunk, or the seed if none was signed yet.
    pub fn previous_signature(&self) -> &str {
        &self.previous_signature
    }

    /// Sign `data` and advance the chain.
    ///
    /// A zero-length chunk is signed the same way; it terminates the body.
    pub fn sign_chunk(&mut self, data: &[u8]) -> String {
        let string_to_sign = chunk_string_to_sign(
            &self.timestamp,
            &self.scope,
            &self.previous_signature,
            data,
        );
        let signature = self.key.sign(&string_to_sign);
        trace!("signed chunk of {} bytes: {signature}", data.len());

        self.previous_signature.clone_from(&signature);
        signature
    }
}

/// Build the string to sign for one chunk.
///
/// ```text
/// AWS4-HMAC-SHA256-PAYLOAD
/// 20130524T000000Z
/// 20130524/us-east-1/s3/aws4_request
/// <previous signature>
/// <sha256 of empty string>
/// <sha256 of chunk data>
/// ```
pub fn chunk_string_to_sign(
    timestamp: &str,
    scope: &str,
    previous_signature: &str,
    data: &[u8],
) -> String {
    [
        AWS4_HMAC_SHA256_PAYLOAD,
        timestamp,
        scope,
        previous_signature,
        EMPTY_STRING_SHA256,
        &hex_sha256(data),
    ]
    .join("\n")
}

/// Bytes a frame adds around `len` bytes of data:
/// `hex(len)`, `;chunk-signature=`, the signature and two CRLFs.
pub fn frame_overhead(len: usize) -> usize {
    hex_len(len) + CHUNK_SIGNATURE_EXT_LEN + SIGNATURE_HEX_LEN + FRAME_CRLF_LEN
}

fn hex_len(mut n: usize) -> usize {
    let mut digits = 1;
    while n >= 16 {
        n >>= 4;
        digits += 1;
    }
    digits
}

/// Total encoded length of a body of `decoded_length` bytes framed in
/// chunks of `chunk_size`, terminator included.
///
/// This is the `Content-Length` to send; it must be known before the first
/// byte goes out.
///
/// Fails with `ConfigInvalid` if `chunk_size` is 0, and with
/// `RequestInvalid` if the encoded length does not fit in a `u64`.
pub fn compute_content_length(decoded_length: u64, chunk_size: usize) -> Result<u64> {
    if chunk_size == 0 {
        return Err(Error::config_invalid("chunk size must be greater than 0"));
    }

    let full_chunks = decoded_length / chunk_size as u64;
    let remainder = (decoded_length % chunk_size as u64) as usize;

    let mut total = match full_chunks {
        0 => Some(0),
        n => frame_len(chunk_size).and_then(|v| v.checked_mul(n)),
    };
    if remainder > 0 {
        total = total.and_then(|v| v.checked_add(frame_len(remainder)?));
    }
    total
        .and_then(|v| v.checked_add(frame_overhead(0) as u64))
        .ok_or_else(|| {
            Error::request_invalid(format!(
                "encoded length of a {decoded_length} bytes body overflows"
            ))
        })
}

/// Encoded length of a frame carrying `len` bytes of data.
fn frame_len(len: usize) -> Option<u64> {
    (frame_overhead(len) as u64).checked_add(len as u64)
}

/// Append one frame: `<hex(len)>;chunk-signature=<signature>\r\n<data>\r\n`.
pub fn encode_frame(buf: &mut BytesMut, signature: &str, data: &[u8]) {
    buf.reserve(frame_overhead(data.len()) + data.len());
    buf.put_slice(format!("{:x}", data.len()).as_bytes());
    buf.put_slice(b";chunk-signature=");
    buf.put_slice(signature.as_bytes());
    buf.put_slice(b"\r\n");
    buf.put_slice(data);
    buf.put_slice(b"\r\n");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn test_signer() -> ChunkSigner {
        let key = SigningKey::derive(
            "wJalrXUtnFEMI/K7MDENG/bPxRfiCYEXAMPLEKEY",
            "20130524",
            "us-east-1",
            "s3",
        );
        ChunkSigner::new(
            key,
            "20130524T000000Z",
            "20130524/us-east-1/s3/aws4_request",
            "4f232c4386841ef735655705268965c44a0e4690baa4adea153f7db9fa80a0a9",
        )
    }

    #[test_case(0, 1)]
    #[test_case(15, 1)]
    #[test_case(16, 2)]
    #[test_case(1024, 3)]
    #[test_case(65536, 5)]
    fn test_hex_len(n: usize, expected: usize) {
        assert_eq!(hex_len(n), expected);
        assert_eq!(format!("{n:x}").len(), expected);
    }

    #[test]
    fn test_content_length_of_empty_body() -> Result<()> {
        assert_eq!(compute_content_length(0, 8192)?, frame_overhead(0) as u64);
        assert_eq!(frame_overhead(0), 86);
        Ok(())
    }

    #[test]
    fn test_content_length_of_one_full_chunk() -> Result<()> {
        assert_eq!(
            compute_content_length(8192, 8192)?,
            (frame_overhead(8192) + 8192 + frame_overhead(0)) as u64
        );
        Ok(())
    }

    #[test]
    fn test_content_length_of_published_example() -> Result<()> {
        // 65 KiB body in 64 KiB chunks, as in the S3 chunked upload example.
        assert_eq!(compute_content_length(66560, 65536)?, 66824);
        Ok(())
    }

    #[test_case(u64::MAX, 65536; "max length")]
    #[test_case(u64::MAX, 1; "max length in single bytes")]
    #[test_case(u64::MAX - 10, usize::MAX; "remainder only")]
    fn test_content_length_overflow(decoded_length: u64, chunk_size: usize) {
        let err = compute_content_length(decoded_length, chunk_size)
            .expect_err("encoded length must not wrap");
        assert_eq!(err.kind(), streamsign_core::ErrorKind::RequestInvalid);
    }

    #[test]
    fn test_content_length_with_huge_chunk_size() -> Result<()> {
        assert_eq!(
            compute_content_length(1024, usize::MAX)?,
            (frame_overhead(1024) + 1024 + frame_overhead(0)) as u64
        );
        Ok(())
    }

    #[test]
    fn test_content_length_of_zero_chunk_size() {
        let err = compute_content_length(1024, 0).expect_err("zero chunk size");
        assert_eq!(err.kind(), streamsign_core::ErrorKind::ConfigInvalid);
    }

    #[test]
    fn test_chunk_chain() {
        let mut signer = test_signer();
        let seed = signer.previous_signature().to_string();

        let first = signer.sign_chunk(b"hello");
        assert_eq!(signer.previous_signature(), first);
        let second = signer.sign_chunk(b"hello");
        assert_ne!(first, second, "same data must sign differently later in the chain");
        assert_ne!(first, seed);

        let mut replay = test_signer();
        assert_eq!(replay.sign_chunk(b"hello"), first);
        assert_eq!(replay.sign_chunk(b"hello"), second);
    }

    #[test]
    fn test_chunk_string_to_sign() {
        let sts = chunk_string_to_sign(
            "20130524T000000Z",
            "20130524/us-east-1/s3/aws4_request",
            "prev",
            b"",
        );
        assert_eq!(
            sts,
            format!(
                "AWS4-HMAC-SHA256-PAYLOAD\n20130524T000000Z\n20130524/us-east-1/s3/aws4_request\nprev\n{EMPTY_STRING_SHA256}\n{EMPTY_STRING_SHA256}"
            )
        );
    }

    #[test]
    fn test_encode_frame() {
        let sig = "a".repeat(64);
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &sig, b"0123456789abcdefX");
        assert_eq!(
            &buf[..],
            format!("11;chunk-signature={sig}\r\n0123456789abcdefX\r\n").as_bytes()
        );
        assert_eq!(buf.len(), frame_overhead(17) + 17);

        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &sig, b"");
        assert_eq!(&buf[..], format!("0;chunk-signature={sig}\r\n\r\n").as_bytes());
        assert_eq!(buf.len(), frame_overhead(0));
    }
}
