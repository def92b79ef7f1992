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

use percent_encoding::AsciiSet;
use percent_encoding::NON_ALPHANUMERIC;

// Headers used in aws services.
/// Header carrying the payload hash.
pub const X_AMZ_CONTENT_SHA_256: &str = "x-amz-content-sha256";
/// Header carrying the raw length of a streamed body.
pub const X_AMZ_DECODED_CONTENT_LENGTH: &str = "x-amz-decoded-content-length";
/// Header carrying the session token of temporary credentials.
pub const X_AMZ_SECURITY_TOKEN: &str = "x-amz-security-token";

// Env values used in aws services.
pub const AWS_ACCESS_KEY_ID: &str = "AWS_ACCESS_KEY_ID";
pub const AWS_SECRET_ACCESS_KEY: &str = "AWS_SECRET_ACCESS_KEY";
pub const AWS_SESSION_TOKEN: &str = "AWS_SESSION_TOKEN";
pub const AWS_REGION: &str = "AWS_REGION";
pub const AWS_DEFAULT_REGION: &str = "AWS_DEFAULT_REGION";
pub const AWS_SERVICE: &str = "AWS_SERVICE";
pub const AWS_CHUNK_SIZE: &str = "AWS_CHUNK_SIZE";

// Algorithms and sentinels.
pub const AWS4_HMAC_SHA256: &str = "AWS4-HMAC-SHA256";
pub const AWS4_HMAC_SHA256_PAYLOAD: &str = "AWS4-HMAC-SHA256-PAYLOAD";
/// Payload hash sentinel of chunk signed bodies.
pub const STREAMING_AWS4_HMAC_SHA256_PAYLOAD: &str = "STREAMING-AWS4-HMAC-SHA256-PAYLOAD";
/// Content-Encoding of chunk signed bodies.
pub const AWS_CHUNKED: &str = "aws-chunked";

pub const DEFAULT_SERVICE: &str = "s3";
/// 64 KiB, the chunk size used by the AWS SDKs.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Length of `;chunk-signature=`.
pub const CHUNK_SIGNATURE_EXT_LEN: usize = 17;
/// Length of a hex encoded HMAC-SHA256.
pub const SIGNATURE_HEX_LEN: usize = 64;
/// Two CRLFs per frame: one after the header line, one after the data.
pub const FRAME_CRLF_LEN: usize = 4;

/// AsciiSet for [AWS UriEncode](https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-header-based-auth.html)
///
/// URI encode every byte except the unreserved characters: 'A'-'Z', 'a'-'z', '0'-'9', '-', '.', '_', and '~'.
///
/// Path segments and query components are encoded with the same set; the
/// path keeps its `/` separators because segments are encoded one by one.
pub static AWS_URI_ENCODE_SET: AsciiSet = NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');
