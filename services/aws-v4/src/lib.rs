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

//! AWS SigV4 signer with streaming `aws-chunked` payload support.
//!
//! [`RequestSigner`] signs the head of a request. For a streaming payload
//! the returned [`SigningContext`] carries the seed signature and becomes
//! either a [`StreamingChunkEncoder`] driven by a transport through
//! [`streamsign_core::Producer`], or a [`SignedChunkStream`] wrapping a
//! body stream.
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use streamsign_aws_v4::{Credential, Payload, RequestSigner};
//!
//! # fn main() -> streamsign_core::Result<()> {
//! let cred = Credential::new("access_key_id", "secret_access_key", "us-east-1", "s3")?;
//! let signer = RequestSigner::new(Arc::new(cred));
//!
//! let (mut parts, _) = http::Request::put("https://examplebucket.s3.amazonaws.com/object")
//!     .body(())?
//!     .into_parts();
//! let ctx = signer.sign(&mut parts, Payload::Streaming { decoded_length: 66560 })?;
//! assert_eq!(ctx.content_length(), Some(66824));
//! # Ok(())
//! # }
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

mod constants;
pub use constants::{
    AWS_CHUNKED, DEFAULT_CHUNK_SIZE, STREAMING_AWS4_HMAC_SHA256_PAYLOAD, X_AMZ_CONTENT_SHA_256,
    X_AMZ_DECODED_CONTENT_LENGTH, X_AMZ_SECURITY_TOKEN,
};

mod config;
pub use config::Config;
mod credential;
pub use credential::Credential;

mod key;
pub use key::SigningKey;
mod canonical;
pub use canonical::{canonical_path, canonical_query, CanonicalRequest};
mod chunk;
pub use chunk::{
    chunk_string_to_sign, compute_content_length, encode_frame, frame_overhead, ChunkSigner,
};

mod sign_request;
pub use sign_request::{string_to_sign, Payload, RequestSigner, SigningContext};

mod encoder;
pub use encoder::{Completion, StreamingChunkEncoder};
mod stream;
pub use stream::SignedChunkStream;
