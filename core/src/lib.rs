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

//! Core components for signing API requests.
//!
//! This crate provides the building blocks shared by the streamsign
//! service signers:
//!
//! - [`hash`]: SHA256 and HMAC-SHA256 helpers
//! - [`time`]: time formatting used in signatures and headers
//! - [`utils`]: general utilities including data redaction
//! - [`SigningRequest`]: a view of `http::request::Parts` that can be
//!   mutated while signing and applied back
//! - [`Producer`] and [`Consumer`]: the flow control seam between a
//!   streaming body and the transport that sends it
//! - [`Env`]: environment access for loading configuration
//!
//! ## Example
//!
//! ```
//! use streamsign_core::hash::hex_sha256;
//! use streamsign_core::hash::EMPTY_STRING_SHA256;
//!
//! assert_eq!(hex_sha256(b""), EMPTY_STRING_SHA256);
//! ```

// Make sure all our public APIs have docs.
#![warn(missing_docs)]

pub mod hash;
pub mod time;
pub mod utils;

mod error;
pub use error::{Error, ErrorKind, Result};
mod env;
pub use env::{Env, OsEnv, StaticEnv};
mod producer;
pub use producer::{Consumer, NoopProducer, Producer};
mod request;
pub use request::SigningRequest;
