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

use std::fmt::{Debug, Formatter};

use streamsign_core::hash::{hex_hmac_sha256, hmac_sha256};

/// Signing key derived for one `date/region/service` scope.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningKey(Vec<u8>);

impl SigningKey {
    /// Derive the signing key:
    ///
    /// ```text
    /// kDate    = HMAC-SHA256("AWS4" + secret, date)
    /// kRegion  = HMAC-SHA256(kDate, region)
    /// kService = HMAC-SHA256(kRegion, service)
    /// kSigning = HMAC-SHA256(kService, "aws4_request")
    /// ```
    ///
    /// `date` is the `YYYYMMDD` form of the request time. Every input is
    /// taken as UTF-8 bytes once and never re-encoded.
    pub fn derive(secret: &str, date: &str, region: &str, service: &str) -> Self {
        let secret = format!("AWS4{secret}");
        let sign_date = hmac_sha256(secret.as_bytes(), date.as_bytes());
        let sign_region = hmac_sha256(&sign_date, region.as_bytes());
        let sign_service = hmac_sha256(&sign_region, service.as_bytes());
        let sign_request = hmac_sha256(&sign_service, b"aws4_request");

        Self(sign_request)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex encoded HMAC-SHA256 of `content` under this key.
    pub fn sign(&self, content: &str) -> String {
        hex_hmac_sha256(&self.0, content.as_bytes())
    }
}

impl Debug for SigningKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str("SigningKey(***)")
    }
}
