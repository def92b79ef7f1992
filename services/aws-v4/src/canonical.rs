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

//! Canonical request construction for SigV4.

use std::fmt::{Display, Formatter, Write};

use http::{HeaderMap, Method};
use percent_encoding::{percent_decode_str, utf8_percent_encode};
use streamsign_core::{Error, Result, SigningRequest};

use crate::constants::AWS_URI_ENCODE_SET;

/// The normalized form of a request that gets hashed into the string to sign.
///
/// ```text
/// <method>\n
/// <canonical path>\n
/// <canonical query>\n
/// <name:value\n for every header line>\n
/// <signed header names>\n
/// <payload hash>
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalRequest {
    method: String,
    path: String,
    query: String,
    headers: Vec<(String, String)>,
    signed_headers: String,
    payload_hash: String,
}

impl CanonicalRequest {
    /// Canonicalize the given request components.
    ///
    /// Fails with `RequestInvalid` if the path does not decode to UTF-8 or
    /// a header value is not visible ASCII.
    pub fn new(
        method: &Method,
        path: &str,
        query: Option<&str>,
        headers: &HeaderMap,
        payload_hash: &str,
    ) -> Result<Self> {
        let headers = canonical_headers(headers)?;
        let signed_headers = signed_header_names(&headers);

        Ok(Self {
            method: method.as_str().to_string(),
            path: canonical_path(path)?,
            query: query.map(canonical_query).unwrap_or_default(),
            headers,
            signed_headers,
            payload_hash: payload_hash.to_string(),
        })
    }

    /// Canonicalize a request that is being signed.
    pub fn from_signing_request(req: &SigningRequest, payload_hash: &str) -> Result<Self> {
        Self::new(
            &req.method,
            &req.path,
            req.query.as_deref(),
            &req.headers,
            payload_hash,
        )
    }

    /// Sorted lower-cased header names joined by `;`.
    pub fn signed_headers(&self) -> &str {
        &self.signed_headers
    }

    /// The canonical path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The canonical query string.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Header lines in canonical order.
    pub fn headers(&self) -> &[(String, String)] {
        &self.headers
    }
}

impl Display for CanonicalRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.method)?;
        writeln!(f, "{}", self.path)?;
        writeln!(f, "{}", self.query)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}:{value}")?;
        }
        writeln!(f)?;
        writeln!(f, "{}", self.signed_headers)?;
        f.write_str(&self.payload_hash)
    }
}

/// Percent-decode then re-encode every path segment.
///
/// `/` separators stay literal while a `/` encoded inside a segment stays
/// encoded.
pub fn canonical_path(path: &str) -> Result<String> {
    if path.is_empty() {
        return Ok("/".to_string());
    }

    // 256 is specially chosen to avoid reallocation for most requests.
    let mut s = String::with_capacity(path.len().max(256));
    for (idx, segment) in path.split('/').enumerate() {
        if idx > 0 {
            s.push('/');
        }
        let decoded = percent_decode_str(segment).decode_utf8().map_err(|e| {
            Error::request_invalid(format!("path segment {segment:?} is not valid utf-8"))
                .with_source(e)
        })?;
        write!(s, "{}", utf8_percent_encode(&decoded, &AWS_URI_ENCODE_SET))?;
    }
    Ok(s)
}

/// Decode, re-encode and sort query pairs.
///
/// Pairs are sorted by encoded key then encoded value; a key without value
/// keeps its trailing `=`.
pub fn canonical_query(query: &str) -> String {
    let mut pairs = form_urlencoded::parse(query.as_bytes())
        .filter(|(k, _)| !k.is_empty())
        .map(|(k, v)| {
            (
                utf8_percent_encode(&k, &AWS_URI_ENCODE_SET).to_string(),
                utf8_percent_encode(&v, &AWS_URI_ENCODE_SET).to_string(),
            )
        })
        .collect::<Vec<_>>();
    pairs.sort();

    pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("&")
}

/// One `(name, value)` per header occurrence, lower-cased, trimmed and
/// stably sorted by name.
fn canonical_headers(headers: &HeaderMap) -> Result<Vec<(String, String)>> {
    let mut lines = Vec::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        let value = value.to_str().map_err(|e| {
            Error::request_invalid(format!("value of header {name} is not visible ascii"))
                .with_source(e)
        })?;
        lines.push((
            name.as_str().to_ascii_lowercase(),
            SigningRequest::header_value_normalize(value).to_string(),
        ));
    }
    lines.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(lines)
}

fn signed_header_names(lines: &[(String, String)]) -> String {
    let mut names = lines.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>();
    names.dedup();
    names.join(";")
}
