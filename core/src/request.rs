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

use std::mem;

use http::header::HeaderName;
use http::uri::Authority;
use http::HeaderMap;
use http::HeaderValue;
use http::Method;

use crate::Error;
use crate::Result;

/// Signing context for request.
///
/// Headers are moved out of the request while signing and moved back by
/// [`SigningRequest::apply`], so nothing is copied.
#[derive(Debug)]
pub struct SigningRequest {
    /// HTTP method.
    pub method: Method,
    /// HTTP authority, if the URI carries one.
    pub authority: Option<Authority>,
    /// HTTP path, still percent encoded as sent.
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    /// HTTP headers.
    pub headers: HeaderMap,
}

impl SigningRequest {
    /// Build a signing context from http::request::Parts.
    pub fn build(parts: &mut http::request::Parts) -> Result<Self> {
        let path = match parts.uri.path() {
            "" => "/".to_string(),
            v => v.to_string(),
        };

        Ok(SigningRequest {
            method: parts.method.clone(),
            authority: parts.uri.authority().cloned(),
            path,
            query: parts.uri.query().map(|v| v.to_string()),

            // Take the headers out of the request to avoid copy.
            // We will return it back when apply the context.
            headers: mem::take(&mut parts.headers),
        })
    }

    /// Apply the signing context back to http::request::Parts.
    pub fn apply(mut self, parts: &mut http::request::Parts) -> Result<()> {
        mem::swap(&mut parts.headers, &mut self.headers);
        Ok(())
    }

    /// Insert a header only if it is not present yet.
    pub fn header_insert_if_absent(&mut self, key: HeaderName, value: &str) -> Result<()> {
        if !self.headers.contains_key(&key) {
            self.header_insert(key, value)?;
        }
        Ok(())
    }

    /// Insert a header, replacing all existing values.
    pub fn header_insert(&mut self, key: HeaderName, value: &str) -> Result<()> {
        let value = HeaderValue::from_str(value).map_err(|e| {
            Error::request_invalid(format!("value of header {key} is not representable"))
                .with_source(e)
        })?;
        self.headers.insert(key, value);
        Ok(())
    }

    /// Insert a sensitive header, replacing all existing values.
    ///
    /// Sensitive values are skipped by `Debug` output of the header map.
    pub fn header_insert_sensitive(&mut self, key: HeaderName, value: &str) -> Result<()> {
        let mut value = HeaderValue::from_str(value).map_err(|e| {
            Error::request_invalid(format!("value of header {key} is not representable"))
                .with_source(e)
        })?;
        value.set_sensitive(true);
        self.headers.insert(key, value);
        Ok(())
    }

    /// Get header value as str, `None` if absent.
    #[inline]
    pub fn header_get(&self, key: &HeaderName) -> Result<Option<&str>> {
        match self.headers.get(key) {
            Some(v) => Ok(Some(v.to_str()?)),
            None => Ok(None),
        }
    }

    /// Trim leading and trailing whitespace of header value.
    pub fn header_value_normalize(v: &str) -> &str {
        v.trim_matches(|c: char| c == ' ' || c == '\t')
    }
}
