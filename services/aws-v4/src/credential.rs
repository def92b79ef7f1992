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

use streamsign_core::utils::Redact;
use streamsign_core::{Error, Result};

/// Credential that holds the access key, secret key and the scope it signs for.
///
/// A credential is immutable once built and is meant to be shared (usually
/// behind an `Arc`) by every request signed with it. It never holds any
/// per-request state.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
    region: String,
    service: String,
}

impl Credential {
    /// Create a new credential.
    ///
    /// Fails with `ConfigInvalid` if any part is empty, or if region or
    /// service contain characters that would corrupt the credential scope.
    pub fn new(
        access_key_id: &str,
        secret_access_key: &str,
        region: &str,
        service: &str,
    ) -> Result<Self> {
        if access_key_id.is_empty() {
            return Err(Error::config_invalid("access key id is required"));
        }
        if access_key_id.contains(['/', ',', ' ']) {
            return Err(Error::config_invalid(
                "access key id must not contain '/', ',' or spaces",
            ));
        }
        if secret_access_key.is_empty() {
            return Err(Error::config_invalid("secret access key is required"));
        }
        check_scope_part("region", region)?;
        check_scope_part("service", service)?;

        Ok(Self {
            access_key_id: access_key_id.to_string(),
            secret_access_key: secret_access_key.to_string(),
            session_token: None,
            region: region.to_string(),
            service: service.to_string(),
        })
    }

    /// Set the session token of temporary credentials.
    pub fn with_session_token(mut self, token: &str) -> Result<Self> {
        if token.is_empty() {
            return Err(Error::config_invalid("session token must not be empty"));
        }
        self.session_token = Some(token.to_string());
        Ok(self)
    }

    /// Access key id for aws services.
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// Secret access key for aws services.
    pub fn secret_access_key(&self) -> &str {
        &self.secret_access_key
    }

    /// Session token for aws services.
    pub fn session_token(&self) -> Option<&str> {
        self.session_token.as_deref()
    }

    /// Region this credential signs for.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Service this credential signs for.
    pub fn service(&self) -> &str {
        &self.service
    }
}

fn check_scope_part(name: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::config_invalid(format!("{name} is required")));
    }
    if !value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_' || b == b'.')
    {
        return Err(Error::config_invalid(format!(
            "{name} {value:?} contains characters not allowed in a credential scope"
        )));
    }
    Ok(())
}

impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_key_id", &Redact::from(&self.access_key_id))
            .field("secret_access_key", &Redact::from(&self.secret_access_key))
            .field("session_token", &Redact::from(&self.session_token))
            .field("region", &self.region)
            .field("service", &self.service)
            .finish()
    }
}
