//! Process-wide service identity.
//!
//! The identity is resolved once, before any pipeline exists, and attached
//! to every signal as OTEL resource attributes.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use opentelemetry::KeyValue;
use rand::rngs::OsRng;
use rand::{CryptoRng, RngCore};

use crate::config::ServiceConfig;
use crate::error::{EmitterError, Result};

/// Number of random bytes in an instance id.
pub const INSTANCE_ID_BYTES: usize = 16;

/// Immutable identity shared by every emitted signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceIdentity {
    service_name: String,
    service_version: String,
    instance_id: String,
}

impl ResourceIdentity {
    /// Resolve the identity, drawing the instance id from the OS CSPRNG.
    ///
    /// Fails with [`EmitterError::Entropy`] if the OS cannot provide
    /// randomness; callers treat that as fatal.
    pub fn resolve(service: &ServiceConfig) -> Result<Self> {
        Self::resolve_with(service, &mut OsRng)
    }

    /// Resolve the identity with an explicit cryptographic RNG.
    pub fn resolve_with<R: RngCore + CryptoRng>(service: &ServiceConfig, rng: &mut R) -> Result<Self> {
        Ok(Self {
            service_name: service.name.clone(),
            service_version: service.version.clone(),
            instance_id: generate_instance_id(rng)?,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn service_version(&self) -> &str {
        &self.service_version
    }

    /// 32 lowercase hex characters, unique per process start.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Build OTEL resource attributes for this identity.
    pub fn resource_attributes(
        &self,
        environment: &str,
        extra_attrs: &BTreeMap<String, String>,
    ) -> Vec<KeyValue> {
        let mut attrs = Vec::with_capacity(4 + extra_attrs.len());

        attrs.push(KeyValue::new("service.name", self.service_name.clone()));
        attrs.push(KeyValue::new("service.version", self.service_version.clone()));
        attrs.push(KeyValue::new("service.instance.id", self.instance_id.clone()));
        attrs.push(KeyValue::new("deployment.environment", environment.to_string()));

        for (k, v) in extra_attrs {
            attrs.push(KeyValue::new(k.clone(), v.clone()));
        }

        attrs
    }
}

/// Generate a hex-encoded instance id from [`INSTANCE_ID_BYTES`] random bytes.
pub fn generate_instance_id<R: RngCore + ?Sized>(rng: &mut R) -> Result<String> {
    let mut bytes = [0u8; INSTANCE_ID_BYTES];
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| EmitterError::Entropy(e.to_string()))?;

    Ok(encode_hex(&bytes))
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
            let _ = write!(out, "{:02x}", b);
            out
        })
}
