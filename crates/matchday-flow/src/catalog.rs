//! Endpoint catalog: the registry of known upstream endpoints.
//!
//! The catalog describes each endpoint's parameter schema, its dependencies
//! on other endpoints, whether its responses may be cached, and a volatility
//! class that drives the cache TTL. The planner reads the catalog; nothing
//! in this crate mutates it.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Identifier of an upstream endpoint (e.g. `team_stats`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EndpointId(String);

impl EndpointId {
    /// Creates an endpoint id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EndpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for EndpointId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for EndpointId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Data-freshness classification of an endpoint, driving its cache TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Volatility {
    /// Reference data that changes rarely (team rosters, venues).
    Static,
    /// Data refreshed on a daily cadence (standings, aggregated stats).
    Daily,
    /// Data that changes within a match (live scores, in-play odds).
    Live,
}

/// A parameter accepted by an endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParamSpec {
    /// Parameter name as it appears in the resolved parameter map.
    pub name: String,
    /// Whether planning fails when the parameter is absent.
    pub required: bool,
}

/// Immutable description of one endpoint, as read from the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    /// The endpoint's identifier.
    pub id: EndpointId,
    /// Parameter schema, validated at the catalog boundary during planning.
    #[serde(default)]
    pub params: Vec<ParamSpec>,
    /// Endpoints whose results this endpoint needs before it can be called.
    #[serde(default)]
    pub depends_on: Vec<EndpointId>,
    /// Whether successful responses may be stored in the cache.
    pub cacheable: bool,
    /// Volatility class used to pick the cache TTL.
    pub volatility: Volatility,
    /// If true, this endpoint's failure does not fail the overall plan.
    #[serde(default)]
    pub optional: bool,
}

impl EndpointDescriptor {
    /// Creates a cacheable, non-optional descriptor with no parameters.
    #[must_use]
    pub fn new(id: impl Into<EndpointId>, volatility: Volatility) -> Self {
        Self {
            id: id.into(),
            params: Vec::new(),
            depends_on: Vec::new(),
            cacheable: true,
            volatility,
            optional: false,
        }
    }

    /// Adds a parameter to the schema.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, required: bool) -> Self {
        self.params.push(ParamSpec {
            name: name.into(),
            required,
        });
        self
    }

    /// Adds a dependency on another endpoint.
    #[must_use]
    pub fn with_dependency(mut self, dep: impl Into<EndpointId>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    /// Marks the endpoint as optional (enrichment data).
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Marks the endpoint's responses as non-cacheable.
    #[must_use]
    pub fn not_cacheable(mut self) -> Self {
        self.cacheable = false;
        self
    }
}

/// Read-only lookup of endpoint descriptors.
pub trait Catalog: Send + Sync {
    /// Returns the descriptor for an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownEndpoint`] if the endpoint is not registered.
    fn lookup(&self, id: &EndpointId) -> Result<&EndpointDescriptor>;
}

/// In-memory catalog built once at startup.
#[derive(Debug, Default)]
pub struct StaticCatalog {
    endpoints: HashMap<EndpointId, EndpointDescriptor>,
}

impl StaticCatalog {
    /// Creates a builder for a static catalog.
    #[must_use]
    pub fn builder() -> StaticCatalogBuilder {
        StaticCatalogBuilder::default()
    }

    /// Returns the number of registered endpoints.
    #[must_use]
    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    /// Returns true if no endpoints are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }
}

impl Catalog for StaticCatalog {
    fn lookup(&self, id: &EndpointId) -> Result<&EndpointDescriptor> {
        self.endpoints.get(id).ok_or_else(|| Error::UnknownEndpoint {
            endpoint: id.clone(),
        })
    }
}

/// Builder for [`StaticCatalog`].
#[derive(Debug, Default)]
pub struct StaticCatalogBuilder {
    endpoints: HashMap<EndpointId, EndpointDescriptor>,
}

impl StaticCatalogBuilder {
    /// Registers an endpoint descriptor.
    ///
    /// Registering the same id twice replaces the earlier descriptor.
    #[must_use]
    pub fn endpoint(mut self, descriptor: EndpointDescriptor) -> Self {
        self.endpoints.insert(descriptor.id.clone(), descriptor);
        self
    }

    /// Builds the catalog.
    #[must_use]
    pub fn build(self) -> StaticCatalog {
        StaticCatalog {
            endpoints: self.endpoints,
        }
    }
}
