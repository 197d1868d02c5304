//! Deterministic execution planning.
//!
//! Plans are generated from the endpoint catalog and represent exactly what
//! will be fetched. Plans are:
//!
//! - **Deterministic**: same catalog and inputs always produce the same
//!   stage partition and per-stage ordering
//! - **Serializable**: can be stored and compared for debugging
//! - **Maximally parallel**: a call is never deferred later than its
//!   earliest possible stage

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::catalog::{Catalog, EndpointDescriptor, EndpointId, Volatility};
use crate::dag::Dag;
use crate::error::{Error, Result};

/// Production guardrail: hard cap on calls per plan.
const MAX_CALLS_PER_PLAN: usize = 256;

/// Version of the call fingerprint preimage format.
///
/// Increment when intentionally changing fingerprint semantics.
const FINGERPRINT_VERSION: u32 = 1;

/// Resolved parameters for one call.
///
/// A `BTreeMap` keeps parameters normalized (key-sorted) by construction,
/// which is what makes fingerprints stable.
pub type Params = BTreeMap<String, serde_json::Value>;

/// Stable identity of a call: endpoint id plus normalized parameters.
///
/// Fingerprints are the cache key and the coalescing key: two requests with
/// equal fingerprints are semantically equivalent and share one cache entry
/// and one in-flight upstream call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of `(endpoint, params)`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parameter map cannot be serialized.
    pub fn compute(endpoint: &EndpointId, params: &Params) -> Result<Self> {
        let encoded = serde_json::to_vec(params).map_err(|e| Error::Serialization {
            message: format!("failed to serialize call parameters: {e}"),
        })?;

        let mut hasher = Sha256::new();
        hasher.update(format!("matchday-call:v{FINGERPRINT_VERSION}:{endpoint}:").as_bytes());
        hasher.update(&encoded);
        Ok(Self(format!("sha256:{}", hex::encode(hasher.finalize()))))
    }

    /// Returns the fingerprint as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single upstream call scheduled by the planner.
///
/// Carries everything the orchestrator needs at execution time so the
/// catalog is never consulted after planning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallRequest {
    /// The endpoint to call.
    pub endpoint: EndpointId,
    /// Resolved, normalized parameters.
    pub params: Params,
    /// Direct dependencies within the plan (always in earlier stages).
    pub depends_on: Vec<EndpointId>,
    /// Whether this call's failure is tolerated by the overall plan.
    pub optional: bool,
    /// Whether a successful response may be cached.
    pub cacheable: bool,
    /// Volatility class driving the cache TTL.
    pub volatility: Volatility,
    /// Precomputed cache/coalescing key.
    pub fingerprint: Fingerprint,
}

/// A set of mutually independent calls eligible for concurrent dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stage {
    /// Calls in this stage, sorted by endpoint id.
    pub requests: Vec<CallRequest>,
}

/// An ordered sequence of stages produced by the planner.
///
/// Invariant: a call appears in a stage only after all of its dependencies
/// appear in strictly earlier stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPlan {
    /// Unique plan identifier.
    pub plan_id: String,
    /// Plan creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Stages in dependency order.
    pub stages: Vec<Stage>,
}

impl ExecutionPlan {
    /// Returns the total number of calls across all stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.iter().map(|s| s.requests.len()).sum()
    }

    /// Returns true if the plan schedules no calls.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.iter().all(|s| s.requests.is_empty())
    }

    /// Returns the call request for an endpoint, if it is in the plan.
    #[must_use]
    pub fn request(&self, endpoint: &EndpointId) -> Option<&CallRequest> {
        self.stages
            .iter()
            .flat_map(|s| s.requests.iter())
            .find(|r| &r.endpoint == endpoint)
    }

    /// Returns the stage index an endpoint was assigned to.
    #[must_use]
    pub fn stage_of(&self, endpoint: &EndpointId) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.requests.iter().any(|r| &r.endpoint == endpoint))
    }
}

/// Endpoint dependency planner.
///
/// Pure function of the catalog and its inputs: no side effects, no network.
pub struct Planner<'a> {
    catalog: &'a dyn Catalog,
}

impl<'a> Planner<'a> {
    /// Creates a planner over the given catalog.
    #[must_use]
    pub fn new(catalog: &'a dyn Catalog) -> Self {
        Self { catalog }
    }

    /// Produces an execution plan for the requested endpoints.
    ///
    /// The plan covers the transitive dependency closure of `requested`.
    /// Parameters are looked up per endpoint in `params`; endpoints absent
    /// from the map get an empty parameter set. Required parameters must be
    /// supplied for every endpoint in the closure, dependencies included.
    ///
    /// # Errors
    ///
    /// Returns an error if a referenced endpoint is unknown to the catalog,
    /// a required parameter is missing, the dependency graph contains a
    /// cycle, or the plan exceeds the per-plan call cap.
    #[tracing::instrument(skip(self, requested, params), fields(requested = requested.len()))]
    pub fn plan(
        &self,
        requested: &[EndpointId],
        params: &HashMap<EndpointId, Params>,
    ) -> Result<ExecutionPlan> {
        let closure = self.dependency_closure(requested)?;

        if closure.len() > MAX_CALLS_PER_PLAN {
            return Err(Error::PlanGenerationFailed {
                message: format!(
                    "plan would schedule {} calls, cap is {MAX_CALLS_PER_PLAN}",
                    closure.len()
                ),
            });
        }

        for descriptor in closure.values() {
            validate_params(descriptor, params.get(&descriptor.id))?;
        }

        let layers = layer_endpoints(&closure)?;

        let mut stages = Vec::with_capacity(layers.len());
        for layer in layers {
            let mut requests = Vec::with_capacity(layer.len());
            for endpoint in layer {
                let descriptor = closure.get(&endpoint).ok_or_else(|| Error::DagNodeNotFound {
                    node: endpoint.to_string(),
                })?;
                let call_params = params.get(&endpoint).cloned().unwrap_or_default();
                let fingerprint = Fingerprint::compute(&endpoint, &call_params)?;

                requests.push(CallRequest {
                    endpoint,
                    params: call_params,
                    depends_on: descriptor.depends_on.clone(),
                    optional: descriptor.optional,
                    cacheable: descriptor.cacheable,
                    volatility: descriptor.volatility,
                    fingerprint,
                });
            }
            stages.push(Stage { requests });
        }

        Ok(ExecutionPlan {
            plan_id: ulid::Ulid::new().to_string(),
            created_at: Utc::now(),
            stages,
        })
    }

    /// Expands the requested set to its transitive dependency closure.
    fn dependency_closure(
        &self,
        requested: &[EndpointId],
    ) -> Result<BTreeMap<EndpointId, EndpointDescriptor>> {
        let mut closure: BTreeMap<EndpointId, EndpointDescriptor> = BTreeMap::new();
        let mut queue: VecDeque<EndpointId> = requested.iter().cloned().collect();

        while let Some(endpoint) = queue.pop_front() {
            if closure.contains_key(&endpoint) {
                continue;
            }
            let descriptor = self.catalog.lookup(&endpoint)?.clone();
            for dep in &descriptor.depends_on {
                if !closure.contains_key(dep) {
                    queue.push_back(dep.clone());
                }
            }
            closure.insert(endpoint, descriptor);
        }

        Ok(closure)
    }
}

/// Validates supplied parameters against a descriptor's schema.
fn validate_params(descriptor: &EndpointDescriptor, supplied: Option<&Params>) -> Result<()> {
    for spec in &descriptor.params {
        if !spec.required {
            continue;
        }
        let present = supplied.is_some_and(|p| p.contains_key(&spec.name));
        if !present {
            return Err(Error::MissingParameter {
                endpoint: descriptor.id.clone(),
                parameter: spec.name.clone(),
            });
        }
    }
    Ok(())
}

/// Runs earliest-stage layering over the closure's dependency edges.
fn layer_endpoints(
    closure: &BTreeMap<EndpointId, EndpointDescriptor>,
) -> Result<Vec<Vec<EndpointId>>> {
    let mut dag: Dag<EndpointId> = Dag::new();

    // BTreeMap iteration gives a stable node order; layering sorts anyway.
    for endpoint in closure.keys() {
        dag.add_node(endpoint.clone());
    }
    for descriptor in closure.values() {
        let to = dag
            .get_index(&descriptor.id)
            .ok_or_else(|| Error::DagNodeNotFound {
                node: descriptor.id.to_string(),
            })?;
        for dep in &descriptor.depends_on {
            let from = dag.get_index(dep).ok_or_else(|| Error::DagNodeNotFound {
                node: dep.to_string(),
            })?;
            dag.add_edge(from, to)?;
        }
    }

    dag.layers()
}
