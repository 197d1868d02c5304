//! Property-based tests for planning invariants.
//!
//! These tests use proptest to verify the layering invariants hold across
//! randomly generated dependency graphs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::HashMap;

use proptest::prelude::*;

use matchday_flow::catalog::{EndpointDescriptor, EndpointId, StaticCatalog, Volatility};
use matchday_flow::plan::{ExecutionPlan, Planner};

/// Generates a random acyclic dependency graph as an adjacency list:
/// node `i` may only depend on lower-numbered nodes, which rules out
/// cycles by construction.
fn arb_dag(max_nodes: usize) -> impl Strategy<Value = Vec<Vec<usize>>> {
    (2..=max_nodes).prop_flat_map(|n| {
        prop::collection::vec(prop::collection::vec(any::<bool>(), n), n).prop_map(
            move |rows| {
                (0..n)
                    .map(|i| (0..i).filter(|&j| rows[i][j]).collect())
                    .collect()
            },
        )
    })
}

fn endpoint_name(index: usize) -> String {
    format!("endpoint_{index}")
}

fn catalog_from(deps: &[Vec<usize>]) -> StaticCatalog {
    let mut builder = StaticCatalog::builder();
    for (i, node_deps) in deps.iter().enumerate() {
        let mut descriptor = EndpointDescriptor::new(endpoint_name(i), Volatility::Daily);
        for &dep in node_deps {
            descriptor = descriptor.with_dependency(endpoint_name(dep));
        }
        builder = builder.endpoint(descriptor);
    }
    builder.build()
}

fn layout(plan: &ExecutionPlan) -> Vec<Vec<EndpointId>> {
    plan.stages
        .iter()
        .map(|s| s.requests.iter().map(|r| r.endpoint.clone()).collect())
        .collect()
}

proptest! {
    /// Every dependency lands in a strictly earlier stage than its
    /// dependent.
    #[test]
    fn dependencies_land_in_strictly_earlier_stages(deps in arb_dag(12)) {
        let catalog = catalog_from(&deps);
        let requested: Vec<EndpointId> =
            (0..deps.len()).map(|i| EndpointId::new(&endpoint_name(i))).collect();

        let plan = Planner::new(&catalog).plan(&requested, &HashMap::new()).unwrap();

        prop_assert_eq!(plan.len(), deps.len());
        for (i, node_deps) in deps.iter().enumerate() {
            let stage = plan.stage_of(&EndpointId::new(&endpoint_name(i))).unwrap();
            for &dep in node_deps {
                let dep_stage = plan.stage_of(&EndpointId::new(&endpoint_name(dep))).unwrap();
                prop_assert!(dep_stage < stage);
            }
        }
    }

    /// A call is never deferred past its earliest possible stage: its
    /// stage is exactly one past its latest dependency.
    #[test]
    fn calls_run_at_their_earliest_possible_stage(deps in arb_dag(12)) {
        let catalog = catalog_from(&deps);
        let requested: Vec<EndpointId> =
            (0..deps.len()).map(|i| EndpointId::new(&endpoint_name(i))).collect();

        let plan = Planner::new(&catalog).plan(&requested, &HashMap::new()).unwrap();

        for (i, node_deps) in deps.iter().enumerate() {
            let stage = plan.stage_of(&EndpointId::new(&endpoint_name(i))).unwrap();
            let latest_dep = node_deps
                .iter()
                .map(|&dep| plan.stage_of(&EndpointId::new(&endpoint_name(dep))).unwrap())
                .max();
            match latest_dep {
                Some(latest) => prop_assert_eq!(stage, latest + 1),
                None => prop_assert_eq!(stage, 0),
            }
        }
    }

    /// The stage layout is a pure function of the graph: request order
    /// never changes it.
    #[test]
    fn stage_layout_is_independent_of_request_order(deps in arb_dag(12)) {
        let catalog = catalog_from(&deps);
        let planner = Planner::new(&catalog);
        let requested: Vec<EndpointId> =
            (0..deps.len()).map(|i| EndpointId::new(&endpoint_name(i))).collect();
        let mut reversed = requested.clone();
        reversed.reverse();

        let forward = planner.plan(&requested, &HashMap::new()).unwrap();
        let backward = planner.plan(&reversed, &HashMap::new()).unwrap();

        prop_assert_eq!(layout(&forward), layout(&backward));
    }

    /// Requesting a subset plans exactly its transitive closure, each
    /// endpoint once.
    #[test]
    fn closure_contains_each_endpoint_exactly_once(deps in arb_dag(12)) {
        let catalog = catalog_from(&deps);
        let last = EndpointId::new(&endpoint_name(deps.len() - 1));

        let plan = Planner::new(&catalog).plan(&[last], &HashMap::new()).unwrap();

        let mut seen = std::collections::HashSet::new();
        for stage in &plan.stages {
            for request in &stage.requests {
                prop_assert!(seen.insert(request.endpoint.clone()));
            }
        }
    }
}
