//! Least-cost path computation
//!
//! Dijkstra over the connected topology with linear-scan minimum
//! extraction; topologies stay in the hundreds of routers, so O(V²) is
//! fine here.
//!
//! Cost model: each hop contributes the connecting link's static cost plus
//! its src and dst latency, plus the cost factor of the router being
//! entered. The source router's cost factor is never counted; the
//! destination's is. Ties in the frontier resolve to the lexically lowest
//! router id, so equal-cost paths come out deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use trellis_core::{RouteError, RouterId};
use trellis_topology::{LinkController, Router, RouterRegistry};

use crate::path::Path;

/// Computes least-cost paths between connected routers
pub struct PathEngine {
    routers: Arc<RouterRegistry>,
    links: Arc<LinkController>,
}

impl PathEngine {
    pub fn new(routers: Arc<RouterRegistry>, links: Arc<LinkController>) -> Self {
        Self { routers, links }
    }

    /// Least-cost router sequence from `src` to `dst`, with its total cost.
    ///
    /// Routers flagged `no_traversal` are never expanded as transit hops,
    /// but may terminate the path.
    pub fn shortest_path(
        &self,
        src: &Arc<Router>,
        dst: &Arc<Router>,
    ) -> Result<(Vec<Arc<Router>>, i64), RouteError> {
        if !src.is_connected() {
            return Err(RouteError::NotRoutable(format!("source router {} not connected", src.id)));
        }
        if !dst.is_connected() {
            return Err(RouteError::NotRoutable(format!(
                "destination router {} not connected",
                dst.id
            )));
        }

        if src.id == dst.id {
            return Ok((vec![src.clone()], 0));
        }

        let mut dist: HashMap<RouterId, i64> = HashMap::new();
        let mut prev: HashMap<RouterId, Arc<Router>> = HashMap::new();
        let mut unvisited: HashMap<RouterId, Arc<Router>> = HashMap::new();

        for router in self.routers.all_connected() {
            dist.insert(router.id.clone(), i64::MAX);
            unvisited.insert(router.id.clone(), router);
        }
        dist.insert(src.id.clone(), 0);

        while !unvisited.is_empty() {
            let u = min_cost(&unvisited, &dist);
            let u = unvisited.remove(&u).expect("selected router is unvisited");

            if dist[&u.id] == i64::MAX {
                // remainder of the frontier is unreachable
                break;
            }

            for neighbor in self.links.connected_neighbors(&u) {
                if !unvisited.contains_key(&neighbor.id) {
                    continue;
                }
                // transit exclusion: only the destination may be entered
                // despite the flag
                if neighbor.no_traversal && neighbor.id != dst.id {
                    continue;
                }
                let Some(link) = self.links.least_expensive_link(&neighbor, &u) else {
                    continue;
                };
                let cost = neighbor.cost_factor
                    + link.static_cost
                    + link.src_latency()
                    + link.dst_latency();

                let alt = dist[&u.id].saturating_add(cost);
                if alt < dist[&neighbor.id] {
                    dist.insert(neighbor.id.clone(), alt);
                    prev.insert(neighbor.id.clone(), u.clone());
                }
            }
        }

        let mut router_path: Vec<Arc<Router>> = Vec::new();
        let mut p = prev.get(&dst.id);
        while let Some(router) = p {
            router_path.insert(0, router.clone());
            p = prev.get(&router.id);
        }
        router_path.push(dst.clone());

        if router_path[0].id != src.id {
            return Err(RouteError::NotRoutable(format!("no path from {} to {}", src.id, dst.id)));
        }

        let cost = dist[&dst.id];
        Ok((router_path, cost))
    }

    /// Build a full [`Path`] between two routers, selecting the least
    /// expensive link for every consecutive pair.
    pub fn create_path(
        &self,
        src: &Arc<Router>,
        dst: &Arc<Router>,
        ingress_address: impl Into<String>,
        egress_address: impl Into<String>,
    ) -> Result<Path, RouteError> {
        let (nodes, _cost) = self.shortest_path(src, dst)?;
        self.assemble(nodes, ingress_address.into(), egress_address.into())
    }

    /// Recompute a path between the same endpoints, keeping its ingress and
    /// egress addresses.
    pub fn update_path(&self, path: &Path) -> Result<Path, RouteError> {
        let src = path.ingress_router().clone();
        let dst = path.terminating_router().clone();
        let (nodes, _cost) = self.shortest_path(&src, &dst)?;
        self.assemble(
            nodes,
            path.ingress_address.clone(),
            path.egress_address.clone(),
        )
    }

    fn assemble(
        &self,
        nodes: Vec<Arc<Router>>,
        ingress_address: String,
        egress_address: String,
    ) -> Result<Path, RouteError> {
        let mut links = Vec::with_capacity(nodes.len().saturating_sub(1));
        for pair in nodes.windows(2) {
            let link = self
                .links
                .least_expensive_link(&pair[0], &pair[1])
                .ok_or_else(|| {
                    RouteError::NotRoutable(format!(
                        "no usable link between {} and {}",
                        pair[0].id, pair[1].id
                    ))
                })?;
            links.push(link);
        }
        Ok(Path {
            nodes,
            links,
            ingress_address,
            egress_address,
        })
    }
}

/// Linear-scan minimum extraction; ties resolve to the lowest router id.
fn min_cost(unvisited: &HashMap<RouterId, Arc<Router>>, dist: &HashMap<RouterId, i64>) -> RouterId {
    let mut selected: Option<(&RouterId, i64)> = None;
    for id in unvisited.keys() {
        let d = dist.get(id).copied().unwrap_or(i64::MAX);
        let better = match selected {
            None => true,
            Some((sel_id, sel_d)) => d < sel_d || (d == sel_d && id < sel_id),
        };
        if better {
            selected = Some((id, d));
        }
    }
    selected
        .map(|(id, _)| id.clone())
        .expect("frontier is non-empty")
}
