//! Link table and adjacency index
//!
//! Both tables live under one lock: an external observer must never see a
//! link present in the flat table but absent from the adjacency index, or
//! the reverse.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use trellis_core::{IdGenerator, LinkId, RouterId};

use crate::link::{Link, LinkMode};
use crate::router::Router;

#[derive(Default)]
struct Tables {
    /// Flat link table by id.
    links: HashMap<LinkId, Arc<Link>>,
    /// Router id -> neighbor router id -> links joining them. Every link
    /// appears under both of its endpoints.
    adjacency: HashMap<RouterId, HashMap<RouterId, Vec<Arc<Link>>>>,
}

impl Tables {
    fn insert(&mut self, link: Arc<Link>) {
        self.links.insert(link.id.clone(), link.clone());
        self.adjacency
            .entry(link.src.id.clone())
            .or_default()
            .entry(link.dst.id.clone())
            .or_default()
            .push(link.clone());
        self.adjacency
            .entry(link.dst.id.clone())
            .or_default()
            .entry(link.src.id.clone())
            .or_default()
            .push(link);
    }

    fn remove(&mut self, link: &Link) {
        self.links.remove(&link.id);
        for (a, b) in [
            (&link.src.id, &link.dst.id),
            (&link.dst.id, &link.src.id),
        ] {
            if let Some(neighbors) = self.adjacency.get_mut(a) {
                if let Some(links) = neighbors.get_mut(b) {
                    links.retain(|l| l.id != link.id);
                    if links.is_empty() {
                        neighbors.remove(b);
                    }
                }
                if neighbors.is_empty() {
                    self.adjacency.remove(a);
                }
            }
        }
    }

    /// De-duplicated union of a router's incident links, in id order. A
    /// link between mutual neighbors is reachable from both directions of
    /// the index, so the union must collapse duplicates.
    fn links_for_router(&self, router_id: &RouterId) -> Vec<Arc<Link>> {
        let Some(neighbors) = self.adjacency.get(router_id) else {
            return Vec::new();
        };
        let mut by_id: HashMap<&LinkId, &Arc<Link>> = HashMap::new();
        for links in neighbors.values() {
            for link in links {
                by_id.insert(&link.id, link);
            }
        }
        let mut links: Vec<Arc<Link>> = by_id.into_values().cloned().collect();
        links.sort_by(|a, b| a.id.cmp(&b.id));
        links
    }
}

/// Authoritative view of the fabric's links
pub struct LinkController {
    tables: RwLock<Tables>,
    id_generator: IdGenerator,
}

impl Default for LinkController {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkController {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            id_generator: IdGenerator::new(),
        }
    }

    pub fn add(&self, link: Arc<Link>) {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(link);
    }

    pub fn remove(&self, link: &Link) {
        self.tables
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(link);
    }

    pub fn get(&self, link_id: &LinkId) -> Option<Arc<Link>> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .links
            .get(link_id)
            .cloned()
    }

    pub fn has(&self, link_id: &LinkId) -> bool {
        self.get(link_id).is_some()
    }

    pub fn all(&self) -> Vec<Arc<Link>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut links: Vec<Arc<Link>> = tables.links.values().cloned().collect();
        links.sort_by(|a, b| a.id.cmp(&b.id));
        links
    }

    /// De-duplicated union of a router's incident links.
    pub fn links_for_router(&self, router_id: &RouterId) -> Vec<Arc<Link>> {
        self.tables
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .links_for_router(router_id)
    }

    /// Routers reachable from `router` over a usable (Connected, non-down)
    /// direct link.
    pub fn connected_neighbors(&self, router: &Router) -> Vec<Arc<Router>> {
        let links = self.links_for_router(&router.id);
        let mut neighbors: HashMap<RouterId, Arc<Router>> = HashMap::new();
        for link in links {
            if !link.is_usable() {
                continue;
            }
            if link.src.id != router.id {
                neighbors.insert(link.src.id.clone(), link.src.clone());
            }
            if link.dst.id != router.id {
                neighbors.insert(link.dst.id.clone(), link.dst.clone());
            }
        }
        let mut neighbors: Vec<Arc<Router>> = neighbors.into_values().collect();
        neighbors.sort_by(|a, b| a.id.cmp(&b.id));
        neighbors
    }

    /// The usable link directly joining `a` and `b` with the lowest
    /// src+dst latency. Ties resolve to the lowest link id.
    pub fn least_expensive_link(&self, a: &Router, b: &Router) -> Option<Arc<Link>> {
        self.links_for_router(&a.id)
            .into_iter()
            .filter(|link| link.is_usable() && link.joins(a, b))
            .min_by(|x, y| {
                x.latency_metric()
                    .cmp(&y.latency_metric())
                    .then_with(|| x.id.cmp(&y.id))
            })
    }

    pub fn links_in_mode(&self, mode: LinkMode) -> Vec<Arc<Link>> {
        self.all()
            .into_iter()
            .filter(|link| link.current_mode() == mode)
            .collect()
    }

    /// Propose links that should exist but do not: for every connected pair
    /// where the destination advertises a listener and no Pending or
    /// Connected link joins the pair in either direction, a fresh Pending
    /// link is returned (not yet added). One proposal per unordered pair
    /// per pass.
    pub fn missing_links(&self, routers: &[Arc<Router>]) -> Vec<Arc<Link>> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mut proposed: Vec<Arc<Link>> = Vec::new();
        for src in routers {
            for dst in routers {
                if src.id == dst.id || dst.advertised_listener.is_empty() {
                    continue;
                }
                if proposed.iter().any(|l| l.joins(src, dst)) {
                    continue;
                }
                let exists = tables.links_for_router(&src.id).iter().any(|l| {
                    l.joins(src, dst)
                        && matches!(l.current_mode(), LinkMode::Pending | LinkMode::Connected)
                });
                if !exists {
                    let link = Link::new(self.id_generator.next_id(), src.clone(), dst.clone());
                    proposed.push(Arc::new(link));
                }
            }
        }
        proposed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkState;

    fn router(id: &str) -> Arc<Router> {
        Arc::new(Router::new(id, "", "tcp:0.0.0.0:0", None))
    }

    fn connected_link(id: &str, src: &Arc<Router>, dst: &Arc<Router>) -> Arc<Link> {
        let link = Link::new(id, src.clone(), dst.clone());
        link.add_state(LinkState::new(LinkMode::Connected));
        Arc::new(link)
    }

    #[test]
    fn add_remove_keeps_tables_consistent() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");
        let link = connected_link("l0", &a, &b);

        controller.add(link.clone());
        assert!(controller.has(&link.id));
        assert_eq!(controller.links_for_router(&a.id).len(), 1);
        assert_eq!(controller.links_for_router(&b.id).len(), 1);

        controller.remove(&link);
        assert!(!controller.has(&link.id));
        assert!(controller.links_for_router(&a.id).is_empty());
        assert!(controller.links_for_router(&b.id).is_empty());
    }

    #[test]
    fn links_for_router_deduplicates() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");
        controller.add(connected_link("l0", &a, &b));
        controller.add(connected_link("l1", &b, &a));

        let links = controller.links_for_router(&a.id);
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].id.as_str(), "l0");
        assert_eq!(links[1].id.as_str(), "l1");
    }

    #[test]
    fn least_expensive_link_minimizes_latency_sum() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");

        let cheap = connected_link("l1", &a, &b);
        cheap.set_src_latency(5);
        cheap.set_dst_latency(5);

        let expensive = connected_link("l0", &b, &a);
        expensive.set_src_latency(50);
        expensive.set_dst_latency(50);

        controller.add(expensive);
        controller.add(cheap);

        let selected = controller.least_expensive_link(&a, &b).unwrap();
        assert_eq!(selected.id.as_str(), "l1");
    }

    #[test]
    fn least_expensive_link_ties_break_to_lowest_id() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");
        controller.add(connected_link("l1", &a, &b));
        controller.add(connected_link("l0", &a, &b));

        let selected = controller.least_expensive_link(&a, &b).unwrap();
        assert_eq!(selected.id.as_str(), "l0");
    }

    #[test]
    fn least_expensive_link_skips_unusable() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");

        let failed = connected_link("l0", &a, &b);
        failed.add_state(LinkState::new(LinkMode::Failed));
        controller.add(failed);

        assert!(controller.least_expensive_link(&a, &b).is_none());

        let down = connected_link("l1", &a, &b);
        down.set_down(true);
        controller.add(down);

        assert!(controller.least_expensive_link(&a, &b).is_none());
    }

    #[test]
    fn connected_neighbors_ignores_failed_links() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");
        let c = router("c");

        controller.add(connected_link("l0", &a, &b));
        let failed = connected_link("l1", &a, &c);
        failed.add_state(LinkState::new(LinkMode::Failed));
        controller.add(failed);

        let neighbors = controller.connected_neighbors(&a);
        assert_eq!(neighbors.len(), 1);
        assert_eq!(neighbors[0].id.as_str(), "b");
    }

    #[test]
    fn missing_links_proposes_one_per_unordered_pair() {
        let controller = LinkController::new();
        let a = router("a");
        let b = router("b");
        let c = router("c");
        controller.add(connected_link("l0", &a, &b));

        let routers = vec![a.clone(), b.clone(), c.clone()];
        let proposed = controller.missing_links(&routers);

        // a-b exists; a-c and b-c are each proposed once
        assert_eq!(proposed.len(), 2);
        assert!(proposed.iter().all(|l| l.current_mode() == LinkMode::Pending));
        assert!(proposed.iter().any(|l| l.joins(&a, &c)));
        assert!(proposed.iter().any(|l| l.joins(&b, &c)));
    }

    #[test]
    fn missing_links_skips_unadvertised_destinations() {
        let controller = LinkController::new();
        let a = router("a");
        let silent = Arc::new(Router::new("s", "", "", None));

        let proposed = controller.missing_links(&[a, silent.clone()]);
        // nothing dials toward s, and s has nothing to dial toward either
        assert_eq!(proposed.len(), 1);
        assert_eq!(proposed[0].dst.id.as_str(), "a");
    }
}
