//! Circuit paths
//!
//! A path is an ordered router sequence plus the links joining consecutive
//! routers: `nodes.len() == links.len() + 1` always holds. The ingress and
//! egress addresses anchor the data plane at the two ends.

use std::fmt::{self, Display};
use std::sync::Arc;

use trellis_core::LinkId;
use trellis_topology::{Link, Router};

#[derive(Clone)]
pub struct Path {
    pub nodes: Vec<Arc<Router>>,
    pub links: Vec<Arc<Link>>,
    pub ingress_address: String,
    pub egress_address: String,
}

impl Path {
    /// Sum of directional link latencies along the path.
    pub fn latency(&self) -> i64 {
        self.links
            .iter()
            .map(|l| l.src_latency() + l.dst_latency())
            .sum()
    }

    pub fn uses_link(&self, link_id: &LinkId) -> bool {
        self.links.iter().any(|l| &l.id == link_id)
    }

    pub fn ingress_router(&self) -> &Arc<Router> {
        &self.nodes[0]
    }

    pub fn terminating_router(&self) -> &Arc<Router> {
        self.nodes.last().expect("path has at least one node")
    }

    /// Paths are the same when they visit the same routers over the same
    /// links.
    pub fn same_path(&self, other: &Path) -> bool {
        self.nodes.len() == other.nodes.len()
            && self.links.len() == other.links.len()
            && self
                .nodes
                .iter()
                .zip(&other.nodes)
                .all(|(a, b)| a.id == b.id)
            && self
                .links
                .iter()
                .zip(&other.links)
                .all(|(a, b)| a.id == b.id)
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[r/{}]", self.nodes[0].id)?;
        for (link, node) in self.links.iter().zip(self.nodes.iter().skip(1)) {
            write!(f, "->[l/{}]->[r/{}]", link.id, node.id)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_topology::{LinkMode, LinkState};

    fn router(id: &str) -> Arc<Router> {
        Arc::new(Router::new(id, "", "", None))
    }

    fn link(id: &str, src: &Arc<Router>, dst: &Arc<Router>, latency: i64) -> Arc<Link> {
        let link = Link::new(id, src.clone(), dst.clone());
        link.add_state(LinkState::new(LinkMode::Connected));
        link.set_src_latency(latency);
        link.set_dst_latency(latency);
        Arc::new(link)
    }

    fn two_hop() -> Path {
        let a = router("a");
        let b = router("b");
        let c = router("c");
        Path {
            links: vec![link("l0", &a, &b, 10), link("l1", &b, &c, 20)],
            nodes: vec![a, b, c],
            ingress_address: "i1".to_string(),
            egress_address: "e1".to_string(),
        }
    }

    #[test]
    fn latency_sums_both_directions() {
        assert_eq!(two_hop().latency(), 60);
    }

    #[test]
    fn same_path_compares_by_ids() {
        let p = two_hop();
        let q = two_hop();
        assert!(p.same_path(&q));

        let mut shorter = two_hop();
        shorter.nodes.pop();
        shorter.links.pop();
        assert!(!p.same_path(&shorter));
    }

    #[test]
    fn uses_link_by_id() {
        let p = two_hop();
        assert!(p.uses_link(&LinkId::new("l1")));
        assert!(!p.uses_link(&LinkId::new("l9")));
    }

    #[test]
    fn displays_hop_chain() {
        assert_eq!(two_hop().to_string(), "[r/a]->[l/l0]->[r/b]->[l/l1]->[r/c]");
    }
}
