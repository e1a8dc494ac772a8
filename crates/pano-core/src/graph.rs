//! Correspondence graph over image indices.
//!
//! Vertices are images; an edge exists when at least one control point
//! connects two images, or when the images share a fully linked pose
//! (linked yaw, pitch and roll mean a rigid mount, which connects them
//! geometrically even without matched points). The graph is derived
//! state: rebuild it whenever control points change.

use std::collections::{BTreeSet, VecDeque};

use log::debug;

use crate::panorama::Panorama;

/// Undirected adjacency structure over image indices.
///
/// Parallel control points collapse to a single edge; self-loops are
/// never created (a control point from an image to itself is rejected at
/// insertion by the data model).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrespondenceGraph {
    adj: Vec<BTreeSet<usize>>,
}

impl CorrespondenceGraph {
    /// Build the graph for the panorama's current control points and
    /// pose links.
    pub fn build(pano: &Panorama) -> Self {
        let n = pano.num_images();
        let mut adj = vec![BTreeSet::new(); n];
        for cp in pano.control_points() {
            if cp.image1 == cp.image2 {
                continue;
            }
            adj[cp.image1].insert(cp.image2);
            adj[cp.image2].insert(cp.image1);
        }
        for i in 0..n {
            for j in (i + 1)..n {
                if pano.pose_linked_with(i, j) {
                    adj[i].insert(j);
                    adj[j].insert(i);
                }
            }
        }
        let edges: usize = adj.iter().map(|s| s.len()).sum::<usize>() / 2;
        debug!("correspondence graph: {n} images, {edges} edges");
        Self { adj }
    }

    pub fn num_vertices(&self) -> usize {
        self.adj.len()
    }

    pub fn neighbors(&self, v: usize) -> &BTreeSet<usize> {
        &self.adj[v]
    }

    /// Connected components in deterministic order: traversal always
    /// starts at the lowest-indexed unseen vertex, and each component is
    /// an ordered vertex set.
    pub fn connected_components(&self) -> Vec<BTreeSet<usize>> {
        let n = self.num_vertices();
        let mut seen = vec![false; n];
        let mut components = Vec::new();
        for start in 0..n {
            if seen[start] {
                continue;
            }
            let mut comp = BTreeSet::new();
            let mut queue = VecDeque::from([start]);
            seen[start] = true;
            while let Some(v) = queue.pop_front() {
                comp.insert(v);
                for &w in &self.adj[v] {
                    if !seen[w] {
                        seen[w] = true;
                        queue.push_back(w);
                    }
                }
            }
            components.push(comp);
        }
        components
    }

    /// Whether every image is reachable from every other.
    pub fn is_connected(&self) -> bool {
        self.connected_components().len() <= 1
    }

    /// Breadth-first traversal from `start`, calling the visitor for each
    /// vertex with the sets of its already-visited and not-yet-visited
    /// neighbors. Only the component containing `start` is traversed.
    pub fn visit_bfs<F>(&self, start: usize, mut visitor: F)
    where
        F: FnMut(usize, &BTreeSet<usize>, &BTreeSet<usize>),
    {
        let n = self.num_vertices();
        if start >= n {
            return;
        }
        let mut visited: BTreeSet<usize> = BTreeSet::new();
        let mut enqueued = vec![false; n];
        let mut queue = VecDeque::from([start]);
        enqueued[start] = true;
        while let Some(v) = queue.pop_front() {
            let visited_neighbors: BTreeSet<usize> =
                self.adj[v].iter().copied().filter(|w| visited.contains(w)).collect();
            let unvisited_neighbors: BTreeSet<usize> =
                self.adj[v].iter().copied().filter(|w| !visited.contains(w)).collect();
            visitor(v, &visited_neighbors, &unvisited_neighbors);
            visited.insert(v);
            for &w in &self.adj[v] {
                if !enqueued[w] {
                    enqueued[w] = true;
                    queue.push_back(w);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpoint::ControlPoint;
    use crate::panorama::ImageInfo;
    use crate::variables::VarName;

    fn pano_with_edges(n: usize, edges: &[(usize, usize)]) -> Panorama {
        let mut pano = Panorama::new();
        for _ in 0..n {
            pano.add_image(ImageInfo::new(100, 100));
        }
        for &(a, b) in edges {
            pano.add_control_point(ControlPoint::new(a, b, 0.0, 0.0, 0.0, 0.0))
                .unwrap();
        }
        pano
    }

    #[test]
    fn parallel_points_collapse_to_one_edge() {
        let pano = pano_with_edges(2, &[(0, 1), (0, 1), (1, 0)]);
        let g = CorrespondenceGraph::build(&pano);
        assert_eq!(g.neighbors(0).len(), 1);
        assert_eq!(g.neighbors(1).len(), 1);
    }

    #[test]
    fn components_are_deterministic() {
        let pano = pano_with_edges(5, &[(3, 4), (0, 2)]);
        let g = CorrespondenceGraph::build(&pano);
        let a = g.connected_components();
        let b = g.connected_components();
        assert_eq!(a, b);
        assert_eq!(a.len(), 3);
        assert_eq!(a[0], BTreeSet::from([0, 2]));
        assert_eq!(a[1], BTreeSet::from([1]));
        assert_eq!(a[2], BTreeSet::from([3, 4]));
    }

    #[test]
    fn two_disjoint_pairs_give_two_components() {
        let pano = pano_with_edges(4, &[(0, 1), (2, 3)]);
        let g = CorrespondenceGraph::build(&pano);
        assert!(!g.is_connected());
        assert_eq!(g.connected_components().len(), 2);
    }

    #[test]
    fn linked_pose_connects_unmatched_images() {
        let mut pano = pano_with_edges(3, &[(0, 1)]);
        for name in [VarName::Yaw, VarName::Pitch, VarName::Roll] {
            pano.link(2, 1, name);
        }
        let g = CorrespondenceGraph::build(&pano);
        assert!(g.is_connected());
    }

    #[test]
    fn chain_bfs_visits_in_order_with_anchored_neighbors() {
        // A-B, B-C: starting at A, B must be visited before C, and C's
        // visited neighbor set must contain exactly B.
        let pano = pano_with_edges(3, &[(0, 1), (1, 2)]);
        let g = CorrespondenceGraph::build(&pano);
        let mut log = Vec::new();
        g.visit_bfs(0, |v, visited, _unvisited| {
            log.push((v, visited.clone()));
        });
        assert_eq!(log.len(), 3);
        assert_eq!(log[0].0, 0);
        assert!(log[0].1.is_empty());
        assert_eq!(log[1], (1, BTreeSet::from([0])));
        assert_eq!(log[2], (2, BTreeSet::from([1])));
    }
}
