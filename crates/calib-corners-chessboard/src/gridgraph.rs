use crate::geom::{angle_diff_abs, axis_vec_diff, is_orthogonal};
use crate::params::GridGraphParams;
use calib_corners_core::Corner;
use kiddo::{KdTree, SquaredEuclidean};
use nalgebra::Vector2;
use std::collections::{HashMap, VecDeque};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NeighborDirection {
    Right,
    Left,
    Up,
    Down,
}

impl NeighborDirection {
    const ALL: [Self; 4] = [Self::Right, Self::Left, Self::Up, Self::Down];

    pub fn opposite(self) -> Self {
        Self::ALL[self.slot() ^ 1]
    }

    fn slot(self) -> usize {
        self as usize
    }

    /// Step in grid coordinates `(i, j)`; `j` grows downwards.
    pub fn delta(self) -> (i32, i32) {
        match self {
            Self::Right => (1, 0),
            Self::Left => (-1, 0),
            Self::Up => (0, -1),
            Self::Down => (0, 1),
        }
    }

    /// Dominant axis of an image-space offset.
    fn of_offset(v: &Vector2<f32>) -> Self {
        match (v.x.abs() > v.y.abs(), v.x >= 0.0, v.y >= 0.0) {
            (true, true, _) => Self::Right,
            (true, false, _) => Self::Left,
            (false, _, true) => Self::Down,
            (false, _, false) => Self::Up,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NodeNeighbor {
    pub direction: NeighborDirection,
    pub index: usize,
    pub distance: f32,
    pub score: f32,
}

fn is_good_neighbor(
    corner: &Corner,
    neighbor: &Corner,
    neighbor_index: usize,
    params: &GridGraphParams,
) -> Option<NodeNeighbor> {
    let tol = params.orientation_tolerance_deg.to_radians();

    // Adjacent corners see the white diagonal swapped.
    if !is_orthogonal(corner.orientation, neighbor.orientation, tol) {
        return None;
    }

    let v = neighbor.position - corner.position;
    let distance = v.norm();
    if distance < params.min_spacing_pix || distance > params.max_spacing_pix {
        return None;
    }

    // Orientation is the white diagonal, so a grid edge sits at ~45° to both.
    let edge_angle = v.y.atan2(v.x);
    let expected = std::f32::consts::FRAC_PI_4;
    let score_corner = (axis_vec_diff(corner.orientation, edge_angle) - expected).abs();
    let score_neighbor = (axis_vec_diff(neighbor.orientation, edge_angle) - expected).abs();
    if score_corner > tol || score_neighbor > tol {
        return None;
    }

    let score_orientation = (std::f32::consts::FRAC_PI_2
        - angle_diff_abs(corner.orientation, neighbor.orientation))
    .abs();

    Some(NodeNeighbor {
        direction: NeighborDirection::of_offset(&v),
        index: neighbor_index,
        distance,
        score: score_corner + score_neighbor + score_orientation,
    })
}

/// Best candidate per direction: lowest score, ties broken by distance.
fn select_neighbors(candidates: Vec<NodeNeighbor>) -> Vec<NodeNeighbor> {
    let mut best: [Option<NodeNeighbor>; 4] = Default::default();
    for candidate in candidates {
        let slot = &mut best[candidate.direction.slot()];
        let better = slot.as_ref().map_or(true, |current| {
            (candidate.score, candidate.distance) < (current.score, current.distance)
        });
        if better {
            *slot = Some(candidate);
        }
    }
    best.into_iter().flatten().collect()
}

/// 4-connected neighbour graph over corners. Edges are mutual.
pub struct GridGraph {
    pub neighbors: Vec<Vec<NodeNeighbor>>,
}

impl GridGraph {
    pub fn new(corners: &[Corner], params: &GridGraphParams) -> Self {
        if corners.is_empty() {
            return Self {
                neighbors: Vec::new(),
            };
        }

        let coords = corners
            .iter()
            .map(|c| [c.position.x, c.position.y])
            .collect::<Vec<_>>();
        let tree: KdTree<f32, 2> = (&coords).into();
        let k = params.k_neighbors.max(2).min(corners.len());

        let mut neighbors = Vec::with_capacity(corners.len());
        for (i, corner) in corners.iter().enumerate() {
            let query = [corner.position.x, corner.position.y];
            let candidates = tree
                .nearest_n::<SquaredEuclidean>(&query, k)
                .into_iter()
                .map(|nn| nn.item as usize)
                .filter(|&j| j != i)
                .filter_map(|j| is_good_neighbor(corner, &corners[j], j, params))
                .collect();
            neighbors.push(select_neighbors(candidates));
        }

        // Keep only edges confirmed from both ends with opposite directions.
        let snapshot: Vec<Vec<(usize, NeighborDirection)>> = neighbors
            .iter()
            .map(|ns| ns.iter().map(|n| (n.index, n.direction)).collect())
            .collect();
        for (i, ns) in neighbors.iter_mut().enumerate() {
            ns.retain(|n| snapshot[n.index].contains(&(i, n.direction.opposite())));
        }

        Self { neighbors }
    }
}

pub fn connected_components(graph: &GridGraph) -> Vec<Vec<usize>> {
    let mut visited = vec![false; graph.neighbors.len()];
    let mut components = Vec::new();

    for start in 0..graph.neighbors.len() {
        if visited[start] {
            continue;
        }

        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(node) = stack.pop() {
            if visited[node] {
                continue;
            }
            visited[node] = true;
            component.push(node);
            for neighbor in &graph.neighbors[node] {
                if !visited[neighbor.index] {
                    stack.push(neighbor.index);
                }
            }
        }
        component.sort_unstable();
        components.push(component);
    }

    components
}

/// BFS integer coordinates `(node, i, j)` for one component.
///
/// Returns `None` when two nodes land on the same cell or an edge disagrees
/// with the coordinates of its endpoints.
pub fn assign_grid_coordinates(
    graph: &GridGraph,
    component: &[usize],
) -> Option<Vec<(usize, i32, i32)>> {
    let start = *component.first()?;
    let mut coord_of: HashMap<usize, (i32, i32)> = HashMap::with_capacity(component.len());
    let mut node_at: HashMap<(i32, i32), usize> = HashMap::with_capacity(component.len());
    let mut order = Vec::with_capacity(component.len());
    let mut queue = VecDeque::new();

    coord_of.insert(start, (0, 0));
    node_at.insert((0, 0), start);
    queue.push_back(start);

    while let Some(node) = queue.pop_front() {
        let (i, j) = coord_of[&node];
        order.push((node, i, j));

        for neighbor in &graph.neighbors[node] {
            let (di, dj) = neighbor.direction.delta();
            let target = (i + di, j + dj);
            match coord_of.get(&neighbor.index) {
                Some(&existing) => {
                    if existing != target {
                        return None;
                    }
                }
                None => {
                    if node_at.insert(target, neighbor.index).is_some() {
                        return None;
                    }
                    coord_of.insert(neighbor.index, target);
                    queue.push_back(neighbor.index);
                }
            }
        }
    }

    Some(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;
    use std::f32::consts::FRAC_PI_4;

    fn make_corner(x: f32, y: f32, orientation: f32) -> Corner {
        Corner {
            position: Point2::new(x, y),
            orientation,
            strength: 1.0,
        }
    }

    fn lattice(cols: usize, rows: usize, spacing: f32) -> Vec<Corner> {
        let mut corners = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                let orientation = if (i + j) % 2 == 0 {
                    FRAC_PI_4
                } else {
                    3.0 * FRAC_PI_4
                };
                corners.push(make_corner(i as f32 * spacing, j as f32 * spacing, orientation));
            }
        }
        corners
    }

    fn neighbor_map(neighbors: &[NodeNeighbor]) -> HashMap<NeighborDirection, &NodeNeighbor> {
        neighbors.iter().map(|n| (n.direction, n)).collect()
    }

    fn params() -> GridGraphParams {
        GridGraphParams {
            min_spacing_pix: 5.0,
            max_spacing_pix: 15.0,
            ..Default::default()
        }
    }

    #[test]
    fn finds_axis_neighbors_in_regular_grid() {
        let cols = 3;
        let corners = lattice(cols, 3, 10.0);
        let graph = GridGraph::new(&corners, &params());
        let idx = |i: usize, j: usize| j * cols + i;

        let center = neighbor_map(&graph.neighbors[idx(1, 1)]);
        assert_eq!(4, center.len());
        assert_eq!(idx(0, 1), center[&NeighborDirection::Left].index);
        assert_eq!(idx(2, 1), center[&NeighborDirection::Right].index);
        assert_eq!(idx(1, 0), center[&NeighborDirection::Up].index);
        assert_eq!(idx(1, 2), center[&NeighborDirection::Down].index);

        let top_left = neighbor_map(&graph.neighbors[idx(0, 0)]);
        assert_eq!(2, top_left.len());
        assert!(top_left.contains_key(&NeighborDirection::Right));
        assert!(top_left.contains_key(&NeighborDirection::Down));
    }

    #[test]
    fn rejects_neighbors_when_orientation_relation_invalid() {
        let corners = vec![make_corner(0.0, 0.0, FRAC_PI_4), make_corner(10.0, 0.0, FRAC_PI_4)];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors[0].is_empty());
        assert!(graph.neighbors[1].is_empty());
    }

    #[test]
    fn rejects_neighbors_outside_distance_window() {
        let corners = vec![
            make_corner(0.0, 0.0, FRAC_PI_4),
            make_corner(30.0, 0.0, 3.0 * FRAC_PI_4),
        ];
        let graph = GridGraph::new(&corners, &params());
        assert!(graph.neighbors[0].is_empty());
        assert!(graph.neighbors[1].is_empty());
    }

    #[test]
    fn bfs_coordinates_cover_component() {
        let corners = lattice(4, 3, 10.0);
        let graph = GridGraph::new(&corners, &params());
        let comps = connected_components(&graph);
        assert_eq!(comps.len(), 1);
        let coords = assign_grid_coordinates(&graph, &comps[0]).expect("consistent");
        assert_eq!(coords.len(), 12);
        for (node, i, j) in coords {
            assert_eq!((node % 4) as i32, i);
            assert_eq!((node / 4) as i32, j);
        }
    }
}
