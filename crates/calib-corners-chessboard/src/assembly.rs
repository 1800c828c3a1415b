//! Corner cloud to integer grid: spacing estimate, neighbour graph, largest
//! consistent component.

use crate::gridgraph::{assign_grid_coordinates, connected_components, GridGraph};
use crate::params::AssemblyParams;
use calib_corners_core::Corner;
use kiddo::{KdTree, SquaredEuclidean};
use log::debug;

/// A consistent grid component with coordinates shifted to start at `(0, 0)`.
#[derive(Clone, Debug)]
pub struct GridComponent {
    /// `(corner index, i, j)`; `i` grows to the right, `j` downwards.
    pub nodes: Vec<(usize, usize, usize)>,
    /// Span along `i`.
    pub width: usize,
    /// Span along `j`.
    pub height: usize,
    /// Spacing used to build the graph, in pixels.
    pub spacing: f32,
}

impl GridComponent {
    /// Every cell of the bounding rectangle is occupied.
    pub fn is_complete(&self) -> bool {
        self.nodes.len() == self.width * self.height
    }
}

/// Median distance from each corner to its nearest other corner.
pub fn estimate_spacing(corners: &[Corner]) -> Option<f32> {
    if corners.len() < 2 {
        return None;
    }
    let coords = corners
        .iter()
        .map(|c| [c.position.x, c.position.y])
        .collect::<Vec<_>>();
    let tree: KdTree<f32, 2> = (&coords).into();

    let mut dists: Vec<f32> = coords
        .iter()
        .enumerate()
        .filter_map(|(i, q)| {
            tree.nearest_n::<SquaredEuclidean>(q, 2)
                .into_iter()
                .find(|nn| nn.item as usize != i)
                .map(|nn| nn.distance.sqrt())
        })
        .filter(|d| *d > 0.0)
        .collect();
    if dists.is_empty() {
        return None;
    }
    let mid = dists.len() / 2;
    let (_, median, _) = dists.select_nth_unstable_by(mid, f32::total_cmp);
    Some(*median)
}

/// Build the grid graph and return the largest component with consistent
/// coordinates. Ties keep the component found first.
pub fn assemble_grid(corners: &[Corner], params: &AssemblyParams) -> Option<GridComponent> {
    let mut graph_params = params.graph.clone();
    let spacing = if params.spacing_tolerance > 0.0 {
        let s = estimate_spacing(corners)?;
        graph_params.min_spacing_pix = s * (1.0 - params.spacing_tolerance).max(0.0);
        graph_params.max_spacing_pix = s * (1.0 + params.spacing_tolerance);
        s
    } else {
        0.5 * (graph_params.min_spacing_pix + graph_params.max_spacing_pix)
    };

    let graph = GridGraph::new(corners, &graph_params);
    let mut best: Option<GridComponent> = None;
    let mut dropped = 0usize;

    for component in connected_components(&graph) {
        if component.len() < 2 {
            continue;
        }
        if best.as_ref().is_some_and(|b| b.nodes.len() >= component.len()) {
            continue;
        }
        let Some(coords) = assign_grid_coordinates(&graph, &component) else {
            dropped += 1;
            continue;
        };

        let min_i = coords.iter().map(|c| c.1).min()?;
        let min_j = coords.iter().map(|c| c.2).min()?;
        let max_i = coords.iter().map(|c| c.1).max()?;
        let max_j = coords.iter().map(|c| c.2).max()?;
        let nodes = coords
            .into_iter()
            .map(|(n, i, j)| (n, (i - min_i) as usize, (j - min_j) as usize))
            .collect();

        best = Some(GridComponent {
            nodes,
            width: (max_i - min_i + 1) as usize,
            height: (max_j - min_j + 1) as usize,
            spacing,
        });
    }

    if dropped > 0 {
        debug!("grid assembly dropped {dropped} inconsistent components");
    }
    best
}

/// Placement of a grid component on a `rows × cols` board.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BoardFit {
    /// Component `i` maps to board columns.
    Direct,
    /// Component `i` maps to board rows.
    Transposed,
}

impl BoardFit {
    /// Find a placement where the component fits inside the board.
    pub fn within(component: &GridComponent, rows: usize, cols: usize) -> Option<Self> {
        if component.width <= cols && component.height <= rows {
            Some(Self::Direct)
        } else if component.width <= rows && component.height <= cols {
            Some(Self::Transposed)
        } else {
            None
        }
    }

    /// Find a placement where the component covers the board exactly.
    pub fn exact(component: &GridComponent, rows: usize, cols: usize) -> Option<Self> {
        if !component.is_complete() {
            return None;
        }
        if component.width == cols && component.height == rows {
            Some(Self::Direct)
        } else if component.width == rows && component.height == cols {
            Some(Self::Transposed)
        } else {
            None
        }
    }

    /// `(row, col)` on the board for component coordinates `(i, j)`.
    pub fn board_position(self, i: usize, j: usize) -> (usize, usize) {
        match self {
            Self::Direct => (j, i),
            Self::Transposed => (i, j),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Point2;
    use std::f32::consts::FRAC_PI_4;

    fn lattice(cols: usize, rows: usize, spacing: f32, x0: f32) -> Vec<Corner> {
        let mut out = Vec::new();
        for j in 0..rows {
            for i in 0..cols {
                out.push(Corner {
                    position: Point2::new(x0 + i as f32 * spacing, 10.0 + j as f32 * spacing),
                    orientation: if (i + j) % 2 == 0 { FRAC_PI_4 } else { 3.0 * FRAC_PI_4 },
                    strength: 1.0,
                });
            }
        }
        out
    }

    #[test]
    fn spacing_is_median_nearest_distance() {
        let mut corners = lattice(5, 4, 20.0, 0.0);
        corners.push(Corner {
            position: Point2::new(500.0, 500.0),
            orientation: 0.0,
            strength: 1.0,
        });
        let s = estimate_spacing(&corners).expect("spacing");
        assert!((s - 20.0).abs() < 1e-4);
    }

    #[test]
    fn largest_component_wins() {
        let mut corners = lattice(5, 4, 20.0, 0.0);
        corners.extend(lattice(2, 2, 20.0, 400.0));
        let grid = assemble_grid(&corners, &AssemblyParams::default()).expect("grid");
        assert_eq!((grid.width, grid.height), (5, 4));
        assert!(grid.is_complete());
        assert!(grid.nodes.iter().all(|(n, _, _)| *n < 20));
    }

    #[test]
    fn fit_detects_transposed_board() {
        let grid = assemble_grid(&lattice(3, 5, 20.0, 0.0), &AssemblyParams::default()).expect("grid");
        assert_eq!(BoardFit::exact(&grid, 3, 5), Some(BoardFit::Transposed));
        assert_eq!(BoardFit::exact(&grid, 5, 3), Some(BoardFit::Direct));
        assert_eq!(BoardFit::exact(&grid, 4, 4), None);
        assert_eq!(BoardFit::within(&grid, 6, 4), Some(BoardFit::Direct));
        assert_eq!(BoardFit::Transposed.board_position(2, 4), (2, 4));
        assert_eq!(BoardFit::Direct.board_position(2, 4), (4, 2));
    }
}
