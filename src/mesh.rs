//! Mesh regions and basic procedural mesh generation.
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use crate::element::{ElementGeometry, ElementShape};

/// A 2D mesh region with cells of a single element shape.
///
/// The mesh is an external collaborator from the engine's point of view: the
/// assembly code only reads connectivity and vertex coordinates and never
/// mutates a mesh after construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mesh2d {
    shape: ElementShape,
    vertices: Vec<Point2<f64>>,
    // Flat connectivity with stride `shape.vertex_count()`
    connectivity: Vec<usize>,
}

impl Mesh2d {
    /// Creates a mesh from vertices and flat connectivity.
    ///
    /// # Panics
    ///
    /// Panics if the connectivity length is not a multiple of the shape's
    /// vertex count, or if any vertex index is out of bounds.
    pub fn from_vertices_and_connectivity(
        shape: ElementShape,
        vertices: Vec<Point2<f64>>,
        connectivity: Vec<usize>,
    ) -> Self {
        assert_eq!(
            connectivity.len() % shape.vertex_count(),
            0,
            "connectivity length must be a multiple of the cell vertex count"
        );
        assert!(
            connectivity.iter().all(|&v| v < vertices.len()),
            "connectivity references out-of-bounds vertex"
        );
        Self {
            shape,
            vertices,
            connectivity,
        }
    }

    pub fn shape(&self) -> ElementShape {
        self.shape
    }

    pub fn vertices(&self) -> &[Point2<f64>] {
        &self.vertices
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_cells(&self) -> usize {
        self.connectivity.len() / self.shape.vertex_count()
    }

    /// Global vertex indices of cell `index`.
    pub fn cell_vertices(&self, index: usize) -> &[usize] {
        let stride = self.shape.vertex_count();
        &self.connectivity[stride * index..stride * (index + 1)]
    }

    /// The geometric map of cell `index`.
    pub fn cell_geometry(&self, index: usize) -> ElementGeometry {
        let coords: Vec<_> = self
            .cell_vertices(index)
            .iter()
            .map(|&v| self.vertices[v])
            .collect();
        ElementGeometry::from_vertices(self.shape, &coords)
    }

    /// Splits a quadrilateral mesh into a triangle mesh, two triangles per
    /// quad, preserving orientation.
    ///
    /// # Panics
    ///
    /// Panics if the mesh is not a quadrilateral mesh.
    pub fn split_into_triangles(&self) -> Mesh2d {
        assert_eq!(self.shape, ElementShape::Quadrilateral);
        let mut connectivity = Vec::with_capacity(6 * self.num_cells());
        for cell in 0..self.num_cells() {
            let quad = self.cell_vertices(cell);
            connectivity.extend_from_slice(&[quad[0], quad[1], quad[2]]);
            connectivity.extend_from_slice(&[quad[0], quad[2], quad[3]]);
        }
        Mesh2d::from_vertices_and_connectivity(
            ElementShape::Triangle,
            self.vertices.clone(),
            connectivity,
        )
    }
}

/// Generates an axis-aligned rectangular uniform quadrilateral mesh with
/// `cells_x` by `cells_y` cells, anchored at `bottom_left`.
pub fn create_rectangular_uniform_quad_mesh(
    extents: Vector2<f64>,
    cells_x: usize,
    cells_y: usize,
    bottom_left: &Point2<f64>,
) -> Mesh2d {
    if cells_x == 0 || cells_y == 0 {
        return Mesh2d::from_vertices_and_connectivity(
            ElementShape::Quadrilateral,
            Vec::new(),
            Vec::new(),
        );
    }

    let mut vertices = Vec::with_capacity((cells_x + 1) * (cells_y + 1));
    let mut connectivity = Vec::with_capacity(4 * cells_x * cells_y);

    let dx = extents.x / cells_x as f64;
    let dy = extents.y / cells_y as f64;
    let to_global_vertex_index = |i, j| (cells_x + 1) * j + i;

    for j in 0..=cells_y {
        for i in 0..=cells_x {
            let v = bottom_left + Vector2::new(i as f64 * dx, j as f64 * dy);
            vertices.push(v);
        }
    }

    // Counter-clockwise cell orientation
    for j in 0..cells_y {
        for i in 0..cells_x {
            connectivity.extend_from_slice(&[
                to_global_vertex_index(i, j),
                to_global_vertex_index(i + 1, j),
                to_global_vertex_index(i + 1, j + 1),
                to_global_vertex_index(i, j + 1),
            ]);
        }
    }

    Mesh2d::from_vertices_and_connectivity(ElementShape::Quadrilateral, vertices, connectivity)
}

pub fn create_unit_square_uniform_quad_mesh(cells_per_dim: usize) -> Mesh2d {
    create_rectangular_uniform_quad_mesh(
        Vector2::new(1.0, 1.0),
        cells_per_dim,
        cells_per_dim,
        &Point2::new(0.0, 0.0),
    )
}

pub fn create_unit_square_uniform_tri_mesh(cells_per_dim: usize) -> Mesh2d {
    create_unit_square_uniform_quad_mesh(cells_per_dim).split_into_triangles()
}
