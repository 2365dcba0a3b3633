//! Scalar finite element spaces and their DOF layout.
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::element::{ElementShape, ReferenceBasis};
use crate::error::ConstructionError;
use crate::mesh::Mesh2d;

/// A scalar finite element space over a mesh region.
///
/// The space fixes the basis (through the approximation order) and the
/// local-to-global DOF map. It is immutable after construction: Newton
/// iterations and repeated projections reuse the same layout.
///
/// DOF numbering: vertex DOFs coincide with mesh vertex indices; order-2
/// spaces append one DOF per mesh edge (shared between the cells on that
/// edge) and, for quadrilaterals, one cell-interior DOF per cell.
#[derive(Debug, Clone)]
pub struct FieldSpace {
    mesh: Arc<Mesh2d>,
    basis: ReferenceBasis,
    num_dofs: usize,
    // Flat local-to-global map with stride `basis.num_functions()`
    element_dofs: Vec<usize>,
}

impl FieldSpace {
    pub fn new(mesh: Arc<Mesh2d>, order: usize) -> Result<Self, ConstructionError> {
        let basis = ReferenceBasis::new(mesh.shape(), order)?;
        let dofs_per_element = basis.num_functions();
        let mut element_dofs = Vec::with_capacity(dofs_per_element * mesh.num_cells());

        let mut num_dofs = mesh.num_vertices();
        if order == 1 {
            for cell in 0..mesh.num_cells() {
                element_dofs.extend_from_slice(mesh.cell_vertices(cell));
            }
        } else {
            // Edge DOFs are shared between neighbouring cells, so number them
            // through a map keyed by the (sorted) vertex pair of the edge.
            let mut edge_dofs: FxHashMap<(usize, usize), usize> = FxHashMap::default();
            for cell in 0..mesh.num_cells() {
                let vertices = mesh.cell_vertices(cell);
                element_dofs.extend_from_slice(vertices);
                for &(a, b) in mesh.shape().edges() {
                    let key = ordered_pair(vertices[a], vertices[b]);
                    let dof = *edge_dofs.entry(key).or_insert_with(|| {
                        let dof = num_dofs;
                        num_dofs += 1;
                        dof
                    });
                    element_dofs.push(dof);
                }
                if mesh.shape() == ElementShape::Quadrilateral {
                    element_dofs.push(num_dofs);
                    num_dofs += 1;
                }
            }
        }

        Ok(Self {
            mesh,
            basis,
            num_dofs,
            element_dofs,
        })
    }

    pub fn mesh(&self) -> &Arc<Mesh2d> {
        &self.mesh
    }

    pub fn shape(&self) -> ElementShape {
        self.mesh.shape()
    }

    pub fn basis(&self) -> &ReferenceBasis {
        &self.basis
    }

    /// The polynomial approximation order of the space.
    pub fn approx_order(&self) -> usize {
        self.basis.order()
    }

    /// The quadrature order used by the projection drivers unless overridden.
    pub fn default_quadrature_order(&self) -> usize {
        2 * self.approx_order()
    }

    /// Total number of degrees of freedom.
    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn num_elements(&self) -> usize {
        self.mesh.num_cells()
    }

    /// Number of DOFs on every element of the space.
    pub fn element_dof_count(&self) -> usize {
        self.basis.num_functions()
    }

    /// Global DOF indices of element `index`.
    pub fn element_dofs(&self, index: usize) -> &[usize] {
        let stride = self.element_dof_count();
        &self.element_dofs[stride * index..stride * (index + 1)]
    }

    /// Copies the global DOF indices of element `index` into `output`.
    ///
    /// # Panics
    ///
    /// Panics if `output` does not have `element_dof_count` entries.
    pub fn populate_element_dofs(&self, output: &mut [usize], index: usize) {
        output.copy_from_slice(self.element_dofs(index));
    }

    /// Whether two spaces share the same underlying mesh region.
    pub fn shares_mesh_with(&self, other: &FieldSpace) -> bool {
        Arc::ptr_eq(&self.mesh, &other.mesh)
    }
}

fn ordered_pair(a: usize, b: usize) -> (usize, usize) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}
