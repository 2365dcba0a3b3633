//! Global system assembly: DOF numbering, sparsity pattern and evaluation.
use nalgebra::{DMatrix, DVector, Matrix2xX, Point2};
use nalgebra_sparse::csr::CsrMatrix;
use nalgebra_sparse::pattern::SparsityPattern;
use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::assembly::local::{
    assemble_element_gradient_source_vector, assemble_element_laplace_matrix,
    assemble_element_mass_matrix, assemble_element_source_vector, Sign, Term, TermKind,
    TermOperand,
};
use crate::error::{AssemblyError, ConstructionError};
use crate::variable::VariableRole;

/// A named, signed sum of weak-form terms sharing one test variable.
///
/// Equations are built with [`plus`](Equation::plus) and
/// [`minus`](Equation::minus); every added term must use the same test
/// variable as the first one, so that all terms contribute rows to the same
/// block of the system.
#[derive(Debug)]
pub struct Equation {
    name: String,
    terms: Vec<(Sign, Term)>,
}

impl Equation {
    /// Creates an equation from its first term, taken with positive sign.
    pub fn new(name: impl Into<String>, term: Term) -> Self {
        Self {
            name: name.into(),
            terms: vec![(Sign::Plus, term)],
        }
    }

    /// Adds a term with positive sign.
    pub fn plus(self, term: Term) -> Result<Self, ConstructionError> {
        self.with_term(Sign::Plus, term)
    }

    /// Adds a term with negative sign.
    pub fn minus(self, term: Term) -> Result<Self, ConstructionError> {
        self.with_term(Sign::Minus, term)
    }

    fn with_term(mut self, sign: Sign, term: Term) -> Result<Self, ConstructionError> {
        let existing = self.test_operand();
        let added = term.test_operand();
        // Same name is not enough: the operands must refer to the same space,
        // or the terms would write rows against different DOF layouts.
        if added.name != existing.name || !std::sync::Arc::ptr_eq(&added.space, &existing.space) {
            return Err(ConstructionError::TestVariableMismatch {
                equation: self.name.clone(),
                term: term.kind().name(),
            });
        }
        self.terms.push((sign, term));
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn terms(&self) -> impl Iterator<Item = (Sign, &Term)> {
        self.terms.iter().map(|(sign, term)| (*sign, term))
    }

    fn test_operand(&self) -> &TermOperand {
        // An equation always holds at least one term
        self.terms[0].1.test_operand()
    }
}

/// One numbered unknown: its global DOF offset and the space defining its
/// layout.
#[derive(Debug, Clone)]
struct NumberedVariable {
    offset: usize,
    space: std::sync::Arc<crate::space::FieldSpace>,
}

/// The assembled nonlinear system: residual and tangent of a set of
/// equations with respect to the numbered unknowns.
///
/// Construction performs the expensive one-time work: DOF numbering over all
/// unknown variables and the union sparsity pattern of all matrix terms.
/// [`evaluate`](EquationSystem::evaluate) then fills residual and tangent
/// values in place for a given state, reusing the pattern on every call.
pub struct EquationSystem {
    equations: Vec<Equation>,
    numbering: Vec<NumberedVariable>,
    variable_indices: FxHashMap<String, usize>,
    num_dofs: usize,
    residual: DVector<f64>,
    tangent: CsrMatrix<f64>,
}

impl EquationSystem {
    /// Numbers the unknowns appearing in `equations` and builds the sparsity
    /// pattern of the tangent.
    ///
    /// Unknowns are numbered in order of first appearance, so the numbering
    /// (and hence the pattern) is deterministic across runs.
    pub fn new(equations: Vec<Equation>) -> Result<Self, AssemblyError> {
        let (numbering, variable_indices) = Self::number_unknowns(&equations)?;
        let num_dofs = numbering
            .last()
            .map(|v| v.offset + v.space.num_dofs())
            .unwrap_or(0);

        let pattern = Self::build_pattern(&equations, &numbering, &variable_indices, num_dofs)?;
        let nnz = pattern.nnz();
        let tangent = CsrMatrix::try_from_pattern_and_values(pattern, vec![0.0; nnz])
            .expect("pattern and value array are constructed consistently");

        Ok(Self {
            equations,
            numbering,
            variable_indices,
            num_dofs,
            residual: DVector::zeros(num_dofs),
            tangent,
        })
    }

    fn number_unknowns(
        equations: &[Equation],
    ) -> Result<(Vec<NumberedVariable>, FxHashMap<String, usize>), AssemblyError> {
        let mut numbering: Vec<NumberedVariable> = Vec::new();
        let mut indices = FxHashMap::default();
        let mut offset = 0;

        for equation in equations {
            for (_, term) in equation.terms() {
                let Some(unknown) = term.unknown_operand() else {
                    continue;
                };
                if unknown.role != VariableRole::Unknown {
                    continue;
                }
                match indices.get(&unknown.name) {
                    None => {
                        indices.insert(unknown.name.clone(), numbering.len());
                        numbering.push(NumberedVariable {
                            offset,
                            space: unknown.space.clone(),
                        });
                        offset += unknown.space.num_dofs();
                    }
                    Some(&index) => {
                        let existing: &NumberedVariable = &numbering[index];
                        if !std::sync::Arc::ptr_eq(&existing.space, &unknown.space) {
                            return Err(AssemblyError::ConflictingNumbering {
                                variable: unknown.name.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok((numbering, indices))
    }

    /// Offset of the rows a term writes to: the numbering entry of the test
    /// variable's primary unknown.
    fn row_offset_in(
        numbering: &[NumberedVariable],
        indices: &FxHashMap<String, usize>,
        test: &TermOperand,
    ) -> Result<usize, AssemblyError> {
        let primary = test.primary.as_ref().ok_or(AssemblyError::SpaceNotNumbered {
            variable: test.name.clone(),
        })?;
        let index = indices.get(primary).ok_or(AssemblyError::SpaceNotNumbered {
            variable: primary.clone(),
        })?;
        Ok(numbering[*index].offset)
    }

    fn column_offset_in(
        numbering: &[NumberedVariable],
        indices: &FxHashMap<String, usize>,
        unknown: &TermOperand,
    ) -> Result<usize, AssemblyError> {
        let index = indices
            .get(&unknown.name)
            .ok_or(AssemblyError::SpaceNotNumbered {
                variable: unknown.name.clone(),
            })?;
        Ok(numbering[*index].offset)
    }

    fn build_pattern(
        equations: &[Equation],
        numbering: &[NumberedVariable],
        indices: &FxHashMap<String, usize>,
        num_dofs: usize,
    ) -> Result<SparsityPattern, AssemblyError> {
        let mut coordinates: Vec<(usize, usize)> = Vec::new();

        for equation in equations {
            for (_, term) in equation.terms() {
                let Some(unknown) = term.unknown_operand() else {
                    continue;
                };
                if unknown.role != VariableRole::Unknown {
                    continue;
                }
                let test = term.test_operand();
                let row_offset = Self::row_offset_in(numbering, indices, test)?;
                let col_offset = Self::column_offset_in(numbering, indices, unknown)?;

                let row_space = &test.space;
                let col_space = &unknown.space;
                let element_coordinates: Vec<(usize, usize)> = (0..row_space.num_elements())
                    .into_par_iter()
                    .flat_map_iter(|element| {
                        let rows = row_space.element_dofs(element);
                        let cols = col_space.element_dofs(element);
                        rows.iter()
                            .flat_map(move |&i| {
                                cols.iter().map(move |&j| (row_offset + i, col_offset + j))
                            })
                            .collect::<Vec<_>>()
                    })
                    .collect();
                coordinates.extend(element_coordinates);
            }
        }

        coordinates.par_sort_unstable();
        coordinates.dedup();

        let mut offsets = Vec::with_capacity(num_dofs + 1);
        let mut column_indices = Vec::with_capacity(coordinates.len());
        offsets.push(0);
        let mut current_row = 0;
        for (i, j) in coordinates {
            while current_row < i {
                offsets.push(column_indices.len());
                current_row += 1;
            }
            column_indices.push(j);
        }
        while offsets.len() < num_dofs + 1 {
            offsets.push(column_indices.len());
        }

        Ok(SparsityPattern::try_from_offsets_and_indices(
            num_dofs,
            num_dofs,
            offsets,
            column_indices,
        )
        .expect("sorted, deduplicated coordinates form a valid pattern"))
    }

    /// Evaluates residual and tangent at the given state.
    ///
    /// The residual is `r(u) = sum_terms sign * contribution(u)`; the tangent
    /// collects the matrices of the matrix-valued terms with the same signs.
    /// Values from previous calls are discarded.
    pub fn evaluate(&mut self, state: &DVector<f64>) -> Result<(), AssemblyError> {
        if state.len() != self.num_dofs {
            return Err(AssemblyError::StateDimensionMismatch {
                expected: self.num_dofs,
                found: state.len(),
            });
        }

        self.residual.fill(0.0);
        self.tangent.values_mut().fill(0.0);

        for equation_index in 0..self.equations.len() {
            for term_index in 0..self.equations[equation_index].terms.len() {
                let (sign, ref term) = self.equations[equation_index].terms[term_index];
                let test = term.test_operand();
                let row_offset = Self::row_offset_in(&self.numbering, &self.variable_indices, test)?;

                if term.kind().is_matrix_term() {
                    let unknown = term
                        .unknown_operand()
                        .expect("matrix terms always carry an unknown operand");
                    let contributes_to_tangent = unknown.role == VariableRole::Unknown;
                    let col_offset = if contributes_to_tangent {
                        Some(Self::column_offset_in(
                            &self.numbering,
                            &self.variable_indices,
                            unknown,
                        )?)
                    } else {
                        None
                    };
                    add_matrix_term_contribution(
                        &mut self.residual,
                        &mut self.tangent,
                        sign,
                        term,
                        state,
                        row_offset,
                        col_offset,
                    )?;
                } else {
                    add_vector_term_contribution(&mut self.residual, sign, term, row_offset)?;
                }
            }
        }
        Ok(())
    }

    pub fn num_dofs(&self) -> usize {
        self.num_dofs
    }

    pub fn residual(&self) -> &DVector<f64> {
        &self.residual
    }

    pub fn tangent(&self) -> &CsrMatrix<f64> {
        &self.tangent
    }

    pub fn pattern(&self) -> &SparsityPattern {
        self.tangent.pattern()
    }

    /// Global DOF offset of a numbered unknown.
    pub fn variable_offset(&self, name: &str) -> Option<usize> {
        self.variable_indices
            .get(name)
            .map(|&index| self.numbering[index].offset)
    }
}

fn add_matrix_term_contribution(
    residual: &mut DVector<f64>,
    tangent: &mut CsrMatrix<f64>,
    sign: Sign,
    term: &Term,
    state: &DVector<f64>,
    row_offset: usize,
    col_offset: Option<usize>,
) -> Result<(), AssemblyError> {
    let test = term.test_operand();
    let unknown = term
        .unknown_operand()
        .expect("matrix terms always carry an unknown operand");
    let space = &test.space;
    let basis = space.basis();
    let n = basis.num_functions();
    let rule = term.quadrature_rule();

    let mut element_matrix = DMatrix::zeros(n, n);
    let mut basis_values = vec![0.0; n];
    let mut basis_gradients = Matrix2xX::zeros(n);
    let mut local_u = DVector::zeros(n);
    let mut global_rows = vec![0; n];
    let mut global_cols = vec![0; n];
    let mut permutation: Vec<usize> = (0..n).collect();

    for element in 0..space.num_elements() {
        let geometry = space.mesh().cell_geometry(element);
        match term.kind() {
            TermKind::VolumeDot => {
                assemble_element_mass_matrix(
                    &mut element_matrix,
                    &geometry,
                    basis,
                    rule,
                    &mut basis_values,
                );
            }
            TermKind::Laplace => {
                assemble_element_laplace_matrix(
                    &mut element_matrix,
                    element,
                    &geometry,
                    basis,
                    rule,
                    &mut basis_gradients,
                )?;
            }
            _ => unreachable!("vector terms are dispatched separately"),
        }

        let element_dofs = unknown.space.element_dofs(element);
        for (local, &dof) in element_dofs.iter().enumerate() {
            local_u[local] = match (&unknown.data, col_offset) {
                // Unknown columns read from the current state
                (None, Some(offset)) => state[offset + dof],
                // Parameter columns read from the captured snapshot
                (Some(data), None) => data[dof],
                _ => unreachable!("operand data and column offset are mutually exclusive"),
            };
        }

        // r_e = sign * M_e u_e
        let local_residual = &element_matrix * &local_u;
        let row_dofs = test.space.element_dofs(element);
        for (local, &dof) in row_dofs.iter().enumerate() {
            residual[row_offset + dof] += sign.factor() * local_residual[local];
        }

        if let Some(col_offset) = col_offset {
            for (local, &dof) in row_dofs.iter().enumerate() {
                global_rows[local] = row_offset + dof;
            }
            for (local, &dof) in element_dofs.iter().enumerate() {
                global_cols[local] = col_offset + dof;
            }
            permutation.sort_unstable_by_key(|&i| global_cols[i]);
            for (local_row, &global_row) in global_rows.iter().enumerate() {
                let mut csr_row = tangent.row_mut(global_row);
                add_element_row_to_csr_row(
                    &mut csr_row,
                    &global_cols,
                    &permutation,
                    sign.factor(),
                    &element_matrix,
                    local_row,
                );
            }
        }
    }
    Ok(())
}

fn add_vector_term_contribution(
    residual: &mut DVector<f64>,
    sign: Sign,
    term: &Term,
    row_offset: usize,
) -> Result<(), AssemblyError> {
    let test = term.test_operand();
    let space = &test.space;
    let basis = space.basis();
    let n = basis.num_functions();
    let rule = term.quadrature_rule();
    let source = term
        .data_source()
        .expect("vector terms always carry a data source");

    let mut element_vector = DVector::zeros(n);
    let mut basis_values = vec![0.0; n];
    let mut basis_gradients = Matrix2xX::zeros(n);
    let mut coords: Vec<Point2<f64>> = Vec::with_capacity(rule.len());

    for element in 0..space.num_elements() {
        let geometry = space.mesh().cell_geometry(element);
        match term.kind() {
            TermKind::VolumeLvf => {
                assemble_element_source_vector(
                    &mut element_vector,
                    element,
                    &geometry,
                    basis,
                    rule,
                    source.as_ref(),
                    &mut basis_values,
                    &mut coords,
                )?;
            }
            TermKind::DiffusionR => {
                assemble_element_gradient_source_vector(
                    &mut element_vector,
                    element,
                    &geometry,
                    basis,
                    rule,
                    source.as_ref(),
                    &mut basis_gradients,
                    &mut coords,
                )?;
            }
            _ => unreachable!("matrix terms are dispatched separately"),
        }

        for (local, &dof) in space.element_dofs(element).iter().enumerate() {
            residual[row_offset + dof] += sign.factor() * element_vector[local];
        }
    }
    Ok(())
}

/// Adds a scaled local matrix row into a CSR row.
///
/// `permutation` sorts `global_cols`; with both the CSR row and the permuted
/// columns sorted, all entries are located in a single forward pass.
fn add_element_row_to_csr_row(
    row: &mut nalgebra_sparse::csr::CsrRowMut<f64>,
    global_cols: &[usize],
    permutation: &[usize],
    factor: f64,
    element_matrix: &DMatrix<f64>,
    local_row: usize,
) {
    let (cols, values) = row.cols_and_values_mut();
    let mut csr_index = 0;
    for &local in permutation {
        let global_col = global_cols[local];
        while cols[csr_index] < global_col {
            csr_index += 1;
        }
        debug_assert_eq!(cols[csr_index], global_col);
        values[csr_index] += factor * element_matrix[(local_row, local)];
    }
}
