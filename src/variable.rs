//! Field variables: named bindings of a space to a role in a weak form.
use std::sync::Arc;

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::ConstructionError;
use crate::space::FieldSpace;

/// The role a variable plays in a weak form.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableRole {
    /// A variable solved for by the equation system.
    Unknown,
    /// A test (virtual) variable; pairs with a primary unknown by name.
    Test,
    /// A known variable whose data enters the residual but not the tangent.
    Parameter,
}

/// A named binding of a [`FieldSpace`] to a role, with backing DOF storage.
///
/// A `Test` variable must reference the unknown it pairs with by name so that
/// the equation system can place its rows against the right columns.
#[derive(Debug, Clone)]
pub struct FieldVariable {
    name: String,
    role: VariableRole,
    space: Arc<FieldSpace>,
    primary_var_name: Option<String>,
    data: DVector<f64>,
}

impl FieldVariable {
    pub fn unknown(name: impl Into<String>, space: &Arc<FieldSpace>) -> Self {
        Self::with_role(name, VariableRole::Unknown, space, None)
    }

    pub fn parameter(name: impl Into<String>, space: &Arc<FieldSpace>) -> Self {
        Self::with_role(name, VariableRole::Parameter, space, None)
    }

    /// Creates a test variable paired with the named primary unknown.
    pub fn test(
        name: impl Into<String>,
        space: &Arc<FieldSpace>,
        primary_var_name: impl Into<String>,
    ) -> Self {
        Self::with_role(name, VariableRole::Test, space, Some(primary_var_name.into()))
    }

    fn with_role(
        name: impl Into<String>,
        role: VariableRole,
        space: &Arc<FieldSpace>,
        primary_var_name: Option<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role,
            space: Arc::clone(space),
            primary_var_name,
            data: DVector::zeros(space.num_dofs()),
        }
    }

    /// Checks that this variable has the role a caller requires of it.
    pub fn require_role(&self, expected: VariableRole) -> Result<(), ConstructionError> {
        if self.role == expected {
            Ok(())
        } else {
            Err(ConstructionError::RoleMismatch {
                variable: self.name.clone(),
                expected,
                found: self.role,
            })
        }
    }

    /// Checks the invariant that test variables name their primary unknown.
    pub fn validate(&self) -> Result<(), ConstructionError> {
        if self.role == VariableRole::Test && self.primary_var_name.is_none() {
            return Err(ConstructionError::TestWithoutPrimary {
                variable: self.name.clone(),
            });
        }
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role(&self) -> VariableRole {
        self.role
    }

    pub fn space(&self) -> &Arc<FieldSpace> {
        &self.space
    }

    pub fn primary_var_name(&self) -> Option<&str> {
        self.primary_var_name.as_deref()
    }

    /// The variable's DOF vector.
    pub fn data(&self) -> &DVector<f64> {
        &self.data
    }

    /// Overwrites the variable's DOF vector.
    ///
    /// # Panics
    ///
    /// Panics if `data` does not have one entry per DOF of the space.
    pub fn set_data(&mut self, data: DVector<f64>) {
        assert_eq!(data.len(), self.space.num_dofs());
        self.data = data;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::create_unit_square_uniform_quad_mesh;

    #[test]
    fn test_variable_requires_primary_name() {
        let mesh = Arc::new(create_unit_square_uniform_quad_mesh(1));
        let space = Arc::new(FieldSpace::new(mesh, 1).unwrap());
        let v = FieldVariable::test("v", &space, "u");
        assert!(v.validate().is_ok());
        assert_eq!(v.primary_var_name(), Some("u"));

        let u = FieldVariable::unknown("u", &space);
        assert_eq!(
            u.require_role(VariableRole::Test).unwrap_err(),
            ConstructionError::RoleMismatch {
                variable: "u".into(),
                expected: VariableRole::Test,
                found: VariableRole::Unknown,
            }
        );
    }
}
