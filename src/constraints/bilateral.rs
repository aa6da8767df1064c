use na::{DMatrix, DVector};

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{Result, SotError},
    types::Float,
};

/// Constant two-sided bounds lower ≤ Cx ≤ upper. Either side may be infinite,
/// and lower == upper gives an equality.
pub struct BilateralConstraint {
    data: ConstraintData,
}

impl BilateralConstraint {
    pub fn new(
        id: &str,
        C: DMatrix<Float>,
        lower: DVector<Float>,
        upper: DVector<Float>,
    ) -> Result<Self> {
        let dof = C.ncols();
        let bounds = LinearBounds::Inequality { C, lower, upper };
        bounds.validate(id, dof)?;

        let mut data = ConstraintData::new(id, dof);
        data.bounds = bounds;
        Ok(BilateralConstraint { data })
    }
}

impl Constraint for BilateralConstraint {
    fn data(&self) -> &ConstraintData {
        &self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        if q.len() != self.data.dof {
            return Err(SotError::dimension(
                &format!("configuration of `{}`", self.data.id),
                (self.data.dof, 1),
                (q.len(), 1),
            ));
        }
        Ok(())
    }
}
