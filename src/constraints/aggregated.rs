use na::{DMatrix, DVector};

use crate::{
    constraint::{Constraint, ConstraintData, LinearBounds},
    error::{Result, SotError},
    types::Float,
};

/// Several constraints enforced as one: their rows stacked into a single
/// two-sided inequality.
pub struct AggregatedConstraint {
    data: ConstraintData,
    children: Vec<Box<dyn Constraint>>,
}

impl AggregatedConstraint {
    pub fn new(id: &str, children: Vec<Box<dyn Constraint>>) -> Result<Self> {
        let dof = match children.first() {
            Some(first) => first.dof(),
            None => {
                return Err(SotError::Configuration(format!(
                    "aggregated constraint `{}` has no constraints",
                    id
                )))
            }
        };
        if let Some(other) = children.iter().find(|c| c.dof() != dof) {
            return Err(SotError::Configuration(format!(
                "constraint `{}` has {} dof but aggregated `{}` has {}",
                other.id(),
                other.dof(),
                id,
                dof
            )));
        }

        let mut constraint = AggregatedConstraint {
            data: ConstraintData::new(id, dof),
            children,
        };
        constraint.compose();
        Ok(constraint)
    }

    pub fn children(&self) -> &[Box<dyn Constraint>] {
        &self.children
    }

    fn compose(&mut self) {
        let rows: Vec<_> = self.children.iter().map(|c| c.rows()).collect();
        let nrows: usize = rows.iter().map(|r| r.nrows()).sum();

        let dof = self.data.dof;
        let mut C = DMatrix::zeros(nrows, dof);
        let mut lower = DVector::zeros(nrows);
        let mut upper = DVector::zeros(nrows);
        let mut offset = 0;
        for r in rows.iter() {
            let m = r.nrows();
            C.view_mut((offset, 0), (m, dof)).copy_from(&r.C);
            lower.rows_mut(offset, m).copy_from(&r.lower);
            upper.rows_mut(offset, m).copy_from(&r.upper);
            offset += m;
        }
        self.data.bounds = LinearBounds::Inequality { C, lower, upper };
    }
}

impl Constraint for AggregatedConstraint {
    fn data(&self) -> &ConstraintData {
        &self.data
    }

    fn update(&mut self, q: &DVector<Float>) -> Result<()> {
        for child in self.children.iter_mut() {
            child.update(q)?;
        }
        self.compose();
        Ok(())
    }
}
