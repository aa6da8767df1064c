//! Linear constraints on the decision vector, valid at the current configuration.

use na::{DMatrix, DVector};

use crate::{
    error::{Result, SotError},
    types::Float,
};

/// Bounds may be ±∞ element-wise.
#[derive(Clone, Debug, PartialEq)]
pub enum LinearBounds {
    /// lower ≤ x ≤ upper
    Box {
        lower: DVector<Float>,
        upper: DVector<Float>,
    },
    /// lower ≤ Cx ≤ upper
    Inequality {
        C: DMatrix<Float>,
        lower: DVector<Float>,
        upper: DVector<Float>,
    },
}

/// A materialised set of rows lower ≤ Cx ≤ upper.
#[derive(Clone, Debug, PartialEq)]
pub struct LinearRows {
    pub C: DMatrix<Float>,
    pub lower: DVector<Float>,
    pub upper: DVector<Float>,
}

impl LinearRows {
    pub fn nrows(&self) -> usize {
        self.C.nrows()
    }
}

impl LinearBounds {
    pub fn unbounded(dof: usize) -> Self {
        LinearBounds::Box {
            lower: DVector::from_element(dof, Float::NEG_INFINITY),
            upper: DVector::from_element(dof, Float::INFINITY),
        }
    }

    pub fn nrows(&self) -> usize {
        match self {
            LinearBounds::Box { lower, .. } => lower.len(),
            LinearBounds::Inequality { C, .. } => C.nrows(),
        }
    }

    pub fn lower(&self) -> &DVector<Float> {
        match self {
            LinearBounds::Box { lower, .. } | LinearBounds::Inequality { lower, .. } => lower,
        }
    }

    pub fn upper(&self) -> &DVector<Float> {
        match self {
            LinearBounds::Box { upper, .. } | LinearBounds::Inequality { upper, .. } => upper,
        }
    }

    /// Box bounds become identity rows.
    pub fn rows(&self) -> LinearRows {
        match self {
            LinearBounds::Box { lower, upper } => LinearRows {
                C: DMatrix::identity(lower.len(), lower.len()),
                lower: lower.clone(),
                upper: upper.clone(),
            },
            LinearBounds::Inequality { C, lower, upper } => LinearRows {
                C: C.clone(),
                lower: lower.clone(),
                upper: upper.clone(),
            },
        }
    }

    /// Shapes must agree with `dof`, no NaN, lower ≤ upper element-wise, and
    /// lower < +∞, upper > −∞.
    pub fn validate(&self, id: &str, dof: usize) -> Result<()> {
        let (lower, upper) = (self.lower(), self.upper());
        let rows = match self {
            LinearBounds::Box { .. } => dof,
            LinearBounds::Inequality { C, .. } => {
                if C.ncols() != dof {
                    return Err(SotError::dimension(
                        &format!("constraint `{}` C", id),
                        (C.nrows(), dof),
                        C.shape(),
                    ));
                }
                C.nrows()
            }
        };
        if lower.len() != rows || upper.len() != rows {
            return Err(SotError::dimension(
                &format!("constraint `{}` bounds", id),
                (rows, rows),
                (lower.len(), upper.len()),
            ));
        }
        for (i, (l, u)) in lower.iter().zip(upper.iter()).enumerate() {
            if l.is_nan() || u.is_nan() {
                return Err(SotError::Configuration(format!(
                    "constraint `{}` has a NaN bound at row {}",
                    id, i
                )));
            }
            if l > u {
                return Err(SotError::Configuration(format!(
                    "constraint `{}` has inverted bounds at row {}: {} > {}",
                    id, i, l, u
                )));
            }
            if *l == Float::INFINITY || *u == Float::NEG_INFINITY {
                return Err(SotError::Configuration(format!(
                    "constraint `{}` has an unreachable bound at row {}: [{}, {}]",
                    id, i, l, u
                )));
            }
        }
        Ok(())
    }

    pub fn is_satisfied(&self, x: &DVector<Float>, tol: Float) -> bool {
        let Cx = match self {
            LinearBounds::Box { .. } => x.clone(),
            LinearBounds::Inequality { C, .. } => C * x,
        };
        Cx.iter()
            .zip(self.lower().iter().zip(self.upper().iter()))
            .all(|(v, (l, u))| *v >= l - tol && *v <= u + tol)
    }
}

#[derive(Clone, Debug)]
pub struct ConstraintData {
    pub id: String,
    pub dof: usize,
    pub bounds: LinearBounds,
}

impl ConstraintData {
    pub fn new(id: &str, dof: usize) -> Self {
        ConstraintData {
            id: id.to_string(),
            dof,
            bounds: LinearBounds::unbounded(dof),
        }
    }
}

pub trait Constraint {
    fn data(&self) -> &ConstraintData;

    /// Recompute the bounds at configuration `q`.
    fn update(&mut self, q: &DVector<Float>) -> Result<()>;

    fn id(&self) -> &str {
        &self.data().id
    }

    fn dof(&self) -> usize {
        self.data().dof
    }

    fn bounds(&self) -> &LinearBounds {
        &self.data().bounds
    }

    fn rows(&self) -> LinearRows {
        self.bounds().rows()
    }

    fn is_satisfied(&self, x: &DVector<Float>, tol: Float) -> bool {
        self.bounds().is_satisfied(x, tol)
    }
}
