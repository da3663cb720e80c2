//! Expression trees for computed cells.
//!
//! Only five arithmetic operators exist: [`multiply`], [`sum`], [`subtract`],
//! [`divide`] and [`scale`], plus [`link`] to mirror another cell. Every total
//! is therefore an explicit combination of traceable inputs; there is no way to
//! type a lump sum into a computed cell.
//!
//! Expressions are generic over the reference type: builders produce
//! `Expr<Reference>` (symbolic), assembly turns them into
//! `Expr<ResolvedAddress>`, which is what gets rendered and evaluated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vesla::rollup::model::{CellHandle, Position};
use crate::vesla::rollup::resolve::{Reference, ResolvedAddress};

mod render;

/// Expression with every reference resolved to a concrete address.
pub type ResolvedExpr = Expr<ResolvedAddress>;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr<R = Reference> {
    Multiply(Operand<R>, Operand<R>),
    /// Summation in insertion order.
    Sum(Vec<Operand<R>>),
    Subtract(Operand<R>, Operand<R>),
    Divide(Operand<R>, Operand<R>),
    Scale(Operand<R>, f64),
    Link(R),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Operand<R = Reference> {
    Ref(R),
    Const(f64),
    Nested(Box<Expr<R>>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Multiply,
    Sum,
    Subtract,
    Divide,
    Scale,
    Link,
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operator::Multiply => "multiply",
            Operator::Sum => "sum",
            Operator::Subtract => "subtract",
            Operator::Divide => "divide",
            Operator::Scale => "scale",
            Operator::Link => "link",
        };
        f.write_str(name)
    }
}

/// `a × b`; the quantity × unit-price building block.
pub fn multiply(a: impl Into<Operand>, b: impl Into<Operand>) -> Expr {
    Expr::Multiply(a.into(), b.into())
}

pub fn sum<I, O>(operands: I) -> Expr
where
    I: IntoIterator<Item = O>,
    O: Into<Operand>,
{
    Expr::Sum(operands.into_iter().map(Into::into).collect())
}

pub fn subtract(a: impl Into<Operand>, b: impl Into<Operand>) -> Expr {
    Expr::Subtract(a.into(), b.into())
}

pub fn divide(a: impl Into<Operand>, b: impl Into<Operand>) -> Expr {
    Expr::Divide(a.into(), b.into())
}

/// `operand × factor` for fixed conversion factors such as KB → GB.
pub fn scale(operand: impl Into<Operand>, factor: f64) -> Expr {
    Expr::Scale(operand.into(), factor)
}

/// Mirrors another numeric cell without arithmetic.
pub fn link(reference: impl Into<Reference>) -> Expr {
    Expr::Link(reference.into())
}

impl<R> Expr<R> {
    pub fn operator(&self) -> Operator {
        match self {
            Expr::Multiply(..) => Operator::Multiply,
            Expr::Sum(_) => Operator::Sum,
            Expr::Subtract(..) => Operator::Subtract,
            Expr::Divide(..) => Operator::Divide,
            Expr::Scale(..) => Operator::Scale,
            Expr::Link(_) => Operator::Link,
        }
    }

    /// Direct operands, in rendering order. `Link` has none.
    pub fn operands(&self) -> Vec<&Operand<R>> {
        match self {
            Expr::Multiply(a, b) | Expr::Subtract(a, b) | Expr::Divide(a, b) => vec![a, b],
            Expr::Sum(items) => items.iter().collect(),
            Expr::Scale(a, _) => vec![a],
            Expr::Link(_) => Vec::new(),
        }
    }

    /// Every reference in the tree, depth first, in rendering order.
    pub fn references(&self) -> Vec<&R> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a R>) {
        if let Expr::Link(reference) = self {
            out.push(reference);
            return;
        }
        for operand in self.operands() {
            match operand {
                Operand::Ref(reference) => out.push(reference),
                Operand::Const(_) => {}
                Operand::Nested(inner) => inner.collect_references(out),
            }
        }
    }

    /// Rebuilds the tree with each reference mapped through `f`.
    pub fn try_map<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<Expr<S>, E> {
        Ok(match self {
            Expr::Multiply(a, b) => Expr::Multiply(a.try_map(f)?, b.try_map(f)?),
            Expr::Sum(items) => Expr::Sum(
                items
                    .iter()
                    .map(|item| item.try_map(f))
                    .collect::<Result<Vec<_>, E>>()?,
            ),
            Expr::Subtract(a, b) => Expr::Subtract(a.try_map(f)?, b.try_map(f)?),
            Expr::Divide(a, b) => Expr::Divide(a.try_map(f)?, b.try_map(f)?),
            Expr::Scale(a, factor) => Expr::Scale(a.try_map(f)?, *factor),
            Expr::Link(reference) => Expr::Link(f(reference)?),
        })
    }
}

impl<R> Operand<R> {
    fn try_map<S, E>(&self, f: &mut impl FnMut(&R) -> Result<S, E>) -> Result<Operand<S>, E> {
        Ok(match self {
            Operand::Ref(reference) => Operand::Ref(f(reference)?),
            Operand::Const(value) => Operand::Const(*value),
            Operand::Nested(inner) => Operand::Nested(Box::new(inner.try_map(f)?)),
        })
    }
}

impl From<Reference> for Operand {
    fn from(reference: Reference) -> Self {
        Operand::Ref(reference)
    }
}

impl From<&Reference> for Operand {
    fn from(reference: &Reference) -> Self {
        Operand::Ref(reference.clone())
    }
}

impl From<CellHandle> for Operand {
    fn from(handle: CellHandle) -> Self {
        Operand::Ref(Reference::from(handle))
    }
}

/// A bare position refers to the sheet the formula lives on.
impl From<Position> for Operand {
    fn from(position: Position) -> Self {
        Operand::Ref(Reference::Local(position))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Const(value)
    }
}

impl From<Expr> for Operand {
    fn from(expr: Expr) -> Self {
        Operand::Nested(Box::new(expr))
    }
}
