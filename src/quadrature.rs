//! Quadrature rules for the reference element domains.
//!
//! Rules are parametrized by the polynomial order they integrate exactly on
//! the reference element, not by point count. Construction goes through
//! [`reference_rule`], which keeps a process-wide cache keyed by
//! `(shape, order)`: rules are built once under a write lock and shared
//! read-only afterwards.
use std::f64::consts::PI;
use std::fmt;
use std::fmt::{Display, Formatter};
use std::sync::Arc;

use nalgebra::Point2;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::element::ElementShape;

/// The highest quadrature order [`reference_rule`] will construct.
///
/// Orders beyond this are almost certainly a caller bug (the default order
/// for projections is twice the approximation order), and the univariate
/// root-finding loses accuracy for very high degrees.
pub const MAX_QUADRATURE_ORDER: usize = 50;

/// Errors returned by quadrature rule construction.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum QuadratureError {
    /// Indicates that a rule satisfying the given requirements is not available.
    NoRuleAvailable { shape: ElementShape, order: usize },
}

impl Display for QuadratureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRuleAvailable { shape, order } => {
                write!(
                    f,
                    "there is no quadrature rule of order {} available for shape {:?}",
                    order, shape
                )
            }
        }
    }
}

impl std::error::Error for QuadratureError {}

/// A quadrature rule on a 2D reference element: points, weights and the
/// polynomial order it integrates exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct QuadratureRule {
    points: Vec<Point2<f64>>,
    weights: Vec<f64>,
    order: usize,
}

impl QuadratureRule {
    pub fn points(&self) -> &[Point2<f64>] {
        &self.points
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// The polynomial order up to which this rule is exact.
    pub fn order(&self) -> usize {
        self.order
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Approximates the integral of `f` over the reference element.
    pub fn integrate(&self, f: impl Fn(&Point2<f64>) -> f64) -> f64 {
        self.points
            .iter()
            .zip(&self.weights)
            .map(|(p, w)| w * f(p))
            .sum()
    }
}

static RULE_CACHE: Lazy<RwLock<FxHashMap<(ElementShape, usize), Arc<QuadratureRule>>>> =
    Lazy::new(|| RwLock::new(FxHashMap::default()));

/// Returns a quadrature rule exact for polynomials up to `order` on the
/// reference element of the given shape.
///
/// The rule is built on first request and cached for the lifetime of the
/// process; subsequent requests for the same `(shape, order)` pair share the
/// same allocation.
pub fn reference_rule(
    shape: ElementShape,
    order: usize,
) -> Result<Arc<QuadratureRule>, QuadratureError> {
    if order > MAX_QUADRATURE_ORDER {
        return Err(QuadratureError::NoRuleAvailable { shape, order });
    }

    if let Some(rule) = RULE_CACHE.read().get(&(shape, order)) {
        return Ok(Arc::clone(rule));
    }

    let rule = Arc::new(match shape {
        ElementShape::Quadrilateral => quadrilateral_rule(order),
        ElementShape::Triangle => triangle_rule(order),
    });

    let mut cache = RULE_CACHE.write();
    // Another thread may have raced us here; keep whichever rule landed first
    // so that all readers share one allocation.
    let entry = cache
        .entry((shape, order))
        .or_insert_with(|| Arc::clone(&rule));
    Ok(Arc::clone(entry))
}

/// Tensor-product Gauss rule on the reference square `[-1, 1]^2`.
fn quadrilateral_rule(order: usize) -> QuadratureRule {
    // n Gauss points are exact up to order 2n - 1 in each variable
    let n = order / 2 + 1;
    let (weights_1d, points_1d) = gauss(n);

    let mut points = Vec::with_capacity(n * n);
    let mut weights = Vec::with_capacity(n * n);
    for (wi, xi) in weights_1d.iter().zip(&points_1d) {
        for (wj, xj) in weights_1d.iter().zip(&points_1d) {
            points.push(Point2::new(*xi, *xj));
            weights.push(wi * wj);
        }
    }

    QuadratureRule {
        points,
        weights,
        order,
    }
}

/// Gauss rule on the reference triangle `{(-1,-1), (1,-1), (-1,1)}` obtained
/// by a Duffy transformation of a tensor-product rule.
///
/// The collapse map on the unit triangle is `x = u (1 - v), y = v` with
/// Jacobian `(1 - v)`, which raises the polynomial degree in the collapsed
/// direction by one; the extra degree from the Jacobian is absorbed by the
/// point count below, so exactness up to `order` is preserved.
fn triangle_rule(order: usize) -> QuadratureRule {
    // 2n - 1 >= order + 1 must hold in the collapsed direction
    let n = (order + 3) / 2;
    let (weights_1d, points_1d) = gauss(n);

    // Rescale the univariate rule from [-1, 1] to [0, 1]
    let points_unit: Vec<_> = points_1d.iter().map(|x| 0.5 * (x + 1.0)).collect();
    let weights_unit: Vec<_> = weights_1d.iter().map(|w| 0.5 * w).collect();

    let mut points = Vec::with_capacity(n * n);
    let mut weights = Vec::with_capacity(n * n);
    for (wu, u) in weights_unit.iter().zip(&points_unit) {
        for (wv, v) in weights_unit.iter().zip(&points_unit) {
            let x = u * (1.0 - v);
            let y = *v;
            // Affine map from the unit triangle to the reference triangle
            // has Jacobian determinant 4
            points.push(Point2::new(2.0 * x - 1.0, 2.0 * y - 1.0));
            weights.push(4.0 * wu * wv * (1.0 - v));
        }
    }

    QuadratureRule {
        points,
        weights,
        order,
    }
}

/// Evaluates the Legendre polynomial `P_n` and its first derivative at `x`
/// through the three-term recurrence.
///
/// The derivative formula divides by `x^2 - 1`, so `x` must lie strictly
/// inside `(-1, 1)`. Gauss nodes always do.
fn legendre_value_and_derivative(n: usize, x: f64) -> (f64, f64) {
    let mut current = 1.0;
    let mut previous = 0.0;
    for m in 1..=n {
        let m = m as f64;
        let next = ((2.0 * m - 1.0) * x * current - (m - 1.0) * previous) / m;
        previous = current;
        current = next;
    }
    let derivative = n as f64 * (x * current - previous) / (x * x - 1.0);
    (current, derivative)
}

/// Univariate Gauss-Legendre rule with `n` points on `[-1, 1]`, returned as
/// `(weights, points)`. Exact for polynomials up to degree `2 n - 1`.
///
/// # Panics
///
/// Panics if zero points are requested.
fn gauss(n: usize) -> (Vec<f64>, Vec<f64>) {
    assert!(n > 0, "number of points must be positive");

    let mut points = vec![0.0; n];
    let mut weights = vec![0.0; n];

    // The nodes are the roots of P_n, located by Newton iteration from the
    // classical cosine estimate. Roots come in +/- pairs, so only the first
    // half is computed and the rest filled in by symmetry.
    for i in 0..(n + 1) / 2 {
        let mut x = (PI * (i as f64 + 0.75) / (n as f64 + 0.5)).cos();
        loop {
            let (value, derivative) = legendre_value_and_derivative(n, x);
            let step = value / derivative;
            x -= step;
            if step.abs() <= 1e-15 {
                break;
            }
        }
        let (_, derivative) = legendre_value_and_derivative(n, x);
        let weight = 2.0 / ((1.0 - x * x) * derivative * derivative);

        points[i] = x;
        weights[i] = weight;
        points[n - 1 - i] = -x;
        weights[n - 1 - i] = weight;
    }

    (weights, points)
}
