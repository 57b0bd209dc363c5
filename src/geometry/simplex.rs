//! Closest-point projection and Lagrange shape functions on simplices.
//!
//! Local coordinates follow the usual simplex convention: for vertices
//! `v0..vk`, a point is `v0 + Σ ξᵢ (vᵢ − v0)` and the barycentric weights are
//! `λ0 = 1 − Σ ξᵢ`, `λᵢ = ξᵢ`.

use crate::core::collections::SmallBuffer;
use crate::geometry::point::Point;
use nalgebra::{DMatrix, Matrix3};

/// Barycentric weights of a simplex with at most four vertices.
pub type Barycentric = SmallBuffer<f64, 4>;

/// Result of projecting a query point onto a simplex.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// The closest point on the simplex.
    pub point: Point,
    /// Barycentric weights of [`Projection::point`], one per simplex vertex.
    pub barycentric: Barycentric,
    /// Squared distance from the query to [`Projection::point`].
    pub distance_squared: f64,
}

impl Projection {
    /// Local coordinates `ξ` (barycentric weights without `λ0`), padded with zeros.
    #[must_use]
    pub fn local_coords(&self) -> [f64; 3] {
        let mut local = [0.0; 3];
        for (slot, w) in local.iter_mut().zip(self.barycentric.iter().skip(1)) {
            *slot = *w;
        }
        local
    }
}

/// Recovers barycentric weights from local coordinates for a simplex with `vertex_count` vertices.
#[must_use]
pub fn barycentric_from_local(local: &[f64; 3], vertex_count: usize) -> Barycentric {
    let dim = vertex_count.saturating_sub(1).min(3);
    let mut bary = Barycentric::new();
    bary.push(1.0 - local[..dim].iter().sum::<f64>());
    bary.extend(local[..dim].iter().copied());
    bary
}

/// Projects `p` onto the segment `[a, b]`.
#[must_use]
pub fn project_onto_segment(p: &Point, a: &Point, b: &Point) -> Projection {
    let ab = *b - *a;
    let len2 = ab.length_squared();
    let t = if len2 > 0.0 {
        ((*p - *a).dot(&ab) / len2).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let point = *a + ab * t;
    Projection {
        point,
        barycentric: SmallBuffer::from_slice(&[1.0 - t, t]),
        distance_squared: p.distance_squared(&point),
    }
}

/// Projects `p` onto the triangle `abc` (Voronoi-region walk).
#[must_use]
pub fn project_onto_triangle(p: &Point, a: &Point, b: &Point, c: &Point) -> Projection {
    let finish = |u: f64, v: f64, w: f64| {
        let point = *a * u + *b * v + *c * w;
        Projection {
            point,
            barycentric: SmallBuffer::from_slice(&[u, v, w]),
            distance_squared: p.distance_squared(&point),
        }
    };

    let ab = *b - *a;
    let ac = *c - *a;
    let ap = *p - *a;
    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return finish(1.0, 0.0, 0.0);
    }

    let bp = *p - *b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return finish(0.0, 1.0, 0.0);
    }

    let vc = d1.mul_add(d4, -(d3 * d2));
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        return finish(1.0 - v, v, 0.0);
    }

    let cp = *p - *c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return finish(0.0, 0.0, 1.0);
    }

    let vb = d5.mul_add(d2, -(d1 * d6));
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        return finish(1.0 - w, 0.0, w);
    }

    let va = d3.mul_add(d6, -(d5 * d4));
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        return finish(0.0, 1.0 - w, w);
    }

    let denom = va + vb + vc;
    if denom.abs() <= f64::MIN_POSITIVE {
        // Degenerate (collinear) triangle: fall back to its longest edge.
        return [
            (project_onto_segment(p, a, b), [0, 1]),
            (project_onto_segment(p, b, c), [1, 2]),
            (project_onto_segment(p, a, c), [0, 2]),
        ]
        .into_iter()
        .min_by(|x, y| x.0.distance_squared.total_cmp(&y.0.distance_squared))
        .map(|(proj, [i, j])| {
            let mut bary = [0.0; 3];
            bary[i] = proj.barycentric[0];
            bary[j] = proj.barycentric[1];
            finish(bary[0], bary[1], bary[2])
        })
        .unwrap_or_else(|| finish(1.0, 0.0, 0.0));
    }
    let v = vb / denom;
    let w = vc / denom;
    finish(1.0 - v - w, v, w)
}

/// Projects `p` onto the solid tetrahedron `abcd`.
///
/// Points inside (within `inside_tolerance` in barycentric terms) project to
/// themselves; points outside project to the closest face.
#[must_use]
pub fn project_onto_tetrahedron(
    p: &Point,
    vertices: [&Point; 4],
    inside_tolerance: f64,
) -> Projection {
    let [a, b, c, d] = vertices;
    let m = Matrix3::from_columns(&[
        (*b - *a).to_vector(),
        (*c - *a).to_vector(),
        (*d - *a).to_vector(),
    ]);
    if let Some(inv) = m.try_inverse() {
        let xi = inv * (*p - *a).to_vector();
        let l0 = 1.0 - xi.x - xi.y - xi.z;
        if [l0, xi.x, xi.y, xi.z].iter().all(|&l| l >= -inside_tolerance) {
            return Projection {
                point: *p,
                barycentric: SmallBuffer::from_slice(&[l0, xi.x, xi.y, xi.z]),
                distance_squared: 0.0,
            };
        }
    }

    const FACES: [[usize; 3]; 4] = [[0, 1, 2], [0, 1, 3], [0, 2, 3], [1, 2, 3]];
    let mut best: Option<Projection> = None;
    for face in FACES {
        let proj = project_onto_triangle(p, vertices[face[0]], vertices[face[1]], vertices[face[2]]);
        if best
            .as_ref()
            .is_none_or(|b| proj.distance_squared < b.distance_squared)
        {
            let mut bary = [0.0; 4];
            for (slot, w) in face.iter().zip(proj.barycentric.iter()) {
                bary[*slot] = *w;
            }
            best = Some(Projection {
                point: proj.point,
                barycentric: SmallBuffer::from_slice(&bary),
                distance_squared: proj.distance_squared,
            });
        }
    }
    best.unwrap_or_else(|| Projection {
        point: *a,
        barycentric: SmallBuffer::from_slice(&[1.0, 0.0, 0.0, 0.0]),
        distance_squared: p.distance_squared(a),
    })
}

/// Linear (P1) Lagrange weights: the barycentric weights themselves.
#[must_use]
pub fn linear_weights(barycentric: &[f64]) -> SmallBuffer<f64, 10> {
    barycentric.iter().copied().collect()
}

/// Quadratic (P2) Lagrange weights: vertex functions followed by edge functions.
///
/// `edges` lists local vertex pairs in the element's edge order.
#[must_use]
pub fn quadratic_weights(barycentric: &[f64], edges: &[[usize; 2]]) -> SmallBuffer<f64, 10> {
    let mut weights: SmallBuffer<f64, 10> = barycentric
        .iter()
        .map(|&l| l * 2.0_f64.mul_add(l, -1.0))
        .collect();
    weights.extend(
        edges
            .iter()
            .map(|&[i, j]| 4.0 * barycentric[i] * barycentric[j]),
    );
    weights
}

/// Gradients of the barycentric coordinates of a simplex, one per vertex.
///
/// For segments and triangles embedded in 3D the gradients lie in the
/// simplex's own line or plane. Returns `None` for degenerate simplices.
#[must_use]
pub fn barycentric_gradients(vertices: &[Point]) -> Option<SmallBuffer<Point, 4>> {
    let (origin, rest) = vertices.split_first()?;
    let dim = rest.len();
    if dim == 0 || dim > 3 {
        return None;
    }
    let edges: SmallBuffer<Point, 4> = rest.iter().map(|v| *v - *origin).collect();
    let gram = DMatrix::from_fn(dim, dim, |i, j| edges[i].dot(&edges[j]));
    let inverse = gram.try_inverse()?;

    let mut gradients: SmallBuffer<Point, 4> = SmallBuffer::new();
    gradients.push(Point::origin());
    for j in 0..dim {
        let mut g = Point::origin();
        for (m, edge) in edges.iter().enumerate() {
            g += *edge * inverse[(m, j)];
        }
        gradients[0] += -g;
        gradients.push(g);
    }
    gradients.iter().all(Point::is_finite).then_some(gradients)
}

/// Length, area, or volume of a simplex; zero for a single point.
#[must_use]
pub fn simplex_measure(vertices: &[Point]) -> f64 {
    let Some((origin, rest)) = vertices.split_first() else {
        return 0.0;
    };
    let e: SmallBuffer<Point, 4> = rest.iter().map(|v| *v - *origin).collect();
    match e.len() {
        1 => e[0].length(),
        2 => 0.5 * e[0].cross(&e[1]).length(),
        3 => e[0].cross(&e[1]).dot(&e[2]).abs() / 6.0,
        _ => 0.0,
    }
}

/// Barycentric sample points of the regular scheme of `order` on a simplex
/// of dimension `dim`.
///
/// The simplex is split into `order` slices per edge and every upright
/// sub-simplex contributes its centroid, so `order = 1` is the centroid and
/// all points carry equal weight.
#[must_use]
pub fn regular_scheme(dim: usize, order: usize) -> Vec<Barycentric> {
    fn fill(slots: usize, remaining: usize, prefix: &mut Vec<usize>, out: &mut Vec<Vec<usize>>) {
        if slots == 1 {
            prefix.push(remaining);
            out.push(prefix.clone());
            prefix.pop();
            return;
        }
        for m in 0..=remaining {
            prefix.push(m);
            fill(slots - 1, remaining - m, prefix, out);
            prefix.pop();
        }
    }

    if order == 0 {
        return Vec::new();
    }
    let vertices = dim + 1;
    let mut tuples = Vec::new();
    fill(vertices, order - 1, &mut Vec::with_capacity(vertices), &mut tuples);

    let shift = 1.0 / f64::from(u32::try_from(vertices).unwrap_or(u32::MAX));
    let scale = f64::from(u32::try_from(order).unwrap_or(u32::MAX));
    tuples
        .into_iter()
        .map(|m| {
            m.into_iter()
                .map(|mi| (f64::from(u32::try_from(mi).unwrap_or(u32::MAX)) + shift) / scale)
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn unit_tet() -> [Point; 4] {
        [
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn segment_projection_clamps() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([2.0, 0.0, 0.0]);
        let proj = project_onto_segment(&Point::new([3.0, 1.0, 0.0]), &a, &b);
        assert_eq!(proj.point, b);
        assert_relative_eq!(proj.distance_squared, 2.0);
        assert_relative_eq!(proj.barycentric[1], 1.0);
    }

    #[test]
    fn triangle_projection_interior_and_edge() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([1.0, 0.0, 0.0]);
        let c = Point::new([0.0, 1.0, 0.0]);

        let inside = project_onto_triangle(&Point::new([0.25, 0.25, 2.0]), &a, &b, &c);
        assert_relative_eq!(inside.distance_squared, 4.0);
        assert_relative_eq!(inside.local_coords()[0], 0.25);
        assert_relative_eq!(inside.local_coords()[1], 0.25);

        let edge = project_onto_triangle(&Point::new([0.5, -1.0, 0.0]), &a, &b, &c);
        assert_relative_eq!(edge.point.x(), 0.5);
        assert_relative_eq!(edge.point.y(), 0.0);
        assert_relative_eq!(edge.distance_squared, 1.0);
    }

    #[test]
    fn tetrahedron_inside_and_outside() {
        let [a, b, c, d] = unit_tet();
        let inside = project_onto_tetrahedron(&Point::new([0.1, 0.2, 0.3]), [&a, &b, &c, &d], 1e-12);
        assert_relative_eq!(inside.distance_squared, 0.0);
        for (got, want) in inside.local_coords().iter().zip([0.1, 0.2, 0.3]) {
            assert_relative_eq!(*got, want, epsilon = 1e-12);
        }

        let outside = project_onto_tetrahedron(&Point::new([0.2, 0.2, -1.0]), [&a, &b, &c, &d], 1e-12);
        assert_relative_eq!(outside.distance_squared, 1.0);
        assert_relative_eq!(outside.barycentric.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(outside.barycentric[3], 0.0);
    }

    #[test]
    fn shape_functions_partition_unity() {
        let bary = [0.1, 0.2, 0.3, 0.4];
        let edges = [[0, 1], [1, 2], [2, 0], [0, 3], [1, 3], [2, 3]];
        assert_relative_eq!(linear_weights(&bary).iter().sum::<f64>(), 1.0);
        let quad = quadratic_weights(&bary, &edges);
        assert_eq!(quad.len(), 10);
        assert_relative_eq!(quad.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn barycentric_round_trip() {
        let bary = barycentric_from_local(&[0.2, 0.3, 0.0], 3);
        assert_eq!(bary.len(), 3);
        assert_relative_eq!(bary[0], 0.5);
    }

    #[test]
    fn barycentric_gradients_of_unit_tet() {
        let grads = barycentric_gradients(&unit_tet()).unwrap();
        assert_eq!(grads.len(), 4);
        assert_relative_eq!(grads[1].x(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(grads[2].y(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(grads[3].z(), 1.0, epsilon = 1e-12);
        for axis in 0..3 {
            assert_relative_eq!(grads[0][axis], -1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn barycentric_gradients_stay_in_segment_line() {
        let a = Point::new([0.0, 0.0, 0.0]);
        let b = Point::new([2.0, 2.0, 0.0]);
        let grads = barycentric_gradients(&[a, b]).unwrap();
        assert_relative_eq!(grads[1].dot(&(b - a)), 1.0, epsilon = 1e-12);
        assert_relative_eq!(grads[1].x(), grads[1].y(), epsilon = 1e-12);
        assert!(barycentric_gradients(&[a, a]).is_none());
    }

    #[test]
    fn measures_and_regular_schemes() {
        let [a, b, c, d] = unit_tet();
        assert_relative_eq!(simplex_measure(&[a, b]), 1.0);
        assert_relative_eq!(simplex_measure(&[a, b, c]), 0.5);
        assert_relative_eq!(simplex_measure(&[a, b, c, d]), 1.0 / 6.0);

        let centroid = regular_scheme(3, 1);
        assert_eq!(centroid.len(), 1);
        assert!(centroid[0].iter().all(|&l| (l - 0.25).abs() < 1e-12));

        // Upright sub-triangles of a twice-split triangle.
        let tri = regular_scheme(2, 2);
        assert_eq!(tri.len(), 3);
        for point in &tri {
            assert_relative_eq!(point.iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        }
        assert_eq!(regular_scheme(1, 4).len(), 4);
        assert_eq!(regular_scheme(3, 3).len(), 10);
    }
}
