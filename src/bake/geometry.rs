//! World-space mesh data for the CPU host: smooth normals, pointiness and
//! brute-force ray casting.

use glam::Vec3;

use crate::scene::{MeshData, SceneObject};

const RAY_EPSILON: f32 = 1e-4;

pub struct ObjectGeometry<'a> {
    pub name: &'a str,
    pub object: &'a SceneObject,
    pub mesh: &'a MeshData,
    pub positions: Vec<Vec3>,
    pub normals: Vec<Vec3>,
    pub face_normals: Vec<Vec3>,
    /// Per-vertex convexity in 0..1, 0.5 on flat surfaces.
    pub pointiness: Vec<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub triangle: usize,
    pub distance: f32,
    /// Barycentric weights of the triangle's three vertices.
    pub bary: [f32; 3],
}

impl<'a> ObjectGeometry<'a> {
    pub fn new(object: &'a SceneObject) -> Option<Self> {
        let mesh = object.mesh.as_ref()?;
        let positions: Vec<Vec3> = mesh
            .positions
            .iter()
            .map(|p| Vec3::from(object.transform.apply(*p)))
            .collect();

        let mut normals = vec![Vec3::ZERO; positions.len()];
        let mut face_normals = Vec::with_capacity(mesh.triangles.len());
        let mut neighbours: Vec<Vec<u32>> = vec![Vec::new(); positions.len()];
        for tri in &mesh.triangles {
            let [a, b, c] = tri.indices.map(|i| i as usize);
            let (Some(pa), Some(pb), Some(pc)) = (positions.get(a), positions.get(b), positions.get(c)) else {
                face_normals.push(Vec3::Z);
                continue;
            };
            // area weighted
            let n = (*pb - *pa).cross(*pc - *pa);
            face_normals.push(n.normalize_or_zero());
            for (v, others) in [(a, [b, c]), (b, [a, c]), (c, [a, b])] {
                normals[v] += n;
                for o in others {
                    if !neighbours[v].contains(&(o as u32)) {
                        neighbours[v].push(o as u32);
                    }
                }
            }
        }
        for n in &mut normals {
            *n = n.normalize_or(Vec3::Z);
        }

        let pointiness = positions
            .iter()
            .zip(&normals)
            .zip(&neighbours)
            .map(|((p, n), nbs)| {
                if nbs.is_empty() {
                    return 0.5;
                }
                let sum: f32 = nbs
                    .iter()
                    .map(|&i| n.dot((*p - positions[i as usize]).normalize_or_zero()))
                    .sum();
                (0.5 + 0.5 * sum / nbs.len() as f32).clamp(0.0, 1.0)
            })
            .collect();

        Some(Self {
            name: &object.name,
            object,
            mesh,
            positions,
            normals,
            face_normals,
            pointiness,
        })
    }

    pub fn triangle_vertices(&self, triangle: usize) -> Option<[usize; 3]> {
        self.mesh
            .triangles
            .get(triangle)
            .map(|t| t.indices.map(|i| i as usize))
    }

    pub fn interpolate_position(&self, triangle: usize, bary: [f32; 3]) -> Vec3 {
        self.interpolate(triangle, bary, |i| self.positions[i])
    }

    pub fn interpolate_normal(&self, triangle: usize, bary: [f32; 3]) -> Vec3 {
        self.interpolate(triangle, bary, |i| self.normals[i])
            .normalize_or(self.face_normals.get(triangle).copied().unwrap_or(Vec3::Z))
    }

    pub fn interpolate_pointiness(&self, triangle: usize, bary: [f32; 3]) -> f32 {
        let Some(v) = self.triangle_vertices(triangle) else {
            return 0.5;
        };
        bary[0] * self.pointiness[v[0]] + bary[1] * self.pointiness[v[1]] + bary[2] * self.pointiness[v[2]]
    }

    fn interpolate(&self, triangle: usize, bary: [f32; 3], value: impl Fn(usize) -> Vec3) -> Vec3 {
        let Some(v) = self.triangle_vertices(triangle) else {
            return Vec3::ZERO;
        };
        value(v[0]) * bary[0] + value(v[1]) * bary[1] + value(v[2]) * bary[2]
    }

    /// Nearest triangle hit along `dir` within `max_distance`.
    pub fn cast(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> Option<Hit> {
        let mut best: Option<Hit> = None;
        for (i, tri) in self.mesh.triangles.iter().enumerate() {
            let [a, b, c] = tri.indices.map(|i| i as usize);
            let (Some(pa), Some(pb), Some(pc)) = (self.positions.get(a), self.positions.get(b), self.positions.get(c)) else {
                continue;
            };
            if let Some((t, u, v)) = intersect(origin, dir, *pa, *pb, *pc) {
                if t > RAY_EPSILON && t <= max_distance && best.is_none_or(|h| t < h.distance) {
                    best = Some(Hit {
                        triangle: i,
                        distance: t,
                        bary: [1.0 - u - v, u, v],
                    });
                }
            }
        }
        best
    }

    /// Fraction of hemisphere rays around `normal` that escape within
    /// `distance`: 1 is fully open, 0 fully occluded.
    pub fn ambient_occlusion(&self, point: Vec3, normal: Vec3, distance: f32, samples: u32) -> f32 {
        let dirs = hemisphere(normal, samples);
        if dirs.is_empty() {
            return 1.0;
        }
        let origin = point + normal * RAY_EPSILON * 10.0;
        let open = dirs
            .iter()
            .filter(|d| self.cast(origin, **d, distance).is_none())
            .count();
        open as f32 / dirs.len() as f32
    }

    /// Mean distance to the opposite side along the inverted normal
    /// hemisphere, normalized by `distance` and clamped to 1.
    pub fn thickness(&self, point: Vec3, normal: Vec3, distance: f32, samples: u32) -> f32 {
        if distance <= 0.0 {
            return 0.0;
        }
        let dirs = hemisphere(-normal, samples);
        if dirs.is_empty() {
            return 1.0;
        }
        let origin = point - normal * RAY_EPSILON * 10.0;
        let total: f32 = dirs
            .iter()
            .map(|d| self.cast(origin, *d, distance).map_or(distance, |h| h.distance))
            .sum();
        (total / dirs.len() as f32 / distance).clamp(0.0, 1.0)
    }
}

/// Möller–Trumbore. Returns `(t, u, v)` with `u`, `v` the weights of `b`, `c`.
pub fn intersect(origin: Vec3, dir: Vec3, a: Vec3, b: Vec3, c: Vec3) -> Option<(f32, f32, f32)> {
    let e1 = b - a;
    let e2 = c - a;
    let p = dir.cross(e2);
    let det = e1.dot(p);
    if det.abs() < 1e-9 {
        return None;
    }
    let inv = 1.0 / det;
    let s = origin - a;
    let u = s.dot(p) * inv;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let q = s.cross(e1);
    let v = dir.dot(q) * inv;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = e2.dot(q) * inv;
    Some((t, u, v))
}

/// Deterministic cosine-weighted directions around `normal` (golden-angle
/// spiral), so repeated bakes are bit-identical.
pub fn hemisphere(normal: Vec3, samples: u32) -> Vec<Vec3> {
    let n = normal.normalize_or(Vec3::Z);
    let (t, b) = n.any_orthonormal_pair();
    let golden = std::f32::consts::PI * (3.0 - 5.0_f32.sqrt());
    (0..samples)
        .map(|i| {
            let r = ((i as f32 + 0.5) / samples as f32).sqrt();
            let phi = i as f32 * golden;
            let (x, y) = (r * phi.cos(), r * phi.sin());
            let z = (1.0 - r * r).max(0.0).sqrt();
            (t * x + b * y + n * z).normalize_or(n)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ray_hits_triangle_center() {
        let hit = intersect(
            Vec3::new(0.25, 0.25, 1.0),
            Vec3::NEG_Z,
            Vec3::ZERO,
            Vec3::X,
            Vec3::Y,
        )
        .unwrap();
        assert!((hit.0 - 1.0).abs() < 1e-6);
        assert!((hit.1 - 0.25).abs() < 1e-6);
        assert!((hit.2 - 0.25).abs() < 1e-6);
    }

    #[test]
    fn ray_misses_outside() {
        assert!(intersect(Vec3::new(2.0, 2.0, 1.0), Vec3::NEG_Z, Vec3::ZERO, Vec3::X, Vec3::Y).is_none());
    }

    #[test]
    fn hemisphere_points_away_from_surface() {
        for d in hemisphere(Vec3::Y, 32) {
            assert!(d.dot(Vec3::Y) > 0.0);
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }
}
