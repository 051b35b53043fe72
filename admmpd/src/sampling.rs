//! Surface sample generation and evaluation.
//!
//! A surface sample is a barycentric point on a triangle of the rest mesh.
//! Samples survive deformation: evaluating one against a deformed vertex
//! buffer yields the carried-along position and normal. The host uses these
//! to place and track points on the visible surface of a simulated mesh.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// A barycentric point on a mesh triangle.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SurfaceSample {
    /// The three vertices of the owning triangle.
    pub verts: [usize; 3],
    /// Barycentric weights over `verts`, summing to one.
    pub weights: [f64; 3],
}

impl SurfaceSample {
    /// Evaluates the sample against a deformed vertex buffer with matching
    /// per-vertex normals.
    ///
    /// Returns the weighted position and the normalized weighted normal, or
    /// `None` when the sample references vertices outside the buffer.
    pub fn eval(
        &self,
        positions: &[[f64; 3]],
        normals: &[[f64; 3]],
    ) -> Option<([f64; 3], [f64; 3])> {
        let loc = self.eval_position(positions)?;

        let mut nor = [0.0; 3];
        for (&v, &w) in self.verts.iter().zip(self.weights.iter()) {
            let n = normals.get(v)?;
            for axis in 0..3 {
                nor[axis] += n[axis] * w;
            }
        }
        let len = (nor[0] * nor[0] + nor[1] * nor[1] + nor[2] * nor[2]).sqrt();
        if len > 0.0 {
            for n in nor.iter_mut() {
                *n /= len;
            }
        }
        Some((loc, nor))
    }

    /// Evaluates only the sample position, e.g. against a shape-key buffer.
    pub fn eval_position(&self, positions: &[[f64; 3]]) -> Option<[f64; 3]> {
        let mut loc = [0.0; 3];
        for (&v, &w) in self.verts.iter().zip(self.weights.iter()) {
            let p = positions.get(v)?;
            for axis in 0..3 {
                loc[axis] += p[axis] * w;
            }
        }
        Some(loc)
    }
}

/// Bounded sample storage.
///
/// Generation stops as soon as the capacity is exhausted; the stored prefix
/// is kept.
#[derive(Clone, Debug)]
pub struct SampleStorage {
    samples: Vec<SurfaceSample>,
    capacity: usize,
}

impl SampleStorage {
    pub fn with_capacity(capacity: usize) -> Self {
        SampleStorage {
            samples: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Stores a sample; returns false once the capacity is reached.
    pub fn store(&mut self, sample: SurfaceSample) -> bool {
        if self.samples.len() >= self.capacity {
            return false;
        }
        self.samples.push(sample);
        true
    }

    pub fn samples(&self) -> &[SurfaceSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

/// Generates up to `totsample` uniformly distributed samples over the given
/// triangles with a seeded RNG. Returns the number of samples stored.
pub fn generate_random(
    storage: &mut SampleStorage,
    faces: &[[usize; 3]],
    seed: u64,
    totsample: usize,
) -> usize {
    if faces.is_empty() {
        return 0;
    }
    let mut rng = StdRng::seed_from_u64(seed);
    let mut stored = 0;
    for _ in 0..totsample {
        let face = faces[rng.gen_range(0..faces.len())];

        // Uniform barycentric coordinates: fold the sampled square onto the
        // triangle.
        let mut a: f64 = rng.gen();
        let mut b: f64 = rng.gen();
        if a + b > 1.0 {
            a = 1.0 - a;
            b = 1.0 - b;
        }
        let sample = SurfaceSample {
            verts: face,
            weights: [1.0 - (a + b), a, b],
        };

        if storage.store(sample) {
            stored += 1;
        } else {
            break;
        }
    }
    stored
}

/// Generates samples by casting host-supplied rays at the rest surface.
///
/// `ray_source` is queried once per requested sample and may decline by
/// returning `None`; declined queries and rays that miss the surface skip
/// the sample without consuming storage. Returns the number of samples
/// stored.
pub fn generate_raycast<F>(
    storage: &mut SampleStorage,
    verts: &[[f64; 3]],
    faces: &[[usize; 3]],
    mut ray_source: F,
    totsample: usize,
) -> usize
where
    F: FnMut() -> Option<([f64; 3], [f64; 3])>,
{
    let mut stored = 0;
    for _ in 0..totsample {
        let (start, end) = match ray_source() {
            Some(ray) => ray,
            None => continue,
        };
        if let Some(sample) = raycast_sample(verts, faces, start, end) {
            if storage.store(sample) {
                stored += 1;
            } else {
                break;
            }
        }
    }
    stored
}

/// Finds the nearest intersection of the segment with the surface and turns
/// it into a barycentric sample.
fn raycast_sample(
    verts: &[[f64; 3]],
    faces: &[[usize; 3]],
    start: [f64; 3],
    end: [f64; 3],
) -> Option<SurfaceSample> {
    let dir = [end[0] - start[0], end[1] - start[1], end[2] - start[2]];

    let mut best: Option<(f64, SurfaceSample)> = None;
    for face in faces.iter() {
        if let Some((t, u, v)) =
            ray_triangle(start, dir, verts[face[0]], verts[face[1]], verts[face[2]])
        {
            if best.as_ref().map_or(true, |(bt, _)| t < *bt) {
                best = Some((
                    t,
                    SurfaceSample {
                        verts: *face,
                        weights: [1.0 - u - v, u, v],
                    },
                ));
            }
        }
    }
    best.map(|(_, sample)| sample)
}

/// Möller–Trumbore ray/triangle intersection, restricted to the segment
/// `t ∈ [0, 1]`.
fn ray_triangle(
    orig: [f64; 3],
    dir: [f64; 3],
    a: [f64; 3],
    b: [f64; 3],
    c: [f64; 3],
) -> Option<(f64, f64, f64)> {
    const EPS: f64 = 1e-12;

    let sub = |p: [f64; 3], q: [f64; 3]| [p[0] - q[0], p[1] - q[1], p[2] - q[2]];
    let cross = |p: [f64; 3], q: [f64; 3]| {
        [
            p[1] * q[2] - p[2] * q[1],
            p[2] * q[0] - p[0] * q[2],
            p[0] * q[1] - p[1] * q[0],
        ]
    };
    let dot = |p: [f64; 3], q: [f64; 3]| p[0] * q[0] + p[1] * q[1] + p[2] * q[2];

    let ab = sub(b, a);
    let ac = sub(c, a);
    let pvec = cross(dir, ac);
    let det = dot(ab, pvec);
    if det.abs() < EPS {
        return None;
    }
    let inv_det = 1.0 / det;
    let tvec = sub(orig, a);
    let u = dot(tvec, pvec) * inv_det;
    if !(0.0..=1.0).contains(&u) {
        return None;
    }
    let qvec = cross(tvec, ab);
    let v = dot(dir, qvec) * inv_det;
    if v < 0.0 || u + v > 1.0 {
        return None;
    }
    let t = dot(ac, qvec) * inv_det;
    if !(0.0..=1.0).contains(&t) {
        return None;
    }
    Some((t, u, v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn quad() -> (Vec<[f64; 3]>, Vec<[usize; 3]>) {
        let verts = vec![
            [0.0, 0.0, 0.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [0.0, 1.0, 0.0],
        ];
        let faces = vec![[0, 1, 2], [0, 2, 3]];
        (verts, faces)
    }

    #[test]
    fn eval_at_vertex_is_exact() {
        let (verts, _) = quad();
        let normals = vec![[0.0, 0.0, 1.0]; 4];
        let sample = SurfaceSample {
            verts: [1, 2, 3],
            weights: [1.0, 0.0, 0.0],
        };
        let (loc, nor) = sample.eval(&verts, &normals).unwrap();
        assert_eq!(loc, verts[1]);
        assert_eq!(nor, [0.0, 0.0, 1.0]);
    }

    #[test]
    fn eval_out_of_bounds_fails() {
        let (verts, _) = quad();
        let normals = vec![[0.0, 0.0, 1.0]; 4];
        let sample = SurfaceSample {
            verts: [0, 1, 9],
            weights: [0.5, 0.25, 0.25],
        };
        assert!(sample.eval(&verts, &normals).is_none());
    }

    #[test]
    fn random_zero_samples_stores_nothing() {
        let (_, faces) = quad();
        let mut storage = SampleStorage::with_capacity(8);
        assert_eq!(generate_random(&mut storage, &faces, 42, 0), 0);
        assert!(storage.is_empty());
    }

    #[test]
    fn random_respects_capacity() {
        let (_, faces) = quad();
        let mut storage = SampleStorage::with_capacity(3);
        assert_eq!(generate_random(&mut storage, &faces, 42, 10), 3);
        assert_eq!(storage.len(), 3);
        for sample in storage.samples() {
            let sum: f64 = sample.weights.iter().sum();
            assert_relative_eq!(sum, 1.0, epsilon = 1e-12);
            assert!(sample.weights.iter().all(|&w| w >= 0.0));
        }
    }

    #[test]
    fn random_is_deterministic_per_seed() {
        let (_, faces) = quad();
        let mut s1 = SampleStorage::with_capacity(16);
        let mut s2 = SampleStorage::with_capacity(16);
        generate_random(&mut s1, &faces, 7, 16);
        generate_random(&mut s2, &faces, 7, 16);
        assert_eq!(s1.samples(), s2.samples());
    }

    #[test]
    fn raycast_hits_and_misses() {
        let (verts, faces) = quad();
        let mut storage = SampleStorage::with_capacity(4);

        let mut rays = vec![
            // Hits the first triangle.
            Some(([0.6, 0.25, 1.0], [0.6, 0.25, -1.0])),
            // Passes beside the quad.
            Some(([5.0, 5.0, 1.0], [5.0, 5.0, -1.0])),
            // Declined by the source.
            None,
        ]
        .into_iter();

        let stored = generate_raycast(&mut storage, &verts, &faces, || rays.next().flatten(), 3);
        assert_eq!(stored, 1);

        let hit = storage.samples()[0]
            .eval_position(&verts)
            .unwrap();
        assert_relative_eq!(hit[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(hit[1], 0.25, epsilon = 1e-12);
        assert_relative_eq!(hit[2], 0.0, epsilon = 1e-12);
    }
}
