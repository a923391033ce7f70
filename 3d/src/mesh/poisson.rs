//! Poisson indicator solve on a regular grid and iso-surface extraction.
//!
//! The oriented samples are splatted into a smoothed vector field `V`; the
//! indicator `χ` solves `Δχ = ∇·V` with `χ = 0` on the grid boundary
//! (matrix-free conjugate gradient over the 7-point Laplacian). The surface
//! is the `χ = iso` level set, extracted with marching tetrahedra so every
//! cube is split the same way and the result has no cracks.

use super::TriangleMesh;
use arc_core::{Error, Result};
use nalgebra::{Point3, Vector3};
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Empty nodes kept between the samples and the Dirichlet boundary.
const PADDING: usize = 3;

/// Kuhn subdivision of a cube into 6 tetrahedra sharing the 0-7 diagonal.
/// Corner `c` sits at offset `(c & 1, (c >> 1) & 1, (c >> 2) & 1)`.
const CUBE_TETS: [[usize; 4]; 6] = [
    [0, 1, 3, 7],
    [0, 3, 2, 7],
    [0, 2, 6, 7],
    [0, 6, 4, 7],
    [0, 4, 5, 7],
    [0, 5, 1, 7],
];

/// Scalar field sampled on a cubic grid of `resolution³` nodes.
#[derive(Debug, Clone)]
pub struct Grid {
    pub origin: Point3<f32>,
    pub spacing: f32,
    pub resolution: usize,
    pub values: Vec<f32>,
}

impl Grid {
    /// Cubic grid enclosing `points` with `resolution` nodes per axis.
    fn enclosing(points: &[Point3<f32>], resolution: usize) -> Option<Self> {
        let first = points.first()?;
        let (mut min, mut max) = (*first, *first);
        for p in points {
            min = min.inf(p);
            max = max.sup(p);
        }
        let extent = (max - min).max();
        let extent = if extent > f32::EPSILON { extent } else { 1.0 };

        let inner = (resolution - 1 - 2 * PADDING) as f32;
        let spacing = extent / inner;
        let center = nalgebra::center(&min, &max);
        let half = (resolution - 1) as f32 * spacing / 2.0;

        Some(Self {
            origin: center - Vector3::repeat(half),
            spacing,
            resolution,
            values: vec![0.0; resolution * resolution * resolution],
        })
    }

    #[inline]
    fn index(&self, i: usize, j: usize, k: usize) -> usize {
        (k * self.resolution + j) * self.resolution + i
    }

    pub fn node_position(&self, index: usize) -> Point3<f32> {
        let n = self.resolution;
        let (i, j, k) = (index % n, (index / n) % n, index / (n * n));
        self.origin + Vector3::new(i as f32, j as f32, k as f32) * self.spacing
    }

    /// Continuous grid coordinates of `p`, clamped inside the grid.
    fn local(&self, p: &Point3<f32>) -> ([usize; 3], [f32; 3]) {
        let max = (self.resolution - 1) as f32 - 1e-4;
        let g = (p - self.origin) / self.spacing;
        let mut cell = [0usize; 3];
        let mut frac = [0f32; 3];
        for a in 0..3 {
            let c = g[a].clamp(0.0, max);
            cell[a] = c.floor() as usize;
            frac[a] = c - cell[a] as f32;
        }
        (cell, frac)
    }

    /// Trilinear weights of the 8 nodes around `p`, in corner order.
    fn trilinear(&self, p: &Point3<f32>) -> [(usize, f32); 8] {
        let ([i, j, k], [fx, fy, fz]) = self.local(p);
        let weight = |d: usize, f: f32| if d == 1 { f } else { 1.0 - f };
        let mut out = [(0usize, 0f32); 8];
        for (c, slot) in out.iter_mut().enumerate() {
            let (dx, dy, dz) = (c & 1, (c >> 1) & 1, (c >> 2) & 1);
            let w = weight(dx, fx) * weight(dy, fy) * weight(dz, fz);
            *slot = (self.index(i + dx, j + dy, k + dz), w);
        }
        out
    }

    /// Trilinear interpolation of the field at `p`.
    pub fn sample(&self, p: &Point3<f32>) -> f32 {
        self.trilinear(p)
            .iter()
            .map(|&(idx, w)| self.values[idx] * w)
            .sum()
    }
}

/// Separable `[1, 2, 1] / 4` blur along one axis. Boundary nodes see zero outside.
fn blur_axis(data: &[f32], n: usize, stride: usize) -> Vec<f32> {
    let mut out = vec![0.0; data.len()];
    out.par_chunks_mut(n * n).enumerate().for_each(|(k, slab)| {
        for j in 0..n {
            for i in 0..n {
                let idx = (k * n + j) * n + i;
                let coord = match stride {
                    1 => i,
                    s if s == n => j,
                    _ => k,
                };
                let prev = if coord > 0 { data[idx - stride] } else { 0.0 };
                let next = if coord + 1 < n { data[idx + stride] } else { 0.0 };
                slab[j * n + i] = 0.25 * prev + 0.5 * data[idx] + 0.25 * next;
            }
        }
    });
    out
}

fn blur(data: &[f32], n: usize) -> Vec<f32> {
    let x = blur_axis(data, n, 1);
    let y = blur_axis(&x, n, n);
    blur_axis(&y, n, n * n)
}

/// `out = (6·p - Σ neighbours)` on interior nodes, zero on the boundary.
fn apply_laplacian(p: &[f32], out: &mut [f32], n: usize) {
    let slab_len = n * n;
    out.par_chunks_mut(slab_len).enumerate().for_each(|(k, slab)| {
        if k == 0 || k == n - 1 {
            slab.fill(0.0);
            return;
        }
        for j in 0..n {
            for i in 0..n {
                let o = j * n + i;
                if i == 0 || j == 0 || i == n - 1 || j == n - 1 {
                    slab[o] = 0.0;
                    continue;
                }
                let c = k * slab_len + o;
                slab[o] = 6.0 * p[c]
                    - p[c - 1]
                    - p[c + 1]
                    - p[c - n]
                    - p[c + n]
                    - p[c - slab_len]
                    - p[c + slab_len];
            }
        }
    });
}

fn dot(a: &[f32], b: &[f32]) -> f64 {
    a.par_iter()
        .zip(b.par_iter())
        .map(|(x, y)| *x as f64 * *y as f64)
        .sum()
}

/// Conjugate gradient on the Dirichlet Laplacian. Returns the iteration count.
fn conjugate_gradient(
    rhs: &[f32],
    x: &mut [f32],
    n: usize,
    max_iterations: usize,
    tolerance: f64,
    cancel: Option<&AtomicBool>,
) -> Result<usize> {
    let mut r = rhs.to_vec();
    let mut p = r.clone();
    let mut ap = vec![0.0f32; rhs.len()];

    let mut rs = dot(&r, &r);
    let target = tolerance * rs.sqrt();
    if rs == 0.0 {
        return Ok(0);
    }

    for iteration in 0..max_iterations {
        if cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return Err(Error::Cancelled);
        }

        apply_laplacian(&p, &mut ap, n);
        let p_ap = dot(&p, &ap);
        if p_ap <= 0.0 {
            return Ok(iteration);
        }
        let alpha = (rs / p_ap) as f32;

        x.par_iter_mut()
            .zip(p.par_iter())
            .for_each(|(xi, pi)| *xi += alpha * pi);
        r.par_iter_mut()
            .zip(ap.par_iter())
            .for_each(|(ri, api)| *ri -= alpha * api);

        let rs_new = dot(&r, &r);
        if rs_new.sqrt() <= target {
            return Ok(iteration + 1);
        }

        let beta = (rs_new / rs) as f32;
        p.par_iter_mut()
            .zip(r.par_iter())
            .for_each(|(pi, ri)| *pi = ri + beta * *pi);
        rs = rs_new;
    }

    Ok(max_iterations)
}

/// Solve for the indicator function of an oriented point set.
///
/// `depth` sets the grid to `2^depth` nodes per axis (clamped to `[4, 9]`).
/// The returned field increases along the normals, so with outward normals
/// the interior is where `χ < iso`.
pub fn solve_indicator(
    points: &[Point3<f32>],
    normals: &[Vector3<f32>],
    depth: usize,
    max_iterations: usize,
    tolerance: f64,
    cancel: Option<&AtomicBool>,
) -> Result<Grid> {
    if points.len() != normals.len() {
        return Err(Error::DimensionMismatch(format!(
            "{} points but {} normals",
            points.len(),
            normals.len()
        )));
    }
    let resolution = 1usize << depth.clamp(4, 9);
    let mut grid = Grid::enclosing(points, resolution)
        .ok_or_else(|| Error::InvalidInput("Cannot reconstruct an empty point set".into()))?;
    let n = resolution;

    let len = grid.values.len();
    let mut field = [vec![0.0f32; len], vec![0.0f32; len], vec![0.0f32; len]];
    for (p, normal) in points.iter().zip(normals) {
        for (idx, w) in grid.trilinear(p) {
            for (a, component) in field.iter_mut().enumerate() {
                component[idx] += w * normal[a];
            }
        }
    }
    let field = field.map(|f| blur(&f, n));

    // rhs = -∇·V scaled by h² (central differences)
    let slab = n * n;
    let half_h = grid.spacing / 2.0;
    let mut rhs = vec![0.0f32; grid.values.len()];
    rhs.par_chunks_mut(slab).enumerate().for_each(|(k, out)| {
        if k == 0 || k == n - 1 {
            return;
        }
        for j in 1..n - 1 {
            for i in 1..n - 1 {
                let c = k * slab + j * n + i;
                let div = (field[0][c + 1] - field[0][c - 1])
                    + (field[1][c + n] - field[1][c - n])
                    + (field[2][c + slab] - field[2][c - slab]);
                out[j * n + i] = -div * half_h;
            }
        }
    });
    drop(field);

    let iterations =
        conjugate_gradient(&rhs, &mut grid.values, n, max_iterations, tolerance, cancel)?;
    debug!(resolution, iterations, "Poisson solve finished");

    Ok(grid)
}

type EdgeKey = (usize, usize);

#[inline]
fn edge_key(a: usize, b: usize) -> EdgeKey {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

fn edge_point(grid: &Grid, a: usize, b: usize, fa: f32, fb: f32) -> Point3<f32> {
    let t = fa / (fa - fb);
    let pa = grid.node_position(a);
    let pb = grid.node_position(b);
    pa + (pb - pa) * t
}

/// Triangulate the iso-surface inside one tetrahedron.
///
/// `nodes` are grid indices, `f` the field minus iso (negative = inside).
/// Triangles are wound so their normal points from inside to outside.
fn polygonize_tet(grid: &Grid, nodes: [usize; 4], f: [f32; 4], out: &mut Vec<[EdgeKey; 3]>) {
    let mut inside = [0usize; 4];
    let mut outside = [0usize; 4];
    let (mut ni, mut no) = (0, 0);
    for t in 0..4 {
        if f[t] < 0.0 {
            inside[ni] = t;
            ni += 1;
        } else {
            outside[no] = t;
            no += 1;
        }
    }
    if ni == 0 || no == 0 {
        return;
    }

    let centroid = |set: &[usize]| {
        set.iter()
            .fold(Vector3::zeros(), |acc, &t| acc + grid.node_position(nodes[t]).coords)
            / set.len() as f32
    };
    let outward = centroid(&outside[..no]) - centroid(&inside[..ni]);

    let edge = |a: usize, b: usize| {
        (
            edge_key(nodes[a], nodes[b]),
            edge_point(grid, nodes[a], nodes[b], f[a], f[b]),
        )
    };
    let mut emit = |tri: [(EdgeKey, Point3<f32>); 3]| {
        let normal = (tri[1].1 - tri[0].1).cross(&(tri[2].1 - tri[0].1));
        if normal.dot(&outward) >= 0.0 {
            out.push([tri[0].0, tri[1].0, tri[2].0]);
        } else {
            out.push([tri[0].0, tri[2].0, tri[1].0]);
        }
    };

    match ni {
        1 | 3 => {
            let (lone, others) = if ni == 1 {
                (inside[0], &outside[..3])
            } else {
                (outside[0], &inside[..3])
            };
            emit([
                edge(lone, others[0]),
                edge(lone, others[1]),
                edge(lone, others[2]),
            ]);
        }
        _ => {
            let (a, b) = (inside[0], inside[1]);
            let (c, d) = (outside[0], outside[1]);
            let (ac, ad, bd, bc) = (edge(a, c), edge(a, d), edge(b, d), edge(b, c));
            emit([ac, ad, bd]);
            emit([ac, bd, bc]);
        }
    }
}

/// Extract the `iso` level set of `grid` as a triangle mesh.
///
/// Vertices on shared grid edges are welded, so the mesh is watertight
/// wherever the level set does not leave the grid.
pub fn extract_iso_surface(grid: &Grid, iso: f32) -> TriangleMesh {
    let n = grid.resolution;
    if n < 2 {
        return TriangleMesh::new();
    }

    let slabs: Vec<Vec<[EdgeKey; 3]>> = (0..n - 1)
        .into_par_iter()
        .map(|k| {
            let mut tris = Vec::new();
            for j in 0..n - 1 {
                for i in 0..n - 1 {
                    let mut nodes = [0usize; 8];
                    let mut f = [0f32; 8];
                    for c in 0..8 {
                        nodes[c] = grid.index(i + (c & 1), j + ((c >> 1) & 1), k + ((c >> 2) & 1));
                        f[c] = grid.values[nodes[c]] - iso;
                    }
                    if f.iter().all(|&v| v < 0.0) || f.iter().all(|&v| v >= 0.0) {
                        continue;
                    }
                    for tet in &CUBE_TETS {
                        polygonize_tet(
                            grid,
                            tet.map(|c| nodes[c]),
                            tet.map(|c| f[c]),
                            &mut tris,
                        );
                    }
                }
            }
            tris
        })
        .collect();

    let mut vertices = Vec::new();
    let mut welded: HashMap<EdgeKey, usize> = HashMap::new();
    let mut faces = Vec::new();

    for tri in slabs.into_iter().flatten() {
        let face = tri.map(|(a, b)| {
            *welded.entry((a, b)).or_insert_with(|| {
                let fa = grid.values[a] - iso;
                let fb = grid.values[b] - iso;
                vertices.push(edge_point(grid, a, b, fa, fb));
                vertices.len() - 1
            })
        });
        faces.push(face);
    }

    TriangleMesh::with_vertices_and_faces(vertices, faces)
}
