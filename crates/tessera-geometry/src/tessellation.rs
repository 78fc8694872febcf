//! Voronoi tessellation of a cell position set and its neighbor graph.
//!
//! The tessellation is the dual of the `delaunator` triangulation: every
//! triangle contributes its circumcenter as a region vertex and every
//! triangulation edge becomes the ridge between the two cells it joins.
//! Circumcenters of cocircular triangles are merged, so a square lattice
//! produces square regions and no zero-length diagonal ridges.

use crate::polygon::convex_hull_area;
use delaunator::{next_halfedge, triangulate, Point, EMPTY};
use nalgebra::Vector2;
use std::collections::{BTreeMap, BTreeSet};
use tessera_core::{Error, Position, Result};
use tracing::trace;

/// Ridges longer than this are dropped from the neighbor weights as
/// artifacts of sparse tessellations.
pub const MAX_RIDGE_LENGTH: f64 = 2.0;

/// Circumcenters closer than this fraction of the extent are one vertex
const VERTEX_MERGE_TOLERANCE: f64 = 1.0e-9;

/// One cell's region
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Region {
    /// Finite vertex ids, counter-clockwise around the cell
    pub vertices: Vec<usize>,
    /// Region extends to infinity
    pub unbounded: bool,
}

impl Region {
    /// Unbounded or empty
    pub fn is_outer(&self) -> bool {
        self.unbounded || self.vertices.is_empty()
    }
}

/// Shared edge between two adjacent cells
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ridge {
    pub points: (usize, usize),
    /// Second endpoint is `None` when the ridge runs off to infinity
    pub vertices: (usize, Option<usize>),
}

impl Ridge {
    pub fn is_finite(&self) -> bool {
        self.vertices.1.is_some()
    }
}

/// Neighbor weights per cell: neighbor index -> shared edge length
pub type NeighborWeights = Vec<BTreeMap<usize, f64>>;

/// Read-only tessellation of one position set
#[derive(Debug, Clone)]
pub struct TessellationGraph {
    points: Vec<Position>,
    vertices: Vec<Position>,
    regions: Vec<Region>,
    ridges: Vec<Ridge>,
}

impl TessellationGraph {
    /// Tessellate `positions`. Fails with a geometry error on fewer than three
    /// distinct points or when all points are collinear.
    ///
    /// Repeated positions keep their first index; later copies get an empty
    /// region and therefore count as outer.
    pub fn compute(positions: &[Position]) -> Result<Self> {
        let n = positions.len();
        if positions.iter().any(|p| !p.x.is_finite() || !p.y.is_finite()) {
            return Err(Error::Geometry("positions must be finite".to_string()));
        }

        let sites = distinct_sites(positions);
        if sites.len() < 3 {
            return Err(Error::Geometry(format!(
                "tessellation needs at least 3 distinct points, got {}",
                sites.len()
            )));
        }
        let coords: Vec<Point> = sites
            .iter()
            .map(|&i| Point {
                x: positions[i].x,
                y: positions[i].y,
            })
            .collect();
        let tri = triangulate(&coords);
        if tri.triangles.is_empty() {
            return Err(Error::Geometry("all points are collinear".to_string()));
        }

        let corner = |e: usize| positions[sites[tri.triangles[e]]];
        let centers = (0..tri.triangles.len() / 3)
            .map(|t| {
                let center = circumcenter(corner(3 * t), corner(3 * t + 1), corner(3 * t + 2));
                if center.x.is_finite() && center.y.is_finite() {
                    Ok(center)
                } else {
                    Err(Error::Geometry("degenerate triangle".to_string()))
                }
            })
            .collect::<Result<Vec<Position>>>()?;

        // Union adjacent triangles whose circumcenters coincide
        let tolerance = VERTEX_MERGE_TOLERANCE * extent(positions);
        let mut parent: Vec<usize> = (0..centers.len()).collect();
        for (e, &twin) in tri.halfedges.iter().enumerate() {
            if twin == EMPTY || twin < e {
                continue;
            }
            let (s, t) = (e / 3, twin / 3);
            if (centers[s] - centers[t]).norm() <= tolerance {
                let (rs, rt) = (root(&mut parent, s), root(&mut parent, t));
                parent[rs.max(rt)] = rs.min(rt);
            }
        }

        let mut vertices: Vec<Position> = Vec::new();
        let mut id_of_root: Vec<Option<usize>> = vec![None; centers.len()];
        let mut vertex_of: Vec<usize> = Vec::with_capacity(centers.len());
        for t in 0..centers.len() {
            let r = root(&mut parent, t);
            let id = match id_of_root[r] {
                Some(id) => id,
                None => {
                    vertices.push(centers[r]);
                    id_of_root[r] = Some(vertices.len() - 1);
                    vertices.len() - 1
                }
            };
            vertex_of.push(id);
        }

        let mut on_boundary = vec![false; n];
        let mut incident: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); n];
        let mut ridges: Vec<Ridge> = Vec::new();
        for (e, &twin) in tri.halfedges.iter().enumerate() {
            let a = sites[tri.triangles[e]];
            let b = sites[tri.triangles[next_halfedge(e)]];
            incident[a].insert(vertex_of[e / 3]);

            let points = (a.min(b), a.max(b));
            let v0 = vertex_of[e / 3];
            if twin == EMPTY {
                on_boundary[a] = true;
                on_boundary[b] = true;
                ridges.push(Ridge {
                    points,
                    vertices: (v0, None),
                });
            } else if e < twin && vertex_of[twin / 3] != v0 {
                ridges.push(Ridge {
                    points,
                    vertices: (v0, Some(vertex_of[twin / 3])),
                });
            }
        }
        for &h in &tri.hull {
            on_boundary[sites[h]] = true;
        }
        ridges.sort_by_key(|r| r.points);

        let regions = incident
            .into_iter()
            .enumerate()
            .map(|(i, ids)| {
                if ids.is_empty() {
                    return Region::default();
                }
                let site = positions[i];
                let mut ids: Vec<usize> = ids.into_iter().collect();
                ids.sort_by(|a, b| {
                    let da = vertices[*a] - site;
                    let db = vertices[*b] - site;
                    da.y.atan2(da.x).total_cmp(&db.y.atan2(db.x))
                });
                Region {
                    vertices: ids,
                    unbounded: on_boundary[i],
                }
            })
            .collect();

        trace!(
            cells = n,
            vertices = vertices.len(),
            ridges = ridges.len(),
            "Tessellation computed"
        );

        Ok(Self {
            points: positions.to_vec(),
            vertices,
            regions,
            ridges,
        })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn points(&self) -> &[Position] {
        &self.points
    }

    pub fn vertices(&self) -> &[Position] {
        &self.vertices
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn ridges(&self) -> &[Ridge] {
        &self.ridges
    }

    /// Finite vertices of cell `i`'s region
    pub fn polygon(&self, i: usize) -> Vec<Position> {
        self.regions[i]
            .vertices
            .iter()
            .map(|&v| self.vertices[v])
            .collect()
    }

    /// Convex hull area of cell `i`'s region vertices, `None` if the hull is degenerate
    pub fn polygon_area(&self, i: usize) -> Option<f64> {
        convex_hull_area(&self.polygon(i))
    }

    /// Per-cell flag: region unbounded or empty
    pub fn classify_outer(&self) -> Vec<bool> {
        self.regions.iter().map(Region::is_outer).collect()
    }

    pub fn outer_indices(&self) -> Vec<usize> {
        self.classify_outer()
            .into_iter()
            .enumerate()
            .filter_map(|(i, outer)| outer.then_some(i))
            .collect()
    }

    /// Cells that are neither outer nor share a ridge with an outer cell,
    /// in ascending index order
    pub fn inner_indices(&self) -> Vec<usize> {
        let outer = self.classify_outer();
        let mut excluded = outer.clone();
        for ridge in &self.ridges {
            let (a, b) = ridge.points;
            if outer[a] {
                excluded[b] = true;
            }
            if outer[b] {
                excluded[a] = true;
            }
        }
        excluded
            .into_iter()
            .enumerate()
            .filter_map(|(i, ex)| (!ex).then_some(i))
            .collect()
    }

    /// Unweighted adjacency from all ridges
    pub fn neighbors(&self) -> Vec<BTreeSet<usize>> {
        let mut adjacency = vec![BTreeSet::new(); self.points.len()];
        for ridge in &self.ridges {
            let (a, b) = ridge.points;
            adjacency[a].insert(b);
            adjacency[b].insert(a);
        }
        adjacency
    }

    /// Shared-edge lengths for finite ridges up to [`MAX_RIDGE_LENGTH`]
    pub fn neighbor_weights(&self) -> NeighborWeights {
        self.neighbor_weights_with_cutoff(MAX_RIDGE_LENGTH)
    }

    pub fn neighbor_weights_with_cutoff(&self, cutoff: f64) -> NeighborWeights {
        let mut weights = vec![BTreeMap::new(); self.points.len()];
        for ridge in &self.ridges {
            let (v0, Some(v1)) = ridge.vertices else {
                continue;
            };
            let length = (self.vertices[v0] - self.vertices[v1]).norm();
            if length > cutoff {
                continue;
            }
            let (a, b) = ridge.points;
            weights[a].insert(b, length);
            weights[b].insert(a, length);
        }
        weights
    }
}

/// Indices of the first occurrence of every distinct position
fn distinct_sites(positions: &[Position]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..positions.len()).collect();
    order.sort_by(|&a, &b| {
        let (p, q) = (positions[a], positions[b]);
        p.x.total_cmp(&q.x).then(p.y.total_cmp(&q.y)).then(a.cmp(&b))
    });
    let mut repeated = vec![false; positions.len()];
    for pair in order.windows(2) {
        if positions[pair[0]] == positions[pair[1]] {
            repeated[pair[1]] = true;
        }
    }
    (0..positions.len()).filter(|&i| !repeated[i]).collect()
}

fn circumcenter(a: Position, b: Position, c: Position) -> Position {
    let (b, c) = (b - a, c - a);
    let d = 2.0 * (b.x * c.y - b.y * c.x);
    let (bb, cc) = (b.norm_squared(), c.norm_squared());
    a + Vector2::new(c.y * bb - b.y * cc, b.x * cc - c.x * bb) / d
}

/// Larger side of the bounding box
fn extent(positions: &[Position]) -> f64 {
    let (mut lo, mut hi) = (positions[0], positions[0]);
    for p in positions {
        lo = Position::new(lo.x.min(p.x), lo.y.min(p.y));
        hi = Position::new(hi.x.max(p.x), hi.y.max(p.y));
    }
    (hi.x - lo.x).max(hi.y - lo.y)
}

fn root(parent: &mut [usize], mut i: usize) -> usize {
    while parent[i] != i {
        parent[i] = parent[parent[i]];
        i = parent[i];
    }
    i
}
