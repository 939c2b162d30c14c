//! Uniform bucket grid over scattered samples for fixed-radius queries.
//!
//! Points live in one arena sorted by bucket; `offsets` holds the start of
//! each bucket (CSR layout). The index is immutable after `build` and can be
//! shared by reference between query workers.

use crate::types::{GeoSample, Reflectivity};
use std::cmp::Ordering;

/// Upper bound on bucket count relative to the point count
const MAX_BUCKETS_PER_POINT: usize = 4;
const MIN_BUCKET_BUDGET: usize = 1 << 16;
/// Query bucket coordinates are clamped to this magnitude
const MAX_QUERY_BUCKET: i64 = 1 << 40;

/// A sample as stored in the index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexedPoint {
    pub x: f64,
    pub y: f64,
    pub value: Reflectivity,
}

#[derive(Debug, Clone)]
pub struct BucketIndex {
    origin_x: f64,
    origin_y: f64,
    bucket_size: f64,
    nx: usize,
    ny: usize,
    offsets: Vec<usize>,
    points: Vec<IndexedPoint>,
}

impl BucketIndex {
    /// Build an index with buckets of at least `bucket_size` meters.
    ///
    /// The bucket size grows when the sample envelope would need an
    /// excessive number of buckets. Samples with a non-finite position are
    /// not indexed.
    pub fn build(samples: &[GeoSample], bucket_size: f64) -> Self {
        let finite: Vec<&GeoSample> = samples
            .iter()
            .filter(|s| s.easting.is_finite() && s.northing.is_finite())
            .collect();
        if finite.len() < samples.len() {
            log::warn!(
                "Skipping {} samples with non-finite coordinates",
                samples.len() - finite.len()
            );
        }
        let samples = finite;

        let (min_x, min_y, max_x, max_y) = samples.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), s| {
                (x0.min(s.easting), y0.min(s.northing), x1.max(s.easting), y1.max(s.northing))
            },
        );

        if samples.is_empty() {
            return Self {
                origin_x: 0.0,
                origin_y: 0.0,
                bucket_size: bucket_size.max(f64::MIN_POSITIVE),
                nx: 0,
                ny: 0,
                offsets: vec![0],
                points: Vec::new(),
            };
        }

        let width = max_x - min_x;
        let height = max_y - min_y;
        let budget = (samples.len() * MAX_BUCKETS_PER_POINT).max(MIN_BUCKET_BUDGET);

        let mut size = bucket_size.max(f64::MIN_POSITIVE);
        let dims = |size: f64| {
            (
                (width / size).floor() as usize + 1,
                (height / size).floor() as usize + 1,
            )
        };
        let (mut nx, mut ny) = dims(size);
        while nx.saturating_mul(ny) > budget {
            size *= 2.0;
            (nx, ny) = dims(size);
        }

        // Counting sort of points into buckets
        let bucket_of = |s: &&GeoSample| {
            let bx = (((s.easting - min_x) / size) as usize).min(nx - 1);
            let by = (((s.northing - min_y) / size) as usize).min(ny - 1);
            by * nx + bx
        };

        let mut offsets = vec![0usize; nx * ny + 1];
        for s in &samples {
            offsets[bucket_of(s) + 1] += 1;
        }
        for i in 1..offsets.len() {
            offsets[i] += offsets[i - 1];
        }

        let mut cursor = offsets.clone();
        let mut points = vec![
            IndexedPoint {
                x: 0.0,
                y: 0.0,
                value: 0.0,
            };
            samples.len()
        ];
        for s in &samples {
            let b = bucket_of(s);
            points[cursor[b]] = IndexedPoint {
                x: s.easting,
                y: s.northing,
                value: s.value,
            };
            cursor[b] += 1;
        }

        log::debug!(
            "Built bucket index: {} points in {}x{} buckets of {:.1} m",
            points.len(),
            nx,
            ny,
            size
        );

        Self {
            origin_x: min_x,
            origin_y: min_y,
            bucket_size: size,
            nx,
            ny,
            offsets,
            points,
        }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn bucket_size(&self) -> f64 {
        self.bucket_size
    }

    /// Visit every point within `radius` of (x, y) with its squared distance
    pub fn for_each_within<F>(&self, x: f64, y: f64, radius: f64, mut visit: F)
    where
        F: FnMut(&IndexedPoint, f64),
    {
        if self.is_empty() {
            return;
        }

        let r2 = radius * radius;
        let Some((bx0, bx1)) = bucket_span(x - radius, x + radius, self.origin_x, self.bucket_size, self.nx)
        else {
            return;
        };
        let Some((by0, by1)) = bucket_span(y - radius, y + radius, self.origin_y, self.bucket_size, self.ny)
        else {
            return;
        };

        for by in by0..=by1 {
            let row = by * self.nx;
            let start = self.offsets[row + bx0];
            let end = self.offsets[row + bx1 + 1];
            // Buckets of one row are contiguous in the arena
            for p in &self.points[start..end] {
                let dx = p.x - x;
                let dy = p.y - y;
                let d2 = dx * dx + dy * dy;
                if d2 <= r2 {
                    visit(p, d2);
                }
            }
        }
    }

    /// All points within `radius` of (x, y) as (squared distance, point)
    pub fn within(&self, x: f64, y: f64, radius: f64) -> Vec<(f64, IndexedPoint)> {
        let mut found = Vec::new();
        self.for_each_within(x, y, radius, |p, d2| found.push((d2, *p)));
        found
    }

    /// Closest point to (x, y), optionally no farther than `max_radius`.
    ///
    /// Buckets are searched in square rings of growing Chebyshev distance
    /// around the query bucket. Points in ring `k + 1` are at least
    /// `k * bucket_size` away, so the search stops once the best distance
    /// is strictly below that. Equidistant points resolve to the lowest
    /// value.
    pub fn nearest(&self, x: f64, y: f64, max_radius: Option<f64>) -> Option<(f64, IndexedPoint)> {
        if self.is_empty() {
            return None;
        }

        let (nx, ny) = (self.nx as i64, self.ny as i64);
        let bucket = |v: f64, origin: f64| {
            (((v - origin) / self.bucket_size).floor() as i64).clamp(-MAX_QUERY_BUCKET, MAX_QUERY_BUCKET)
        };
        let (qx, qy) = (bucket(x, self.origin_x), bucket(y, self.origin_y));
        let r2 = max_radius.map(|r| r * r);

        // First ring that touches the bucket grid
        let first_ring = [qx - (nx - 1), -qx, qy - (ny - 1), -qy]
            .into_iter()
            .fold(0, i64::max);

        let mut best: Option<(f64, IndexedPoint)> = None;
        let consider = |best: &mut Option<(f64, IndexedPoint)>, p: &IndexedPoint| {
            let d2 = (p.x - x).powi(2) + (p.y - y).powi(2);
            if r2.map_or(false, |r2| d2 > r2) {
                return;
            }
            let closer = match &*best {
                None => true,
                Some((best_d2, best_p)) => {
                    d2.total_cmp(best_d2)
                        .then_with(|| p.value.total_cmp(&best_p.value))
                        == Ordering::Less
                }
            };
            if closer {
                *best = Some((d2, *p));
            }
        };

        let mut k = first_ring;
        loop {
            let (y0, y1) = ((qy - k).max(0), (qy + k).min(ny - 1));
            for by in y0..=y1 {
                let mut visit = |p: &IndexedPoint| consider(&mut best, p);
                if by == qy - k || by == qy + k {
                    self.visit_row_span(by, qx - k, qx + k, &mut visit);
                } else {
                    self.visit_row_span(by, qx - k, qx - k, &mut visit);
                    if k > 0 {
                        self.visit_row_span(by, qx + k, qx + k, &mut visit);
                    }
                }
            }

            let reach = k as f64 * self.bucket_size;
            let settled = best.map_or(false, |(d2, _)| d2 < reach * reach);
            let beyond_radius = max_radius.map_or(false, |r| reach > r);
            let covered = qx - k <= 0 && qx + k >= nx - 1 && qy - k <= 0 && qy + k >= ny - 1;
            if settled || beyond_radius || covered {
                break;
            }
            k += 1;
        }

        best
    }

    /// Visit the points of buckets [bx0, bx1] in bucket row `by`, clamped to the grid
    fn visit_row_span<F>(&self, by: i64, bx0: i64, bx1: i64, visit: &mut F)
    where
        F: FnMut(&IndexedPoint),
    {
        let bx0 = bx0.max(0);
        let bx1 = bx1.min(self.nx as i64 - 1);
        if bx0 > bx1 || by < 0 || by >= self.ny as i64 {
            return;
        }
        let row = by as usize * self.nx;
        let start = self.offsets[row + bx0 as usize];
        let end = self.offsets[row + bx1 as usize + 1];
        self.points[start..end].iter().for_each(|p| visit(p));
    }
}

/// Inclusive bucket range overlapping [lo, hi], `None` when disjoint
fn bucket_span(lo: f64, hi: f64, origin: f64, size: f64, count: usize) -> Option<(usize, usize)> {
    let first = ((lo - origin) / size).floor();
    let last = ((hi - origin) / size).floor();
    if last < 0.0 || first >= count as f64 || first.is_nan() || last.is_nan() {
        return None;
    }
    let first = first.max(0.0) as usize;
    let last = (last as usize).min(count - 1);
    Some((first, last))
}
