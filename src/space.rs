//! Index spaces of a run and the mappings between them.
//!
//! A run has three kinds of arrays:
//!
//! ```text
//!   Event        one entry per trigger
//!     │ 1:n      (event_of is monotone non-decreasing)
//!     ▼
//!   Track        one entry per reconstructed track
//!     │ 1:0..1   (track_of is a partial, order-preserving injection)
//!     ▼
//!   Cluster(p)   one entry per cluster on plane p
//! ```
//!
//! Values only travel down this hierarchy; a cluster without a track has no
//! value from above. Boolean masks may additionally be lifted from a plane's
//! cluster space into track space, where a track without a cluster on that
//! plane counts as rejected.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::{CutError, CutResult};

/// Detector plane number, as used in the `Plane<n>` store groups.
pub type PlaneId = u16;

// ---------------------------------------------------------------------------
// Space – which domain an array is indexed by
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Space {
    Event,
    Track,
    Cluster(PlaneId),
}

impl Space {
    /// Position in the event → track → cluster hierarchy.
    pub fn depth(self) -> u8 {
        match self {
            Space::Event => 0,
            Space::Track => 1,
            Space::Cluster(_) => 2,
        }
    }

    pub fn plane(self) -> Option<PlaneId> {
        match self {
            Space::Cluster(plane) => Some(plane),
            _ => None,
        }
    }
}

impl fmt::Display for Space {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Space::Event => write!(f, "event"),
            Space::Track => write!(f, "track"),
            Space::Cluster(plane) => write!(f, "plane {plane} cluster"),
        }
    }
}

// ---------------------------------------------------------------------------
// SpaceArray – values tagged with the space they are indexed by
// ---------------------------------------------------------------------------

/// A column of values together with the space it lives in.
///
/// Obtain one through [`SpaceModel::tag`], which checks the length, or through
/// the typed accessors of [`RunContext`](crate::run::RunContext).
#[derive(Debug, Clone, PartialEq)]
pub struct SpaceArray<T> {
    space: Space,
    values: Vec<T>,
}

/// A boolean selection over one space.
pub type Mask = SpaceArray<bool>;

impl<T> SpaceArray<T> {
    pub(crate) fn from_parts(space: Space, values: Vec<T>) -> Self {
        Self { space, values }
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn values(&self) -> &[T] {
        &self.values
    }

    pub fn into_values(self) -> Vec<T> {
        self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Element-wise transform; the result stays in the same space.
    pub fn map<U>(&self, f: impl FnMut(&T) -> U) -> SpaceArray<U> {
        SpaceArray {
            space: self.space,
            values: self.values.iter().map(f).collect(),
        }
    }

    /// Element-wise combination of two arrays of the same space.
    pub fn zip_with<U, V>(
        &self,
        other: &SpaceArray<U>,
        mut f: impl FnMut(&T, &U) -> V,
    ) -> CutResult<SpaceArray<V>> {
        if self.space != other.space {
            return Err(CutError::Projection {
                from: other.space,
                to: self.space,
            });
        }
        if self.len() != other.len() {
            return Err(CutError::Shape {
                what: "operand".to_string(),
                space: self.space,
                expected: self.len(),
                actual: other.len(),
            });
        }
        Ok(SpaceArray {
            space: self.space,
            values: self
                .values
                .iter()
                .zip(&other.values)
                .map(|(a, b)| f(a, b))
                .collect(),
        })
    }
}

impl SpaceArray<bool> {
    /// Number of entries passing.
    pub fn count(&self) -> usize {
        self.values.iter().filter(|&&b| b).count()
    }

    pub fn and(&self, other: &Mask) -> CutResult<Mask> {
        self.zip_with(other, |&a, &b| a && b)
    }

    /// Pick the entries of `data` where this mask is true.
    pub fn select<T: Clone>(&self, data: &SpaceArray<T>) -> CutResult<Vec<T>> {
        if self.space != data.space {
            return Err(CutError::Projection {
                from: data.space,
                to: self.space,
            });
        }
        if self.len() != data.len() {
            return Err(CutError::Shape {
                what: "data".to_string(),
                space: self.space,
                expected: self.len(),
                actual: data.len(),
            });
        }
        Ok(data
            .values
            .iter()
            .zip(&self.values)
            .filter(|(_, &keep)| keep)
            .map(|(v, _)| v.clone())
            .collect())
    }
}

// ---------------------------------------------------------------------------
// SpaceModel – sizes and associations of one run
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct PlaneLink {
    /// cluster index → track index, strictly increasing over the matched
    /// clusters
    track_of: Vec<Option<usize>>,
    /// track index → cluster index on this plane
    cluster_of: Vec<Option<usize>>,
}

/// Sizes of the event, track and per-plane cluster spaces of a run and the
/// associations between them.
#[derive(Debug, Clone)]
pub struct SpaceModel {
    /// `offsets[e]..offsets[e + 1]` are the tracks of event `e`.
    offsets: Vec<usize>,
    planes: BTreeMap<PlaneId, PlaneLink>,
}

impl SpaceModel {
    /// Build the event/track relation from the number of tracks in each event.
    pub fn new(tracks_per_event: &[usize]) -> Self {
        let mut offsets = Vec::with_capacity(tracks_per_event.len() + 1);
        offsets.push(0);
        let mut total = 0;
        for &n in tracks_per_event {
            total += n;
            offsets.push(total);
        }
        Self {
            offsets,
            planes: BTreeMap::new(),
        }
    }

    /// Register a plane from the track of each of its clusters; `None` marks a
    /// cluster no track was matched to.
    pub fn with_plane(mut self, plane: PlaneId, track_of: Vec<Option<usize>>) -> CutResult<Self> {
        let n_tracks = self.n_tracks();
        let matched: Vec<(usize, usize)> = track_of
            .iter()
            .enumerate()
            .filter_map(|(cluster, track)| track.map(|track| (cluster, track)))
            .collect();
        if let Some(&(_, last)) = matched.last() {
            if last >= n_tracks {
                return Err(CutError::Layout(format!(
                    "plane {plane} references track {last} but the run has {n_tracks} tracks"
                )));
            }
        }
        if let Some(w) = matched.windows(2).find(|w| w[0].1 >= w[1].1) {
            return Err(CutError::Layout(format!(
                "plane {plane}: cluster {} maps to track {} after track {}",
                w[1].0, w[1].1, w[0].1
            )));
        }
        let mut cluster_of = vec![None; n_tracks];
        for &(cluster, track) in &matched {
            cluster_of[track] = Some(cluster);
        }
        self.planes.insert(
            plane,
            PlaneLink {
                track_of,
                cluster_of,
            },
        );
        Ok(self)
    }

    pub fn n_events(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn n_tracks(&self) -> usize {
        self.offsets.last().copied().unwrap_or(0)
    }

    pub fn n_clusters(&self, plane: PlaneId) -> CutResult<usize> {
        Ok(self.link(plane)?.track_of.len())
    }

    pub fn planes(&self) -> impl Iterator<Item = PlaneId> + '_ {
        self.planes.keys().copied()
    }

    pub fn has_plane(&self, plane: PlaneId) -> bool {
        self.planes.contains_key(&plane)
    }

    /// Size of a space.
    pub fn len(&self, space: Space) -> CutResult<usize> {
        match space {
            Space::Event => Ok(self.n_events()),
            Space::Track => Ok(self.n_tracks()),
            Space::Cluster(plane) => self.n_clusters(plane),
        }
    }

    pub fn event_of(&self, track: usize) -> Option<usize> {
        (track < self.n_tracks()).then(|| self.offsets.partition_point(|&o| o <= track) - 1)
    }

    pub fn tracks_of(&self, event: usize) -> Range<usize> {
        match (self.offsets.get(event), self.offsets.get(event + 1)) {
            (Some(&start), Some(&end)) => start..end,
            _ => 0..0,
        }
    }

    pub fn track_of(&self, plane: PlaneId, cluster: usize) -> Option<usize> {
        self.planes.get(&plane)?.track_of.get(cluster).copied().flatten()
    }

    pub fn cluster_of(&self, plane: PlaneId, track: usize) -> Option<usize> {
        self.planes.get(&plane)?.cluster_of.get(track).copied().flatten()
    }

    fn link(&self, plane: PlaneId) -> CutResult<&PlaneLink> {
        self.planes.get(&plane).ok_or(CutError::UnknownPlane(plane))
    }

    /// Attach a space to plain values, checking the length.
    pub fn tag<T>(&self, space: Space, values: Vec<T>) -> CutResult<SpaceArray<T>> {
        let array = SpaceArray::from_parts(space, values);
        self.check(&array, "array")?;
        Ok(array)
    }

    pub fn filled<T: Clone>(&self, space: Space, value: T) -> CutResult<SpaceArray<T>> {
        Ok(SpaceArray::from_parts(space, vec![value; self.len(space)?]))
    }

    /// Fail with [`CutError::Shape`] unless `array` has the size of its space.
    pub fn check<T>(&self, array: &SpaceArray<T>, what: &str) -> CutResult<()> {
        let expected = self.len(array.space)?;
        if array.len() != expected {
            return Err(CutError::Shape {
                what: what.to_string(),
                space: array.space,
                expected,
                actual: array.len(),
            });
        }
        Ok(())
    }

    /// Repeat every event value once per track of that event.
    pub fn ev2trk<T: Clone>(&self, data: &[T]) -> CutResult<Vec<T>> {
        if data.len() != self.n_events() {
            return Err(CutError::Length {
                operation: "ev2trk",
                expected: self.n_events(),
                actual: data.len(),
            });
        }
        Ok(data
            .iter()
            .enumerate()
            .flat_map(|(event, v)| self.tracks_of(event).map(move |_| v.clone()))
            .collect())
    }

    /// Track values as seen from the clusters of `plane`, in cluster order.
    ///
    /// Tracks without a cluster on the plane are dropped and clusters without
    /// a track get `None`, so the result is always indexed by the plane's
    /// cluster space.
    pub fn trk2pl<T: Clone>(&self, data: &[T], plane: PlaneId) -> CutResult<Vec<Option<T>>> {
        let link = self.link(plane)?;
        if data.len() != self.n_tracks() {
            return Err(CutError::Length {
                operation: "trk2pl",
                expected: self.n_tracks(),
                actual: data.len(),
            });
        }
        Ok(link
            .track_of
            .iter()
            .map(|track| track.map(|t| data[t].clone()))
            .collect())
    }

    /// Lift a mask into track space.
    ///
    /// For a cluster mask a track passes only if it has a cluster on that plane
    /// and the cluster passes.
    pub fn dut2trk(&self, mask: &Mask) -> CutResult<Mask> {
        self.convert_mask(mask, Space::Track)
    }

    /// Event mask that is true exactly at `events`.
    pub fn make_ev(&self, events: &[usize]) -> CutResult<Mask> {
        self.from_indices(Space::Event, events)
    }

    /// Track mask that is true exactly at `tracks`.
    pub fn make_trk(&self, tracks: &[usize]) -> CutResult<Mask> {
        self.from_indices(Space::Track, tracks)
    }

    fn from_indices(&self, space: Space, indices: &[usize]) -> CutResult<Mask> {
        let size = self.len(space)?;
        let mut values = vec![false; size];
        for &index in indices {
            let slot = values.get_mut(index).ok_or(CutError::IndexOutOfRange {
                space,
                index,
                size,
            })?;
            *slot = true;
        }
        Ok(SpaceArray::from_parts(space, values))
    }

    /// Move values down the hierarchy into `target`. Clusters without a track
    /// come out as `None`.
    pub fn convert<T: Clone>(
        &self,
        array: &SpaceArray<T>,
        target: Space,
    ) -> CutResult<SpaceArray<Option<T>>> {
        self.check(array, "array")?;
        let values = match (array.space, target) {
            (from, to) if from == to => array.values.iter().cloned().map(Some).collect(),
            (Space::Event, Space::Track) => {
                self.ev2trk(&array.values)?.into_iter().map(Some).collect()
            }
            (Space::Event, Space::Cluster(plane)) => {
                self.trk2pl(&self.ev2trk(&array.values)?, plane)?
            }
            (Space::Track, Space::Cluster(plane)) => self.trk2pl(&array.values, plane)?,
            (from, to) => return Err(CutError::Projection { from, to }),
        };
        Ok(SpaceArray::from_parts(target, values))
    }

    /// Express a mask in `target`.
    ///
    /// Besides the downward moves of [`convert`](Self::convert), cluster masks
    /// may be lifted into track space and moved across planes through it.
    /// Clusters without a track are rejected by any coarser mask.
    pub fn convert_mask(&self, mask: &Mask, target: Space) -> CutResult<Mask> {
        match (mask.space, target) {
            (Space::Cluster(plane), Space::Track) => self.lift(mask, plane),
            (Space::Cluster(from), Space::Cluster(to)) if from != to => {
                let tracks = self.lift(mask, from)?;
                self.convert_mask(&tracks, target)
            }
            _ => Ok(self
                .convert(mask, target)?
                .map(|&keep| keep.unwrap_or(false))),
        }
    }

    fn lift(&self, mask: &Mask, plane: PlaneId) -> CutResult<Mask> {
        self.check(mask, "mask")?;
        let link = self.link(plane)?;
        let mut values = vec![false; self.n_tracks()];
        for (&track, &keep) in link.track_of.iter().zip(&mask.values) {
            if let Some(track) = track {
                values[track] = keep;
            }
        }
        Ok(SpaceArray::from_parts(Space::Track, values))
    }
}
