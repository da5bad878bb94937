//! Run context: the loaded store of one run plus its index-space model.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

use crate::config::AnalysisConfig;
use crate::data::loader::{data_identity, load_store};
use crate::data::model::{ColumnStore, DataIdentity};
use crate::error::{CutError, CutResult};
use crate::space::{PlaneId, Space, SpaceArray, SpaceModel};

pub const EVENT_GROUP: &str = "Event";
pub const TRACK_GROUP: &str = "Tracks";

pub fn clusters_group(plane: PlaneId) -> String {
    format!("Plane{plane}/Clusters")
}

pub fn plane_tracks_group(plane: PlaneId) -> String {
    format!("Plane{plane}/Tracks")
}

fn parse_clusters_group(group: &str) -> Option<PlaneId> {
    group
        .strip_prefix("Plane")?
        .strip_suffix("/Clusters")?
        .parse()
        .ok()
}

/// Read-only analysis context shared by the cut registries.
#[derive(Debug)]
pub struct RunContext {
    run: u32,
    dut: PlaneId,
    config: AnalysisConfig,
    store: ColumnStore,
    model: Arc<SpaceModel>,
    identity: DataIdentity,
}

impl RunContext {
    /// Load a run store from disk and derive its index spaces.
    pub fn open(
        path: &Path,
        run: u32,
        dut: PlaneId,
        config: AnalysisConfig,
    ) -> anyhow::Result<Self> {
        let store =
            load_store(path).with_context(|| format!("loading run store {}", path.display()))?;
        let identity = data_identity(path, run)?;
        let context = Self::from_store(store, dut, config, identity)
            .with_context(|| format!("run {run} in {}", path.display()))?;
        log::info!(
            "run {run}: {} events, {} tracks, {} clusters on plane {dut}",
            context.n_events(),
            context.n_tracks(),
            context.model.n_clusters(dut)?
        );
        Ok(context)
    }

    pub fn from_store(
        store: ColumnStore,
        dut: PlaneId,
        config: AnalysisConfig,
        identity: DataIdentity,
    ) -> CutResult<Self> {
        let model = build_model(&store)?;
        if !model.has_plane(dut) {
            return Err(CutError::UnknownPlane(dut));
        }
        if let Some(reference) = config.reference_plane {
            if !model.has_plane(reference) {
                return Err(CutError::UnknownPlane(reference));
            }
        }
        Ok(Self {
            run: identity.run,
            dut,
            config,
            store,
            model: Arc::new(model),
            identity,
        })
    }

    pub fn run(&self) -> u32 {
        self.run
    }

    /// Plane of the device under test.
    pub fn dut(&self) -> PlaneId {
        self.dut
    }

    pub fn config(&self) -> &AnalysisConfig {
        &self.config
    }

    pub fn model(&self) -> &Arc<SpaceModel> {
        &self.model
    }

    pub fn identity(&self) -> DataIdentity {
        self.identity
    }

    pub fn n_events(&self) -> usize {
        self.model.n_events()
    }

    pub fn n_tracks(&self) -> usize {
        self.model.n_tracks()
    }

    pub fn n_clusters(&self, plane: PlaneId) -> CutResult<usize> {
        self.model.n_clusters(plane)
    }

    pub fn structure(&self) -> String {
        self.store.structure()
    }

    // -- space-tagged accessors --

    pub fn events(&self, field: &str) -> CutResult<SpaceArray<f64>> {
        self.model
            .tag(Space::Event, self.store.f64s(EVENT_GROUP, field)?)
    }

    pub fn event_ints(&self, field: &str) -> CutResult<SpaceArray<i64>> {
        let values = self.store.i64s(EVENT_GROUP, field)?.to_vec();
        self.model.tag(Space::Event, values)
    }

    pub fn tracks(&self, field: &str) -> CutResult<SpaceArray<f64>> {
        self.model
            .tag(Space::Track, self.store.f64s(TRACK_GROUP, field)?)
    }

    pub fn clusters(&self, plane: PlaneId, field: &str) -> CutResult<SpaceArray<f64>> {
        let values = self.store.f64s(&clusters_group(plane), field)?;
        self.model.tag(Space::Cluster(plane), values)
    }

    pub fn cluster_ints(&self, plane: PlaneId, field: &str) -> CutResult<SpaceArray<i64>> {
        let values = self.store.i64s(&clusters_group(plane), field)?.to_vec();
        self.model.tag(Space::Cluster(plane), values)
    }

    /// Track extrapolations onto `plane`, one entry per track.
    pub fn plane_tracks(&self, plane: PlaneId, field: &str) -> CutResult<SpaceArray<f64>> {
        let values = self.store.f64s(&plane_tracks_group(plane), field)?;
        self.model.tag(Space::Track, values)
    }

    /// Cluster position minus track extrapolation on `plane`, per cluster.
    /// NaN for clusters without a track.
    pub fn residual(&self, plane: PlaneId, field: &str) -> CutResult<SpaceArray<f64>> {
        let clusters = self.clusters(plane, field)?;
        let tracks = self
            .model
            .convert(&self.plane_tracks(plane, field)?, Space::Cluster(plane))?;
        clusters.zip_with(&tracks, |c, t| t.map_or(f64::NAN, |t| c - t))
    }
}

fn build_model(store: &ColumnStore) -> CutResult<SpaceModel> {
    let per_event = store.indices(TRACK_GROUP, "NTracks")?;
    let n_tracks = store.column(TRACK_GROUP, "Size")?.len();

    let mut model = SpaceModel::new(&per_event);
    if model.n_tracks() != n_tracks {
        return Err(CutError::Layout(format!(
            "Tracks/NTracks sums to {} but Tracks/Size has {n_tracks} entries",
            model.n_tracks()
        )));
    }

    let planes: Vec<PlaneId> = store.group_names().filter_map(parse_clusters_group).collect();
    for plane in planes {
        let track_of = store.links(&clusters_group(plane), "Track")?;
        model = model.with_plane(plane, track_of)?;
    }
    Ok(model)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::data::model::Column;

    #[test]
    fn test_model_from_store() {
        let run = run();
        assert_eq!(run.n_events(), 6);
        assert_eq!(run.n_tracks(), 6);
        assert_eq!(run.n_clusters(DUT).unwrap(), 5);
        assert_eq!(run.n_clusters(REF).unwrap(), 4);
        assert_eq!(run.model().planes().collect::<Vec<_>>(), vec![DUT, REF]);
        assert_eq!(run.model().track_of(DUT, 2), Some(3));
    }

    #[test]
    fn test_accessors_are_tagged() {
        let run = run();
        assert_eq!(run.events("Time").unwrap().space(), Space::Event);
        assert_eq!(run.tracks("Chi2").unwrap().space(), Space::Track);
        assert_eq!(run.clusters(DUT, "Charge").unwrap().space(), Space::Cluster(DUT));
        assert_eq!(run.plane_tracks(DUT, "U").unwrap().len(), 6);
        assert_eq!(run.cluster_ints(DUT, "Size").unwrap().values(), &[1, 2, 1, 3, 1]);
        assert!(matches!(
            run.clusters(DUT, "Missing"),
            Err(CutError::MissingField { .. })
        ));
    }

    #[test]
    fn test_residual_uses_matched_track() {
        let run = run();
        let du = run.residual(DUT, "U").unwrap();
        assert_eq!(du.space(), Space::Cluster(DUT));
        // cluster 3 sits on track 4, extrapolated to 0.9
        assert!((du.values()[3] + 0.6).abs() < 1e-12);
        assert!(du.values().iter().enumerate().all(|(i, d)| i == 3 || d.abs() < 1e-12));
        assert_eq!(run.residual(REF, "U").unwrap().values(), &[0.0, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_cluster_without_track() {
        let run = RunContext::from_store(
            store_with_stray_cluster(),
            DUT,
            config(),
            DataIdentity::in_memory(1),
        )
        .unwrap();
        assert_eq!(run.n_clusters(DUT).unwrap(), 6);
        assert_eq!(run.model().track_of(DUT, 5), None);
        assert_eq!(run.model().cluster_of(DUT, 5), Some(4));

        let du = run.residual(DUT, "U").unwrap();
        assert!(du.values()[5].is_nan());
        assert!((du.values()[3] + 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_field_of_wrong_length_is_a_shape_error() {
        let store = store().with_field("Event", "Bad", Column::Float(vec![1.0]));
        let run = RunContext::from_store(store, DUT, config(), DataIdentity::in_memory(1)).unwrap();
        assert!(matches!(run.events("Bad"), Err(CutError::Shape { .. })));
    }

    #[test]
    fn test_inconsistent_track_count() {
        let store =
            store().with_field("Tracks", "NTracks", Column::Integer(vec![1, 1, 0, 1, 1, 1]));
        let err =
            RunContext::from_store(store, DUT, config(), DataIdentity::in_memory(1)).unwrap_err();
        assert!(matches!(err, CutError::Layout(_)));
    }

    #[test]
    fn test_unknown_planes_are_rejected() {
        let err =
            RunContext::from_store(store(), 9, config(), DataIdentity::in_memory(1)).unwrap_err();
        assert_eq!(err, CutError::UnknownPlane(9));

        let mut config = config();
        config.reference_plane = Some(4);
        let err =
            RunContext::from_store(store(), DUT, config, DataIdentity::in_memory(1)).unwrap_err();
        assert_eq!(err, CutError::UnknownPlane(4));
    }

    #[test]
    fn test_open_json_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        std::fs::write(
            &path,
            r#"{
                "Event": { "Time": [0.0, 1.0] },
                "Tracks": { "NTracks": [1, 1], "Size": [6, 6] },
                "Plane1": { "Clusters": { "Track": [1] } }
            }"#,
        )
        .unwrap();
        let run = RunContext::open(&path, 3, 1, AnalysisConfig::default()).unwrap();
        assert_eq!(run.run(), 3);
        assert_eq!(run.identity().run, 3);
        assert_eq!(run.model().cluster_of(1, 1), Some(0));
        assert!(run.structure().contains("Plane1/Clusters"));
    }
}
