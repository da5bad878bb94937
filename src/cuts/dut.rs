use std::cell::{Ref, RefCell};
use std::ops::{Deref, DerefMut};
use std::rc::Rc;
use std::sync::Arc;

use crate::cuts::generators;
use crate::cuts::registry::{CutRegistry, FIDUCIAL};
use crate::cuts::selection::Selection;
use crate::cuts::track::TrackCuts;
use crate::error::CutResult;
use crate::run::RunContext;
use crate::space::{Mask, Space};

pub const NAMESPACE: &str = "dut";

/// Cluster-level cuts of the device under test.
#[derive(Debug)]
pub struct DutCuts {
    run: Arc<RunContext>,
    registry: CutRegistry,
    tracks: Rc<RefCell<TrackCuts>>,
    surface: bool,
}

impl DutCuts {
    pub fn new(run: Arc<RunContext>, tracks: Rc<RefCell<TrackCuts>>) -> CutResult<Self> {
        let registry = CutRegistry::for_run(&run, NAMESPACE, Space::Cluster(run.dut()))?;
        Ok(Self {
            run,
            registry,
            tracks,
            surface: false,
        })
    }

    pub fn run(&self) -> &Arc<RunContext> {
        &self.run
    }

    /// The shared track cuts.
    pub fn tracks(&self) -> Ref<'_, TrackCuts> {
        self.tracks.borrow()
    }

    pub fn is_surface(&self) -> bool {
        self.surface
    }

    /// Register the device pipeline, building the track cuts first if they
    /// are missing. With `redo` the track cuts are rebuilt as well, so the
    /// copied track quality cut is fresh.
    pub fn make(&mut self, redo: bool) -> CutResult<()> {
        let run = Arc::clone(&self.run);
        let cuts = &run.config().cuts;
        let dut = run.dut();

        self.set_fiducial(self.surface)?;
        let [low, high] = cuts.trigger_phase;
        self.registry.register_with(
            "tp",
            20,
            &format!("trigger phase in [{low}, {high}]"),
            redo,
            || generators::trigger_phase(&run),
        )?;
        self.registry.register_with(
            "tstart",
            30,
            &format!("exclude first {}s", cuts.start_time),
            redo,
            || generators::start_time(&run),
        )?;

        if redo || !self.tracks.borrow().contains("chi2") {
            self.tracks.borrow_mut().make(redo)?;
        }
        let chi2 = self.tracks.borrow().get("chi2")?.clone();
        self.registry
            .register("chi2", chi2.mask().clone(), 40, chi2.description())?;

        self.registry.register_with(
            "res",
            50,
            &format!("residual below {}", cuts.max_residual),
            redo,
            || generators::residual(&run, dut, cuts.max_residual),
        )?;
        if let Some(max) = cuts.max_cluster_size {
            self.registry.register_with(
                "cs",
                60,
                &format!("cluster size at most {max}"),
                redo,
                || generators::cluster_size(&run, dut, max),
            )?;
        }

        log::info!(
            "dut cuts: {} of {} clusters on plane {dut} pass",
            self.registry.combined()?.count(),
            run.n_clusters(dut)?
        );
        Ok(())
    }

    fn set_fiducial(&mut self, surface: bool) -> CutResult<()> {
        let run = &self.run;
        let dut = run.dut();
        let mask = generators::fiducial(
            &run.clusters(dut, "X")?,
            &run.clusters(dut, "Y")?,
            run.config().cuts.fiducial_region(surface),
        )?;
        let mode = if surface { "surface" } else { "bulk" };
        self.registry
            .register(FIDUCIAL, mask, 10, &format!("{mode} fiducial area"))?;
        self.surface = surface;
        Ok(())
    }

    /// Switch both registries to the surface (or back to the bulk) fiducial
    /// region.
    pub fn activate_surface(&mut self, on: bool) -> CutResult<()> {
        self.set_fiducial(on)?;
        self.tracks.borrow_mut().set_fiducial(on)?;
        log::info!("{} fiducial area active", if on { "surface" } else { "bulk" });
        Ok(())
    }

    pub fn deactivate_surface(&mut self) -> CutResult<()> {
        self.activate_surface(false)
    }

    /// A device selection as a track mask; tracks without a device cluster
    /// are rejected.
    pub fn to_trk(&self, selection: &Selection) -> CutResult<Mask> {
        self.model().dut2trk(&self.resolve(selection)?)
    }
}

impl Deref for DutCuts {
    type Target = CutRegistry;

    fn deref(&self) -> &CutRegistry {
        &self.registry
    }
}

impl DerefMut for DutCuts {
    fn deref_mut(&mut self) -> &mut CutRegistry {
        &mut self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::DataIdentity;
    use crate::run::testing::{config, run, store, store_with_stray_cluster, DUT};

    fn pipeline(run: Arc<RunContext>) -> DutCuts {
        let tracks = Rc::new(RefCell::new(TrackCuts::new(Arc::clone(&run)).unwrap()));
        let mut cuts = DutCuts::new(run, tracks).unwrap();
        cuts.make(false).unwrap();
        cuts
    }

    fn values(cuts: &DutCuts, name: &str) -> Vec<bool> {
        cuts.to_native(cuts.get(name).unwrap().mask())
            .unwrap()
            .into_values()
    }

    #[test]
    fn test_pipeline_masks() {
        let cuts = pipeline(run());
        assert_eq!(cuts.native(), Space::Cluster(DUT));
        assert_eq!(cuts.names(), vec!["fid", "tp", "tstart", "chi2", "res"]);
        assert_eq!(values(&cuts, "fid"), [true, true, true, true, false]);
        assert_eq!(values(&cuts, "tp"), [true, true, false, true, true]);
        assert_eq!(values(&cuts, "tstart"), [false, true, true, true, true]);
        assert_eq!(values(&cuts, "chi2"), [true, true, true, true, false]);
        assert_eq!(values(&cuts, "res"), [true, true, true, false, true]);
        assert_eq!(
            cuts.combined().unwrap().values(),
            &[false, true, false, false, false]
        );
        assert_eq!(
            cuts.exclude("res", None).unwrap().values(),
            &[false, true, false, true, false]
        );
    }

    #[test]
    fn test_chi2_copied_from_track_cuts() {
        let cuts = pipeline(run());
        assert_eq!(cuts.get("chi2").unwrap().space(), Space::Track);
        assert_eq!(
            cuts.get("chi2").unwrap().mask(),
            cuts.tracks().get("chi2").unwrap().mask()
        );
        // the track pipeline was built on demand
        assert_eq!(cuts.tracks().len(), 5);
    }

    #[test]
    fn test_chi2_copy_follows_the_track_cuts() {
        let mut cuts = pipeline(run());
        let strict = cuts.model().make_trk(&[0]).unwrap();
        cuts.tracks
            .borrow_mut()
            .register("chi2", strict.clone(), 50, "only track 0")
            .unwrap();

        cuts.make(false).unwrap();
        assert_eq!(cuts.get("chi2").unwrap().mask(), &strict);
        assert_eq!(cuts.get("chi2").unwrap().description(), "only track 0");

        // a device redo rebuilds the track cuts before copying
        cuts.make(true).unwrap();
        assert_eq!(
            cuts.tracks().get("chi2").unwrap().mask().values(),
            &[true, true, true, true, true, false]
        );
        assert_eq!(values(&cuts, "chi2"), [true, true, true, true, false]);
    }

    #[test]
    fn test_stray_cluster_fails_track_level_cuts() {
        let run = RunContext::from_store(
            store_with_stray_cluster(),
            DUT,
            config(),
            DataIdentity::in_memory(1),
        )
        .unwrap();
        let cuts = pipeline(Arc::new(run));
        // inside the fiducial area, but without a track
        assert!(values(&cuts, "fid")[5]);
        assert!(!values(&cuts, "tp")[5]);
        assert!(!values(&cuts, "res")[5]);
        assert_eq!(
            cuts.combined().unwrap().values(),
            &[false, true, false, false, false, false]
        );
    }

    #[test]
    fn test_surface_switches_both_registries() {
        let mut cuts = pipeline(run());
        cuts.activate_surface(true).unwrap();
        assert!(cuts.is_surface());
        assert!(cuts.tracks().is_surface());
        assert_eq!(cuts.fiducial().unwrap().count(), 5);
        assert_eq!(cuts.tracks().fiducial().unwrap().count(), 6);

        // make keeps the active mode
        cuts.make(false).unwrap();
        assert_eq!(cuts.fiducial().unwrap().count(), 5);

        cuts.deactivate_surface().unwrap();
        assert!(!cuts.tracks().is_surface());
        assert_eq!(
            cuts.fiducial().unwrap().values(),
            &[true, true, true, true, false]
        );
    }

    #[test]
    fn test_to_trk() {
        let cuts = pipeline(run());
        assert_eq!(
            cuts.to_trk(&Selection::Active).unwrap().values(),
            &[false, true, false, false, false, false]
        );
        // track 2 has no device cluster
        assert_eq!(
            cuts.to_trk(&Selection::Everything).unwrap().values(),
            &[true, true, false, true, true, true]
        );
    }

    #[test]
    fn test_cluster_size_cut_when_configured() {
        let mut config = config();
        config.cuts.max_cluster_size = Some(2);
        let run = RunContext::from_store(store(), DUT, config, DataIdentity::in_memory(1)).unwrap();
        let cuts = pipeline(Arc::new(run));
        assert_eq!(cuts.names().last(), Some(&"cs"));
        assert_eq!(values(&cuts, "cs"), [true, true, true, false, true]);
    }
}
