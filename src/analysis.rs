use std::cell::{Ref, RefCell};
use std::fmt;
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;

use crate::config::AnalysisConfig;
use crate::cuts::{DutCuts, Selection, TrackCuts};
use crate::data::filter::hypot;
use crate::error::CutResult;
use crate::run::RunContext;
use crate::space::PlaneId;

// ---------------------------------------------------------------------------
// Estimate – mean with its standard error
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Estimate {
    pub mean: f64,
    /// Standard error of the mean; zero for a single entry.
    pub error: f64,
    pub n: usize,
}

impl Estimate {
    /// `None` for no values.
    pub fn from_values(values: &[f64]) -> Option<Self> {
        let n = values.len();
        if n == 0 {
            return None;
        }
        let mean = values.iter().sum::<f64>() / n as f64;
        let error = if n > 1 {
            let variance =
                values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
            (variance / n as f64).sqrt()
        } else {
            0.0
        };
        Some(Self { mean, error, n })
    }
}

impl fmt::Display for Estimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2} ± {:.2} (n = {})", self.mean, self.error, self.n)
    }
}

// ---------------------------------------------------------------------------
// Analysis – one device in one run
// ---------------------------------------------------------------------------

/// A run with its track and device cuts, and the observables they filter.
///
/// Every observable takes a [`Selection`] interpreted by the device cuts, so
/// `Selection::Active` means "all device cuts".
#[derive(Debug)]
pub struct Analysis {
    run: Arc<RunContext>,
    tracks: Rc<RefCell<TrackCuts>>,
    cuts: DutCuts,
}

impl Analysis {
    /// Build both cut pipelines for an opened run. The device pipeline builds
    /// the track cuts it depends on.
    pub fn new(run: Arc<RunContext>, redo: bool) -> CutResult<Self> {
        let tracks = Rc::new(RefCell::new(TrackCuts::new(Arc::clone(&run))?));
        let mut cuts = DutCuts::new(Arc::clone(&run), Rc::clone(&tracks))?;
        cuts.make(redo)?;
        Ok(Self { run, tracks, cuts })
    }

    pub fn open(
        path: &Path,
        run: u32,
        dut: PlaneId,
        config: AnalysisConfig,
        redo: bool,
    ) -> anyhow::Result<Self> {
        let run = RunContext::open(path, run, dut, config)?;
        Ok(Self::new(Arc::new(run), redo)?)
    }

    pub fn run(&self) -> &RunContext {
        &self.run
    }

    pub fn cuts(&self) -> &DutCuts {
        &self.cuts
    }

    pub fn cuts_mut(&mut self) -> &mut DutCuts {
        &mut self.cuts
    }

    pub fn tracks(&self) -> Ref<'_, TrackCuts> {
        self.tracks.borrow()
    }

    fn dut(&self) -> PlaneId {
        self.run.dut()
    }

    // -- pulse height --

    /// Cluster charges.
    pub fn phs(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cluster_values("Charge", selection)
    }

    /// Mean cluster charge; `None` if nothing passes.
    pub fn ph(&self, selection: &Selection) -> CutResult<Option<Estimate>> {
        Ok(Estimate::from_values(&self.phs(selection)?))
    }

    // -- positions --

    /// A cluster field of the device plane (`X`, `Y`, `U`, `V`, `Size`, ...).
    pub fn cluster_values(&self, field: &str, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts
            .apply(selection, &self.run.clusters(self.dut(), field)?)
    }

    pub fn x(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cluster_values("X", selection)
    }

    pub fn y(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cluster_values("Y", selection)
    }

    pub fn u(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cluster_values("U", selection)
    }

    pub fn v(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cluster_values("V", selection)
    }

    /// Track extrapolation onto the device, for tracks passing the selection.
    pub fn track_values(&self, field: &str, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts
            .apply(selection, &self.run.plane_tracks(self.dut(), field)?)
    }

    pub fn tu(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.track_values("U", selection)
    }

    pub fn tv(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.track_values("V", selection)
    }

    // -- residuals --

    pub fn du(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts.apply(selection, &self.run.residual(self.dut(), "U")?)
    }

    pub fn dv(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts.apply(selection, &self.run.residual(self.dut(), "V")?)
    }

    /// Distance between cluster and track on the device.
    pub fn residuals(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        let dut = self.dut();
        let distance = hypot(&self.run.residual(dut, "U")?, &self.run.residual(dut, "V")?)?;
        self.cuts.apply(selection, &distance)
    }

    // -- event and track quantities --

    pub fn time(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts.apply(selection, &self.run.events("Time")?)
    }

    pub fn trigger_phase(&self, selection: &Selection) -> CutResult<Vec<i64>> {
        self.cuts.apply(selection, &self.run.event_ints("TriggerPhase")?)
    }

    pub fn chi2(&self, selection: &Selection) -> CutResult<Vec<f64>> {
        self.cuts.apply(selection, &self.run.tracks("Chi2")?)
    }

    /// Cluster field on another plane for the tracks the device selection
    /// keeps that also have a cluster there.
    pub fn positions_on(
        &self,
        plane: PlaneId,
        field: &str,
        selection: &Selection,
    ) -> CutResult<Vec<f64>> {
        self.cuts
            .apply_on_plane(selection, &self.run.clusters(plane, field)?, plane)
    }
}
