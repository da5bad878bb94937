use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::cuts::cache::{CacheError, CutCache};
use crate::cuts::cut::Cut;
use crate::error::{CutError, CutResult};
use crate::run::RunContext;
use crate::space::{Mask, Space, SpaceModel};

/// Name of the fiducial cut, looked up by [`CutRegistry::fiducial`].
pub const FIDUCIAL: &str = "fid";

#[derive(Debug, Clone)]
struct Entry {
    cut: Cut,
    /// Position of the first registration under this name.
    order: usize,
}

/// A set of named cuts over one native space.
///
/// Cuts may be declared in any space that converts into the native one; they
/// are only brought into the native space when masks are combined.
#[derive(Debug)]
pub struct CutRegistry {
    namespace: String,
    native: Space,
    model: Arc<SpaceModel>,
    cuts: BTreeMap<String, Entry>,
    next_order: usize,
    cache: Option<CutCache>,
}

impl CutRegistry {
    pub fn new(
        namespace: impl Into<String>,
        native: Space,
        model: Arc<SpaceModel>,
    ) -> CutResult<Self> {
        model.len(native)?;
        Ok(Self {
            namespace: namespace.into(),
            native,
            model,
            cuts: BTreeMap::new(),
            next_order: 0,
            cache: None,
        })
    }

    /// Registry over a run, cached under `namespace` when the run's
    /// configuration enables the cut cache.
    pub fn for_run(run: &RunContext, namespace: &str, native: Space) -> CutResult<Self> {
        let registry = Self::new(namespace, native, Arc::clone(run.model()))?;
        let cache = &run.config().cache;
        Ok(if cache.enabled {
            registry.with_cache(CutCache::new(&cache.dir, namespace, run.identity()))
        } else {
            registry
        })
    }

    pub fn with_cache(mut self, cache: CutCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn native(&self) -> Space {
        self.native
    }

    pub fn model(&self) -> &Arc<SpaceModel> {
        &self.model
    }

    pub fn len(&self) -> usize {
        self.cuts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cuts.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.cuts.contains_key(name)
    }

    pub fn get(&self, name: &str) -> CutResult<&Cut> {
        self.cuts
            .get(name)
            .map(|entry| &entry.cut)
            .ok_or_else(|| CutError::UnknownCut(name.to_string()))
    }

    /// Cut names in report order.
    pub fn names(&self) -> Vec<&str> {
        self.ordered().map(|entry| entry.cut.name()).collect()
    }

    fn ordered(&self) -> impl Iterator<Item = &Entry> {
        let mut entries: Vec<&Entry> = self.cuts.values().collect();
        entries.sort_by_key(|entry| (entry.cut.priority(), entry.order));
        entries.into_iter()
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Store a cut, replacing any cut of the same name.
    ///
    /// Nothing changes when the mask does not fit its space or cannot be
    /// brought into the native space.
    pub fn register(
        &mut self,
        name: &str,
        mask: Mask,
        priority: i32,
        description: &str,
    ) -> CutResult<()> {
        let cut = Cut::new(name, mask, priority, description, &self.model)?;
        if !reaches(cut.space(), self.native) {
            return Err(CutError::Projection {
                from: cut.space(),
                to: self.native,
            });
        }
        let order = match self.cuts.get(name) {
            Some(entry) => entry.order,
            None => {
                self.next_order += 1;
                self.next_order - 1
            }
        };
        self.cuts.insert(name.to_string(), Entry { cut, order });
        Ok(())
    }

    /// Register a cut computed on demand.
    ///
    /// A present, non-stale cut with the same description is kept unless
    /// `redo` is set. Otherwise the persistent cache is tried (skipped with
    /// `redo`), and only then is `generate` run and its result cached.
    ///
    /// The description doubles as the fingerprint of the generator's
    /// parameters: a cached mask computed under another description is stale.
    pub fn register_with<F>(
        &mut self,
        name: &str,
        priority: i32,
        description: &str,
        redo: bool,
        generate: F,
    ) -> CutResult<()>
    where
        F: FnOnce() -> CutResult<Mask>,
    {
        if !redo {
            let current = self.cuts.get(name).is_some_and(|entry| {
                !entry.cut.is_stale() && entry.cut.description() == description
            });
            if current {
                return Ok(());
            }
            if let Some(mask) = self.load_cached(name, description) {
                match self.register(name, mask, priority, description) {
                    Ok(()) => return Ok(()),
                    Err(e) => log::warn!("{}: cached '{name}' rejected: {e}", self.namespace),
                }
            }
        }

        log::debug!("{}: computing '{name}'", self.namespace);
        self.register(name, generate()?, priority, description)?;
        if let (Some(cache), Some(entry)) = (&self.cache, self.cuts.get(name)) {
            if let Err(e) = cache.save(name, description, entry.cut.mask()) {
                log::warn!("{}: could not cache '{name}': {e}", self.namespace);
            }
        }
        Ok(())
    }

    fn load_cached(&self, name: &str, params: &str) -> Option<Mask> {
        let cache = self.cache.as_ref()?;
        match cache.load(name, params, &self.model) {
            Ok(mask) => {
                log::debug!("{}: '{name}' from cache", self.namespace);
                Some(mask)
            }
            Err(CacheError::Miss) => None,
            Err(e) => {
                log::warn!("{}: ignoring cached '{name}': {e}", self.namespace);
                None
            }
        }
    }

    /// Mark a cut for recomputation and drop its cached mask.
    pub fn invalidate(&mut self, name: &str) -> CutResult<()> {
        let entry = self
            .cuts
            .get_mut(name)
            .ok_or_else(|| CutError::UnknownCut(name.to_string()))?;
        entry.cut = entry.cut.clone().into_stale();
        self.forget_cached(name);
        Ok(())
    }

    pub fn remove(&mut self, name: &str) -> CutResult<Cut> {
        let entry = self
            .cuts
            .remove(name)
            .ok_or_else(|| CutError::UnknownCut(name.to_string()))?;
        self.forget_cached(name);
        Ok(entry.cut)
    }

    /// Drop every cut. Cached masks stay valid and are reused by the next
    /// lazy registration.
    pub fn reset(&mut self) {
        self.cuts.clear();
        self.next_order = 0;
    }

    fn forget_cached(&self, name: &str) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.remove(name) {
                log::warn!("{}: could not remove cached '{name}': {e}", self.namespace);
            }
        }
    }

    // ------------------------------------------------------------------
    // Combination
    // ------------------------------------------------------------------

    /// Express any mask convertible to the native space in it.
    pub fn to_native(&self, mask: &Mask) -> CutResult<Mask> {
        self.model.convert_mask(mask, self.native)
    }

    /// AND of every cut; all true without cuts.
    pub fn combined(&self) -> CutResult<Mask> {
        self.reduce(|_| true)
    }

    /// AND of every cut except `name`, narrowed further by `cut` if given.
    pub fn exclude(&self, name: &str, cut: Option<&Mask>) -> CutResult<Mask> {
        if !self.contains(name) {
            return Err(CutError::UnknownCut(name.to_string()));
        }
        let mask = self.reduce(|other| other != name)?;
        self.narrow(mask, cut)
    }

    /// Mask of the fiducial cut.
    pub fn fiducial(&self) -> CutResult<&Mask> {
        Ok(self.get(FIDUCIAL)?.mask())
    }

    /// The combined mask with or without the fiducial cut, narrowed by `cut`.
    pub fn without_fiducial(&self, cut: Option<&Mask>, fid: bool) -> CutResult<Mask> {
        if fid {
            self.narrow(self.combined()?, cut)
        } else {
            self.exclude(FIDUCIAL, cut)
        }
    }

    fn reduce(&self, keep: impl Fn(&str) -> bool) -> CutResult<Mask> {
        let mut mask = self.model.filled(self.native, true)?;
        for (name, entry) in &self.cuts {
            if keep(name) {
                mask = mask.and(&self.to_native(entry.cut.mask())?)?;
            }
        }
        Ok(mask)
    }

    fn narrow(&self, mask: Mask, cut: Option<&Mask>) -> CutResult<Mask> {
        match cut {
            Some(cut) => mask.and(&self.to_native(cut)?),
            None => Ok(mask),
        }
    }

    // ------------------------------------------------------------------
    // Reporting
    // ------------------------------------------------------------------

    pub fn report(&self) -> Vec<CutSummary> {
        self.ordered()
            .map(|entry| CutSummary {
                name: entry.cut.name().to_string(),
                priority: entry.cut.priority(),
                space: entry.cut.space(),
                passed: entry.cut.n_passed(),
                size: entry.cut.mask().len(),
                description: entry.cut.description().to_string(),
            })
            .collect()
    }
}

/// Whether masks of `from` can be expressed in `to`.
fn reaches(from: Space, to: Space) -> bool {
    match (from, to) {
        (Space::Event, _) => true,
        (Space::Track, Space::Event) => false,
        (Space::Track, _) => true,
        (Space::Cluster(_), Space::Event) => false,
        (Space::Cluster(_), _) => true,
    }
}

/// One row of [`CutRegistry::report`].
#[derive(Debug, Clone, PartialEq)]
pub struct CutSummary {
    pub name: String,
    pub priority: i32,
    pub space: Space,
    pub passed: usize,
    pub size: usize,
    pub description: String,
}

impl CutSummary {
    pub fn fraction(&self) -> f64 {
        if self.size == 0 {
            0.0
        } else {
            self.passed as f64 / self.size as f64
        }
    }
}

impl fmt::Display for CutSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:>4}  {:<8} {:<18} {:>9}/{:<9} {:>6.1}%  {}",
            self.priority,
            self.name,
            self.space.to_string(),
            self.passed,
            self.size,
            100.0 * self.fraction(),
            self.description
        )
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::data::model::DataIdentity;

    fn registry() -> CutRegistry {
        let model = SpaceModel::new(&[1, 1, 1])
            .with_plane(1, vec![Some(0), Some(2)])
            .unwrap();
        CutRegistry::new("test", Space::Track, Arc::new(model)).unwrap()
    }

    fn mask(registry: &CutRegistry, space: Space, values: &[bool]) -> Mask {
        registry.model().tag(space, values.to_vec()).unwrap()
    }

    fn tp_and_fid() -> CutRegistry {
        let mut reg = registry();
        let tp = mask(&reg, Space::Event, &[true, false, true]);
        let fid = mask(&reg, Space::Track, &[true, true, false]);
        reg.register("tp", tp, 10, "trigger phase").unwrap();
        reg.register(FIDUCIAL, fid, 30, "fiducial").unwrap();
        reg
    }

    #[test]
    fn test_combined_and_exclude() {
        let reg = tp_and_fid();
        assert_eq!(reg.combined().unwrap().values(), &[true, false, false]);
        assert_eq!(reg.exclude(FIDUCIAL, None).unwrap().values(), &[true, false, true]);
        assert_eq!(reg.exclude("tp", None).unwrap().values(), &[true, true, false]);
        assert_eq!(reg.fiducial().unwrap().values(), &[true, true, false]);
        assert_eq!(
            reg.without_fiducial(None, false).unwrap(),
            reg.exclude(FIDUCIAL, None).unwrap()
        );
        assert_eq!(reg.without_fiducial(None, true).unwrap(), reg.combined().unwrap());
    }

    #[test]
    fn test_empty_registry_passes_everything() {
        let reg = registry();
        assert!(reg.is_empty());
        assert_eq!(reg.combined().unwrap().values(), &[true, true, true]);
        assert!(matches!(reg.fiducial(), Err(CutError::UnknownCut(_))));
    }

    #[test]
    fn test_registration_order_does_not_matter() {
        let forward = tp_and_fid();

        let mut backward = registry();
        let fid = mask(&backward, Space::Track, &[true, true, false]);
        let tp = mask(&backward, Space::Event, &[true, false, true]);
        backward.register(FIDUCIAL, fid, 30, "").unwrap();
        backward.register("tp", tp, 10, "").unwrap();

        assert_eq!(forward.combined().unwrap(), backward.combined().unwrap());
        // priority, not insertion, orders the report
        assert_eq!(backward.names(), vec!["tp", FIDUCIAL]);
    }

    #[test]
    fn test_exclude_is_neutral_to_an_all_true_cut() {
        let mut reg = tp_and_fid();
        let without = reg.exclude(FIDUCIAL, None).unwrap();
        let all = reg.model().filled(Space::Track, true).unwrap();
        reg.register(FIDUCIAL, all, 30, "").unwrap();
        assert_eq!(reg.exclude(FIDUCIAL, None).unwrap(), without);
        assert_eq!(reg.combined().unwrap(), without);
    }

    #[test]
    fn test_exclude_with_override() {
        let reg = tp_and_fid();
        let extra = reg.model().make_trk(&[2]).unwrap();
        assert_eq!(
            reg.exclude(FIDUCIAL, Some(&extra)).unwrap().values(),
            &[false, false, true]
        );
        assert_eq!(
            reg.exclude("missing", None),
            Err(CutError::UnknownCut("missing".to_string()))
        );
    }

    #[test]
    fn test_bad_mask_leaves_registry_unchanged() {
        let mut reg = tp_and_fid();
        let before = reg.combined().unwrap();
        let short = Mask::from_parts(Space::Track, vec![false]);
        assert!(matches!(
            reg.register(FIDUCIAL, short, 30, ""),
            Err(CutError::Shape { .. })
        ));
        assert_eq!(reg.len(), 2);
        assert_eq!(reg.combined().unwrap(), before);
    }

    #[test]
    fn test_event_registry_rejects_track_cuts() {
        let model = Arc::new(SpaceModel::new(&[1, 1, 1]));
        let mut reg = CutRegistry::new("events", Space::Event, model.clone()).unwrap();
        let tracks = model.make_trk(&[0]).unwrap();
        assert_eq!(
            reg.register("chi2", tracks, 50, ""),
            Err(CutError::Projection {
                from: Space::Track,
                to: Space::Event
            })
        );
        assert!(reg.is_empty());
    }

    #[test]
    fn test_cluster_cut_lifts_into_track_space() {
        let mut reg = registry();
        let clusters = mask(&reg, Space::Cluster(1), &[false, true]);
        reg.register("res", clusters, 20, "").unwrap();
        assert_eq!(reg.combined().unwrap().values(), &[false, false, true]);
    }

    #[test]
    fn test_replacing_keeps_order_and_report() {
        let mut reg = tp_and_fid();
        let tp = mask(&reg, Space::Event, &[true, true, true]);
        reg.register("tp", tp, 10, "relaxed").unwrap();
        let report = reg.report();
        assert_eq!(report.len(), 2);
        assert_eq!(report[0].name, "tp");
        assert_eq!(report[0].passed, 3);
        assert_eq!(report[0].description, "relaxed");
        assert_eq!(report[1].space, Space::Track);
        assert!((report[1].fraction() - 2.0 / 3.0).abs() < 1e-12);
        assert!(report[1].to_string().contains("fiducial"));
    }

    #[test]
    fn test_register_with_is_lazy() {
        let mut reg = registry();
        let calls = Cell::new(0);
        let generate = || {
            calls.set(calls.get() + 1);
            Ok(reg_mask())
        };
        reg.register_with("chi2", 50, "", false, generate).unwrap();
        reg.register_with("chi2", 50, "", false, generate).unwrap();
        assert_eq!(calls.get(), 1);

        reg.register_with("chi2", 50, "", true, generate).unwrap();
        assert_eq!(calls.get(), 2);

        reg.invalidate("chi2").unwrap();
        assert!(reg.get("chi2").unwrap().is_stale());
        reg.register_with("chi2", 50, "", false, generate).unwrap();
        assert_eq!(calls.get(), 3);
        assert!(!reg.get("chi2").unwrap().is_stale());
    }

    fn reg_mask() -> Mask {
        Mask::from_parts(Space::Track, vec![true, false, true])
    }

    #[test]
    fn test_register_with_reuses_cache() {
        let root = tempfile::tempdir().unwrap();
        let cache = CutCache::new(root.path(), "test", DataIdentity::in_memory(7));
        let calls = Cell::new(0);
        let generate = || {
            calls.set(calls.get() + 1);
            Ok(reg_mask())
        };

        let mut first = registry().with_cache(cache.clone());
        first.register_with("chi2", 50, "", false, generate).unwrap();
        assert!(cache.exists("chi2"));

        let mut second = registry().with_cache(cache.clone());
        second.register_with("chi2", 50, "", false, generate).unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(second.get("chi2").unwrap().mask(), &reg_mask());

        // redo bypasses the cache
        second.register_with("chi2", 50, "", true, generate).unwrap();
        assert_eq!(calls.get(), 2);

        second.remove("chi2").unwrap();
        assert!(!cache.exists("chi2"));
    }

    #[test]
    fn test_register_with_recomputes_for_new_description() {
        let root = tempfile::tempdir().unwrap();
        let cache = CutCache::new(root.path(), "test", DataIdentity::in_memory(7));
        let calls = Cell::new(0);
        let generate = || {
            calls.set(calls.get() + 1);
            Ok(reg_mask())
        };

        let mut reg = registry().with_cache(cache.clone());
        reg.register_with("chi2", 50, "chi2 below 0.9 quantile", false, generate)
            .unwrap();
        reg.register_with("chi2", 50, "chi2 below 0.5 quantile", false, generate)
            .unwrap();
        assert_eq!(calls.get(), 2);

        let mut fresh = registry().with_cache(cache);
        fresh
            .register_with("chi2", 50, "chi2 below 0.5 quantile", false, generate)
            .unwrap();
        assert_eq!(calls.get(), 2);
        fresh
            .register_with("chi2", 50, "chi2 below 0.9 quantile", false, generate)
            .unwrap();
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_generator() {
        let root = tempfile::tempdir().unwrap();
        let cache = CutCache::new(root.path(), "test", DataIdentity::in_memory(7));
        std::fs::create_dir_all(cache.dir()).unwrap();
        std::fs::write(cache.dir().join("chi2.json"), "[]").unwrap();

        let mut reg = registry().with_cache(cache.clone());
        reg.register_with("chi2", 50, "", false, || Ok(reg_mask())).unwrap();
        assert_eq!(reg.get("chi2").unwrap().mask(), &reg_mask());
        // the broken entry was overwritten
        assert!(cache.load("chi2", "", reg.model()).is_ok());
    }

    #[test]
    fn test_generator_error_propagates() {
        let mut reg = registry();
        let err = reg
            .register_with("res", 20, "", false, || Err(CutError::UnknownPlane(9)))
            .unwrap_err();
        assert_eq!(err, CutError::UnknownPlane(9));
        assert!(!reg.contains("res"));
    }
}
