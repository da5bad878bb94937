use crate::cuts::registry::CutRegistry;
use crate::error::CutResult;
use crate::space::{Mask, PlaneId, Space, SpaceArray};

/// Which entries an observable should keep.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Selection {
    /// The registry's combined cut.
    #[default]
    Active,
    /// No filtering at all.
    Everything,
    Mask(Mask),
}

impl From<Mask> for Selection {
    fn from(mask: Mask) -> Self {
        Selection::Mask(mask)
    }
}

impl CutRegistry {
    /// The mask a selection stands for. `Everything` gives an all-true mask
    /// over the native space.
    pub fn resolve(&self, selection: &Selection) -> CutResult<Mask> {
        match selection {
            Selection::Active => self.combined(),
            Selection::Everything => self.model().filled(self.native(), true),
            Selection::Mask(mask) => {
                self.model().check(mask, "selection")?;
                Ok(mask.clone())
            }
        }
    }

    /// Filter `data` with a selection.
    ///
    /// Data coarser than the mask is broadcast into the mask's space first;
    /// otherwise the mask is brought into the data's space. Clusters without
    /// a track have no coarser value and are skipped.
    pub fn apply<T: Clone>(
        &self,
        selection: &Selection,
        data: &SpaceArray<T>,
    ) -> CutResult<Vec<T>> {
        let model = self.model();
        model.check(data, "data")?;
        if matches!(selection, Selection::Everything) {
            return Ok(data.values().to_vec());
        }

        let mask = self.resolve(selection)?;
        if data.space() == mask.space() {
            mask.select(data)
        } else if data.space().depth() < mask.space().depth() {
            let broadcast = mask.select(&model.convert(data, mask.space())?)?;
            Ok(broadcast.into_iter().flatten().collect())
        } else {
            model.convert_mask(&mask, data.space())?.select(data)
        }
    }

    /// Filter `data` on the clusters of `plane`: both the data and the mask
    /// are expressed in that plane's cluster space.
    pub fn apply_on_plane<T: Clone>(
        &self,
        selection: &Selection,
        data: &SpaceArray<T>,
        plane: PlaneId,
    ) -> CutResult<Vec<T>> {
        let model = self.model();
        let target = Space::Cluster(plane);
        let data = model.convert(data, target)?;
        let mask = match selection {
            Selection::Everything => model.filled(target, true)?,
            _ => model.convert_mask(&self.resolve(selection)?, target)?,
        };
        Ok(mask.select(&data)?.into_iter().flatten().collect())
    }
}
