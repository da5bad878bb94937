use std::fmt;

use crate::error::CutResult;
use crate::space::{Mask, Space, SpaceModel};

/// One named boolean condition at a point in time.
///
/// A `Cut` is never edited: re-registering a name replaces the whole value.
#[derive(Debug, Clone, PartialEq)]
pub struct Cut {
    name: String,
    priority: i32,
    mask: Mask,
    description: String,
    stale: bool,
}

impl Cut {
    /// Fails with `Shape` unless the mask covers its declared space exactly.
    pub fn new(
        name: impl Into<String>,
        mask: Mask,
        priority: i32,
        description: impl Into<String>,
        model: &SpaceModel,
    ) -> CutResult<Self> {
        let name = name.into();
        model.check(&mask, &format!("cut '{name}'"))?;
        Ok(Self {
            name,
            priority,
            mask,
            description: description.into(),
            stale: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    pub fn space(&self) -> Space {
        self.mask.space()
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    /// Whether the next lazy registration must recompute this cut.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn into_stale(self) -> Self {
        Self {
            stale: true,
            ..self
        }
    }

    pub fn n_passed(&self) -> usize {
        self.mask.count()
    }
}

impl fmt::Display for Cut {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {}/{} {} entries",
            self.name,
            self.priority,
            self.n_passed(),
            self.mask.len(),
            self.mask.space()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CutError;

    #[test]
    fn test_new_checks_mask_length() {
        let model = SpaceModel::new(&[1, 1, 1]);
        let ok = model.tag(Space::Event, vec![true, false, true]).unwrap();
        let cut = Cut::new("tp", ok, 10, "trigger phase", &model).unwrap();
        assert_eq!(cut.n_passed(), 2);
        assert_eq!(cut.space(), Space::Event);
        assert!(!cut.is_stale());
        assert_eq!(cut.to_string(), "tp [10] 2/3 event entries");

        let short = Mask::from_parts(Space::Event, vec![true]);
        let err = Cut::new("tp", short, 10, "", &model).unwrap_err();
        assert!(matches!(err, CutError::Shape { expected: 3, actual: 1, .. }));
    }

    #[test]
    fn test_new_rejects_unknown_plane() {
        let model = SpaceModel::new(&[1]);
        let mask = Mask::from_parts(Space::Cluster(4), vec![]);
        assert_eq!(
            Cut::new("res", mask, 20, "", &model).unwrap_err(),
            CutError::UnknownPlane(4)
        );
    }

    #[test]
    fn test_into_stale_keeps_mask() {
        let model = SpaceModel::new(&[2]);
        let cut = Cut::new("chi2", model.make_trk(&[1]).unwrap(), 50, "", &model).unwrap();
        let stale = cut.clone().into_stale();
        assert!(stale.is_stale());
        assert_eq!(stale.mask(), cut.mask());
    }
}
