/// Description of an h-Refinement
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HRef {
    /// isotropic (4 child Elems)
    T,
    /// anisotropic bisection about the u-direction (2 side-by-side child Elems)
    U,
    /// anisotropic bisection about the v-direction (2 stacked child Elems)
    V,
}

/// Description of an Elem's h-refinement levels in the u and v directions
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct HLevels {
    pub u: u8,
    pub v: u8,
}

impl HLevels {
    pub fn from(u: u8, v: u8) -> Self {
        Self { u, v }
    }

    pub fn refined(&self, refinement: HRef) -> Self {
        match refinement {
            HRef::T => Self::from(self.u + 1, self.v + 1),
            HRef::U => Self::from(self.u + 1, self.v),
            HRef::V => Self::from(self.u, self.v + 1),
        }
    }

    /// The deeper of the two directional refinement levels
    pub fn max(&self) -> u8 {
        self.u.max(self.v)
    }
}

/// Periodic derefinement method applied by the transient driver to bound
/// long-run DoF growth
///
/// The variants mirror the three classical unrefinement treatments of
/// transient adaptive calculations:
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnrefinementMethod {
    /// Reset the working mesh to the base mesh and all polynomial degrees to
    /// the initial degree
    ResetToBase,
    /// Shave one refinement layer off the working mesh and reset polynomial
    /// degrees to the initial degree
    StripLayer,
    /// Shave one refinement layer off the working mesh and decrease each
    /// Elem's polynomial degree by one (never below 1)
    StripLayerAndDecreaseOrder,
}
