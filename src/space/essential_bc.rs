//! Essential (Dirichlet) boundary conditions
//!
//! DoFs on boundary entities named by an essential condition are excluded from
//! the unknown set; their prescribed values are held by the space and may be
//! time-dependent (e.g. an inflow profile ramped up over a startup interval).

/// A prescribed-value condition on one or more boundary markers
pub enum EssentialBC {
    /// A constant prescribed value
    Const { markers: Vec<String>, value: f64 },
    /// A space- and time-dependent prescribed value `f(x, y, t)`
    TimeDependent {
        markers: Vec<String>,
        f: Box<dyn Fn(f64, f64, f64) -> f64 + Send + Sync>,
    },
}

impl EssentialBC {
    /// Constant value on a single marker
    pub fn constant(marker: &str, value: f64) -> Self {
        Self::Const {
            markers: vec![marker.to_string()],
            value,
        }
    }

    /// Constant value on several markers
    pub fn constant_on(markers: &[&str], value: f64) -> Self {
        Self::Const {
            markers: markers.iter().map(|m| m.to_string()).collect(),
            value,
        }
    }

    /// Time-dependent value on a single marker
    pub fn time_dependent(
        marker: &str,
        f: impl Fn(f64, f64, f64) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self::TimeDependent {
            markers: vec![marker.to_string()],
            f: Box::new(f),
        }
    }

    fn markers(&self) -> &[String] {
        match self {
            Self::Const { markers, .. } => markers,
            Self::TimeDependent { markers, .. } => markers,
        }
    }

    pub fn applies_to(&self, marker: &str) -> bool {
        self.markers().iter().any(|m| m == marker)
    }

    /// The prescribed value at a boundary point
    pub fn value(&self, x: f64, y: f64, time: f64) -> f64 {
        match self {
            Self::Const { value, .. } => *value,
            Self::TimeDependent { f, .. } => f(x, y, time),
        }
    }
}

/// An ordered collection of essential boundary conditions
///
/// When multiple conditions name the same marker, the first match wins.
pub struct EssentialBCs {
    bcs: Vec<EssentialBC>,
}

impl EssentialBCs {
    pub fn new(bcs: Vec<EssentialBC>) -> Self {
        Self { bcs }
    }

    /// No essential conditions (all boundary DoFs remain unknowns)
    pub fn empty() -> Self {
        Self { bcs: Vec::new() }
    }

    /// The index of the first condition applying to `marker`, if any
    pub fn find(&self, marker: &str) -> Option<usize> {
        self.bcs.iter().position(|bc| bc.applies_to(marker))
    }

    pub fn get(&self, idx: usize) -> &EssentialBC {
        &self.bcs[idx]
    }
}
