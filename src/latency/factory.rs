//! Backend construction

use std::sync::Arc;

use tracing::debug;

use super::{
    AntiLagBackend, DriverProvider, LatencyTechnology, NoneBackend, ReflexBackend, TechnologyKind,
    XellBackend,
};

/// Build an uninitialized backend for `kind`.
///
/// Construction never fails; availability is decided by
/// [`LatencyTechnology::initialize`].
pub fn create_backend(
    kind: TechnologyKind,
    provider: Arc<dyn DriverProvider>,
) -> Box<dyn LatencyTechnology> {
    debug!("Creating {} latency backend", kind);
    match kind {
        TechnologyKind::None => Box::new(NoneBackend::new()),
        TechnologyKind::Reflex => Box::new(ReflexBackend::new(provider)),
        TechnologyKind::AntiLag => Box::new(AntiLagBackend::new(provider)),
        TechnologyKind::Xell => Box::new(XellBackend::new(provider)),
    }
}
