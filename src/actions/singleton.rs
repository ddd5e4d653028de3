//! Conflict/force protocol for device-unique objects.

use crate::device::{DeviceOperation, DeviceSession};
use crate::error::ActionError;
use log::{debug, info, warn};

/// Objects a switch holds at most one of
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Singleton {
    OverlayGateway,
    EvpnInstance,
    AnycastGateway,
}

impl Singleton {
    pub fn kind(&self) -> &'static str {
        match self {
            Singleton::OverlayGateway => "Overlay gateway",
            Singleton::EvpnInstance => "EVPN",
            Singleton::AnycastGateway => "Anycast gateway MAC",
        }
    }

    fn lookup(&self) -> DeviceOperation {
        match self {
            Singleton::OverlayGateway => DeviceOperation::GetOverlayGateway,
            Singleton::EvpnInstance => DeviceOperation::GetEvpnInstance,
            Singleton::AnycastGateway => DeviceOperation::GetAnycastGateway,
        }
    }

    fn delete(&self, existing: String) -> DeviceOperation {
        match self {
            Singleton::OverlayGateway => DeviceOperation::DeleteOverlayGateway { name: existing },
            Singleton::EvpnInstance => DeviceOperation::DeleteEvpnInstance { name: existing },
            Singleton::AnycastGateway => DeviceOperation::UnconfigureAnycastGateway,
        }
    }
}

/// Create `desired` unless a differently named object already exists.
///
/// A failed lookup counts as "nothing configured". With `force` the existing
/// object is deleted first; a failed delete is logged and creation still runs.
pub async fn ensure_singleton(
    session: &mut dyn DeviceSession,
    singleton: Singleton,
    desired: &str,
    create: DeviceOperation,
    force: bool,
) -> Result<(), ActionError> {
    let lookup = singleton.lookup();
    let lookup_name = lookup.name();
    let existing = match session.execute(lookup).await.and_then(|r| r.into_name(lookup_name)) {
        Ok(existing) => existing,
        Err(e) => {
            debug!("[{}] {} lookup failed, assuming none: {}", session.host(), singleton.kind(), e);
            None
        }
    };

    if let Some(existing) = existing.filter(|existing| existing != desired) {
        if !force {
            return Err(ActionError::Conflict {
                kind: singleton.kind(),
                existing,
            });
        }
        warn!("[{}] replacing {} {} with {}", session.host(), singleton.kind(), existing, desired);
        if let Err(e) = session.execute(singleton.delete(existing)).await {
            warn!("[{}] {}", session.host(), e);
        }
    }

    session.execute(create).await?;
    info!("[{}] {} {} configured", session.host(), singleton.kind(), desired);
    Ok(())
}
