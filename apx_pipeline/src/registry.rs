//! Component driver registry.
//!
//! Drivers are keyed by a stable 128-bit UUID and registered into a
//! process-wide ordered set. Registration and lookup are serialised by a
//! short critical section; construction itself runs outside the lock so
//! a slow module constructor cannot stall other registry users. The
//! registry is dependency-injected into whoever builds graphs; tests
//! register fakes.

use apx_core::{ApxError, Result};
use parking_lot::Mutex;

use crate::component::{Component, ComponentId};
use crate::endpoint::StreamDirection;
use crate::pipeline::PipelineId;

/// A 128-bit driver identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Uuid(pub [u8; 16]);

impl Uuid {
    /// Builds a UUID from its canonical grouping.
    pub const fn from_fields(a: u32, b: u16, c: u16, d: [u8; 8]) -> Self {
        let ab = a.to_be_bytes();
        let bb = b.to_be_bytes();
        let cb = c.to_be_bytes();
        Uuid([
            ab[0], ab[1], ab[2], ab[3], bb[0], bb[1], cb[0], cb[1], d[0], d[1], d[2], d[3], d[4], d[5], d[6], d[7],
        ])
    }
}

impl core::fmt::Display for Uuid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02x}{:02x}{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}-{:02x}{:02x}{:02x}{:02x}{:02x}{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7], b[8], b[9], b[10], b[11], b[12], b[13], b[14], b[15]
        )
    }
}

/// Creation parameters handed to a driver constructor.
#[derive(Debug, Clone, Default)]
pub struct NewComponentSpec {
    pub pipeline: PipelineId,
    /// Endpoint direction, where the driver cares.
    pub direction: Option<StreamDirection>,
    /// Formats the component advertises (endpoint format lists).
    pub formats: Vec<apx_core::SampleFormat>,
    /// Staging capacity for endpoint drivers, bytes.
    pub capacity: usize,
    /// Opaque module initialisation blob.
    pub init_data: Vec<u8>,
}

/// Constructor signature every driver provides.
pub type DriverCtor = fn(ComponentId, &NewComponentSpec) -> Result<Component>;

/// One registered driver.
#[derive(Clone, Copy)]
pub struct ComponentDriver {
    pub uuid: Uuid,
    pub name: &'static str,
    pub create: DriverCtor,
}

/// Process-wide ordered set of drivers.
///
/// Driver lifetime is independent of the components a driver creates;
/// unregistering a driver leaves its instances running.
#[derive(Default)]
pub struct ComponentRegistry {
    drivers: Mutex<Vec<ComponentDriver>>,
}

impl ComponentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a driver; rejects a UUID already present.
    pub fn register(&self, driver: ComponentDriver) -> Result<()> {
        let mut drivers = self.drivers.lock();
        if drivers.iter().any(|d| d.uuid == driver.uuid) {
            return Err(ApxError::Exists);
        }
        log::debug!("registered driver {} ({})", driver.name, driver.uuid);
        drivers.push(driver);
        Ok(())
    }

    /// Removes a driver by UUID.
    pub fn unregister(&self, uuid: Uuid) -> Result<()> {
        let mut drivers = self.drivers.lock();
        let before = drivers.len();
        drivers.retain(|d| d.uuid != uuid);
        if drivers.len() == before {
            return Err(ApxError::NotFound);
        }
        Ok(())
    }

    /// Constructs a component via the driver registered under `uuid`.
    ///
    /// The lock covers only the table lookup.
    pub fn new_component(&self, uuid: Uuid, id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
        let create = {
            let drivers = self.drivers.lock();
            drivers.iter().find(|d| d.uuid == uuid).map(|d| d.create)
        };
        match create {
            Some(create) => create(id, spec),
            None => Err(ApxError::NotFound),
        }
    }

    /// Registered driver count, for diagnostics.
    pub fn len(&self) -> usize {
        self.drivers.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        endpoint::HostEndpoint,
        state::ComponentState,
    };

    const FAKE: Uuid = Uuid::from_fields(0x1111_2222, 0x3333, 0x4444, [1, 2, 3, 4, 5, 6, 7, 8]);

    fn fake_ctor(id: ComponentId, spec: &NewComponentSpec) -> Result<Component> {
        Ok(Component::new_host(
            id,
            spec.pipeline,
            HostEndpoint::new(StreamDirection::Playback, spec.capacity.max(64), spec.formats.clone()),
        ))
    }

    #[test]
    fn test_register_and_construct() {
        let registry = ComponentRegistry::new();
        registry
            .register(ComponentDriver {
                uuid: FAKE,
                name: "fake-host",
                create: fake_ctor,
            })
            .unwrap();

        let comp = registry
            .new_component(FAKE, ComponentId(1), &NewComponentSpec::default())
            .unwrap();
        assert_eq!(comp.state(), ComponentState::Ready);
    }

    #[test]
    fn test_duplicate_uuid_rejected() {
        let registry = ComponentRegistry::new();
        let driver = ComponentDriver {
            uuid: FAKE,
            name: "fake-host",
            create: fake_ctor,
        };
        registry.register(driver).unwrap();
        assert_eq!(registry.register(driver), Err(ApxError::Exists));
    }

    #[test]
    fn test_unknown_uuid_fails() {
        let registry = ComponentRegistry::new();
        let err = registry.new_component(FAKE, ComponentId(1), &NewComponentSpec::default());
        assert!(err.is_err());
    }

    #[test]
    fn test_unregister_leaves_instances_alone() {
        let registry = ComponentRegistry::new();
        registry
            .register(ComponentDriver {
                uuid: FAKE,
                name: "fake-host",
                create: fake_ctor,
            })
            .unwrap();

        let comp = registry
            .new_component(FAKE, ComponentId(1), &NewComponentSpec::default())
            .unwrap();
        registry.unregister(FAKE).unwrap();

        // The driver is gone, the instance is untouched.
        assert!(registry.is_empty());
        assert_eq!(comp.state(), ComponentState::Ready);
        assert_eq!(registry.unregister(FAKE), Err(ApxError::NotFound));
    }

    #[test]
    fn test_uuid_display() {
        assert_eq!(FAKE.to_string(), "11112222-3333-4444-0102-030405060708");
    }
}
