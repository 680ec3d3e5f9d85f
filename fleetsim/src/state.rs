/**
 * ÉTAT PARTAGÉ - Collection de devices de la flotte
 *
 * RÔLE : Conteneur append-only à slots mutables, lu par le scheduler et muté
 * par le controller en parallèle.
 *
 * FONCTIONNEMENT :
 * - Les devices sont ajoutés une seule fois au bootstrap, jamais retirés
 * - Chaque slot est un `Arc<Device>` dont les flags sont atomiques
 * - L'itération se fait sur un snapshot (copy-on-iterate) : pas de verrou
 *   tenu pendant les envois réseau d'un tick
 */

use crate::models::{Device, DeviceView, SensorKind};
use parking_lot::RwLock;
use std::sync::Arc;

#[derive(Debug, Default)]
pub struct Fleet {
    devices: RwLock<Vec<Arc<Device>>>,
}

pub type SharedFleet = Arc<Fleet>;

impl Fleet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates `count` devices with ids `1..=count`, all sharing `sensor_kinds`.
    pub fn populate(&self, count: usize, sensor_kinds: Arc<[SensorKind]>) {
        let mut devices = self.devices.write();
        let start = devices.len() as u64;
        devices.extend(
            (1..=count as u64).map(|i| Arc::new(Device::new(start + i, sensor_kinds.clone()))),
        );
    }

    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Devices in creation order. The vector is a copy; slots are shared.
    pub fn snapshot(&self) -> Vec<Arc<Device>> {
        self.devices.read().clone()
    }

    pub fn get(&self, id: u64) -> Option<Arc<Device>> {
        self.devices.read().iter().find(|d| d.id() == id).cloned()
    }

    pub fn views(&self) -> Vec<DeviceView> {
        self.devices.read().iter().map(|d| d.view()).collect()
    }
}
