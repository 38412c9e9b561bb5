//! Machine registry - an arena of machines addressed by generational keys
//!
//! Registries are plain values passed by reference. Any number of them can
//! live in one process; a key from one registry means nothing to another.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use loom_core::{CompositeId, LoomError, LoomResult};

use crate::Machine;

/// Key into a [`MachineRegistry`]
///
/// A key whose slot was reused by a later insert no longer resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MachineKey {
    index: u32,
    generation: u32,
}

impl MachineKey {
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for MachineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MachineKey({}v{})", self.index, self.generation)
    }
}

struct Slot {
    generation: u32,
    machine: Option<Machine>,
}

/// Arena of machines
#[derive(Default)]
pub struct MachineRegistry {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_name: HashMap<String, MachineKey>,
}

impl MachineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a machine. Names are unique within a registry.
    pub fn insert(&mut self, machine: Machine) -> LoomResult<MachineKey> {
        if self.by_name.contains_key(machine.name()) {
            return Err(LoomError::invalid_operation(
                "machine registry",
                "insert",
                format!("machine `{}` already registered", machine.name()),
            ));
        }

        let name = machine.name().to_string();
        let key = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.machine = Some(machine);
                MachineKey {
                    index,
                    generation: slot.generation,
                }
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    machine: Some(machine),
                });
                MachineKey {
                    index,
                    generation: 0,
                }
            }
        };

        debug!(key = ?key, machine = %name, "machine registered");
        self.by_name.insert(name, key);
        Ok(key)
    }

    pub fn get(&self, key: MachineKey) -> Option<&Machine> {
        self.slots
            .get(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.machine.as_ref())
    }

    pub fn get_mut(&mut self, key: MachineKey) -> Option<&mut Machine> {
        self.slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.machine.as_mut())
    }

    /// Take a machine out, invalidating its key
    pub fn remove(&mut self, key: MachineKey) -> Option<Machine> {
        let slot = self
            .slots
            .get_mut(key.index as usize)
            .filter(|slot| slot.generation == key.generation)?;
        let machine = slot.machine.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.by_name.remove(machine.name());
        debug!(key = ?key, machine = %machine.name(), "machine removed");
        Some(machine)
    }

    pub fn find_by_name(&self, name: &str) -> Option<MachineKey> {
        self.by_name.get(name).copied()
    }

    /// Machine that owns `composite`
    pub fn locate_composite(&self, composite: CompositeId) -> Option<MachineKey> {
        self.iter()
            .find(|(_, machine)| machine.owns(composite))
            .map(|(key, _)| key)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (MachineKey, &Machine)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.machine.as_ref().map(|machine| {
                (
                    MachineKey {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    machine,
                )
            })
        })
    }

    /// Terminate every machine still held
    pub fn terminate_all(&mut self, reason: &str) {
        let mut count = 0usize;
        for machine in self.slots.iter_mut().filter_map(|slot| slot.machine.as_mut()) {
            machine.terminate(reason);
            count += 1;
        }
        info!(machines = count, reason, "registry terminated");
    }
}

impl fmt::Debug for MachineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MachineRegistry")
            .field("machines", &self.len())
            .field("slots", &self.slots.len())
            .finish()
    }
}
