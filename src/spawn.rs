use serde::Serialize;
use std::collections::BTreeMap;

use rapier2d::prelude::Real;

use crate::error::{RaceError, RaceResult};

// ---------------------------------------------
// GRID LAYOUT
// ---------------------------------------------
/// Starting grid: two columns, rows stacked behind pole position, every car
/// facing +x. The right column sits half a row back. After `rows_per_block`
/// rows the grid continues in a fresh pair of columns further along +y.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridLayout {
    pub pole: [Real; 2],
    pub row_spacing: Real,
    pub column_spacing: Real,
    pub heading: Real,
    pub rows_per_block: usize,
}

impl Default for GridLayout {
    fn default() -> Self {
        Self {
            pole: [600.0, 400.0],
            row_spacing: 70.0,
            column_spacing: 45.0,
            heading: 0.0,
            rows_per_block: 8,
        }
    }
}

impl GridLayout {
    pub fn slot_position(&self, slot: usize) -> [Real; 2] {
        let per_block = 2 * self.rows_per_block.max(1);
        let block = (slot / per_block) as Real;
        let within = slot % per_block;

        let row = (within / 2) as Real;
        let column = (within % 2) as Real;
        [
            self.pole[0] - row * self.row_spacing - column * self.row_spacing * 0.5,
            self.pole[1] + (column + 2.0 * block) * self.column_spacing,
        ]
    }
}

// ---------------------------------------------
// SPAWN RESULT RETURNED TO STATE + NET
// ---------------------------------------------
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SpawnInfo {
    pub car_id: String,
    pub slot: usize,
    pub position: [f32; 2],
    pub angle: f32,
}

/// Minimum distance between a slot centre and the arena edge; clears a
/// 40 x 20 car in any heading.
pub const SPAWN_MARGIN: Real = 30.0;

// ---------------------------------------------
// SPAWN MANAGER
// ---------------------------------------------
#[derive(Debug, Default)]
pub struct SpawnManager {
    pub layout: GridLayout,

    /// Arena size; slots outside it (minus SPAWN_MARGIN) are never handed out.
    bounds: Option<[Real; 2]>,

    /// slot -> car id
    taken: BTreeMap<usize, String>,
}

impl SpawnManager {
    pub fn new(layout: GridLayout) -> Self {
        Self { layout, bounds: None, taken: BTreeMap::new() }
    }

    pub fn set_bounds(&mut self, arena_size: [Real; 2]) {
        self.bounds = Some(arena_size);
    }

    fn fits(&self, slot: usize) -> bool {
        let Some([w, h]) = self.bounds else { return true };
        let [x, y] = self.layout.slot_position(slot);
        (SPAWN_MARGIN..=w - SPAWN_MARGIN).contains(&x) && (SPAWN_MARGIN..=h - SPAWN_MARGIN).contains(&y)
    }

    // ---------------------------------------------------------
    // Lowest free slot that fits the arena. A block whose
    // first slot is already off the arena ends the grid.
    // ---------------------------------------------------------
    fn first_free_slot(&self) -> Option<usize> {
        let per_block = 2 * self.layout.rows_per_block.max(1);
        (0..)
            .take_while(|slot| slot % per_block != 0 || self.fits(*slot))
            .find(|slot| self.fits(*slot) && !self.taken.contains_key(slot))
    }

    // ---------------------------------------------------------
    // Full allocation pipeline called from state.rs
    // ---------------------------------------------------------
    pub fn allocate_spawn(&mut self, car_id: impl Into<String>) -> RaceResult<SpawnInfo> {
        let car_id = car_id.into();

        if let Some(slot) = self.slot_of(&car_id) {
            return Ok(self.info(car_id, slot));
        }

        let Some(slot) = self.first_free_slot() else {
            tracing::warn!(car_id = %car_id, occupied = self.taken.len(), "starting grid is full");
            return Err(RaceError::GridFull(car_id));
        };
        self.taken.insert(slot, car_id.clone());
        Ok(self.info(car_id, slot))
    }

    /// Where `car_id` respawns, if it holds a slot.
    pub fn spawn_for(&self, car_id: &str) -> Option<SpawnInfo> {
        self.slot_of(car_id).map(|slot| self.info(car_id.to_string(), slot))
    }

    pub fn release(&mut self, car_id: &str) -> Option<usize> {
        let slot = self.slot_of(car_id)?;
        self.taken.remove(&slot);
        Some(slot)
    }

    pub fn occupied(&self) -> usize {
        self.taken.len()
    }

    fn slot_of(&self, car_id: &str) -> Option<usize> {
        self.taken.iter().find(|(_, id)| id.as_str() == car_id).map(|(slot, _)| *slot)
    }

    fn info(&self, car_id: String, slot: usize) -> SpawnInfo {
        SpawnInfo {
            car_id,
            slot,
            position: self.layout.slot_position(slot),
            angle: self.layout.heading,
        }
    }
}
