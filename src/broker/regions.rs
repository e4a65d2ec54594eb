//! Region table
//!
//! Rectangles claimed by broker clients, in the screen-relative frame of
//! the screen they were registered on. Regions are kept in registration
//! order and looked up newest first, so the most recent claim wins where
//! rectangles overlap.

use log::debug;
use thiserror::Error;

use crate::utils::Handle;

pub type ClientId = Handle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    /// Half-open containment: right and bottom edges are outside.
    /// Edges are computed in i64 since clients may send any i32 extent.
    pub fn contains(&self, x: i32, y: i32) -> bool {
        let (x, y) = (x as i64, y as i64);
        let (left, top) = (self.x as i64, self.y as i64);
        x >= left && x < left + self.width as i64 && y >= top && y < top + self.height as i64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub id: i32,
    pub screen_index: u32,
    pub rect: Rect,
    pub owner: ClientId,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegionError {
    #[error("region {id} already owned by client {owner}")]
    Conflict { id: i32, owner: ClientId },
    #[error("region {0} is owned by another client")]
    NotOwner(i32),
    #[error("no region {0}")]
    Unknown(i32),
    #[error("invalid geometry for region {id} (screen {screen_index}, {width}x{height})")]
    InvalidGeometry {
        id: i32,
        screen_index: i32,
        width: i32,
        height: i32,
    },
}

#[derive(Debug, Default)]
pub struct RegionTable {
    /// Oldest first
    regions: Vec<Region>,
}

impl RegionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a region, or replace one the same client already owns.
    /// A replaced region counts as newly registered for overlap purposes.
    pub fn register(
        &mut self,
        id: i32,
        screen_index: i32,
        rect: Rect,
        owner: ClientId,
    ) -> Result<(), RegionError> {
        if screen_index < 0 || rect.width <= 0 || rect.height <= 0 {
            return Err(RegionError::InvalidGeometry {
                id,
                screen_index,
                width: rect.width,
                height: rect.height,
            });
        }
        if let Some(pos) = self.position(id) {
            let existing = self.regions[pos];
            if existing.owner != owner {
                return Err(RegionError::Conflict {
                    id,
                    owner: existing.owner,
                });
            }
            self.regions.remove(pos);
        }
        self.regions.push(Region {
            id,
            screen_index: screen_index as u32,
            rect,
            owner,
        });
        debug!(
            "Region {} registered by client {}: screen {} {:?}",
            id, owner, screen_index, rect
        );
        Ok(())
    }

    /// Remove a region on behalf of its owner
    pub fn unregister(&mut self, id: i32, owner: ClientId) -> Result<Region, RegionError> {
        let pos = self.position(id).ok_or(RegionError::Unknown(id))?;
        if self.regions[pos].owner != owner {
            return Err(RegionError::NotOwner(id));
        }
        debug!("Region {} unregistered by client {}", id, owner);
        Ok(self.regions.remove(pos))
    }

    /// Drop every region a client owns; returns how many were removed
    pub fn remove_client(&mut self, owner: ClientId) -> usize {
        let before = self.regions.len();
        self.regions.retain(|r| r.owner != owner);
        before - self.regions.len()
    }

    /// Newest region on `screen_index` containing the screen-relative point
    pub fn lookup(&self, screen_index: u32, x: i32, y: i32) -> Option<&Region> {
        self.regions
            .iter()
            .rev()
            .find(|r| r.screen_index == screen_index && r.rect.contains(x, y))
    }

    pub fn get(&self, id: i32) -> Option<&Region> {
        self.regions.iter().find(|r| r.id == id)
    }

    /// Region `id` still exists and belongs to `owner`
    pub fn is_owned_by(&self, id: i32, owner: ClientId) -> bool {
        self.get(id).map_or(false, |r| r.owner == owner)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    fn position(&self, id: i32) -> Option<usize> {
        self.regions.iter().position(|r| r.id == id)
    }
}
