//! Cell-list particle registry.
//!
//! The local subdomain is cut into `ncell` cells per axis and surrounded by
//! one layer of halo cells. Cell coordinates run `0..=ncell + 1` on each
//! axis with the interior at `1..=ncell`. Each cell keeps a list of slots
//! into a single particle store: owned particles first, halo copies after.
//!
//! Cells are addressed on a box-wide integer lattice, so every process
//! agrees on which cell, and therefore which process, owns a position.

use crate::domain::DipoleParticle;
use crate::geometry::{PeriodicBox, Vec3, X, Y, Z, add_assign};
use std::collections::BTreeMap;

pub type CellCoord = [usize; 3];

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("cell count must be >= 1 on every axis, got {ncell:?}")]
    ZeroCells { ncell: [usize; 3] },
    #[error("subdomain axis {axis} is invalid: origin={origin}, extent={extent}")]
    InvalidSubdomain { axis: usize, origin: f64, extent: f64 },
    #[error(
        "subdomain axis {axis} does not tile the box: origin={origin}, cell width={width}, side={side}"
    )]
    MisalignedSubdomain {
        axis: usize,
        origin: f64,
        width: f64,
        side: f64,
    },
    #[error("rank {rank} is out of range for a decomposition of size {size}")]
    InvalidRank { rank: usize, size: usize },
    #[error("particle {index} at {position:?} lies outside the local subdomain")]
    OutsideSubdomain { index: usize, position: Vec3 },
    #[error("halo particle {index} at {position:?} does not lie in the halo layer")]
    NotInHalo { index: usize, position: Vec3 },
    #[error("particle {index} from another process lies inside the local subdomain")]
    ForeignParticleInInterior { index: usize },
    #[error("particle index {index} is already registered")]
    DuplicateIndex { index: usize },
    #[error("owned particles cannot be added while halo copies are present")]
    HaloAlreadyBuilt,
    #[error(
        "cell width {width} on axis {axis} exceeds a third of the box side {side}; periodic halo would double count pairs"
    )]
    HaloTooCoarse { axis: usize, width: f64, side: f64 },
}

/// Axis-aligned region of the box owned by this process.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Subdomain {
    pub origin: Vec3,
    pub extent: Vec3,
}

impl Subdomain {
    pub fn whole(geometry: &PeriodicBox) -> Self {
        Self {
            origin: [0.0; 3],
            extent: [geometry.side(); 3],
        }
    }

    /// Slab decomposition along `axis`: rank `rank` of `size` owns
    /// `[rank L / size, (rank + 1) L / size)` on that axis.
    pub fn slab(
        geometry: &PeriodicBox,
        axis: usize,
        rank: usize,
        size: usize,
    ) -> Result<Self, RegistryError> {
        if size == 0 || rank >= size {
            return Err(RegistryError::InvalidRank { rank, size });
        }
        let side = geometry.side();
        let mut subdomain = Self::whole(geometry);
        subdomain.origin[axis] = side * rank as f64 / size as f64;
        subdomain.extent[axis] = side / size as f64;
        Ok(subdomain)
    }
}

#[derive(Debug, Clone)]
pub struct CellGrid {
    ncell: [usize; 3],
    width: Vec3,
    /// Box-wide lattice index of the first interior cell.
    first: [i64; 3],
    /// Lattice cells per box side.
    period: [i64; 3],
    slots: Vec<Vec<usize>>,
}

/// Offset of `value` from the nearest integer, when it is within rounding.
fn lattice_index(value: f64) -> Option<i64> {
    let nearest = value.round();
    ((value - nearest).abs() <= 1.0e-9 * nearest.abs().max(1.0)).then_some(nearest as i64)
}

impl CellGrid {
    fn new(subdomain: Subdomain, ncell: [usize; 3], side: f64) -> Result<Self, RegistryError> {
        if ncell.iter().any(|count| *count == 0) {
            return Err(RegistryError::ZeroCells { ncell });
        }
        for axis in [X, Y, Z] {
            let (origin, extent) = (subdomain.origin[axis], subdomain.extent[axis]);
            if !origin.is_finite() || !extent.is_finite() || extent <= 0.0 {
                return Err(RegistryError::InvalidSubdomain {
                    axis,
                    origin,
                    extent,
                });
            }
        }

        let width = [X, Y, Z].map(|axis| subdomain.extent[axis] / ncell[axis] as f64);
        let mut first = [0i64; 3];
        let mut period = [0i64; 3];
        for axis in [X, Y, Z] {
            let origin = subdomain.origin[axis];
            let misaligned = RegistryError::MisalignedSubdomain {
                axis,
                origin,
                width: width[axis],
                side,
            };
            first[axis] = lattice_index(origin / width[axis]).ok_or(misaligned.clone())?;
            period[axis] = lattice_index(side / width[axis])
                .filter(|cells| *cells >= first[axis] + ncell[axis] as i64)
                .ok_or(misaligned)?;
        }

        let total = ncell.iter().map(|count| count + 2).product();
        Ok(Self {
            ncell,
            width,
            first,
            period,
            slots: vec![Vec::new(); total],
        })
    }

    pub fn ncell(&self) -> [usize; 3] {
        self.ncell
    }

    pub fn cell_width(&self) -> Vec3 {
        self.width
    }

    /// Cell containing `position`, including the halo layer; `None` beyond it.
    pub fn locate(&self, position: Vec3) -> Option<CellCoord> {
        let mut lattice = [0i64; 3];
        for axis in [X, Y, Z] {
            let index = (position[axis] / self.width[axis]).floor();
            if !index.is_finite() {
                return None;
            }
            lattice[axis] = index as i64;
        }
        self.local_cell(lattice)
    }

    /// Lattice cell of a position already wrapped into the box. Rounding at
    /// the upper edge is clamped so the result is always a cell of the box.
    fn home_cell(&self, wrapped: Vec3) -> Option<[i64; 3]> {
        let mut lattice = [0i64; 3];
        for axis in [X, Y, Z] {
            let index = (wrapped[axis] / self.width[axis]).floor();
            if !index.is_finite() {
                return None;
            }
            lattice[axis] = (index as i64).clamp(0, self.period[axis] - 1);
        }
        Some(lattice)
    }

    fn local_cell(&self, lattice: [i64; 3]) -> Option<CellCoord> {
        let mut cell = [0usize; 3];
        for axis in [X, Y, Z] {
            let local = lattice[axis] - self.first[axis] + 1;
            if local < 0 || local > self.ncell[axis] as i64 + 1 {
                return None;
            }
            cell[axis] = local as usize;
        }
        Some(cell)
    }

    pub fn is_interior(&self, cell: CellCoord) -> bool {
        (0..3).all(|axis| cell[axis] >= 1 && cell[axis] <= self.ncell[axis])
    }

    /// Interior cells, x slowest and z fastest.
    pub fn interior_cells(&self) -> impl Iterator<Item = CellCoord> + '_ {
        let [nx, ny, nz] = self.ncell;
        (1..=nx).flat_map(move |ic| {
            (1..=ny).flat_map(move |jc| (1..=nz).map(move |kc| [ic, jc, kc]))
        })
    }

    /// The 27 cells around an interior cell, itself included.
    pub fn neighbourhood(&self, cell: CellCoord) -> impl Iterator<Item = CellCoord> + use<> {
        debug_assert!(self.is_interior(cell), "neighbourhood of halo cell {cell:?}");
        (0..3usize).flat_map(move |dx| {
            (0..3usize).flat_map(move |dy| {
                (0..3usize).map(move |dz| [cell[X] + dx - 1, cell[Y] + dy - 1, cell[Z] + dz - 1])
            })
        })
    }

    /// Slots of the particles filed in `cell`, in insertion order.
    pub fn particles_in(&self, cell: CellCoord) -> impl Iterator<Item = usize> + '_ {
        self.slots[self.linear(cell)].iter().copied()
    }

    fn linear(&self, cell: CellCoord) -> usize {
        let ny = self.ncell[Y] + 2;
        let nz = self.ncell[Z] + 2;
        (cell[X] * ny + cell[Y]) * nz + cell[Z]
    }

    fn file(&mut self, cell: CellCoord, slot: usize) {
        let linear = self.linear(cell);
        self.slots[linear].push(slot);
    }

    fn drop_slots_from(&mut self, first_removed: usize) {
        for slots in &mut self.slots {
            slots.retain(|slot| *slot < first_removed);
        }
    }
}

/// Owned particles of this process plus read-only halo copies.
#[derive(Debug, Clone)]
pub struct CellList {
    geometry: PeriodicBox,
    grid: CellGrid,
    particles: Vec<DipoleParticle>,
    owned_count: usize,
    slot_by_index: BTreeMap<usize, usize>,
    /// For each halo slot, the owned slot it is a periodic image of.
    image_of: Vec<Option<usize>>,
}

impl CellList {
    pub fn new(
        geometry: PeriodicBox,
        subdomain: Subdomain,
        ncell: [usize; 3],
    ) -> Result<Self, RegistryError> {
        Ok(Self {
            geometry,
            grid: CellGrid::new(subdomain, ncell, geometry.side())?,
            particles: Vec::new(),
            owned_count: 0,
            slot_by_index: BTreeMap::new(),
            image_of: Vec::new(),
        })
    }

    /// Single-process registry covering the whole box.
    pub fn whole_box(geometry: PeriodicBox, ncell: [usize; 3]) -> Result<Self, RegistryError> {
        Self::new(geometry, Subdomain::whole(&geometry), ncell)
    }

    pub fn geometry(&self) -> &PeriodicBox {
        &self.geometry
    }

    pub fn grid(&self) -> &CellGrid {
        &self.grid
    }

    pub fn owned_count(&self) -> usize {
        self.owned_count
    }

    pub fn halo_count(&self) -> usize {
        self.particles.len() - self.owned_count
    }

    pub fn owned(&self) -> impl Iterator<Item = &DipoleParticle> + '_ {
        self.particles[..self.owned_count].iter()
    }

    pub fn halo(&self) -> impl Iterator<Item = &DipoleParticle> + '_ {
        self.particles[self.owned_count..].iter()
    }

    /// Every stored particle by slot, halo copies after the owned ones.
    pub fn particles(&self) -> &[DipoleParticle] {
        &self.particles
    }

    /// Owned particle with the given stable index.
    pub fn particle(&self, index: usize) -> Option<&DipoleParticle> {
        self.slot_by_index
            .get(&index)
            .map(|slot| &self.particles[*slot])
    }

    pub fn particle_mut(&mut self, index: usize) -> Option<&mut DipoleParticle> {
        self.slot_by_index
            .get(&index)
            .map(|slot| &mut self.particles[*slot])
    }

    /// Grid and particle store borrowed together, so traversal can mutate
    /// accumulators.
    pub fn split_mut(&mut self) -> (&CellGrid, &mut [DipoleParticle]) {
        (&self.grid, &mut self.particles)
    }

    /// Whether a particle at `position` belongs to this subdomain. Processes
    /// built from one decomposition never both claim a position.
    pub fn owns(&self, position: Vec3) -> bool {
        self.home_cell(position).is_some()
    }

    fn home_cell(&self, position: Vec3) -> Option<CellCoord> {
        self.grid
            .home_cell(self.geometry.wrap(position))
            .and_then(|lattice| self.grid.local_cell(lattice))
            .filter(|cell| self.grid.is_interior(*cell))
    }

    /// Register an owned particle. Its position is wrapped into the box.
    pub fn insert(&mut self, mut particle: DipoleParticle) -> Result<usize, RegistryError> {
        if self.halo_count() > 0 {
            return Err(RegistryError::HaloAlreadyBuilt);
        }
        if self.slot_by_index.contains_key(&particle.index) {
            return Err(RegistryError::DuplicateIndex {
                index: particle.index,
            });
        }

        let cell = self
            .home_cell(particle.position)
            .ok_or(RegistryError::OutsideSubdomain {
                index: particle.index,
                position: particle.position,
            })?;
        particle.position = self.geometry.wrap(particle.position);

        let slot = self.particles.len();
        self.particles.push(particle);
        self.grid.file(cell, slot);
        self.slot_by_index.insert(particle.index, slot);
        self.owned_count += 1;
        Ok(slot)
    }

    /// Register a copy of a particle owned elsewhere. The position must fall
    /// in the halo layer as given; it is not wrapped.
    pub fn insert_halo(&mut self, particle: DipoleParticle) -> Result<usize, RegistryError> {
        let cell = self
            .grid
            .locate(particle.position)
            .filter(|cell| !self.grid.is_interior(*cell))
            .ok_or(RegistryError::NotInHalo {
                index: particle.index,
                position: particle.position,
            })?;
        Ok(self.insert_halo_image(particle, cell, None))
    }

    /// Import halo copies from `candidates`, trying every periodic image of
    /// each. Copies of locally owned particles are linked to their owner so
    /// [`CellList::fold_halo_contributions`] can return their forces.
    pub fn import_halo<'a>(
        &mut self,
        candidates: impl IntoIterator<Item = &'a DipoleParticle>,
    ) -> Result<usize, RegistryError> {
        self.check_halo_resolution()?;

        let side = self.geometry.side();
        let mut imported = 0;
        for candidate in candidates {
            let owner = self.slot_by_index.get(&candidate.index).copied();
            let base = self.geometry.wrap(candidate.position);
            let Some(home) = self.grid.home_cell(base) else {
                continue;
            };

            for shift in periodic_shifts() {
                let lattice =
                    [X, Y, Z].map(|axis| home[axis] + shift[axis] * self.grid.period[axis]);
                let Some(cell) = self.grid.local_cell(lattice) else {
                    continue;
                };
                if self.grid.is_interior(cell) {
                    if owner.is_none() {
                        return Err(RegistryError::ForeignParticleInInterior {
                            index: candidate.index,
                        });
                    }
                    continue;
                }

                let mut copy = *candidate;
                copy.position = [X, Y, Z].map(|axis| base[axis] + shift[axis] as f64 * side);
                copy.zero_accumulators();
                self.insert_halo_image(copy, cell, owner);
                imported += 1;
            }
        }
        Ok(imported)
    }

    /// Rebuild the halo from periodic images of the owned particles. This is
    /// the whole halo for a single process owning the full box.
    pub fn fill_periodic_halo(&mut self) -> Result<usize, RegistryError> {
        self.clear_halo();
        let owned: Vec<DipoleParticle> = self.owned().copied().collect();
        self.import_halo(owned.iter())
    }

    /// Add force and torque gathered on periodic images back onto their
    /// owners, then zero the images.
    pub fn fold_halo_contributions(&mut self) {
        let (owned, halo) = self.particles.split_at_mut(self.owned_count);
        for (copy, owner) in halo.iter_mut().zip(&self.image_of) {
            if let Some(slot) = owner {
                add_assign(&mut owned[*slot].force, copy.force);
                add_assign(&mut owned[*slot].torque, copy.torque);
                copy.zero_accumulators();
            }
        }
    }

    pub fn clear_halo(&mut self) {
        self.grid.drop_slots_from(self.owned_count);
        self.particles.truncate(self.owned_count);
        self.image_of.clear();
    }

    pub fn zero_accumulators(&mut self) {
        self.particles
            .iter_mut()
            .for_each(DipoleParticle::zero_accumulators);
    }

    fn insert_halo_image(
        &mut self,
        particle: DipoleParticle,
        cell: CellCoord,
        owner: Option<usize>,
    ) -> usize {
        let slot = self.particles.len();
        self.particles.push(particle);
        self.grid.file(cell, slot);
        self.image_of.push(owner);
        slot
    }

    fn check_halo_resolution(&self) -> Result<(), RegistryError> {
        let side = self.geometry.side();
        for axis in [X, Y, Z] {
            let width = self.grid.width[axis];
            if 3.0 * width > side * (1.0 + 1.0e-12) {
                return Err(RegistryError::HaloTooCoarse { axis, width, side });
            }
        }
        Ok(())
    }
}

fn periodic_shifts() -> impl Iterator<Item = [i64; 3]> {
    (-1..=1).flat_map(|sx| (-1..=1).flat_map(move |sy| (-1..=1).map(move |sz| [sx, sy, sz])))
}

#[cfg(test)]
mod tests {
    use super::{CellList, RegistryError, Subdomain};
    use crate::domain::DipoleParticle;
    use crate::geometry::PeriodicBox;

    fn unit_z() -> [f64; 3] {
        [0.0, 0.0, 1.0]
    }

    fn box_of(side: f64) -> PeriodicBox {
        PeriodicBox::cubic(side).expect("valid box")
    }

    #[test]
    fn locates_interior_and_halo_cells() {
        let cells = CellList::whole_box(box_of(9.0), [3, 3, 3]).expect("valid grid");
        let grid = cells.grid();
        assert_eq!(grid.locate([0.0, 4.5, 8.9]), Some([1, 2, 3]));
        assert_eq!(grid.locate([-0.5, 4.5, 9.5]), Some([0, 2, 4]));
        assert_eq!(grid.locate([-3.5, 4.5, 4.5]), None);
        assert!(grid.is_interior([1, 2, 3]));
        assert!(!grid.is_interior([0, 2, 3]));
    }

    #[test]
    fn interior_cells_and_neighbourhood_sizes() {
        let cells = CellList::whole_box(box_of(12.0), [2, 3, 4]).expect("valid grid");
        let grid = cells.grid();
        assert_eq!(grid.interior_cells().count(), 24);
        assert_eq!(grid.interior_cells().next(), Some([1, 1, 1]));

        let neighbours: Vec<_> = grid.neighbourhood([1, 1, 1]).collect();
        assert_eq!(neighbours.len(), 27);
        assert_eq!(neighbours[0], [0, 0, 0]);
        assert_eq!(neighbours[26], [2, 2, 2]);
    }

    #[test]
    fn insert_wraps_position_and_rejects_duplicates() {
        let mut cells = CellList::whole_box(box_of(10.0), [3, 3, 3]).expect("valid grid");
        cells
            .insert(DipoleParticle::new(4, [-1.0, 11.0, 5.0], unit_z()))
            .expect("insert should succeed");
        let stored = cells.particle(4).expect("particle should be registered");
        assert!((stored.position[0] - 9.0).abs() < 1.0e-12);
        assert!((stored.position[1] - 1.0).abs() < 1.0e-12);

        let duplicate = cells.insert(DipoleParticle::new(4, [1.0, 1.0, 1.0], unit_z()));
        assert_eq!(duplicate, Err(RegistryError::DuplicateIndex { index: 4 }));
    }

    #[test]
    fn slab_insert_rejects_particles_owned_elsewhere() {
        let geometry = box_of(10.0);
        let slab = Subdomain::slab(&geometry, 0, 1, 2).expect("valid slab");
        let mut cells = CellList::new(geometry, slab, [1, 3, 3]).expect("valid grid");
        assert!(cells.insert(DipoleParticle::new(0, [7.0, 1.0, 1.0], unit_z())).is_ok());
        assert!(matches!(
            cells.insert(DipoleParticle::new(1, [2.0, 1.0, 1.0], unit_z())),
            Err(RegistryError::OutsideSubdomain { index: 1, .. })
        ));
    }

    #[test]
    fn periodic_halo_creates_images_of_boundary_particles() {
        let mut cells = CellList::whole_box(box_of(9.0), [3, 3, 3]).expect("valid grid");
        // corner cell: 7 images; centre cell: none
        cells
            .insert(DipoleParticle::new(0, [1.0, 1.0, 1.0], unit_z()))
            .expect("insert");
        cells
            .insert(DipoleParticle::new(1, [4.5, 4.5, 4.5], unit_z()))
            .expect("insert");

        let imported = cells.fill_periodic_halo().expect("halo should build");
        assert_eq!(imported, 7);
        assert_eq!(cells.halo_count(), 7);
        assert!(cells.halo().all(|copy| copy.index == 0));

        // rebuilding replaces rather than appends
        assert_eq!(cells.fill_periodic_halo().expect("halo should rebuild"), 7);
        assert_eq!(cells.halo_count(), 7);
    }

    #[test]
    fn periodic_halo_requires_three_cells_per_period() {
        let mut cells = CellList::whole_box(box_of(9.0), [2, 3, 3]).expect("valid grid");
        cells
            .insert(DipoleParticle::new(0, [1.0, 1.0, 1.0], unit_z()))
            .expect("insert");
        assert!(matches!(
            cells.fill_periodic_halo(),
            Err(RegistryError::HaloTooCoarse { axis: 0, .. })
        ));
    }

    #[test]
    fn insert_after_halo_is_rejected_until_cleared() {
        let mut cells = CellList::whole_box(box_of(9.0), [3, 3, 3]).expect("valid grid");
        cells
            .insert(DipoleParticle::new(0, [0.5, 4.5, 4.5], unit_z()))
            .expect("insert");
        cells.fill_periodic_halo().expect("halo");
        assert_eq!(
            cells.insert(DipoleParticle::new(1, [4.5, 4.5, 4.5], unit_z())),
            Err(RegistryError::HaloAlreadyBuilt)
        );
        cells.clear_halo();
        assert_eq!(cells.halo_count(), 0);
        assert!(cells.insert(DipoleParticle::new(1, [4.5, 4.5, 4.5], unit_z())).is_ok());
    }

    #[test]
    fn fold_returns_image_forces_to_owner() {
        let mut cells = CellList::whole_box(box_of(9.0), [3, 3, 3]).expect("valid grid");
        cells
            .insert(DipoleParticle::new(3, [0.5, 4.5, 4.5], unit_z()))
            .expect("insert");
        cells.fill_periodic_halo().expect("halo");
        assert_eq!(cells.halo_count(), 1);

        {
            let (_, particles) = cells.split_mut();
            let image = particles.last_mut().expect("image present");
            image.force = [1.0, 2.0, 3.0];
            image.torque = [0.5, 0.0, -0.5];
        }
        cells.fold_halo_contributions();

        let owner = cells.particle(3).expect("owner");
        assert_eq!(owner.force, [1.0, 2.0, 3.0]);
        assert_eq!(owner.torque, [0.5, 0.0, -0.5]);
        assert!(cells.halo().all(|copy| copy.force == [0.0; 3]));
    }

    #[test]
    fn explicit_halo_copy_must_sit_in_halo_layer() {
        let mut cells = CellList::whole_box(box_of(9.0), [3, 3, 3]).expect("valid grid");
        assert!(
            cells
                .insert_halo(DipoleParticle::new(9, [-1.0, 4.5, 4.5], unit_z()))
                .is_ok()
        );
        assert!(matches!(
            cells.insert_halo(DipoleParticle::new(10, [4.5, 4.5, 4.5], unit_z())),
            Err(RegistryError::NotInHalo { index: 10, .. })
        ));
        assert_eq!(cells.owned_count(), 0);
        assert_eq!(cells.halo_count(), 1);
    }

    #[test]
    fn slab_ranks_partition_boundary_aligned_lattices() {
        for side in [10.0, 7.0, 0.3, 2.1, 9.9, 13.7] {
            let geometry = box_of(side);
            for per_edge in 1..=9usize {
                let spacing = side / per_edge as f64;
                let lattice: Vec<_> = (0..per_edge.pow(3))
                    .map(|site| {
                        let cell = [
                            site / (per_edge * per_edge),
                            (site / per_edge) % per_edge,
                            site % per_edge,
                        ];
                        let position = cell.map(|c| (c as f64 + 0.5) * spacing);
                        DipoleParticle::new(site, position, unit_z())
                    })
                    .collect();

                for size in 1..=6 {
                    let mut claimed = vec![0usize; lattice.len()];
                    for rank in 0..size {
                        let slab = Subdomain::slab(&geometry, 0, rank, size).expect("valid slab");
                        let mut cells =
                            CellList::new(geometry, slab, [3, 3, 3]).expect("valid grid");
                        for particle in &lattice {
                            if cells.owns(particle.position) {
                                claimed[particle.index] += 1;
                                cells.insert(*particle).expect("owned particle inserts");
                            }
                        }
                        assert!(
                            cells.import_halo(lattice.iter()).is_ok(),
                            "halo import failed: side={side} n={per_edge} rank={rank}/{size}"
                        );
                    }
                    assert!(
                        claimed.iter().all(|count| *count == 1),
                        "ownership is not a partition: side={side} n={per_edge} ranks={size}"
                    );
                }
            }
        }
    }

    #[test]
    fn subdomain_off_the_box_cell_lattice_is_rejected() {
        let geometry = box_of(10.0);
        let shifted = Subdomain {
            origin: [1.0, 0.0, 0.0],
            extent: [5.0, 10.0, 10.0],
        };
        assert!(matches!(
            CellList::new(geometry, shifted, [2, 3, 3]),
            Err(RegistryError::MisalignedSubdomain { axis: 0, .. })
        ));
    }
}
