//! The disk driver: seek-before-transfer, one sector at a time,
//! serialized per unit.
//!
//! Unlike the terminal and clock, a disk's interrupts only ever follow a
//! request this same call issued (there is no asynchronous "data just
//! arrived" event to assemble in the background), so there is no
//! separate driver service loop here — `Machine::wait_device` already
//! translates the low-level interrupt into a typed completion for the
//! calling process.

use std::sync::Mutex;

use crate::config::{BLOCKS_PER_TRACK, DISK_SECTOR_SIZE};
use crate::error::KernelError;
use crate::machine::{DeviceClass, DeviceRequest, DeviceStatus, Machine};

/// Per-unit serialization lock plus the last track sought to, so repeated
/// reads in the same track don't reseek.
pub struct Disk {
    lock: Mutex<Option<u32>>,
}

impl Disk {
    pub fn new() -> Self {
        Disk {
            lock: Mutex::new(None),
        }
    }
}

impl Default for Disk {
    fn default() -> Self {
        Self::new()
    }
}

fn geometry<M: Machine>(machine: &M, unit: usize) -> Result<u32, KernelError> {
    machine
        .device_output(DeviceClass::Disk, unit, DeviceRequest::DiskGeometry)
        .map_err(|_| KernelError::InvalidArgument)?;
    match machine.wait_device(DeviceClass::Disk, unit) {
        DeviceStatus::DiskGeometry { total_tracks } => Ok(total_tracks),
        _ => Err(KernelError::InvalidArgument),
    }
}

fn seek_if_needed<M: Machine>(
    machine: &M,
    unit: usize,
    last_track: &mut Option<u32>,
    track: u32,
) -> Result<(), KernelError> {
    if *last_track == Some(track) {
        return Ok(());
    }
    machine
        .device_output(DeviceClass::Disk, unit, DeviceRequest::DiskSeek(track))
        .map_err(|_| KernelError::InvalidArgument)?;
    match machine.wait_device(DeviceClass::Disk, unit) {
        DeviceStatus::DiskComplete => {
            *last_track = Some(track);
            Ok(())
        }
        _ => Err(KernelError::InvalidArgument),
    }
}

/// Read `num_blocks` consecutive sectors starting at `(track,
/// first_block)`, reseeking whenever a block crosses onto a new track.
pub fn read<M: Machine>(
    machine: &M,
    unit: usize,
    disk: &Disk,
    track: u32,
    first_block: u32,
    num_blocks: u32,
) -> Result<Vec<u8>, KernelError> {
    let mut last_track = disk.lock.lock().unwrap();
    let total_tracks = geometry(machine, unit)?;
    let mut out = Vec::with_capacity(num_blocks as usize * DISK_SECTOR_SIZE);
    for i in 0..num_blocks {
        let abs_block = first_block + i;
        let current_track = track + abs_block / BLOCKS_PER_TRACK as u32;
        if current_track >= total_tracks {
            return Err(KernelError::InvalidArgument);
        }
        seek_if_needed(machine, unit, &mut last_track, current_track)?;
        let block = abs_block % BLOCKS_PER_TRACK as u32;
        machine
            .device_output(DeviceClass::Disk, unit, DeviceRequest::DiskRead { block })
            .map_err(|_| KernelError::InvalidArgument)?;
        match machine.wait_device(DeviceClass::Disk, unit) {
            DeviceStatus::DiskSector(sector) => out.extend_from_slice(&sector[..]),
            _ => return Err(KernelError::InvalidArgument),
        }
    }
    Ok(out)
}

/// The write-side mirror of [`read`], rejecting any track at or past the
/// disk's geometry before touching the device.
pub fn write<M: Machine>(
    machine: &M,
    unit: usize,
    disk: &Disk,
    track: u32,
    first_block: u32,
    data: &[u8],
) -> Result<usize, KernelError> {
    if data.len() % DISK_SECTOR_SIZE != 0 {
        return Err(KernelError::InvalidArgument);
    }
    let num_blocks = (data.len() / DISK_SECTOR_SIZE) as u32;
    let mut last_track = disk.lock.lock().unwrap();
    let total_tracks = geometry(machine, unit)?;
    for i in 0..num_blocks {
        let abs_block = first_block + i;
        let current_track = track + abs_block / BLOCKS_PER_TRACK as u32;
        if current_track >= total_tracks {
            return Err(KernelError::InvalidArgument);
        }
        seek_if_needed(machine, unit, &mut last_track, current_track)?;
        let mut sector = [0u8; DISK_SECTOR_SIZE];
        let start = i as usize * DISK_SECTOR_SIZE;
        sector.copy_from_slice(&data[start..start + DISK_SECTOR_SIZE]);
        let block = abs_block % BLOCKS_PER_TRACK as u32;
        machine
            .device_output(DeviceClass::Disk, unit, DeviceRequest::DiskWrite { block, sector })
            .map_err(|_| KernelError::InvalidArgument)?;
        if machine.wait_device(DeviceClass::Disk, unit) != DeviceStatus::DiskComplete {
            return Err(KernelError::InvalidArgument);
        }
    }
    Ok(data.len())
}

/// Fixed sector size and blocks/track, plus the queried total track
/// count.
pub fn size<M: Machine>(machine: &M, unit: usize) -> Result<(u32, u32, u32), KernelError> {
    let total_tracks = geometry(machine, unit)?;
    Ok((DISK_SECTOR_SIZE as u32, BLOCKS_PER_TRACK as u32, total_tracks))
}
