//! evdev-backed event source
//!
//! Reads `EV_KEY` events from a Linux input device node in non-blocking
//! mode, optionally grabbing the device so keystrokes never reach other
//! clients while the daemon owns it.

use std::io;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use evdev::{Device, InputEventKind};
use tracing::{debug, info};

use crate::events::{KeyEdge, KeyTransition};

use super::{EventSource, SourceError};

/// Event source reading one `/dev/input/event*` node
pub struct EvdevSource {
    path: PathBuf,
    device: Device,
    grabbed: bool,
}

impl EvdevSource {
    /// Open a device node without grabbing it
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let path = path.as_ref().to_path_buf();
        let device = Device::open(&path).map_err(|source| SourceError::Open {
            path: path.display().to_string(),
            source,
        })?;

        set_nonblocking(&device)?;

        debug!(
            path = %path.display(),
            name = device.name().unwrap_or("unknown"),
            "opened input device"
        );

        Ok(Self {
            path,
            device,
            grabbed: false,
        })
    }

    /// Open a device node and grab it for exclusive access
    pub fn open_grabbed(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let mut source = Self::open(path)?;
        source.device.grab().map_err(|err| SourceError::Grab {
            path: source.path.display().to_string(),
            source: err,
        })?;
        source.grabbed = true;

        info!(path = %source.path.display(), "grabbed input device");
        Ok(source)
    }

    /// Kernel-reported device name, falling back to the node path
    pub fn device_name(&self) -> String {
        self.device
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| self.path.display().to_string())
    }

}

impl EventSource for EvdevSource {
    fn poll_events(&mut self) -> Result<Vec<KeyTransition>, SourceError> {
        let events = match self.device.fetch_events() {
            Ok(events) => events,
            // Nothing queued on a non-blocking fd.
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => return Ok(Vec::new()),
            Err(err) if err.raw_os_error() == Some(libc::ENODEV) => {
                return Err(SourceError::Disconnected)
            }
            Err(err) => return Err(SourceError::Read(err)),
        };

        let mut transitions = Vec::new();
        for event in events {
            let key = match event.kind() {
                InputEventKind::Key(key) => key,
                // Sync markers, LED echoes and the like.
                _ => continue,
            };

            let edge = match event.value() {
                0 => KeyEdge::Up,
                1 => KeyEdge::Down,
                _ => KeyEdge::Repeat,
            };

            let timestamp = event
                .timestamp()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);

            transitions.push(KeyTransition::new(format!("{key:?}"), edge, timestamp));
        }

        Ok(transitions)
    }
}

impl Drop for EvdevSource {
    fn drop(&mut self) {
        if self.grabbed {
            if let Err(err) = self.device.ungrab() {
                debug!(path = %self.path.display(), ?err, "ungrab on close failed");
            }
        }
    }
}

/// Put the device fd into non-blocking mode so polls never stall the tick
/// loop.
fn set_nonblocking(device: &Device) -> Result<(), SourceError> {
    let fd = device.as_raw_fd();
    // SAFETY: fcntl on a fd we own, with flags read back from the kernel.
    let res = unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 {
            flags
        } else {
            libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
        }
    };

    if res < 0 {
        return Err(SourceError::Read(io::Error::last_os_error()));
    }
    Ok(())
}
