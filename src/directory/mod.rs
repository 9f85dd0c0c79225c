use std::{
    fs::File,
    io::{self, Read},
    path::PathBuf,
};

use tracing::{error, warn};

use crate::model::Device;

/// Read-only view over the device inventory CSV.
///
/// The table is re-read on every lookup; it is small and edited by hand, so
/// there is nothing to invalidate.
#[derive(Debug, Clone)]
pub struct DeviceDirectory {
    path: PathBuf,
}

impl DeviceDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn lookup(&self, serial: &str) -> Option<Device> {
        let serial = serial.trim();
        if serial.is_empty() {
            return None;
        }

        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "device inventory not found");
                return None;
            }
            Err(err) => {
                warn!(path = %self.path.display(), ?err, "device inventory unreadable");
                return None;
            }
        };

        find_in(file, serial)
    }

    /// `lookup` on the blocking pool, for use from request handlers.
    pub async fn lookup_async(&self, serial: &str) -> Option<Device> {
        let directory = self.clone();
        let serial = serial.to_string();

        match tokio::task::spawn_blocking(move || directory.lookup(&serial)).await {
            Ok(found) => found,
            Err(err) => {
                error!(?err, "inventory lookup task failed");
                None
            }
        }
    }
}

fn find_in(reader: impl Read, serial: &str) -> Option<Device> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);

    for (line, row) in rdr.deserialize::<Device>().enumerate() {
        match row {
            Ok(device) if device.serial.trim() == serial => return Some(device.trimmed()),
            Ok(_) => {}
            Err(err) => warn!(row = line + 1, %err, "skipping malformed inventory row"),
        }
    }

    None
}
