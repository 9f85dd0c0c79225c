use serde::{Deserialize, Serialize};

/// One row of the device inventory table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub serial: String,
    pub model: String,
    pub build: String,
}

impl Device {
    pub fn trimmed(self) -> Self {
        Self {
            serial: self.serial.trim().to_string(),
            model: self.model.trim().to_string(),
            build: self.build.trim().to_string(),
        }
    }
}
