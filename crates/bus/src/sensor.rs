//! Sensor records stored in the key/value bucket
//!
//! Layout: `<prefix>.<sensor>.<field>` with one key per field.

use std::fmt;
use std::str::FromStr;

use contracts::KvError;
use serde::{Deserialize, Serialize};

use crate::kv::InMemoryKv;

/// Fields a sensor record accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SensorField {
    Id,
    Name,
    Type,
    Value,
}

impl SensorField {
    pub const ALL: [SensorField; 4] = [Self::Id, Self::Name, Self::Type, Self::Value];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Id => "id",
            Self::Name => "name",
            Self::Type => "type",
            Self::Value => "value",
        }
    }
}

impl FromStr for SensorField {
    type Err = KvError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "id" => Ok(Self::Id),
            "name" => Ok(Self::Name),
            "type" => Ok(Self::Type),
            "value" => Ok(Self::Value),
            other => Err(KvError::UnknownField {
                field: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for SensorField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorRecord {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub sensor_type: String,
    pub value: String,
}

impl SensorRecord {
    /// Set one field by name
    ///
    /// # Errors
    /// `UnknownField` for anything outside `id`, `name`, `type`, `value`
    pub fn apply(&mut self, field: &str, value: impl Into<String>) -> Result<(), KvError> {
        let slot = match field.parse::<SensorField>()? {
            SensorField::Id => &mut self.id,
            SensorField::Name => &mut self.name,
            SensorField::Type => &mut self.sensor_type,
            SensorField::Value => &mut self.value,
        };
        *slot = value.into();
        Ok(())
    }

    pub fn field(&self, field: SensorField) -> &str {
        match field {
            SensorField::Id => &self.id,
            SensorField::Name => &self.name,
            SensorField::Type => &self.sensor_type,
            SensorField::Value => &self.value,
        }
    }

    /// Assemble the record stored under `<prefix>.<sensor>.*`
    ///
    /// # Errors
    /// `UnknownField` when a stored key names a field outside the allowed set
    pub fn load(kv: &InMemoryKv, prefix: &str, sensor: &str) -> Result<Self, KvError> {
        let base = format!("{prefix}.{sensor}");
        let mut record = Self::default();
        for key in kv.keys(&format!("{base}.*"))? {
            let field = key.rsplit('.').next().unwrap_or_default();
            let value = kv.get(&key)?.unwrap_or_default();
            record.apply(field, String::from_utf8_lossy(&value))?;
        }
        Ok(record)
    }

    /// Write every field under `<prefix>.<sensor>.*`
    pub fn store(&self, kv: &InMemoryKv, prefix: &str, sensor: &str) -> Result<(), KvError> {
        for field in SensorField::ALL {
            kv.put(
                &format!("{prefix}.{sensor}.{field}"),
                self.field(field).to_string(),
            )?;
        }
        Ok(())
    }
}
