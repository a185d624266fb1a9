//! One-wire DS18B20 temperature sensors.
//!
//! The Linux `w1_therm` driver exposes each sensor as a directory under
//! `/sys/bus/w1/devices` named after its 64-bit ROM id (`28-xxxxxxxxxxxx` for
//! the DS18B20 family). Reading the `w1_slave` file inside triggers a
//! conversion, which takes roughly 750 ms:
//!
//! ```text
//! 72 01 4b 46 7f ff 0e 10 57 : crc=57 YES
//! 72 01 4b 46 7f ff 0e 10 57 t=23125
//! ```
//!
//! The first line ends in `YES` when the CRC check passed; the second carries
//! the temperature in thousandths of a degree Celsius.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};
use crate::producer::BlockingSensor;

/// Where the kernel exposes one-wire devices.
pub const DEFAULT_W1_ROOT: &str = "/sys/bus/w1/devices";

/// Family code prefix of DS18B20 devices.
pub const DS18B20_FAMILY: &str = "28";

/// List the DS18B20 device ids present under `root`, sorted.
pub fn find_onewire_devices(root: impl AsRef<Path>) -> Result<Vec<String>> {
    let root = root.as_ref();
    let mut ids = Vec::new();

    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(DS18B20_FAMILY) {
            ids.push(name);
        }
    }

    ids.sort();
    debug!("Found {} one-wire device(s) under {}", ids.len(), root.display());
    Ok(ids)
}

/// Parse the contents of a `w1_slave` file into degrees Celsius.
pub fn parse_w1_slave(contents: &str) -> Result<f64> {
    let mut lines = contents.lines();

    let crc_line = lines
        .next()
        .ok_or_else(|| Error::InvalidData("empty w1_slave output".to_string()))?;
    if !crc_line.trim_end().ends_with("YES") {
        return Err(Error::InvalidData(format!(
            "CRC check failed: {}",
            crc_line.trim()
        )));
    }

    let data_line = lines
        .next()
        .ok_or_else(|| Error::InvalidData("missing temperature line".to_string()))?;
    let (_, raw) = data_line
        .split_once("t=")
        .ok_or_else(|| Error::InvalidData(format!("no t= field in '{}'", data_line.trim())))?;

    let millidegrees: i64 = raw
        .trim()
        .parse()
        .map_err(|_| Error::InvalidData(format!("invalid temperature '{}'", raw.trim())))?;

    Ok(millidegrees as f64 / 1000.0)
}

/// A DS18B20 sensor read through sysfs.
#[derive(Debug, Clone)]
pub struct Ds18b20 {
    id: String,
    path: PathBuf,
}

impl Ds18b20 {
    /// Sensor `id` under the given one-wire root.
    pub fn new(root: impl AsRef<Path>, id: impl Into<String>) -> Self {
        let id = id.into();
        let path = root.as_ref().join(&id).join("w1_slave");
        Self { id, path }
    }

    /// Every DS18B20 present under `root`.
    pub fn discover(root: impl AsRef<Path>) -> Result<Vec<Self>> {
        let root = root.as_ref();
        Ok(find_onewire_devices(root)?
            .into_iter()
            .map(|id| Self::new(root, id))
            .collect())
    }

    /// Path of the `w1_slave` file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl BlockingSensor for Ds18b20 {
    fn name(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> &str {
        "temperature"
    }

    fn read(&self) -> Result<f64> {
        let contents = std::fs::read_to_string(&self.path)?;
        parse_w1_slave(&contents).map_err(|e| Error::sensor_read(&self.id, e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GOOD: &str = "72 01 4b 46 7f ff 0e 10 57 : crc=57 YES\n\
                        72 01 4b 46 7f ff 0e 10 57 t=23125\n";

    fn write_device(root: &Path, id: &str, contents: &str) {
        let dir = root.join(id);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("w1_slave"), contents).unwrap();
    }

    #[test]
    fn test_parse_good_reading() {
        assert_eq!(parse_w1_slave(GOOD).unwrap(), 23.125);
    }

    #[test]
    fn test_parse_negative_reading() {
        let contents = "ff ff : crc=1a YES\nff ff t=-1250\n";
        assert_eq!(parse_w1_slave(contents).unwrap(), -1.25);
    }

    #[test]
    fn test_parse_crc_failure() {
        let contents = "72 01 4b : crc=57 NO\n72 01 4b t=23125\n";
        let err = parse_w1_slave(contents).unwrap_err();
        assert!(err.to_string().contains("CRC"));
    }

    #[test]
    fn test_parse_malformed() {
        assert!(parse_w1_slave("").is_err());
        assert!(parse_w1_slave("crc=57 YES\n").is_err());
        assert!(parse_w1_slave("crc=57 YES\nno temperature here\n").is_err());
        assert!(parse_w1_slave("crc=57 YES\nt=abc\n").is_err());
    }

    #[test]
    fn test_find_onewire_devices_filters_family() {
        let dir = tempfile::tempdir().unwrap();
        write_device(dir.path(), "28-00000b1c2d3e", GOOD);
        write_device(dir.path(), "28-00000a1b2c3d", GOOD);
        std::fs::create_dir_all(dir.path().join("w1_bus_master1")).unwrap();
        std::fs::create_dir_all(dir.path().join("10-000801234567")).unwrap();

        let ids = find_onewire_devices(dir.path()).unwrap();
        assert_eq!(ids, vec!["28-00000a1b2c3d", "28-00000b1c2d3e"]);
    }

    #[test]
    fn test_find_onewire_devices_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(find_onewire_devices(dir.path().join("absent")).is_err());
    }

    #[test]
    fn test_ds18b20_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        write_device(dir.path(), "28-0001", GOOD);

        let sensors = Ds18b20::discover(dir.path()).unwrap();
        assert_eq!(sensors.len(), 1);
        assert_eq!(sensors[0].name(), "28-0001");
        assert_eq!(sensors[0].kind(), "temperature");
        assert_eq!(sensors[0].read().unwrap(), 23.125);
    }

    #[test]
    fn test_ds18b20_read_error_names_device() {
        let dir = tempfile::tempdir().unwrap();
        write_device(dir.path(), "28-0002", "00 : crc=00 NO\n00 t=0\n");

        let sensor = Ds18b20::new(dir.path(), "28-0002");
        let err = sensor.read().unwrap_err();
        assert!(matches!(err, Error::SensorRead { ref device, .. } if device == "28-0002"));
    }
}
