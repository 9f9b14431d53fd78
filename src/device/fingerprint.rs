//! Hardware fingerprints and UID derivation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// UID length in hex characters.
const UID_LEN: usize = 12;

/// Identity of a physical camera, read from sysfs attributes of its USB
/// ancestor.
///
/// When the device exposes a serial number, the serial alone disambiguates
/// and the UID survives port changes. Without a serial the bus path joins
/// the hash, so two identical cameras on different ports still get distinct
/// UIDs (at the cost of the UID changing if such a camera moves ports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub vendor_id: String,
    pub product_id: String,
    pub serial: Option<String>,
    pub bus_path: String,
}

impl Fingerprint {
    pub fn new(
        vendor_id: impl Into<String>,
        product_id: impl Into<String>,
        serial: Option<String>,
        bus_path: impl Into<String>,
    ) -> Self {
        Self {
            vendor_id: vendor_id.into(),
            product_id: product_id.into(),
            serial,
            bus_path: bus_path.into(),
        }
    }

    /// Stable short identifier: hex prefix of SHA-256 over the canonical
    /// encoding. Pure function of the fingerprint.
    pub fn uid(&self) -> String {
        let canonical = match &self.serial {
            Some(serial) => format!("{}:{}:{}", self.vendor_id, self.product_id, serial),
            None => format!("{}:{}::{}", self.vendor_id, self.product_id, self.bus_path),
        };

        let digest = Sha256::digest(canonical.as_bytes());
        let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
        hex[..UID_LEN].to_string()
    }
}

/// Whether a remote path / registration name looks like one of our UIDs.
/// Names that do not match are foreign and must never be touched.
pub fn is_uid_shaped(name: &str) -> bool {
    name.len() == UID_LEN && name.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(serial: Option<&str>, bus: &str) -> Fingerprint {
        Fingerprint::new("046d", "0825", serial.map(String::from), bus)
    }

    #[test]
    fn uid_is_stable() {
        let a = fp(Some("ABC123"), "usb-1-1");
        assert_eq!(a.uid(), a.uid());
        assert_eq!(a.uid().len(), 12);
    }

    #[test]
    fn serial_pins_identity_across_ports() {
        let a = fp(Some("ABC123"), "usb-1-1");
        let b = fp(Some("ABC123"), "usb-1-2");
        assert_eq!(a.uid(), b.uid());
    }

    #[test]
    fn serialless_twins_diverge_by_port() {
        let a = fp(None, "usb-1-1");
        let b = fp(None, "usb-1-2");
        assert_ne!(a.uid(), b.uid());
    }

    #[test]
    fn different_hardware_diverges() {
        let a = fp(Some("ABC123"), "usb-1-1");
        let b = Fingerprint::new("046d", "082d", Some("ABC123".into()), "usb-1-1");
        assert_ne!(a.uid(), b.uid());
    }

    #[test]
    fn uid_shape_check() {
        let uid = fp(Some("ABC123"), "usb-1-1").uid();
        assert!(is_uid_shaped(&uid));
        assert!(!is_uid_shaped("front-door"));
        assert!(!is_uid_shaped("0123456789ab4"));
        assert!(!is_uid_shaped("0123456789AB"));
    }
}
