//! Port resolution.
//!
//! Turns a logical selector (`auto` or a literal path such as `COM3`) into a
//! concrete port name.

use serialport::{SerialPortInfo, SerialPortType};

/// Selector that asks for automatic detection.
pub const AUTO_SELECTOR: &str = "auto";

/// Default USB descriptor filter for auto-detection.
pub const DEFAULT_DEVICE_FILTER: &str = "Flipper";

pub trait PortResolver {
    /// Resolve `selector` to a port name, or `None` when nothing matches.
    fn resolve(&self, selector: &str) -> Option<String>;
}

/// Resolves `auto` by scanning the USB serial ports the OS reports.
#[derive(Debug, Clone)]
pub struct UsbPortResolver {
    pub filter: String,
}

impl Default for UsbPortResolver {
    fn default() -> Self {
        Self {
            filter: DEFAULT_DEVICE_FILTER.to_string(),
        }
    }
}

impl PortResolver for UsbPortResolver {
    fn resolve(&self, selector: &str) -> Option<String> {
        if !selector.eq_ignore_ascii_case(AUTO_SELECTOR) {
            return Some(selector.to_string());
        }

        match serialport::available_ports() {
            Ok(ports) => {
                let found = select_port(&ports, &self.filter);
                match &found {
                    Some(name) => tracing::info!("Found device at {}", name),
                    None => tracing::debug!("No port matches {:?}", self.filter),
                }
                found
            }
            Err(e) => {
                tracing::warn!("Scan failed: {}", e);
                None
            }
        }
    }
}

/// First USB port whose manufacturer or product string contains `filter`
/// (case-insensitive).
pub fn select_port(ports: &[SerialPortInfo], filter: &str) -> Option<String> {
    let needle = filter.to_lowercase();

    ports
        .iter()
        .find(|p| match &p.port_type {
            SerialPortType::UsbPort(usb) => [&usb.manufacturer, &usb.product]
                .into_iter()
                .flatten()
                .any(|s| s.to_lowercase().contains(&needle)),
            _ => false,
        })
        .map(|p| p.port_name.clone())
}
