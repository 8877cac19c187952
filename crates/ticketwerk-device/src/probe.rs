// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// USB printer probing through sysfs.
//
// The kernel's usblp driver registers each printer in the `usbmisc` class
// (`/sys/class/usbmisc/lp0`) and creates the node `/dev/usb/lp0`. The
// class entry's `device` link points at the USB interface; the descriptor
// strings live on its parent, the USB device.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use ticketwerk_core::config::PrinterConfig;
use ticketwerk_core::{Result, TicketwerkError, UsbIdentity};

use crate::raw::EBUSY;
use crate::traits::{DeviceScanner, ProbedDevice};

/// USB interface class code for printers.
pub const USB_CLASS_PRINTER: &str = "07";

/// Thermal printers seen in the field: (vendor, product) → (brand, model).
const KNOWN_MODELS: &[((&str, &str), (&str, &str))] = &[
    (("04b8", "0e03"), ("Epson", "TM-T20")),
    (("04b8", "0e15"), ("Epson", "TM-T88V")),
    (("04b8", "0e28"), ("Epson", "TM-T88VI")),
    (("04b8", "0202"), ("Epson", "TM-T20II")),
    (("04b8", "0e27"), ("Epson", "TM-M30")),
    (("0483", "5720"), ("Xprinter", "XP-58")),
    (("0483", "5740"), ("Xprinter", "XP-80")),
    (("0483", "5743"), ("Xprinter", "XP-N160I")),
    (("0fe6", "811e"), ("Rongta", "RP80")),
    (("1504", "0006"), ("Goojprt", "PT-210")),
    (("0416", "5011"), ("WinPOS", "WP-T810")),
    (("28e9", "0289"), ("Generic", "POS-58")),
];

/// Vendors whose devices are accepted even when they do not advertise the
/// printer interface class (many cheap thermal printers use vendor class
/// 0xff behind a USB-serial bridge).
const KNOWN_VENDORS: &[(&str, &str)] = &[
    ("04b8", "Epson"),
    ("0416", "WinPOS"),
    ("0483", "Xprinter"),
    ("0525", "Netchip"),
    ("067b", "Prolific"),
    ("0fe6", "Rongta"),
    ("1504", "Goojprt"),
    ("1fc9", "NXP"),
    ("28e9", "Generic POS"),
    ("4348", "WCH"),
];

pub fn known_model(vendor_id: &str, product_id: &str) -> Option<(&'static str, &'static str)> {
    KNOWN_MODELS
        .iter()
        .find(|((vid, pid), _)| vid.eq_ignore_ascii_case(vendor_id) && pid.eq_ignore_ascii_case(product_id))
        .map(|(_, names)| *names)
}

pub fn known_vendor(vendor_id: &str) -> Option<&'static str> {
    KNOWN_VENDORS
        .iter()
        .find(|(vid, _)| vid.eq_ignore_ascii_case(vendor_id))
        .map(|(_, name)| *name)
}

/// Human-readable model name for a probed device.
///
/// Preference: the known-model table, then the brand plus the product
/// string (ignoring junk such as a bare year), then a generic label.
pub fn model_name(identity: &UsbIdentity) -> String {
    if let Some((brand, model)) = known_model(&identity.vendor_id, &identity.product_id) {
        return format!("{brand} {model}");
    }
    let brand = identity
        .manufacturer
        .as_deref()
        .filter(|m| !m.trim().is_empty())
        .or_else(|| known_vendor(&identity.vendor_id))
        .unwrap_or("Unknown");
    match identity.product.as_deref().map(str::trim) {
        Some(product) if product.len() > 2 && !product.chars().all(|c| c.is_ascii_digit()) => {
            format!("{brand} {product}")
        }
        _ => format!("{brand} Thermal Printer"),
    }
}

/// Scans the sysfs `usbmisc` class for printers.
#[derive(Debug, Clone)]
pub struct SysfsScanner {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
}

impl SysfsScanner {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
        }
    }

    pub fn from_config(config: &PrinterConfig) -> Self {
        Self::new(&config.sysfs_root, &config.dev_root)
    }
}

impl DeviceScanner for SysfsScanner {
    fn list(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.sysfs_root) {
            Ok(entries) => entries,
            // The class directory only exists once usblp has bound a device.
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(TicketwerkError::Probe(format!(
                    "reading {}: {e}",
                    self.sysfs_root.display()
                )));
            }
        };
        let mut names: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("lp"))
            .collect();
        names.sort();
        Ok(names)
    }

    fn probe(&self, name: &str) -> Option<ProbedDevice> {
        let node = self.dev_root.join(name);
        if !node.exists() {
            debug!(name, node = %node.display(), "class entry without device node");
            return None;
        }

        let interface = match fs::canonicalize(self.sysfs_root.join(name).join("device")) {
            Ok(path) => path,
            Err(e) => {
                debug!(name, error = %e, "no USB interface behind class entry");
                return None;
            }
        };
        let search: Vec<&Path> = std::iter::once(interface.as_path())
            .chain(interface.parent())
            .collect();

        let class = read_attr(&search, "bInterfaceClass");
        let identity = UsbIdentity {
            vendor_id: read_attr(&search, "idVendor").unwrap_or_default().to_ascii_lowercase(),
            product_id: read_attr(&search, "idProduct").unwrap_or_default().to_ascii_lowercase(),
            manufacturer: read_attr(&search, "manufacturer"),
            product: read_attr(&search, "product"),
            serial: read_attr(&search, "serial"),
        };

        let printer_class = class.as_deref() == Some(USB_CLASS_PRINTER);
        if !printer_class && known_vendor(&identity.vendor_id).is_none() {
            debug!(
                name,
                class = class.as_deref().unwrap_or("?"),
                vendor = %identity.vendor_id,
                "not a printer"
            );
            return None;
        }

        let writable = node_access(&node, fs::OpenOptions::new().write(true).open(&node))?;

        let model = model_name(&identity);
        Some(ProbedDevice {
            device_path: node,
            identity,
            model,
            writable,
        })
    }
}

/// Read the result of opening `node` for writing: `Some(writable)` if the
/// printer is there, `None` if the node is unusable. usblp allows a single
/// open, so EBUSY means present and in use.
fn node_access(node: &Path, opened: io::Result<fs::File>) -> Option<bool> {
    match opened {
        Ok(_) => Some(true),
        Err(e) if e.raw_os_error() == Some(EBUSY) => {
            debug!(node = %node.display(), "printer node held open elsewhere");
            Some(true)
        }
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            debug!(node = %node.display(), "printer node is not writable");
            Some(false)
        }
        Err(e) => {
            debug!(node = %node.display(), error = %e, "printer node cannot be opened");
            None
        }
    }
}

/// First non-empty value of sysfs attribute `name` in `dirs`.
fn read_attr(dirs: &[&Path], name: &str) -> Option<String> {
    dirs.iter()
        .filter_map(|dir| fs::read_to_string(dir.join(name)).ok())
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}
