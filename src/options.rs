// src/options.rs
//! Driver options advertised to the host and their resolution from a device
//! section.

use log::warn;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DriverOption {
    HwCursor,
    NoAccel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionValueType {
    Boolean,
}

/// One entry of the table returned by `AvailableOptions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptionInfo {
    pub token: DriverOption,
    pub name: &'static str,
    pub value_type: OptionValueType,
    pub default: bool,
}

pub const RPI_OPTIONS: [OptionInfo; 2] = [
    OptionInfo {
        token: DriverOption::HwCursor,
        name: "HWcursor",
        value_type: OptionValueType::Boolean,
        default: false,
    },
    OptionInfo {
        token: DriverOption::NoAccel,
        name: "NoAccel",
        value_type: OptionValueType::Boolean,
        default: false,
    },
];

/// Option values resolved once in PreInit and never changed afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverOptions {
    pub hw_cursor: bool,
    pub no_accel: bool,
}

impl DriverOptions {
    /// Looks up every known option in `section`. Names match the way the
    /// host matches them: case, spaces and underscores are ignored.
    pub fn resolve(section: &BTreeMap<String, String>) -> Self {
        let mut options = DriverOptions::default();
        for info in &RPI_OPTIONS {
            let raw = section
                .iter()
                .find(|(name, _)| names_match(name, info.name))
                .map(|(_, value)| value.as_str());
            let value = match raw {
                None => info.default,
                Some(text) => parse_bool(text).unwrap_or_else(|| {
                    warn!(
                        "RPI: option \"{}\" has invalid value \"{}\", using default {}",
                        info.name, text, info.default
                    );
                    info.default
                }),
            };
            match info.token {
                DriverOption::HwCursor => options.hw_cursor = value,
                DriverOption::NoAccel => options.no_accel = value,
            }
        }
        options
    }
}

fn normalize(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn names_match(a: &str, b: &str) -> bool {
    normalize(a) == normalize(b)
}

/// Boolean spellings accepted in configuration files. An empty value means
/// the option was given without an argument, which turns it on.
pub fn parse_bool(text: &str) -> Option<bool> {
    match text.trim().to_ascii_lowercase().as_str() {
        "" | "1" | "on" | "true" | "yes" => Some(true),
        "0" | "off" | "false" | "no" => Some(false),
        _ => None,
    }
}
