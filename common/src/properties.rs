//! # Advertisement Property Model
//!
//! The generic key/value bag the scanning backend delivers with every
//! advertisement, and its translation into the typed fields of a device
//! record.
//!
//! Backends report values loosely typed (some platforms hand everything
//! over as strings), so the views are lenient: a boolean may arrive as a
//! `Bool` or as the text `"true"`, a signal strength as `Signed` or as
//! numeric text. Anything else counts as malformed for that field only.

use std::collections::HashMap;

use thiserror::Error;

use crate::device::{DeviceId, NO_NAME};

/// The advertisement properties the watcher asks the backend to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PropertyKey {
    /// Human readable display name.
    Name,
    /// Whether the peripheral currently holds a connection to this host.
    IsConnected,
    /// Most recent RSSI sample in dB.
    SignalStrength,
}

impl PropertyKey {
    /// Requested with every scanner the watcher creates.
    pub const REQUESTED: [PropertyKey; 3] = [
        PropertyKey::Name,
        PropertyKey::IsConnected,
        PropertyKey::SignalStrength,
    ];
}

/// A loosely typed property value as reported by the backend.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Text(String),
    Bool(bool),
    Signed(i64),
}

impl PropertyValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            PropertyValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Lenient boolean view: accepts `Bool` or boolean-looking text.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PropertyValue::Bool(value) => Some(*value),
            PropertyValue::Text(text) => text.trim().parse().ok(),
            PropertyValue::Signed(_) => None,
        }
    }

    /// Lenient dB view: accepts in-range `Signed` or numeric text.
    pub fn as_db(&self) -> Option<i16> {
        match self {
            PropertyValue::Signed(value) => i16::try_from(*value).ok(),
            PropertyValue::Text(text) => text.trim().parse().ok(),
            PropertyValue::Bool(_) => None,
        }
    }
}

pub type PropertyBag = HashMap<PropertyKey, PropertyValue>;

/// Payload of a "found" signal from the scanning backend.
#[derive(Debug, Clone)]
pub struct AdvertisementInfo {
    pub id: DeviceId,
    pub properties: PropertyBag,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TranslateError {
    #[error("advertisement is missing the {0:?} property")]
    MissingField(PropertyKey),
    #[error("advertisement property {0:?} is malformed")]
    MalformedField(PropertyKey),
}

/// Typed view of a first-discovery property bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub name: String,
    pub connected: bool,
    pub signal: i16,
}

/// Translates a first-discovery bag into its typed fields.
///
/// The display name falls back to [`NO_NAME`] when absent or non-textual;
/// connectivity and signal strength are mandatory and must parse, otherwise
/// no record may be created from this advertisement.
pub fn parse_discovery(properties: &PropertyBag) -> Result<Discovered, TranslateError> {
    let name = match properties.get(&PropertyKey::Name) {
        Some(value) => value.as_text().unwrap_or(NO_NAME).to_string(),
        None => NO_NAME.to_string(),
    };

    let connected = required(properties, PropertyKey::IsConnected, PropertyValue::as_bool)?;
    let signal = required(properties, PropertyKey::SignalStrength, PropertyValue::as_db)?;

    Ok(Discovered {
        name,
        connected,
        signal,
    })
}

fn required<T>(
    properties: &PropertyBag,
    key: PropertyKey,
    view: impl Fn(&PropertyValue) -> Option<T>,
) -> Result<T, TranslateError> {
    let value = properties
        .get(&key)
        .ok_or(TranslateError::MissingField(key))?;
    view(value).ok_or(TranslateError::MalformedField(key))
}
