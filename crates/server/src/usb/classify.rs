//! Endpoint classification
//!
//! Maps an endpoint address to its transfer type using the device's
//! configuration topology. The session engine keeps the classifier in step
//! with the guest by updating it as SET_CONFIGURATION and SET_INTERFACE pass
//! through; it is only ever touched from the receive path, so no locking is
//! involved.

use std::collections::HashMap;

use common::usb::{ConfigurationInfo, TransferKind};
use tracing::warn;

/// Per-device endpoint classifier
#[derive(Debug, Clone)]
pub struct EndpointClassifier {
    configurations: Vec<ConfigurationInfo>,
    /// bConfigurationValue of the active configuration, None when
    /// unconfigured
    active: Option<u8>,
    /// Selected alternate setting per interface number
    alt_settings: HashMap<u8, u8>,
}

impl EndpointClassifier {
    /// Classifier for an unconfigured device
    pub fn new(configurations: Vec<ConfigurationInfo>) -> Self {
        Self {
            configurations,
            active: None,
            alt_settings: HashMap::new(),
        }
    }

    /// Classifier with a configuration already selected
    pub fn with_configuration(configurations: Vec<ConfigurationInfo>, value: u8) -> Self {
        let mut classifier = Self::new(configurations);
        classifier.select_configuration(value);
        classifier
    }

    /// Track a trapped SET_CONFIGURATION
    ///
    /// Value 0 returns the device to the unconfigured state. Alternate
    /// setting selections reset to 0 on every configuration change.
    pub fn select_configuration(&mut self, value: u8) {
        self.alt_settings.clear();
        if value == 0 {
            self.active = None;
            return;
        }
        if self.configurations.iter().any(|c| c.value == value) {
            self.active = Some(value);
        } else {
            warn!("SET_CONFIGURATION selected unknown configuration {value}");
            self.active = None;
        }
    }

    /// Track a trapped SET_INTERFACE
    pub fn select_interface(&mut self, interface: u8, alt_setting: u8) {
        self.alt_settings.insert(interface, alt_setting);
    }

    /// Transfer type of the endpoint with the given raw address
    ///
    /// Endpoint 0 classifies as control regardless of configuration state.
    /// Returns None for addresses absent from the active configuration.
    pub fn endpoint_kind(&self, address: u8) -> Option<TransferKind> {
        if address & 0x0f == 0 {
            return Some(TransferKind::Control);
        }
        let config = self
            .configurations
            .iter()
            .find(|c| Some(c.value) == self.active)?;
        for interface in &config.interfaces {
            let selected = self
                .alt_settings
                .get(&interface.number)
                .copied()
                .unwrap_or(0);
            let alt = interface
                .alt_settings
                .iter()
                .find(|a| a.alt == selected)
                .or_else(|| interface.alt_settings.first())?;
            for endpoint in &alt.endpoints {
                if endpoint.address == address {
                    return Some(endpoint.kind);
                }
            }
        }
        None
    }
}
