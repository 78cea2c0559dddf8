//! USB-side helpers: endpoint classification and descriptor parsing

pub mod classify;
pub mod descriptor;

pub use classify::EndpointClassifier;
pub use descriptor::{parse_configuration, parse_device, DescriptorError, DeviceIdentity};
