//! The settings oracle: externally sourced identifiers used when a procedure is locally
//! initiated. The version number itself is not externally sourced — it is this implementation's
//! own compile-time constant, exactly as rubble defines and uses its own `BLUETOOTH_VERSION` in
//! `connection.rs`'s `process_control_pdu`.

use crate::pdu::FeatureSet;

/// `Bluetooth Core Specification` version assigned to "5.0", the version this engine implements.
pub const BLUETOOTH_VERSION: u8 = 0x09;

/// Supplies the company- and implementation-specific identifiers this crate cannot know on its
/// own. Implemented by the embedding (a real controller would read these from provisioned
/// configuration; tests implement it with fixed values).
pub trait Settings {
    /// Bluetooth SIG-assigned company identifier of this implementation.
    fn company_id(&self) -> u16;

    /// Implementation-defined sub-version number, free for the embedding to pick.
    fn sub_version_number(&self) -> u16;

    /// The LE feature bits this controller's lower link layer actually supports. Used as the
    /// local mask for Feature Exchange.
    fn supported_features(&self) -> FeatureSet;
}
