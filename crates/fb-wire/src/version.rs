//! Protocol version definitions and negotiation descriptors.
//!
//! Each supported protocol version is described by a [`ProtocolDescriptor`]
//! carrying the values offered during `op_connect` and the set of
//! [`Capabilities`] the version provides. Feature checks consult the
//! capability set of the negotiated descriptor instead of comparing version
//! numbers, so supporting another version means adding a table row.

use bitflags::bitflags;
use core::fmt;

use crate::error::ProtocolError;

/// Flag marking protocol versions introduced by Firebird (as opposed to
/// the inherited InterBase versions).
pub const FB_PROTOCOL_FLAG: i32 = 0x8000;

/// Mask for the version number part of a flagged protocol version.
pub const FB_PROTOCOL_MASK: i32 = 0x7FFF;

/// Generic architecture type; requests XDR encoding.
pub const ARCH_GENERIC: i32 = 1;

/// Version of the `op_connect` message layout.
pub const CONNECT_VERSION3: i32 = 3;

/// Remote procedure call protocol type.
pub const PTYPE_RPC: i32 = 2;
/// Batch send protocol type.
pub const PTYPE_BATCH_SEND: i32 = 3;
/// Out-of-band protocol type.
pub const PTYPE_OUT_OF_BAND: i32 = 4;
/// Lazy send protocol type.
pub const PTYPE_LAZY_SEND: i32 = 5;
/// Mask extracting the protocol type from the accepted type word.
pub const PTYPE_MASK: i32 = 0xFF;
/// Flag in the accepted type word signalling wire compression.
pub const PFLAG_COMPRESS: i32 = 0x100;

/// Wire protocol version number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProtocolVersion(i32);

impl ProtocolVersion {
    /// Protocol 10 (Firebird 1.x).
    pub const V10: Self = Self(10);

    /// Protocol 11 (Firebird 2.1).
    pub const V11: Self = Self(FB_PROTOCOL_FLAG | 11);

    /// Protocol 12 (Firebird 2.5).
    pub const V12: Self = Self(FB_PROTOCOL_FLAG | 12);

    /// Protocol 13 (Firebird 3.0).
    pub const V13: Self = Self(FB_PROTOCOL_FLAG | 13);

    /// Create a version from its raw wire value.
    #[must_use]
    pub const fn new(version: i32) -> Self {
        Self(version)
    }

    /// Normalize the version number echoed in an accept packet.
    ///
    /// Servers send the flagged versions as a sign-extended 16-bit value,
    /// which arrives as a negative integer.
    #[must_use]
    pub const fn from_accepted(raw: i32) -> Self {
        if raw < 0 {
            Self((raw & FB_PROTOCOL_MASK) | FB_PROTOCOL_FLAG)
        } else {
            Self(raw)
        }
    }

    /// Get the raw version value.
    #[must_use]
    pub const fn raw(self) -> i32 {
        self.0
    }

    /// The version number without the Firebird flag.
    #[must_use]
    pub const fn number(self) -> i32 {
        self.0 & FB_PROTOCOL_MASK
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "protocol {}", self.number())
    }
}

bitflags! {
    /// Features provided by a protocol version.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Capabilities: u32 {
        /// Abort by closing the connection.
        const CANCEL_ABORT = 0x01;
        /// Raise a cancel on the running operation (`op_cancel`).
        const CANCEL_RAISE = 0x02;
        /// Disable cancellation on the attachment.
        const CANCEL_DISABLE = 0x04;
        /// Re-enable cancellation on the attachment.
        const CANCEL_ENABLE = 0x08;
        /// Responses to some operations may be deferred.
        const LAZY_SEND = 0x10;
        /// Authentication plugins may be negotiated.
        const PLUGIN_AUTH = 0x20;
    }
}

/// A protocol version offered during connection negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolDescriptor {
    /// Version number.
    pub version: ProtocolVersion,
    /// Architecture type.
    pub architecture: i32,
    /// Minimum protocol type.
    pub min_type: i32,
    /// Maximum protocol type.
    pub max_type: i32,
    /// Preference weight; the server picks the highest weight it supports.
    pub weight: i32,
    /// Features available with this version.
    pub capabilities: Capabilities,
}

impl ProtocolDescriptor {
    /// Whether the descriptor provides all of `capabilities`.
    #[must_use]
    pub const fn supports(&self, capabilities: Capabilities) -> bool {
        self.capabilities.contains(capabilities)
    }
}

const CANCEL_ALL: Capabilities = Capabilities::CANCEL_ABORT
    .union(Capabilities::CANCEL_RAISE)
    .union(Capabilities::CANCEL_DISABLE)
    .union(Capabilities::CANCEL_ENABLE);

/// All protocol versions this client can speak, lowest weight first.
pub const SUPPORTED_PROTOCOLS: &[ProtocolDescriptor] = &[
    ProtocolDescriptor {
        version: ProtocolVersion::V10,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_BATCH_SEND,
        weight: 1,
        capabilities: Capabilities::CANCEL_ABORT,
    },
    ProtocolDescriptor {
        version: ProtocolVersion::V11,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_LAZY_SEND,
        weight: 2,
        capabilities: Capabilities::CANCEL_ABORT.union(Capabilities::LAZY_SEND),
    },
    ProtocolDescriptor {
        version: ProtocolVersion::V12,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_LAZY_SEND,
        weight: 3,
        capabilities: CANCEL_ALL.union(Capabilities::LAZY_SEND),
    },
    ProtocolDescriptor {
        version: ProtocolVersion::V13,
        architecture: ARCH_GENERIC,
        min_type: PTYPE_RPC,
        max_type: PTYPE_LAZY_SEND,
        weight: 4,
        capabilities: CANCEL_ALL
            .union(Capabilities::LAZY_SEND)
            .union(Capabilities::PLUGIN_AUTH),
    },
];

/// Look up the descriptor for a negotiated version.
pub fn descriptor_for(version: ProtocolVersion) -> Result<&'static ProtocolDescriptor, ProtocolError> {
    SUPPORTED_PROTOCOLS
        .iter()
        .find(|d| d.version == version)
        .ok_or(ProtocolError::UnsupportedVersion(version.raw()))
}

/// Descriptors to offer, limited to versions up to `max`.
pub fn offered_protocols(max: ProtocolVersion) -> impl Iterator<Item = &'static ProtocolDescriptor> {
    SUPPORTED_PROTOCOLS
        .iter()
        .filter(move |d| d.version.number() <= max.number())
}
