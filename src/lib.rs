//! This crate contains the types and methods needed to decode
//! DICOM upper layer association negotiation messages.
//!
//! It covers the A-ASSOCIATE-RQ and A-ASSOCIATE-AC PDUs exchanged
//! at connection setup,
//! turning raw, untrusted byte buffers into structured records
//! that a finite-state machine or higher-level helper can act upon.
//! Reading bytes from the network and replying to the peer
//! are left to the caller:
//! the transport layer reads the 6-byte common PDU header,
//! fetches exactly as many bytes as the header declares,
//! and hands the complete buffer to [`read_associate_pdu`].
//!
//! All parsing is bounds checked.
//! Every declared item length is validated against the enclosing item
//! before any byte is read,
//! so no input can make the decoder read out of bounds or panic.

pub mod pdu;

// re-exports

pub use pdu::reader::read_associate_pdu;
pub use pdu::{AssociateKind, AssociatePdu, PresentationContext, UserInformation};
