//! Protocol Data Unit module
//!
//! This module comprises the data structures representing
//! an association negotiation message (A-ASSOCIATE-RQ or A-ASSOCIATE-AC)
//! according to the standard message exchange mechanisms,
//! as well as a reader of such messages from in-memory buffers.
pub mod reader;

use std::fmt::Display;

pub use reader::read_associate_pdu;


/// Whether the PDU is an association request or an association acceptance.
#[derive(Clone, Copy, Eq, PartialEq, Hash, Debug)]
pub enum AssociateKind {
    /// A-ASSOCIATE-RQ (PDU type 01H)
    Request,
    /// A-ASSOCIATE-AC (PDU type 02H)
    Accept,
}

impl Display for AssociateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            AssociateKind::Request => "A-ASSOCIATE-RQ",
            AssociateKind::Accept => "A-ASSOCIATE-AC",
        };
        f.write_str(msg)
    }
}

/// An in-memory representation of a decoded association negotiation PDU.
///
/// A value of this type is built from a single borrowed input buffer
/// and owns all of its data.
/// It is never mutated by the decoder after being returned.
#[derive(Debug, Clone, Eq, Hash, PartialEq)]
pub struct AssociatePdu {
    /// whether this was a request (RQ) or an acceptance (AC)
    pub kind: AssociateKind,
    /// the protocol version field; bit 0 identifies version 1
    pub protocol_version: u16,
    /// destination application entity title, trailing spaces trimmed
    pub called_ae_title: String,
    /// source application entity title, trailing spaces trimmed
    pub calling_ae_title: String,
    /// the application context name UID
    pub application_context_name: String,
    /// the proposed or negotiated presentation contexts, in wire order
    pub presentation_contexts: Vec<PresentationContext>,
    /// the contents of the user information item
    pub user_info: UserInformation,
}

/// Message component for a single presentation context,
/// either proposed (in a request) or negotiated (in an acceptance).
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct PresentationContext {
    /// the presentation context identifier,
    /// assigned by the requestor and echoed in later message exchange
    pub id: u8,
    /// the negotiation result; `None` on a request,
    /// `Some(0)` when the context was accepted
    pub result: Option<u8>,
    /// the abstract syntax UID
    /// (commonly referring to the expected SOP class);
    /// only carried by requests, empty otherwise
    pub abstract_syntax: String,
    /// the transfer syntax UIDs proposed or selected for this context
    pub transfer_syntaxes: Vec<String>,
}

impl PresentationContext {
    /// Whether this context was accepted by the peer.
    ///
    /// Only meaningful on an [`Accept`](AssociateKind::Accept) PDU.
    pub fn is_accepted(&self) -> bool {
        self.result == Some(0)
    }
}

/// The decoded contents of the user information item.
///
/// When the item is absent from the PDU,
/// all fields take their default (zero or empty) values.
#[derive(Debug, Clone, Default, Eq, Hash, PartialEq)]
pub struct UserInformation {
    /// maximum PDU length the peer is willing to receive,
    /// 0 meaning no maximum specified
    pub max_pdu_length: u32,
    /// the implementation class UID of the peer
    pub implementation_class_uid: String,
    /// the implementation version name of the peer, if sent
    pub implementation_version_name: Option<String>,
    /// SCU/SCP role selections, in wire order
    pub scu_scp_roles: Vec<ScuScpRole>,
    /// SOP class extended negotiation sub-items, in wire order
    pub extended_negotiations: Vec<ExtendedNegotiation>,
}

/// An SCU/SCP role selection sub-item.
///
/// Duplicate SOP class UIDs across role items are kept as received.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ScuScpRole {
    /// the SOP class UID this role selection applies to
    pub sop_class_uid: String,
    /// whether the sender proposes or accepts the user role
    pub scu_role: bool,
    /// whether the sender proposes or accepts the provider role
    pub scp_role: bool,
}

/// A SOP class extended negotiation sub-item.
///
/// The application information payload is opaque to the upper layer;
/// its semantics are defined by the service class identified by the UID.
#[derive(Clone, Eq, PartialEq, Hash, Debug)]
pub struct ExtendedNegotiation {
    /// the SOP class or meta SOP class UID
    pub sop_class_uid: String,
    /// service class application information, uninterpreted
    pub application_info: Vec<u8>,
}

impl AssociatePdu {
    /// Provide a short description of the PDU.
    pub fn short_description(&self) -> impl std::fmt::Display + '_ {
        AssociatePduShortDescription(self)
    }
}

struct AssociatePduShortDescription<'a>(&'a AssociatePdu);

impl std::fmt::Display for AssociatePduShortDescription<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {{calling: {:?}, called: {:?}, {} presentation contexts}}",
            self.0.kind,
            self.0.calling_ae_title,
            self.0.called_ae_title,
            self.0.presentation_contexts.len(),
        )
    }
}
