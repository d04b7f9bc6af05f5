/// PDU reader module
use crate::pdu::*;
use byteordered::byteorder::{BigEndian, ByteOrder};
use dicom_encoding::text::{DefaultCharacterSetCodec, TextCodec};
use snafu::{ensure, Backtrace, ResultExt, Snafu};
use tracing::debug;

/// The length of the PDU header in bytes,
/// comprising the PDU type (1 byte),
/// reserved byte (1 byte),
/// and PDU length (4 bytes).
pub const PDU_HEADER_SIZE: u32 = 6;

#[derive(Debug, Snafu)]
#[non_exhaustive]
pub enum Error {
    #[snafu(display(
        "Unexpected end of input reading `{}`: needed {} bytes, {} available",
        field,
        needed,
        available
    ))]
    UnexpectedEof {
        field: &'static str,
        needed: usize,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display(
        "Inconsistent length for `{}`: declared {}, bounded by {}",
        field,
        declared,
        available
    ))]
    InvalidLength {
        field: &'static str,
        declared: usize,
        available: usize,
        backtrace: Backtrace,
    },

    #[snafu(display("Unsupported protocol version {:#06X} (bit 0 not set)", version))]
    UnsupportedProtocol { version: u16, backtrace: Backtrace },

    #[snafu(display("Item type {:#04X} may appear only once per PDU", item_type))]
    DuplicateSingletonItem { item_type: u8, backtrace: Backtrace },

    #[snafu(display("Malformed PDU: {}", detail))]
    MalformedPdu { detail: String, backtrace: Backtrace },

    #[snafu(display("Could not decode text field `{}`", field))]
    DecodeText {
        field: &'static str,
        #[snafu(backtrace)]
        source: dicom_encoding::text::DecodeTextError,
    },
}

pub type Result<T> = std::result::Result<T, Error>;

/// A bounds-checked sequential reader over a byte slice.
///
/// Fixed-layout reads (`read_u8` and friends) fail with [`UnexpectedEof`]
/// when the slice runs out,
/// whereas [`take_item`](ByteCursor::take_item) guards *declared* lengths
/// and fails with [`InvalidLength`] instead.
/// Nested items are decoded through the sub-slice returned by `take_item`,
/// so no inner read can ever cross the enclosing item's boundary.
///
/// [`UnexpectedEof`]: Error::UnexpectedEof
/// [`InvalidLength`]: Error::InvalidLength
#[derive(Debug)]
pub(crate) struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        ByteCursor { buf, pos: 0 }
    }

    /// The number of bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read the next `n` bytes of a fixed-layout field.
    pub fn read_exact(&mut self, n: usize, field: &'static str) -> Result<&'a [u8]> {
        ensure!(
            n <= self.remaining(),
            UnexpectedEofSnafu {
                field,
                needed: n,
                available: self.remaining(),
            }
        );
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn read_u8(&mut self, field: &'static str) -> Result<u8> {
        Ok(self.read_exact(1, field)?[0])
    }

    pub fn read_u16(&mut self, field: &'static str) -> Result<u16> {
        Ok(BigEndian::read_u16(self.read_exact(2, field)?))
    }

    pub fn read_u32(&mut self, field: &'static str) -> Result<u32> {
        Ok(BigEndian::read_u32(self.read_exact(4, field)?))
    }

    pub fn skip(&mut self, n: usize, field: &'static str) -> Result<()> {
        self.read_exact(n, field).map(|_| ())
    }

    /// Split off the next `length` bytes as the body of a nested item,
    /// where `length` was declared by the input itself.
    pub fn take_item(&mut self, length: usize, field: &'static str) -> Result<&'a [u8]> {
        ensure!(
            length <= self.remaining(),
            InvalidLengthSnafu {
                field,
                declared: length,
                available: self.remaining(),
            }
        );
        let out = &self.buf[self.pos..self.pos + length];
        self.pos += length;
        Ok(out)
    }
}

/// Decode an association request (A-ASSOCIATE-RQ)
/// or acceptance (A-ASSOCIATE-AC) PDU
/// from a fully received buffer.
///
/// The buffer must contain the whole PDU including its 6-byte common header;
/// the transport layer is expected to have read the header first
/// to learn how many bytes to fetch,
/// so the buffer length must agree exactly with the declared PDU length.
///
/// This is a pure, single-pass function:
/// it performs no I/O, keeps no state between calls,
/// and copies all decoded values out of the input slice.
pub fn read_associate_pdu(buf: &[u8]) -> Result<AssociatePdu> {
    let mut cursor = ByteCursor::new(buf);

    // 1 - PDU-type - 01H (A-ASSOCIATE-RQ) or 02H (A-ASSOCIATE-AC)
    let pdu_type = cursor.read_u8("PDU-type")?;
    let kind = match pdu_type {
        0x01 => AssociateKind::Request,
        0x02 => AssociateKind::Accept,
        _ => {
            return MalformedPduSnafu {
                detail: format!(
                    "PDU type {:#04X} is not an association request or acceptance",
                    pdu_type
                ),
            }
            .fail()
        }
    };

    // 2 - Reserved - This reserved field shall be sent with a value 00H but not
    // tested to this value when received.
    cursor.read_u8("Reserved")?;

    // 3-6 - PDU-length - This PDU-length shall be the number of bytes from the
    // first byte of the following field to the last byte of the variable field.
    // It shall be encoded as an unsigned binary number.
    let pdu_length = cursor.read_u32("PDU-length")? as usize;
    ensure!(
        cursor.remaining() >= pdu_length,
        UnexpectedEofSnafu {
            field: "PDU payload",
            needed: pdu_length,
            available: cursor.remaining(),
        }
    );
    ensure!(
        cursor.remaining() == pdu_length,
        MalformedPduSnafu {
            detail: format!(
                "PDU declares {} bytes but {} were supplied",
                pdu_length,
                cursor.remaining()
            ),
        }
    );

    // from here on, the payload cursor is the PDU's own length budget
    let mut cursor = ByteCursor::new(cursor.take_item(pdu_length, "PDU payload")?);

    // 7-8 - Protocol-version - This two byte field shall use one bit to identify
    // each version of the DICOM UL protocol supported by the calling end-system.
    // This is Version 1 and shall be identified with bit 0 set. A receiver of
    // this PDU implementing only this version of the DICOM UL protocol shall
    // only test that bit 0 is set.
    let protocol_version = cursor.read_u16("Protocol-version")?;
    ensure!(
        protocol_version & 0x0001 != 0,
        UnsupportedProtocolSnafu {
            version: protocol_version,
        }
    );

    // 9-10 - Reserved - This reserved field shall be sent with a value 0000H but
    // not tested to this value when received.
    cursor.skip(2, "Reserved")?;

    // 11-26 - Called-AE-title - Destination DICOM Application Name. It shall be
    // encoded as 16 characters as defined by the ISO 646:1990-Basic G0 Set with
    // leading and trailing spaces (20H) being non-significant.
    let called_ae_title = decode_text(
        cursor.read_exact(16, "Called-AE-title")?,
        "Called-AE-title",
    )?;

    // 27-42 - Calling-AE-title - Source DICOM Application Name, encoded in the
    // same manner as the Called-AE-title.
    let calling_ae_title = decode_text(
        cursor.read_exact(16, "Calling-AE-title")?,
        "Calling-AE-title",
    )?;

    // 43-74 - Reserved - This reserved field shall be sent with a value 00H for
    // all bytes but not tested to this value when received.
    cursor.skip(32, "Reserved")?;

    // 75-xxx - Variable items - This variable field shall contain the following
    // items: one Application Context Item, one or more Presentation Context
    // Items and one User Information Item.
    let mut application_context_name: Option<String> = None;
    let mut presentation_contexts = vec![];
    let mut user_info: Option<UserInformation> = None;

    while !cursor.is_empty() {
        let header = read_item_header(&mut cursor)?;
        let body = cursor.take_item(header.length, item_name(header.item_type))?;
        match header.item_type {
            0x10 => {
                ensure!(
                    application_context_name.is_none(),
                    DuplicateSingletonItemSnafu {
                        item_type: header.item_type,
                    }
                );
                application_context_name =
                    Some(decode_text(body, "Application-context-name")?);
            }
            0x20 if kind == AssociateKind::Request => {
                presentation_contexts.push(read_presentation_context(body, kind)?);
            }
            0x21 if kind == AssociateKind::Accept => {
                presentation_contexts.push(read_presentation_context(body, kind)?);
            }
            0x50 => {
                ensure!(
                    user_info.is_none(),
                    DuplicateSingletonItemSnafu {
                        item_type: header.item_type,
                    }
                );
                user_info = Some(read_user_information(body)?);
            }
            _ => skip_unknown_item(header.item_type, body),
        }
    }

    Ok(AssociatePdu {
        kind,
        protocol_version,
        called_ae_title,
        calling_ae_title,
        application_context_name: application_context_name.unwrap_or_default(),
        presentation_contexts,
        user_info: user_info.unwrap_or_default(),
    })
}

/// The common item header shared by every variable item and sub-item:
/// `{1-byte type, 1 reserved byte, 2-byte big-endian length}`.
struct ItemHeader {
    item_type: u8,
    length: usize,
}

fn read_item_header(cursor: &mut ByteCursor<'_>) -> Result<ItemHeader> {
    // 1 - Item-type - XXH
    let item_type = cursor.read_u8("Item-type")?;

    // 2 - Reserved - This reserved field shall be sent with a value 00H but not
    // tested to this value when received.
    cursor.read_u8("Reserved")?;

    // 3-4 - Item-length
    let length = cursor.read_u16("Item-length")? as usize;

    Ok(ItemHeader { item_type, length })
}

/// Presentation Context Item Structure (proposed or result)
fn read_presentation_context(body: &[u8], kind: AssociateKind) -> Result<PresentationContext> {
    let mut body = ByteCursor::new(body);

    // 5 - Presentation-context-ID - Presentation-context-ID values shall be odd
    // integers between 1 and 255, encoded as an unsigned binary number.
    let id = body.read_u8("Presentation-context-ID")?;

    // 6 - Reserved
    body.read_u8("Reserved")?;

    // 7 - Result/Reason - Only significant in an A-ASSOCIATE-AC, where the
    // value 0 means acceptance; a reserved byte in an A-ASSOCIATE-RQ.
    let result_byte = body.read_u8("Result/Reason")?;

    // 8 - Reserved
    body.read_u8("Reserved")?;

    let result = match kind {
        AssociateKind::Request => None,
        AssociateKind::Accept => Some(result_byte),
    };

    // When the Result/Reason field has a value other than acceptance (0), the
    // transfer syntax field shall not be significant and its value shall not be
    // tested when received. The body is consumed but its content is discarded.
    if kind == AssociateKind::Accept && result_byte != 0 {
        let n = body.remaining();
        body.skip(n, "Presentation context body")?;
        return Ok(PresentationContext {
            id,
            result,
            abstract_syntax: String::new(),
            transfer_syntaxes: vec![],
        });
    }

    // 9-xxx - Abstract/Transfer Syntax Sub-Items
    let mut abstract_syntax = String::new();
    let mut transfer_syntaxes = vec![];
    while !body.is_empty() {
        let header = read_item_header(&mut body)?;
        let item_body = body.take_item(header.length, item_name(header.item_type))?;
        match (header.item_type, kind) {
            (0x30, AssociateKind::Request) => {
                // Abstract Syntax Sub-Item Structure; only carried by requests
                abstract_syntax = decode_text(item_body, "Abstract-syntax-name")?;
            }
            (0x40, _) => {
                // Transfer Syntax Sub-Item Structure
                transfer_syntaxes.push(decode_text(item_body, "Transfer-syntax-name")?);
            }
            _ => skip_unknown_item(header.item_type, item_body),
        }
    }

    Ok(PresentationContext {
        id,
        result,
        abstract_syntax,
        transfer_syntaxes,
    })
}

/// User Information Item Structure
fn read_user_information(body: &[u8]) -> Result<UserInformation> {
    let mut body = ByteCursor::new(body);
    let mut info = UserInformation::default();

    // 5-xxx - User-data - This variable field shall contain User-data sub-items
    // as defined by the DICOM Application Entity.
    while !body.is_empty() {
        let header = read_item_header(&mut body)?;
        let item_body = body.take_item(header.length, item_name(header.item_type))?;
        match header.item_type {
            0x51 => {
                // Maximum Length Sub-Item Structure

                // 5-8 - Maximum-length-received - This length value is indicated
                // as a number of bytes encoded as an unsigned binary number. The
                // value of (0) indicates that no maximum length is specified.
                let mut sub = ByteCursor::new(item_body);
                let value = sub.read_u32("Maximum-length-received")?;
                ensure!(
                    sub.is_empty(),
                    InvalidLengthSnafu {
                        field: "Maximum Length Sub-Item",
                        declared: header.length,
                        available: 4_usize,
                    }
                );
                info.max_pdu_length = value;
            }
            0x52 => {
                // Implementation Class UID Sub-Item Structure
                info.implementation_class_uid =
                    decode_text(item_body, "Implementation-class-uid")?;
            }
            0x53 => {
                // Asynchronous Operations Window Sub-Item: recognized in the
                // wire format, but not surfaced in the decoded record
                debug!(
                    "ignoring asynchronous operations window sub-item ({} bytes)",
                    item_body.len()
                );
            }
            0x54 => {
                // SCU/SCP Role Selection Sub-Item Structure
                info.scu_scp_roles.push(read_scu_scp_role(item_body, &header)?);
            }
            0x55 => {
                // Implementation Version Name Structure
                info.implementation_version_name =
                    Some(decode_text(item_body, "Implementation-version-name")?);
            }
            0x56 => {
                // SOP Class Extended Negotiation Sub-Item
                info.extended_negotiations
                    .push(read_extended_negotiation(item_body)?);
            }
            _ => skip_unknown_item(header.item_type, item_body),
        }
    }

    Ok(info)
}

fn read_scu_scp_role(item_body: &[u8], header: &ItemHeader) -> Result<ScuScpRole> {
    let mut sub = ByteCursor::new(item_body);

    // 5-6 - UID-length - The number of bytes of the following SOP-class-uid
    // field, encoded as an unsigned binary number.
    let uid_length = sub.read_u16("SOP-class-uid-length")? as usize;

    // 7-xxx - SOP-class-uid
    let sop_class_uid = decode_text(
        sub.take_item(uid_length, "SOP-class-uid")?,
        "SOP-class-uid",
    )?;

    // xxx - SCU-role and SCP-role - 0 for non-support, 1 for support of the role
    let scu_role = sub.read_u8("SCU-role")? != 0;
    let scp_role = sub.read_u8("SCP-role")? != 0;

    // the sub-item length must account for exactly these fields
    ensure!(
        sub.is_empty(),
        InvalidLengthSnafu {
            field: "SCU/SCP Role Selection Sub-Item",
            declared: header.length,
            available: header.length - sub.remaining(),
        }
    );

    Ok(ScuScpRole {
        sop_class_uid,
        scu_role,
        scp_role,
    })
}

fn read_extended_negotiation(item_body: &[u8]) -> Result<ExtendedNegotiation> {
    let mut sub = ByteCursor::new(item_body);

    // 5-6 - SOP-class-uid-length
    let uid_length = sub.read_u16("SOP-class-uid-length")? as usize;

    // 7-xxx - SOP-class-uid - The SOP Class or Meta SOP Class identifier
    let sop_class_uid = decode_text(
        sub.take_item(uid_length, "SOP-class-uid")?,
        "SOP-class-uid",
    )?;

    // xxx-xxx - Service-class-application-information - occupies the remainder
    // of the sub-item; its length is derived from the cursor's budget
    let n = sub.remaining();
    let application_info = sub
        .take_item(n, "Service-class-application-information")?
        .to_vec();

    Ok(ExtendedNegotiation {
        sop_class_uid,
        application_info,
    })
}

/// Consume an unrecognized item without interpretation.
///
/// Unknown item types are the protocol's forward-compatibility mechanism
/// and are never an error; the caller has already consumed the body by its
/// declared length.
fn skip_unknown_item(item_type: u8, body: &[u8]) {
    debug!(
        "skipping unrecognized item {:#04X} ({} bytes)",
        item_type,
        body.len()
    );
}

fn decode_text(bytes: &[u8], field: &'static str) -> Result<String> {
    let codec = DefaultCharacterSetCodec;
    let text = codec.decode(bytes).context(DecodeTextSnafu { field })?;
    Ok(text.trim_end_matches([' ', '\u{0}']).to_string())
}

fn item_name(item_type: u8) -> &'static str {
    match item_type {
        0x10 => "Application Context Item",
        0x20 => "Presentation Context Item (RQ)",
        0x21 => "Presentation Context Item (AC)",
        0x30 => "Abstract Syntax Sub-Item",
        0x40 => "Transfer Syntax Sub-Item",
        0x50 => "User Information Item",
        0x51 => "Maximum Length Sub-Item",
        0x52 => "Implementation Class UID Sub-Item",
        0x53 => "Asynchronous Operations Window Sub-Item",
        0x54 => "SCU/SCP Role Selection Sub-Item",
        0x55 => "Implementation Version Name Sub-Item",
        0x56 => "SOP Class Extended Negotiation Sub-Item",
        _ => "Unknown Item",
    }
}
