#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // decoding arbitrary bytes must either produce a PDU or a decode error,
    // never a panic or an out-of-bounds read
    let _ = dicom_assoc::read_associate_pdu(data);
});
