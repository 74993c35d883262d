//! Converter-level round trips over the builtin coding systems.

use libmtext_coding::{coding_by_name, ConvResult, Converter};
use libmtext_core::database;
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;

fn register_jisx0208_rows() {
    database::register_blob(
        database::tags(&["charset", "japanese-jisx0208"]),
        b"(0x2421 0x2473 0x3041) (0x2521 0x2576 0x30A1)".to_vec(),
    );
}

#[test]
fn utf8_round_trip_hello() {
    let coding = coding_by_name("utf-8").unwrap();
    let bytes = Converter::encode_mtext(coding.clone(), &MText::from_str("héllo"), false).unwrap();
    assert_eq!(bytes, vec![0x68, 0xC3, 0xA9, 0x6C, 0x6C, 0x6F]);
    let text = Converter::decode_bytes(coding, &bytes, false).unwrap();
    assert_eq!(text.to_string_lossy(), "héllo");
}

#[test]
fn strict_utf8_accepts_iff_valid() {
    let coding = coding_by_name("utf-8").unwrap();
    assert!(Converter::decode_bytes(coding.clone(), &[0x41, 0xFF, 0x42], false).is_err());
    let ok = Converter::decode_bytes(coding, "あい".as_bytes(), false).unwrap();
    assert_eq!(ok.to_string_lossy(), "あい");
}

#[test]
fn utf16_bom_matrix() {
    let coding = coding_by_name("utf-16").unwrap();
    let bom_be = Converter::decode_bytes(coding.clone(), &[0xFE, 0xFF, 0x00, 0x41, 0x00, 0x42], false)
        .unwrap();
    assert_eq!(bom_be.to_string_lossy(), "AB");
    let bom_le = Converter::decode_bytes(coding.clone(), &[0xFF, 0xFE, 0x41, 0x00, 0x42, 0x00], false)
        .unwrap();
    assert_eq!(bom_le.to_string_lossy(), "AB");
    // No BOM with bom=maybe defaults to big endian.
    let plain = Converter::decode_bytes(coding, &[0x00, 0x41, 0x00, 0x42], false).unwrap();
    assert_eq!(plain.to_string_lossy(), "AB");
}

#[test]
fn shift_jis_hiragana() {
    register_jisx0208_rows();
    let coding = coding_by_name("sjis").unwrap();
    let text = Converter::decode_bytes(coding.clone(), &[0x82, 0xA0], false).unwrap();
    assert_eq!(text.to_string_lossy(), "あ");
    let bytes = Converter::encode_mtext(coding, &MText::from_str("あ"), false).unwrap();
    assert_eq!(bytes, vec![0x82, 0xA0]);
}

#[test]
fn iso_2022_jp_designations() {
    register_jisx0208_rows();
    let coding = coding_by_name("iso-2022-jp").unwrap();
    let wire = [0x1B, 0x24, 0x42, 0x24, 0x22, 0x1B, 0x28, 0x42, 0x41];
    let text = Converter::decode_bytes(coding.clone(), &wire, false).unwrap();
    assert_eq!(text.to_string_lossy(), "あA");
    let bytes = Converter::encode_mtext(coding, &MText::from_str("あA"), false).unwrap();
    assert_eq!(bytes.as_slice(), &wire);
}

#[test]
fn iso_2022_escape_split_across_blocks() {
    register_jisx0208_rows();
    let coding = coding_by_name("iso-2022-jp").unwrap();
    let wire = [0x1B, 0x24, 0x42, 0x24, 0x22, 0x1B, 0x28, 0x42, 0x41];
    // Split inside the designation escape and inside the two-byte char.
    for cut in 1..wire.len() {
        let mut conv = Converter::on_bytes(coding.clone(), wire[..cut].to_vec()).unwrap();
        conv.set_last_block(false);
        let mut out = MText::new();
        conv.decode(&mut out).unwrap();
        // Unconsumed prefix bytes wait in the carry-over.
        assert_eq!(conv.nbytes() + conv.carryover().len(), cut);
        conv.set_last_block(true);
        conv.rebind_buffer(wire[cut..].to_vec());
        conv.decode(&mut out).unwrap();
        assert_eq!(out.to_string_lossy(), "あA", "cut at {}", cut);
        assert_eq!(conv.nbytes(), wire.len());
    }
}

#[test]
fn lenient_utf8_passthrough() {
    let coding = coding_by_name("utf-8").unwrap();
    let text = Converter::decode_bytes(coding, &[0x41, 0xFF, 0x42], true).unwrap();
    assert_eq!(text.len(), 3);
    assert_eq!(text.code_at(0), Some(0x41));
    assert_eq!(text.code_at(1), Some(0xFF));
    assert_eq!(text.code_at(2), Some(0x42));
    let binary = Symbol::intern("binary");
    assert_eq!(
        text.get_prop(1, Symbol::intern("charset")),
        Some(&Value::Symbol(binary))
    );
    assert_ne!(
        text.get_prop(0, Symbol::intern("charset")),
        Some(&Value::Symbol(binary))
    );
}

#[test]
fn lenient_encode_substitutes() {
    let coding = coding_by_name("us-ascii").unwrap();
    let bytes = Converter::encode_mtext(coding, &MText::from_str("Aé"), true).unwrap();
    assert_eq!(bytes, b"A<U+00E9>".to_vec());
}

#[test]
fn carry_over_resumes_across_rebinds() {
    let coding = coding_by_name("utf-8").unwrap();
    let mut conv = Converter::on_bytes(coding, vec![0x68, 0xC3]).unwrap();
    conv.set_last_block(false);
    let mut out = MText::new();
    let n = conv.decode(&mut out).unwrap();
    assert_eq!(n, 1);
    assert_eq!(conv.last_result(), ConvResult::InsufficientSrc);
    assert_eq!(conv.carryover(), &[0xC3]);
    assert_eq!(conv.nbytes(), 1);

    conv.set_last_block(true);
    conv.rebind_buffer(vec![0xA9, 0x6C]);
    let n = conv.decode(&mut out).unwrap();
    assert_eq!(n, 2);
    assert_eq!(out.to_string_lossy(), "hél");
    assert_eq!(conv.nbytes(), 4);
    assert_eq!(conv.nchars(), 3);
}

#[test]
fn strict_truncated_tail_errors_at_last_block() {
    let coding = coding_by_name("utf-8").unwrap();
    let mut conv = Converter::on_bytes(coding, vec![0x41, 0xC3]).unwrap();
    let mut out = MText::new();
    assert!(conv.decode(&mut out).is_err());
    assert_eq!(conv.last_result(), ConvResult::InsufficientSrc);
    assert_eq!(out.to_string_lossy(), "A");
}

#[test]
fn at_most_caps_each_call() {
    let coding = coding_by_name("utf-8").unwrap();
    let mut conv = Converter::on_bytes(coding, b"abcd".to_vec()).unwrap();
    conv.set_at_most(Some(2));
    let mut out = MText::new();
    assert_eq!(conv.decode(&mut out).unwrap(), 2);
    assert_eq!(out.to_string_lossy(), "ab");
    assert_eq!(conv.decode(&mut out).unwrap(), 2);
    assert_eq!(out.to_string_lossy(), "abcd");
}

#[test]
fn getc_ungetc_gets() {
    let coding = coding_by_name("utf-8").unwrap();
    let mut conv = Converter::on_bytes(coding, "hé\nwo".as_bytes().to_vec()).unwrap();
    assert_eq!(conv.getc().unwrap(), Some('h' as u32));
    conv.ungetc('h' as u32);
    let line = conv.gets().unwrap().unwrap();
    assert_eq!(line.to_string_lossy(), "hé\n");
    let rest = conv.gets().unwrap().unwrap();
    assert_eq!(rest.to_string_lossy(), "wo");
    assert!(conv.gets().unwrap().is_none());
}

#[test]
fn insufficient_dst_on_capped_buffer() {
    let coding = coding_by_name("utf-8").unwrap();
    let mut conv = Converter::for_encoding(coding).unwrap();
    conv.set_buffer_cap(Some(2));
    let text = MText::from_str("abc");
    assert!(conv.encode(&text, 0, 3).is_err());
    assert_eq!(conv.last_result(), ConvResult::InsufficientDst);
}

#[test]
fn stream_decoding_reads_to_eof() {
    let coding = coding_by_name("utf-8").unwrap();
    let data = "héllo wörld".as_bytes().to_vec();
    let mut conv = Converter::on_reader(coding, Box::new(std::io::Cursor::new(data))).unwrap();
    let mut out = MText::new();
    conv.decode(&mut out).unwrap();
    assert_eq!(out.to_string_lossy(), "héllo wörld");
}

#[test]
fn reset_clears_state_and_counters() {
    let coding = coding_by_name("utf-16").unwrap();
    let mut conv = Converter::on_bytes(coding, vec![0xFF, 0xFE, 0x41, 0x00]).unwrap();
    let mut out = MText::new();
    conv.decode(&mut out).unwrap();
    assert_eq!(out.to_string_lossy(), "A");
    conv.reset();
    assert_eq!(conv.nchars(), 0);
    assert_eq!(conv.nbytes(), 0);
    // After reset the BOM state is back to sniffing; big endian again.
    conv.rebind_buffer(vec![0x00, 0x42]);
    let mut out2 = MText::new();
    conv.decode(&mut out2).unwrap();
    assert_eq!(out2.to_string_lossy(), "B");
}

#[test]
fn coding_property_attached() {
    let coding = coding_by_name("utf-8").unwrap();
    let text = Converter::decode_bytes(coding, b"hi", false).unwrap();
    assert_eq!(
        text.get_prop(0, Symbol::intern("coding")),
        Some(&Value::Symbol(Symbol::intern("utf-8")))
    );
}

#[test]
fn charset_list_round_trip_identity() {
    let coding = coding_by_name("iso-8859-1").unwrap();
    let original = MText::from_str("café au lait ★ ok");
    // The star is outside Latin-1; restrict to an encodable slice.
    let original = {
        let mut t = MText::new();
        for &c in original.codes().iter().filter(|&&c| c <= 0xFF) {
            t.push_code(c);
        }
        t
    };
    let bytes = Converter::encode_mtext(coding.clone(), &original, false).unwrap();
    let back = Converter::decode_bytes(coding, &bytes, false).unwrap();
    assert_eq!(back.codes(), original.codes());
}
