//! Shift-JIS codec.
//!
//! A fixed three-charset codec: JIS X 0201 Roman for the 7-bit plane,
//! JIS X 0208 for the two-byte plane (lead 0x81..0x9F / 0xE0..0xEF)
//! and JIS X 0201 Kana for 0xA1..0xDF. The lead/trail arithmetic is
//! the standard shift arithmetic between SJIS and JIS code points.

use crate::{Codec, DecodeCtl, EncodeCtl, Flow};
use libmtext_core::charset::{self, Charset};
use libmtext_core::error::{Error, Result};
use libmtext_core::mtext::MText;
use libmtext_core::symbol::Symbol;
use std::sync::Arc;

/// SJIS lead/trail to the packed JIS code `(j1 << 8) | j2`.
fn sjis_to_jis(s1: u8, s2: u8) -> u32 {
    let (s1, s2) = (s1 as u32, s2 as u32);
    if s2 >= 0x9F {
        let j1 = s1 * 2 - if s1 >= 0xE0 { 0x160 } else { 0xE0 };
        let j2 = s2 - 0x7E;
        (j1 << 8) | j2
    } else {
        let j1 = s1 * 2 - if s1 >= 0xE0 { 0x161 } else { 0xE1 };
        let j2 = s2 - 0x1F - if s2 >= 0x7F { 1 } else { 0 };
        (j1 << 8) | j2
    }
}

/// Packed JIS code to the SJIS byte pair.
fn jis_to_sjis(code: u32) -> (u8, u8) {
    let j1 = (code >> 8) & 0xFF;
    let j2 = code & 0xFF;
    let s1 = (j1 + 1) / 2 + if j1 < 0x5F { 0x70 } else { 0xB0 };
    let s2 = if j1 % 2 == 1 {
        j2 + 0x1F + if j2 >= 0x60 { 1 } else { 0 }
    } else {
        j2 + 0x7E
    };
    (s1 as u8, s2 as u8)
}

pub struct ShiftJisCodec {
    roman: Arc<Charset>,
    jisx0208: Arc<Charset>,
    kana: Arc<Charset>,
}

impl ShiftJisCodec {
    pub fn new() -> Result<Self> {
        let get = |name: &str| {
            charset::charset(Symbol::intern(name))
                .ok_or_else(|| Error::Coding(format!("shift-jis needs charset {}", name)))
        };
        Ok(ShiftJisCodec {
            roman: get("latin-jisx0201")?,
            jisx0208: get("japanese-jisx0208")?,
            kana: get("japanese-jisx0201-kana")?,
        })
    }
}

impl Codec for ShiftJisCodec {
    fn reset(&mut self) {}

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let mut i = 0;
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            let b = src[i];
            match b {
                0x00..=0x7F => {
                    match self.roman.decode_char(b as u32) {
                        Some(ch) => ctl.emit(out, ch, self.roman.name),
                        // Controls and space sit outside the 94-char set.
                        None => ctl.emit(out, b as u32, Symbol::intern("ascii")),
                    }
                    i += 1;
                }
                0xA1..=0xDF => {
                    match self.kana.decode_char((b - 0x80) as u32) {
                        Some(ch) => ctl.emit(out, ch, self.kana.name),
                        None => {
                            if ctl.lenient {
                                ctl.emit_binary(out, b);
                            } else {
                                return (i, Flow::Invalid);
                            }
                        }
                    }
                    i += 1;
                }
                0x81..=0x9F | 0xE0..=0xEF => {
                    if i + 1 >= src.len() {
                        if ctl.last_block && ctl.lenient {
                            ctl.emit_binary(out, b);
                            i += 1;
                            continue;
                        }
                        return (i, Flow::NeedMore);
                    }
                    let trail = src[i + 1];
                    let valid_trail = matches!(trail, 0x40..=0x7E | 0x80..=0xFC);
                    let decoded = if valid_trail {
                        self.jisx0208.decode_char(sjis_to_jis(b, trail))
                    } else {
                        None
                    };
                    match decoded {
                        Some(ch) => {
                            ctl.emit(out, ch, self.jisx0208.name);
                            i += 2;
                        }
                        None => {
                            if ctl.lenient {
                                ctl.emit_binary(out, b);
                                i += 1;
                            } else {
                                return (i, Flow::Invalid);
                            }
                        }
                    }
                }
                _ => {
                    if ctl.lenient {
                        ctl.emit_binary(out, b);
                        i += 1;
                    } else {
                        return (i, Flow::Invalid);
                    }
                }
            }
        }
        (i, Flow::Done)
    }

    fn encode(
        &mut self,
        src: &MText,
        from: usize,
        to: usize,
        out: &mut Vec<u8>,
        ctl: &mut EncodeCtl,
    ) -> (usize, Flow) {
        for pos in from..to {
            let ch = src.code_at(pos).unwrap_or(0);
            if ch < 0x21 || ch == 0x7F {
                // Controls and space pass through.
                out.push(ch as u8);
                continue;
            }
            if let Some(code) = self.roman.encode_char(ch) {
                out.push(code as u8);
                continue;
            }
            if ch < 0x80 {
                out.push(ch as u8);
                continue;
            }
            if let Some(code) = self.kana.encode_char(ch) {
                out.push((code + 0x80) as u8);
                continue;
            }
            if let Some(code) = self.jisx0208.encode_char(ch) {
                let (s1, s2) = jis_to_sjis(code);
                out.push(s1);
                out.push(s2);
                continue;
            }
            if ctl.lenient {
                ctl.encode_sub(out, ch);
                continue;
            }
            return (pos - from, Flow::Invalid);
        }
        (to - from, Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_arithmetic_round_trips() {
        // あ: JIS 0x2422 <-> SJIS 82 A0
        assert_eq!(sjis_to_jis(0x82, 0xA0), 0x2422);
        assert_eq!(jis_to_sjis(0x2422), (0x82, 0xA0));
        // Odd first byte with a low trail.
        assert_eq!(sjis_to_jis(0x82, 0x75), 0x2356);
        assert_eq!(jis_to_sjis(0x2356), (0x82, 0x75));
        // High plane (lead >= 0xE0).
        let jis = sjis_to_jis(0xE0, 0x9F);
        assert_eq!(jis_to_sjis(jis), (0xE0, 0x9F));
    }

    #[test]
    fn exhaustive_pairs_survive_both_shifts() {
        for lead in (0x81u8..=0x9F).chain(0xE0..=0xEF) {
            for trail in (0x40u8..=0x7E).chain(0x80..=0xFC) {
                let jis = sjis_to_jis(lead, trail);
                assert_eq!(
                    jis_to_sjis(jis),
                    (lead, trail),
                    "lead {:02X} trail {:02X} via jis {:04X}",
                    lead,
                    trail,
                    jis
                );
            }
        }
    }

    #[test]
    fn kana_bytes_decode() {
        let mut codec = ShiftJisCodec::new().unwrap();
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        // ｱ is SJIS 0xB1.
        let (used, flow) = codec.decode(&[0xB1], &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (1, Flow::Done));
        assert_eq!(out.code_at(0), Some(0xFF71));
    }

    #[test]
    fn yen_sign_maps_to_5c() {
        let mut codec = ShiftJisCodec::new().unwrap();
        let mut bytes = Vec::new();
        let mut text = MText::new();
        text.push_code(0xA5);
        let mut ctl = EncodeCtl::new(false);
        let (n, flow) = codec.encode(&text, 0, 1, &mut bytes, &mut ctl);
        assert_eq!((n, flow), (1, Flow::Done));
        assert_eq!(bytes, vec![0x5C]);
    }
}
