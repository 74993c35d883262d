//! UTF-8, UTF-16 and UTF-32 codecs.
//!
//! Endianness for the wide forms follows the BOM mode: `maybe` sniffs
//! a BOM and otherwise defaults to big endian; `no` trusts the
//! configured endian and never consumes a BOM; `yes` sniffs like
//! `maybe` but falls back to the configured endian. Surrogate code
//! points and values beyond U+10FFFF are invalid unless the coding
//! system is declared full-range.

use crate::{BomMode, Codec, DecodeCtl, Endian, EncodeCtl, Flow, UtfInfo};
use libmtext_core::mtext::MText;
use libmtext_core::symbol::Symbol;

pub fn make_codec(info: UtfInfo) -> Box<dyn Codec> {
    match info.code_unit_bits {
        16 => Box::new(Utf16Codec::new(info)),
        32 => Box::new(Utf32Codec::new(info)),
        _ => Box::new(Utf8Codec::new(info)),
    }
}

fn scalar_ok(code: u32, full_range: bool) -> bool {
    full_range || (code <= 0x10FFFF && !(0xD800..=0xDFFF).contains(&code))
}

// ---- UTF-8 ----------------------------------------------------------

pub struct Utf8Codec {
    info: UtfInfo,
    bom_checked: bool,
    encode_started: bool,
    cs: Symbol,
}

impl Utf8Codec {
    pub fn new(info: UtfInfo) -> Self {
        Utf8Codec {
            info,
            bom_checked: false,
            encode_started: false,
            cs: Symbol::intern("unicode"),
        }
    }
}

/// Continuation count and minimum code for a lead byte.
fn utf8_lead(b: u8) -> Option<(usize, u32)> {
    match b {
        0x00..=0x7F => Some((0, 0)),
        0xC0..=0xDF => Some((1, 0x80)),
        0xE0..=0xEF => Some((2, 0x800)),
        0xF0..=0xF7 => Some((3, 0x10000)),
        0xF8..=0xFB => Some((4, 0x200000)),
        0xFC..=0xFD => Some((5, 0x4000000)),
        _ => None,
    }
}

pub(crate) fn push_utf8(out: &mut Vec<u8>, code: u32) {
    if code < 0x80 {
        out.push(code as u8);
    } else if code < 0x800 {
        out.push(0xC0 | (code >> 6) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x10000 {
        out.push(0xE0 | (code >> 12) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x200000 {
        out.push(0xF0 | (code >> 18) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x4000000 {
        out.push(0xF8 | (code >> 24) as u8);
        out.push(0x80 | ((code >> 18) & 0x3F) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else {
        out.push(0xFC | (code >> 30) as u8);
        out.push(0x80 | ((code >> 24) & 0x3F) as u8);
        out.push(0x80 | ((code >> 18) & 0x3F) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    }
}

/// Decode one UTF-8 sequence starting at `i`. `Ok(Some)` is
/// (code, length); `Ok(None)` wants more input; `Err` is invalid.
pub(crate) fn pull_utf8(src: &[u8], i: usize, full_range: bool) -> Result<Option<(u32, usize)>, ()> {
    let b = src[i];
    let Some((ncont, min)) = utf8_lead(b) else {
        return Err(());
    };
    if ncont == 0 {
        return Ok(Some((b as u32, 1)));
    }
    if i + ncont >= src.len() {
        return Ok(None);
    }
    let mut code = (b as u32) & (0x7F >> ncont);
    for k in 1..=ncont {
        let c = src[i + k];
        if c & 0xC0 != 0x80 {
            return Err(());
        }
        code = (code << 6) | (c & 0x3F) as u32;
    }
    if code < min || !scalar_ok(code, full_range) {
        return Err(());
    }
    Ok(Some((code, ncont + 1)))
}

impl Codec for Utf8Codec {
    fn reset(&mut self) {
        self.bom_checked = false;
        self.encode_started = false;
    }

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let mut i = 0;
        if !self.bom_checked && self.info.bom != BomMode::No {
            if src.len() < 3 && !ctl.last_block && src.starts_with(&[0xEF, 0xBB, 0xBF][..src.len()])
            {
                return (0, Flow::NeedMore);
            }
            if src.starts_with(&[0xEF, 0xBB, 0xBF]) {
                i = 3;
            }
            self.bom_checked = true;
        }
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            match pull_utf8(src, i, self.info.full_range) {
                Ok(Some((code, len))) => {
                    ctl.emit(out, code, self.cs);
                    i += len;
                }
                Ok(None) => {
                    if ctl.last_block && ctl.lenient {
                        ctl.emit_binary(out, src[i]);
                        i += 1;
                    } else {
                        return (i, Flow::NeedMore);
                    }
                }
                Err(()) => {
                    if ctl.lenient {
                        ctl.emit_binary(out, src[i]);
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
        if !self.encode_started {
            self.encode_started = true;
            if self.info.bom == BomMode::Yes {
                out.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
            }
        }
        for pos in from..to {
            let code = src.code_at(pos).unwrap_or(0);
            if !scalar_ok(code, self.info.full_range) {
                if ctl.lenient {
                    ctl.encode_sub(out, code);
                    continue;
                }
                return (pos - from, Flow::Invalid);
            }
            push_utf8(out, code);
        }
        (to - from, Flow::Done)
    }
}

// ---- UTF-16 ---------------------------------------------------------

pub struct Utf16Codec {
    info: UtfInfo,
    endian: Endian,
    bom_checked: bool,
    encode_started: bool,
    cs: Symbol,
}

impl Utf16Codec {
    pub fn new(info: UtfInfo) -> Self {
        Utf16Codec {
            info,
            endian: info.endian,
            bom_checked: info.bom == BomMode::No,
            encode_started: false,
            cs: Symbol::intern("unicode"),
        }
    }

    fn unit(&self, src: &[u8], i: usize) -> u32 {
        match self.endian {
            Endian::Big => ((src[i] as u32) << 8) | src[i + 1] as u32,
            Endian::Little => ((src[i + 1] as u32) << 8) | src[i] as u32,
        }
    }

    fn push_unit(&self, out: &mut Vec<u8>, unit: u16) {
        match self.endian {
            Endian::Big => out.extend_from_slice(&unit.to_be_bytes()),
            Endian::Little => out.extend_from_slice(&unit.to_le_bytes()),
        }
    }
}

impl Codec for Utf16Codec {
    fn reset(&mut self) {
        self.endian = self.info.endian;
        self.bom_checked = self.info.bom == BomMode::No;
        self.encode_started = false;
    }

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let mut i = 0;
        if !self.bom_checked {
            // Sniffing wants two code units of lookahead before deciding.
            if src.len() < 4 && !ctl.last_block {
                return (0, Flow::NeedMore);
            }
            if src.len() >= 2 {
                if src[0] == 0xFE && src[1] == 0xFF {
                    self.endian = Endian::Big;
                    i = 2;
                } else if src[0] == 0xFF && src[1] == 0xFE {
                    self.endian = Endian::Little;
                    i = 2;
                } else {
                    self.endian = match self.info.bom {
                        BomMode::Yes => self.info.endian,
                        _ => Endian::Big,
                    };
                }
            }
            self.bom_checked = true;
        }
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            if i + 2 > src.len() {
                if ctl.last_block && ctl.lenient {
                    ctl.emit_binary(out, src[i]);
                    i += 1;
                    continue;
                }
                return (i, Flow::NeedMore);
            }
            let u = self.unit(src, i);
            if (0xD800..=0xDBFF).contains(&u) {
                if i + 4 > src.len() {
                    if ctl.last_block && ctl.lenient {
                        ctl.emit_binary(out, src[i]);
                        i += 1;
                        continue;
                    }
                    return (i, Flow::NeedMore);
                }
                let lo = self.unit(src, i + 2);
                if (0xDC00..=0xDFFF).contains(&lo) {
                    let code = 0x10000 + (u - 0xD800) * 0x400 + (lo - 0xDC00);
                    ctl.emit(out, code, self.cs);
                    i += 4;
                    continue;
                }
                if ctl.lenient {
                    ctl.emit_binary(out, src[i]);
                    ctl.emit_binary(out, src[i + 1]);
                    i += 2;
                    continue;
                }
                return (i, Flow::Invalid);
            }
            if (0xDC00..=0xDFFF).contains(&u) {
                if ctl.lenient {
                    ctl.emit_binary(out, src[i]);
                    ctl.emit_binary(out, src[i + 1]);
                    i += 2;
                    continue;
                }
                return (i, Flow::Invalid);
            }
            ctl.emit(out, u, self.cs);
            i += 2;
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
        if !self.encode_started {
            self.encode_started = true;
            if self.info.bom != BomMode::No {
                self.push_unit(out, 0xFEFF);
            }
        }
        for pos in from..to {
            let code = src.code_at(pos).unwrap_or(0);
            if !scalar_ok(code, false) {
                if ctl.lenient {
                    ctl.encode_sub(out, code);
                    continue;
                }
                return (pos - from, Flow::Invalid);
            }
            if code < 0x10000 {
                self.push_unit(out, code as u16);
            } else {
                let v = code - 0x10000;
                self.push_unit(out, (0xD800 + (v >> 10)) as u16);
                self.push_unit(out, (0xDC00 + (v & 0x3FF)) as u16);
            }
        }
        (to - from, Flow::Done)
    }
}

// ---- UTF-32 ---------------------------------------------------------

pub struct Utf32Codec {
    info: UtfInfo,
    endian: Endian,
    bom_checked: bool,
    encode_started: bool,
    cs: Symbol,
}

impl Utf32Codec {
    pub fn new(info: UtfInfo) -> Self {
        Utf32Codec {
            info,
            endian: info.endian,
            bom_checked: info.bom == BomMode::No,
            encode_started: false,
            cs: Symbol::intern("unicode"),
        }
    }

    fn unit(&self, src: &[u8], i: usize) -> u32 {
        let b = [src[i], src[i + 1], src[i + 2], src[i + 3]];
        match self.endian {
            Endian::Big => u32::from_be_bytes(b),
            Endian::Little => u32::from_le_bytes(b),
        }
    }

    fn push_unit(&self, out: &mut Vec<u8>, unit: u32) {
        match self.endian {
            Endian::Big => out.extend_from_slice(&unit.to_be_bytes()),
            Endian::Little => out.extend_from_slice(&unit.to_le_bytes()),
        }
    }
}

impl Codec for Utf32Codec {
    fn reset(&mut self) {
        self.endian = self.info.endian;
        self.bom_checked = self.info.bom == BomMode::No;
        self.encode_started = false;
    }

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let mut i = 0;
        if !self.bom_checked {
            if src.len() < 4 && !ctl.last_block {
                return (0, Flow::NeedMore);
            }
            if src.len() >= 4 {
                if src[..4] == [0x00, 0x00, 0xFE, 0xFF] {
                    self.endian = Endian::Big;
                    i = 4;
                } else if src[..4] == [0xFF, 0xFE, 0x00, 0x00] {
                    self.endian = Endian::Little;
                    i = 4;
                } else {
                    self.endian = match self.info.bom {
                        BomMode::Yes => self.info.endian,
                        _ => Endian::Big,
                    };
                }
            }
            self.bom_checked = true;
        }
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            if i + 4 > src.len() {
                if ctl.last_block && ctl.lenient {
                    ctl.emit_binary(out, src[i]);
                    i += 1;
                    continue;
                }
                return (i, Flow::NeedMore);
            }
            let u = self.unit(src, i);
            if !scalar_ok(u, self.info.full_range) {
                if ctl.lenient {
                    for k in 0..4 {
                        ctl.emit_binary(out, src[i + k]);
                    }
                    i += 4;
                    continue;
                }
                return (i, Flow::Invalid);
            }
            ctl.emit(out, u, self.cs);
            i += 4;
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
        if !self.encode_started {
            self.encode_started = true;
            if self.info.bom != BomMode::No {
                self.push_unit(out, 0xFEFF);
            }
        }
        for pos in from..to {
            let code = src.code_at(pos).unwrap_or(0);
            if !scalar_ok(code, self.info.full_range) {
                if ctl.lenient {
                    ctl.encode_sub(out, code);
                    continue;
                }
                return (pos - from, Flow::Invalid);
            }
            self.push_unit(out, code);
        }
        (to - from, Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BomMode, Endian, UtfInfo};

    fn info8() -> UtfInfo {
        UtfInfo {
            code_unit_bits: 8,
            bom: BomMode::No,
            endian: Endian::Big,
            full_range: false,
        }
    }

    fn run_decode(codec: &mut dyn Codec, bytes: &[u8], lenient: bool) -> (MText, Flow, usize) {
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(lenient, true, None);
        let (used, flow) = codec.decode(bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        (out, flow, used)
    }

    #[test]
    fn utf8_basic_round_trip() {
        let mut codec = Utf8Codec::new(info8());
        let (out, flow, used) = run_decode(&mut codec, "héllo".as_bytes(), false);
        assert_eq!(flow, Flow::Done);
        assert_eq!(used, 6);
        assert_eq!(out.to_string_lossy(), "héllo");

        let mut bytes = Vec::new();
        let mut ctl = EncodeCtl::new(false);
        let (n, flow) = codec.encode(&MText::from_str("héllo"), 0, 5, &mut bytes, &mut ctl);
        assert_eq!((n, flow), (5, Flow::Done));
        assert_eq!(bytes, "héllo".as_bytes());
    }

    #[test]
    fn utf8_rejects_overlong_and_surrogates() {
        let mut codec = Utf8Codec::new(info8());
        let (_, flow, _) = run_decode(&mut codec, &[0xC0, 0xAF], false);
        assert_eq!(flow, Flow::Invalid);
        codec.reset();
        // U+D800 encoded directly.
        let (_, flow, _) = run_decode(&mut codec, &[0xED, 0xA0, 0x80], false);
        assert_eq!(flow, Flow::Invalid);
    }

    #[test]
    fn utf8_incomplete_tail_wants_more() {
        let mut codec = Utf8Codec::new(info8());
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, false, None);
        let (used, flow) = codec.decode(&[0x41, 0xC3], &mut out, &mut ctl);
        assert_eq!(used, 1);
        assert_eq!(flow, Flow::NeedMore);
    }

    #[test]
    fn utf16_surrogate_pairs() {
        let info = UtfInfo {
            code_unit_bits: 16,
            bom: BomMode::No,
            endian: Endian::Big,
            full_range: false,
        };
        let mut codec = Utf16Codec::new(info);
        // U+1F600 = D83D DE00
        let (out, flow, _) = run_decode(&mut codec, &[0xD8, 0x3D, 0xDE, 0x00], false);
        assert_eq!(flow, Flow::Done);
        assert_eq!(out.code_at(0), Some(0x1F600));

        let mut bytes = Vec::new();
        let mut text = MText::new();
        text.push_code(0x1F600);
        let mut ctl = EncodeCtl::new(false);
        codec.encode(&text, 0, 1, &mut bytes, &mut ctl);
        assert_eq!(bytes, vec![0xD8, 0x3D, 0xDE, 0x00]);
    }

    #[test]
    fn utf16_unpaired_surrogate_is_invalid() {
        let info = UtfInfo {
            code_unit_bits: 16,
            bom: BomMode::No,
            endian: Endian::Big,
            full_range: false,
        };
        let mut codec = Utf16Codec::new(info);
        let (_, flow, _) = run_decode(&mut codec, &[0xD8, 0x3D, 0x00, 0x41], false);
        assert_eq!(flow, Flow::Invalid);
    }

    #[test]
    fn utf32_bom_sniffing() {
        let info = UtfInfo {
            code_unit_bits: 32,
            bom: BomMode::Maybe,
            endian: Endian::Big,
            full_range: false,
        };
        let mut codec = Utf32Codec::new(info);
        let (out, flow, _) = run_decode(
            &mut codec,
            &[0xFF, 0xFE, 0x00, 0x00, 0x41, 0x00, 0x00, 0x00],
            false,
        );
        assert_eq!(flow, Flow::Done);
        assert_eq!(out.to_string_lossy(), "A");
    }
}
