//! The ISO-2022 family: designation registers, locking and single
//! shifts, revision numbers, compound-text segments, EUC-TW plane
//! shifts and the ISO-6429 direction sequence.
//!
//! Four designation registers G0..G3 hold charsets; GL and GR each
//! invoke one register. Escape sequences move charsets into registers
//! and registers onto planes; graphic bytes then decode through the
//! charset invoked on their plane. The encoder emits the minimum
//! escape sequence needed to make the target charset reachable,
//! honoring each charset's designation policy and the coding system's
//! flag set.
//!
//! The ISO-6429 direction sequence only records the R2L flag on the
//! codec status; it is not propagated into the produced text, matching
//! the reference behavior.

use crate::utf::{pull_utf8, push_utf8};
use crate::{iso_flags::*, Codec, CodingSystem, DecodeCtl, EncodeCtl, Flow, Iso2022Info};
use libmtext_core::charset::{self, Charset};
use libmtext_core::error::{Error, Result};
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use std::sync::Arc;
use tracing::debug;

const ESC: u8 = 0x1B;
const SO: u8 = 0x0E;
const SI: u8 = 0x0F;
const SS2_7: u8 = 0x19;
const SS2_8: u8 = 0x8E;
const SS3_8: u8 = 0x8F;
const CSI_8: u8 = 0x9B;
const STX: u8 = 0x02;

#[derive(Clone)]
struct Registers {
    /// G0..G3.
    designation: [Option<Arc<Charset>>; 4],
    /// GL and GR, each naming an invoked register.
    invocation: [Option<usize>; 2],
}

pub struct Iso2022Codec {
    coding: Arc<CodingSystem>,
    info: Iso2022Info,
    initial: Registers,
    dec: Registers,
    enc: Registers,
    single_shift: Option<usize>,
    pending_revision: Option<u8>,
    /// Set by the ISO-6429 direction sequence; informational only.
    pub r2l: bool,
}

enum Step {
    Advance(usize),
    NeedMore,
    Invalid,
}

impl Iso2022Codec {
    pub fn new(coding: &Arc<CodingSystem>) -> Result<Self> {
        let info = coding
            .iso
            .clone()
            .ok_or_else(|| Error::Coding(format!("coding {} lacks ISO-2022 info", coding.name)))?;
        let mut initial = Registers {
            designation: [None, None, None, None],
            invocation: [None, None],
        };
        for (k, &d) in info.designation.iter().enumerate() {
            if (0..=3).contains(&d) {
                initial.designation[d as usize] = Some(coding.charsets[k].clone());
            }
        }
        for plane in 0..2 {
            let inv = info.initial_invocation[plane];
            if (0..=3).contains(&inv) {
                initial.invocation[plane] = Some(inv as usize);
            }
        }
        Ok(Iso2022Codec {
            coding: coding.clone(),
            info,
            dec: initial.clone(),
            enc: initial.clone(),
            initial,
            single_shift: None,
            pending_revision: None,
            r2l: false,
        })
    }

    fn flag(&self, bit: u32) -> bool {
        self.info.flags & bit != 0
    }

    /// Map a stream byte into the charset's range at byte position `pos`.
    fn adjust_byte(cs: &Charset, b: u8, pos: usize) -> u8 {
        if cs.min_range[pos] >= 0x80 {
            b | 0x80
        } else {
            b & 0x7F
        }
    }

    /// Decode a multi-byte graphic character through `cs`, starting at
    /// `i`. `gr_range` constrains continuation bytes.
    fn graphic_char(
        &self,
        cs: &Arc<Charset>,
        src: &[u8],
        i: usize,
        gr: bool,
        out: &mut MText,
        ctl: &mut DecodeCtl,
    ) -> Step {
        let dim = cs.dimension;
        if i + dim > src.len() {
            if ctl.last_block && ctl.lenient {
                ctl.emit_binary(out, src[i]);
                return Step::Advance(1);
            }
            return Step::NeedMore;
        }
        let mut code = 0u32;
        for j in 0..dim {
            let b = src[i + j];
            let graphic = if gr {
                (0xA0..=0xFF).contains(&b)
            } else {
                (0x20..=0x7F).contains(&b)
            };
            if !graphic {
                return Step::Invalid;
            }
            let pos = dim - 1 - j;
            code |= (Self::adjust_byte(cs, b, pos) as u32) << (8 * pos);
        }
        match cs.decode_char(code) {
            Some(ch) => {
                ctl.emit(out, ch, cs.name);
                Step::Advance(dim)
            }
            None => Step::Invalid,
        }
    }

    /// Reset registers to the coding system's initial state.
    fn reset_registers(reg: &mut Registers, initial: &Registers) {
        *reg = initial.clone();
    }

    // ---- escape sequences (decode side) -----------------------------

    /// Interpret the escape sequence at `i` (src[i] == ESC).
    fn escape(&mut self, src: &[u8], i: usize, out: &mut MText, ctl: &mut DecodeCtl) -> Step {
        let Some(&b1) = src.get(i + 1) else {
            return Step::NeedMore;
        };
        match b1 {
            b'$' => {
                let Some(&b2) = src.get(i + 2) else {
                    return Step::NeedMore;
                };
                match b2 {
                    0x40..=0x42 => self.designate(b2, 0, 2, false, i, 3),
                    0x28..=0x2F => {
                        let Some(&fin) = src.get(i + 3) else {
                            return Step::NeedMore;
                        };
                        let reg = ((b2 - 0x28) % 4) as usize;
                        self.designate(fin, reg, 2, b2 >= 0x2C, i, 4)
                    }
                    _ => Step::Invalid,
                }
            }
            0x28..=0x2F => {
                let Some(&fin) = src.get(i + 2) else {
                    return Step::NeedMore;
                };
                let reg = ((b1 - 0x28) % 4) as usize;
                self.designate(fin, reg, 1, b1 >= 0x2C, i, 3)
            }
            b'N' => {
                self.single_shift = Some(2);
                Step::Advance(2)
            }
            b'O' => {
                self.single_shift = Some(3);
                Step::Advance(2)
            }
            b'n' => {
                self.dec.invocation[0] = Some(2);
                Step::Advance(2)
            }
            b'o' => {
                self.dec.invocation[0] = Some(3);
                Step::Advance(2)
            }
            b'&' => {
                let Some(&rev) = src.get(i + 2) else {
                    return Step::NeedMore;
                };
                if !(0x40..=0x7E).contains(&rev) {
                    return Step::Invalid;
                }
                self.pending_revision = Some(rev - 0x40);
                Step::Advance(3)
            }
            b'%' => {
                let Some(&b2) = src.get(i + 2) else {
                    return Step::NeedMore;
                };
                match b2 {
                    b'G' => self.utf8_segment(src, i, out, ctl),
                    b'/' => self.extended_segment(src, i, out, ctl),
                    b'@' => Step::Advance(3), // stray terminator
                    _ => Step::Invalid,
                }
            }
            b'[' => self.csi(src, i + 2, 2, out),
            _ => Step::Invalid,
        }
    }

    fn designate(
        &mut self,
        fin: u8,
        reg: usize,
        dimension: usize,
        chars96: bool,
        _i: usize,
        len: usize,
    ) -> Step {
        if !(0x30..=0x7E).contains(&fin) {
            return Step::Invalid;
        }
        let revision = self.pending_revision.take();
        match charset::charset_by_final(fin, dimension, chars96, revision) {
            Some(cs) => {
                if !self.designation_allowed(&cs, reg) {
                    return Step::Invalid;
                }
                debug!(charset = %cs.name, reg, "ISO-2022 designation");
                self.dec.designation[reg] = Some(cs);
                Step::Advance(len)
            }
            None => Step::Invalid,
        }
    }

    /// A designation is accepted for listed charsets; the
    /// `full-support` flag opens every register and `designation-g0`/
    /// `designation-g1` open theirs.
    fn designation_allowed(&self, cs: &Arc<Charset>, reg: usize) -> bool {
        if self.flag(FULL_SUPPORT) {
            return true;
        }
        if reg == 0 && self.flag(DESIGNATION_G0) {
            return true;
        }
        if reg == 1 && self.flag(DESIGNATION_G1) {
            return true;
        }
        self.coding.charsets.iter().any(|c| c.name == cs.name)
    }

    /// Compound-text UTF-8 segment: `ESC % G … ESC % @`.
    fn utf8_segment(&mut self, src: &[u8], i: usize, out: &mut MText, ctl: &mut DecodeCtl) -> Step {
        let body = i + 3;
        let term = src[body..]
            .windows(3)
            .position(|w| w == [ESC, b'%', b'@'])
            .map(|p| body + p);
        let (end, tail) = match term {
            Some(t) => (t, 3),
            None => {
                if !ctl.last_block {
                    return Step::NeedMore;
                }
                (src.len(), 0)
            }
        };
        let unicode = Symbol::intern("unicode");
        let mut j = body;
        while j < end {
            match pull_utf8(src, j, false) {
                Ok(Some((code, len))) if j + len <= end => {
                    ctl.emit(out, code, unicode);
                    j += len;
                }
                _ => {
                    if ctl.lenient {
                        ctl.emit_binary(out, src[j]);
                        j += 1;
                    } else {
                        return Step::Invalid;
                    }
                }
            }
        }
        Step::Advance(end - i + tail)
    }

    /// Compound-text extended segment:
    /// `ESC % / n M L name STX bytes…` where the payload length after
    /// `L` is `(M - 128) * 128 + (L - 128)`.
    fn extended_segment(
        &mut self,
        src: &[u8],
        i: usize,
        out: &mut MText,
        ctl: &mut DecodeCtl,
    ) -> Step {
        if i + 6 > src.len() {
            return Step::NeedMore;
        }
        let class = src[i + 3];
        let m = src[i + 4];
        let l = src[i + 5];
        if !(0x30..=0x34).contains(&class) || m < 0x80 || l < 0x80 {
            return Step::Invalid;
        }
        let len = (m as usize - 0x80) * 128 + (l as usize - 0x80);
        let body = i + 6;
        if body + len > src.len() {
            if !ctl.last_block {
                return Step::NeedMore;
            }
            return Step::Invalid;
        }
        let payload = &src[body..body + len];
        let Some(stx) = payload.iter().position(|&b| b == STX) else {
            return Step::Invalid;
        };
        let name = match std::str::from_utf8(&payload[..stx]) {
            Ok(n) => n,
            Err(_) => return Step::Invalid,
        };
        let Some(cs) = charset::charset(Symbol::intern(name)) else {
            debug!(name, "unknown charset in extended segment");
            return Step::Invalid;
        };
        let data = &payload[stx + 1..];
        let dim = cs.dimension;
        if dim == 0 || data.len() % dim != 0 {
            return Step::Invalid;
        }
        for chunk in data.chunks(dim) {
            let mut code = 0u32;
            for (j, &b) in chunk.iter().enumerate() {
                code |= (b as u32) << (8 * (dim - 1 - j));
            }
            match cs.decode_char(code) {
                Some(ch) => ctl.emit(out, ch, cs.name),
                None => {
                    if ctl.lenient {
                        for &b in chunk {
                            ctl.emit_binary(out, b);
                        }
                    } else {
                        return Step::Invalid;
                    }
                }
            }
        }
        Step::Advance(body + len - i)
    }

    /// Control sequence; only the ISO-6429 direction form
    /// (`CSI [012] ]`) has meaning, the rest are consumed when the
    /// flag allows.
    fn csi(&mut self, src: &[u8], mut j: usize, intro_len: usize, _out: &mut MText) -> Step {
        let start = j - intro_len;
        let mut params = Vec::new();
        loop {
            let Some(&b) = src.get(j) else {
                return Step::NeedMore;
            };
            match b {
                0x30..=0x3F => {
                    params.push(b);
                    j += 1;
                }
                0x40..=0x7E => {
                    j += 1;
                    break;
                }
                _ => return Step::Invalid,
            }
        }
        let fin = src[j - 1];
        if fin == b']' && params.len() <= 1 {
            self.r2l = params.first() == Some(&b'2');
            return Step::Advance(j - start);
        }
        if self.flag(ISO6429) {
            return Step::Advance(j - start);
        }
        Step::Invalid
    }

    // ---- encode side ------------------------------------------------

    fn emit_designation(out: &mut Vec<u8>, cs: &Charset, reg: usize, long_form: bool) {
        let fin = cs.final_byte.unwrap_or(b'B');
        out.push(ESC);
        if cs.dimension >= 2 {
            out.push(b'$');
            if reg == 0 && (0x40..=0x42).contains(&fin) && !long_form {
                out.push(fin);
                return;
            }
        }
        let base = if cs.chars96 { 0x2C } else { 0x28 };
        out.push(base + reg as u8);
        out.push(fin);
    }

    /// Restore the initial designation/invocation state, emitting the
    /// escapes a reader needs to follow along.
    fn emit_reset(&mut self, out: &mut Vec<u8>) {
        for reg in 0..4 {
            let want = self.initial.designation[reg].clone();
            let have = self.enc.designation[reg].clone();
            let differs = match (&want, &have) {
                (Some(a), Some(b)) => a.name != b.name,
                (None, None) => false,
                _ => true,
            };
            if differs {
                if let Some(cs) = &want {
                    Self::emit_designation(out, cs, reg, self.flag(LONG_FORM));
                }
                self.enc.designation[reg] = want;
            }
        }
        if self.enc.invocation[0] != self.initial.invocation[0] {
            match self.initial.invocation[0] {
                Some(0) => out.push(SI),
                Some(1) => out.push(SO),
                Some(2) => out.extend_from_slice(&[ESC, b'n']),
                Some(3) => out.extend_from_slice(&[ESC, b'o']),
                _ => {}
            }
            self.enc.invocation[0] = self.initial.invocation[0];
        }
        self.enc.invocation[1] = self.initial.invocation[1];
    }

    /// Pick the charset that encodes `ch`, honoring a `charset` text
    /// property when it names a listed, capable charset.
    fn select_charset(&self, src: &MText, pos: usize, ch: u32) -> Option<(usize, u32)> {
        if let Some(Value::Symbol(name)) = src.get_prop(pos, Symbol::intern("charset")) {
            for (k, cs) in self.coding.charsets.iter().enumerate() {
                if cs.name == *name {
                    if let Some(code) = cs.encode_char(ch) {
                        return Some((k, code));
                    }
                }
            }
        }
        for (k, cs) in self.coding.charsets.iter().enumerate() {
            if let Some(code) = cs.encode_char(ch) {
                return Some((k, code));
            }
        }
        None
    }

    /// Make `charsets[k]` reachable and return (gr, single_shift_used).
    fn make_reachable(&mut self, k: usize, out: &mut Vec<u8>) -> Option<(bool, bool)> {
        let cs = self.coding.charsets[k].clone();
        if self.flag(EUC_TW_SHIFT) && k >= 2 {
            // EUC-TW plane shift: SS2 plus the plane byte.
            out.push(SS2_8);
            out.push(0xA0 + k as u8);
            return Some((true, true));
        }
        let reg = match (0..4).find(|&r| {
            self.enc.designation[r]
                .as_ref()
                .map(|c| c.name == cs.name)
                .unwrap_or(false)
        }) {
            Some(r) => r,
            None => {
                let policy = self.info.designation.get(k).copied().unwrap_or(-1);
                let reg = match policy {
                    0..=3 => policy as usize,
                    -4..=-1 => (-policy - 1) as usize,
                    _ => return None,
                };
                if self.flag(REVISION_NUMBER) {
                    if let Some(rev) = cs.revision {
                        out.extend_from_slice(&[ESC, b'&', 0x40 + rev]);
                    }
                }
                Self::emit_designation(out, &cs, reg, self.flag(LONG_FORM));
                self.enc.designation[reg] = Some(cs.clone());
                reg
            }
        };
        if self.enc.invocation[0] == Some(reg) {
            return Some((false, false));
        }
        if self.flag(EIGHT_BIT) && self.enc.invocation[1] == Some(reg) {
            return Some((true, false));
        }
        if reg >= 2 && self.flag(SINGLE_SHIFT) {
            if self.flag(SINGLE_SHIFT_7) && reg == 2 {
                out.push(SS2_7);
                return Some((false, true));
            }
            if self.flag(EIGHT_BIT) {
                out.push(if reg == 2 { SS2_8 } else { SS3_8 });
                return Some((true, true));
            }
            out.extend_from_slice(&[ESC, if reg == 2 { b'N' } else { b'O' }]);
            return Some((false, true));
        }
        if reg >= 2 && !self.flag(LOCKING_SHIFT) {
            return None;
        }
        match reg {
            0 => out.push(SI),
            1 => out.push(SO),
            2 => out.extend_from_slice(&[ESC, b'n']),
            3 => out.extend_from_slice(&[ESC, b'o']),
            _ => unreachable!(),
        }
        self.enc.invocation[0] = Some(reg);
        Some((false, false))
    }

    fn push_graphic(out: &mut Vec<u8>, cs: &Charset, code: u32, gr: bool) {
        let dim = cs.dimension;
        for j in 0..dim {
            let pos = dim - 1 - j;
            let raw = ((code >> (8 * pos)) & 0xFF) as u8;
            out.push(if gr { raw | 0x80 } else { raw & 0x7F });
        }
    }

    /// Encode `ch` as a compound-text UTF-8 segment.
    fn encode_utf8_segment(out: &mut Vec<u8>, ch: u32) {
        out.extend_from_slice(&[ESC, b'%', b'G']);
        push_utf8(out, ch);
        out.extend_from_slice(&[ESC, b'%', b'@']);
    }
}

impl Codec for Iso2022Codec {
    fn reset(&mut self) {
        Self::reset_registers(&mut self.dec, &self.initial);
        Self::reset_registers(&mut self.enc, &self.initial);
        self.single_shift = None;
        self.pending_revision = None;
        self.r2l = false;
    }

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let ascii = Symbol::intern("ascii");
        let mut i = 0;
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            let b = src[i];
            let step = match b {
                ESC => self.escape(src, i, out, ctl),
                SO => {
                    self.dec.invocation[0] = Some(1);
                    Step::Advance(1)
                }
                SI => {
                    self.dec.invocation[0] = Some(0);
                    Step::Advance(1)
                }
                SS2_7 if self.flag(SINGLE_SHIFT_7) => {
                    self.single_shift = Some(2);
                    Step::Advance(1)
                }
                SS2_8 | SS3_8 if self.flag(EUC_TW_SHIFT) && b == SS2_8 => {
                    match src.get(i + 1) {
                        None => Step::NeedMore,
                        Some(&p) if (0xA1..=0xB0).contains(&p) => {
                            let plane = (p - 0xA0) as usize;
                            match self.coding.charsets.get(plane).cloned() {
                                Some(cs) => {
                                    match self.graphic_char(&cs, src, i + 2, true, out, ctl) {
                                        Step::Advance(n) => Step::Advance(n + 2),
                                        other => other,
                                    }
                                }
                                None => Step::Invalid,
                            }
                        }
                        Some(_) => Step::Invalid,
                    }
                }
                SS2_8 | SS3_8 if self.flag(EIGHT_BIT) => {
                    self.single_shift = Some(if b == SS2_8 { 2 } else { 3 });
                    Step::Advance(1)
                }
                CSI_8 if self.flag(ISO6429) => self.csi(src, i + 1, 1, out),
                0x00..=0x1F | 0x7F => {
                    if b == b'\n' && self.flag(RESET_AT_EOL) {
                        Self::reset_registers(&mut self.dec, &self.initial);
                        self.single_shift = None;
                    }
                    ctl.emit(out, b as u32, ascii);
                    Step::Advance(1)
                }
                0x20..=0x7E => {
                    let reg = self.single_shift.or(self.dec.invocation[0]);
                    match reg.and_then(|r| self.dec.designation[r].clone()) {
                        // Space belongs to the charset only in a 96-set.
                        Some(cs) if b != 0x20 || cs.chars96 => {
                            let step = self.graphic_char(&cs, src, i, false, out, ctl);
                            if matches!(step, Step::Advance(_)) {
                                self.single_shift = None;
                            }
                            step
                        }
                        _ if b == 0x20 => {
                            ctl.emit(out, b as u32, ascii);
                            Step::Advance(1)
                        }
                        _ => Step::Invalid,
                    }
                }
                0x80..=0xFF => {
                    if !self.flag(EIGHT_BIT) {
                        Step::Invalid
                    } else {
                        let reg = self.single_shift.or(self.dec.invocation[1]);
                        match reg.and_then(|r| self.dec.designation[r].clone()) {
                            Some(cs) => {
                                let step = self.graphic_char(&cs, src, i, true, out, ctl);
                                if matches!(step, Step::Advance(_)) {
                                    self.single_shift = None;
                                }
                                step
                            }
                            None => Step::Invalid,
                        }
                    }
                }
            };
            match step {
                Step::Advance(n) => i += n,
                Step::NeedMore => {
                    if ctl.last_block && ctl.lenient {
                        ctl.emit_binary(out, src[i]);
                        i += 1;
                    } else {
                        return (i, Flow::NeedMore);
                    }
                }
                Step::Invalid => {
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
        for pos in from..to {
            let ch = src.code_at(pos).unwrap_or(0);
            if ch < 0x20 || ch == 0x7F {
                if ch == b'\n' as u32 && self.flag(RESET_AT_EOL) {
                    self.emit_reset(out);
                } else if self.flag(RESET_AT_CNTL) {
                    self.emit_reset(out);
                }
                out.push(ch as u8);
                continue;
            }
            let Some((k, code)) = self.select_charset(src, pos, ch) else {
                if self.flag(DESIGNATION_CTEXT) {
                    Self::encode_utf8_segment(out, ch);
                    continue;
                }
                if ctl.lenient {
                    ctl.encode_sub(out, ch);
                    continue;
                }
                return (pos - from, Flow::Invalid);
            };
            let cs = self.coding.charsets[k].clone();
            let Some((gr, _ss)) = self.make_reachable(k, out) else {
                if ctl.lenient {
                    ctl.encode_sub(out, ch);
                    continue;
                }
                return (pos - from, Flow::Invalid);
            };
            Self::push_graphic(out, &cs, code, gr);
        }
        (to - from, Flow::Done)
    }

    fn finish_encode(&mut self, out: &mut Vec<u8>) {
        self.emit_reset(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding_by_name;
    use libmtext_core::database;

    fn register_jisx0208_rows() {
        // Hiragana row 0x24 plus the first kanji of row 0x30, enough
        // for codec tests without the full table.
        database::register_blob(
            database::tags(&["charset", "japanese-jisx0208"]),
            b"(0x2421 0x2473 0x3041) (0x3021 0x4E9C)".to_vec(),
        );
    }

    #[test]
    fn decode_designation_and_shift_out() {
        register_jisx0208_rows();
        let coding = coding_by_name("iso-2022-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let bytes = [0x1B, 0x24, 0x42, 0x24, 0x22, 0x1B, 0x28, 0x42, 0x41];
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (bytes.len(), Flow::Done));
        assert_eq!(out.to_string_lossy(), "あA");
    }

    #[test]
    fn encode_emits_minimal_escapes() {
        register_jisx0208_rows();
        let coding = coding_by_name("iso-2022-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = Vec::new();
        let mut ctl = EncodeCtl::new(false);
        let text = MText::from_str("あA");
        let (n, flow) = codec.encode(&text, 0, 2, &mut out, &mut ctl);
        assert_eq!((n, flow), (2, Flow::Done));
        assert_eq!(
            out,
            vec![0x1B, 0x24, 0x42, 0x24, 0x22, 0x1B, 0x28, 0x42, 0x41]
        );
    }

    #[test]
    fn euc_jp_gr_bytes() {
        register_jisx0208_rows();
        let coding = coding_by_name("euc-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&[0xA4, 0xA2, 0x41], &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (3, Flow::Done));
        assert_eq!(out.to_string_lossy(), "あA");
    }

    #[test]
    fn euc_jp_encode_uses_gr_and_single_shift() {
        register_jisx0208_rows();
        let coding = coding_by_name("euc-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = Vec::new();
        let mut ctl = EncodeCtl::new(false);
        let mut text = MText::from_str("Aあ");
        text.push_code(0xFF71); // halfwidth ｱ rides SS2
        let (n, flow) = codec.encode(&text, 0, 3, &mut out, &mut ctl);
        assert_eq!((n, flow), (3, Flow::Done));
        assert_eq!(out, vec![0x41, 0xA4, 0xA2, 0x8E, 0xB1]);
    }

    #[test]
    fn euc_jp_single_shift_kana() {
        register_jisx0208_rows();
        let coding = coding_by_name("euc-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        // SS2 then 0xB1 gives halfwidth ｱ through G2.
        let (used, flow) = codec.decode(&[0x8E, 0xB1], &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (2, Flow::Done));
        assert_eq!(out.code_at(0), Some(0xFF71));
    }

    #[test]
    fn direction_sequence_sets_r2l_only() {
        let coding = coding_by_name("compound-text").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let bytes = [0x1B, b'[', b'2', b']', b'A'];
        let (used, flow) = codec.decode(&bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (bytes.len(), Flow::Done));
        assert!(codec.r2l);
        assert_eq!(out.to_string_lossy(), "A");
    }

    #[test]
    fn ctext_utf8_segment_round_trip() {
        let coding = coding_by_name("compound-text").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut bytes = Vec::new();
        let mut ectl = EncodeCtl::new(false);
        // あ is in no ctext charset here, so it rides a UTF-8 segment.
        let text = MText::from_str("Aあ");
        let (n, flow) = codec.encode(&text, 0, 2, &mut bytes, &mut ectl);
        assert_eq!((n, flow), (2, Flow::Done));
        codec.reset();
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, dflow) = codec.decode(&bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, dflow), (bytes.len(), Flow::Done));
        assert_eq!(out.to_string_lossy(), "Aあ");
    }

    #[test]
    fn extended_segment_decodes_named_charset() {
        let coding = coding_by_name("compound-text").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        // Payload: "iso-8859-1" STX 0xE9 ; length counts name + STX + data.
        let name = b"iso-8859-1";
        let len = name.len() + 1 + 1;
        let mut bytes = vec![0x1B, b'%', b'/', b'1'];
        bytes.push(0x80 + (len / 128) as u8);
        bytes.push(0x80 + (len % 128) as u8);
        bytes.extend_from_slice(name);
        bytes.push(STX);
        bytes.push(0xE9);
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (bytes.len(), Flow::Done));
        assert_eq!(out.to_string_lossy(), "é");
    }

    #[test]
    fn unlisted_designation_is_rejected_without_open_flags() {
        register_jisx0208_rows();
        let coding = coding_by_name("euc-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        let mut out = MText::new();
        // latin-jisx0201 (final J) is not in the euc-jp charset list.
        let mut ctl = DecodeCtl::new(false, true, None);
        let (_, flow) = codec.decode(&[0x1B, 0x28, 0x4A, 0x41], &mut out, &mut ctl);
        assert_eq!(flow, Flow::Invalid);
        codec.reset();
        // ascii (final B) is listed and goes through.
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&[0x1B, 0x28, 0x42, 0x41], &mut out, &mut ctl);
        assert_eq!((used, flow), (4, Flow::Done));
    }

    #[test]
    fn revision_number_is_consumed() {
        register_jisx0208_rows();
        let coding = coding_by_name("iso-2022-jp").unwrap();
        let mut codec = Iso2022Codec::new(&coding).unwrap();
        // ESC & @ (revision 0) then the designation.
        let bytes = [
            0x1B, b'&', 0x40, 0x1B, 0x24, 0x42, 0x24, 0x22, 0x1B, 0x28, 0x42,
        ];
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&bytes, &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (bytes.len(), Flow::Done));
        assert_eq!(out.to_string_lossy(), "あ");
    }
}
