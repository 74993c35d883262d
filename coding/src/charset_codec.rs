//! Codec for `Charset`-type coding systems: a per-byte bitmap selects
//! candidate charsets, each candidate reads its dimension of bytes, and
//! the first charset whose `decode_char` succeeds wins. ASCII-compatible
//! systems short-circuit bytes below 0x80.

use crate::{Codec, CodingSystem, DecodeCtl, EncodeCtl, Flow};
use libmtext_core::charset::Charset;
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use std::sync::Arc;

pub struct CharsetListCodec {
    charsets: Vec<Arc<Charset>>,
    ascii_compat: bool,
    ascii_sym: Symbol,
    /// Bit k set: charsets[k] may start with this lead byte.
    lead_map: [u32; 256],
}

impl CharsetListCodec {
    pub fn new(coding: &Arc<CodingSystem>) -> Self {
        let charsets = coding.charsets.clone();
        let mut lead_map = [0u32; 256];
        for (k, cs) in charsets.iter().enumerate() {
            let pos = cs.dimension - 1;
            for b in cs.min_range[pos]..=cs.max_range[pos] {
                lead_map[b as usize] |= 1 << k;
            }
        }
        CharsetListCodec {
            ascii_compat: coding.ascii_compatible,
            ascii_sym: Symbol::intern("ascii"),
            charsets,
            lead_map,
        }
    }
}

impl Codec for CharsetListCodec {
    fn reset(&mut self) {}

    fn decode(&mut self, src: &[u8], out: &mut MText, ctl: &mut DecodeCtl) -> (usize, Flow) {
        let mut i = 0;
        while i < src.len() {
            if ctl.full() {
                return (i, Flow::Done);
            }
            let b = src[i];
            if self.ascii_compat && b < 0x80 {
                ctl.emit(out, b as u32, self.ascii_sym);
                i += 1;
                continue;
            }
            let mask = self.lead_map[b as usize];
            let mut want_more = false;
            let mut advanced = false;
            for (k, cs) in self.charsets.iter().enumerate() {
                if mask & (1 << k) == 0 {
                    continue;
                }
                let dim = cs.dimension;
                if i + dim > src.len() {
                    want_more = true;
                    continue;
                }
                let mut code = 0u32;
                for j in 0..dim {
                    code |= (src[i + j] as u32) << (8 * (dim - 1 - j));
                }
                if let Some(ch) = cs.decode_char(code) {
                    ctl.emit(out, ch, cs.name);
                    i += dim;
                    advanced = true;
                    break;
                }
            }
            if advanced {
                continue;
            }
            if want_more && !ctl.last_block {
                return (i, Flow::NeedMore);
            }
            if ctl.lenient {
                ctl.emit_binary(out, b);
                i += 1;
            } else {
                return (i, Flow::Invalid);
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
        let prop_key = Symbol::intern("charset");
        for pos in from..to {
            let ch = src.code_at(pos).unwrap_or(0);
            let mut code = None;
            if let Some(Value::Symbol(name)) = src.get_prop(pos, prop_key) {
                for cs in &self.charsets {
                    if cs.name == *name {
                        if let Some(c) = cs.encode_char(ch) {
                            code = Some((cs.clone(), c));
                        }
                        break;
                    }
                }
            }
            if code.is_none() {
                for cs in &self.charsets {
                    if let Some(c) = cs.encode_char(ch) {
                        code = Some((cs.clone(), c));
                        break;
                    }
                }
            }
            match code {
                Some((cs, c)) => {
                    let dim = cs.dimension;
                    for j in 0..dim {
                        out.push(((c >> (8 * (dim - 1 - j))) & 0xFF) as u8);
                    }
                }
                None => {
                    if ctl.lenient {
                        ctl.encode_sub(out, ch);
                        continue;
                    }
                    return (pos - from, Flow::Invalid);
                }
            }
        }
        (to - from, Flow::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coding_by_name;

    #[test]
    fn latin1_bytes_decode_identity() {
        let coding = coding_by_name("iso-8859-1").unwrap();
        let mut codec = CharsetListCodec::new(&coding);
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&[0x41, 0xE9], &mut out, &mut ctl);
        ctl.flush(&mut out);
        assert_eq!((used, flow), (2, Flow::Done));
        assert_eq!(out.to_string_lossy(), "Aé");
    }

    #[test]
    fn ascii_coding_rejects_high_bytes() {
        let coding = coding_by_name("us-ascii").unwrap();
        let mut codec = CharsetListCodec::new(&coding);
        let mut out = MText::new();
        let mut ctl = DecodeCtl::new(false, true, None);
        let (used, flow) = codec.decode(&[0x41, 0xE9], &mut out, &mut ctl);
        assert_eq!(flow, Flow::Invalid);
        assert_eq!(used, 1);
    }

    #[test]
    fn charset_property_steers_encoding() {
        let coding = coding_by_name("iso-8859-1").unwrap();
        let mut codec = CharsetListCodec::new(&coding);
        let mut text = MText::from_str("é");
        text.put_prop(0, 1, Symbol::intern("charset"), {
            Value::Symbol(Symbol::intern("iso-8859-1"))
        })
        .unwrap();
        let mut out = Vec::new();
        let mut ctl = EncodeCtl::new(false);
        let (n, flow) = codec.encode(&text, 0, 1, &mut out, &mut ctl);
        assert_eq!((n, flow), (1, Flow::Done));
        assert_eq!(out, vec![0xE9]);
    }
}
