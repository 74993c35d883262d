//! Stateful converter binding a coding system to a byte buffer or
//! stream.
//!
//! A converter owns the codec instance plus the resumption state the
//! contract requires: carry-over bytes from an incomplete decode
//! (≤ 256), the push-back buffer used by `ungetc`, the `nchars`/
//! `nbytes` counters, the last result code and the `lenient`/
//! `last_block`/`at_most` knobs. `rebind_*` retargets the converter
//! without touching codec state, which is how multi-block input is fed.

use crate::{Codec, ConvResult, DecodeCtl, EncodeCtl, Flow};
use libmtext_core::error::{Error, Result};
use libmtext_core::mtext::MText;
use libmtext_core::plist::Value;
use libmtext_core::symbol::Symbol;
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::debug;

/// Carry-over capacity; a longer incomplete sequence is an error.
const CARRY_MAX: usize = 256;

/// Stream read granularity.
const CHUNK: usize = 4096;

enum Target {
    Buffer {
        data: Vec<u8>,
        pos: usize,
        cap: Option<usize>,
    },
    Reader(Box<dyn Read + Send>),
    Writer(Box<dyn Write + Send>),
}

/// A coding-system instance bound to a data target.
pub struct Converter {
    coding: Arc<crate::CodingSystem>,
    codec: Box<dyn Codec>,
    target: Target,
    carryover: Vec<u8>,
    unread: Vec<u32>,
    nchars: usize,
    nbytes: usize,
    result: ConvResult,
    lenient: bool,
    last_block: bool,
    at_most: Option<usize>,
    eof: bool,
}

impl Converter {
    /// Decode/encode against an in-memory byte buffer. The buffer is
    /// treated as the final block; clear with `set_last_block(false)`
    /// when more data will be rebound later.
    pub fn on_bytes(coding: Arc<crate::CodingSystem>, data: Vec<u8>) -> Result<Converter> {
        let codec = coding.make_codec()?;
        Ok(Converter {
            coding,
            codec,
            target: Target::Buffer {
                data,
                pos: 0,
                cap: None,
            },
            carryover: Vec::new(),
            unread: Vec::new(),
            nchars: 0,
            nbytes: 0,
            result: ConvResult::Ok,
            lenient: false,
            last_block: true,
            at_most: None,
            eof: false,
        })
    }

    /// Converter for encoding into a growable buffer.
    pub fn for_encoding(coding: Arc<crate::CodingSystem>) -> Result<Converter> {
        Self::on_bytes(coding, Vec::new())
    }

    /// Decode from a synchronous reader. `last_block` is managed
    /// automatically: it is raised when the reader reports end of
    /// input.
    pub fn on_reader(
        coding: Arc<crate::CodingSystem>,
        reader: Box<dyn Read + Send>,
    ) -> Result<Converter> {
        let mut c = Self::on_bytes(coding, Vec::new())?;
        c.target = Target::Reader(reader);
        c.last_block = false;
        Ok(c)
    }

    /// Encode into a synchronous writer.
    pub fn on_writer(
        coding: Arc<crate::CodingSystem>,
        writer: Box<dyn Write + Send>,
    ) -> Result<Converter> {
        let mut c = Self::on_bytes(coding, Vec::new())?;
        c.target = Target::Writer(writer);
        Ok(c)
    }

    pub fn coding(&self) -> &Arc<crate::CodingSystem> {
        &self.coding
    }

    pub fn nchars(&self) -> usize {
        self.nchars
    }

    pub fn nbytes(&self) -> usize {
        self.nbytes
    }

    pub fn last_result(&self) -> ConvResult {
        self.result
    }

    pub fn carryover(&self) -> &[u8] {
        &self.carryover
    }

    pub fn set_lenient(&mut self, lenient: bool) -> &mut Self {
        self.lenient = lenient;
        self
    }

    pub fn set_last_block(&mut self, last: bool) -> &mut Self {
        self.last_block = last;
        self
    }

    pub fn set_at_most(&mut self, cap: Option<usize>) -> &mut Self {
        self.at_most = cap;
        self
    }

    /// Back to the coding system's initial state: codec state,
    /// carry-over, push-back and the counters all clear.
    pub fn reset(&mut self) {
        self.codec.reset();
        self.carryover.clear();
        self.unread.clear();
        self.nchars = 0;
        self.nbytes = 0;
        self.result = ConvResult::Ok;
        self.eof = false;
    }

    /// Retarget onto a fresh byte buffer without resetting codec state.
    pub fn rebind_buffer(&mut self, data: Vec<u8>) {
        self.target = Target::Buffer {
            data,
            pos: 0,
            cap: None,
        };
        self.eof = false;
    }

    /// Retarget onto a reader without resetting codec state.
    pub fn rebind_reader(&mut self, reader: Box<dyn Read + Send>) {
        self.target = Target::Reader(reader);
        self.last_block = false;
        self.eof = false;
    }

    /// Retarget onto a writer without resetting codec state.
    pub fn rebind_writer(&mut self, writer: Box<dyn Write + Send>) {
        self.target = Target::Writer(writer);
        self.eof = false;
    }

    /// Cap the byte-buffer target; encoding past the cap reports
    /// `InsufficientDst`.
    pub fn set_buffer_cap(&mut self, new_cap: Option<usize>) {
        if let Target::Buffer { cap, .. } = &mut self.target {
            *cap = new_cap;
        }
    }

    /// Take the accumulated bytes out of a buffer target.
    pub fn take_bytes(&mut self) -> Vec<u8> {
        match &mut self.target {
            Target::Buffer { data, pos, .. } => {
                *pos = 0;
                std::mem::take(data)
            }
            _ => Vec::new(),
        }
    }

    /// Fetch the next block: carry-over plus whatever the target has.
    /// Returns the assembled bytes and whether they are final.
    fn fetch(&mut self) -> Result<(Vec<u8>, bool)> {
        let mut bytes = std::mem::take(&mut self.carryover);
        match &mut self.target {
            Target::Buffer { data, pos, .. } => {
                bytes.extend_from_slice(&data[*pos..]);
                *pos = data.len();
                Ok((bytes, self.last_block))
            }
            Target::Reader(reader) => {
                if self.eof {
                    return Ok((bytes, true));
                }
                let mut chunk = [0u8; CHUNK];
                match reader.read(&mut chunk) {
                    Ok(0) => {
                        self.eof = true;
                        Ok((bytes, true))
                    }
                    Ok(n) => {
                        bytes.extend_from_slice(&chunk[..n]);
                        Ok((bytes, false))
                    }
                    Err(e) => {
                        self.result = ConvResult::Io;
                        Err(Error::Io(e))
                    }
                }
            }
            Target::Writer(_) => Err(Error::Coding(
                "converter is bound to a writer; decode needs a readable target".into(),
            )),
        }
    }

    /// Decode from the target, appending characters to `dst`. Returns
    /// the number of characters appended. Honors `at_most`; leaves
    /// resumable state (carry-over) behind on a short read.
    pub fn decode(&mut self, dst: &mut MText) -> Result<usize> {
        self.result = ConvResult::Ok;
        let mut produced = 0usize;
        while !self.full(produced) {
            let Some(c) = self.unread.pop() else { break };
            dst.push_code(c);
            produced += 1;
        }
        loop {
            if let Some(cap) = self.at_most {
                if produced >= cap {
                    break;
                }
            }
            let (bytes, final_block) = self.fetch()?;
            if bytes.is_empty() && final_block {
                break;
            }
            let limit = self.at_most.map(|cap| cap - produced);
            let mut ctl = DecodeCtl::new(self.lenient, final_block, limit);
            let (consumed, flow) = self.codec.decode(&bytes, dst, &mut ctl);
            ctl.flush(dst);
            self.nbytes += consumed;
            self.nchars += ctl.produced;
            produced += ctl.produced;
            let tail = &bytes[consumed..];
            if flow == Flow::NeedMore && tail.len() > CARRY_MAX {
                self.result = ConvResult::InvalidByte;
                return Err(Error::Coding(format!(
                    "carry-over of {} bytes exceeds the {}-byte cap",
                    tail.len(),
                    CARRY_MAX
                )));
            }
            self.carryover = tail.to_vec();
            match flow {
                Flow::Done => {
                    let buffered = matches!(self.target, Target::Buffer { .. });
                    if buffered || final_block || self.full(produced) {
                        break;
                    }
                }
                Flow::NeedMore => {
                    if final_block {
                        self.result = ConvResult::InsufficientSrc;
                        return Err(Error::Coding(
                            "input ends inside an incomplete sequence".into(),
                        ));
                    }
                    if matches!(self.target, Target::Buffer { .. }) {
                        // Caller may rebind more input later.
                        self.result = ConvResult::InsufficientSrc;
                        break;
                    }
                }
                Flow::Invalid => {
                    self.result = ConvResult::InvalidByte;
                    return Err(Error::Coding(format!(
                        "invalid byte sequence at offset {}",
                        self.nbytes
                    )));
                }
            }
        }
        debug!(coding = %self.coding.name, produced, "decode block done");
        Ok(produced)
    }

    fn full(&self, produced: usize) -> bool {
        self.at_most.map_or(false, |cap| produced >= cap)
    }

    /// Encode characters `from..to` of `src`, writing bytes to the
    /// target. Returns the number of bytes written.
    pub fn encode(&mut self, src: &MText, from: usize, to: usize) -> Result<usize> {
        if from > to || to > src.len() {
            return Err(Error::Range(format!(
                "encode range {}..{} out of bounds (len {})",
                from,
                to,
                src.len()
            )));
        }
        self.result = ConvResult::Ok;
        let mut ctl = EncodeCtl::new(self.lenient);
        let mut buf = Vec::new();
        let (chars, flow) = self.codec.encode(src, from, to, &mut buf, &mut ctl);
        if self.last_block && flow == Flow::Done {
            self.codec.finish_encode(&mut buf);
        }
        let written = self.sink(&buf)?;
        self.nchars += chars;
        self.nbytes += written;
        match flow {
            Flow::Done => Ok(written),
            Flow::Invalid => {
                self.result = ConvResult::InvalidChar;
                Err(Error::Coding(format!(
                    "unencodable character at position {}",
                    from + chars
                )))
            }
            Flow::NeedMore => {
                // Encoders never split characters.
                self.result = ConvResult::InvalidChar;
                Err(Error::Coding("encoder requested more input".into()))
            }
        }
    }

    fn sink(&mut self, buf: &[u8]) -> Result<usize> {
        match &mut self.target {
            Target::Buffer { data, cap, .. } => {
                if let Some(cap) = cap {
                    if data.len() + buf.len() > *cap {
                        self.result = ConvResult::InsufficientDst;
                        return Err(Error::Coding(format!(
                            "destination full: {} + {} bytes exceeds cap {}",
                            data.len(),
                            buf.len(),
                            cap
                        )));
                    }
                }
                data.extend_from_slice(buf);
                Ok(buf.len())
            }
            Target::Writer(writer) => match writer.write_all(buf).and_then(|_| writer.flush()) {
                Ok(()) => Ok(buf.len()),
                Err(e) => {
                    self.result = ConvResult::Io;
                    Err(Error::Io(e))
                }
            },
            Target::Reader(_) => Err(Error::Coding(
                "converter is bound to a reader; encode needs a writable target".into(),
            )),
        }
    }

    /// Read a single character, honoring pushed-back input.
    pub fn getc(&mut self) -> Result<Option<u32>> {
        if let Some(c) = self.unread.pop() {
            return Ok(Some(c));
        }
        let saved = self.at_most;
        self.at_most = Some(1);
        let mut scratch = MText::new();
        let r = self.decode(&mut scratch);
        self.at_most = saved;
        r?;
        Ok(scratch.code_at(0))
    }

    /// Push a character back; the next `getc`/`decode` yields it first.
    pub fn ungetc(&mut self, code: u32) {
        self.unread.push(code);
    }

    /// Read characters up to and including the next newline.
    pub fn gets(&mut self) -> Result<Option<MText>> {
        let mut line = MText::new();
        loop {
            match self.getc()? {
                None => {
                    if line.is_empty() {
                        return Ok(None);
                    }
                    return Ok(Some(line));
                }
                Some(c) => {
                    line.push_code(c);
                    if c == b'\n' as u32 {
                        return Ok(Some(line));
                    }
                }
            }
        }
    }

    /// Encode a single character.
    pub fn putc(&mut self, code: u32) -> Result<usize> {
        let mut one = MText::new();
        one.push_code(code);
        self.encode(&one, 0, 1)
    }

    /// Decode an entire byte string with a throwaway converter,
    /// attaching the `coding` provenance property over the result.
    pub fn decode_bytes(
        coding: Arc<crate::CodingSystem>,
        bytes: &[u8],
        lenient: bool,
    ) -> Result<MText> {
        let name = coding.name;
        let mut conv = Converter::on_bytes(coding, bytes.to_vec())?;
        conv.set_lenient(lenient);
        let mut out = MText::new();
        conv.decode(&mut out)?;
        let len = out.len();
        let _ = out.put_prop(0, len, Symbol::intern("coding"), Value::Symbol(name));
        Ok(out)
    }

    /// Encode an entire M-text with a throwaway converter.
    pub fn encode_mtext(
        coding: Arc<crate::CodingSystem>,
        text: &MText,
        lenient: bool,
    ) -> Result<Vec<u8>> {
        let mut conv = Converter::for_encoding(coding)?;
        conv.set_lenient(lenient);
        let to = text.len();
        conv.encode(text, 0, to)?;
        Ok(conv.take_bytes())
    }
}
