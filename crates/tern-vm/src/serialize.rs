//! Binary instruction-stream format.
//!
//! ```text
//! stream      := count:u64le instruction{count}
//! instruction := length:u64le opcode:u8 operand:u64le{0..2}
//! ```
//!
//! `length` counts the opcode byte and the payload, so it is always
//! 1, 9 or 17 depending on the opcode.
//!
//! Interned indices in a payload belong to the process that compiled the
//! stream. A [`StringTable`] carries their text so another process can
//! remap them with [`deserialize_with_table`].

use std::io::{self, Read, Write};

use hashbrown::HashMap;
use tern_core::symbol::{index_of, spur_from_index, try_resolve};
use tern_core::{intern, Instruction, Op, TernError};
use tracing::debug;

const MAX_INSTRUCTION_LEN: u64 = 17;

pub fn encode_instruction(inst: &Instruction, buf: &mut Vec<u8>) {
    buf.extend_from_slice(&(inst.len() as u64).to_le_bytes());
    buf.push(inst.op as u8);
    for operand in inst.operands() {
        buf.extend_from_slice(&operand.to_le_bytes());
    }
}

/// Decode one instruction from the front of `bytes`.
/// Returns the instruction and the number of bytes consumed.
pub fn decode_instruction(bytes: &[u8]) -> Result<(Instruction, usize), TernError> {
    let (inst, used) = decode_unchecked(bytes)?;
    check_interned(&inst)?;
    Ok((inst, used))
}

fn decode_unchecked(bytes: &[u8]) -> Result<(Instruction, usize), TernError> {
    let len = read_u64(bytes, 0)?;
    if len == 0 || len > MAX_INSTRUCTION_LEN {
        return Err(TernError::codec(format!("invalid instruction length {len}")));
    }
    let len = len as usize;
    let body = bytes
        .get(8..8 + len)
        .ok_or_else(|| TernError::codec("truncated instruction"))?;
    let inst = decode_body(body)?;
    Ok((inst, 8 + len))
}

/// Decode an opcode byte and its payload. `body.len()` is the declared length.
fn decode_body(body: &[u8]) -> Result<Instruction, TernError> {
    let (&byte, payload) = body
        .split_first()
        .ok_or_else(|| TernError::codec("empty instruction"))?;
    let op = Op::from_u8(byte).ok_or_else(|| TernError::codec(format!("unknown opcode {byte}")))?;
    let expected = 8 * op.operand_count();
    if payload.len() != expected {
        return Err(TernError::codec(format!(
            "{op} carries {expected} payload bytes, length says {}",
            payload.len()
        )));
    }
    let mut operands = [0u64; 2];
    for (slot, chunk) in operands.iter_mut().zip(payload.chunks_exact(8)) {
        *slot = read_u64(chunk, 0)?;
    }
    Ok(Instruction::from_parts(op, &operands))
}

// Payloads that name interned text must refer to a string this process knows.
fn check_interned(inst: &Instruction) -> Result<(), TernError> {
    if inst.op.names_text() && spur_from_index(inst.operand()).is_none() {
        return Err(TernError::codec(format!(
            "{} refers to unknown interned index {}",
            inst.op,
            inst.operand()
        )));
    }
    Ok(())
}

fn read_u64(bytes: &[u8], at: usize) -> Result<u64, TernError> {
    let word: [u8; 8] = bytes
        .get(at..at + 8)
        .and_then(|b| b.try_into().ok())
        .ok_or_else(|| TernError::codec("truncated stream"))?;
    Ok(u64::from_le_bytes(word))
}

pub fn serialize(code: &[Instruction]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(8 + code.len() * 17);
    buf.extend_from_slice(&(code.len() as u64).to_le_bytes());
    for inst in code {
        encode_instruction(inst, &mut buf);
    }
    debug!(instructions = code.len(), bytes = buf.len(), "serialized stream");
    buf
}

pub fn deserialize(bytes: &[u8]) -> Result<Vec<Instruction>, TernError> {
    let code = decode_stream(bytes)?;
    for inst in &code {
        check_interned(inst)?;
    }
    debug!(instructions = code.len(), bytes = bytes.len(), "deserialized stream");
    Ok(code)
}

/// Decode a stream compiled elsewhere, rewriting its interned indices
/// through `table` into this process's symbol table.
pub fn deserialize_with_table(
    bytes: &[u8],
    table: &StringTable,
) -> Result<Vec<Instruction>, TernError> {
    let mut code = decode_stream(bytes)?;
    table.remap(&mut code)?;
    debug!(
        instructions = code.len(),
        strings = table.len(),
        "deserialized stream with string table"
    );
    Ok(code)
}

fn decode_stream(bytes: &[u8]) -> Result<Vec<Instruction>, TernError> {
    let count = read_u64(bytes, 0)?;
    // Each instruction needs at least 9 bytes, so a bogus count cannot force a huge allocation.
    let bound = (bytes.len().saturating_sub(8) / 9) as u64;
    if count > bound {
        return Err(TernError::codec(format!(
            "stream claims {count} instructions but holds at most {bound}"
        )));
    }
    let mut code = Vec::with_capacity(count as usize);
    let mut pos = 8;
    for _ in 0..count {
        let (inst, used) = decode_unchecked(&bytes[pos..])?;
        code.push(inst);
        pos += used;
    }
    if pos != bytes.len() {
        return Err(TernError::codec(format!(
            "{} trailing bytes after last instruction",
            bytes.len() - pos
        )));
    }
    Ok(code)
}

pub fn write_to<W: Write>(w: &mut W, code: &[Instruction]) -> Result<(), TernError> {
    w.write_all(&serialize(code))?;
    w.flush()?;
    Ok(())
}

/// Read a stream from a reader. Stops after `count` instructions; anything
/// after that is left unread.
pub fn read_from<R: Read>(r: &mut R) -> Result<Vec<Instruction>, TernError> {
    fn rd_u64<R: Read>(r: &mut R) -> Result<u64, TernError> {
        let mut word = [0u8; 8];
        r.read_exact(&mut word).map_err(eof_as_codec)?;
        Ok(u64::from_le_bytes(word))
    }

    let count = rd_u64(r)?;
    let mut code = Vec::new();
    for _ in 0..count {
        let len = rd_u64(r)?;
        if len == 0 || len > MAX_INSTRUCTION_LEN {
            return Err(TernError::codec(format!("invalid instruction length {len}")));
        }
        let mut body = [0u8; MAX_INSTRUCTION_LEN as usize];
        let body = &mut body[..len as usize];
        r.read_exact(body).map_err(eof_as_codec)?;
        let inst = decode_body(body)?;
        check_interned(&inst)?;
        code.push(inst);
    }
    debug!(instructions = code.len(), "read stream");
    Ok(code)
}

fn eof_as_codec(err: io::Error) -> TernError {
    if err.kind() == io::ErrorKind::UnexpectedEof {
        TernError::codec("truncated stream")
    } else {
        err.into()
    }
}

/// Text for the interned indices a stream refers to.
///
/// ```text
/// table := count:u64le entry{count}
/// entry := index:u64le length:u64le utf8{length}
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringTable {
    entries: HashMap<u64, String>,
}

impl StringTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the text of every interned index `code` names.
    pub fn for_code(code: &[Instruction]) -> Self {
        let mut table = StringTable::new();
        for inst in code.iter().filter(|inst| inst.op.names_text()) {
            let idx = inst.operand();
            if let Some(text) = spur_from_index(idx).and_then(try_resolve) {
                table.insert(idx, text);
            }
        }
        table
    }

    pub fn insert(&mut self, index: u64, text: impl Into<String>) {
        self.entries.insert(index, text.into());
    }

    pub fn get(&self, index: u64) -> Option<&str> {
        self.entries.get(&index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries are written in index order so equal tables encode identically.
    pub fn encode(&self) -> Vec<u8> {
        let mut entries: Vec<_> = self.entries.iter().collect();
        entries.sort_by_key(|(idx, _)| **idx);
        let mut buf = Vec::new();
        buf.extend_from_slice(&(entries.len() as u64).to_le_bytes());
        for (idx, text) in entries {
            buf.extend_from_slice(&idx.to_le_bytes());
            buf.extend_from_slice(&(text.len() as u64).to_le_bytes());
            buf.extend_from_slice(text.as_bytes());
        }
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, TernError> {
        let count = read_u64(bytes, 0)?;
        let bound = (bytes.len().saturating_sub(8) / 16) as u64;
        if count > bound {
            return Err(TernError::codec(format!(
                "string table claims {count} entries but holds at most {bound}"
            )));
        }
        let mut table = StringTable::new();
        let mut pos = 8;
        for _ in 0..count {
            let idx = read_u64(bytes, pos)?;
            let len = read_u64(bytes, pos + 8)?;
            pos += 16;
            let text = usize::try_from(len)
                .ok()
                .and_then(|len| bytes.get(pos..pos.checked_add(len)?))
                .ok_or_else(|| TernError::codec("truncated string table"))?;
            let text = std::str::from_utf8(text)
                .map_err(|e| TernError::codec(format!("string table entry {idx}: {e}")))?;
            table.insert(idx, text);
            pos += text.len();
        }
        if pos != bytes.len() {
            return Err(TernError::codec(format!(
                "{} trailing bytes after string table",
                bytes.len() - pos
            )));
        }
        Ok(table)
    }

    /// Rewrite every interned index in `code` to this process's index for
    /// the same text.
    pub fn remap(&self, code: &mut [Instruction]) -> Result<(), TernError> {
        let mut local: HashMap<u64, u64> = HashMap::new();
        for inst in code.iter_mut().filter(|inst| inst.op.names_text()) {
            let idx = inst.operand();
            let mapped = match local.get(&idx) {
                Some(&mapped) => mapped,
                None => {
                    let text = self.get(idx).ok_or_else(|| {
                        TernError::codec(format!(
                            "{} refers to index {idx}, which the string table lacks",
                            inst.op
                        ))
                    })?;
                    let mapped = index_of(intern(text));
                    local.insert(idx, mapped);
                    mapped
                }
            };
            inst.set_operand(mapped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_core::intern;
    use tern_core::symbol::index_of;

    fn sample() -> Vec<Instruction> {
        vec![
            Instruction::push_num(-1),
            Instruction::with_operand(Op::PushSym, index_of(intern("x"))),
            Instruction::new(Op::Load),
            Instruction::with_operands(Op::CreateClosure, 1, 2),
            Instruction::with_operand(Op::Call, 1),
            Instruction::new(Op::EndCode),
        ]
    }

    #[test]
    fn test_encode_layout() {
        let mut buf = Vec::new();
        encode_instruction(&Instruction::with_operand(Op::Jmp, 0x0102), &mut buf);
        assert_eq!(buf.len(), 8 + 1 + 8);
        assert_eq!(&buf[..8], &9u64.to_le_bytes());
        assert_eq!(buf[8], Op::Jmp as u8);
        assert_eq!(&buf[9..], &0x0102u64.to_le_bytes());
    }

    #[test]
    fn test_stream_header() {
        let bytes = serialize(&sample());
        assert_eq!(&bytes[..8], &6u64.to_le_bytes());
        assert_eq!(bytes.len(), 8 + 6 * 8 + 9 + 9 + 1 + 17 + 9 + 1);
    }

    #[test]
    fn test_round_trip() {
        let code = sample();
        assert_eq!(deserialize(&serialize(&code)).unwrap(), code);
    }

    #[test]
    fn test_reader_writer_round_trip() {
        let code = sample();
        let mut buf = Vec::new();
        write_to(&mut buf, &code).unwrap();
        let mut cursor = io::Cursor::new(buf);
        assert_eq!(read_from(&mut cursor).unwrap(), code);
    }

    #[test]
    fn test_empty_stream() {
        let bytes = serialize(&[]);
        assert_eq!(bytes, 0u64.to_le_bytes().to_vec());
        assert_eq!(deserialize(&bytes).unwrap(), vec![]);
    }

    #[test]
    fn test_truncated() {
        let bytes = serialize(&sample());
        for cut in [0, 4, 8, 12, bytes.len() - 1] {
            assert!(
                matches!(deserialize(&bytes[..cut]), Err(TernError::Codec(_))),
                "cut at {cut}"
            );
        }
        let mut cursor = io::Cursor::new(&bytes[..bytes.len() - 3]);
        assert!(matches!(read_from(&mut cursor), Err(TernError::Codec(_))));
    }

    #[test]
    fn test_trailing_bytes() {
        let mut bytes = serialize(&sample());
        bytes.push(0);
        assert!(matches!(deserialize(&bytes), Err(TernError::Codec(_))));
    }

    #[test]
    fn test_unknown_opcode() {
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&1u64.to_le_bytes());
        bytes.push(200);
        let err = deserialize(&bytes).unwrap_err();
        assert!(err.to_string().contains("unknown opcode 200"));
    }

    #[test]
    fn test_length_mismatch() {
        // POP claiming a 9-byte body
        let mut bytes = 1u64.to_le_bytes().to_vec();
        bytes.extend_from_slice(&9u64.to_le_bytes());
        bytes.push(Op::Pop as u8);
        bytes.extend_from_slice(&0u64.to_le_bytes());
        assert!(matches!(deserialize(&bytes), Err(TernError::Codec(_))));
    }

    #[test]
    fn test_huge_count_rejected() {
        let bytes = u64::MAX.to_le_bytes().to_vec();
        assert!(matches!(deserialize(&bytes), Err(TernError::Codec(_))));
    }

    #[test]
    fn test_unknown_interned_index() {
        let bad = Instruction::with_operand(Op::PushSym, u64::MAX);
        let bytes = serialize(&[bad]);
        assert!(matches!(deserialize(&bytes), Err(TernError::Codec(_))));
    }

    #[test]
    fn test_string_table_from_code() {
        let code = sample();
        let table = StringTable::for_code(&code);
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(index_of(intern("x"))), Some("x"));
        assert_eq!(StringTable::decode(&table.encode()).unwrap(), table);
    }

    #[test]
    fn test_string_table_remaps_foreign_indices() {
        // Indices as another process might have assigned them.
        let foreign = [
            Instruction::with_operand(Op::PushStr, 900_001),
            Instruction::with_operand(Op::Define, 900_002),
            Instruction::with_operand(Op::PushStr, 900_001),
            Instruction::new(Op::EndCode),
        ];
        let mut table = StringTable::new();
        table.insert(900_001, "from-afar");
        table.insert(900_002, "remote-name");
        let table = StringTable::decode(&table.encode()).unwrap();

        let bytes = serialize(&foreign);
        assert!(deserialize(&bytes).is_err());
        let code = deserialize_with_table(&bytes, &table).unwrap();
        assert_eq!(code[0].operand(), index_of(intern("from-afar")));
        assert_eq!(code[1].operand(), index_of(intern("remote-name")));
        assert_eq!(code[2].operand(), code[0].operand());
        assert_eq!(code[3], Instruction::new(Op::EndCode));
    }

    #[test]
    fn test_string_table_missing_entry() {
        let bytes = serialize(&[Instruction::with_operand(Op::PushSym, 900_003)]);
        let err = deserialize_with_table(&bytes, &StringTable::new()).unwrap_err();
        assert!(err.to_string().contains("string table lacks"));
    }

    #[test]
    fn test_string_table_rejects_malformed() {
        let mut table = StringTable::new();
        table.insert(1, "abc");
        let bytes = table.encode();
        assert!(StringTable::decode(&bytes[..bytes.len() - 1]).is_err());
        let mut long = bytes.clone();
        long.push(0);
        assert!(StringTable::decode(&long).is_err());
        let mut huge = 1u64.to_le_bytes().to_vec();
        huge.extend_from_slice(&1u64.to_le_bytes());
        huge.extend_from_slice(&u64::MAX.to_le_bytes());
        assert!(StringTable::decode(&huge).is_err());
        assert!(StringTable::decode(&u64::MAX.to_le_bytes()).is_err());
    }
}
