use std::fmt::{self, Write};

use tern_core::symbol::{spur_from_index, try_resolve};
use tern_core::{Instruction, Op};

/// Closure bodies nested deeper than this are listed flat.
const MAX_LISTING_DEPTH: usize = 64;

/// Produce a human-readable listing of an instruction list.
///
/// Closure bodies are listed indented under their `CREATE_CLOSURE`, numbered
/// from zero since their jump targets are local to the body.
pub fn disassemble(code: &[Instruction], name: Option<&str>) -> String {
    let mut out = String::new();
    let label = name.unwrap_or("<program>");
    // Writing to a String cannot fail.
    let _ = writeln!(out, "== {label} ==").and_then(|_| write_block(&mut out, code, 0));
    out
}

fn write_block(out: &mut String, code: &[Instruction], indent: usize) -> fmt::Result {
    let pad = "    ".repeat(indent);
    let mut pc = 0usize;
    while pc < code.len() {
        let inst = code[pc];
        let mnemonic = inst.op.name();
        match inst.op {
            op if op.names_text() => {
                let idx = inst.operand();
                let text = spur_from_index(idx)
                    .and_then(try_resolve)
                    .unwrap_or("<unknown>");
                writeln!(out, "{pad}{pc:04}  {mnemonic:<26} {idx:<4} ; {text}")?;
            }
            Op::PushNum => {
                writeln!(out, "{pad}{pc:04}  {mnemonic:<26} {}", inst.operand_i64())?;
            }
            Op::Jmp | Op::JmpIf | Op::JmpElse => {
                let target = inst.operand();
                writeln!(out, "{pad}{pc:04}  {mnemonic:<26} ; -> {target:04}")?;
            }
            Op::CreateClosure if indent < MAX_LISTING_DEPTH => {
                let params = inst.operand();
                let body_len = inst.second_operand();
                writeln!(out, "{pad}{pc:04}  {mnemonic:<26} params={params} body={body_len}")?;
                let start = pc + 1;
                let end = usize::try_from(body_len)
                    .map_or(code.len(), |len| start.saturating_add(len))
                    .min(code.len());
                write_block(out, &code[start..end], indent + 1)?;
                pc = end;
                continue;
            }
            _ => {
                let args: Vec<String> = inst.operands().iter().map(|v| v.to_string()).collect();
                writeln!(out, "{pad}{pc:04}  {mnemonic:<26} {}", args.join(", "))?;
            }
        }
        pc += 1;
    }
    Ok(())
}
