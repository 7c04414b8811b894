use tern_core::{Instruction, Op};

/// Builder for instruction lists.
///
/// `start` is the absolute index the first emitted instruction will occupy
/// in the enclosing program, so `current_index` can be used directly as a
/// jump target.
pub struct Emitter {
    code: Vec<Instruction>,
    start: usize,
}

impl Emitter {
    pub fn new() -> Self {
        Emitter::at(0)
    }

    pub fn at(start: usize) -> Self {
        Emitter {
            code: Vec::new(),
            start,
        }
    }

    pub fn emit(&mut self, inst: Instruction) {
        self.code.push(inst);
    }

    pub fn emit_op(&mut self, op: Op) {
        self.emit(Instruction::new(op));
    }

    pub fn emit_with(&mut self, op: Op, operand: u64) {
        self.emit(Instruction::with_operand(op, operand));
    }

    /// Emit `op` with a zero operand to be filled in later.
    /// Returns the local slot of the placeholder for `patch`/`patch_jump`.
    pub fn emit_placeholder(&mut self, op: Op) -> usize {
        let slot = self.code.len();
        self.emit(Instruction::new(op));
        slot
    }

    /// Replace the instruction at a placeholder slot.
    pub fn patch(&mut self, slot: usize, inst: Instruction) {
        self.code[slot] = inst;
    }

    /// Point the jump at `slot` to the next instruction to be emitted.
    pub fn patch_jump(&mut self, slot: usize) {
        let target = self.current_index() as u64;
        self.code[slot].set_operand(target);
    }

    /// Absolute index of the next instruction.
    pub fn current_index(&self) -> usize {
        self.start + self.code.len()
    }

    /// Append a block verbatim. Its jump targets are not rewritten.
    pub fn append(&mut self, block: Vec<Instruction>) {
        self.code.extend(block);
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn into_instructions(self) -> Vec<Instruction> {
        self.code
    }
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}
