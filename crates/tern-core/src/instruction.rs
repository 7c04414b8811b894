use std::fmt;

/// Opcodes of the tern instruction set.
///
/// Every instruction is one opcode byte followed by zero, one or two
/// little-endian `u64` operands. The discriminants are part of the wire
/// format and must not be renumbered.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Constants & stack
    PushSym = 1,  // u64 symbol index
    PushNum = 2,  // u64 (i64 reinterpreted)
    PushTrue = 3,
    PushFalse = 4,
    PushStr = 5,  // u64 string index
    PushNil = 6,
    PushSexp = 7, // u64 index of the quoted form's text
    Pop = 8,

    // Control flow (operand: absolute instruction index)
    Jmp = 9,
    JmpIf = 10,
    JmpElse = 11,

    // Environments
    Load = 12,
    Define = 13,     // u64 symbol index
    DefineArgs = 14, // u64 symbol index
    Set = 15,        // u64 symbol index
    NewEnv = 16,

    // Closures & calls
    CreateClosure = 17, // u64 param count, u64 body length
    Call = 18,          // u64 argc
    Return = 19,

    // Boolean
    And = 20,
    Or = 21,

    // Output
    Print = 22,
    Println = 23,

    // Arithmetic (operand: argc)
    PlusNum = 24,
    MinusNum = 25,
    MultiplyNum = 26,
    DivideNum = 27,
    ModuloNum = 28,

    // Comparison (operand: argc)
    EqualNum = 29,
    NotEqualNum = 30,
    GreaterThanNum = 31,
    GreaterThanOrEqualNum = 32,
    LessThanNum = 33,
    LessThanOrEqualNum = 34,

    // Lists
    Car = 35,
    Cdr = 36,

    RandomId = 37,

    // Arrays
    NewArray = 38,
    ArrayGet = 39,
    ArraySet = 40,
    ArrayLength = 41,
    ArrayPush = 42,

    // Maps
    NewMap = 43,
    MapGet = 44,
    MapSet = 45,
    MapLength = 46,
    MapKeys = 47,
    MapDelete = 48,

    EndCode = 49,
    Nop = 50,

    CallCc = 51, // u64 argc
}

impl Op {
    pub fn from_u8(byte: u8) -> Option<Op> {
        let op = match byte {
            1 => Op::PushSym,
            2 => Op::PushNum,
            3 => Op::PushTrue,
            4 => Op::PushFalse,
            5 => Op::PushStr,
            6 => Op::PushNil,
            7 => Op::PushSexp,
            8 => Op::Pop,
            9 => Op::Jmp,
            10 => Op::JmpIf,
            11 => Op::JmpElse,
            12 => Op::Load,
            13 => Op::Define,
            14 => Op::DefineArgs,
            15 => Op::Set,
            16 => Op::NewEnv,
            17 => Op::CreateClosure,
            18 => Op::Call,
            19 => Op::Return,
            20 => Op::And,
            21 => Op::Or,
            22 => Op::Print,
            23 => Op::Println,
            24 => Op::PlusNum,
            25 => Op::MinusNum,
            26 => Op::MultiplyNum,
            27 => Op::DivideNum,
            28 => Op::ModuloNum,
            29 => Op::EqualNum,
            30 => Op::NotEqualNum,
            31 => Op::GreaterThanNum,
            32 => Op::GreaterThanOrEqualNum,
            33 => Op::LessThanNum,
            34 => Op::LessThanOrEqualNum,
            35 => Op::Car,
            36 => Op::Cdr,
            37 => Op::RandomId,
            38 => Op::NewArray,
            39 => Op::ArrayGet,
            40 => Op::ArraySet,
            41 => Op::ArrayLength,
            42 => Op::ArrayPush,
            43 => Op::NewMap,
            44 => Op::MapGet,
            45 => Op::MapSet,
            46 => Op::MapLength,
            47 => Op::MapKeys,
            48 => Op::MapDelete,
            49 => Op::EndCode,
            50 => Op::Nop,
            51 => Op::CallCc,
            _ => return None,
        };
        Some(op)
    }

    /// Number of `u64` operands that follow the opcode byte.
    pub fn operand_count(self) -> usize {
        match self {
            Op::Pop
            | Op::PushTrue
            | Op::PushFalse
            | Op::PushNil
            | Op::Load
            | Op::NewEnv
            | Op::Return
            | Op::Car
            | Op::Cdr
            | Op::RandomId
            | Op::NewArray
            | Op::NewMap
            | Op::EndCode
            | Op::Nop => 0,
            Op::CreateClosure => 2,
            _ => 1,
        }
    }

    pub fn is_jump(self) -> bool {
        matches!(self, Op::Jmp | Op::JmpIf | Op::JmpElse)
    }

    /// Whether the first operand is an interned index.
    pub fn names_text(self) -> bool {
        matches!(
            self,
            Op::PushSym | Op::PushStr | Op::PushSexp | Op::Define | Op::DefineArgs | Op::Set
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Op::PushSym => "PUSH_SYM",
            Op::PushNum => "PUSH_NUM",
            Op::PushTrue => "PUSH_TRUE",
            Op::PushFalse => "PUSH_FALSE",
            Op::PushStr => "PUSH_STR",
            Op::PushNil => "PUSH_NIL",
            Op::PushSexp => "PUSH_SEXP",
            Op::Pop => "POP",
            Op::Jmp => "JMP",
            Op::JmpIf => "JMP_IF",
            Op::JmpElse => "JMP_ELSE",
            Op::Load => "LOAD",
            Op::Define => "DEFINE",
            Op::DefineArgs => "DEFINE_ARGS",
            Op::Set => "SET",
            Op::NewEnv => "NEW_ENV",
            Op::CreateClosure => "CREATE_CLOSURE",
            Op::Call => "CALL",
            Op::Return => "RETURN",
            Op::And => "AND",
            Op::Or => "OR",
            Op::Print => "PRINT",
            Op::Println => "PRINTLN",
            Op::PlusNum => "PLUS_NUM",
            Op::MinusNum => "MINUS_NUM",
            Op::MultiplyNum => "MULTIPLY_NUM",
            Op::DivideNum => "DIVIDE_NUM",
            Op::ModuloNum => "MODULO_NUM",
            Op::EqualNum => "EQUAL_NUM",
            Op::NotEqualNum => "NOT_EQUAL_NUM",
            Op::GreaterThanNum => "GREATER_THAN_NUM",
            Op::GreaterThanOrEqualNum => "GREATER_THAN_OR_EQUAL_NUM",
            Op::LessThanNum => "LESS_THAN_NUM",
            Op::LessThanOrEqualNum => "LESS_THAN_OR_EQUAL_NUM",
            Op::Car => "CAR",
            Op::Cdr => "CDR",
            Op::RandomId => "RANDOM_ID",
            Op::NewArray => "NEW_ARRAY",
            Op::ArrayGet => "ARRAY_GET",
            Op::ArraySet => "ARRAY_SET",
            Op::ArrayLength => "ARRAY_LENGTH",
            Op::ArrayPush => "ARRAY_PUSH",
            Op::NewMap => "NEW_MAP",
            Op::MapGet => "MAP_GET",
            Op::MapSet => "MAP_SET",
            Op::MapLength => "MAP_LENGTH",
            Op::MapKeys => "MAP_KEYS",
            Op::MapDelete => "MAP_DELETE",
            Op::EndCode => "END_CODE",
            Op::Nop => "NOP",
            Op::CallCc => "CALL_CC",
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One decoded instruction: an opcode and its (at most two) operands.
/// Operand slots beyond `op.operand_count()` are always zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instruction {
    pub op: Op,
    operands: [u64; 2],
}

impl Instruction {
    pub fn new(op: Op) -> Self {
        Instruction {
            op,
            operands: [0, 0],
        }
    }

    pub fn with_operand(op: Op, a: u64) -> Self {
        Instruction {
            op,
            operands: [a, 0],
        }
    }

    pub fn with_operands(op: Op, a: u64, b: u64) -> Self {
        Instruction {
            op,
            operands: [a, b],
        }
    }

    /// Build an instruction from decoded operands, zeroing any slot the
    /// opcode does not use.
    pub fn from_parts(op: Op, operands: &[u64]) -> Self {
        let mut inst = Instruction::new(op);
        for (slot, val) in inst
            .operands
            .iter_mut()
            .zip(operands.iter())
            .take(op.operand_count())
        {
            *slot = *val;
        }
        inst
    }

    pub fn push_num(n: i64) -> Self {
        Instruction::with_operand(Op::PushNum, n as u64)
    }

    /// First operand (arity, index, jump target or parameter count).
    pub fn operand(&self) -> u64 {
        self.operands[0]
    }

    pub fn second_operand(&self) -> u64 {
        self.operands[1]
    }

    pub fn operand_i64(&self) -> i64 {
        self.operands[0] as i64
    }

    /// The operands this opcode actually carries.
    pub fn operands(&self) -> &[u64] {
        &self.operands[..self.op.operand_count()]
    }

    pub fn set_operand(&mut self, val: u64) {
        self.operands[0] = val;
    }

    /// Encoded length in bytes: opcode plus payload.
    pub fn len(&self) -> usize {
        1 + 8 * self.op.operand_count()
    }

    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Op::PushNum => write!(f, "{} {}", self.op, self.operand_i64()),
            _ => {
                write!(f, "{}", self.op)?;
                for (i, val) in self.operands().iter().enumerate() {
                    if i == 0 {
                        write!(f, " {val}")?;
                    } else {
                        write!(f, ", {val}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_u8_covers_every_opcode() {
        for byte in 1..=51u8 {
            let op = Op::from_u8(byte).unwrap();
            assert_eq!(op as u8, byte);
        }
        assert_eq!(Op::from_u8(0), None);
        assert_eq!(Op::from_u8(52), None);
    }

    #[test]
    fn test_names_text() {
        assert!(Op::Define.names_text());
        assert!(Op::PushSexp.names_text());
        assert!(!Op::PushNum.names_text());
        assert!(!Op::Load.names_text());
    }

    #[test]
    fn test_lengths() {
        assert_eq!(Instruction::new(Op::Pop).len(), 1);
        assert_eq!(Instruction::push_num(-3).len(), 9);
        assert_eq!(Instruction::with_operands(Op::CreateClosure, 2, 7).len(), 17);
    }

    #[test]
    fn test_from_parts_zeroes_unused_slots() {
        let inst = Instruction::from_parts(Op::Pop, &[9, 9]);
        assert_eq!(inst, Instruction::new(Op::Pop));
        let inst = Instruction::from_parts(Op::Call, &[3, 9]);
        assert_eq!(inst, Instruction::with_operand(Op::Call, 3));
    }

    #[test]
    fn test_push_num_sign() {
        let inst = Instruction::push_num(-42);
        assert_eq!(inst.operand_i64(), -42);
        assert_eq!(inst.to_string(), "PUSH_NUM -42");
    }

    #[test]
    fn test_display() {
        assert_eq!(
            Instruction::with_operands(Op::CreateClosure, 1, 5).to_string(),
            "CREATE_CLOSURE 1, 5"
        );
        assert_eq!(Instruction::new(Op::EndCode).to_string(), "END_CODE");
    }
}
