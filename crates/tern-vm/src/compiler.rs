use tern_core::symbol::index_of;
use tern_core::{intern, resolve, Instruction, Op, TernError, Value};
use tracing::debug;

use crate::emit::Emitter;

/// Maximum nesting depth the compiler will recurse into.
/// Deeper forms are rejected instead of overflowing the native stack.
pub const MAX_COMPILE_DEPTH: usize = 512;

/// Compile one form into a complete program terminated by `END_CODE`.
pub fn compile(expr: &Value) -> Result<Vec<Instruction>, TernError> {
    let (mut code, _) = compile_at(expr, 0)?;
    code.push(Instruction::new(Op::EndCode));
    debug!(instructions = code.len(), "compiled program");
    Ok(code)
}

/// Compile one form whose first instruction will sit at `start` in the
/// enclosing program. Returns the instructions and their count.
pub fn compile_at(expr: &Value, start: usize) -> Result<(Vec<Instruction>, usize), TernError> {
    let mut compiler = Compiler::new(start);
    compiler.compile_expr(expr)?;
    let code = compiler.emit.into_instructions();
    let len = code.len();
    Ok((code, len))
}

/// Compile several top-level forms into one program. Intermediate values
/// are discarded; the last one is the program's result.
pub fn compile_many(exprs: &[Value]) -> Result<Vec<Instruction>, TernError> {
    let mut compiler = Compiler::new(0);
    for (i, expr) in exprs.iter().enumerate() {
        compiler.compile_expr(expr)?;
        if i < exprs.len() - 1 {
            compiler.emit.emit_op(Op::Pop);
        }
    }
    if exprs.is_empty() {
        compiler.emit.emit_op(Op::PushNil);
    }
    compiler.emit.emit_op(Op::EndCode);
    let code = compiler.emit.into_instructions();
    debug!(forms = exprs.len(), instructions = code.len(), "compiled program");
    Ok(code)
}

/// The opcode a native operator name compiles to.
pub fn native_op(name: &str) -> Option<Op> {
    let op = match name {
        "+" => Op::PlusNum,
        "-" => Op::MinusNum,
        "*" => Op::MultiplyNum,
        "/" => Op::DivideNum,
        "%" => Op::ModuloNum,
        "=" => Op::EqualNum,
        "!=" => Op::NotEqualNum,
        ">" => Op::GreaterThanNum,
        ">=" => Op::GreaterThanOrEqualNum,
        "<" => Op::LessThanNum,
        "<=" => Op::LessThanOrEqualNum,
        "print" => Op::Print,
        "println" => Op::Println,
        "car" => Op::Car,
        "cdr" => Op::Cdr,
        "random-id" => Op::RandomId,
        "array" => Op::NewArray,
        "array-get" => Op::ArrayGet,
        "array-set" => Op::ArraySet,
        "array-len" => Op::ArrayLength,
        "array-push" => Op::ArrayPush,
        "hashmap" => Op::NewMap,
        "hashmap-get" => Op::MapGet,
        "hashmap-set" => Op::MapSet,
        "hashmap-len" => Op::MapLength,
        "hashmap-keys" => Op::MapKeys,
        "hashmap-delete" => Op::MapDelete,
        "call/cc" => Op::CallCc,
        _ => return None,
    };
    Some(op)
}

struct Compiler {
    emit: Emitter,
    depth: usize,
}

impl Compiler {
    fn new(start: usize) -> Self {
        Compiler {
            emit: Emitter::at(start),
            depth: 0,
        }
    }

    fn compile_expr(&mut self, expr: &Value) -> Result<(), TernError> {
        self.depth += 1;
        if self.depth > MAX_COMPILE_DEPTH {
            self.depth -= 1;
            return Err(TernError::compile("maximum compilation depth exceeded"));
        }
        let result = self.compile_expr_inner(expr);
        self.depth -= 1;
        result
    }

    fn compile_expr_inner(&mut self, expr: &Value) -> Result<(), TernError> {
        match expr {
            Value::Nil => self.emit.emit_op(Op::PushNil),
            Value::Bool(true) => self.emit.emit_op(Op::PushTrue),
            Value::Bool(false) => self.emit.emit_op(Op::PushFalse),
            Value::Number(n) => self.emit.emit(Instruction::push_num(*n)),
            Value::String(s) => self.emit.emit_with(Op::PushStr, index_of(*s)),
            Value::Symbol(s) => {
                self.emit.emit_with(Op::PushSym, index_of(*s));
                self.emit.emit_op(Op::Load);
            }
            // `()` evaluates to itself.
            Value::Cons(cell) if cell.is_empty() => self.compile_quote(expr),
            Value::Cons(_) => return self.compile_form(expr),
            other => {
                return Err(TernError::compile(format!(
                    "cannot compile a {} literal",
                    other.type_name()
                )))
            }
        }
        Ok(())
    }

    fn compile_form(&mut self, expr: &Value) -> Result<(), TernError> {
        let items = expr
            .list_items()
            .ok_or_else(|| TernError::compile(format!("improper application: {expr}")))?;
        let (head, args) = items
            .split_first()
            .ok_or_else(|| TernError::compile("empty application"))?;

        if let Some(spur) = head.as_symbol_spur() {
            let name = resolve(spur);
            match name {
                "quote" => return self.compile_quote_form(args),
                "define" => return self.compile_binding(Op::Define, "define", args),
                "set" => return self.compile_binding(Op::Set, "set", args),
                "begin" => return self.compile_begin(args),
                "cond" => return self.compile_cond(args),
                "and" => return self.compile_logic(Op::And, "and", args),
                "or" => return self.compile_logic(Op::Or, "or", args),
                "lambda" => return self.compile_lambda(args),
                "loop" => return self.compile_loop(args),
                _ => {}
            }
            if let Some(op) = native_op(name) {
                return self.compile_native(op, name, args);
            }
        }

        for arg in args {
            self.compile_expr(arg)?;
        }
        self.compile_expr(head)?;
        self.emit.emit_with(Op::Call, args.len() as u64);
        Ok(())
    }

    // --- Special forms ---

    fn compile_quote_form(&mut self, args: &[Value]) -> Result<(), TernError> {
        let [quoted] = args else {
            return Err(TernError::compile(format!(
                "quote expects 1 argument, got {}",
                args.len()
            )));
        };
        self.compile_quote(quoted);
        Ok(())
    }

    fn compile_quote(&mut self, quoted: &Value) {
        let text = intern(&quoted.to_string());
        self.emit.emit_with(Op::PushSexp, index_of(text));
    }

    fn compile_binding(&mut self, op: Op, form: &str, args: &[Value]) -> Result<(), TernError> {
        let [target, val] = args else {
            return Err(TernError::compile(format!(
                "{form} expects 2 arguments, got {}",
                args.len()
            )));
        };
        let spur = target.as_symbol_spur().ok_or_else(|| {
            TernError::compile(format!("{form} target must be a symbol, got {target}"))
        })?;
        self.compile_expr(val)?;
        self.emit.emit_with(op, index_of(spur));
        Ok(())
    }

    fn compile_begin(&mut self, exprs: &[Value]) -> Result<(), TernError> {
        if exprs.is_empty() {
            return Err(TernError::compile("begin expects at least 1 expression"));
        }
        for (i, expr) in exprs.iter().enumerate() {
            self.compile_expr(expr)?;
            if i < exprs.len() - 1 {
                self.emit.emit_op(Op::Pop);
            }
        }
        Ok(())
    }

    fn compile_cond(&mut self, clauses: &[Value]) -> Result<(), TernError> {
        if clauses.is_empty() {
            return Err(TernError::compile("cond expects at least 1 clause"));
        }
        let mut end_jumps = Vec::with_capacity(clauses.len());
        for clause in clauses {
            let parts = clause.list_items().unwrap_or_default();
            let [test, body] = parts.as_slice() else {
                return Err(TernError::compile(format!(
                    "cond clause must be (condition body), got {clause}"
                )));
            };
            self.compile_expr(test)?;
            let next_clause = self.emit.emit_placeholder(Op::JmpElse);
            self.compile_expr(body)?;
            end_jumps.push(self.emit.emit_placeholder(Op::Jmp));
            self.emit.patch_jump(next_clause);
        }
        // No clause matched.
        self.emit.emit_op(Op::PushNil);
        for slot in end_jumps {
            self.emit.patch_jump(slot);
        }
        Ok(())
    }

    fn compile_logic(&mut self, op: Op, form: &str, args: &[Value]) -> Result<(), TernError> {
        if args.is_empty() {
            return Err(TernError::compile(format!(
                "{form} expects at least 1 argument"
            )));
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        self.emit.emit_with(op, args.len() as u64);
        Ok(())
    }

    fn compile_lambda(&mut self, args: &[Value]) -> Result<(), TernError> {
        let [params, body] = args else {
            return Err(TernError::compile(format!(
                "lambda expects a parameter list and 1 body expression, got {} arguments",
                args.len()
            )));
        };
        let params = params.list_items().ok_or_else(|| {
            TernError::compile(format!("lambda parameters must be a list, got {params}"))
        })?;

        self.emit.emit_op(Op::NewEnv);
        for param in &params {
            let spur = param.as_symbol_spur().ok_or_else(|| {
                TernError::compile(format!("lambda parameter must be a symbol, got {param}"))
            })?;
            self.emit.emit_with(Op::DefineArgs, index_of(spur));
        }
        let header = self.emit.emit_placeholder(Op::CreateClosure);

        // Body jump targets are local to the closure's own code block.
        let mut block = self.compile_detached(body, 0)?;
        block.push(Instruction::new(Op::Return));
        let body_len = block.len() as u64;
        self.emit.append(block);
        self.emit.patch(
            header,
            Instruction::with_operands(Op::CreateClosure, params.len() as u64, body_len),
        );
        Ok(())
    }

    fn compile_loop(&mut self, args: &[Value]) -> Result<(), TernError> {
        let [test, body] = args else {
            return Err(TernError::compile(format!(
                "loop expects a condition and a body, got {} arguments",
                args.len()
            )));
        };
        let start = self.emit.current_index();
        self.compile_expr(test)?;
        let exit = self.emit.emit_placeholder(Op::JmpElse);
        self.compile_expr(body)?;
        self.emit.emit_op(Op::Pop);
        self.emit.emit_with(Op::Jmp, start as u64);
        self.emit.patch_jump(exit);
        self.emit.emit_op(Op::PushNil);
        Ok(())
    }

    // --- Natives ---

    fn compile_native(&mut self, op: Op, name: &str, args: &[Value]) -> Result<(), TernError> {
        if op.operand_count() == 0 {
            let expected = match op {
                Op::Car | Op::Cdr => 1,
                _ => 0,
            };
            if args.len() != expected {
                return Err(TernError::compile(format!(
                    "{name} expects {expected} arguments, got {}",
                    args.len()
                )));
            }
        }
        for arg in args {
            self.compile_expr(arg)?;
        }
        if op.operand_count() == 0 {
            self.emit.emit_op(op);
        } else {
            self.emit.emit_with(op, args.len() as u64);
        }
        Ok(())
    }

    /// Compile into a fresh block that starts at `start`, sharing the depth budget.
    fn compile_detached(
        &mut self,
        expr: &Value,
        start: usize,
    ) -> Result<Vec<Instruction>, TernError> {
        let outer = std::mem::replace(&mut self.emit, Emitter::at(start));
        let result = self.compile_expr(expr);
        let inner = std::mem::replace(&mut self.emit, outer);
        result?;
        Ok(inner.into_instructions())
    }
}
