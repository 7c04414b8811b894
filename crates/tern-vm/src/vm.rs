use std::io::{self, Stdout, Write};
use std::rc::Rc;

use hashbrown::HashMap;
use tern_core::symbol::{compare_spurs, spur_from_index};
use tern_core::{
    check_arity, intern, resolve, Closure, Env, Instruction, Op, Spur, TernError, Value,
};
use tracing::{debug, trace};

/// A running instance of a closure (or of the top-level program).
///
/// Each activation exclusively owns its operand stack and program counter.
/// The return link is the activation below it on the VM's call chain; the
/// caller's `pc` already points past its `CALL` while the callee runs.
struct Activation {
    code: Rc<[Instruction]>,
    pc: usize,
    stack: Vec<Value>,
    env: Rc<Env>,
}

impl Activation {
    fn pop(&mut self, op: Op) -> Result<Value, TernError> {
        self.stack.pop().ok_or(TernError::StackUnderflow(op.name()))
    }

    /// Take the top `n` values, oldest first.
    fn pop_n(&mut self, n: usize, op: Op) -> Result<Vec<Value>, TernError> {
        if n > self.stack.len() {
            return Err(TernError::StackUnderflow(op.name()));
        }
        let at = self.stack.len() - n;
        Ok(self.stack.split_off(at))
    }

    fn jump(&mut self, target: u64) -> Result<(), TernError> {
        let len = self.code.len();
        match usize::try_from(target) {
            Ok(t) if t < len => {
                self.pc = t;
                Ok(())
            }
            _ => Err(TernError::InvalidJump { target, len }),
        }
    }
}

/// The stack virtual machine.
///
/// Output produced by `PRINT`, `PRINTLN` and `END_CODE` goes to `W`.
/// Top-level definitions live in `globals`, which survives across
/// `load`/`run` cycles.
pub struct Vm<W: Write = Stdout> {
    frames: Vec<Activation>,
    globals: Rc<Env>,
    program: Rc<[Instruction]>,
    result: Value,
    result_error: Option<TernError>,
    /// Materialized `PUSH_SEXP` payloads, keyed by their text.
    quoted: HashMap<Spur, Value>,
    out: W,
}

impl Vm<Stdout> {
    pub fn new() -> Self {
        Vm::with_output(io::stdout())
    }
}

impl Default for Vm<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write> Vm<W> {
    pub fn with_output(out: W) -> Self {
        Vm::with_globals(out, Rc::new(Env::new()))
    }

    /// A VM whose top-level frame is `globals`, shared with whoever else holds it.
    pub fn with_globals(out: W, globals: Rc<Env>) -> Self {
        Vm {
            frames: Vec::with_capacity(64),
            globals,
            program: Rc::from(Vec::new()),
            result: Value::Nil,
            result_error: None,
            quoted: HashMap::new(),
            out,
        }
    }

    pub fn load(&mut self, code: Vec<Instruction>) {
        self.program = Rc::from(code);
        self.result = Value::Nil;
        self.result_error = None;
    }

    /// Execute the loaded program until `END_CODE` or an escape.
    pub fn run(&mut self) -> Result<Value, TernError> {
        if self.program.is_empty() {
            self.result = Value::Nil;
            return Ok(Value::Nil);
        }
        self.frames.clear();
        self.frames.push(Activation {
            code: self.program.clone(),
            pc: 0,
            stack: Vec::with_capacity(256),
            env: self.globals.clone(),
        });
        match self.dispatch() {
            Ok(val) => {
                self.result = val.clone();
                self.result_error = None;
                Ok(val)
            }
            Err(err) => {
                debug!(error = %err, depth = self.frames.len(), "escape");
                self.unwind();
                self.result = Value::Nil;
                self.result_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Load and run in one step.
    pub fn execute(&mut self, code: Vec<Instruction>) -> Result<Value, TernError> {
        self.load(code);
        self.run()
    }

    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn result_error(&self) -> Option<&TernError> {
        self.result_error.as_ref()
    }

    pub fn globals(&self) -> &Rc<Env> {
        &self.globals
    }

    pub fn output(&self) -> &W {
        &self.out
    }

    pub fn into_output(self) -> W {
        self.out
    }

    fn unwind(&mut self) {
        while let Some(mut frame) = self.frames.pop() {
            frame.stack.clear();
            frame.pc = 0;
        }
    }

    fn frame(&mut self) -> Result<&mut Activation, TernError> {
        self.frames
            .last_mut()
            .ok_or(TernError::StackUnderflow("activation"))
    }

    fn pop(&mut self, op: Op) -> Result<Value, TernError> {
        self.frame()?.pop(op)
    }

    fn pop_n(&mut self, n: u64, op: Op) -> Result<Vec<Value>, TernError> {
        let n = usize::try_from(n).map_err(|_| TernError::StackUnderflow(op.name()))?;
        self.frame()?.pop_n(n, op)
    }

    fn push(&mut self, val: Value) -> Result<(), TernError> {
        self.frame()?.stack.push(val);
        Ok(())
    }

    fn dispatch(&mut self) -> Result<Value, TernError> {
        loop {
            let frame = self.frame()?;
            let Some(&inst) = frame.code.get(frame.pc) else {
                return Err(TernError::InvalidJump {
                    target: frame.pc as u64,
                    len: frame.code.len(),
                });
            };
            let op = inst.op;

            match op {
                // --- Constants & stack ---
                Op::PushSym => {
                    let spur = text_operand(&inst)?;
                    self.push(Value::Symbol(spur))?;
                }
                Op::PushNum => self.push(Value::Number(inst.operand_i64()))?,
                Op::PushTrue => self.push(Value::Bool(true))?,
                Op::PushFalse => self.push(Value::Bool(false))?,
                Op::PushStr => {
                    let spur = text_operand(&inst)?;
                    self.push(Value::String(spur))?;
                }
                Op::PushNil => self.push(Value::Nil)?,
                Op::PushSexp => {
                    let val = self.materialize(&inst)?;
                    self.push(val)?;
                }
                Op::Pop => {
                    self.pop(op)?;
                }

                // --- Control flow ---
                Op::Jmp => {
                    self.frame()?.jump(inst.operand())?;
                    continue;
                }
                Op::JmpIf | Op::JmpElse => {
                    let cond = self.pop(op)?;
                    let Value::Bool(b) = cond else {
                        return Err(TernError::type_error("bool", cond.type_name()));
                    };
                    if b == (op == Op::JmpIf) {
                        self.frame()?.jump(inst.operand())?;
                        continue;
                    }
                }

                // --- Environments ---
                Op::Load => {
                    let sym = self.pop(op)?;
                    let Value::Symbol(spur) = sym else {
                        return Err(TernError::type_error("symbol", sym.type_name()));
                    };
                    let frame = self.frame()?;
                    let val = frame
                        .env
                        .get(spur)
                        .ok_or_else(|| TernError::Unbound(resolve(spur).to_string()))?;
                    frame.stack.push(val);
                }
                Op::Define => {
                    let spur = text_operand(&inst)?;
                    let val = self.pop(op)?;
                    let frame = self.frame()?;
                    frame.env.define(spur, val);
                    frame.stack.push(Value::Symbol(spur));
                }
                Op::DefineArgs => {
                    let spur = text_operand(&inst)?;
                    self.push(Value::Symbol(spur))?;
                }
                Op::Set => {
                    let spur = text_operand(&inst)?;
                    let val = self.pop(op)?;
                    let frame = self.frame()?;
                    frame.env.assign(spur, val.clone());
                    frame.stack.push(val);
                }
                Op::NewEnv => {
                    let frame = self.frame()?;
                    let env = Env::with_parent(frame.env.clone());
                    frame.stack.push(Value::Environment(Rc::new(env)));
                }

                // --- Closures & calls ---
                Op::CreateClosure => {
                    self.make_closure(&inst)?;
                    continue;
                }
                Op::Call => {
                    self.call(inst.operand())?;
                    continue;
                }
                Op::Return => {
                    let result = self.pop(op)?;
                    let mut callee = self
                        .frames
                        .pop()
                        .ok_or(TernError::StackUnderflow("RETURN"))?;
                    callee.stack.clear();
                    trace!(depth = self.frames.len(), "return");
                    match self.frames.last_mut() {
                        Some(caller) => caller.stack.push(result),
                        None => return Ok(result),
                    }
                    continue;
                }
                Op::CallCc => return Err(TernError::Unsupported("call/cc".to_string())),

                // --- Boolean ---
                Op::And | Op::Or => {
                    let args = self.pop_n(inst.operand(), op)?;
                    let bools = args
                        .iter()
                        .map(|v| {
                            v.as_bool()
                                .ok_or_else(|| TernError::type_error("bool", v.type_name()))
                        })
                        .collect::<Result<Vec<bool>, TernError>>()?;
                    let result = if op == Op::And {
                        bools.first().is_some_and(|first| bools.iter().all(|b| b == first))
                    } else {
                        bools.iter().any(|b| *b)
                    };
                    self.push(Value::Bool(result))?;
                }

                // --- Output ---
                Op::Print | Op::Println => {
                    let args = self.pop_n(inst.operand(), op)?;
                    let mut text: String = args.iter().map(Value::display_string).collect();
                    if op == Op::Println {
                        text.push('\n');
                    }
                    self.out.write_all(text.as_bytes())?;
                    self.push(Value::Nil)?;
                }

                // --- Arithmetic ---
                Op::PlusNum | Op::MinusNum | Op::MultiplyNum | Op::DivideNum | Op::ModuloNum => {
                    let args = self.pop_n(inst.operand(), op)?;
                    let val = arithmetic(op, &args)?;
                    self.push(val)?;
                }

                // --- Comparison ---
                Op::EqualNum
                | Op::NotEqualNum
                | Op::GreaterThanNum
                | Op::GreaterThanOrEqualNum
                | Op::LessThanNum
                | Op::LessThanOrEqualNum => {
                    let args = self.pop_n(inst.operand(), op)?;
                    let val = compare(op, &args)?;
                    self.push(val)?;
                }

                // --- Lists ---
                Op::Car | Op::Cdr => {
                    let val = self.pop(op)?;
                    let Value::Cons(cell) = &val else {
                        return Err(TernError::NotCons(val.to_string()));
                    };
                    let part = if op == Op::Car {
                        cell.car.clone()
                    } else {
                        cell.cdr.clone()
                    };
                    self.push(part)?;
                }

                Op::RandomId => {
                    let id = uuid::Uuid::new_v4().to_string();
                    self.push(Value::String(intern(&id)))?;
                }

                // --- Arrays & maps ---
                Op::NewArray => self.push(Value::array(Vec::new()))?,
                Op::NewMap => self.push(Value::hashmap())?,
                Op::ArrayGet
                | Op::ArraySet
                | Op::ArrayLength
                | Op::ArrayPush
                | Op::MapGet
                | Op::MapSet
                | Op::MapLength
                | Op::MapKeys
                | Op::MapDelete => {
                    let args = self.pop_n(inst.operand(), op)?;
                    let val = collection_op(op, &args)?;
                    self.push(val)?;
                }

                Op::EndCode => {
                    let top = self
                        .frame()?
                        .stack
                        .last()
                        .cloned()
                        .unwrap_or(Value::Nil);
                    writeln!(self.out, "{top}")?;
                    self.out.flush()?;
                    self.unwind();
                    return Ok(top);
                }
                Op::Nop => {}
            }
            self.frame()?.pc += 1;
        }
    }

    /// `PUSH_SEXP`: read the quoted text back into a value, once per text.
    fn materialize(&mut self, inst: &Instruction) -> Result<Value, TernError> {
        let spur = text_operand(inst)?;
        if let Some(val) = self.quoted.get(&spur) {
            return Ok(val.clone());
        }
        let text = resolve(spur);
        trace!(form = text, "materializing quoted form");
        let val = tern_reader::read(text)?;
        self.quoted.insert(spur, val.clone());
        Ok(val)
    }

    fn make_closure(&mut self, inst: &Instruction) -> Result<(), TernError> {
        let op = inst.op;
        let frame = self.frame()?;
        let body_len = usize::try_from(inst.second_operand()).unwrap_or(usize::MAX);
        let body_start = frame.pc + 1;
        let body_end = body_start.saturating_add(body_len);
        if body_end > frame.code.len() {
            return Err(TernError::InvalidJump {
                target: inst.second_operand(),
                len: frame.code.len(),
            });
        }
        let code: Rc<[Instruction]> = Rc::from(&frame.code[body_start..body_end]);

        let param_count = usize::try_from(inst.operand()).unwrap_or(usize::MAX);
        let names = frame.pop_n(param_count, op)?;
        let params = names
            .iter()
            .map(|v| {
                v.as_symbol_spur()
                    .ok_or_else(|| TernError::type_error("symbol", v.type_name()))
            })
            .collect::<Result<Vec<Spur>, TernError>>()?;
        let env = match frame.pop(op)? {
            Value::Environment(env) => env,
            other => return Err(TernError::type_error("environment", other.type_name())),
        };

        frame.stack.push(Value::Closure(Rc::new(Closure { env, params, code })));
        frame.pc = body_end;
        Ok(())
    }

    fn call(&mut self, argc: u64) -> Result<(), TernError> {
        let closure = match self.pop(Op::Call)? {
            Value::Closure(closure) => closure,
            other => return Err(TernError::type_error("closure", other.type_name())),
        };
        let argc = usize::try_from(argc).unwrap_or(usize::MAX);
        if argc != closure.arity() {
            return Err(TernError::arity(
                callee_name(&closure),
                closure.arity().to_string(),
                argc,
            ));
        }
        let caller = self.frame()?;
        let args = caller.pop_n(argc, Op::Call)?;
        caller.pc += 1;

        let env = Env::with_parent(closure.env.clone());
        for (param, arg) in closure.params.iter().zip(args) {
            env.define(*param, arg);
        }
        trace!(depth = self.frames.len() + 1, argc, "call");
        self.frames.push(Activation {
            code: closure.code.clone(),
            pc: 0,
            stack: Vec::new(),
            env: Rc::new(env),
        });
        Ok(())
    }
}

fn callee_name(closure: &Closure) -> String {
    let params: Vec<&str> = closure.params.iter().map(|p| resolve(*p)).collect();
    format!("(lambda ({}))", params.join(" "))
}

/// Resolve an operand that names interned text.
fn text_operand(inst: &Instruction) -> Result<Spur, TernError> {
    spur_from_index(inst.operand())
        .ok_or_else(|| TernError::Unbound(format!("<interned #{}>", inst.operand())))
}

fn number(val: &Value) -> Result<i64, TernError> {
    val.as_number()
        .ok_or_else(|| TernError::type_error("number", val.type_name()))
}

fn arithmetic(op: Op, args: &[Value]) -> Result<Value, TernError> {
    let nums = args.iter().map(number).collect::<Result<Vec<i64>, TernError>>()?;
    let result = match op {
        Op::PlusNum => nums.iter().fold(0i64, |acc, n| acc.wrapping_add(*n)),
        Op::MultiplyNum => nums.iter().fold(1i64, |acc, n| acc.wrapping_mul(*n)),
        _ => {
            let name = match op {
                Op::MinusNum => "-",
                Op::DivideNum => "/",
                _ => "%",
            };
            check_arity!(nums.len(), name, 1..);
            let mut acc = nums[0];
            for &n in &nums[1..] {
                acc = match op {
                    Op::MinusNum => acc.wrapping_sub(n),
                    _ if n == 0 => return Err(TernError::DivisionByZero),
                    Op::DivideNum => acc.wrapping_div(n),
                    _ => acc.wrapping_rem(n),
                };
            }
            acc
        }
    };
    Ok(Value::Number(result))
}

/// `a_i REL a_N` for every `i < N`.
fn compare(op: Op, args: &[Value]) -> Result<Value, TernError> {
    let Some((last, rest)) = args.split_last() else {
        return Err(TernError::arity(comparison_name(op), "1+", 0));
    };
    let result = match op {
        Op::EqualNum => rest.iter().all(|v| v.eqv(last)),
        Op::NotEqualNum => rest.iter().all(|v| !v.eqv(last)),
        _ => {
            let pivot = number(last)?;
            let mut all = true;
            for v in rest {
                let n = number(v)?;
                all &= match op {
                    Op::GreaterThanNum => n > pivot,
                    Op::GreaterThanOrEqualNum => n >= pivot,
                    Op::LessThanNum => n < pivot,
                    _ => n <= pivot,
                };
            }
            all
        }
    };
    Ok(Value::Bool(result))
}

fn comparison_name(op: Op) -> &'static str {
    match op {
        Op::EqualNum => "=",
        Op::NotEqualNum => "!=",
        Op::GreaterThanNum => ">",
        Op::GreaterThanOrEqualNum => ">=",
        Op::LessThanNum => "<",
        _ => "<=",
    }
}

fn index(val: &Value, len: usize) -> Result<usize, TernError> {
    let i = number(val)?;
    usize::try_from(i)
        .ok()
        .filter(|&i| i < len)
        .ok_or(TernError::IndexOutOfBounds { index: i, len })
}

fn map_key(val: &Value) -> Result<Spur, TernError> {
    val.as_key()
        .ok_or_else(|| TernError::type_error("string or symbol", val.type_name()))
}

fn collection_op(op: Op, args: &[Value]) -> Result<Value, TernError> {
    match op {
        Op::ArrayGet => {
            check_arity!(args.len(), "array-get", 2);
            let Value::Array(items) = &args[0] else {
                return Err(TernError::type_error("array", args[0].type_name()));
            };
            let items = items.borrow();
            let i = index(&args[1], items.len())?;
            Ok(items[i].clone())
        }
        Op::ArraySet => {
            check_arity!(args.len(), "array-set", 3);
            let Value::Array(items) = &args[0] else {
                return Err(TernError::type_error("array", args[0].type_name()));
            };
            {
                let mut items = items.borrow_mut();
                let i = index(&args[1], items.len())?;
                items[i] = args[2].clone();
            }
            Ok(args[0].clone())
        }
        Op::ArrayLength => {
            check_arity!(args.len(), "array-len", 1);
            let Value::Array(items) = &args[0] else {
                return Err(TernError::type_error("array", args[0].type_name()));
            };
            let len = items.borrow().len();
            Ok(Value::Number(len as i64))
        }
        Op::ArrayPush => {
            check_arity!(args.len(), "array-push", 2);
            let Value::Array(items) = &args[0] else {
                return Err(TernError::type_error("array", args[0].type_name()));
            };
            items.borrow_mut().push(args[1].clone());
            Ok(args[0].clone())
        }
        Op::MapGet => {
            check_arity!(args.len(), "hashmap-get", 2);
            let Value::HashMap(map) = &args[0] else {
                return Err(TernError::type_error("hashmap", args[0].type_name()));
            };
            let key = map_key(&args[1])?;
            Ok(map.borrow().get(&key).cloned().unwrap_or(Value::Nil))
        }
        Op::MapSet => {
            check_arity!(args.len(), "hashmap-set", 3);
            let Value::HashMap(map) = &args[0] else {
                return Err(TernError::type_error("hashmap", args[0].type_name()));
            };
            let key = map_key(&args[1])?;
            map.borrow_mut().insert(key, args[2].clone());
            Ok(args[0].clone())
        }
        Op::MapLength => {
            check_arity!(args.len(), "hashmap-len", 1);
            let Value::HashMap(map) = &args[0] else {
                return Err(TernError::type_error("hashmap", args[0].type_name()));
            };
            let len = map.borrow().len();
            Ok(Value::Number(len as i64))
        }
        Op::MapKeys => {
            check_arity!(args.len(), "hashmap-keys", 1);
            let Value::HashMap(map) = &args[0] else {
                return Err(TernError::type_error("hashmap", args[0].type_name()));
            };
            let mut keys: Vec<Spur> = map.borrow().keys().copied().collect();
            keys.sort_by(|a, b| compare_spurs(*a, *b));
            Ok(Value::array(keys.into_iter().map(Value::String).collect()))
        }
        Op::MapDelete => {
            check_arity!(args.len(), "hashmap-delete", 2);
            let Value::HashMap(map) = &args[0] else {
                return Err(TernError::type_error("hashmap", args[0].type_name()));
            };
            let key = map_key(&args[1])?;
            map.borrow_mut().remove(&key);
            Ok(args[0].clone())
        }
        other => Err(TernError::Unsupported(format!("{other} is not a collection op"))),
    }
}
