pub mod error;
pub mod instruction;
pub mod symbol;
pub mod value;

pub use error::{Result, Span, TernError};
pub use instruction::{Instruction, Op};
pub use symbol::{intern, resolve, Spur};
pub use value::{Closure, Cons, Env, Value};
