//! Recipe lexer, build-arg substitution and safety validation
//! (`spec.md` §4.B — Component B). Parses recipe text into an ordered
//! stage list; callers hand the result to
//! [`ossb_types::MultiStageContext::build`] for graph validation.

mod instruction;
mod lexer;
mod parser;
mod substitution;
mod validation;

pub use instruction::InstructionKind;
pub use lexer::{lex, LexError, RawLine, MAX_RECIPE_BYTES};
pub use parser::{parse, ParseOutput};
pub use validation::{MAX_BUILD_ARGS, MAX_BUILD_ARG_KEY_CHARS, MAX_BUILD_ARG_VALUE_BYTES};
