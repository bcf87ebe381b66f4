//! The record store file format.
//!
//! ## Structure
//!
//! - [`lexer`] - tokenizer for the literal subset the file uses.
//! - [`parser`] - id allocation and record extraction.
//! - [`serializer`] - block rendering and splicing.

mod lexer;
mod parser;
mod serializer;

pub use lexer::{Token, TokenKind, tokenize};
pub use parser::{StoredRecord, existing_ids, next_id, parse_records};
pub use serializer::{append_record, render_block, splice_record};
