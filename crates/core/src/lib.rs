//! Linguine Core: the bytecode model shared by the compiler and the runtime
//!
//! This crate is the language-agnostic middle of the pipeline: the compiler
//! produces an [`Image`], the interpreter executes one. Nothing here depends
//! on either side.
//!
//! Key design principles:
//! - Instructions are a tagged enum ([`Instr`]), not raw bytes: the dispatch
//!   loop matches on it exhaustively, so adding an opcode is a compile error
//!   until every consumer handles it.
//! - Jump targets are absolute instruction indices in memory and signed
//!   byte offsets on the wire; the conversion happens at the image boundary.
//! - The wire format is an exact little-endian byte layout, encoded and
//!   decoded by hand. Decoding validates operand bounds up front so the
//!   interpreter never has to.
//!
//! # Modules
//!
//! - `opcode`: one-byte opcode set and the typed instruction enum
//! - `image`: compiled function/image model, wire encode/decode, disassembly

pub mod image;
pub mod opcode;

pub use image::{Function, FormatError, Image, LineEntry};
pub use opcode::{BinOp, Instr, Opcode};

/// Magic bytes at the start of a serialized image.
pub const IMAGE_MAGIC: [u8; 4] = *b"LNGU";

/// Wire format version this build reads and writes.
pub const IMAGE_VERSION: u16 = 1;
